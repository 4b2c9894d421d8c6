use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::orchestrator::ImportOutcome;

#[derive(Tabled)]
struct ImportedRow {
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "PROVIDER")]
    provider: String,
}

pub fn imported_table(outcome: &ImportOutcome) -> String {
    let rows = outcome.imported.iter().map(|resource| ImportedRow {
        address: resource.address.to_string(),
        id: resource.id.clone(),
        provider: resource.provider.to_string(),
    });
    Table::new(rows).with(Style::sharp()).to_string()
}

/// Success report: a summary line, the imported resources, and the resulting
/// state listing.
pub fn render_success(outcome: &ImportOutcome) -> String {
    let noun = if outcome.imported.len() == 1 {
        "resource"
    } else {
        "resources"
    };
    format!(
        "Import successful! Imported {} {}:\n{}\n\n{}",
        outcome.imported.len(),
        noun,
        imported_table(outcome),
        outcome.state.to_string().trim_end()
    )
}
