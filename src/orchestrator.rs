use std::fmt;

use crate::address::{self, ResourceAddress};
use crate::config::Module;
use crate::error::{ImportError, Result};
use crate::evaluate::ProviderConfigEvaluator;
use crate::import;
use crate::merge;
use crate::providers::{ProviderRef, ProviderRegistry};
use crate::state::{StateFile, StateStore};
use crate::variables::VariableSources;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    AddressResolved,
    ProviderConfigured,
    Imported,
    Merged,
    Persisted,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Start => "start",
            Phase::AddressResolved => "address_resolved",
            Phase::ProviderConfigured => "provider_configured",
            Phase::Imported => "imported",
            Phase::Merged => "merged",
            Phase::Persisted => "persisted",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One import: a target address and the external ID to bind to it.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub address: String,
    pub id: String,
    /// `TYPE` or `TYPE.ALIAS`, overriding the provider the configuration implies.
    pub provider: Option<String>,
    pub variables: VariableSources,
}

impl ImportRequest {
    pub fn new(address: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_variables(mut self, variables: VariableSources) -> Self {
        self.variables = variables;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedResource {
    pub address: ResourceAddress,
    pub id: String,
    pub provider: ProviderRef,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    /// State as persisted.
    pub state: StateFile,
    /// Primary resource first, then dependents.
    pub imported: Vec<ImportedResource>,
}

/// Sequences address resolution, provider configuration, import, merge, and
/// persistence for a single import. Any error ends the run with nothing
/// persisted.
pub struct ImportOrchestrator<'a, S: StateStore> {
    config: &'a Module,
    registry: &'a ProviderRegistry,
    store: &'a S,
}

struct Run {
    phase: Phase,
}

impl Run {
    fn advance(&mut self, next: Phase) {
        tracing::debug!(from = %self.phase, to = %next, "import phase");
        self.phase = next;
    }
}

impl<'a, S: StateStore> ImportOrchestrator<'a, S> {
    pub fn new(config: &'a Module, registry: &'a ProviderRegistry, store: &'a S) -> Self {
        Self {
            config,
            registry,
            store,
        }
    }

    pub async fn run(&self, request: &ImportRequest) -> Result<ImportOutcome> {
        let mut run = Run { phase: Phase::Start };
        match self.execute(request, &mut run).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::warn!(
                    phase = %run.phase,
                    kind = %err.kind(),
                    address = %request.address,
                    "import failed"
                );
                run.advance(Phase::Failed);
                Err(err)
            }
        }
    }

    async fn execute(&self, request: &ImportRequest, run: &mut Run) -> Result<ImportOutcome> {
        let state = self.store.load()?;

        let target = address::resolve(&request.address, self.config)?;
        run.advance(Phase::AddressResolved);

        let override_ref = request
            .provider
            .as_deref()
            .map(|text| {
                text.parse::<ProviderRef>()
                    .map_err(|e| ImportError::UnknownProvider {
                        provider: text.to_string(),
                        detail: e.to_string(),
                    })
            })
            .transpose()?;
        let provider = ProviderConfigEvaluator::new(self.config, self.registry)
            .evaluate(&target, override_ref.as_ref(), &request.variables)
            .await?;
        run.advance(Phase::ProviderConfigured);

        let imported = import::invoke(&provider, &target, &request.id).await?;
        run.advance(Phase::Imported);

        let merged = merge::merge(&state, &imported, &provider.reference)?;
        run.advance(Phase::Merged);

        self.store.save(&merged)?;
        run.advance(Phase::Persisted);

        let imported = imported
            .iter()
            .map(|entry| ImportedResource {
                address: entry.address.clone(),
                id: entry.instance.id.clone(),
                provider: provider.reference.clone(),
            })
            .collect::<Vec<_>>();
        tracing::info!(
            address = %target,
            id = %request.id,
            resources = imported.len(),
            location = %self.store.location(),
            "import complete"
        );

        Ok(ImportOutcome {
            state: merged,
            imported,
        })
    }
}
