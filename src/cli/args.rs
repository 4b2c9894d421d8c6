use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring an existing remote resource under management.
    Import(ImportArgs),
}

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// State file to read and update.
    #[arg(long, env = "TFIMPORT_STATE", default_value = "terraform.tfstate")]
    pub state: PathBuf,

    /// Parsed configuration tree (JSON).
    #[arg(long, env = "TFIMPORT_CONFIG", default_value = "tfimport.json")]
    pub config: PathBuf,

    /// Provider to import with, e.g. `aws` or `aws.west`.
    #[arg(long)]
    pub provider: Option<String>,

    /// Root variable override, `name=value`. Repeatable.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// JSON file of variable values. Repeatable; later files win.
    #[arg(long = "var-file", value_name = "PATH")]
    pub var_files: Vec<PathBuf>,

    /// Answer imports for a provider type from a recorded snapshot, `type=path`.
    #[arg(long = "provider-snapshot", value_name = "TYPE=PATH")]
    pub provider_snapshots: Vec<String>,

    /// Resource address to import into, e.g. `module.app.aws_instance.web`.
    pub address: String,

    /// Provider-specific ID of the existing resource.
    pub id: String,
}
