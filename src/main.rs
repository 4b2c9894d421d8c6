mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ImportArgs};
use tfimport::{
    FileStateStore, ImportOrchestrator, ImportRequest, Module, ProviderRegistry, SnapshotProvider,
    VariableSources, output,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Import(args) => import(args).await?,
    }

    Ok(())
}

fn provider_registry(snapshots: &[String]) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for flag in snapshots {
        let (provider_type, path) = flag
            .split_once('=')
            .ok_or_else(|| eyre!("invalid --provider-snapshot {:?}: expected TYPE=PATH", flag))?;
        let provider = SnapshotProvider::load(provider_type, &PathBuf::from(path))?;
        registry.register_instance(provider_type, Arc::new(provider));
        tracing::debug!(provider = provider_type, path, "snapshot provider registered");
    }
    Ok(registry)
}

async fn import(args: ImportArgs) -> Result<()> {
    let config = Module::load(&args.config)?;
    let registry = provider_registry(&args.provider_snapshots)?;

    let mut variables = VariableSources::new().with_environment(std::env::vars());
    for flag in &args.vars {
        variables.parse_override(flag)?;
    }
    for path in &args.var_files {
        variables.load_var_file(path)?;
    }

    let mut request = ImportRequest::new(args.address, args.id).with_variables(variables);
    if let Some(provider) = args.provider {
        request = request.with_provider(provider);
    }

    let store = FileStateStore::new(&args.state);
    let outcome = match ImportOrchestrator::new(&config, &registry, &store)
        .run(&request)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            let kind = err.kind();
            return Err(err).wrap_err(format!("import failed [{}]", kind));
        }
    };

    println!("{}", output::render_success(&outcome));
    Ok(())
}
