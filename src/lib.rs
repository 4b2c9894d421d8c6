//! tfimport - import reconciliation core
//!
//! Takes an existing remote resource, identified by a provider-specific ID,
//! and binds it to a resource address in a declarative configuration: the
//! address is validated, the owning provider is configured, the provider's
//! import result is bound to addresses, and the result is merged into state.

pub mod address;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod expr;
pub mod import;
pub mod merge;
pub mod orchestrator;
pub mod output;
pub mod providers;
pub mod state;
pub mod variables;

pub use address::{ModulePath, ModuleSegment, ResourceAddress, ResourceMode};
pub use config::Module;
pub use error::{ErrorKind, ImportError};
pub use evaluate::{ConfiguredProvider, ProviderConfigEvaluator};
pub use import::{AddressedInstance, ImportedInstances};
pub use orchestrator::{ImportOrchestrator, ImportOutcome, ImportRequest, ImportedResource, Phase};
pub use providers::snapshot::SnapshotProvider;
pub use providers::{Provider, ProviderConfig, ProviderError, ProviderRef, ProviderRegistry};
pub use state::{FileStateStore, InstanceState, MemoryStateStore, StateFile, StateStore};
pub use variables::VariableSources;
