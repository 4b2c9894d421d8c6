pub mod snapshot;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::state::InstanceState;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("invalid provider reference: {0:?}")]
    InvalidReference(String),
    /// The provider understood the request and refused it.
    #[error("{0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// `TYPE` or `TYPE.ALIAS`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ProviderRef {
    pub provider_type: String,
    pub alias: Option<String>,
}

impl ProviderRef {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            alias: None,
        }
    }

    pub fn with_alias(provider_type: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            alias: Some(alias.into()),
        }
    }

    /// The provider a resource type belongs to when nothing says otherwise:
    /// everything before the first `_` (`aws_instance` -> `aws`). `None` when
    /// that prefix is empty.
    pub fn implied_by(resource_type: &str) -> Option<Self> {
        let provider_type = resource_type
            .split_once('_')
            .map_or(resource_type, |(prefix, _)| prefix);
        (!provider_type.is_empty()).then(|| Self::new(provider_type))
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{}.{}", self.provider_type, alias),
            None => f.write_str(&self.provider_type),
        }
    }
}

impl FromStr for ProviderRef {
    type Err = ProviderError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        match text.split_once('.') {
            None if valid(text) => Ok(Self::new(text)),
            Some((ty, alias)) if valid(ty) && valid(alias) => Ok(Self::with_alias(ty, alias)),
            _ => Err(ProviderError::InvalidReference(text.to_string())),
        }
    }
}

impl From<ProviderRef> for String {
    fn from(reference: ProviderRef) -> Self {
        reference.to_string()
    }
}

impl TryFrom<String> for ProviderRef {
    type Error = ProviderError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

/// Fully resolved provider configuration handed to [`Provider::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider: ProviderRef,
    pub attributes: BTreeMap<String, Value>,
}

impl ProviderConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// A provider plugin as seen from the import core.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn configure(&self, config: &ProviderConfig) -> Result<(), ProviderError>;
    async fn import(&self, id: &str) -> Result<Vec<InstanceState>, ProviderError>;
}

pub type ProviderFactory = Arc<dyn Fn(&ProviderRef) -> Arc<dyn Provider> + Send + Sync>;

/// Provider plugins keyed by provider type. Each lookup instantiates a handle
/// for one `type[.alias]` reference.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider_type: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(provider_type.into(), factory);
    }

    /// Registers a single shared handle for every alias of `provider_type`.
    pub fn register_instance(
        &mut self,
        provider_type: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) {
        self.register(
            provider_type,
            Arc::new(move |_: &ProviderRef| Arc::clone(&provider)),
        );
    }

    pub fn get(&self, reference: &ProviderRef) -> Result<Arc<dyn Provider>, ProviderError> {
        self.factories
            .get(&reference.provider_type)
            .map(|factory| factory(reference))
            .ok_or_else(|| ProviderError::UnknownProvider(reference.provider_type.clone()))
    }

    pub fn provider_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.provider_types())
            .finish()
    }
}
