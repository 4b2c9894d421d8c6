use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Provider, ProviderConfig, ProviderError};
use crate::error::{ImportError, Result};
use crate::state::{EphemeralState, InstanceState};

/// Recorded remote objects, keyed by the external ID an import is asked for.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Attributes `configure` insists on.
    pub required_config: Vec<String>,
    pub objects: BTreeMap<String, Vec<SnapshotObject>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotObject {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl From<SnapshotObject> for InstanceState {
    fn from(object: SnapshotObject) -> Self {
        InstanceState {
            id: object.id,
            ephemeral: EphemeralState {
                resource_type: object.object_type,
            },
            attributes: object.attributes,
        }
    }
}

/// Provider plugin that answers imports from a recorded snapshot instead of a
/// live API. Lets the binary import offline and lets tests run without a
/// plugin process.
#[derive(Debug)]
pub struct SnapshotProvider {
    name: String,
    snapshot: Snapshot,
    configured: Mutex<Option<ProviderConfig>>,
}

impl SnapshotProvider {
    pub fn new(name: impl Into<String>, snapshot: Snapshot) -> Self {
        Self {
            name: name.into(),
            snapshot,
            configured: Mutex::new(None),
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Snapshot::default())
    }

    pub fn load(name: impl Into<String>, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ImportError::InvalidConfiguration(format!(
                "reading provider snapshot {}: {}",
                path.display(),
                e
            ))
        })?;
        let snapshot: Snapshot = serde_json::from_str(&text).map_err(|e| {
            ImportError::InvalidConfiguration(format!(
                "parsing provider snapshot {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::new(name, snapshot))
    }

    pub fn configured_with(&self) -> Option<ProviderConfig> {
        self.configured
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Provider for SnapshotProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn configure(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        let missing: Vec<&str> = self
            .snapshot
            .required_config
            .iter()
            .filter(|key| config.get(key).is_none_or(Value::is_null))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ProviderError::Rejected(format!(
                "missing required attributes: {}",
                missing.join(", ")
            )));
        }

        let mut guard = self
            .configured
            .lock()
            .map_err(|_| ProviderError::Transport("provider state poisoned".to_string()))?;
        *guard = Some(config.clone());
        Ok(())
    }

    async fn import(&self, id: &str) -> Result<Vec<InstanceState>, ProviderError> {
        if self.configured_with().is_none() {
            return Err(ProviderError::Rejected(format!(
                "provider {} must be configured before import",
                self.name
            )));
        }

        let objects = self.snapshot.objects.get(id).cloned().unwrap_or_default();
        tracing::debug!(provider = %self.name, id, count = objects.len(), "snapshot lookup");
        Ok(objects.into_iter().map(InstanceState::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderRef;
    use std::io::Write;

    fn snapshot() -> Snapshot {
        serde_json::from_value(serde_json::json!({
            "required_config": ["region"],
            "objects": {
                "sg-1": [
                    { "id": "sg-1", "type": "aws_security_group", "attributes": { "name": "web" } },
                    { "id": "sgr-1", "type": "aws_security_group_rule" }
                ]
            }
        }))
        .unwrap()
    }

    fn config(region: Option<&str>) -> ProviderConfig {
        let mut attributes = BTreeMap::new();
        if let Some(region) = region {
            attributes.insert("region".to_string(), Value::from(region));
        }
        ProviderConfig {
            provider: ProviderRef::new("aws"),
            attributes,
        }
    }

    #[tokio::test]
    async fn test_configure_rejects_missing_required() {
        let provider = SnapshotProvider::new("aws", snapshot());
        let err = provider.configure(&config(None)).await.unwrap_err();
        assert!(err.to_string().contains("missing required attributes: region"));
        assert!(provider.configured_with().is_none());
    }

    #[tokio::test]
    async fn test_import_before_configure_is_rejected() {
        let provider = SnapshotProvider::new("aws", snapshot());
        assert!(matches!(
            provider.import("sg-1").await,
            Err(ProviderError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_import_returns_recorded_objects() {
        let provider = SnapshotProvider::new("aws", snapshot());
        provider.configure(&config(Some("us-east-1"))).await.unwrap();

        let states = provider.import("sg-1").await.unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].id, "sg-1");
        assert_eq!(states[0].ephemeral.resource_type, "aws_security_group");
        assert_eq!(states[0].attributes["name"], Value::from("web"));
        assert_eq!(states[1].ephemeral.resource_type, "aws_security_group_rule");

        assert!(provider.import("missing").await.unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"objects": {{"bar": [{{"id": "yay", "type": "test_instance"}}]}}}}"#)
            .unwrap();
        let provider = SnapshotProvider::load("test", file.path()).unwrap();
        assert_eq!(provider.snapshot.objects["bar"][0].id, "yay");
    }
}
