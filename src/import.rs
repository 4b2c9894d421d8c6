//! Calls the provider's import capability and binds each returned instance
//! to an address.
//!
//! Addressing rule for multi-instance results: the first instance whose
//! ephemeral type equals the target's type is the primary and takes the target
//! address. Every other instance is a dependent: it keeps the target's module
//! path, name, and index, and takes its own ephemeral type as resource type.
//! When a dependent's type equals the target's type, or more than one
//! dependent shares a type, its name becomes `NAME-k`, `k` counting the
//! dependents of that type from 1 in the order the provider returned them.
//! Re-importing the same ID therefore yields the same addresses.

use std::collections::HashMap;

use crate::address::ResourceAddress;
use crate::error::{ImportError, Result};
use crate::evaluate::ConfiguredProvider;
use crate::state::InstanceState;

#[derive(Debug, Clone, PartialEq)]
pub struct AddressedInstance {
    pub address: ResourceAddress,
    pub instance: InstanceState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedInstances {
    pub primary: AddressedInstance,
    pub dependents: Vec<AddressedInstance>,
}

impl ImportedInstances {
    /// Primary first, then dependents in provider order.
    pub fn iter(&self) -> impl Iterator<Item = &AddressedInstance> {
        std::iter::once(&self.primary).chain(self.dependents.iter())
    }
}

fn failed(target: &ResourceAddress, id: &str, detail: impl Into<String>) -> ImportError {
    ImportError::ImportFailed {
        address: target.to_string(),
        id: id.to_string(),
        detail: detail.into(),
        source: None,
    }
}

/// Splits a provider's import result into the primary instance and its
/// dependents, deriving an address for each.
pub fn bind_instances(
    target: &ResourceAddress,
    id: &str,
    instances: Vec<InstanceState>,
) -> Result<ImportedInstances> {
    if instances.is_empty() {
        return Err(failed(target, id, "resource not found"));
    }
    if let Some(untyped) = instances
        .iter()
        .find(|i| i.ephemeral.resource_type.is_empty())
    {
        return Err(failed(
            target,
            id,
            format!(
                "provider returned instance {:?} without a resource type",
                untyped.id
            ),
        ));
    }

    let primary_at = instances
        .iter()
        .position(|i| i.ephemeral.resource_type == target.resource_type)
        .ok_or_else(|| {
            let types: Vec<&str> = instances
                .iter()
                .map(|i| i.ephemeral.resource_type.as_str())
                .collect();
            failed(
                target,
                id,
                format!(
                    "provider returned no instance of type {} (got {})",
                    target.resource_type,
                    types.join(", ")
                ),
            )
        })?;

    let mut instances = instances;
    let primary = instances.remove(primary_at);

    let mut totals: HashMap<&str, usize> = HashMap::new();
    for instance in &instances {
        *totals.entry(instance.ephemeral.resource_type.as_str()).or_default() += 1;
    }
    let needs_suffix: HashMap<String, bool> = totals
        .into_iter()
        .map(|(ty, total)| (ty.to_string(), total > 1 || ty == target.resource_type))
        .collect();

    let mut seen: HashMap<String, usize> = HashMap::new();
    let dependents = instances
        .into_iter()
        .map(|instance| {
            let ty = instance.ephemeral.resource_type.clone();
            let ordinal = seen.entry(ty.clone()).or_default();
            *ordinal += 1;
            let name = if needs_suffix.get(&ty).copied().unwrap_or(false) {
                format!("{}-{}", target.name, ordinal)
            } else {
                target.name.clone()
            };
            let address = ResourceAddress {
                resource_type: ty,
                name,
                ..target.clone()
            };
            AddressedInstance { address, instance }
        })
        .collect();

    Ok(ImportedInstances {
        primary: AddressedInstance {
            address: target.clone(),
            instance: primary,
        },
        dependents,
    })
}

/// Asks the configured provider to import `id`. Provider errors are surfaced
/// as-is and never retried.
pub async fn invoke(
    provider: &ConfiguredProvider,
    target: &ResourceAddress,
    id: &str,
) -> Result<ImportedInstances> {
    tracing::info!(address = %target, id, provider = %provider.reference, "importing");
    let instances = provider
        .handle
        .import(id)
        .await
        .map_err(|e| ImportError::ImportFailed {
            address: target.to_string(),
            id: id.to_string(),
            detail: e.to_string(),
            source: Some(e),
        })?;
    tracing::debug!(count = instances.len(), "provider returned instances");

    let imported = bind_instances(target, id, instances)?;
    for dependent in &imported.dependents {
        tracing::debug!(address = %dependent.address, id = %dependent.instance.id, "dependent instance");
    }
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ModulePath;
    use crate::error::ErrorKind;
    use crate::providers::snapshot::SnapshotProvider;
    use crate::providers::{Provider, ProviderConfig, ProviderError, ProviderRef};
    use std::sync::Arc;

    fn target() -> ResourceAddress {
        "module.net.aws_security_group.web".parse().unwrap()
    }

    #[test]
    fn test_single_instance_binds_to_target() {
        let imported =
            bind_instances(&target(), "sg-1", vec![InstanceState::new("sg-1", "aws_security_group")])
                .unwrap();
        assert_eq!(imported.primary.address, target());
        assert!(imported.dependents.is_empty());
        assert_eq!(imported.iter().count(), 1);
    }

    #[test]
    fn test_empty_result_is_not_found() {
        let err = bind_instances(&target(), "sg-1", vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImportFailed);
        assert!(err.to_string().contains("resource not found"));
        assert!(err.to_string().contains("module.net.aws_security_group.web"));
        assert!(std::error::Error::source(&err).is_none());
    }

    #[tokio::test]
    async fn test_invoke_wraps_provider_error() {
        let handle: Arc<dyn Provider> = Arc::new(SnapshotProvider::empty("aws"));
        let provider = ConfiguredProvider {
            reference: ProviderRef::new("aws"),
            scope: ModulePath::root(),
            config: ProviderConfig {
                provider: ProviderRef::new("aws"),
                attributes: Default::default(),
            },
            handle,
        };

        let err = invoke(&provider, &target(), "sg-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImportFailed);
        assert!(err.to_string().contains("must be configured before import"));
        let source = std::error::Error::source(&err)
            .and_then(|e| e.downcast_ref::<ProviderError>())
            .unwrap();
        assert!(matches!(source, ProviderError::Rejected(_)));
    }

    #[test]
    fn test_untyped_instance_rejected() {
        let err = bind_instances(
            &target(),
            "sg-1",
            vec![
                InstanceState::new("sg-1", "aws_security_group"),
                InstanceState::new("x", ""),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains(r#"instance "x" without a resource type"#));
    }

    #[test]
    fn test_no_instance_of_target_type() {
        let err = bind_instances(
            &target(),
            "sg-1",
            vec![InstanceState::new("r-1", "aws_security_group_rule")],
        )
        .unwrap_err();
        assert!(
            err.to_string()
                .contains("no instance of type aws_security_group (got aws_security_group_rule)")
        );
    }

    #[test]
    fn test_dependent_addressing_rule() {
        let imported = bind_instances(
            &target(),
            "sg-1",
            vec![
                InstanceState::new("r-1", "aws_security_group_rule"),
                InstanceState::new("sg-1", "aws_security_group"),
                InstanceState::new("r-2", "aws_security_group_rule"),
                InstanceState::new("tag-1", "aws_tag"),
                InstanceState::new("sg-2", "aws_security_group"),
            ],
        )
        .unwrap();

        assert_eq!(imported.primary.instance.id, "sg-1");
        let derived: Vec<(String, &str)> = imported
            .dependents
            .iter()
            .map(|d| (d.address.to_string(), d.instance.id.as_str()))
            .collect();
        assert_eq!(
            derived,
            vec![
                ("module.net.aws_security_group_rule.web-1".to_string(), "r-1"),
                ("module.net.aws_security_group_rule.web-2".to_string(), "r-2"),
                ("module.net.aws_tag.web".to_string(), "tag-1"),
                ("module.net.aws_security_group.web-1".to_string(), "sg-2"),
            ]
        );
    }

    #[test]
    fn test_dependent_addresses_are_stable_across_runs() {
        let result = || {
            vec![
                InstanceState::new("sg-1", "aws_security_group"),
                InstanceState::new("r-1", "aws_security_group_rule"),
            ]
        };
        let first = bind_instances(&target(), "sg-1", result()).unwrap();
        let second = bind_instances(&target(), "sg-1", result()).unwrap();
        assert_eq!(first, second);
    }
}
