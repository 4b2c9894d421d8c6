use crate::error::{ImportError, Result};
use crate::import::ImportedInstances;
use crate::providers::ProviderRef;
use crate::state::{ResourceState, StateFile};

/// Files imported instances into a copy of `state`.
///
/// A missing resource is created; an existing one gets the instance appended
/// (re-importing the same ID appends again, there is no deduplication). Every
/// address is checked before anything is written, so a provider mismatch
/// leaves no partial result. Resources outside the imported addresses are
/// carried over untouched, and the serial advances once per merge.
pub fn merge(
    state: &StateFile,
    imported: &ImportedInstances,
    provider: &ProviderRef,
) -> Result<StateFile> {
    for entry in imported.iter() {
        if let Some(existing) = state.resource(&entry.address) {
            if &existing.provider != provider {
                return Err(ImportError::ProviderMismatch {
                    address: entry.address.to_string(),
                    existing: existing.provider.to_string(),
                    requested: provider.to_string(),
                });
            }
        }
    }

    let mut merged = state.clone();
    for entry in imported.iter() {
        let module = merged.modules.entry(entry.address.module.clone()).or_default();
        let resource = module
            .resources
            .entry(entry.address.local_key())
            .or_insert_with(|| ResourceState {
                provider: provider.clone(),
                instances: Vec::new(),
            });
        resource.instances.push(entry.instance.clone());
        tracing::debug!(
            address = %entry.address,
            id = %entry.instance.id,
            instances = resource.instances.len(),
            "instance merged"
        );
    }
    merged.serial += 1;

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ResourceAddress;
    use crate::error::ErrorKind;
    use crate::import::bind_instances;
    use crate::state::InstanceState;

    fn single(address: &str, id: &str) -> ImportedInstances {
        let target: ResourceAddress = address.parse().unwrap();
        let ty = target.resource_type.clone();
        bind_instances(&target, id, vec![InstanceState::new(id, ty)]).unwrap()
    }

    #[test]
    fn test_merge_creates_resource() {
        let state = StateFile::default();
        let merged = merge(&state, &single("test_instance.foo", "yay"), &ProviderRef::new("test"))
            .unwrap();
        assert_eq!(
            merged.to_string().trim(),
            "test_instance.foo:\n  ID = yay\n  provider = test"
        );
        assert_eq!(merged.serial, 1);
        assert!(state.is_empty());
    }

    #[test]
    fn test_merge_appends_to_existing_resource() {
        let provider = ProviderRef::new("test");
        let once = merge(&StateFile::default(), &single("test_instance.foo", "a"), &provider).unwrap();
        let twice = merge(&once, &single("test_instance.foo", "b"), &provider).unwrap();

        let resource = twice.resource(&"test_instance.foo".parse().unwrap()).unwrap();
        let ids: Vec<&str> = resource.instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(twice.serial, 2);
    }

    #[test]
    fn test_reimport_same_id_appends_duplicate() {
        let provider = ProviderRef::new("test");
        let imported = single("test_instance.foo", "a");
        let once = merge(&StateFile::default(), &imported, &provider).unwrap();
        let twice = merge(&once, &imported, &provider).unwrap();
        let resource = twice.resource(&imported.primary.address).unwrap();
        assert_eq!(resource.instances.len(), 2);
    }

    #[test]
    fn test_merge_provider_mismatch_leaves_state_untouched() {
        let once = merge(
            &StateFile::default(),
            &single("test_instance.foo", "a"),
            &ProviderRef::new("test"),
        )
        .unwrap();
        let err = merge(
            &once,
            &single("test_instance.foo", "b"),
            &ProviderRef::with_alias("test", "alias"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderMismatch);
        assert!(err.to_string().contains("already managed by provider test"));
        assert_eq!(once.serial, 1);
    }

    #[test]
    fn test_merge_mismatch_on_dependent_writes_nothing() {
        let provider = ProviderRef::new("aws");
        let target: ResourceAddress = "aws_security_group.web".parse().unwrap();
        let rule = single("aws_security_group_rule.web", "r-0");
        let state = merge(&StateFile::default(), &rule, &ProviderRef::with_alias("aws", "east"))
            .unwrap();

        let imported = bind_instances(
            &target,
            "sg-1",
            vec![
                InstanceState::new("sg-1", "aws_security_group"),
                InstanceState::new("r-1", "aws_security_group_rule"),
            ],
        )
        .unwrap();
        let err = merge(&state, &imported, &provider).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderMismatch);
        assert!(state.resource(&target).is_none());
    }

    #[test]
    fn test_merge_files_dependents_with_parent_provider() {
        let target: ResourceAddress = "module.net.aws_security_group.web".parse().unwrap();
        let imported = bind_instances(
            &target,
            "sg-1",
            vec![
                InstanceState::new("sg-1", "aws_security_group"),
                InstanceState::new("r-1", "aws_security_group_rule"),
            ],
        )
        .unwrap();
        let merged = merge(&StateFile::default(), &imported, &ProviderRef::new("aws")).unwrap();

        let rule: ResourceAddress = "module.net.aws_security_group_rule.web".parse().unwrap();
        assert_eq!(merged.resource(&rule).unwrap().provider, ProviderRef::new("aws"));
        assert_eq!(merged.resource_count(), 2);
        assert_eq!(merged.serial, 1);
    }
}
