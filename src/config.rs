//! Already-parsed configuration tree.
//!
//! Configuration is consumed as JSON; the tree mirrors the block structure of a
//! declarative configuration: variables, provider blocks, resource blocks, and
//! nested module calls.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::{ModulePath, ResourceMode};
use crate::error::{ImportError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Module {
    pub variables: BTreeMap<String, VariableDecl>,
    pub providers: Vec<ProviderBlock>,
    pub resources: Vec<ResourceBlock>,
    pub modules: BTreeMap<String, ModuleCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableDecl {
    pub default: Option<Value>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderBlock {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBlock {
    #[serde(default)]
    pub mode: ResourceMode,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    /// Explicit provider reference, e.g. `aws.west`.
    #[serde(default)]
    pub provider: Option<String>,
}

impl ResourceBlock {
    pub fn managed(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: ResourceMode::Managed,
            resource_type: resource_type.into(),
            name: name.into(),
            provider: None,
        }
    }
}

/// A `module "name" { ... }` block: the arguments passed to the child and the
/// child's own (already loaded) body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleCall {
    pub source: Option<String>,
    pub arguments: BTreeMap<String, Value>,
    /// Provider references inside the child mapped to references in the
    /// caller, e.g. `"aws" -> "aws.west"`.
    pub providers: BTreeMap<String, String>,
    pub module: Module,
}

impl ModuleCall {
    pub fn new(module: Module) -> Self {
        Self {
            module,
            ..Self::default()
        }
    }
}

impl Module {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ImportError::InvalidConfiguration(format!("reading {}: {}", path.display(), e))
        })?;
        Self::from_json(&text).map_err(|e| match e {
            ImportError::InvalidConfiguration(msg) => {
                ImportError::InvalidConfiguration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ImportError::InvalidConfiguration(e.to_string()))
    }

    /// Descends into the module at `path`. Repetition indexes on the path are
    /// ignored: every instance of a module call shares one body.
    pub fn descendant(&self, path: &ModulePath) -> Option<&Module> {
        path.segments()
            .iter()
            .try_fold(self, |module, segment| {
                module.modules.get(&segment.name).map(|call| &call.module)
            })
    }

    /// The call block that instantiates the module at `path`, owned by its parent.
    pub fn module_call(&self, path: &ModulePath) -> Option<&ModuleCall> {
        let last = path.segments().last()?;
        let parent = self.descendant(&path.parent()?)?;
        parent.modules.get(&last.name)
    }

    pub fn has_module(&self, path: &ModulePath) -> bool {
        self.descendant(path).is_some()
    }

    pub fn managed_resource(
        &self,
        path: &ModulePath,
        resource_type: &str,
        name: &str,
    ) -> Option<&ResourceBlock> {
        self.descendant(path)?.resources.iter().find(|r| {
            r.mode == ResourceMode::Managed && r.resource_type == resource_type && r.name == name
        })
    }

    pub fn has_managed_resource(&self, path: &ModulePath, resource_type: &str, name: &str) -> bool {
        self.managed_resource(path, resource_type, name).is_some()
    }

    pub fn provider_block(&self, name: &str, alias: Option<&str>) -> Option<&ProviderBlock> {
        self.providers
            .iter()
            .find(|p| p.name == name && p.alias.as_deref() == alias)
    }
}
