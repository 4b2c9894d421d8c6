//! In-memory state model and its persistence seam.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::{ModulePath, ResourceAddress};
use crate::error::{ImportError, Result};
use crate::providers::ProviderRef;

pub const STATE_VERSION: u32 = 1;

/// Facts about an instance that only live for the duration of an import and
/// are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EphemeralState {
    /// Concrete resource type backing the instance.
    pub resource_type: String,
}

/// Snapshot of a single remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub id: String,
    #[serde(skip)]
    pub ephemeral: EphemeralState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl InstanceState {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ephemeral: EphemeralState {
                resource_type: resource_type.into(),
            },
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub provider: ProviderRef,
    pub instances: Vec<InstanceState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    pub resources: BTreeMap<String, ResourceState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub serial: u64,
    #[serde(default)]
    pub modules: BTreeMap<ModulePath, ModuleState>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            modules: BTreeMap::new(),
        }
    }
}

impl StateFile {
    pub fn resource(&self, address: &ResourceAddress) -> Option<&ResourceState> {
        self.modules
            .get(&address.module)?
            .resources
            .get(&address.local_key())
    }

    pub fn resource_count(&self) -> usize {
        self.modules.values().map(|m| m.resources.len()).sum()
    }

    /// Every resource in module order, then key order.
    pub fn resources(&self) -> impl Iterator<Item = (&ModulePath, &str, &ResourceState)> {
        self.modules.iter().flat_map(|(path, module)| {
            module
                .resources
                .iter()
                .map(move |(key, resource)| (path, key.as_str(), resource))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_resources(
    f: &mut fmt::Formatter<'_>,
    resources: &BTreeMap<String, ResourceState>,
    indent: &str,
) -> fmt::Result {
    for (key, resource) in resources {
        for (i, instance) in resource.instances.iter().enumerate() {
            if i == 0 {
                writeln!(f, "{}{}:", indent, key)?;
            } else {
                writeln!(f, "{}{} (#{}):", indent, key, i)?;
            }
            writeln!(f, "{}  ID = {}", indent, instance.id)?;
            writeln!(f, "{}  provider = {}", indent, resource.provider)?;
            for (name, value) in &instance.attributes {
                writeln!(f, "{}  {} = {}", indent, name, render_value(value))?;
            }
        }
    }
    Ok(())
}

/// Human-readable listing of every resource, root module first.
impl fmt::Display for StateFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "<no state>");
        }
        for (path, module) in &self.modules {
            if module.resources.is_empty() {
                continue;
            }
            if path.is_root() {
                render_resources(f, &module.resources, "")?;
            } else {
                writeln!(f)?;
                writeln!(f, "{}:", path)?;
                render_resources(f, &module.resources, "  ")?;
            }
        }
        Ok(())
    }
}

/// Where state lives between invocations. `save` must be all-or-nothing.
pub trait StateStore {
    fn load(&self) -> Result<StateFile>;
    fn save(&self, state: &StateFile) -> Result<()>;
    fn location(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persistence_error(&self, source: io::Error) -> ImportError {
        ImportError::PersistenceError {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<StateFile> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no existing state, starting empty");
                return Ok(StateFile::default());
            }
            Err(e) => return Err(self.persistence_error(e)),
        };
        if text.trim().is_empty() {
            return Ok(StateFile::default());
        }
        serde_json::from_str(&text)
            .map_err(|e| self.persistence_error(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    fn save(&self, state: &StateFile) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| self.persistence_error(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        atomic_write(&self.path, &content).map_err(|e| self.persistence_error(e))?;
        tracing::debug!(path = %self.path.display(), serial = state.serial, "state saved");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Writes to a sibling temp file, then renames over the target.
fn atomic_write(dest_path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = dest_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = match dest_path.extension() {
        Some(ext) => dest_path.with_extension(format!("{}.tmp", ext.to_string_lossy())),
        None => dest_path.with_extension("tmp"),
    };

    let written = fs::write(&tmp_path, content).and_then(|()| fs::rename(&tmp_path, dest_path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}

/// State held in memory, for embedding callers and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<StateFile>,
}

impl MemoryStateStore {
    pub fn new(state: StateFile) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> StateFile {
        match self.state.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StateFile> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &StateFile) -> Result<()> {
        let mut guard = self.state.lock().map_err(|_| ImportError::PersistenceError {
            path: self.location(),
            source: io::Error::other("state lock poisoned"),
        })?;
        *guard = state.clone();
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}
