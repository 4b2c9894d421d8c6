//! Resource addresses: parsing, rendering, and validation against the
//! configuration tree.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Module;
use crate::error::{ImportError, Result};

static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([A-Za-z_][A-Za-z0-9_-]*)(?:\[(?:(\d+)|"([^"]*)")\])?$"#)
        .expect("segment pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    #[default]
    Managed,
    Data,
}

/// Repetition index on a module call or resource: `[0]` or `["key"]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceKey {
    Int(u64),
    Str(String),
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKey::Int(i) => write!(f, "[{}]", i),
            InstanceKey::Str(s) => write!(f, "[\"{}\"]", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleSegment {
    pub name: String,
    pub index: Option<InstanceKey>,
}

impl ModuleSegment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }
}

impl fmt::Display for ModuleSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module.{}", self.name)?;
        if let Some(index) = &self.index {
            write!(f, "{}", index)?;
        }
        Ok(())
    }
}

/// Path from the root module to a (possibly nested) child module.
/// The empty path is the root module.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ModulePath(Vec<ModuleSegment>);

impl ModulePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<ModuleSegment>) -> Self {
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[ModuleSegment] {
        &self.0
    }

    pub fn parent(&self) -> Option<ModulePath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn child(&self, segment: ModuleSegment) -> ModulePath {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// Every path from the root down to and including `self`.
    pub fn prefixes(&self) -> impl Iterator<Item = ModulePath> + '_ {
        (0..=self.0.len()).map(|n| Self(self.0[..n].to_vec()))
    }

    /// Human description used in messages: `root module` or `module.a`.
    pub fn describe(&self) -> String {
        if self.is_root() {
            "the root module".to_string()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl From<ModulePath> for String {
    fn from(path: ModulePath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for ModulePath {
    type Error = ImportError;

    fn try_from(text: String) -> Result<Self> {
        if text.is_empty() {
            return Ok(ModulePath::root());
        }
        let parsed = parse(&text)?;
        if parsed.resource.is_some() {
            return Err(ImportError::InvalidAddressSyntax(text));
        }
        Ok(parsed.module)
    }
}

/// A fully specified resource address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceAddress {
    pub module: ModulePath,
    pub mode: ResourceMode,
    pub resource_type: String,
    pub name: String,
    pub index: Option<InstanceKey>,
}

impl ResourceAddress {
    pub fn managed(
        module: ModulePath,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            module,
            mode: ResourceMode::Managed,
            resource_type: resource_type.into(),
            name: name.into(),
            index: None,
        }
    }

    /// Address of the resource within its module, e.g. `test_instance.foo[0]`.
    pub fn local_key(&self) -> String {
        let mut key = String::new();
        if self.mode == ResourceMode::Data {
            key.push_str("data.");
        }
        key.push_str(&self.resource_type);
        key.push('.');
        key.push_str(&self.name);
        if let Some(index) = &self.index {
            key.push_str(&index.to_string());
        }
        key
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        f.write_str(&self.local_key())
    }
}

impl FromStr for ResourceAddress {
    type Err = ImportError;

    /// Parses a full resource address without consulting any configuration.
    fn from_str(text: &str) -> Result<Self> {
        let parsed = parse(text)?;
        parsed
            .resource
            .ok_or_else(|| ImportError::AddressIsModuleOnly(text.to_string()))
    }
}

struct ParsedAddress {
    module: ModulePath,
    resource: Option<ResourceAddress>,
}

/// Splits on `.` outside of brackets so quoted keys may contain dots.
fn split_segments(text: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '"' if depth > 0 => in_quotes = !in_quotes,
            '[' if !in_quotes => depth += 1,
            ']' if !in_quotes => depth = depth.checked_sub(1)?,
            '.' if depth == 0 => {
                segments.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 || in_quotes {
        return None;
    }
    segments.push(&text[start..]);
    Some(segments)
}

fn parse_segment(segment: &str) -> Option<(String, Option<InstanceKey>)> {
    let caps = SEGMENT_RE.captures(segment)?;
    let name = caps.get(1)?.as_str().to_string();
    let index = if let Some(digits) = caps.get(2) {
        Some(InstanceKey::Int(digits.as_str().parse().ok()?))
    } else {
        caps.get(3).map(|s| InstanceKey::Str(s.as_str().to_string()))
    };
    Some((name, index))
}

fn parse(text: &str) -> Result<ParsedAddress> {
    let invalid = || ImportError::InvalidAddressSyntax(text.to_string());

    let segments = split_segments(text).ok_or_else(invalid)?;
    let mut modules = Vec::new();
    let mut rest = segments.as_slice();

    while rest.first() == Some(&"module") {
        let name = rest.get(1).ok_or_else(invalid)?;
        let (name, index) = parse_segment(name).ok_or_else(invalid)?;
        modules.push(ModuleSegment { name, index });
        rest = &rest[2..];
    }
    let module = ModulePath(modules);

    let (mode, type_segment, name_segment) = match rest {
        [] if !module.is_root() => {
            return Ok(ParsedAddress {
                module,
                resource: None,
            });
        }
        ["data", ty, name] => (ResourceMode::Data, *ty, *name),
        [ty, name] if *ty != "data" => (ResourceMode::Managed, *ty, *name),
        _ => return Err(invalid()),
    };

    let (resource_type, type_index) = parse_segment(type_segment).ok_or_else(invalid)?;
    if type_index.is_some() {
        return Err(invalid());
    }
    let (name, index) = parse_segment(name_segment).ok_or_else(invalid)?;

    Ok(ParsedAddress {
        module: module.clone(),
        resource: Some(ResourceAddress {
            module,
            mode,
            resource_type,
            name,
            index,
        }),
    })
}

/// Parses `text` and checks it names a managed resource declared in `config`.
///
/// Checks run in a fixed order and the first failure wins: syntax, module-only,
/// data source, missing module, missing resource.
pub fn resolve(text: &str, config: &Module) -> Result<ResourceAddress> {
    let parsed = parse(text)?;
    let address = parsed
        .resource
        .ok_or_else(|| ImportError::AddressIsModuleOnly(text.to_string()))?;

    if address.mode == ResourceMode::Data {
        return Err(ImportError::AddressIsDataSource(text.to_string()));
    }

    if let Some(missing) = address
        .module
        .prefixes()
        .find(|prefix| !config.has_module(prefix))
    {
        return Err(ImportError::ModuleNotFound {
            module: missing.to_string(),
        });
    }

    if !config.has_managed_resource(&address.module, &address.resource_type, &address.name) {
        return Err(ImportError::ResourceNotInConfig {
            address: address.to_string(),
            module: address.module.describe(),
        });
    }

    tracing::debug!(address = %address, "resource address resolved");
    Ok(address)
}
