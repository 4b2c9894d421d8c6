//! Layered variable sources and the precedence rule between them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde_json::Value;

use crate::error::{ImportError, Result};

pub const ENV_VAR_PREFIX: &str = "TF_VAR_";

/// Where a root variable's value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableSource {
    Override,
    VarFile(String),
    Environment,
    Default,
}

impl fmt::Display for VariableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableSource::Override => f.write_str("-var"),
            VariableSource::VarFile(name) => write!(f, "var-file {}", name),
            VariableSource::Environment => f.write_str("environment"),
            VariableSource::Default => f.write_str("default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarFile {
    pub name: String,
    pub values: BTreeMap<String, Value>,
}

/// Raw values for root-module variables, as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSources {
    pub overrides: BTreeMap<String, Value>,
    /// In the order given; later files win.
    pub var_files: Vec<VarFile>,
    pub environment: BTreeMap<String, Value>,
}

impl VariableSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    pub fn with_var_file(mut self, name: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        self.var_files.push(VarFile {
            name: name.into(),
            values,
        });
        self
    }

    /// Accepts a `-var` flag of the form `name=value`. The value is kept as a string.
    pub fn parse_override(&mut self, flag: &str) -> Result<()> {
        let (name, value) = flag.split_once('=').ok_or_else(|| {
            ImportError::InvalidConfiguration(format!(
                "invalid -var {:?}: expected the form name=value",
                flag
            ))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ImportError::InvalidConfiguration(format!(
                "invalid -var {:?}: variable name is empty",
                flag
            )));
        }
        self.overrides
            .insert(name.to_string(), Value::String(value.to_string()));
        Ok(())
    }

    /// Loads a var-file holding a flat JSON object of variable values.
    pub fn load_var_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ImportError::InvalidConfiguration(format!("reading var-file {}: {}", path.display(), e))
        })?;
        let values: BTreeMap<String, Value> = serde_json::from_str(&text).map_err(|e| {
            ImportError::InvalidConfiguration(format!("parsing var-file {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), count = values.len(), "var-file loaded");
        self.var_files.push(VarFile {
            name: path.display().to_string(),
            values,
        });
        Ok(())
    }

    /// Picks up `TF_VAR_<name>` entries from the given environment.
    pub fn with_environment<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(ENV_VAR_PREFIX) {
                if !name.is_empty() {
                    self.environment.insert(name.to_string(), Value::String(value));
                }
            }
        }
        self
    }

    /// Applies `-var` > var-files (last wins) > environment > `default`.
    pub fn resolve(&self, name: &str, default: Option<&Value>) -> Option<(Value, VariableSource)> {
        if let Some(value) = self.overrides.get(name) {
            return Some((value.clone(), VariableSource::Override));
        }
        if let Some((file, value)) = self
            .var_files
            .iter()
            .rev()
            .find_map(|file| file.values.get(name).map(|v| (file, v)))
        {
            return Some((value.clone(), VariableSource::VarFile(file.name.clone())));
        }
        if let Some(value) = self.environment.get(name) {
            return Some((value.clone(), VariableSource::Environment));
        }
        default.map(|value| (value.clone(), VariableSource::Default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file(name: &str, value: &str) -> BTreeMap<String, Value> {
        BTreeMap::from([(name.to_string(), Value::from(value))])
    }

    #[test]
    fn test_precedence_all_present() {
        let sources = VariableSources::new()
            .with_override("foo", "cli")
            .with_var_file("a.json", file("foo", "file"))
            .with_environment([("TF_VAR_foo".to_string(), "env".to_string())]);
        let (value, source) = sources.resolve("foo", Some(&Value::from("default"))).unwrap();
        assert_eq!(value, Value::from("cli"));
        assert_eq!(source, VariableSource::Override);
    }

    #[test]
    fn test_precedence_file_and_default() {
        let sources = VariableSources::new().with_var_file("a.json", file("foo", "file"));
        let (value, source) = sources.resolve("foo", Some(&Value::from("default"))).unwrap();
        assert_eq!(value, Value::from("file"));
        assert_eq!(source, VariableSource::VarFile("a.json".to_string()));
    }

    #[test]
    fn test_precedence_default_only() {
        let sources = VariableSources::new();
        let (value, source) = sources.resolve("foo", Some(&Value::from("default"))).unwrap();
        assert_eq!(value, Value::from("default"));
        assert_eq!(source, VariableSource::Default);
        assert!(sources.resolve("foo", None).is_none());
    }

    #[test]
    fn test_later_var_file_wins() {
        let sources = VariableSources::new()
            .with_var_file("first.json", file("foo", "one"))
            .with_var_file("second.json", file("foo", "two"))
            .with_var_file("third.json", file("other", "x"));
        let (value, source) = sources.resolve("foo", None).unwrap();
        assert_eq!(value, Value::from("two"));
        assert_eq!(source, VariableSource::VarFile("second.json".to_string()));
    }

    #[test]
    fn test_environment_beats_default_only() {
        let sources = VariableSources::new().with_environment([
            ("TF_VAR_foo".to_string(), "env".to_string()),
            ("TF_VAR_".to_string(), "ignored".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ]);
        assert_eq!(sources.environment.len(), 1);
        let (value, source) = sources.resolve("foo", Some(&Value::from("d"))).unwrap();
        assert_eq!(value, Value::from("env"));
        assert_eq!(source, VariableSource::Environment);
    }

    #[test]
    fn test_parse_override() {
        let mut sources = VariableSources::new();
        sources.parse_override("foo=bar=baz").unwrap();
        assert_eq!(sources.overrides["foo"], Value::from("bar=baz"));
        sources.parse_override("empty=").unwrap();
        assert_eq!(sources.overrides["empty"], Value::from(""));

        assert!(matches!(
            sources.parse_override("novalue"),
            Err(ImportError::InvalidConfiguration(_))
        ));
        assert!(sources.parse_override("=x").is_err());
    }

    #[test]
    fn test_load_var_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, r#"{{"foo": "bar", "count": 3}}"#).unwrap();

        let mut sources = VariableSources::new();
        sources.load_var_file(tmp.path()).unwrap();
        assert_eq!(sources.var_files.len(), 1);
        assert_eq!(sources.var_files[0].values["count"], Value::from(3));
    }

    #[test]
    fn test_load_var_file_rejects_non_object() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "[1, 2]").unwrap();
        let err = VariableSources::new().load_var_file(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("parsing var-file"));
    }
}
