use std::fmt;

use thiserror::Error;

use crate::providers::ProviderError;

/// Every way a single import invocation can fail.
///
/// Each variant is terminal for the invocation; nothing is retried and nothing
/// is written to state once one of these is returned.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid resource address {0:?}")]
    InvalidAddressSyntax(String),

    #[error(
        "resource address must include a full resource spec; {0:?} refers to a module, not a resource"
    )]
    AddressIsModuleOnly(String),

    #[error(
        "resource address must refer to a managed resource; {0:?} is a data source and cannot be imported"
    )]
    AddressIsDataSource(String),

    #[error(
        "{module} does not exist in the configuration; add a module block for it before importing resources into it"
    )]
    ModuleNotFound { module: String },

    #[error(
        "resource address {address:?} does not exist in the configuration; add a resource block for it in {module} before importing it"
    )]
    ResourceNotInConfig { address: String, module: String },

    #[error("unresolved variable {variable}: {detail}")]
    UnresolvedVariable { variable: String, detail: String },

    #[error("unknown provider {provider}: {detail}")]
    UnknownProvider { provider: String, detail: String },

    #[error("provider {provider} rejected its configuration: {source}")]
    ProviderConfigureError {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("import of {address} (id {id:?}) failed: {detail}")]
    ImportFailed {
        address: String,
        id: String,
        detail: String,
        /// Set when the provider itself returned the error.
        #[source]
        source: Option<ProviderError>,
    },

    #[error(
        "{address} is already managed by provider {existing}, cannot import it with provider {requested}"
    )]
    ProviderMismatch {
        address: String,
        existing: String,
        requested: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to persist state to {path}: {source}")]
    PersistenceError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Stable tag for each [`ImportError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAddressSyntax,
    AddressIsModuleOnly,
    AddressIsDataSource,
    ModuleNotFound,
    ResourceNotInConfig,
    UnresolvedVariable,
    UnknownProvider,
    ProviderConfigureError,
    ImportFailed,
    ProviderMismatch,
    InvalidConfiguration,
    PersistenceError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAddressSyntax => "invalid_address_syntax",
            ErrorKind::AddressIsModuleOnly => "address_is_module_only",
            ErrorKind::AddressIsDataSource => "address_is_data_source",
            ErrorKind::ModuleNotFound => "module_not_found",
            ErrorKind::ResourceNotInConfig => "resource_not_in_config",
            ErrorKind::UnresolvedVariable => "unresolved_variable",
            ErrorKind::UnknownProvider => "unknown_provider",
            ErrorKind::ProviderConfigureError => "provider_configure_error",
            ErrorKind::ImportFailed => "import_failed",
            ErrorKind::ProviderMismatch => "provider_mismatch",
            ErrorKind::InvalidConfiguration => "invalid_configuration",
            ErrorKind::PersistenceError => "persistence_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::InvalidAddressSyntax(_) => ErrorKind::InvalidAddressSyntax,
            ImportError::AddressIsModuleOnly(_) => ErrorKind::AddressIsModuleOnly,
            ImportError::AddressIsDataSource(_) => ErrorKind::AddressIsDataSource,
            ImportError::ModuleNotFound { .. } => ErrorKind::ModuleNotFound,
            ImportError::ResourceNotInConfig { .. } => ErrorKind::ResourceNotInConfig,
            ImportError::UnresolvedVariable { .. } => ErrorKind::UnresolvedVariable,
            ImportError::UnknownProvider { .. } => ErrorKind::UnknownProvider,
            ImportError::ProviderConfigureError { .. } => ErrorKind::ProviderConfigureError,
            ImportError::ImportFailed { .. } => ErrorKind::ImportFailed,
            ImportError::ProviderMismatch { .. } => ErrorKind::ProviderMismatch,
            ImportError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            ImportError::PersistenceError { .. } => ErrorKind::PersistenceError,
        }
    }
}

pub type Result<T, E = ImportError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_invalid_address_display() {
        let err = ImportError::InvalidAddressSyntax("bananas".to_string());
        assert_eq!(err.to_string(), r#"invalid resource address "bananas""#);
    }

    #[test]
    fn test_module_only_display() {
        let err = ImportError::AddressIsModuleOnly("module.foo".to_string());
        let msg = err.to_string();
        assert!(msg.contains("resource address must include a full resource spec"));
        assert!(msg.contains(r#""module.foo" refers to a module"#));
    }

    #[test]
    fn test_data_source_display() {
        let err = ImportError::AddressIsDataSource("data.test_data_source.foo".to_string());
        assert!(
            err.to_string()
                .contains("resource address must refer to a managed resource")
        );
    }

    #[test]
    fn test_module_not_found_display() {
        let err = ImportError::ModuleNotFound {
            module: "module.baz".to_string(),
        };
        assert!(
            err.to_string()
                .starts_with("module.baz does not exist in the configuration")
        );
    }

    #[test]
    fn test_provider_configure_error_wraps_source() {
        let err = ImportError::ProviderConfigureError {
            provider: "test".to_string(),
            source: ProviderError::Rejected("bad value".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "provider test rejected its configuration: bad value"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_persistence_error_kind() {
        let err = ImportError::PersistenceError {
            path: "terraform.tfstate".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.kind(), ErrorKind::PersistenceError);
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_kind_strings_are_distinct() {
        let kinds = [
            ErrorKind::InvalidAddressSyntax,
            ErrorKind::AddressIsModuleOnly,
            ErrorKind::AddressIsDataSource,
            ErrorKind::ModuleNotFound,
            ErrorKind::ResourceNotInConfig,
            ErrorKind::UnresolvedVariable,
            ErrorKind::UnknownProvider,
            ErrorKind::ProviderConfigureError,
            ErrorKind::ImportFailed,
            ErrorKind::ProviderMismatch,
            ErrorKind::InvalidConfiguration,
            ErrorKind::PersistenceError,
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(unique.len(), kinds.len());
    }
}
