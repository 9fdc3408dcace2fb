//! HDEL-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HdError>;

/// Top-level error type for hdelete.
#[derive(Debug, Error)]
pub enum HdError {
    #[error("[HDEL-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[HDEL-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[HDEL-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[HDEL-1101] scan root is not a directory: {path}")]
    InvalidRoot { path: PathBuf },

    #[error("[HDEL-2001] access denied for {path}")]
    AccessDenied { path: PathBuf },

    #[error("[HDEL-2002] path not found: {path}")]
    NotFound { path: PathBuf },

    #[error("[HDEL-2003] directory is not empty: {path}")]
    NotEmptyDirectory { path: PathBuf },

    #[error("[HDEL-2900] path {path} escapes scan root {root}")]
    PathEscape { path: PathBuf, root: PathBuf },

    #[error("[HDEL-3001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[HDEL-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[HDEL-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl HdError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "HDEL-1001",
            Self::MissingConfig { .. } => "HDEL-1002",
            Self::ConfigParse { .. } => "HDEL-1003",
            Self::InvalidRoot { .. } => "HDEL-1101",
            Self::AccessDenied { .. } => "HDEL-2001",
            Self::NotFound { .. } => "HDEL-2002",
            Self::NotEmptyDirectory { .. } => "HDEL-2003",
            Self::PathEscape { .. } => "HDEL-2900",
            Self::Serialization { .. } => "HDEL-3001",
            Self::Io { .. } => "HDEL-3002",
            Self::Runtime { .. } => "HDEL-3900",
        }
    }

    /// Short taxonomy label used in reports (`access-denied`, `not-found`, ...).
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::AccessDenied { .. } => "access-denied",
            Self::NotFound { .. } => "not-found",
            Self::NotEmptyDirectory { .. } => "not-empty-directory",
            Self::PathEscape { .. } => "path-escape",
            Self::InvalidRoot { .. } => "invalid-root",
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. } => {
                "config"
            }
            Self::Serialization { .. } => "serialization",
            Self::Io { .. } => "io",
            Self::Runtime { .. } => "runtime",
        }
    }

    /// Whether this error must abort the whole run.
    ///
    /// Only `PathEscape` is fatal: it means a classification or walker bug
    /// produced a path outside the scan root.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::PathEscape { .. })
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Runtime { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Map an IO error onto the taxonomy: permission and not-found failures get
    /// their own variants, non-empty directories are recognized, the rest stay `Io`.
    #[must_use]
    pub fn from_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            ErrorKind::PermissionDenied => Self::AccessDenied { path },
            ErrorKind::NotFound => Self::NotFound { path },
            ErrorKind::DirectoryNotEmpty => Self::NotEmptyDirectory { path },
            _ => Self::Io { path, source },
        }
    }
}

impl From<serde_json::Error> for HdError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HdError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
