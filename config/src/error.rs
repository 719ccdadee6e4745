//! Error types for directive file operations

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid line {line:?}: {reason}")]
    InvalidLine { line: String, reason: String },

    /// A new entry would have to be created for a wildcard package other
    /// than `*/*`.
    #[error("Refusing to create a new entry for wildcard package {0}")]
    WildcardEntry(String),

    #[error("{spec} is ambiguous, matched {}", .matches.join(", "))]
    AmbiguousPackage { spec: String, matches: Vec<String> },

    #[error("{0} matched no packages")]
    UnknownPackage(String),

    #[error("Invalid package atom: {0}")]
    InvalidAtom(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
