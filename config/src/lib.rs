//! Flagedit Configuration
//!
//! This crate edits Portage-style per-package directive files
//! (`package.use`, `package.accept_keywords`, ...) so that a flag ends up in
//! a requested state with the smallest possible change to the files.
//!
//! # Overview
//!
//! - [`package_file`]: line model preserving comments and formatting
//! - [`matcher`]: `*` wildcard matching for packages and flags
//! - [`ordering`]: sorted insertion of new flags
//! - [`mangle`]: the resolution engine (mangle, remove, query)
//! - [`cleanup`]: sorting and dropping redundant declarations
//! - [`writer`]: atomic write-back of modified files
//! - [`loader`]: locating the files of each namespace
//! - [`settings`]: user settings file
//! - [`metadata`]: package name resolution and flag validation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use flagedit_config::{write_documents, ConfigLoader, Resolver, TokenType};
//!
//! let loader = ConfigLoader::new("/");
//! let mut documents = loader.load(TokenType::UseFlag).unwrap();
//!
//! let resolver = Resolver::new();
//! resolver
//!     .mangle_flag(&mut documents, "dev-lang/python", None, "sqlite", true)
//!     .unwrap();
//!
//! let report = write_documents(&mut documents, |_, _| true);
//! assert!(report.is_success());
//! ```
//!
//! # File Layout
//!
//! ```text
//! <config-root>/etc/portage/
//! ├── package.use               # file, or directory read in sorted order
//! ├── package.accept_keywords/
//! │   └── 99local.conf          # created when a namespace has no files
//! ├── package.license
//! ├── package.properties
//! ├── package.accept_restrict
//! └── package.env
//! ```

// Core modules
pub mod error;
pub mod matcher;
pub mod ordering;
pub mod package_file;

// Resolution and persistence
pub mod cleanup;
pub mod loader;
pub mod mangle;
pub mod metadata;
pub mod settings;
pub mod writer;

// Re-exports for convenience
pub use cleanup::Cleanup;
pub use error::{ConfigError, Result};
pub use loader::{
    find_config_files, get_config_root, load_documents, namespace_into_token_group, paths,
    ConfigLoader, TokenType,
};
pub use mangle::{EffectiveFlag, Resolver, ALL_PACKAGES};
pub use matcher::PatternMatcher;
pub use metadata::{NullMetadata, PackageMetadata, RepositoryMetadata};
pub use package_file::{Document, Entry, Flag, FlagGroup, Line, Modifier};
pub use settings::Settings;
pub use writer::{write_documents, WriteReport};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ConfigError, ConfigLoader, Document, Entry, Flag, PackageMetadata, Resolver, Result,
        Settings, TokenType, WriteReport,
    };
}
