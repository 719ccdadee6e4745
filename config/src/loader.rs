//! Locating and loading directive files
//!
//! Directive files live under `<root>/etc/portage`. Each namespace is
//! either a single file or a directory whose visible files are read in
//! sorted order, the way Portage does.

use crate::package_file::Document;
use crate::{ConfigError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// Kind of directive file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenType {
    /// USE flags (package.use)
    UseFlag,
    /// Accepted keywords (package.accept_keywords)
    Keyword,
    /// Accepted licenses (package.license)
    License,
    /// Accepted properties (package.properties)
    Property,
    /// Accepted restrictions (package.accept_restrict)
    Restrict,
    /// Environment files (package.env)
    EnvFile,
}

impl TokenType {
    pub const ALL: [TokenType; 6] = [
        TokenType::UseFlag,
        TokenType::Keyword,
        TokenType::License,
        TokenType::Property,
        TokenType::Restrict,
        TokenType::EnvFile,
    ];

    /// Name of the file (or directory) under `etc/portage`
    pub fn file_name(self) -> &'static str {
        match self {
            TokenType::UseFlag => "package.use",
            TokenType::Keyword => "package.accept_keywords",
            TokenType::License => "package.license",
            TokenType::Property => "package.properties",
            TokenType::Restrict => "package.accept_restrict",
            TokenType::EnvFile => "package.env",
        }
    }

    /// Namespace name used on the command line
    pub fn namespace(self) -> &'static str {
        match self {
            TokenType::UseFlag => "use",
            TokenType::Keyword => "kw",
            TokenType::License => "lic",
            TokenType::Property => "prop",
            TokenType::Restrict => "restrict",
            TokenType::EnvFile => "env",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for TokenType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.namespace() == s)
            .ok_or_else(|| ConfigError::InvalidNamespace(s.to_string()))
    }
}

/// Map a namespace argument to a token type and USE_EXPAND group.
///
/// Known namespaces (`use`, `kw`, ...) map directly; anything else is taken
/// as a USE_EXPAND group name, e.g. `python_targets` gives
/// `(UseFlag, Some("PYTHON_TARGETS"))`.
pub fn namespace_into_token_group(namespace: &str) -> Result<(TokenType, Option<String>)> {
    if let Ok(token_type) = namespace.parse::<TokenType>() {
        return Ok((token_type, None));
    }

    let valid = !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ConfigError::InvalidNamespace(namespace.to_string()));
    }
    Ok((TokenType::UseFlag, Some(namespace.to_uppercase())))
}

fn is_visible(name: &str) -> bool {
    !name.starts_with('.') && !name.ends_with('~')
}

/// Find the files backing a namespace, in the order Portage reads them
pub fn find_config_files(config_root: &Path, token_type: TokenType) -> Result<Vec<PathBuf>> {
    let path = paths::portage_dir(config_root).join(token_type.file_name());

    if path.is_dir() {
        let mut files = Vec::new();
        let walker = WalkDir::new(&path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || is_visible(&e.file_name().to_string_lossy()));
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        if files.is_empty() {
            files.push(path.join(paths::LOCAL_FILE));
        }
        return Ok(files);
    }

    // created on first write
    if !path.exists() {
        return Ok(vec![path.join(paths::LOCAL_FILE)]);
    }

    Ok(vec![path])
}

/// Loader for the directive files under one configuration root
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    root: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for a configuration root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the configuration root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files backing a namespace
    pub fn find_files(&self, token_type: TokenType) -> Result<Vec<PathBuf>> {
        find_config_files(&self.root, token_type)
    }

    /// Load every document of a namespace, least effective first
    pub fn load(&self, token_type: TokenType) -> Result<Vec<Document>> {
        load_documents(&self.root, token_type)
    }
}

/// Load the documents of a namespace in the order Portage reads them
pub fn load_documents(config_root: &Path, token_type: TokenType) -> Result<Vec<Document>> {
    find_config_files(config_root, token_type)?
        .iter()
        .map(|path| Document::load(path))
        .collect()
}

/// Default configuration paths
pub mod paths {
    use std::path::{Path, PathBuf};

    /// File used when a namespace has no files yet
    pub const LOCAL_FILE: &str = "99local.conf";

    /// System configuration root
    pub fn system_root() -> PathBuf {
        PathBuf::from("/")
    }

    /// Portage configuration directory under a root
    pub fn portage_dir(root: &Path) -> PathBuf {
        root.join("etc/portage")
    }

    /// User settings file
    pub fn user_settings() -> Option<PathBuf> {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config/flagedit/config.toml"))
    }
}

/// Environment variable names used by the configuration system
pub mod env_vars {
    /// Configuration root override
    pub const CONFIG_ROOT: &str = "FLAGEDIT_CONFIG_ROOT";
    /// Repository override
    pub const REPO_PATH: &str = "FLAGEDIT_REPO_PATH";
    /// Portage compatibility variable
    pub const PORTAGE_CONFIGROOT: &str = "PORTAGE_CONFIGROOT";
}

/// Get configuration root from environment or default
pub fn get_config_root() -> PathBuf {
    std::env::var(env_vars::CONFIG_ROOT)
        .or_else(|_| std::env::var(env_vars::PORTAGE_CONFIGROOT))
        .map(PathBuf::from)
        .unwrap_or_else(|_| paths::system_root())
}
