//! User settings
//!
//! Optional TOML file providing defaults for command-line options:
//!
//! ```toml
//! config_root = "/"
//! repository = "/var/db/repos/gentoo"
//! ask = true
//! diff = true
//! ```

use crate::loader::paths;
use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings read from the user's config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Configuration root holding `etc/portage`
    pub config_root: Option<PathBuf>,
    /// Ebuild repository used to resolve package names
    pub repository: Option<PathBuf>,
    /// Ask before replacing each file
    pub ask: bool,
    /// Show a diff of every change
    pub diff: bool,
}

impl Settings {
    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// Parse settings from TOML content
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load the user settings file if there is one
    pub fn discover() -> Result<Self> {
        match paths::user_settings() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_settings() {
        let settings = Settings::parse(
            r#"
            config_root = "/mnt/gentoo"
            ask = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.config_root, Some(PathBuf::from("/mnt/gentoo")));
        assert!(settings.ask);
        assert!(!settings.diff);
        assert_eq!(settings.repository, None);
    }

    #[test]
    fn test_empty_settings() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert_matches!(Settings::parse("colour = true"), Err(ConfigError::TomlParse(_)));
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            Settings::load(Path::new("/nonexistent/flagedit.toml")),
            Err(ConfigError::NotFound(_))
        );
    }
}
