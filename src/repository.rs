//! Ebuild repository detection
//!
//! The repository is only needed to expand short package names and to
//! check flags, so a missing repository is not fatal.

use anyhow::{bail, Context, Result};
use config::loader::env_vars;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Standard locations for the ebuild repository (in search order)
pub const STANDARD_REPO_LOCATIONS: &[&str] = &[
    "/var/db/repos/gentoo",       // Current Gentoo location
    "/usr/portage",               // Legacy Gentoo location
    "/var/db/repos/buckos-build", // Buckos overlay
];

/// Detect the ebuild repository path
///
/// Searches in order:
/// 1. User-specified path (if provided via --repo-path)
/// 2. FLAGEDIT_REPO_PATH environment variable
/// 3. The standard locations
///
/// A user-specified path must be valid; `Ok(None)` means nothing was found.
pub fn detect_repository_path(custom_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = custom_path {
        return validate_repository(path).map(Some);
    }

    if let Ok(env_path) = std::env::var(env_vars::REPO_PATH) {
        match validate_repository(Path::new(&env_path)) {
            Ok(p) => {
                debug!("Using repository from {}: {}", env_vars::REPO_PATH, p.display());
                return Ok(Some(p));
            }
            Err(e) => warn!("{} set but invalid: {:#}", env_vars::REPO_PATH, e),
        }
    }

    for location in STANDARD_REPO_LOCATIONS {
        let path = Path::new(location);
        if !path.exists() {
            continue;
        }
        if let Ok(p) = validate_repository(path) {
            debug!("Found repository at: {}", p.display());
            return Ok(Some(p));
        }
    }

    Ok(None)
}

/// Validate that a path contains an ebuild repository
///
/// The repository must be a directory with a `profiles/` subdirectory.
pub fn validate_repository(path: &Path) -> Result<PathBuf> {
    let canonical_path = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve repository path: {}", path.display()))?;

    if !canonical_path.is_dir() {
        bail!(
            "Repository path is not a directory: {}",
            canonical_path.display()
        );
    }

    if !canonical_path.join("profiles").is_dir() {
        bail!(
            "Invalid repository at {}: missing required directory 'profiles'",
            canonical_path.display()
        );
    }

    Ok(canonical_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_locations_defined() {
        assert!(!STANDARD_REPO_LOCATIONS.is_empty());
        assert_eq!(STANDARD_REPO_LOCATIONS[0], "/var/db/repos/gentoo");
    }

    #[test]
    fn test_validate_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_repository(dir.path()).is_err());

        std::fs::create_dir(dir.path().join("profiles")).unwrap();
        let found = validate_repository(dir.path()).unwrap();
        assert_eq!(found, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_custom_path_must_be_valid() {
        assert!(detect_repository_path(Some(Path::new("/nonexistent/repo"))).is_err());

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("profiles")).unwrap();
        let found = detect_repository_path(Some(dir.path())).unwrap();
        assert_eq!(found, Some(dir.path().canonicalize().unwrap()));
    }
}
