//! Writing modified documents back to disk
//!
//! Every modified document is written to a temporary file next to the
//! original, which then replaces the original atomically once the confirm
//! callback agrees. Documents are handled independently: one failure does
//! not stop the others.

use crate::package_file::Document;
use crate::{ConfigError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a write-back pass
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Files replaced with new content
    pub written: Vec<PathBuf>,
    /// Files the confirm callback declined
    pub declined: Vec<PathBuf>,
    /// Files that could not be written
    pub failed: Vec<(PathBuf, ConfigError)>,
}

impl WriteReport {
    /// Whether every attempted write succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Write all modified documents.
///
/// `confirm` receives the original path and the path of the temporary file
/// holding the new content; returning `false` discards the change.
pub fn write_documents<F>(documents: &mut [Document], mut confirm: F) -> WriteReport
where
    F: FnMut(&Path, &Path) -> bool,
{
    let mut report = WriteReport::default();

    for document in documents.iter_mut().filter(|d| d.modified()) {
        let path = document.path().to_path_buf();
        match write_document(document, &mut confirm) {
            Ok(true) => {
                info!("Updated {}", path.display());
                document.mark_clean();
                report.written.push(path);
            }
            Ok(false) => {
                debug!("Not updating {}", path.display());
                report.declined.push(path);
            }
            Err(e) => {
                warn!("Failed to update {}: {}", path.display(), e);
                report.failed.push((path, e));
            }
        }
    }

    report
}

fn write_document<F>(document: &Document, confirm: &mut F) -> Result<bool>
where
    F: FnMut(&Path, &Path) -> bool,
{
    let path = document.path();
    let target = write_target(path)?;
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(&dir)?;

    temp.write_all(document.to_string().as_bytes())?;
    temp.flush()?;
    copy_permissions(&target, temp.path())?;

    if !confirm(path, temp.path()) {
        // dropping the handle removes the temporary file
        return Ok(false);
    }

    temp.persist(&target).map_err(|e| ConfigError::Persist {
        path: target.clone(),
        source: e.error,
    })?;
    Ok(true)
}

/// File actually replaced: symlinked documents are written through the link
fn write_target(path: &Path) -> Result<PathBuf> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            let target = std::fs::canonicalize(path)?;
            debug!("{} links to {}", path.display(), target.display());
            Ok(target)
        }
        _ => Ok(path.to_path_buf()),
    }
}

/// Give the temporary file the permission bits of the file it replaces
fn copy_permissions(original: &Path, temp: &Path) -> Result<()> {
    match std::fs::metadata(original) {
        Ok(metadata) => std::fs::set_permissions(temp, metadata.permissions())?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => set_new_file_permissions(temp)?,
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(unix)]
fn set_new_file_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_new_file_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
