//! Archive extraction into the install tree.

use super::error::PkgError;
use flate2::read::GzDecoder;
use gimme_util::fs::{copy_dir_all, remove_path};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tar::Archive;
use tracing::debug;

/// Extract a staged `.tgz` file to `dest`.
///
/// See [`extract_tgz_atomic`].
///
/// # Errors
/// Returns `PKG_EXTRACT_FAILED` if the archive cannot be opened or unpacked.
pub fn extract_archive_file(archive: &Path, dest: &Path) -> Result<(), PkgError> {
    let file = File::open(archive).map_err(|e| {
        PkgError::extract_failed(format!("Failed to open {}: {e}", archive.display()))
    })?;
    extract_tgz_atomic(BufReader::new(file), dest)
}

/// Extract a gzip tar stream to `dest`, replacing any previous copy.
///
/// The archive is unpacked into a temporary sibling of `dest`. Its single
/// top-level directory (`package/` or any lone directory) is then renamed
/// into place. An existing `dest` is moved aside first and removed once the
/// new copy is in place, so `dest` is never left half-written.
///
/// # Errors
/// Returns `PKG_EXTRACT_FAILED` if the stream is invalid, has an unexpected
/// shape, or contains unsafe paths.
pub fn extract_tgz_atomic<R: Read>(reader: R, dest: &Path) -> Result<(), PkgError> {
    let parent = dest
        .parent()
        .ok_or_else(|| PkgError::extract_failed("Destination has no parent"))?;
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("package");

    fs::create_dir_all(parent)?;

    let temp_dir = parent.join(format!(".{name}.tmp-{}", unique_suffix()));
    remove_path(&temp_dir)?;
    fs::create_dir_all(&temp_dir)?;

    let result = extract_tgz_to(reader, &temp_dir)
        .and_then(|()| find_extracted_root(&temp_dir))
        .and_then(|root| replace_dir(&root, dest, parent, name));

    let _ = remove_path(&temp_dir);
    result
}

/// Move `src` to `dest`, moving any existing `dest` aside first.
fn replace_dir(src: &Path, dest: &Path, parent: &Path, name: &str) -> Result<(), PkgError> {
    let backup = if fs::symlink_metadata(dest).is_ok() {
        let backup = parent.join(format!(".{name}.old-{}", unique_suffix()));
        fs::rename(dest, &backup).map_err(|e| {
            PkgError::extract_failed(format!(
                "Failed to move existing {} aside: {e}",
                dest.display()
            ))
        })?;
        Some(backup)
    } else {
        None
    };

    let moved = match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        // Cross-filesystem
        Err(rename_err) => copy_dir_all(src, dest).map_err(|copy_err| {
            let _ = remove_path(dest);
            PkgError::extract_failed(format!(
                "Failed to move or copy extracted package: rename={rename_err}, copy={copy_err}"
            ))
        }),
    };

    match (moved, backup) {
        (Ok(()), Some(backup)) => {
            let _ = remove_path(&backup);
            Ok(())
        }
        (Ok(()), None) => Ok(()),
        (Err(e), Some(backup)) => {
            // Put the previous copy back
            let _ = fs::rename(&backup, dest);
            Err(e)
        }
        (Err(e), None) => Err(e),
    }
}

/// Find the single top-level directory of an unpacked archive.
fn find_extracted_root(temp_dir: &Path) -> Result<PathBuf, PkgError> {
    let package_dir = temp_dir.join("package");
    if package_dir.is_dir() {
        return Ok(package_dir);
    }

    let entries: Vec<_> = fs::read_dir(temp_dir)
        .map_err(|e| PkgError::extract_failed(format!("Failed to read extracted dir: {e}")))?
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_type().is_ok_and(|ft| ft.is_dir())
                && !e.file_name().to_string_lossy().starts_with('.')
        })
        .collect();

    match entries.as_slice() {
        [single] => Ok(single.path()),
        [] => Err(PkgError::extract_failed(
            "Archive does not contain any top-level directory",
        )),
        many => Err(PkgError::extract_failed(format!(
            "Archive contains {} top-level directories, expected 1",
            many.len()
        ))),
    }
}

fn extract_tgz_to<R: Read>(reader: R, dest: &Path) -> Result<(), PkgError> {
    let mut archive = Archive::new(GzDecoder::new(reader));

    for entry in archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read archive entries: {e}")))?
    {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read archive entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();
        let shown = path.to_string_lossy();

        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
        {
            return Err(PkgError::extract_failed(format!(
                "Archive contains absolute path: {shown}"
            )));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PkgError::extract_failed(format!(
                "Archive contains path traversal: {shown}"
            )));
        }

        let dest_path = dest.join(&path);
        let kind = entry.header().entry_type();

        if kind.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if kind.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(&dest_path)?;
            io::copy(&mut entry, &mut file).map_err(|e| {
                PkgError::extract_failed(format!("Failed to unpack {shown}: {e}"))
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let perms = fs::Permissions::from_mode(mode | 0o600);
                    let _ = fs::set_permissions(&dest_path, perms);
                }
            }
        } else {
            debug!(path = %shown, "skipping special archive entry");
        }
    }

    Ok(())
}

/// Process-unique suffix for temporary sibling directories.
fn unique_suffix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
