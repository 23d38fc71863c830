//! File IO for index images.
//!
//! Writes never touch the target in place: the image goes to `<file>.tmp`,
//! is fsynced, renamed over the target, and the parent directory is fsynced
//! so the rename itself is durable. A crash at any point leaves either the
//! old file or the new one.

use crate::error::{HnswError, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Sibling temp file used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with `data`.
///
/// A failure before the rename leaves the old file untouched. A failure of
/// the final directory sync comes after the new image is already in place
/// and is reported with a message saying so.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    replace_file(path, data, sync_parent_dir)
}

fn replace_file(path: &Path, data: &[u8], sync_dir: fn(&Path) -> io::Result<()>) -> Result<()> {
    let tmp = temp_path(path);
    if let Err(e) = write_temp(&tmp, data).and_then(|()| fs::rename(&tmp, path)) {
        // Best effort; the target is untouched either way
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    sync_dir(path).map_err(|e| {
        HnswError::Io(io::Error::new(
            e.kind(),
            format!(
                "{} was replaced but syncing its directory failed: {}",
                path.display(),
                e
            ),
        ))
    })
}

fn write_temp(tmp: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Read a whole index file. A missing file maps to `NotFound`.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(HnswError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Reject paths that can never name an index file.
///
/// Returns whether the file already exists.
pub fn check_path(path: &Path) -> Result<bool> {
    if path.as_os_str().is_empty() {
        return Err(HnswError::InvalidPath("empty path".into()));
    }
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(HnswError::InvalidPath(format!(
            "{} is a directory",
            path.display()
        ))),
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => return Ok(false),
            };
            if parent.is_dir() {
                Ok(false)
            } else {
                Err(HnswError::InvalidPath(format!(
                    "parent directory of {} does not exist",
                    path.display()
                )))
            }
        }
        Err(e) => Err(e.into()),
    }
}
