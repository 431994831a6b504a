// src/fsutil.rs

//! Path sanitization and durable file moves.
//!
//! Descriptor and payload paths are untrusted input: a malicious payload
//! could name `../../etc/passwd`. Every path that ends up under the target
//! root goes through `safe_join`.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Sanitize a relative path from an untrusted source.
///
/// Rejects `..` components, skips `.`, strips leading slashes, and rejects
/// paths that normalize to nothing.
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();
    let relative = path_str.trim_start_matches('/');

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(path_str.to_string()));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(path.to_path_buf()));
    }

    Ok(normalized)
}

/// Safely join a root path with an untrusted relative path.
pub fn safe_join(root: &Path, path: impl AsRef<Path>) -> Result<PathBuf> {
    Ok(root.join(sanitize_path(path)?))
}

/// Move a file, falling back to copy+sync+delete across filesystems.
///
/// Backup and restore moves may cross from the target root into the state
/// directory; rename fails with EXDEV there and the fallback must fsync the
/// destination before the source disappears.
pub fn move_file_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        // EXDEV: source and destination live on different filesystems
        Err(e) if e.raw_os_error() == Some(18) => copy_sync_delete(src, dst),
        Err(e) => Err(e),
    }
}

fn copy_sync_delete(src: &Path, dst: &Path) -> io::Result<()> {
    log::debug!(
        "cross-filesystem move {} -> {}, using copy fallback",
        src.display(),
        dst.display()
    );

    fs::copy(src, dst)?;

    let file = File::open(dst)?;
    file.sync_all()?;
    drop(file);

    // fsync the parent so the directory entry is durable; not all
    // filesystems support this, so errors are ignored
    if let Some(parent) = dst.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    fs::remove_file(src)?;
    Ok(())
}
