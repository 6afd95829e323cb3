//! Filesystem primitives that copy and remove entries between the source
//! tree and the mirror tree.
//!
//! Copies are whole-file replacements that carry the source permission bits.
//! An entry whose bytes and permissions already match is left untouched.

use std::fs;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

use tracing::debug;

use crate::errors::MirrorError;

/// What a copy or directory operation did to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The mirror entry did not exist and was created.
    Created,
    /// The mirror entry existed and was replaced.
    Replaced,
    /// The mirror entry already matched the source.
    Unchanged,
}

/// Kind of entry removed from the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovedEntry {
    File,
    Directory,
}

/// Whether a stat failure means the entry is simply not there. A path
/// whose parent has become a file reports `NotADirectory`.
pub fn is_absent(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

/// Copy `src` over `dst`, preserving permission bits.
///
/// The parent of `dst` must already exist.
pub fn copy_file(src: &Path, dst: &Path) -> Result<CopyOutcome, MirrorError> {
    let src_meta = fs::metadata(src).map_err(|e| MirrorError::new("stat", src, e))?;

    let existing = match fs::symlink_metadata(dst) {
        Ok(meta) => Some(meta),
        Err(e) if is_absent(&e) => None,
        Err(e) => return Err(MirrorError::new("stat", dst, e)),
    };

    let outcome = match existing {
        None => CopyOutcome::Created,
        Some(meta) if meta.is_dir() => {
            // A directory was replaced by a file at the source.
            fs::remove_dir_all(dst).map_err(|e| MirrorError::new("remove directory", dst, e))?;
            CopyOutcome::Replaced
        }
        Some(meta) => {
            if meta.file_type().is_file()
                && meta.permissions() == src_meta.permissions()
                && same_contents(src, dst, src_meta.len(), meta.len())
                    .map_err(|e| MirrorError::new("compare", dst, e))?
            {
                return Ok(CopyOutcome::Unchanged);
            }
            if meta.permissions().readonly() || !meta.file_type().is_file() {
                fs::remove_file(dst).map_err(|e| MirrorError::new("remove", dst, e))?;
            }
            CopyOutcome::Replaced
        }
    };

    fs::copy(src, dst).map_err(|e| MirrorError::new("copy", src, e))?;
    fs::set_permissions(dst, src_meta.permissions())
        .map_err(|e| MirrorError::new("set permissions on", dst, e))?;

    debug!(src = %src.display(), dst = %dst.display(), ?outcome, "copied file");
    Ok(outcome)
}

/// Make sure `dst` exists as a directory, creating it with the permissions
/// of `src` when missing. Returns `true` if it was created.
pub fn ensure_dir(src: &Path, dst: &Path) -> Result<bool, MirrorError> {
    match fs::symlink_metadata(dst) {
        Ok(meta) if meta.is_dir() => return Ok(false),
        Ok(_) => {
            // A file was replaced by a directory at the source.
            fs::remove_file(dst).map_err(|e| MirrorError::new("remove", dst, e))?;
        }
        Err(e) if is_absent(&e) => {}
        Err(e) => return Err(MirrorError::new("stat", dst, e)),
    }

    fs::create_dir(dst).map_err(|e| MirrorError::new("create directory", dst, e))?;
    if let Ok(meta) = fs::metadata(src) {
        fs::set_permissions(dst, meta.permissions())
            .map_err(|e| MirrorError::new("set permissions on", dst, e))?;
    }
    debug!(dst = %dst.display(), "created directory");
    Ok(true)
}

/// Remove `dst` (recursively for directories). Returns `None` when nothing
/// was there.
pub fn remove(dst: &Path) -> Result<Option<RemovedEntry>, MirrorError> {
    let meta = match fs::symlink_metadata(dst) {
        Ok(meta) => meta,
        Err(e) if is_absent(&e) => return Ok(None),
        Err(e) => return Err(MirrorError::new("stat", dst, e)),
    };

    if meta.is_dir() {
        fs::remove_dir_all(dst).map_err(|e| MirrorError::new("remove directory", dst, e))?;
        debug!(dst = %dst.display(), "removed directory");
        Ok(Some(RemovedEntry::Directory))
    } else {
        fs::remove_file(dst).map_err(|e| MirrorError::new("remove", dst, e))?;
        debug!(dst = %dst.display(), "removed file");
        Ok(Some(RemovedEntry::File))
    }
}

fn same_contents(a: &Path, b: &Path, a_len: u64, b_len: u64) -> io::Result<bool> {
    if a_len != b_len {
        return Ok(false);
    }

    let mut fa = fs::File::open(a)?;
    let mut fb = fs::File::open(b)?;
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];

    loop {
        let n = fa.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        fb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}
