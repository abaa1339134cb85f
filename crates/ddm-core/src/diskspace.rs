//! Free-space probe and cross-device move detection.
//!
//! Grounded in the `fs2` crate's `available_space`, the same mechanism other
//! Rust download/extract tools in this space use for a pre-flight disk check.

use crate::content_length::ContentLength;
use crate::error::DdmError;
use std::path::Path;

/// Checks that `path`'s filesystem has at least `required_bytes` free.
///
/// `required_bytes == 0` always succeeds (no check requested). If the
/// platform can't answer — permission denied, path doesn't exist yet — this
/// degrades gracefully to success rather than blocking a download on a probe
/// failure; a real shortfall is still caught once the write itself fails.
pub fn check_disk_space(path: &Path, required_bytes: u64) -> Result<(), DdmError> {
    if required_bytes == 0 {
        return Ok(());
    }

    let probe_dir = nearest_existing_ancestor(path);
    let available = match fs2::available_space(&probe_dir) {
        Ok(n) => n,
        Err(_) => return Ok(()),
    };

    if available < required_bytes {
        return Err(DdmError::InsufficientDiskSpace {
            required: ContentLength::Known(required_bytes),
            available: ContentLength::Known(available),
        });
    }
    Ok(())
}

fn nearest_existing_ancestor(path: &Path) -> std::path::PathBuf {
    let mut candidate = path.to_path_buf();
    loop {
        if candidate.exists() {
            return candidate;
        }
        match candidate.parent() {
            Some(p) if !p.as_os_str().is_empty() => candidate = p.to_path_buf(),
            _ => return std::path::PathBuf::from("."),
        }
    }
}

/// `true` if renaming `from` to `to` would cross a filesystem boundary on this
/// platform (the scratch directory and the final download directory, on
/// Unix, are compared by device id).
#[cfg(unix)]
pub fn is_cross_device(from: &Path, to_parent: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let from_dev = from
        .parent()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.dev());
    let to_dev = std::fs::metadata(to_parent).ok().map(|m| m.dev());
    match (from_dev, to_dev) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn is_cross_device(_from: &Path, _to_parent: &Path) -> bool {
    false
}
