//! On-disk integrity validation before resuming an item (`SPEC_FULL.md` §4.7).
//!
//! Distinct from [`super::validate`]'s remote-change check: this looks only at
//! what's on disk — the scratch directory, each part's scratch file, and the
//! partially-written target — not at whether the origin still serves the same
//! bytes.

use crate::error::DdmError;
use crate::item::Item;
use std::path::Path;

/// Verifies the three on-disk preconditions for resuming `item`:
/// 1. its scratch directory exists,
/// 2. every non-compiled part's scratch file exists as a regular file,
/// 3. if any part is compiled or any bytes have been downloaded, the target
///    file exists, is a regular file, and is non-empty.
///
/// Returns `DdmError::DownloadDataMissing` on the first violation found; the
/// caller's only recourse is to flush the entry and start over.
pub fn verify_resumable(item: &Item, scratch_dir: &Path) -> Result<(), DdmError> {
    let missing = || DdmError::DownloadDataMissing {
        hash: item.hash.clone(),
    };

    let parts = item.parts.snapshot();
    if !parts.is_empty() && !scratch_dir.is_dir() {
        return Err(missing());
    }

    let mut any_compiled_or_downloaded = item.downloaded() > 0;
    for (_offset, part) in &parts {
        if part.compiled {
            any_compiled_or_downloaded = true;
            continue;
        }
        let scratch_file = scratch_dir.join(part.scratch_file_name());
        match std::fs::metadata(&scratch_file) {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(missing()),
        }
    }

    if any_compiled_or_downloaded {
        match std::fs::metadata(&item.absolute_location) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return Err(missing()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_length::ContentLength;
    use crate::headers::HeaderList;
    use crate::item::ItemPart;
    use std::path::PathBuf;

    fn make_item(download_location: PathBuf, absolute_location: PathBuf) -> Item {
        Item::new(
            "ab12",
            "https://example.com/file.bin",
            "file.bin",
            HeaderList::new(),
            0,
            download_location,
            absolute_location,
            ContentLength::Known(1000),
        )
    }

    #[test]
    fn no_parts_and_nothing_downloaded_is_always_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let item = make_item(dir.path().to_path_buf(), dir.path().join("file.bin"));
        assert!(verify_resumable(&item, &dir.path().join("scratch")).is_ok());
    }

    #[test]
    fn missing_scratch_dir_fails_when_parts_exist() {
        let dir = tempfile::tempdir().unwrap();
        let item = make_item(dir.path().to_path_buf(), dir.path().join("file.bin"));
        item.parts.insert(0, ItemPart::new("aa", 0, 500).unwrap());
        let err = verify_resumable(&item, &dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, DdmError::DownloadDataMissing { .. }));
    }

    #[test]
    fn missing_scratch_file_for_noncompiled_part_fails() {
        let dir = tempfile::tempdir().unwrap();
        let scratch_dir = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch_dir).unwrap();
        let item = make_item(dir.path().to_path_buf(), dir.path().join("file.bin"));
        item.parts.insert(0, ItemPart::new("aa", 0, 500).unwrap());
        let err = verify_resumable(&item, &scratch_dir).unwrap_err();
        assert!(matches!(err, DdmError::DownloadDataMissing { .. }));
    }

    #[test]
    fn present_scratch_file_for_noncompiled_part_passes() {
        let dir = tempfile::tempdir().unwrap();
        let scratch_dir = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch_dir).unwrap();
        std::fs::write(scratch_dir.join("aa"), b"partial").unwrap();
        let item = make_item(dir.path().to_path_buf(), dir.path().join("file.bin"));
        item.parts.insert(0, ItemPart::new("aa", 0, 500).unwrap());
        assert!(verify_resumable(&item, &scratch_dir).is_ok());
    }

    #[test]
    fn compiled_part_requires_nonempty_target() {
        let dir = tempfile::tempdir().unwrap();
        let scratch_dir = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch_dir).unwrap();
        let target = dir.path().join("file.bin");
        let item = make_item(dir.path().to_path_buf(), target.clone());
        let mut part = ItemPart::new("aa", 0, 500).unwrap();
        part.compiled = true;
        item.parts.insert(0, part);

        let err = verify_resumable(&item, &scratch_dir).unwrap_err();
        assert!(matches!(err, DdmError::DownloadDataMissing { .. }));

        std::fs::write(&target, b"data").unwrap();
        assert!(verify_resumable(&item, &scratch_dir).is_ok());
    }

    #[test]
    fn empty_target_file_fails_even_if_present() {
        let dir = tempfile::tempdir().unwrap();
        let scratch_dir = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch_dir).unwrap();
        let target = dir.path().join("file.bin");
        std::fs::write(&target, b"").unwrap();
        let item = make_item(dir.path().to_path_buf(), target);
        item.add_downloaded(10);
        let err = verify_resumable(&item, &scratch_dir).unwrap_err();
        assert!(matches!(err, DdmError::DownloadDataMissing { .. }));
    }
}
