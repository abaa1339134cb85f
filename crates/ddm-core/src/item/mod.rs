//! Persisted per-download manifest entry and its part map.

mod item_part;

pub use item_part::{ItemPart, PartRangeError};

use crate::content_length::ContentLength;
use crate::headers::HeaderList;
use crate::vmap::VMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Transport kind for a download. Only `Http` ships with an implementation;
/// the others are accepted by the data model (see `SPEC_FULL.md` §1) but have
/// no downloader behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    Sftp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

/// Mutable fields of an `Item` that aren't part of the offset-keyed part map.
/// Held behind one lock so `downloaded`, `resumable`, and completion all move
/// together under a single writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ItemState {
    name: String,
    total_size: Option<u64>,
    downloaded: u64,
    hidden: bool,
    children: Vec<String>,
    child_hash: Option<String>,
    resumable: bool,
    /// `true` once the download has fully completed and its parts were cleared.
    completed: bool,
}

/// A persisted download entry: identity, location, headers, and its part map.
#[derive(Debug)]
pub struct Item {
    pub hash: String,
    pub url: String,
    pub headers: HeaderList,
    pub date_added: i64,
    pub download_location: PathBuf,
    pub absolute_location: PathBuf,
    pub protocol: Protocol,
    /// Offset-keyed part map. `None`/empty once the item has completed.
    pub parts: VMap<u64, ItemPart>,
    state: RwLock<ItemState>,
}

/// Snapshot of an `Item`'s mutable fields, for serialization and for callers
/// (status command, progress handler) that want a consistent read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub hash: String,
    pub url: String,
    pub name: String,
    pub date_added: i64,
    pub download_location: PathBuf,
    pub absolute_location: PathBuf,
    pub protocol: Protocol,
    pub total_size: Option<u64>,
    pub downloaded: u64,
    pub hidden: bool,
    pub children: Vec<String>,
    pub child_hash: Option<String>,
    pub resumable: bool,
    pub completed: bool,
    #[serde(default)]
    pub parts: BTreeMap<u64, ItemPart>,
}

impl Item {
    pub fn new(
        hash: impl Into<String>,
        url: impl Into<String>,
        name: impl Into<String>,
        headers: HeaderList,
        date_added: i64,
        download_location: PathBuf,
        absolute_location: PathBuf,
        total_size: ContentLength,
    ) -> Self {
        Item {
            hash: hash.into(),
            url: url.into(),
            headers,
            date_added,
            download_location,
            absolute_location,
            protocol: Protocol::Http,
            parts: VMap::new(),
            state: RwLock::new(ItemState {
                name: name.into(),
                total_size: total_size.bytes(),
                downloaded: 0,
                hidden: false,
                children: Vec::new(),
                child_hash: None,
                resumable: total_size.is_known(),
                completed: false,
            }),
        }
    }

    pub fn name(&self) -> String {
        self.state.read().unwrap().name.clone()
    }

    pub fn total_size(&self) -> ContentLength {
        match self.state.read().unwrap().total_size {
            Some(n) => ContentLength::Known(n),
            None => ContentLength::Unknown,
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.state.read().unwrap().downloaded
    }

    pub fn resumable(&self) -> bool {
        self.state.read().unwrap().resumable
    }

    pub fn completed(&self) -> bool {
        self.state.read().unwrap().completed
    }

    pub fn set_resumable(&self, value: bool) {
        self.state.write().unwrap().resumable = value;
    }

    /// Credit `n` additional bytes to the running total. Returns the new total.
    /// Panics (debug) is avoided: over-crediting past a known total_size is
    /// clamped, matching the "log, don't error" decision in `SPEC_FULL.md` §9.
    pub fn add_downloaded(&self, n: u64) -> u64 {
        let mut state = self.state.write().unwrap();
        state.downloaded = state.downloaded.saturating_add(n);
        if let Some(total) = state.total_size {
            if state.downloaded > total {
                tracing::warn!(
                    item = %self.hash,
                    downloaded = state.downloaded,
                    total,
                    "downloaded exceeds known total_size; clamping"
                );
                state.downloaded = total;
            }
        }
        state.downloaded
    }

    /// Mark the item fully completed: clears the part map (the spec's "parts
    /// becomes none" terminal state) and sets `downloaded == total_size`.
    pub fn mark_completed(&self) {
        let mut state = self.state.write().unwrap();
        if let Some(total) = state.total_size {
            state.downloaded = total;
        }
        state.completed = true;
        drop(state);
        self.parts.replace_all(BTreeMap::new());
    }

    /// Reverse lookup: part-hash -> initial-offset (`SPEC_FULL.md` §4.5
    /// memPart). Derived fresh from the forward `parts` map each call rather
    /// than kept as a second cached structure, so it can never drift out of
    /// sync with `parts` itself. Fails with `PartDesync` when `hash` doesn't
    /// map back to a live part — e.g. it was already compiled and dropped, or
    /// it's a stale hash from a respawn whose parent is gone.
    pub fn mem_part_offset(&self, hash: &str) -> Result<u64, crate::error::DdmError> {
        self.parts
            .snapshot()
            .into_iter()
            .find(|(_, p)| p.hash == hash)
            .map(|(offset, _)| offset)
            .ok_or_else(|| crate::error::DdmError::PartDesync {
                hash: hash.to_string(),
            })
    }

    /// Validate the part-map invariant: offsets strictly increasing, ranges
    /// non-overlapping. Returns the offending pair of offsets on violation.
    pub fn validate_part_ranges(&self) -> Result<(), (u64, u64)> {
        let parts = self.parts.snapshot();
        for pair in parts.windows(2) {
            let (prev_offset, prev_part) = &pair[0];
            let (next_offset, _) = &pair[1];
            if prev_part.final_offset >= *next_offset {
                return Err((*prev_offset, *next_offset));
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        let state = self.state.read().unwrap();
        ItemSnapshot {
            hash: self.hash.clone(),
            url: self.url.clone(),
            name: state.name.clone(),
            date_added: self.date_added,
            download_location: self.download_location.clone(),
            absolute_location: self.absolute_location.clone(),
            protocol: self.protocol,
            total_size: state.total_size,
            downloaded: state.downloaded,
            hidden: state.hidden,
            children: state.children.clone(),
            child_hash: state.child_hash.clone(),
            resumable: state.resumable,
            completed: state.completed,
            parts: self.parts.snapshot().into_iter().collect(),
        }
    }

    pub fn from_snapshot(snap: ItemSnapshot, headers: HeaderList) -> Self {
        let item = Item {
            hash: snap.hash,
            url: snap.url,
            headers,
            date_added: snap.date_added,
            download_location: snap.download_location,
            absolute_location: snap.absolute_location,
            protocol: snap.protocol,
            parts: VMap::from_map(snap.parts),
            state: RwLock::new(ItemState {
                name: snap.name,
                total_size: snap.total_size,
                downloaded: snap.downloaded,
                hidden: snap.hidden,
                children: snap.children,
                child_hash: snap.child_hash,
                resumable: snap.resumable,
                completed: snap.completed,
            }),
        };
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_item() -> Item {
        Item::new(
            "ab12",
            "https://example.com/file.bin",
            "file.bin",
            HeaderList::new(),
            0,
            PathBuf::from("/tmp"),
            PathBuf::from("/tmp/file.bin"),
            ContentLength::Known(1000),
        )
    }

    #[test]
    fn add_downloaded_clamps_to_total() {
        let item = make_item();
        item.add_downloaded(900);
        assert_eq!(item.downloaded(), 900);
        item.add_downloaded(900);
        assert_eq!(item.downloaded(), 1000);
    }

    #[test]
    fn mark_completed_clears_parts_and_sets_total() {
        let item = make_item();
        item.parts.insert(0, ItemPart::new("aa", 0, 500).unwrap());
        item.parts.insert(500, ItemPart::new("bb", 500, 1000).unwrap());
        item.mark_completed();
        assert!(item.completed());
        assert_eq!(item.downloaded(), 1000);
        assert!(item.parts.is_empty());
    }

    #[test]
    fn validate_part_ranges_detects_overlap() {
        let item = make_item();
        item.parts.insert(0, ItemPart::new("aa", 0, 600).unwrap());
        item.parts.insert(500, ItemPart::new("bb", 500, 1000).unwrap());
        assert_eq!(item.validate_part_ranges(), Err((0, 500)));
    }

    #[test]
    fn validate_part_ranges_ok_when_non_overlapping() {
        let item = make_item();
        item.parts.insert(0, ItemPart::new("aa", 0, 500).unwrap());
        item.parts.insert(500, ItemPart::new("bb", 500, 1000).unwrap());
        assert!(item.validate_part_ranges().is_ok());
    }

    #[test]
    fn mem_part_offset_finds_live_part() {
        let item = make_item();
        item.parts.insert(500, ItemPart::new("bb", 500, 1000).unwrap());
        assert_eq!(item.mem_part_offset("bb").unwrap(), 500);
    }

    #[test]
    fn mem_part_offset_desyncs_on_unknown_hash() {
        let item = make_item();
        item.parts.insert(0, ItemPart::new("aa", 0, 500).unwrap());
        let err = item.mem_part_offset("ghost").unwrap_err();
        assert!(matches!(err, crate::error::DdmError::PartDesync { hash } if hash == "ghost"));
    }

    #[test]
    fn snapshot_roundtrip_preserves_parts() {
        let item = make_item();
        item.parts.insert(0, ItemPart::new("aa", 0, 500).unwrap());
        let snap = item.snapshot();
        let restored = Item::from_snapshot(snap, HeaderList::new());
        assert_eq!(restored.parts.len(), 1);
        assert_eq!(restored.total_size(), ContentLength::Known(1000));
    }
}
