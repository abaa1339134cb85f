//! Persisted per-segment manifest entry.

use serde::{Deserialize, Serialize};

/// One live or completed segment within an [`super::Item`].
///
/// Keyed by `initial_offset` in the parent's part map. `#[serde(default)]` on
/// every field added after the first release keeps old rows decodable (see
/// the persistence notes in `SPEC_FULL.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemPart {
    /// 2-byte random hex identifier, unique within one item.
    pub hash: String,
    /// Last byte offset this part is responsible for (inclusive).
    pub final_offset: u64,
    /// Whether the scratch file has been merged into the target file.
    #[serde(default)]
    pub compiled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartRangeError {
    /// `final_offset <= initial_offset`: the range is empty or inverted.
    Empty { start: u64, end: u64 },
}

impl std::fmt::Display for PartRangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartRangeError::Empty { start, end } => {
                write!(f, "invalid part range: [{start}, {end}]")
            }
        }
    }
}

impl std::error::Error for PartRangeError {}

impl ItemPart {
    pub fn new(hash: impl Into<String>, initial_offset: u64, final_offset: u64) -> Result<Self, PartRangeError> {
        if final_offset <= initial_offset {
            return Err(PartRangeError::Empty {
                start: initial_offset,
                end: final_offset,
            });
        }
        Ok(ItemPart {
            hash: hash.into(),
            final_offset,
            compiled: false,
        })
    }

    /// Scratch file name for this part, relative to the item's scratch directory.
    pub fn scratch_file_name(&self) -> &str {
        &self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_empty_range() {
        assert!(ItemPart::new("ab", 10, 10).is_err());
        assert!(ItemPart::new("ab", 10, 5).is_err());
    }

    #[test]
    fn new_accepts_valid_range() {
        let p = ItemPart::new("ab", 0, 100).unwrap();
        assert_eq!(p.final_offset, 100);
        assert!(!p.compiled);
    }

    #[test]
    fn serde_default_fills_missing_compiled() {
        let json = r#"{"hash":"ab","final_offset":100}"#;
        let p: ItemPart = serde_json::from_str(json).unwrap();
        assert!(!p.compiled);
    }
}
