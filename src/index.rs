//! Indexer seam and the in-memory needle cache entry.
//!
//! The container does not own the durable index; Recovery feeds live needles
//! to an [`Indexer`] collaborator and records every needle (live or
//! tombstoned) in a caller-owned `key -> NeedleCacheEntry` map.

use crate::error::StoreResult;
use crate::formats::MAX_SLOT;

/// Receives `(key, slot, framed)` for every live needle found by Recovery.
///
/// Implementations typically append to a separate index file; the container
/// only calls [`Indexer::add`] and surfaces its errors verbatim.
pub trait Indexer {
    /// Record one live needle.
    fn add(&mut self, key: i64, slot: u32, framed: u32) -> StoreResult<()>;
}

/// Sentinel slot offset marking a tombstoned cache entry.
pub const TOMBSTONE_SLOT: u32 = MAX_SLOT;

/// One entry of the caller's in-memory `key -> (slot, framed)` map.
///
/// A linear Recovery scan inserts unconditionally, so the final entry for a
/// key reflects the most recently appended frame (later entry wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleCacheEntry {
    /// Slot offset of the frame, or [`TOMBSTONE_SLOT`].
    pub slot: u32,
    /// Framed size in bytes.
    pub framed: u32,
}

impl NeedleCacheEntry {
    /// Entry for a live needle.
    pub fn live(slot: u32, framed: u32) -> Self {
        Self { slot, framed }
    }

    /// Entry for a deleted needle.
    pub fn tombstone(framed: u32) -> Self {
        Self {
            slot: TOMBSTONE_SLOT,
            framed,
        }
    }

    /// Whether this entry marks a deleted needle.
    pub fn is_tombstone(&self) -> bool {
        self.slot == TOMBSTONE_SLOT
    }
}

/// Indexer that collects entries in memory; used in tests and by callers
/// that rebuild a purely in-memory index.
#[derive(Debug, Default)]
pub struct MemIndexer {
    /// Entries in scan order.
    pub entries: Vec<(i64, u32, u32)>,
}

impl MemIndexer {
    /// Create an empty in-memory indexer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for MemIndexer {
    fn add(&mut self, key: i64, slot: u32, framed: u32) -> StoreResult<()> {
        self.entries.push((key, slot, framed));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_entry_is_marked() {
        let live = NeedleCacheEntry::live(3, 40);
        assert!(!live.is_tombstone());
        assert_eq!(live.slot, 3);

        let dead = NeedleCacheEntry::tombstone(40);
        assert!(dead.is_tombstone());
        assert_eq!(dead.framed, 40);
    }

    #[test]
    fn mem_indexer_collects_in_order() {
        let mut ix = MemIndexer::new();
        ix.add(7, 1, 40).unwrap();
        ix.add(8, 6, 48).unwrap();
        assert_eq!(ix.entries, vec![(7, 1, 40), (8, 6, 48)]);
    }
}
