//! `haystore`: an append-only needle container, Haystack style.
//!
//! One regular file holds a fixed 8-byte header followed by many small
//! immutable records ("needles") back to back. The crate owns the on-disk
//! format, the arithmetic mapping 32-bit slot offsets to 64-bit byte
//! positions, the invariants that keep appends crash-consistent, and the
//! sequential scan that rebuilds an in-memory index from disk.
//!
//! Scope:
//! - format constants and slot arithmetic (`formats`)
//! - needle framing seam and the canonical v1 codec (`needle`)
//! - the container handle and its data plane (`superblock`)
//! - collaborator seams: durable index (`index`), compaction sink (`volume`)
//!
//! Non-goal: the surrounding volume layer. Serialising mutators, owning the
//! `key -> slot` map between recoveries, and the durable index file all
//! belong to the caller; this crate only exposes the seams they plug into.
//!
//! ## Contract (what you can rely on)
//!
//! - **Crash consistency**: appends are framed and checksummed; a torn last
//!   append is detected during [`SuperBlock::recovery`], reported as a clean
//!   end of stream, and overwritten by the next append.
//! - **Visibility vs durability**: [`SuperBlock::add`] is observable to
//!   readers when it returns; [`SuperBlock::write`] only after the next
//!   [`SuperBlock::flush`]. Stable-storage durability requires
//!   [`SuperBlock::close`] (or an external fsync barrier).
//! - **Addressing**: slot offsets stay 32-bit on disk, addressing
//!   `2^32 * 8` bytes per container. Widening them is a format break.

pub mod error;
pub mod formats;
pub mod index;
pub mod needle;
pub mod superblock;
pub mod volume;

pub use error::{StoreError, StoreResult};
pub use index::{Indexer, MemIndexer, NeedleCacheEntry, TOMBSTONE_SLOT};
pub use needle::{NeedleCodec, NeedleFlag, NeedleHeader, NeedleV1};
pub use superblock::SuperBlock;
pub use volume::VolumeSink;
