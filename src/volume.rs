//! Volume sink seam: the target of offline compaction.

use crate::error::StoreResult;

/// Append target for [`crate::superblock::SuperBlock::compress`].
///
/// The surrounding volume layer implements this over a fresh container plus
/// its index; the core only needs a batched write path and a flush barrier.
/// The sink is itself append-only, so a compaction interrupted mid-way can be
/// restarted against a new sink.
pub trait VolumeSink {
    /// Append one live needle to the sink.
    fn write(&mut self, key: i64, cookie: i64, payload: &[u8]) -> StoreResult<()>;

    /// Make everything written so far observable in the sink.
    fn flush(&mut self) -> StoreResult<()>;
}
