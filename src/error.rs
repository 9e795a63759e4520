//! Error types for `haystore`.

/// Result type for container operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the `haystore` crate.
///
/// Recovery posture: [`StoreError::Parse`] raised mid-scan by Recovery, Dump
/// or Compress is indistinguishable from a torn last append in an append-only
/// file, so those scans treat it as end-of-stream. Every other error bubbles
/// to the caller unchanged; there are no retries inside the crate.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// I/O error. A failed flush or a failed append mid-write poisons the
    /// handle; callers must close it and not reuse it.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// File header magic mismatch. Fatal; the file is rejected at open.
    #[error("bad super block magic (got {actual:02x?})")]
    BadMagic {
        /// The magic bytes actually present at byte 0.
        actual: [u8; 4],
    },

    /// File header version outside the supported set. Fatal; the file is
    /// rejected at open.
    #[error("unsupported super block version {actual}")]
    UnsupportedVersion {
        /// The version byte actually present.
        actual: u8,
    },

    /// Appending this frame would pass the maximum slot offset. The handle
    /// is untouched: no bytes written, no cursor moved.
    #[error("no space left in super block (current slot {current}, frame needs {needed} slots)")]
    NoSpace {
        /// Slot offset the container stood at.
        current: u32,
        /// Slots the rejected frame would have occupied.
        needed: u32,
    },

    /// Needle header or body failed to parse.
    #[error("needle parse error: {0}")]
    Parse(String),

    /// Payload exceeds what the codec can frame.
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Offered payload length.
        len: usize,
        /// The codec's maximum payload length.
        max: usize,
    },

    /// A recovery start offset that is not a padding-unit multiple.
    #[error("unaligned byte offset {byte} (must be a multiple of {unit})")]
    Unaligned {
        /// The offending byte offset.
        byte: u64,
        /// The required alignment.
        unit: u32,
    },
}
