//! Needle framing: the codec seam and the canonical v1 frame layout.
//!
//! The container core ([`crate::superblock`]) never touches frame internals;
//! it speaks to a [`NeedleCodec`] for framing, parsing and the two byte-level
//! facts it needs for positional writes (the flag offset and the deletion
//! byte pattern).
//!
//! ## v1 frame layout (must not change without a format bump)
//!
//! Little-endian integers, header then payload then zero padding:
//!
//! ```text
//! 0..4    checksum   crc32 over the payload
//! 4..12   key        i64
//! 12..20  cookie     i64
//! 20..24  data_size  u32 payload length
//! 24      flag       0x00 = OK, 0x01 = DEL
//! 25..32  reserved   zeros
//! 32..    payload, then zeros up to an 8-byte boundary
//! ```
//!
//! The checksum deliberately covers only the payload: logical deletion flips
//! the flag byte in place, and a deleted frame must still parse.

use crate::error::{StoreError, StoreResult};
use crate::formats::PADDING_UNIT;
use byteorder::{ByteOrder, LittleEndian};

/// Needle status flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeedleFlag {
    /// Live needle.
    Ok,
    /// Logically deleted needle (tombstone until compaction).
    Del,
}

impl NeedleFlag {
    /// Decode a flag byte; anything outside the two defined values is a
    /// parse failure in the caller.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            FLAG_OK => Some(NeedleFlag::Ok),
            FLAG_DEL => Some(NeedleFlag::Del),
            _ => None,
        }
    }

    /// The on-disk byte for this flag.
    pub fn as_byte(self) -> u8 {
        match self {
            NeedleFlag::Ok => FLAG_OK,
            NeedleFlag::Del => FLAG_DEL,
        }
    }
}

/// Parsed needle header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleHeader {
    /// Application key.
    pub key: i64,
    /// Application cookie (anti-guessing token carried next to the key).
    pub cookie: i64,
    /// Payload length in bytes.
    pub data_size: u32,
    /// Live/deleted status.
    pub flag: NeedleFlag,
    /// Payload checksum as recorded in the header; validated by
    /// [`NeedleCodec::parse_body`].
    pub checksum: u32,
}

impl std::fmt::Display for NeedleHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "needle key={} cookie={} size={} flag={:?}",
            self.key, self.cookie, self.data_size, self.flag
        )
    }
}

/// Frames and parses needles for the container core.
///
/// Implementations are pure byte manipulation; the core owns all file IO.
pub trait NeedleCodec: Send + Sync {
    /// Fixed size of a frame header.
    fn header_size(&self) -> usize;

    /// Largest possible framed size; the core sizes its scratch buffer and
    /// scan readers to this.
    fn max_frame_size(&self) -> usize;

    /// Byte offset of the flag field within a frame.
    fn flag_offset(&self) -> u64;

    /// Byte pattern that, written at [`NeedleCodec::flag_offset`], marks the
    /// frame deleted.
    fn del_flag_bytes(&self) -> &[u8];

    /// Compute `(padding, framed)` for a payload length. `framed` is always
    /// a multiple of the padding unit;
    /// `padding = framed - header_size - payload_len`.
    fn frame_size(&self, payload_len: usize) -> StoreResult<(usize, u32)>;

    /// Encode one live frame into `dst`, which the caller has sized to
    /// exactly `framed` bytes via [`NeedleCodec::frame_size`].
    fn encode(&self, dst: &mut [u8], padding: usize, key: i64, cookie: i64, payload: &[u8]);

    /// Parse a frame header from `header_size()` bytes.
    fn parse_header(&self, bytes: &[u8]) -> StoreResult<NeedleHeader>;

    /// Validate the frame body (payload + padding) against its header and
    /// return the payload slice.
    fn parse_body<'a>(&self, header: &NeedleHeader, body: &'a [u8]) -> StoreResult<&'a [u8]>;
}

/// v1 frame header size.
pub const NEEDLE_HEADER_SIZE: usize = 32;

/// Byte offset of the flag field within a v1 frame.
pub const NEEDLE_FLAG_OFFSET: u64 = 24;

/// Flag byte of a live needle.
pub const FLAG_OK: u8 = 0x00;

/// Flag byte of a deleted needle.
pub const FLAG_DEL: u8 = 0x01;

/// Bytes written over the flag field to delete a needle in place.
pub const DEL_FLAG_BYTES: [u8; 1] = [FLAG_DEL];

/// Largest payload a v1 frame carries.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Largest possible v1 framed size.
pub const MAX_FRAME_SIZE: usize = NEEDLE_HEADER_SIZE + MAX_PAYLOAD_BYTES;

const CHECKSUM_RANGE: std::ops::Range<usize> = 0..4;
const KEY_RANGE: std::ops::Range<usize> = 4..12;
const COOKIE_RANGE: std::ops::Range<usize> = 12..20;
const SIZE_RANGE: std::ops::Range<usize> = 20..24;
const FLAG_INDEX: usize = 24;

/// The canonical v1 needle codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeedleV1;

impl NeedleCodec for NeedleV1 {
    fn header_size(&self) -> usize {
        NEEDLE_HEADER_SIZE
    }

    fn max_frame_size(&self) -> usize {
        MAX_FRAME_SIZE
    }

    fn flag_offset(&self) -> u64 {
        NEEDLE_FLAG_OFFSET
    }

    fn del_flag_bytes(&self) -> &[u8] {
        &DEL_FLAG_BYTES
    }

    fn frame_size(&self, payload_len: usize) -> StoreResult<(usize, u32)> {
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(StoreError::PayloadTooLarge {
                len: payload_len,
                max: MAX_PAYLOAD_BYTES,
            });
        }
        let unpadded = NEEDLE_HEADER_SIZE + payload_len;
        let unit = PADDING_UNIT as usize;
        let padding = (unit - unpadded % unit) % unit;
        Ok((padding, (unpadded + padding) as u32))
    }

    fn encode(&self, dst: &mut [u8], padding: usize, key: i64, cookie: i64, payload: &[u8]) {
        let framed = NEEDLE_HEADER_SIZE + payload.len() + padding;
        debug_assert_eq!(dst.len(), framed);
        LittleEndian::write_u32(&mut dst[CHECKSUM_RANGE], crc32fast::hash(payload));
        LittleEndian::write_i64(&mut dst[KEY_RANGE], key);
        LittleEndian::write_i64(&mut dst[COOKIE_RANGE], cookie);
        LittleEndian::write_u32(&mut dst[SIZE_RANGE], payload.len() as u32);
        dst[FLAG_INDEX] = FLAG_OK;
        dst[FLAG_INDEX + 1..NEEDLE_HEADER_SIZE].fill(0);
        dst[NEEDLE_HEADER_SIZE..NEEDLE_HEADER_SIZE + payload.len()].copy_from_slice(payload);
        dst[NEEDLE_HEADER_SIZE + payload.len()..framed].fill(0);
    }

    fn parse_header(&self, bytes: &[u8]) -> StoreResult<NeedleHeader> {
        if bytes.len() < NEEDLE_HEADER_SIZE {
            return Err(StoreError::Parse(format!(
                "short needle header: {} bytes",
                bytes.len()
            )));
        }
        let data_size = LittleEndian::read_u32(&bytes[SIZE_RANGE]);
        if data_size as usize > MAX_PAYLOAD_BYTES {
            return Err(StoreError::Parse(format!(
                "implausible needle data size {data_size}"
            )));
        }
        let flag = NeedleFlag::from_byte(bytes[FLAG_INDEX]).ok_or_else(|| {
            StoreError::Parse(format!("invalid needle flag {:#04x}", bytes[FLAG_INDEX]))
        })?;
        Ok(NeedleHeader {
            key: LittleEndian::read_i64(&bytes[KEY_RANGE]),
            cookie: LittleEndian::read_i64(&bytes[COOKIE_RANGE]),
            data_size,
            flag,
            checksum: LittleEndian::read_u32(&bytes[CHECKSUM_RANGE]),
        })
    }

    fn parse_body<'a>(&self, header: &NeedleHeader, body: &'a [u8]) -> StoreResult<&'a [u8]> {
        let data_size = header.data_size as usize;
        if body.len() < data_size {
            return Err(StoreError::Parse(format!(
                "short needle body: {} bytes (need {data_size})",
                body.len()
            )));
        }
        let payload = &body[..data_size];
        let actual = crc32fast::hash(payload);
        if actual != header.checksum {
            return Err(StoreError::Parse(format!(
                "needle checksum mismatch (expected {:#010x}, got {actual:#010x})",
                header.checksum
            )));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(key: i64, cookie: i64, payload: &[u8]) -> Vec<u8> {
        let codec = NeedleV1;
        let (padding, framed) = codec.frame_size(payload.len()).unwrap();
        let mut buf = vec![0u8; framed as usize];
        codec.encode(&mut buf, padding, key, cookie, payload);
        buf
    }

    #[test]
    fn frame_size_is_padding_unit_aligned() {
        let codec = NeedleV1;
        for len in 0..64usize {
            let (padding, framed) = codec.frame_size(len).unwrap();
            assert_eq!(framed % PADDING_UNIT, 0, "len={len}");
            assert_eq!(framed as usize, NEEDLE_HEADER_SIZE + len + padding);
            assert!(padding < PADDING_UNIT as usize);
        }
    }

    #[test]
    fn frame_size_rejects_oversized_payload() {
        let err = NeedleV1.frame_size(MAX_PAYLOAD_BYTES + 1).unwrap_err();
        assert!(matches!(err, StoreError::PayloadTooLarge { .. }));
    }

    #[test]
    fn encode_parse_roundtrip() {
        let codec = NeedleV1;
        let buf = frame(7, 9, b"hello");
        let header = codec.parse_header(&buf[..NEEDLE_HEADER_SIZE]).unwrap();
        assert_eq!(header.key, 7);
        assert_eq!(header.cookie, 9);
        assert_eq!(header.data_size, 5);
        assert_eq!(header.flag, NeedleFlag::Ok);
        let payload = codec
            .parse_body(&header, &buf[NEEDLE_HEADER_SIZE..])
            .unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn empty_payload_roundtrip() {
        let codec = NeedleV1;
        let buf = frame(-1, i64::MIN, b"");
        assert_eq!(buf.len(), NEEDLE_HEADER_SIZE);
        let header = codec.parse_header(&buf).unwrap();
        assert_eq!(header.key, -1);
        assert_eq!(header.data_size, 0);
        assert_eq!(codec.parse_body(&header, &[]).unwrap(), b"");
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let codec = NeedleV1;
        let mut buf = frame(1, 2, b"payload");
        buf[NEEDLE_HEADER_SIZE] ^= 0xff;
        let header = codec.parse_header(&buf[..NEEDLE_HEADER_SIZE]).unwrap();
        let err = codec
            .parse_body(&header, &buf[NEEDLE_HEADER_SIZE..])
            .unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }

    #[test]
    fn del_flag_patch_parses_as_deleted() {
        let codec = NeedleV1;
        let mut buf = frame(1, 2, b"payload");
        let at = codec.flag_offset() as usize;
        buf[at..at + codec.del_flag_bytes().len()].copy_from_slice(codec.del_flag_bytes());
        let header = codec.parse_header(&buf[..NEEDLE_HEADER_SIZE]).unwrap();
        assert_eq!(header.flag, NeedleFlag::Del);
        // Payload and checksum survive the flag flip.
        let payload = codec
            .parse_body(&header, &buf[NEEDLE_HEADER_SIZE..])
            .unwrap();
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn invalid_flag_is_a_parse_error() {
        let codec = NeedleV1;
        let mut buf = frame(1, 2, b"x");
        buf[FLAG_INDEX] = 0x7f;
        let err = codec.parse_header(&buf[..NEEDLE_HEADER_SIZE]).unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }

    #[test]
    fn implausible_size_is_a_parse_error() {
        let codec = NeedleV1;
        let mut buf = frame(1, 2, b"x");
        LittleEndian::write_u32(&mut buf[SIZE_RANGE], u32::MAX);
        let err = codec.parse_header(&buf[..NEEDLE_HEADER_SIZE]).unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }
}
