//! The super block: one container file, a fixed header, needles back to back.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **File layout**: `[file header][needle frames...]`, every frame starting
//!   at a multiple of [`PADDING_UNIT`](crate::formats::PADDING_UNIT).
//! - **Slot bookkeeping**: `current_slot * PADDING_UNIT` equals the end of
//!   the last flushed needle after any successful [`SuperBlock::flush`].
//! - **Space check**: every append verifies
//!   `current_slot + frame_slots <= MAX_SLOT` before touching any state and
//!   fails with `NoSpace` otherwise.
//!
//! ## Concurrency contract
//!
//! One handle per file, one mutator at a time. The handle keeps two
//! descriptors on the same path: an append cursor (buffered) and a read
//! descriptor used only for positional reads, so [`SuperBlock::get`] is the
//! one operation safe to run concurrently with other `get`s. Everything else
//! must be serialised by the caller. A failed flush or a failed append
//! mid-write poisons the handle; close it and recover from disk.

use crate::error::{StoreError, StoreResult};
use crate::formats::{
    byte_to_slot, frame_slots, slot_to_byte, FILE_HEADER_SIZE, HEADER_SLOT, MAX_SLOT,
    PADDING_UNIT, SUPER_BLOCK_MAGIC, SUPER_BLOCK_PADDING, SUPER_BLOCK_VERSION,
};
use crate::index::{Indexer, NeedleCacheEntry};
use crate::needle::{NeedleCodec, NeedleFlag, NeedleHeader};
use crate::volume::VolumeSink;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Handle on one append-only container file.
impl std::fmt::Debug for SuperBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperBlock")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("magic", &self.magic)
            .field("version", &self.version)
            .finish()
    }
}

pub struct SuperBlock {
    path: PathBuf,
    /// Append cursor, buffered to one max frame. `add` bypasses the buffer
    /// via `get_mut`; `write` goes through it.
    bw: BufWriter<File>,
    /// Dedicated read descriptor; positional reads never move the append
    /// cursor.
    r: File,
    codec: Arc<dyn NeedleCodec>,
    /// Scratch frame buffer, one max frame.
    scratch: Vec<u8>,
    /// Authoritative slot offset of the next append; monotonically
    /// non-decreasing.
    offset: u32,
    magic: [u8; 4],
    version: u8,
}

impl SuperBlock {
    /// Open (or create) the container at `path`.
    ///
    /// A fresh file gets the 8-byte header written; an existing file has its
    /// magic and version verified and the append cursor positioned past the
    /// header. Either way the handle starts at
    /// [`HEADER_SLOT`](crate::formats::HEADER_SLOT); run
    /// [`SuperBlock::recovery`] to move it past existing needles.
    pub fn open(path: impl Into<PathBuf>, codec: Arc<dyn NeedleCodec>) -> StoreResult<Self> {
        let path = path.into();
        let mut w = OpenOptions::new().write(true).create(true).open(&path)?;
        let mut r = OpenOptions::new().read(true).open(&path)?;
        // On failure both descriptors close on drop.
        let (magic, version) = Self::init(&mut w, &mut r)?;
        let scratch = vec![0u8; codec.max_frame_size()];
        let bw = BufWriter::with_capacity(codec.max_frame_size(), w);
        debug!(path = %path.display(), version, "opened super block");
        Ok(Self {
            path,
            bw,
            r,
            codec,
            scratch,
            offset: HEADER_SLOT,
            magic,
            version,
        })
    }

    fn init(w: &mut File, r: &mut File) -> StoreResult<([u8; 4], u8)> {
        if r.metadata()?.len() == 0 {
            w.write_all(&SUPER_BLOCK_MAGIC)?;
            w.write_all(&[SUPER_BLOCK_VERSION])?;
            w.write_all(&SUPER_BLOCK_PADDING)?;
            return Ok((SUPER_BLOCK_MAGIC, SUPER_BLOCK_VERSION));
        }
        let mut header = [0u8; FILE_HEADER_SIZE];
        r.read_exact(&mut header)?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[..SUPER_BLOCK_MAGIC.len()]);
        let version = header[SUPER_BLOCK_MAGIC.len()];
        if magic != SUPER_BLOCK_MAGIC {
            return Err(StoreError::BadMagic { actual: magic });
        }
        if version != SUPER_BLOCK_VERSION {
            return Err(StoreError::UnsupportedVersion { actual: version });
        }
        w.seek(SeekFrom::Start(FILE_HEADER_SIZE as u64))?;
        Ok((magic, version))
    }

    /// Container path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Magic bytes read back from (or written to) the file header.
    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }

    /// Format version of the open container.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Slot offset the next append will land at.
    pub fn current_slot(&self) -> u32 {
        self.offset
    }

    /// Frame the payload into the scratch buffer after the space check.
    fn stage_frame(&mut self, key: i64, cookie: i64, payload: &[u8]) -> StoreResult<u32> {
        let (padding, framed) = self.codec.frame_size(payload.len())?;
        let slots = frame_slots(framed);
        if MAX_SLOT - slots < self.offset {
            return Err(StoreError::NoSpace {
                current: self.offset,
                needed: slots,
            });
        }
        self.codec
            .encode(&mut self.scratch[..framed as usize], padding, key, cookie, payload);
        Ok(framed)
    }

    fn commit_frame(&mut self, framed: u32) -> (u32, u32) {
        let slot = self.offset;
        self.offset += frame_slots(framed);
        trace!(slot, framed, next = self.offset, "appended needle");
        (slot, framed)
    }

    /// Append one needle on the durable path.
    ///
    /// Bytes go straight to the write descriptor, so the record is observable
    /// to [`SuperBlock::get`] as soon as this returns (stable-storage
    /// durability still requires [`SuperBlock::close`] or an external fsync).
    /// Returns `(slot, framed)` for the new needle.
    ///
    /// Must not be interleaved with un-flushed [`SuperBlock::write`] calls:
    /// the direct write lands at the descriptor cursor, ahead of anything
    /// still sitting in the buffer.
    pub fn add(&mut self, key: i64, cookie: i64, payload: &[u8]) -> StoreResult<(u32, u32)> {
        let framed = self.stage_frame(key, cookie, payload)?;
        self.bw
            .get_mut()
            .write_all(&self.scratch[..framed as usize])?;
        Ok(self.commit_frame(framed))
    }

    /// Append one needle on the batched path.
    ///
    /// Bytes go through the buffered writer and become observable only after
    /// the next successful [`SuperBlock::flush`]. The returned slot offset is
    /// advanced eagerly and is dirty until that flush; if the flush fails the
    /// handle is poisoned and must be abandoned.
    pub fn write(&mut self, key: i64, cookie: i64, payload: &[u8]) -> StoreResult<(u32, u32)> {
        let framed = self.stage_frame(key, cookie, payload)?;
        self.bw.write_all(&self.scratch[..framed as usize])?;
        Ok(self.commit_frame(framed))
    }

    /// Forward buffered bytes to the write descriptor, error verbatim.
    pub fn flush(&mut self) -> StoreResult<()> {
        self.bw.flush()?;
        Ok(())
    }

    /// Rebuild the frame for `(key, cookie, payload)` and overwrite the
    /// needle at `slot` in place.
    ///
    /// Positional write: neither the append cursor nor the current slot
    /// offset moves. Operator tool for replacing a corrupt record with a
    /// known-good copy.
    pub fn repair(
        &mut self,
        key: i64,
        cookie: i64,
        payload: &[u8],
        slot: u32,
    ) -> StoreResult<()> {
        let (padding, framed) = self.codec.frame_size(payload.len())?;
        self.codec
            .encode(&mut self.scratch[..framed as usize], padding, key, cookie, payload);
        self.bw
            .get_ref()
            .write_all_at(&self.scratch[..framed as usize], slot_to_byte(slot))?;
        Ok(())
    }

    /// Read exactly `buf.len()` bytes at `slot`.
    ///
    /// The bytes are not parsed here; hand them to the codec. Safe to call
    /// concurrently with other `get`s.
    pub fn get(&self, slot: u32, buf: &mut [u8]) -> StoreResult<()> {
        self.r.read_exact_at(buf, slot_to_byte(slot))?;
        Ok(())
    }

    /// Logically delete the needle at `slot` by overwriting its flag byte.
    ///
    /// Idempotent: a second delete rewrites the same bytes. No bookkeeping
    /// changes.
    pub fn del(&mut self, slot: u32) -> StoreResult<()> {
        let at = slot_to_byte(slot) + self.codec.flag_offset();
        self.bw
            .get_ref()
            .write_all_at(self.codec.del_flag_bytes(), at)?;
        Ok(())
    }

    /// Scan every frame and emit it through the logging hook. Debug only.
    ///
    /// A torn tail is not an error; the scan simply stops at the last whole
    /// needle. Handle state is untouched.
    pub fn dump(&mut self) -> StoreResult<()> {
        debug!(path = %self.path.display(), "start super block dump");
        let mut r = &self.r;
        r.seek(SeekFrom::Start(FILE_HEADER_SIZE as u64))?;
        let mut rd = BufReader::with_capacity(self.codec.max_frame_size(), r);
        scan_needles(
            &*self.codec,
            &mut rd,
            HEADER_SLOT,
            &mut |header, slot, framed, _payload| {
                info!(slot, framed, %header, "dump");
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Rebuild the caller's in-memory index by scanning needles from byte
    /// offset `from` (`0` means "from the first needle").
    ///
    /// Every live needle is fed to `indexer` and recorded as a live entry in
    /// `needles`; deleted needles are recorded as tombstones. Inserts are
    /// unconditional, so the final entry for a key reflects the most recently
    /// appended frame.
    ///
    /// End-of-stream and a tail that no longer parses both terminate the scan
    /// as success: they are indistinguishable from a torn last append. The
    /// write cursor and the handle's slot offset are then reset to the end of
    /// the last whole needle, so the next append overwrites the torn bytes.
    /// Returns that slot offset.
    pub fn recovery(
        &mut self,
        needles: &mut HashMap<i64, NeedleCacheEntry>,
        indexer: &mut dyn Indexer,
        from: u64,
    ) -> StoreResult<u32> {
        debug!(path = %self.path.display(), from, "start super block recovery");
        let from = if from == 0 {
            FILE_HEADER_SIZE as u64
        } else {
            from
        };
        if from % u64::from(PADDING_UNIT) != 0 {
            return Err(StoreError::Unaligned {
                byte: from,
                unit: PADDING_UNIT,
            });
        }
        let mut r = &self.r;
        r.seek(SeekFrom::Start(from))?;
        let mut rd = BufReader::with_capacity(self.codec.max_frame_size(), r);
        let end_slot = scan_needles(
            &*self.codec,
            &mut rd,
            byte_to_slot(from),
            &mut |header, slot, framed, _payload| {
                match header.flag {
                    NeedleFlag::Ok => {
                        indexer.add(header.key, slot, framed)?;
                        needles.insert(header.key, NeedleCacheEntry::live(slot, framed));
                    }
                    NeedleFlag::Del => {
                        needles.insert(header.key, NeedleCacheEntry::tombstone(framed));
                    }
                }
                trace!(key = header.key, slot, framed, flag = ?header.flag, "recovered needle");
                Ok(())
            },
        )?;
        drop(rd);
        // Bytes past the last whole needle are unallocated; position the
        // append cursor to overwrite them.
        self.bw.seek(SeekFrom::Start(slot_to_byte(end_slot)))?;
        self.offset = end_slot;
        debug!(end_slot, "super block recovery complete");
        Ok(end_slot)
    }

    /// Copy every live needle into `sink`, dropping tombstones.
    ///
    /// Runs on a private read-only descriptor so it does not disturb the
    /// handle's own cursors. Parse and sink errors surface; the sink may
    /// already hold a partial copy, which is fine because compaction into an
    /// append-only sink is restartable.
    pub fn compress(&self, sink: &mut dyn VolumeSink) -> StoreResult<()> {
        debug!(path = %self.path.display(), "start super block compress");
        let mut r = OpenOptions::new().read(true).open(&self.path)?;
        r.seek(SeekFrom::Start(FILE_HEADER_SIZE as u64))?;
        let mut rd = BufReader::with_capacity(self.codec.max_frame_size(), r);
        scan_needles(
            &*self.codec,
            &mut rd,
            HEADER_SLOT,
            &mut |header, _slot, _framed, payload| {
                if header.flag == NeedleFlag::Del {
                    trace!(key = header.key, "skip deleted needle");
                    return Ok(());
                }
                sink.write(header.key, header.cookie, payload)
            },
        )?;
        sink.flush()?;
        Ok(())
    }

    /// Flush, fsync and close the container.
    ///
    /// Every step is attempted even if an earlier one fails; errors are
    /// logged rather than returned. Both descriptors close on drop.
    pub fn close(mut self) {
        if let Err(e) = self.bw.flush() {
            warn!(path = %self.path.display(), error = %e, "flush on close failed");
        }
        if let Err(e) = self.bw.get_ref().sync_all() {
            warn!(path = %self.path.display(), error = %e, "fsync on close failed");
        }
    }
}

/// Compaction target: batched appends plus a flush barrier, no index
/// maintenance. Lets one container compress straight into a fresh sibling.
impl VolumeSink for SuperBlock {
    fn write(&mut self, key: i64, cookie: i64, payload: &[u8]) -> StoreResult<()> {
        SuperBlock::write(self, key, cookie, payload)?;
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        SuperBlock::flush(self)
    }
}

/// Sequentially scan whole needle frames from `rd`, invoking `visit` with
/// `(header, slot, framed, payload)` for each, and return the slot offset one
/// past the last whole frame.
///
/// End-of-stream and parse failures terminate the scan as success: in an
/// append-only file they are indistinguishable from a torn last append.
/// IO errors other than EOF, and any error from `visit`, surface unchanged.
fn scan_needles<R: Read>(
    codec: &dyn NeedleCodec,
    rd: &mut R,
    start_slot: u32,
    visit: &mut dyn FnMut(&NeedleHeader, u32, u32, &[u8]) -> StoreResult<()>,
) -> StoreResult<u32> {
    let header_size = codec.header_size();
    let mut slot = start_slot;
    let mut hdr = vec![0u8; header_size];
    let mut body = vec![0u8; codec.max_frame_size() - header_size];
    loop {
        match rd.read_exact(&mut hdr) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(slot),
            Err(e) => return Err(e.into()),
        }
        let header = match codec.parse_header(&hdr) {
            Ok(h) => h,
            Err(StoreError::Parse(_)) => return Ok(slot),
            Err(e) => return Err(e),
        };
        let framed = match codec.frame_size(header.data_size as usize) {
            Ok((_padding, framed)) => framed,
            // A length the codec cannot frame is tail garbage.
            Err(_) => return Ok(slot),
        };
        let body_len = framed as usize - header_size;
        match rd.read_exact(&mut body[..body_len]) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(slot),
            Err(e) => return Err(e.into()),
        }
        let payload = match codec.parse_body(&header, &body[..body_len]) {
            Ok(p) => p,
            Err(StoreError::Parse(_)) => return Ok(slot),
            Err(e) => return Err(e),
        };
        visit(&header, slot, framed, payload)?;
        slot += frame_slots(framed);
    }
}
