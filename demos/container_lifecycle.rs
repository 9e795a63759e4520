//! Minimal consumer walkthrough for `haystore`.
//!
//! Exercises the container lifecycle end to end:
//! - append (durable and batched paths)
//! - logical delete
//! - crash recovery (index reconstruction from disk)
//! - offline compaction into a fresh container
//!
//! Run:
//! `cargo run --example container_lifecycle`

use haystore::{MemIndexer, NeedleV1, SuperBlock};
use std::collections::HashMap;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("block.dat");

    let mut block = SuperBlock::open(&path, Arc::new(NeedleV1))?;
    let (slot_a, _) = block.add(1, 101, b"first photo")?;
    block.add(2, 102, b"second photo")?;

    // Batched path: staged in the writer until the flush barrier.
    block.write(3, 103, b"third photo")?;
    block.flush()?;

    block.del(slot_a)?;
    block.close();

    // Reopen and rebuild the in-memory index from disk.
    let mut block = SuperBlock::open(&path, Arc::new(NeedleV1))?;
    let mut needles = HashMap::new();
    let mut indexer = MemIndexer::new();
    let end = block.recovery(&mut needles, &mut indexer, 0)?;
    println!("recovered {} needles, next slot {end}", needles.len());
    for (key, entry) in &needles {
        if entry.is_tombstone() {
            println!("key {key}: deleted ({} bytes reclaimed at compaction)", entry.framed);
        } else {
            println!("key {key}: slot {} ({} bytes)", entry.slot, entry.framed);
        }
    }

    // Compact the container: live needles only, packed densely.
    let mut compacted = SuperBlock::open(tmp.path().join("compacted.dat"), Arc::new(NeedleV1))?;
    block.compress(&mut compacted)?;
    compacted.close();

    let before = std::fs::metadata(&path)?.len();
    let after = std::fs::metadata(tmp.path().join("compacted.dat"))?.len();
    println!("compacted {before} bytes down to {after}");
    Ok(())
}
