#![no_main]

use haystore::{MemIndexer, NeedleV1, SuperBlock};
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes after a valid file header: recovery must stop cleanly
    // at the first unparseable frame, never panic.
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0xab, 0xcd, 0xef, 0x00, 0x01, 0x00, 0x00, 0x00])
        .unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();

    let Ok(mut block) = SuperBlock::open(file.path(), Arc::new(NeedleV1)) else {
        return;
    };
    let mut needles = HashMap::new();
    let mut ix = MemIndexer::new();
    let _ = block.recovery(&mut needles, &mut ix, 0);
});
