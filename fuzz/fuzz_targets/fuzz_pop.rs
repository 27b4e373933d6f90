//! Fuzz testing for the pop frame parsers.
//!
//! This fuzz target hands both pop variants arbitrary arena contents with an
//! arbitrary committed prefix to ensure malformed frames surface as errors,
//! never as panics, hangs, or out-of-bounds reads.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use pagecast::config::{FORMAT_STAMP, HEADER_SIZE};
use pagecast::page::{Page, PopResult};

const ARENA: usize = 4096;

#[derive(Debug, Arbitrary)]
struct PopInput {
    arena: Vec<u8>,
    write_index: u16,
    prefixed: bool,
}

fn craft_page_file(path: &std::path::Path, write_index: usize, arena: &[u8]) {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + ARENA);
    bytes.extend_from_slice(&FORMAT_STAMP.to_ne_bytes());
    bytes.extend_from_slice(&write_index.to_ne_bytes());
    bytes.extend_from_slice(&0usize.to_ne_bytes());
    bytes.extend_from_slice(&arena[..arena.len().min(ARENA)]);
    bytes.resize(HEADER_SIZE + ARENA, 0);
    std::fs::write(path, bytes).unwrap();
}

fuzz_target!(|input: PopInput| {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("0.page.bin");
    craft_page_file(&path, input.write_index as usize % (ARENA + 1), &input.arena);

    let page = Page::<ARENA>::open(&path).unwrap();

    let mut cursor = 0;
    for _ in 0..ARENA {
        let outcome = if input.prefixed {
            page.pop_prefixed(cursor)
        } else {
            page.pop(cursor)
        };

        match outcome {
            Ok(PopResult::Msg { payload, advance }) => {
                assert!(advance > payload.len());
                cursor += advance;
            }
            Ok(PopResult::Empty) | Ok(PopResult::Finished) | Ok(PopResult::TimedOut) => break,
            Err(_) => break,
        }
    }
});
