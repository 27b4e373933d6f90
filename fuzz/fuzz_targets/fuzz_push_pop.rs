//! Fuzz testing for push/pop round-trips.
//!
//! Applies an arbitrary operation sequence against two pages (one per
//! framing) and checks that every committed payload is read back
//! byte-for-byte in commit order, and that scan-framed pushes reject
//! payloads containing the terminator byte.

#![no_main]

use std::collections::VecDeque;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use pagecast::page::{Page, PopResult, PushResult};

const ARENA: usize = 2048;

#[derive(Debug, Arbitrary)]
enum Operation {
    Push(Vec<u8>),
    PushPrefixed(Vec<u8>),
    Pop,
    PopPrefixed,
}

fuzz_target!(|operations: Vec<Operation>| {
    let dir = tempfile::tempdir().unwrap();
    let scan_page = Page::<ARENA>::open(dir.path().join("scan.page.bin")).unwrap();
    let prefixed_page = Page::<ARENA>::open(dir.path().join("prefixed.page.bin")).unwrap();

    let mut scan_expected: VecDeque<Vec<u8>> = VecDeque::new();
    let mut prefixed_expected: VecDeque<Vec<u8>> = VecDeque::new();
    let mut scan_cursor = 0;
    let mut prefixed_cursor = 0;

    for op in operations {
        match op {
            Operation::Push(payload) => match scan_page.push(&payload) {
                Ok(PushResult::Written(advance)) => {
                    assert_eq!(advance, payload.len() + 1);
                    scan_expected.push_back(payload);
                }
                Ok(PushResult::PageFull) => {}
                Err(_) => {
                    assert!(
                        payload.contains(&0xFF)
                            || payload.first() == Some(&0xFD)
                            || payload.len() > Page::<ARENA>::MAX_PAYLOAD
                    );
                }
            },
            Operation::PushPrefixed(payload) => match prefixed_page.push_prefixed(&payload) {
                Ok(PushResult::Written(_)) => prefixed_expected.push_back(payload),
                Ok(PushResult::PageFull) => {}
                Err(_) => {
                    assert!(payload.len() > Page::<ARENA>::MAX_PREFIXED_PAYLOAD);
                }
            },
            Operation::Pop => match scan_page.pop(scan_cursor).unwrap() {
                PopResult::Msg { payload, advance } => {
                    let expected = scan_expected.pop_front().expect("unexpected message");
                    assert_eq!(payload, expected);
                    scan_cursor += advance;
                }
                PopResult::Empty | PopResult::Finished => {
                    assert!(scan_expected.is_empty());
                }
                PopResult::TimedOut => unreachable!("no writer is in flight"),
            },
            Operation::PopPrefixed => match prefixed_page.pop_prefixed(prefixed_cursor).unwrap() {
                PopResult::Msg { payload, advance } => {
                    let expected = prefixed_expected.pop_front().expect("unexpected message");
                    assert_eq!(payload, expected);
                    prefixed_cursor += advance;
                }
                PopResult::Empty | PopResult::Finished => {
                    assert!(prefixed_expected.is_empty());
                }
                PopResult::TimedOut => unreachable!("no writer is in flight"),
            },
        }
    }
});
