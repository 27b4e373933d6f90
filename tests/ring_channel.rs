//! # Ring Channel Tests
//!
//! The stream-of-pages layer: rollover when pages fill, readers following
//! seals, resuming a directory left by an earlier run, handle cloning, and
//! max-pages eviction with reader overrun.
//!
//! Tiny arenas keep page boundaries a handful of messages apart, so every
//! test crosses several of them.

use std::thread;
use std::time::{Duration, Instant};

use pagecast::page::SpinPolicy;
use pagecast::ring::{channel, channel_with, RingOptions};
use tempfile::tempdir;

fn small_ring_options() -> RingOptions {
    RingOptions {
        max_pages: None,
        spin: SpinPolicy::default(),
    }
}

#[test]
fn sequential_round_trip_in_order() {
    let dir = tempdir().unwrap();
    let (mut tx, mut rx) =
        channel_with::<256>(dir.path().join("stream"), small_ring_options()).unwrap();

    for i in 0..100 {
        tx.push(format!("msg-{:03}", i)).unwrap();
    }

    for i in 0..100 {
        let msg = rx.pop().unwrap().expect("stream ended early");
        assert_eq!(msg, format!("msg-{:03}", i).into_bytes());
    }
    assert_eq!(rx.pop().unwrap(), None);

    // 100 eight-byte frames cannot fit one 256-byte page
    assert!(tx.current_page() > 0);
}

#[test]
fn single_page_stream_without_rollover() {
    let dir = tempdir().unwrap();
    let (mut tx, mut rx) = channel(dir.path().join("stream")).unwrap();

    tx.push("hello").unwrap();
    tx.push("world").unwrap();

    assert_eq!(rx.pop().unwrap(), Some(b"hello".to_vec()));
    assert_eq!(rx.pop().unwrap(), Some(b"world".to_vec()));
    assert_eq!(rx.pop().unwrap(), None);
    assert_eq!(tx.current_page(), 0);
}

#[test]
fn threaded_producer_consumer_stays_in_order() {
    const COUNT: usize = 5_000;

    let dir = tempdir().unwrap();
    let (mut tx, mut rx) =
        channel_with::<4096>(dir.path().join("stream"), small_ring_options()).unwrap();

    let producer = thread::spawn(move || {
        for i in 0..COUNT {
            tx.push(i.to_string()).unwrap();
        }
    });

    let mut received = 0;
    let started = Instant::now();
    while received < COUNT {
        assert!(
            started.elapsed() < Duration::from_secs(30),
            "consumer stalled at {} of {}",
            received,
            COUNT
        );
        match rx.pop().unwrap() {
            Some(msg) => {
                assert_eq!(msg, received.to_string().into_bytes());
                received += 1;
            }
            None => thread::yield_now(),
        }
    }

    producer.join().unwrap();
    assert_eq!(rx.pop().unwrap(), None);
}

#[test]
fn reopened_directory_resumes_the_stream() {
    let dir = tempdir().unwrap();
    let stream_dir = dir.path().join("stream");

    {
        let (mut tx, _rx) = channel_with::<256>(stream_dir.clone(), small_ring_options()).unwrap();
        for i in 0..40 {
            tx.push(format!("first-run-{}", i)).unwrap();
        }
    }

    // a new process arrives: reader starts at the oldest page on disk
    let (mut tx, mut rx) = channel_with::<256>(stream_dir, small_ring_options()).unwrap();
    tx.push("second-run").unwrap();

    for i in 0..40 {
        assert_eq!(
            rx.pop().unwrap().expect("lost a first-run message"),
            format!("first-run-{}", i).into_bytes()
        );
    }
    assert_eq!(rx.pop().unwrap(), Some(b"second-run".to_vec()));
    assert_eq!(rx.pop().unwrap(), None);
}

#[test]
fn cloned_writers_share_rollover_and_lose_nothing() {
    const PER_WRITER: usize = 50;

    let dir = tempdir().unwrap();
    let (tx, mut rx) =
        channel_with::<128>(dir.path().join("stream"), small_ring_options()).unwrap();

    let mut tx_a = tx.try_clone().unwrap();
    let mut tx_b = tx.try_clone().unwrap();

    let a = thread::spawn(move || {
        for i in 0..PER_WRITER {
            tx_a.push(format!("a-{:02}", i)).unwrap();
        }
    });
    let b = thread::spawn(move || {
        for i in 0..PER_WRITER {
            tx_b.push(format!("b-{:02}", i)).unwrap();
        }
    });
    a.join().unwrap();
    b.join().unwrap();

    let mut messages = Vec::new();
    while let Some(msg) = rx.pop().unwrap() {
        messages.push(msg);
    }
    assert_eq!(messages.len(), 2 * PER_WRITER);

    // each producer's own messages arrive in its push order
    for prefix in [b'a', b'b'] {
        let seen: Vec<_> = messages.iter().filter(|m| m[0] == prefix).collect();
        for (i, msg) in seen.iter().enumerate() {
            assert_eq!(**msg, format!("{}-{:02}", prefix as char, i).into_bytes());
        }
        assert_eq!(seen.len(), PER_WRITER);
    }
}

#[test]
fn cloned_reader_is_an_independent_cursor() {
    let dir = tempdir().unwrap();
    let (mut tx, mut rx) =
        channel_with::<256>(dir.path().join("stream"), small_ring_options()).unwrap();

    for i in 0..10 {
        tx.push(format!("n-{}", i)).unwrap();
    }

    for i in 0..5 {
        assert_eq!(rx.pop().unwrap(), Some(format!("n-{}", i).into_bytes()));
    }

    let mut rx2 = rx.try_clone().unwrap();
    for i in 5..10 {
        let expected = Some(format!("n-{}", i).into_bytes());
        assert_eq!(rx.pop().unwrap(), expected);
        assert_eq!(rx2.pop().unwrap(), expected);
    }
    assert_eq!(rx.pop().unwrap(), None);
    assert_eq!(rx2.pop().unwrap(), None);
}

#[test]
fn eviction_unlinks_old_pages_and_overruns_the_reader() {
    let dir = tempdir().unwrap();
    let stream_dir = dir.path().join("stream");
    let options = RingOptions {
        max_pages: Some(2),
        spin: SpinPolicy::default(),
    };
    let (mut tx, mut rx) = channel_with::<64>(stream_dir.clone(), options).unwrap();

    // 4-byte frames, 15 per 64-byte page: pages 0..=6, only {5, 6} survive
    for i in 0..100 {
        tx.push(format!("m{:02}", i)).unwrap();
    }
    assert_eq!(tx.current_page(), 6);

    let mut live: Vec<String> = std::fs::read_dir(&stream_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    live.sort();
    assert_eq!(live, vec!["5.page.bin", "6.page.bin"]);

    // the reader still holds a mapping of unlinked page 0, drains it, then
    // skips to the oldest live page instead of resurrecting dead files
    let mut seen = Vec::new();
    while let Some(msg) = rx.pop().unwrap() {
        seen.push(String::from_utf8(msg).unwrap());
    }

    let mut expected: Vec<String> = (0..15).map(|i| format!("m{:02}", i)).collect();
    expected.extend((75..100).map(|i| format!("m{:02}", i)));
    assert_eq!(seen, expected);
}
