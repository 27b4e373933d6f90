//! # pagecast - Lock-Free Broadcast over Memory-Mapped Pages
//!
//! pagecast is an inter-process, multi-producer / multi-consumer broadcast
//! channel whose backing store is a sequence of memory-mapped files on a
//! shared filesystem. Producers append variable-length byte messages; every
//! consumer independently reads the full stream from its own cursor. This
//! Rust implementation prioritizes:
//!
//! - **Lock-free hot paths**: push and pop never take a mutex or a kernel
//!   wait object - one atomic word per page coordinates everything
//! - **Zero-copy reads**: pop hands out slices aliasing the mapping
//! - **Cheap fan-out**: any number of readers in any number of processes,
//!   each with nothing but a byte cursor
//!
//! The trade is disk: pages are big (~62 MiB by default, created sparse)
//! and a slow reader may be overrun once old pages are evicted.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pagecast::ring::channel;
//!
//! let (mut tx, mut rx) = channel("./stream")?;
//!
//! tx.push("hello")?;
//!
//! while let Some(msg) = rx.pop()? {
//!     println!("{}", String::from_utf8_lossy(&msg));
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Ring (Writer / Reader handles)    │   page rollover, eviction
//! ├─────────────────────────────────────┤
//! │   Page (push / pop protocol)        │   reservation + commit, framing
//! ├─────────────────────────────────────┤
//! │   Atomic header (1 coordination     │   writer-count ‖ write-index,
//! │   word + safe_end cache)            │   acquire/release discipline
//! ├─────────────────────────────────────┤
//! │   Memory-mapped page files          │   MAP_SHARED across processes
//! └─────────────────────────────────────┘
//! ```
//!
//! A page is sealed forever the first time an append does not fit; writers
//! roll to the next numbered file and readers follow. Ordering across
//! concurrent writers is exactly atomic-reservation order - the only
//! well-defined one. Messages never span pages.
//!
//! ## What This Is Not
//!
//! No durability story (no fsync ordering), no per-message acknowledgement,
//! no back-pressure on slow readers. All cooperating processes must share
//! word width and byte order; pages stamp both and refuse mismatched opens.
//!
//! ## Module Overview
//!
//! - [`page`]: the lock-free page append log (the core)
//! - [`ring`]: writer/reader handles over a directory of pages
//! - [`config`]: every constant, with the dependency graph documented

pub mod config;
pub mod page;
pub mod ring;

pub use page::{Page, PopResult, PushResult, SpinPolicy};
pub use ring::{channel, channel_with, Reader, RingOptions, Writer};
