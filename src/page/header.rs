//! # Page Header and State Word Discipline
//!
//! Every page file begins with three machine words, each only ever touched
//! through atomic operations on the shared mapping:
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  ------------------------------------------------
//! 0       W     ready      Format stamp (word width + layout magic)
//! W       W     state      writer-count (high 8 bits) | write-index (low bits)
//! 2W      W     safe_end   Monotone cache of a known fully-committed prefix
//! ```
//!
//! ## The State Word
//!
//! A single word carries both the number of in-flight writers and the next
//! free arena offset. A push reserves its byte range and announces itself in
//! one `fetch_add` of `WRITER_ONE + advance`; the commit is a `fetch_sub` of
//! `WRITER_ONE` with release ordering. A reader that acquire-loads the word
//! and sees a zero writer-count therefore synchronizes-with every commit in
//! the prefix `[0, write-index)`: all body bytes and terminators in that
//! range are visible. Splitting the two fields across separate atomics would
//! destroy exactly that guarantee.
//!
//! ## safe_end
//!
//! A hint, never an authority. Readers publish each quiescent write-index
//! they observe via `fetch_max`, so the cache only ever grows and always
//! trails the true committed prefix. A reader whose cursor sits below the
//! hint can skip the quiescence spin entirely.
//!
//! ## The Ready Word
//!
//! Zero from `ftruncate` means "never opened". The first open CASes in
//! [`FORMAT_STAMP`](crate::config::FORMAT_STAMP); later opens verify it.
//! Because the stamp encodes the word width and is stored native-endian, a
//! process that disagrees on either reads junk here and fails fast instead
//! of mis-framing the arena.

use std::sync::atomic::{AtomicUsize, Ordering};

use eyre::{ensure, Result};

use crate::config::{FORMAT_STAMP, WRITER_COUNT_SHIFT, WRITE_INDEX_MASK};

#[inline(always)]
pub(crate) fn write_index(state: usize) -> usize {
    state & WRITE_INDEX_MASK
}

#[inline(always)]
pub(crate) fn writer_count(state: usize) -> usize {
    state >> WRITER_COUNT_SHIFT
}

/// True while any writer sits between reservation and commit.
///
/// The mask complement must be bitwise (`!WRITE_INDEX_MASK`): the high-bits
/// test is the entire quiescence check.
#[inline(always)]
pub(crate) fn has_writers(state: usize) -> bool {
    state & !WRITE_INDEX_MASK != 0
}

#[repr(C)]
pub(crate) struct PageHeader {
    ready: AtomicUsize,
    state: AtomicUsize,
    safe_end: AtomicUsize,
}

const _: () = assert!(size_of::<PageHeader>() == crate::config::HEADER_SIZE);

impl PageHeader {
    /// Installs the format stamp on a fresh page, or verifies it on a page
    /// some process already stamped. Concurrent first opens race benignly:
    /// every process CASes the same value.
    pub(crate) fn check_format(&self) -> Result<()> {
        match self
            .ready
            .compare_exchange(0, FORMAT_STAMP, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(found) => {
                ensure!(
                    found == FORMAT_STAMP,
                    "format stamp mismatch: found {:#x}, expected {:#x} (page written by a process with a different word width or byte order?)",
                    found,
                    FORMAT_STAMP
                );
                Ok(())
            }
        }
    }

    /// Reserves `advance` arena bytes and registers one in-flight writer in a
    /// single atomic step. Returns the prior state word; the caller's
    /// exclusive range starts at `write_index(prior)`.
    #[inline(always)]
    pub(crate) fn reserve(&self, advance: usize) -> usize {
        self.state
            .fetch_add(crate::config::WRITER_ONE + advance, Ordering::Relaxed)
    }

    /// Drops this writer's in-flight registration. The release ordering is
    /// the commit: it pairs with the acquire load in the reader's quiescence
    /// spin, publishing every arena byte written before it.
    #[inline(always)]
    pub(crate) fn release_writer(&self) {
        // an unpaired release would underflow into the write-index field
        debug_assert!(writer_count(self.state.load(Ordering::Relaxed)) > 0);
        self.state
            .fetch_sub(crate::config::WRITER_ONE, Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn load_state_acquire(&self) -> usize {
        self.state.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn safe_end_hint(&self) -> usize {
        self.safe_end.load(Ordering::Relaxed)
    }

    /// Publishes a quiescent write-index observation. `fetch_max` keeps the
    /// hint monotone even when racing readers publish out of order.
    #[inline(always)]
    pub(crate) fn publish_safe_end(&self, end: usize) {
        self.safe_end.fetch_max(end, Ordering::Relaxed);
    }
}

#[cfg(test)]
impl PageHeader {
    fn zeroed() -> Self {
        Self {
            ready: AtomicUsize::new(0),
            state: AtomicUsize::new(0),
            safe_end: AtomicUsize::new(0),
        }
    }
}
