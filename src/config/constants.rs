//! # Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Constants that depend
//! on each other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! The following diagram shows how constants relate to each other. When changing
//! any constant, check if dependent constants need adjustment.
//!
//! ```text
//! WRITER_COUNT_BITS (8)
//!       │
//!       ├─> WRITER_ONE (derived: 1 << (usize::BITS - 8))
//!       │     One unit in the writer-count field of the state word. A push
//!       │     reservation adds WRITER_ONE plus its byte advance in a single
//!       │     fetch_add; the commit subtracts WRITER_ONE with release ordering.
//!       │
//!       ├─> WRITE_INDEX_MASK (derived: WRITER_ONE - 1)
//!       │     Low-bit mask extracting the next free arena offset.
//!       │
//!       └─> MAX_ARENA_SIZE (derived: WRITE_INDEX_MASK / 2)
//!             Failed reservations still advance the write-index, so the
//!             index field needs headroom beyond the arena itself. Half the
//!             field keeps wraparound unreachable in practice.
//!
//! HEADER_SIZE (3 machine words)
//!       │
//!       └─> page file size = HEADER_SIZE + arena size
//!
//! TERMINATOR_BYTE (0xFF) / FULL_SENTINEL_BYTE (0xFD)
//!       Must stay distinct: a reader classifies the byte at its cursor as
//!       either the start of a frame or the seal mark, never both.
//! ```
//!
//! ## Critical Invariants
//!
//! These invariants are enforced by compile-time assertions:
//!
//! 1. `WRITER_ONE` is a single bit (the writer-count field is well-formed)
//! 2. `TERMINATOR_BYTE != FULL_SENTINEL_BYTE` (frame ends and seals are distinguishable)
//! 3. `DEFAULT_ARENA_SIZE <= MAX_ARENA_SIZE` on 64-bit targets
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use crate::config::{DEFAULT_ARENA_SIZE, WRITE_INDEX_MASK};
//! ```

// ============================================================================
// STATE WORD BIT-PACKING
// These constants are tightly coupled - changing one may require changing others
// ============================================================================

/// Number of high bits of the state word that count in-flight writers.
///
/// Up to 255 concurrent writers per page; the remaining low bits carry the
/// next free arena offset. Packing both into one word lets a reader learn
/// "are any writers in flight, and how far has the arena advanced" from a
/// single atomic load.
pub const WRITER_COUNT_BITS: u32 = 8;

/// One unit in the writer-count field.
pub const WRITER_ONE: usize = 1 << (usize::BITS - WRITER_COUNT_BITS);

/// Mask extracting the write-index (low) field of the state word.
pub const WRITE_INDEX_MASK: usize = WRITER_ONE - 1;

/// Shift extracting the writer-count (high) field of the state word.
pub const WRITER_COUNT_SHIFT: u32 = usize::BITS - WRITER_COUNT_BITS;

const _: () = assert!(
    WRITER_ONE.count_ones() == 1,
    "WRITER_ONE must be a single bit separating the two state-word fields"
);

// ============================================================================
// PAGE GEOMETRY
// ============================================================================

/// Size of the atomic coordination header at the front of every page file:
/// three machine words (`ready`, `state`, `safe_end`).
pub const HEADER_SIZE: usize = 3 * size_of::<usize>();

/// Default arena size in bytes (~62 MiB).
///
/// Big pages trade disk for throughput: fewer rollovers, longer uninterrupted
/// append runs. Page files are created sparse, so unused tail bytes cost no
/// actual disk space until written.
pub const DEFAULT_ARENA_SIZE: usize = 4096 * 16_000;

/// Smallest arena worth mapping: one payload byte plus the reserved seal slot.
pub const MIN_ARENA_SIZE: usize = 2;

/// Largest arena the write-index field can serve.
///
/// Overflowing pushes advance the write-index without ever rolling it back,
/// so the field must out-range the arena by a wide margin or a hammered full
/// page could wrap the index into the writer-count field.
pub const MAX_ARENA_SIZE: usize = WRITE_INDEX_MASK / 2;

#[cfg(target_pointer_width = "64")]
const _: () = assert!(
    DEFAULT_ARENA_SIZE <= MAX_ARENA_SIZE,
    "DEFAULT_ARENA_SIZE must fit the write-index field"
);

// ============================================================================
// FRAMING BYTES
// ============================================================================

/// Byte terminating every committed message body.
///
/// Scan-framed payloads must not contain this byte; `Page::push` rejects them.
/// The length-prefixed variant has no such restriction.
pub const TERMINATOR_BYTE: u8 = 0xFF;

/// Byte stamped at the failed reservation offset when a push finds the page
/// full. A reader hitting it at its cursor treats the page as sealed.
pub const FULL_SENTINEL_BYTE: u8 = 0xFD;

/// Width of the big-endian length word in the length-prefixed framing.
pub const LENGTH_PREFIX_SIZE: usize = size_of::<usize>();

const _: () = assert!(
    TERMINATOR_BYTE != FULL_SENTINEL_BYTE,
    "frame ends and page seals must be distinguishable"
);

// ============================================================================
// FORMAT STAMP
// ============================================================================

/// Value installed in the `ready` header word when a page file is first
/// opened, and verified on every subsequent open.
///
/// The stamp folds in `usize::BITS` and is stored native-endian, so a process
/// with a different word width or byte order reads a different value and the
/// open fails instead of silently mis-framing the arena. All cooperating
/// processes must agree on word width and endianness; this turns that
/// deployment invariant into a checked one.
pub const FORMAT_STAMP: usize = (0x5043_5354 << 8) | usize::BITS as usize;

const _: () = assert!(FORMAT_STAMP != 0, "zero means an unstamped page");
