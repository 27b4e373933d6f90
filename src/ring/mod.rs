//! # Ring Module
//!
//! Sequences page files in one directory into an endless broadcast stream.
//! Writers that fill a page roll forward to the next sequence number;
//! readers that hit a sealed page follow. With a page cap configured, the
//! oldest files are unlinked as new ones appear - slow readers then skip
//! ahead rather than stall the stream (overrun is the documented trade).
//!
//! All cross-process coordination still happens inside the pages; the ring
//! only decides which page file is current. The handle types here keep a
//! little process-local bookkeeping (the highest page number seen) under a
//! read-write lock, never touched on the per-message hot path once a page
//! is open.
//!
//! ## Directory Layout
//!
//! ```text
//! stream_dir/
//! ├── 0.page.bin
//! ├── 1.page.bin
//! └── 2.page.bin      # current write head
//! ```

mod channel;

pub use channel::{channel, channel_with, Reader, RingOptions, Writer};
