//! # Configuration Module
//!
//! This module centralizes all configuration constants for pagecast. Constants
//! are grouped by their functional area and interdependencies are documented
//! and enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The bit-packing constants, the arena geometry, and the framing bytes all
//! depend on each other: the write-index field width bounds the largest legal
//! arena, and the framing bytes must stay distinct or readers cannot tell a
//! sealed page from a message boundary. Co-locating the values with
//! compile-time checks prevents them from drifting apart.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation

pub mod constants;
pub use constants::*;
