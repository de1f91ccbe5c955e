//! Public API for memtrack.
//!
//! [`Tracker`](tracker::Tracker) is the entry point; the remaining modules
//! hold the types it takes and returns.

pub mod category;
pub mod config;
pub mod entry;
pub mod error;
pub mod stats;
pub mod tracker;
