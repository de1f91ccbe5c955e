//! # memtrack
//!
//! Lifecycle-tracking allocator wrapper for engine code that manages raw
//! memory by hand.
//!
//! ## Features
//!
//! - Every allocate, reallocate and free is recorded with a stack trace
//! - Double frees, frees of unknown pointers and reused live addresses are
//!   reported with the provenance of every event involved
//! - Exit-time leak sweep grouped by allocation category
//! - Pluggable underlying allocator (libc by default)
//! - Generic open-addressing hash map (SipHash-2-4, linear probing,
//!   tombstones) with key/value policies, usable on its own
//! - Diagnostics to stderr, the `log` facade, or an in-memory collector
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memtrack::{Category, Tracker, TrackerConfig};
//!
//! let mut tracker = Tracker::with_config(TrackerConfig::from_env());
//!
//! let block = tracker.allocate(256, Category::Render)?;
//! let block = unsafe { tracker.reallocate(block.as_ptr(), 512, Category::Render)? };
//! unsafe { tracker.free(block.as_ptr())? };
//!
//! let leaks = tracker.shutdown();
//! println!("{}", leaks);
//! # Ok::<(), memtrack::TrackError>(())
//! ```

pub mod api;
pub mod debug;
pub mod diagnostics;
pub mod map;

mod allocators;
mod util;

// Re-export public API at crate root for convenience
pub use api::category::Category;
pub use api::config::TrackerConfig;
pub use api::entry::{AllocationEntry, EntryState};
pub use api::error::TrackError;
pub use api::stats::{CategoryUsage, LeakReport, UsageReport};
pub use api::tracker::Tracker;

// Underlying allocators
pub use allocators::{RawAllocator, SystemAllocator, MIN_ALIGN};

// Hash map
pub use map::{Map, MapError, MapSeed, PtrMap, StrMap};

// Stack traces
pub use debug::{Symbolizer, Trace, TraceRenderer};

// Diagnostics
pub use diagnostics::{CollectingSink, DiagnosticSink, LogSink, StderrSink};
pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticLevel, FatalMode};
pub use diagnostics::{MT001, MT002, MT003, MT101, MT201, MT202, MT203, MT901, MT902};
