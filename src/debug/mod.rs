//! Call-stack provenance for allocation events.
//!
//! Capture is cheap and always on for tracked allocations; rendering runs
//! only when a diagnostic is emitted.

pub(crate) mod backtrace;
pub(crate) mod render;
pub(crate) mod symbolize;

pub use self::backtrace::{Trace, DEFAULT_TRACE_DEPTH};
pub use self::render::{is_entry_point, TraceRenderer};
pub use self::symbolize::{Addr2LineSymbolizer, FrameLocation, NativeSymbolizer, Symbolizer};
