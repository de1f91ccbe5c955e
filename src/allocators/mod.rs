//! Allocation backends.
//!
//! The tracker never manages memory itself; it delegates to a
//! [`RawAllocator`]. **These are the only modules that call into libc
//! allocation.**

pub(crate) mod system;

pub use system::{RawAllocator, SystemAllocator, MIN_ALIGN};
