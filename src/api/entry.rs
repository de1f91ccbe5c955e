//! Per-pointer lifecycle records.

use std::fmt;

use crate::api::category::Category;
use crate::debug::Trace;

/// Lifecycle state of a tracked pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    Allocated,
    Freed,
    Reallocated,
}

impl EntryState {
    /// Whether the memory is still owned by the application.
    pub fn is_live(&self) -> bool {
        !matches!(self, EntryState::Freed)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryState::Allocated => "allocated",
            EntryState::Freed => "freed",
            EntryState::Reallocated => "reallocated",
        })
    }
}

/// Everything known about one address handed out by the tracker.
///
/// Freed entries stay in the table so a second free of the same address is
/// recognized, until the allocator hands the address out again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationEntry {
    pub ptr: usize,
    pub size: usize,
    pub state: EntryState,
    pub category: Category,
    pub alloc_trace: Trace,
    pub free_trace: Option<Trace>,
    pub realloc_traces: Vec<Trace>,
}

impl AllocationEntry {
    pub(crate) fn new(ptr: usize, size: usize, category: Category, alloc_trace: Trace) -> Self {
        Self {
            ptr,
            size,
            state: EntryState::Allocated,
            category,
            alloc_trace,
            free_trace: None,
            realloc_traces: Vec::new(),
        }
    }

    pub(crate) fn mark_freed(&mut self, trace: Trace) {
        self.state = EntryState::Freed;
        self.free_trace = Some(trace);
    }

    pub(crate) fn mark_reallocated(&mut self, trace: Trace) {
        self.state = EntryState::Reallocated;
        self.realloc_traces.push(trace);
    }
}

impl fmt::Display for AllocationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x} ({} bytes, {}, {})",
            self.ptr, self.size, self.category, self.state
        )
    }
}
