//! Tracker errors.

use crate::map::MapError;

/// Errors returned by [`Tracker`](crate::Tracker) operations.
///
/// The fatal variants (`DoubleFree`, `UntrackedFree`, `MemoryCorruption`,
/// `Map(CapacityOverflow)`) only reach the caller under
/// [`FatalMode::Return`](crate::FatalMode::Return); otherwise the process
/// stops after the report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    #[error("double free of {addr:#x}")]
    DoubleFree { addr: usize },

    #[error("free of untracked pointer {addr:#x}")]
    UntrackedFree { addr: usize },

    #[error("reallocation of untracked pointer {addr:#x}")]
    UntrackedRealloc { addr: usize },

    #[error("memory corruption: {addr:#x} handed out while still live")]
    MemoryCorruption { addr: usize },

    #[error("underlying allocator failed to provide {size} bytes")]
    OutOfMemory { size: usize },

    #[error("allocation size overflow ({count} x {size})")]
    SizeOverflow { count: usize, size: usize },

    #[error("tracking table: {0}")]
    Map(#[from] MapError),
}

impl TrackError {
    /// Whether this error is reported as fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TrackError::DoubleFree { .. }
                | TrackError::UntrackedFree { .. }
                | TrackError::MemoryCorruption { .. }
                | TrackError::Map(MapError::CapacityOverflow { .. })
        )
    }
}
