//! Tracker configuration.

use crate::debug::DEFAULT_TRACE_DEPTH;
use crate::diagnostics::FatalMode;
use crate::map::{MapSeed, DEFAULT_CAPACITY};

/// Configuration for the tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Record allocations (false = pass straight through to the allocator)
    pub tracking: bool,

    /// Frames kept per allocate/reallocate/free event (default: 32)
    pub trace_depth: usize,

    /// What to do after a fatal report (default: abort)
    pub fatal_mode: FatalMode,

    /// Initial capacity of the tracking table (default: 16)
    pub map_capacity: usize,

    /// SipHash seed for the tracking table
    pub seed: MapSeed,

    /// Emit every allocation's rendered trace at debug level
    pub trace_allocations: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracking: true,
            trace_depth: DEFAULT_TRACE_DEPTH,
            fatal_mode: FatalMode::Abort,
            map_capacity: DEFAULT_CAPACITY,
            seed: MapSeed::FIXED,
            trace_allocations: false,
        }
    }
}

impl TrackerConfig {
    /// Config for tests: fatal errors are returned instead of aborting.
    pub fn testing() -> Self {
        Self {
            fatal_mode: FatalMode::Return,
            trace_depth: 16,
            ..Self::default()
        }
    }

    /// Config with tracking disabled.
    pub fn passthrough() -> Self {
        Self {
            tracking: false,
            ..Self::default()
        }
    }

    /// Defaults overridden from the environment.
    ///
    /// - `MEMTRACK_TRACK`: "0"/"false"/"off" disables tracking
    /// - `MEMTRACK_FATAL`: see [`FatalMode::parse`]
    /// - `MEMTRACK_TRACE_DEPTH`: frames per event
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MEMTRACK_TRACK") {
            config.tracking = !matches!(
                val.trim().to_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            );
        }
        if let Some(mode) = FatalMode::from_env() {
            config.fatal_mode = mode;
        }
        if let Some(depth) = std::env::var("MEMTRACK_TRACE_DEPTH")
            .ok()
            .and_then(|val| val.trim().parse().ok())
        {
            config.trace_depth = depth;
        }

        config
    }

    /// Builder pattern: enable or disable tracking.
    pub fn with_tracking(mut self, enable: bool) -> Self {
        self.tracking = enable;
        self
    }

    /// Builder pattern: set trace depth.
    pub fn with_trace_depth(mut self, depth: usize) -> Self {
        self.trace_depth = depth;
        self
    }

    /// Builder pattern: set fatal mode.
    pub fn with_fatal_mode(mut self, mode: FatalMode) -> Self {
        self.fatal_mode = mode;
        self
    }

    /// Builder pattern: set initial table capacity.
    pub fn with_map_capacity(mut self, capacity: usize) -> Self {
        self.map_capacity = capacity;
        self
    }

    /// Builder pattern: set the table seed.
    pub fn with_seed(mut self, seed: MapSeed) -> Self {
        self.seed = seed;
        self
    }

    /// Builder pattern: log each allocation's trace.
    pub fn with_trace_allocations(mut self, enable: bool) -> Self {
        self.trace_allocations = enable;
        self
    }
}
