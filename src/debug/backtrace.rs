//! Raw stack capture.
//!
//! Capturing only walks the stack and records return addresses. Turning them
//! into text is deferred to [`TraceRenderer`](super::render::TraceRenderer),
//! which only runs on diagnostic paths.

/// Default number of frames kept per lifecycle event.
pub const DEFAULT_TRACE_DEPTH: usize = 32;

/// Upper bound on frames the unwinder and `capture` put above the caller.
const UNWINDER_FRAMES: usize = 16;

/// Return addresses captured at one point in time, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Trace {
    frames: Vec<usize>,
}

impl Trace {
    /// Capture up to `max_depth` frames, starting at the caller of `capture`.
    ///
    /// Frames belonging to the unwinder and to `capture` itself are never
    /// recorded. `skip` drops that many more frames, starting with the caller.
    #[inline(never)]
    pub fn capture(max_depth: usize, skip: usize) -> Self {
        if max_depth == 0 {
            return Self::default();
        }

        let own = Self::capture as usize;
        let limit = max_depth
            .saturating_add(skip)
            .saturating_add(UNWINDER_FRAMES);
        let mut walked = Vec::with_capacity(limit.min(DEFAULT_TRACE_DEPTH + UNWINDER_FRAMES));
        let mut caller = None;
        backtrace::trace(|frame| {
            if caller.is_none() && frame.symbol_address() as usize == own {
                caller = Some(walked.len() + 1);
            }
            walked.push(frame.ip() as usize);
            walked.len() < limit
        });

        // Unwinders that cannot report function starts leave `caller` unset.
        let start = caller.unwrap_or(0).saturating_add(skip);
        let frames = walked.into_iter().skip(start).take(max_depth).collect();
        Self { frames }
    }

    /// Build a trace from known addresses (newest first).
    pub fn from_frames(frames: Vec<usize>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[usize] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
