//! What happens after a fatal diagnostic has been emitted.
//!
//! - Abort: stop the process immediately (default)
//! - Panic: unwind, so tests can use `#[should_panic]`
//! - Return: hand the error back to the caller

use super::kind::Diagnostic;

/// Behavior after a fatal diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalMode {
    /// Call `std::process::abort` after emitting.
    #[default]
    Abort,
    /// Panic with the diagnostic headline.
    Panic,
    /// Return the error to the caller and keep running.
    Return,
}

impl FatalMode {
    /// Parse a mode name as used by the `MEMTRACK_FATAL` variable.
    ///
    /// - "abort" or "0" -> Abort
    /// - "panic" or "1" -> Panic
    /// - "return" or "2" -> Return
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "0" | "abort" => Some(Self::Abort),
            "1" | "panic" => Some(Self::Panic),
            "2" | "return" | "report" => Some(Self::Return),
            _ => None,
        }
    }

    /// Read the mode from `MEMTRACK_FATAL`, if set and valid.
    pub fn from_env() -> Option<Self> {
        std::env::var("MEMTRACK_FATAL")
            .ok()
            .and_then(|val| Self::parse(&val))
    }

    /// Escalate an already-emitted fatal diagnostic.
    ///
    /// Returns only in `Return` mode.
    pub fn escalate(&self, diag: &Diagnostic) {
        match self {
            Self::Abort => std::process::abort(),
            Self::Panic => panic!("[memtrack][{}] {}", diag.code, diag.message),
            Self::Return => {}
        }
    }
}
