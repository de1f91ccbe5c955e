//! Diagnostic emission backends.
//!
//! Handles outputting diagnostics to stderr, the `log` facade, or an
//! in-memory collector.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use super::kind::{Diagnostic, DiagnosticCode, DiagnosticLevel};

const RESET_COLOR: &str = "\x1b[0m";

/// A diagnostic sink trait for custom output.
pub trait DiagnosticSink {
    /// Handle a diagnostic.
    fn emit(&self, diag: &Diagnostic);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Rc<S> {
    fn emit(&self, diag: &Diagnostic) {
        (**self).emit(diag)
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &S {
    fn emit(&self, diag: &Diagnostic) {
        (**self).emit(diag)
    }
}

/// Writes leveled, optionally colored lines to stderr.
#[derive(Debug, Clone)]
pub struct StderrSink {
    min_level: DiagnosticLevel,
    color: bool,
}

impl StderrSink {
    /// Create a sink that prints everything at or above `min_level`.
    pub fn new(min_level: DiagnosticLevel, color: bool) -> Self {
        Self { min_level, color }
    }

    /// Default sink, with color disabled when `NO_COLOR` is set.
    pub fn from_env() -> Self {
        let color = std::env::var_os("NO_COLOR").is_none();
        Self::new(DiagnosticLevel::Info, color)
    }

    /// Format the headline prefix, e.g. `WARN: ` wrapped in color codes.
    fn prefix(&self, level: DiagnosticLevel) -> String {
        if self.color {
            format!("{}{}:{} ", level.color(), level.prefix(), RESET_COLOR)
        } else {
            format!("{}: ", level.prefix())
        }
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DiagnosticSink for StderrSink {
    fn emit(&self, diag: &Diagnostic) {
        if diag.level < self.min_level {
            return;
        }

        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "{}[{}] {}",
            self.prefix(diag.level),
            diag.code,
            diag.message
        );
        for line in &diag.details {
            let _ = writeln!(stderr, "  {}", line);
        }
    }
}

/// Forwards diagnostics to the `log` facade under the `memtrack` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, diag: &Diagnostic) {
        let level = diag.level.to_log_level();
        if !log::log_enabled!(target: "memtrack", level) {
            return;
        }
        log::log!(target: "memtrack", level, "[{}] {}", diag.code, diag.message);
        for line in &diag.details {
            log::log!(target: "memtrack", level, "  {}", line);
        }
    }
}

/// A simple sink that collects diagnostics.
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    /// Number of collected diagnostics with the given code.
    pub fn count(&self, code: DiagnosticCode) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.code == code)
            .count()
    }

    /// Clear collected diagnostics.
    pub fn clear(&self) {
        self.diagnostics.borrow_mut().clear();
    }

    /// Check if any fatal diagnostics were collected.
    pub fn has_fatal(&self) -> bool {
        self.diagnostics
            .borrow()
            .iter()
            .any(|d| d.level == DiagnosticLevel::Fatal)
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic) {
        self.diagnostics.borrow_mut().push(diag.clone());
    }
}
