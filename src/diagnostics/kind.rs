//! Diagnostic levels, codes and records.
//!
//! Levels mirror the engine log levels, from `Trace` up to `Fatal`.

use std::fmt;

/// Diagnostic code wrapper for type-safe code references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagnosticCode(&'static str);

impl DiagnosticCode {
    /// Create a new diagnostic code.
    pub const fn new(code: &'static str) -> Self {
        Self(code)
    }

    /// Get the code string.
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity of a diagnostic, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Correctness is compromised; the process is expected to stop.
    Fatal,
}

impl DiagnosticLevel {
    /// Get the display prefix for this level.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    /// ANSI escape used when color output is enabled.
    pub fn color(&self) -> &'static str {
        match self {
            Self::Trace => "\x1b[37m",
            Self::Debug => "\x1b[36m",
            Self::Info => "\x1b[32m",
            Self::Warn => "\x1b[33m",
            Self::Error => "\x1b[31m",
            Self::Fatal => "\x1b[41;1;30m",
        }
    }

    /// Matching `log` level. `log` has no fatal level, so it maps to `Error`.
    pub fn to_log_level(&self) -> log::Level {
        match self {
            Self::Trace => log::Level::Trace,
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warn => log::Level::Warn,
            Self::Error | Self::Fatal => log::Level::Error,
        }
    }
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A diagnostic record: one headline plus any number of detail lines.
///
/// Detail lines usually carry rendered stack traces, so they are owned
/// strings rather than static text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Stable diagnostic code (e.g. "MT001").
    pub code: DiagnosticCode,
    /// Primary message.
    pub message: String,
    /// Additional lines printed under the message.
    pub details: Vec<String>,
}

impl Diagnostic {
    /// Create a diagnostic with no details.
    pub fn new(level: DiagnosticLevel, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            level,
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Create a fatal diagnostic.
    pub fn fatal(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Fatal, code, message)
    }

    /// Create a warning diagnostic.
    pub fn warn(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warn, code, message)
    }

    /// Create an info diagnostic.
    pub fn info(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, code, message)
    }

    /// Append a single detail line.
    pub fn with_detail(mut self, line: impl Into<String>) -> Self {
        self.details.push(line.into());
        self
    }

    /// Append a titled, multi-line block (e.g. "Allocated at:" plus a trace).
    pub fn with_section(mut self, title: &str, body: &str) -> Self {
        self.details.push(format!("{}:", title));
        self.details.push("---".to_string());
        self.details.extend(body.lines().map(str::to_string));
        self.details.push("---".to_string());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [{}] {}", self.level, self.code, self.message)?;
        for line in &self.details {
            write!(f, "\n  {}", line)?;
        }
        Ok(())
    }
}

// =============================================================================
// Predefined codes (MT0xx - Fatal usage errors)
// =============================================================================

/// MT001: A pointer was freed twice.
pub const MT001: DiagnosticCode = DiagnosticCode::new("MT001");

/// MT002: Free of a pointer the tracker never handed out.
pub const MT002: DiagnosticCode = DiagnosticCode::new("MT002");

/// MT003: The underlying allocator returned an address that is still live.
pub const MT003: DiagnosticCode = DiagnosticCode::new("MT003");

// =============================================================================
// Predefined codes (MT1xx - Recoverable usage errors)
// =============================================================================

/// MT101: Reallocation of an untracked pointer.
pub const MT101: DiagnosticCode = DiagnosticCode::new("MT101");

// =============================================================================
// Predefined codes (MT2xx - Reports)
// =============================================================================

/// MT201: Allocation still live at shutdown.
pub const MT201: DiagnosticCode = DiagnosticCode::new("MT201");

/// MT202: Live memory usage summary.
pub const MT202: DiagnosticCode = DiagnosticCode::new("MT202");

/// MT203: Allocation trace (only with `trace_allocations`).
pub const MT203: DiagnosticCode = DiagnosticCode::new("MT203");

// =============================================================================
// Predefined codes (MT9xx - Internal)
// =============================================================================

/// MT901: Map capacity overflow while growing.
pub const MT901: DiagnosticCode = DiagnosticCode::new("MT901");

/// MT902: The underlying allocator returned null.
pub const MT902: DiagnosticCode = DiagnosticCode::new("MT902");
