//! Leveled diagnostics for allocation tracking.
//!
//! This module provides:
//! - **Diagnostic records**: level, stable code, message and detail lines
//! - **Sinks**: stderr (optionally colored), the `log` facade, or a collector
//! - **Fatal mode**: abort, panic or return after a fatal report
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                                  |
//! |-------|------------------------------------------|
//! | MT0xx | Fatal usage errors (double free, ...)    |
//! | MT1xx | Recoverable usage errors                 |
//! | MT2xx | Leak and usage reports                   |
//! | MT9xx | Internal errors                          |

pub mod emit;
pub mod fatal;
pub mod kind;

pub use emit::{CollectingSink, DiagnosticSink, LogSink, StderrSink};
pub use fatal::FatalMode;
pub use kind::{Diagnostic, DiagnosticCode, DiagnosticLevel};
pub use kind::{MT001, MT002, MT003, MT101, MT201, MT202, MT203, MT901, MT902};
