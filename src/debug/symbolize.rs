//! Address-to-line symbolization.
//!
//! A [`Symbolizer`] turns one frame into an `addr2line -p -f` style line,
//! `function at file:line`. Returning `None` means the frame could not be
//! resolved; the renderer substitutes a placeholder for that frame only.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Where a frame lives: its module and the offset of the address inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLocation {
    /// Absolute address (return address minus one).
    pub address: usize,
    /// Binary or shared object containing the address.
    pub module: PathBuf,
    /// `address` relative to the module's load base.
    pub offset: usize,
}

/// Resolves a frame to a human-readable line.
pub trait Symbolizer {
    fn symbolize(&self, location: &FrameLocation) -> Option<String>;
}

impl<F> Symbolizer for F
where
    F: Fn(&FrameLocation) -> Option<String>,
{
    fn symbolize(&self, location: &FrameLocation) -> Option<String> {
        self(location)
    }
}

/// In-process symbolization through the `backtrace` crate's resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSymbolizer;

impl Symbolizer for NativeSymbolizer {
    fn symbolize(&self, location: &FrameLocation) -> Option<String> {
        let mut line = None;
        backtrace::resolve(location.address as *mut c_void, |symbol| {
            // Inlined frames resolve innermost first; keep that one.
            if line.is_some() {
                return;
            }
            let Some(name) = symbol.name() else {
                return;
            };
            let file = symbol
                .filename()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "??".to_string());
            let lineno = symbol
                .lineno()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            line = Some(format!("{:#} at {}:{}", name, file, lineno));
        });
        line
    }
}

/// Spawns the external `addr2line` tool once per frame.
#[derive(Debug, Clone)]
pub struct Addr2LineSymbolizer {
    program: PathBuf,
    exe: Option<PathBuf>,
}

impl Addr2LineSymbolizer {
    /// Use `addr2line` from `PATH`, retrying unresolved frames against the
    /// running executable.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("addr2line"),
            exe: std::env::current_exe().ok(),
        }
    }

    /// Use a specific binary instead of `addr2line` from `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, module: &Path, address: usize) -> Option<String> {
        let output = Command::new(&self.program)
            .args(["-p", "-f", "-e"])
            .arg(module)
            .arg(format!("{:#x}", address))
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next()?.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

impl Default for Addr2LineSymbolizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Symbolizer for Addr2LineSymbolizer {
    fn symbolize(&self, location: &FrameLocation) -> Option<String> {
        let line = self.run(&location.module, location.offset)?;
        if line.starts_with('?') {
            // Module-relative lookup failed; the executable may still know
            // the absolute address (non-PIE builds).
            if let Some(exe) = &self.exe {
                if let Some(retry) = self.run(exe, location.address) {
                    return Some(retry);
                }
            }
        }
        Some(line)
    }
}
