//! Rendering captured traces to text.

use std::path::{Path, PathBuf};

use super::backtrace::Trace;
use super::symbolize::{Addr2LineSymbolizer, FrameLocation, NativeSymbolizer, Symbolizer};

/// Turns [`Trace`]s into one line per frame.
///
/// Lines have the working directory stripped so reports read the same on
/// every machine, and rendering stops after the program entry point.
pub struct TraceRenderer {
    symbolizer: Box<dyn Symbolizer>,
    exe: Option<PathBuf>,
    cwd: Option<String>,
}

impl TraceRenderer {
    /// Create a renderer for the running process.
    pub fn new(symbolizer: Box<dyn Symbolizer>) -> Self {
        let cwd = std::env::current_dir()
            .ok()
            .map(|p| p.display().to_string())
            .or_else(|| std::env::var("PWD").ok());
        Self {
            symbolizer,
            exe: std::env::current_exe().ok(),
            cwd,
        }
    }

    /// In-process symbolization (the default).
    pub fn native() -> Self {
        Self::new(Box::new(NativeSymbolizer))
    }

    /// Symbolization through the external `addr2line` tool.
    pub fn addr2line() -> Self {
        Self::new(Box::new(Addr2LineSymbolizer::new()))
    }

    /// Override the executable path. `None` forces raw hex output.
    pub fn with_exe(mut self, exe: Option<PathBuf>) -> Self {
        self.exe = exe;
        self
    }

    /// Override the prefix stripped from rendered lines.
    pub fn with_cwd(mut self, cwd: Option<String>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Render every frame up to and including the entry point.
    pub fn render(&self, trace: &Trace) -> String {
        let Some(exe) = self.exe.as_deref() else {
            return render_raw(trace);
        };

        let mut lines = Vec::with_capacity(trace.len());
        for &ip in trace.frames() {
            // Return addresses point past the call; step back into it.
            let address = ip.saturating_sub(1);
            let location = locate(address, exe);
            let line = match self.symbolizer.symbolize(&location) {
                Some(line) => self.strip_cwd(&line),
                None => format!("?? ({:#x})", address),
            };
            let at_entry = is_entry_point(&line);
            lines.push(line);
            if at_entry {
                break;
            }
        }
        lines.join("\n")
    }

    fn strip_cwd(&self, line: &str) -> String {
        let Some(cwd) = self.cwd.as_deref().filter(|c| !c.is_empty()) else {
            return line.to_string();
        };
        match line.find(cwd) {
            Some(pos) => {
                let rest = &line[pos + cwd.len()..];
                let mut out = line[..pos].to_string();
                out.push_str(rest.strip_prefix('/').unwrap_or(rest));
                out
            }
            None => line.to_string(),
        }
    }
}

impl Default for TraceRenderer {
    fn default() -> Self {
        Self::native()
    }
}

/// Whether a rendered line names the program entry point.
pub fn is_entry_point(line: &str) -> bool {
    let function = line.split(" at ").next().unwrap_or(line).trim();
    function == "main" || function.ends_with("::main")
}

fn render_raw(trace: &Trace) -> String {
    trace
        .frames()
        .iter()
        .map(|ip| format!("{:#x}", ip))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(unix)]
fn locate(address: usize, exe: &Path) -> FrameLocation {
    use std::ffi::{CStr, OsStr};
    use std::os::unix::ffi::OsStrExt;

    // SAFETY: Dl_info is plain data; all-zero is a valid value.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // SAFETY: dladdr only inspects the address and fills `info`.
    let found = unsafe { libc::dladdr(address as *const libc::c_void, &mut info) } != 0;

    if found && !info.dli_fname.is_null() {
        // SAFETY: dladdr succeeded, so dli_fname is a valid C string.
        let name = unsafe { CStr::from_ptr(info.dli_fname) };
        return FrameLocation {
            address,
            module: PathBuf::from(OsStr::from_bytes(name.to_bytes())),
            offset: address.wrapping_sub(info.dli_fbase as usize),
        };
    }

    FrameLocation {
        address,
        module: exe.to_path_buf(),
        offset: address,
    }
}

#[cfg(not(unix))]
fn locate(address: usize, exe: &Path) -> FrameLocation {
    FrameLocation {
        address,
        module: exe.to_path_buf(),
        offset: address,
    }
}
