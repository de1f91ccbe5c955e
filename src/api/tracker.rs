//! The instrumented allocator.

use std::fmt;
use std::mem;
use std::ptr::NonNull;

use crate::allocators::{RawAllocator, SystemAllocator};
use crate::api::category::Category;
use crate::api::config::TrackerConfig;
use crate::api::entry::{AllocationEntry, EntryState};
use crate::api::error::TrackError;
use crate::api::stats::{LeakReport, UsageReport};
use crate::debug::{Trace, TraceRenderer};
use crate::diagnostics::{
    Diagnostic, DiagnosticLevel, DiagnosticSink, StderrSink, MT001, MT002, MT003, MT101, MT201,
    MT202, MT203, MT901, MT902,
};
use crate::map::{CloneValue, MapError, PtrMap};
use crate::util::format_bytes;

type EntryTable<A> = PtrMap<CloneValue<AllocationEntry>, A>;

enum Table<A: RawAllocator> {
    /// Nothing tracked yet.
    Uninit,
    Active(EntryTable<A>),
    /// Swept by `shutdown`; every call passes through.
    TornDown,
}

/// Allocator wrapper that records the lifecycle of every pointer it hands out.
///
/// Each allocate, reallocate and free captures a stack trace. Misuse is
/// reported through the configured [`DiagnosticSink`] with the traces of the
/// events involved:
///
/// - freeing a pointer twice (fatal, the second free never reaches the
///   underlying allocator)
/// - freeing a pointer the tracker never handed out (fatal)
/// - reallocating an unknown pointer (warning)
/// - the allocator returning an address that is still live (fatal)
///
/// [`Tracker::shutdown`] reports everything still live as a leak. A tracker
/// that is dropped without being shut down runs the sweep itself.
///
/// # Example
///
/// ```rust,no_run
/// use memtrack::{Category, Tracker};
///
/// let mut tracker = Tracker::new();
/// let block = tracker.allocate(80, Category::Core)?;
/// unsafe { tracker.free(block.as_ptr())? };
///
/// let leaks = tracker.shutdown();
/// assert!(leaks.is_empty());
/// # Ok::<(), memtrack::TrackError>(())
/// ```
pub struct Tracker<A: RawAllocator + Clone = SystemAllocator> {
    raw: A,
    table: Table<A>,
    config: TrackerConfig,
    sink: Box<dyn DiagnosticSink>,
    renderer: TraceRenderer,
}

impl Tracker<SystemAllocator> {
    /// Create a tracker over the process heap with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Create a tracker configured from `MEMTRACK_*` environment variables.
    pub fn from_env() -> Self {
        Self::with_config(TrackerConfig::from_env())
    }

    /// Create a tracker over the process heap.
    pub fn with_config(config: TrackerConfig) -> Self {
        Self::new_in(SystemAllocator, config)
    }
}

impl Default for Tracker<SystemAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RawAllocator + Clone> Tracker<A> {
    /// Create a tracker delegating to `raw`.
    ///
    /// The tracking table also allocates its slots through a clone of `raw`.
    pub fn new_in(raw: A, config: TrackerConfig) -> Self {
        Self {
            raw,
            table: Table::Uninit,
            config,
            sink: Box::new(StderrSink::from_env()),
            renderer: TraceRenderer::native(),
        }
    }

    /// Builder pattern: send diagnostics to `sink`.
    pub fn with_sink(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Builder pattern: render traces with `renderer`.
    pub fn with_renderer(mut self, renderer: TraceRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// The underlying allocator.
    pub fn allocator(&self) -> &A {
        &self.raw
    }

    /// Whether calls are currently recorded.
    ///
    /// False when tracking is disabled or after [`Tracker::shutdown`].
    pub fn is_tracking(&self) -> bool {
        self.config.tracking && !self.is_shut_down()
    }

    pub fn is_shut_down(&self) -> bool {
        matches!(self.table, Table::TornDown)
    }

    /// Enable or disable recording.
    ///
    /// While disabled every call goes straight to the underlying allocator.
    /// Entries recorded earlier are kept and still show up in the exit sweep.
    pub fn set_tracking(&mut self, enable: bool) {
        self.config.tracking = enable;
    }

    // ==================== Allocation ====================

    /// Allocate `size` uninitialized bytes.
    ///
    /// Zero-sized requests still get a unique address.
    pub fn allocate(&mut self, size: usize, category: Category) -> Result<NonNull<u8>, TrackError> {
        if !self.is_tracking() {
            let ptr = self.raw.malloc(size.max(1));
            return self.check_alloc(ptr, size);
        }
        let trace = Trace::capture(self.config.trace_depth, 0);
        self.allocate_traced(size, category, trace)
    }

    /// Allocate `count * size` zeroed bytes.
    pub fn calloc(
        &mut self,
        count: usize,
        size: usize,
        category: Category,
    ) -> Result<NonNull<u8>, TrackError> {
        let bytes = count
            .checked_mul(size)
            .ok_or(TrackError::SizeOverflow { count, size })?;
        let ptr = if bytes == 0 {
            self.raw.calloc(1, 1)
        } else {
            self.raw.calloc(count, size)
        };
        let ptr = self.check_alloc(ptr, bytes)?;
        if self.is_tracking() {
            let trace = Trace::capture(self.config.trace_depth, 0);
            self.track_new(ptr, bytes, category, trace)?;
        }
        Ok(ptr)
    }

    /// Resize an allocation, moving it if necessary.
    ///
    /// A null `ptr` is a fresh allocation. If the underlying allocator fails
    /// the original block and its record are left untouched. Reallocating a
    /// pointer that is unknown or already freed is reported as a warning and
    /// returns [`TrackError::UntrackedRealloc`].
    ///
    /// The allocation keeps the category it was created with.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this tracker. With
    /// tracking disabled it is passed to the underlying allocator unchecked,
    /// and an earlier record of it follows the block to its new address.
    pub unsafe fn reallocate(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
        category: Category,
    ) -> Result<NonNull<u8>, TrackError> {
        if !self.is_tracking() {
            if ptr.is_null() {
                return self.allocate(new_size, category);
            }
            let moved = self.raw.realloc(ptr, new_size.max(1));
            let moved = self.check_alloc(moved, new_size)?;
            self.follow_untracked_realloc(ptr as usize, moved.as_ptr() as usize, new_size);
            return Ok(moved);
        }

        let trace = Trace::capture(self.config.trace_depth, 0);
        if ptr.is_null() {
            return self.allocate_traced(new_size, category, trace);
        }

        let addr = ptr as usize;
        if !self.lookup(addr).is_some_and(|entry| entry.state.is_live()) {
            return Err(self.untracked_realloc(addr, &trace));
        }

        let moved = self.raw.realloc(ptr, new_size.max(1));
        let moved = self.check_alloc(moved, new_size)?;
        let new_addr = moved.as_ptr() as usize;

        if new_addr == addr {
            if let Some(entry) = self.active_mut().and_then(|map| map.get_mut(&addr)) {
                entry.size = new_size;
                entry.mark_reallocated(trace);
            }
            return Ok(moved);
        }

        // Moved: the old address is no longer ours, re-key the record.
        let Some(mut entry) = self.active_mut().and_then(|map| map.take(&addr)) else {
            return Ok(moved);
        };
        entry.ptr = new_addr;
        entry.size = new_size;
        entry.mark_reallocated(trace);
        self.insert_entry(entry)?;
        Ok(moved)
    }

    /// Resize to `count * size` bytes. A null `ptr` is a zeroed allocation.
    ///
    /// # Safety
    ///
    /// Same contract as [`Tracker::reallocate`].
    pub unsafe fn realloc_array(
        &mut self,
        ptr: *mut u8,
        count: usize,
        size: usize,
        category: Category,
    ) -> Result<NonNull<u8>, TrackError> {
        let bytes = count
            .checked_mul(size)
            .ok_or(TrackError::SizeOverflow { count, size })?;
        if ptr.is_null() {
            return self.calloc(count, size, category);
        }
        self.reallocate(ptr, bytes, category)
    }

    /// Release an allocation. Freeing null does nothing.
    ///
    /// A double free or a free of an unknown pointer is fatal and never
    /// reaches the underlying allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this tracker. With
    /// tracking disabled it is passed to the underlying allocator unchecked,
    /// and an earlier record of it is marked freed.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> Result<(), TrackError> {
        if ptr.is_null() {
            return Ok(());
        }
        if !self.is_tracking() {
            self.raw.free(ptr);
            if let Some(entry) = self.live_entry_mut(ptr as usize) {
                entry.mark_freed(Trace::default());
            }
            return Ok(());
        }

        let addr = ptr as usize;
        let trace = Trace::capture(self.config.trace_depth, 0);
        match self.lookup(addr).map(|entry| entry.state) {
            None => Err(self.untracked_free(addr, &trace)),
            Some(EntryState::Freed) => Err(self.double_free(addr, &trace)),
            Some(_) => {
                if let Some(entry) = self.active_mut().and_then(|map| map.get_mut(&addr)) {
                    entry.mark_freed(trace);
                }
                self.raw.free(ptr);
                Ok(())
            }
        }
    }

    // ==================== Inspection ====================

    /// The record for `ptr`, including freed ones still remembered.
    pub fn entry(&self, ptr: *const u8) -> Option<&AllocationEntry> {
        self.lookup(ptr as usize)
    }

    /// Number of tracked allocations that have not been freed.
    pub fn tracked_count(&self) -> usize {
        match &self.table {
            Table::Active(map) => map.iter().filter(|(_, e)| e.state.is_live()).count(),
            _ => 0,
        }
    }

    /// Live bytes and counts per category.
    pub fn usage(&self) -> UsageReport {
        let mut report = UsageReport::new();
        if let Table::Active(map) = &self.table {
            for (_, entry) in map.iter().filter(|(_, e)| e.state.is_live()) {
                report.record(entry.category, entry.size);
            }
        }
        report
    }

    /// Emit the usage summary at info level and return it.
    pub fn log_usage(&self) -> UsageReport {
        let report = self.usage();
        let mut diag = Diagnostic::info(
            MT202,
            format!(
                "{} live in {} allocations",
                format_bytes(report.total_bytes()),
                report.total_count()
            ),
        );
        for line in report.to_string().lines().skip(1) {
            diag = diag.with_detail(line.trim_start());
        }
        self.sink.emit(&diag);
        report
    }

    /// Report every allocation still live, then drop the table.
    ///
    /// Runs once. Afterwards the tracker passes everything through and
    /// further calls return an empty report.
    pub fn shutdown(&mut self) -> LeakReport {
        let Table::Active(map) = mem::replace(&mut self.table, Table::TornDown) else {
            return LeakReport::default();
        };

        let leaks: Vec<AllocationEntry> = map
            .iter()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.state.is_live())
            .cloned()
            .collect();
        drop(map);

        for leak in &leaks {
            self.sink.emit(&self.leak_diagnostic(leak));
        }

        let report = LeakReport { leaks };
        log::debug!(
            target: "memtrack",
            "tracker shut down: {} leaks, {}",
            report.len(),
            format_bytes(report.total_bytes())
        );
        report
    }

    // ==================== Internals ====================

    fn render(&self, trace: &Trace) -> String {
        self.renderer.render(trace)
    }

    fn lookup(&self, addr: usize) -> Option<&AllocationEntry> {
        match &self.table {
            Table::Active(map) => map.get(&addr),
            _ => None,
        }
    }

    fn active_mut(&mut self) -> Option<&mut EntryTable<A>> {
        match &mut self.table {
            Table::Active(map) => Some(map),
            _ => None,
        }
    }

    fn live_entry_mut(&mut self, addr: usize) -> Option<&mut AllocationEntry> {
        self.active_mut()?
            .get_mut(&addr)
            .filter(|entry| entry.state.is_live())
    }

    /// Keep a record made while tracking was on attached to its block after
    /// a pass-through realloc.
    fn follow_untracked_realloc(&mut self, addr: usize, new_addr: usize, new_size: usize) {
        if self.live_entry_mut(addr).is_none() {
            return;
        }
        let Some(map) = self.active_mut() else {
            return;
        };
        if new_addr == addr {
            if let Some(entry) = map.get_mut(&addr) {
                entry.size = new_size;
            }
            return;
        }
        let Some(mut entry) = map.take(&addr) else {
            return;
        };
        entry.ptr = new_addr;
        entry.size = new_size;
        if let Err(err) = map.set_owned(&new_addr, entry) {
            log::debug!(
                target: "memtrack",
                "dropped record of {:#x} after untracked realloc: {}",
                addr,
                err
            );
        }
    }

    fn allocate_traced(
        &mut self,
        size: usize,
        category: Category,
        trace: Trace,
    ) -> Result<NonNull<u8>, TrackError> {
        let ptr = self.raw.malloc(size.max(1));
        let ptr = self.check_alloc(ptr, size)?;
        self.track_new(ptr, size, category, trace)?;
        Ok(ptr)
    }

    /// The tracking table, created on first use.
    fn table(&mut self) -> Result<&mut EntryTable<A>, MapError> {
        if let Table::Uninit = self.table {
            let map = EntryTable::<A>::with_capacity_and_seed_in(
                self.config.map_capacity,
                self.config.seed,
                self.raw.clone(),
            )?;
            log::debug!(
                target: "memtrack",
                "tracking table created with {} slots",
                map.capacity()
            );
            self.table = Table::Active(map);
        }
        match &mut self.table {
            Table::Active(map) => Ok(map),
            _ => unreachable!("tracking table used after shutdown"),
        }
    }

    fn check_alloc(&self, ptr: *mut u8, size: usize) -> Result<NonNull<u8>, TrackError> {
        NonNull::new(ptr).ok_or_else(|| {
            self.sink.emit(&Diagnostic::new(
                DiagnosticLevel::Error,
                MT902,
                format!("underlying allocator failed to provide {} bytes", size),
            ));
            TrackError::OutOfMemory { size }
        })
    }

    fn track_new(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        category: Category,
        trace: Trace,
    ) -> Result<(), TrackError> {
        if self.config.trace_allocations {
            let diag = Diagnostic::new(
                DiagnosticLevel::Debug,
                MT203,
                format!("{} bytes ({}) at {:p}", size, category, ptr),
            )
            .with_section("Allocated at", &self.render(&trace));
            self.sink.emit(&diag);
        }
        let entry = AllocationEntry::new(ptr.as_ptr() as usize, size, category, trace);
        self.insert_entry(entry)
    }

    /// Record a block the underlying allocator just handed out.
    ///
    /// On failure the block is released again so nothing live goes untracked.
    fn insert_entry(&mut self, entry: AllocationEntry) -> Result<(), TrackError> {
        let addr = entry.ptr;
        let result = match self.table() {
            Ok(map) => match map.get(&addr).filter(|existing| existing.state.is_live()) {
                Some(existing) => {
                    let existing = existing.clone();
                    Err(self.corruption(&existing, &entry))
                }
                None => map
                    .set_owned(&addr, entry)
                    .map_err(|err| self.table_failure(err)),
            },
            Err(err) => Err(self.table_failure(err)),
        };

        if result.is_err() {
            // SAFETY: `addr` came from the underlying allocator and is not
            // referenced by any record.
            unsafe { self.raw.free(addr as *mut u8) };
        }
        result
    }

    /// Emit a fatal diagnostic, then stop or hand `err` back per the fatal mode.
    fn fatal(&self, diag: Diagnostic, err: TrackError) -> TrackError {
        self.sink.emit(&diag);
        self.config.fatal_mode.escalate(&diag);
        err
    }

    fn double_free(&self, addr: usize, current: &Trace) -> TrackError {
        let mut diag = Diagnostic::fatal(MT001, format!("double free of {:#x}", addr));
        if let Some(entry) = self.lookup(addr) {
            diag = diag
                .with_detail(format!("{} bytes, {}", entry.size, entry.category))
                .with_section("Allocated at", &self.render(&entry.alloc_trace));
            if let Some(previous) = &entry.free_trace {
                diag = diag.with_section("Freed previously at", &self.render(previous));
            }
        }
        diag = diag.with_section("Current free at", &self.render(current));
        self.fatal(diag, TrackError::DoubleFree { addr })
    }

    fn untracked_free(&self, addr: usize, current: &Trace) -> TrackError {
        let diag = Diagnostic::fatal(
            MT002,
            format!("free of {:#x}, which was never allocated here", addr),
        )
        .with_section("Freed at", &self.render(current));
        self.fatal(diag, TrackError::UntrackedFree { addr })
    }

    fn untracked_realloc(&self, addr: usize, current: &Trace) -> TrackError {
        self.sink.emit(&Diagnostic::warn(
            MT101,
            format!("realloc of {:#x}, which is not in the records", addr),
        ));
        self.sink.emit(
            &Diagnostic::info(MT101, "reallocation trace")
                .with_section("Reallocated at", &self.render(current)),
        );
        TrackError::UntrackedRealloc { addr }
    }

    fn corruption(&self, existing: &AllocationEntry, fresh: &AllocationEntry) -> TrackError {
        let diag = Diagnostic::fatal(
            MT003,
            format!(
                "memory corruption: {:#x} handed out while still live",
                existing.ptr
            ),
        )
        .with_detail(format!("Tracked: {}", existing))
        .with_section("Previously allocated at", &self.render(&existing.alloc_trace))
        .with_section("Allocated again at", &self.render(&fresh.alloc_trace));
        self.fatal(diag, TrackError::MemoryCorruption { addr: existing.ptr })
    }

    fn table_failure(&self, err: MapError) -> TrackError {
        match err {
            MapError::CapacityOverflow { capacity } => {
                let diag = Diagnostic::fatal(
                    MT901,
                    format!("tracking table cannot grow past {} slots", capacity),
                );
                self.fatal(diag, TrackError::Map(err))
            }
            MapError::AllocFailed { bytes } => {
                self.sink.emit(&Diagnostic::new(
                    DiagnosticLevel::Error,
                    MT902,
                    format!("tracking table could not allocate {} bytes", bytes),
                ));
                TrackError::Map(err)
            }
            MapError::Unaligned { .. } => {
                self.sink.emit(&Diagnostic::new(
                    DiagnosticLevel::Error,
                    MT902,
                    format!("tracking table unusable: {}", err),
                ));
                TrackError::Map(err)
            }
        }
    }

    fn leak_diagnostic(&self, leak: &AllocationEntry) -> Diagnostic {
        let mut diag = Diagnostic::warn(
            MT201,
            format!(
                "memory leak: {} bytes ({}) at {:#x}",
                leak.size, leak.category, leak.ptr
            ),
        )
        .with_section("Allocated at", &self.render(&leak.alloc_trace));
        for trace in &leak.realloc_traces {
            diag = diag.with_section("Reallocated at", &self.render(trace));
        }
        match leak.state {
            EntryState::Reallocated => diag.with_detail("Reallocated but not freed"),
            _ => diag.with_detail("Not freed"),
        }
    }
}

impl<A: RawAllocator + Clone> Drop for Tracker<A> {
    fn drop(&mut self) {
        if matches!(self.table, Table::Active(_)) {
            let _ = self.shutdown();
        }
    }
}

impl<A: RawAllocator + Clone> fmt::Debug for Tracker<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("tracking", &self.is_tracking())
            .field("shut_down", &self.is_shut_down())
            .field("tracked", &self.tracked_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
