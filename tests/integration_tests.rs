//! Integration tests for memtrack.

use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::ptr::{self, NonNull};
use std::rc::Rc;

use bumpalo::Bump;
use memtrack::{
    Category, CollectingSink, EntryState, RawAllocator, SystemAllocator, TrackError, Tracker,
    TrackerConfig, TraceRenderer, MT001, MT002, MT003, MT101, MT201,
};

const HEADER: usize = 16;

/// Test allocator that counts calls, always moves on realloc, and defers
/// every release until it is dropped so addresses can be handed out again
/// safely.
#[derive(Default)]
struct RecyclingAllocator {
    mallocs: Cell<usize>,
    reallocs: Cell<usize>,
    frees: Cell<usize>,
    next: Cell<Option<*mut u8>>,
    released: RefCell<Vec<*mut u8>>,
}

impl RecyclingAllocator {
    /// Make the next malloc return `ptr`.
    fn hand_out_next(&self, ptr: *mut u8) {
        self.next.set(Some(ptr));
    }

    fn block(size: usize) -> *mut u8 {
        let base = SystemAllocator.malloc(size + HEADER);
        if base.is_null() {
            return base;
        }
        unsafe {
            (base as *mut usize).write(size);
            base.add(HEADER)
        }
    }

    unsafe fn block_size(ptr: *mut u8) -> usize {
        *(ptr.sub(HEADER) as *const usize)
    }
}

impl RawAllocator for RecyclingAllocator {
    fn malloc(&self, size: usize) -> *mut u8 {
        self.mallocs.set(self.mallocs.get() + 1);
        match self.next.take() {
            Some(ptr) => ptr,
            None => Self::block(size),
        }
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        let Some(bytes) = count.checked_mul(size) else {
            return ptr::null_mut();
        };
        let ptr = self.malloc(bytes);
        if !ptr.is_null() {
            unsafe { ptr::write_bytes(ptr, 0, bytes) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        self.reallocs.set(self.reallocs.get() + 1);
        let moved = Self::block(size);
        if !moved.is_null() && !ptr.is_null() {
            ptr::copy_nonoverlapping(ptr, moved, Self::block_size(ptr).min(size));
            self.released.borrow_mut().push(ptr);
        }
        moved
    }

    unsafe fn free(&self, ptr: *mut u8) {
        self.frees.set(self.frees.get() + 1);
        self.released.borrow_mut().push(ptr);
    }
}

impl Drop for RecyclingAllocator {
    fn drop(&mut self) {
        let mut released = std::mem::take(self.released.get_mut());
        released.sort();
        released.dedup();
        for ptr in released {
            unsafe { SystemAllocator.free(ptr.sub(HEADER)) };
        }
    }
}

/// Bump arena as the underlying allocator. Frees are no-ops.
#[derive(Clone, Copy)]
struct BumpArena<'a>(&'a Bump);

impl RawAllocator for BumpArena<'_> {
    fn malloc(&self, size: usize) -> *mut u8 {
        let Ok(layout) = Layout::from_size_align(size + HEADER, HEADER) else {
            return ptr::null_mut();
        };
        match self.0.try_alloc_layout(layout) {
            Ok(base) => unsafe {
                (base.as_ptr() as *mut usize).write(size);
                base.as_ptr().add(HEADER)
            },
            Err(_) => ptr::null_mut(),
        }
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        let Some(bytes) = count.checked_mul(size) else {
            return ptr::null_mut();
        };
        let ptr = self.malloc(bytes);
        if !ptr.is_null() {
            unsafe { ptr::write_bytes(ptr, 0, bytes) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let moved = self.malloc(size);
        if !moved.is_null() && !ptr.is_null() {
            let old = *(ptr.sub(HEADER) as *const usize);
            ptr::copy_nonoverlapping(ptr, moved, old.min(size));
        }
        moved
    }

    unsafe fn free(&self, _ptr: *mut u8) {}
}

fn raw_renderer() -> TraceRenderer {
    TraceRenderer::native().with_exe(None)
}

fn recycling_tracker() -> (
    Tracker<Rc<RecyclingAllocator>>,
    Rc<RecyclingAllocator>,
    Rc<CollectingSink>,
) {
    let raw = Rc::new(RecyclingAllocator::default());
    let sink = Rc::new(CollectingSink::new());
    let tracker = Tracker::new_in(Rc::clone(&raw), TrackerConfig::testing())
        .with_sink(Rc::clone(&sink))
        .with_renderer(raw_renderer());
    (tracker, raw, sink)
}

fn system_tracker() -> (Tracker, Rc<CollectingSink>) {
    let sink = Rc::new(CollectingSink::new());
    let tracker = Tracker::with_config(TrackerConfig::testing())
        .with_sink(Rc::clone(&sink))
        .with_renderer(raw_renderer());
    (tracker, sink)
}

#[test]
fn test_leak_sweep_reports_only_unfreed() {
    let (mut tracker, sink) = system_tracker();

    let p1 = tracker.allocate(40, Category::Core).unwrap();
    let p2 = tracker.allocate(80, Category::Core).unwrap();
    unsafe { tracker.free(p1.as_ptr()).unwrap() };

    let report = tracker.shutdown();
    assert_eq!(report.len(), 1);
    assert_eq!(report.leaks[0].ptr, p2.as_ptr() as usize);
    assert_eq!(report.leaks[0].size, 80);
    assert_eq!(report.leaks[0].category, Category::Core);
    assert_eq!(report.bytes_in(Category::Core), 80);

    let leaks: Vec<_> = sink
        .diagnostics()
        .into_iter()
        .filter(|d| d.code == MT201)
        .collect();
    assert_eq!(leaks.len(), 1);
    assert!(leaks[0].message.contains("80 bytes (core)"));
    assert!(leaks[0].details.iter().any(|l| l == "Allocated at:"));
    assert_eq!(leaks[0].details.last().map(String::as_str), Some("Not freed"));

    unsafe { SystemAllocator.free(p2.as_ptr()) };
}

#[test]
fn test_double_free_reported_once_without_second_release() {
    let (mut tracker, raw, sink) = recycling_tracker();

    let ptr = tracker.allocate(32, Category::Ds).unwrap();
    unsafe { tracker.free(ptr.as_ptr()).unwrap() };
    let frees = raw.frees.get();

    let err = unsafe { tracker.free(ptr.as_ptr()) }.unwrap_err();
    assert_eq!(err, TrackError::DoubleFree { addr: ptr.as_ptr() as usize });
    assert_eq!(raw.frees.get(), frees);
    assert_eq!(sink.count(MT001), 1);

    let report = &sink.diagnostics()[0];
    let sections: Vec<_> = report
        .details
        .iter()
        .filter(|l| l.ends_with(':'))
        .map(String::as_str)
        .collect();
    assert_eq!(
        sections,
        ["Allocated at:", "Freed previously at:", "Current free at:"]
    );
}

#[test]
fn test_free_of_unknown_pointer_never_reaches_allocator() {
    let (mut tracker, raw, sink) = recycling_tracker();
    let mut local = [0u8; 4];

    let err = unsafe { tracker.free(local.as_mut_ptr()) }.unwrap_err();
    assert!(matches!(err, TrackError::UntrackedFree { .. }));
    assert_eq!(raw.frees.get(), 0);
    assert_eq!(sink.count(MT002), 1);
}

#[test]
fn test_realloc_preserves_prefix_and_rekeys() {
    let (mut tracker, _raw, sink) = recycling_tracker();

    let ptr = tracker.allocate(16, Category::Render).unwrap();
    unsafe {
        for i in 0..16 {
            *ptr.as_ptr().add(i) = i as u8;
        }
    }

    let moved = unsafe { tracker.reallocate(ptr.as_ptr(), 64, Category::General) }.unwrap();
    assert_ne!(moved, ptr);
    for i in 0..16 {
        assert_eq!(unsafe { *moved.as_ptr().add(i) }, i as u8);
    }

    assert!(tracker.entry(ptr.as_ptr()).is_none());
    let entry = tracker.entry(moved.as_ptr()).unwrap();
    assert_eq!(entry.size, 64);
    assert_eq!(entry.state, EntryState::Reallocated);
    assert_eq!(entry.category, Category::Render);
    assert_eq!(entry.realloc_traces.len(), 1);
    assert_eq!(tracker.tracked_count(), 1);

    unsafe { tracker.free(moved.as_ptr()).unwrap() };
    assert!(tracker.shutdown().is_empty());
    assert!(sink.diagnostics().is_empty());
}

#[test]
fn test_reallocated_leak_lists_every_trace() {
    let (mut tracker, _raw, sink) = recycling_tracker();

    let ptr = tracker.allocate(8, Category::Ds).unwrap();
    let ptr = unsafe { tracker.reallocate(ptr.as_ptr(), 16, Category::Ds) }.unwrap();
    let ptr = unsafe { tracker.reallocate(ptr.as_ptr(), 32, Category::Ds) }.unwrap();

    let report = tracker.shutdown();
    assert_eq!(report.len(), 1);
    assert_eq!(report.leaks[0].ptr, ptr.as_ptr() as usize);
    assert_eq!(report.leaks[0].realloc_traces.len(), 2);

    let leak = &sink.diagnostics()[0];
    let reallocs = leak.details.iter().filter(|l| *l == "Reallocated at:").count();
    assert_eq!(reallocs, 2);
    assert_eq!(
        leak.details.last().map(String::as_str),
        Some("Reallocated but not freed")
    );
}

#[test]
fn test_untracked_realloc_warns_and_returns_error() {
    let (mut tracker, raw, sink) = recycling_tracker();
    let mut local = [0u8; 8];

    let err = unsafe { tracker.reallocate(local.as_mut_ptr(), 32, Category::Core) }.unwrap_err();
    assert!(matches!(err, TrackError::UntrackedRealloc { .. }));
    assert_eq!(raw.reallocs.get(), 0);
    assert_eq!(sink.count(MT101), 2);
    assert!(!sink.has_fatal());
}

#[test]
fn test_realloc_after_free_is_untracked() {
    let (mut tracker, raw, sink) = recycling_tracker();

    let ptr = tracker.allocate(8, Category::Core).unwrap();
    unsafe { tracker.free(ptr.as_ptr()).unwrap() };

    let err = unsafe { tracker.reallocate(ptr.as_ptr(), 16, Category::Core) }.unwrap_err();
    assert_eq!(err, TrackError::UntrackedRealloc { addr: ptr.as_ptr() as usize });
    assert_eq!(raw.reallocs.get(), 0);
    assert_eq!(sink.count(MT101), 2);
    assert_eq!(tracker.entry(ptr.as_ptr()).unwrap().state, EntryState::Freed);
}

#[test]
fn test_live_address_handed_out_again_is_corruption() {
    let (mut tracker, raw, sink) = recycling_tracker();

    let ptr = tracker.allocate(8, Category::Platform).unwrap();
    raw.hand_out_next(ptr.as_ptr());

    let err = tracker.allocate(8, Category::Platform).unwrap_err();
    assert_eq!(err, TrackError::MemoryCorruption { addr: ptr.as_ptr() as usize });
    assert_eq!(sink.count(MT003), 1);

    // The original record is untouched.
    let entry = tracker.entry(ptr.as_ptr()).unwrap();
    assert_eq!(entry.state, EntryState::Allocated);
    assert_eq!(tracker.tracked_count(), 1);
}

#[test]
fn test_freed_address_reuse_replaces_entry() {
    let (mut tracker, raw, sink) = recycling_tracker();

    let ptr = tracker.allocate(8, Category::Core).unwrap();
    unsafe { tracker.free(ptr.as_ptr()).unwrap() };

    raw.hand_out_next(ptr.as_ptr());
    let again = tracker.allocate(24, Category::Render).unwrap();
    assert_eq!(again, ptr);

    let entry = tracker.entry(again.as_ptr()).unwrap();
    assert_eq!(entry.state, EntryState::Allocated);
    assert_eq!(entry.size, 24);
    assert_eq!(entry.category, Category::Render);
    assert!(entry.free_trace.is_none());

    unsafe { tracker.free(again.as_ptr()).unwrap() };
    assert!(sink.diagnostics().is_empty());
}

#[test]
fn test_out_of_memory_is_explicit() {
    struct Exhausted;
    impl RawAllocator for Exhausted {
        fn malloc(&self, _size: usize) -> *mut u8 {
            ptr::null_mut()
        }
        fn calloc(&self, _count: usize, _size: usize) -> *mut u8 {
            ptr::null_mut()
        }
        unsafe fn realloc(&self, _ptr: *mut u8, _size: usize) -> *mut u8 {
            ptr::null_mut()
        }
        unsafe fn free(&self, _ptr: *mut u8) {}
    }

    let mut tracker = Tracker::new_in(&Exhausted, TrackerConfig::testing())
        .with_sink(CollectingSink::new())
        .with_renderer(raw_renderer());
    let err = tracker.allocate(128, Category::General).unwrap_err();
    assert_eq!(err, TrackError::OutOfMemory { size: 128 });
    assert_eq!(tracker.tracked_count(), 0);
}

#[test]
fn test_calloc_and_realloc_array() {
    let (mut tracker, _raw, _sink) = recycling_tracker();

    let ptr = tracker.calloc(4, 8, Category::Ds).unwrap();
    assert!((0..32).all(|i| unsafe { *ptr.as_ptr().add(i) } == 0));
    assert_eq!(tracker.entry(ptr.as_ptr()).unwrap().size, 32);

    let grown = unsafe { tracker.realloc_array(ptr.as_ptr(), 8, 8, Category::Ds) }.unwrap();
    assert_eq!(tracker.entry(grown.as_ptr()).unwrap().size, 64);

    let err = unsafe { tracker.realloc_array(grown.as_ptr(), usize::MAX, 8, Category::Ds) }
        .unwrap_err();
    assert!(matches!(err, TrackError::SizeOverflow { .. }));
    assert_eq!(tracker.entry(grown.as_ptr()).unwrap().size, 64);

    let fresh = unsafe { tracker.realloc_array(ptr::null_mut(), 3, 4, Category::Ds) }.unwrap();
    assert_eq!(tracker.entry(fresh.as_ptr()).unwrap().state, EntryState::Allocated);

    unsafe {
        tracker.free(grown.as_ptr()).unwrap();
        tracker.free(fresh.as_ptr()).unwrap();
    }
    assert_eq!(tracker.tracked_count(), 0);
}

#[test]
fn test_passthrough_records_nothing() {
    let sink = Rc::new(CollectingSink::new());
    let mut tracker = Tracker::with_config(TrackerConfig::passthrough())
        .with_sink(Rc::clone(&sink))
        .with_renderer(raw_renderer());
    assert!(!tracker.is_tracking());

    let ptr = tracker.allocate(64, Category::Core).unwrap();
    assert!(tracker.entry(ptr.as_ptr()).is_none());
    let ptr = unsafe { tracker.reallocate(ptr.as_ptr(), 128, Category::Core) }.unwrap();
    unsafe { tracker.free(ptr.as_ptr()).unwrap() };

    // Memory from elsewhere is accepted without complaint.
    let foreign = SystemAllocator.malloc(8);
    unsafe { tracker.free(foreign).unwrap() };

    assert_eq!(tracker.tracked_count(), 0);
    assert!(tracker.shutdown().is_empty());
    assert!(sink.diagnostics().is_empty());
}

#[test]
fn test_set_tracking_toggles_recording() {
    let (mut tracker, _sink) = system_tracker();

    let tracked = tracker.allocate(8, Category::Core).unwrap();
    tracker.set_tracking(false);
    let untracked = tracker.allocate(8, Category::Core).unwrap();
    assert!(tracker.entry(untracked.as_ptr()).is_none());
    unsafe { tracker.free(untracked.as_ptr()).unwrap() };

    tracker.set_tracking(true);
    assert_eq!(tracker.tracked_count(), 1);
    unsafe { tracker.free(tracked.as_ptr()).unwrap() };
    assert_eq!(tracker.tracked_count(), 0);
}

#[test]
fn test_free_while_untracked_retires_record() {
    let (mut tracker, raw, sink) = recycling_tracker();

    let ptr = tracker.allocate(24, Category::Ds).unwrap();
    tracker.set_tracking(false);
    unsafe { tracker.free(ptr.as_ptr()).unwrap() };
    assert_eq!(tracker.entry(ptr.as_ptr()).unwrap().state, EntryState::Freed);

    tracker.set_tracking(true);
    raw.hand_out_next(ptr.as_ptr());
    let again = tracker.allocate(24, Category::Ds).unwrap();
    assert_eq!(again, ptr);
    assert_eq!(sink.count(MT003), 0);
    assert_eq!(tracker.entry(again.as_ptr()).unwrap().state, EntryState::Allocated);

    unsafe { tracker.free(again.as_ptr()).unwrap() };
    assert!(tracker.shutdown().is_empty());
    assert_eq!(sink.count(MT201), 0);
}

#[test]
fn test_realloc_while_untracked_moves_record() {
    let (mut tracker, _raw, sink) = recycling_tracker();

    let ptr = tracker.allocate(16, Category::Render).unwrap();
    tracker.set_tracking(false);
    let moved = unsafe { tracker.reallocate(ptr.as_ptr(), 64, Category::Render) }.unwrap();
    assert_ne!(moved, ptr);
    tracker.set_tracking(true);

    assert!(tracker.entry(ptr.as_ptr()).is_none());
    let entry = tracker.entry(moved.as_ptr()).unwrap();
    assert_eq!(entry.size, 64);
    assert_eq!(entry.category, Category::Render);

    unsafe { tracker.free(moved.as_ptr()).unwrap() };
    assert_eq!(sink.count(MT002), 0);
    assert!(tracker.shutdown().is_empty());
}

#[test]
fn test_shutdown_runs_once_then_passes_through() {
    let (mut tracker, sink) = system_tracker();

    let leaked = tracker.allocate(8, Category::General).unwrap();
    assert_eq!(tracker.shutdown().len(), 1);
    assert!(tracker.is_shut_down());
    assert!(!tracker.is_tracking());

    assert!(tracker.shutdown().is_empty());
    assert_eq!(sink.count(MT201), 1);

    let after = tracker.allocate(8, Category::General).unwrap();
    assert!(tracker.entry(after.as_ptr()).is_none());
    unsafe {
        tracker.free(after.as_ptr()).unwrap();
        tracker.free(leaked.as_ptr()).unwrap();
    }
    assert_eq!(sink.count(MT201), 1);
}

#[test]
fn test_usage_by_category() {
    let (mut tracker, _sink) = system_tracker();

    let a = tracker.allocate(100, Category::Render).unwrap();
    let b = tracker.allocate(50, Category::Render).unwrap();
    let c = tracker.allocate(10, Category::Platform).unwrap();
    unsafe { tracker.free(b.as_ptr()).unwrap() };

    let usage = tracker.usage();
    assert_eq!(usage.get(Category::Render).bytes, 100);
    assert_eq!(usage.get(Category::Render).count, 1);
    assert_eq!(usage.get(Category::Platform).bytes, 10);
    assert_eq!(usage.total_bytes(), 110);
    assert_eq!(usage.total_count(), 2);

    unsafe {
        tracker.free(a.as_ptr()).unwrap();
        tracker.free(c.as_ptr()).unwrap();
    }
    assert_eq!(tracker.usage().total_bytes(), 0);
}

#[test]
fn test_many_allocations_keep_their_records() {
    let (mut tracker, _raw, _sink) = recycling_tracker();

    let ptrs: Vec<NonNull<u8>> = (0..500)
        .map(|i| tracker.allocate(i % 64 + 1, Category::Ds).unwrap())
        .collect();
    assert_eq!(tracker.tracked_count(), 500);

    for (i, ptr) in ptrs.iter().enumerate() {
        assert_eq!(tracker.entry(ptr.as_ptr()).unwrap().size, i % 64 + 1);
    }
    for ptr in &ptrs {
        unsafe { tracker.free(ptr.as_ptr()).unwrap() };
    }
    assert_eq!(tracker.tracked_count(), 0);
    assert!(tracker.shutdown().is_empty());
}

#[test]
fn test_bump_arena_as_underlying_allocator() {
    let arena = Bump::new();
    let sink = Rc::new(CollectingSink::new());
    let mut tracker = Tracker::new_in(BumpArena(&arena), TrackerConfig::testing())
        .with_sink(Rc::clone(&sink))
        .with_renderer(raw_renderer());

    let a = tracker.allocate(40, Category::Render).unwrap();
    let b = tracker.calloc(10, 4, Category::Render).unwrap();
    unsafe { ptr::write_bytes(a.as_ptr(), 0x5A, 40) };
    let a = unsafe { tracker.reallocate(a.as_ptr(), 80, Category::Render) }.unwrap();
    assert_eq!(unsafe { *a.as_ptr().add(39) }, 0x5A);

    unsafe { tracker.free(b.as_ptr()).unwrap() };
    let report = tracker.shutdown();
    assert_eq!(report.len(), 1);
    assert_eq!(report.total_bytes(), 80);
    assert!(arena.allocated_bytes() > 0);
}

#[test]
fn test_leak_trace_names_allocating_function() {
    #[inline(never)]
    fn allocate_leaky_buffer(tracker: &mut Tracker) -> NonNull<u8> {
        tracker.allocate(48, Category::Core).unwrap()
    }

    let sink = Rc::new(CollectingSink::new());
    let mut tracker = Tracker::with_config(TrackerConfig::testing())
        .with_sink(Rc::clone(&sink))
        .with_renderer(TraceRenderer::native());

    let ptr = allocate_leaky_buffer(&mut tracker);
    tracker.shutdown();

    let leak = &sink.diagnostics()[0];
    assert!(
        leak.details
            .iter()
            .any(|l| l.contains("allocate_leaky_buffer")),
        "{}",
        leak
    );
    assert!(
        !leak.details.iter().any(|l| l.contains("Trace::capture")),
        "{}",
        leak
    );
    unsafe { SystemAllocator.free(ptr.as_ptr()) };
}
