//! The underlying allocator capability and its libc-backed default.

use std::rc::Rc;

/// The four allocation primitives the tracker and map delegate to.
///
/// Implementations follow C `malloc` semantics: returned memory is aligned for
/// any fundamental type (at least [`MIN_ALIGN`] bytes), null signals failure,
/// and `free`/`realloc` accept only pointers previously returned by the same
/// allocator.
pub trait RawAllocator {
    /// Allocate `size` uninitialized bytes.
    fn malloc(&self, size: usize) -> *mut u8;

    /// Allocate `count * size` zeroed bytes.
    fn calloc(&self, count: usize, size: usize) -> *mut u8;

    /// Resize an allocation, moving it if necessary.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this allocator.
    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// Release an allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this allocator.
    unsafe fn free(&self, ptr: *mut u8);
}

/// Alignment every [`RawAllocator`] must provide.
pub const MIN_ALIGN: usize = std::mem::align_of::<u128>();

impl<A: RawAllocator + ?Sized> RawAllocator for &A {
    fn malloc(&self, size: usize) -> *mut u8 {
        (**self).malloc(size)
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        (**self).calloc(count, size)
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        (**self).realloc(ptr, size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        (**self).free(ptr)
    }
}

impl<A: RawAllocator + ?Sized> RawAllocator for Rc<A> {
    fn malloc(&self, size: usize) -> *mut u8 {
        (**self).malloc(size)
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        (**self).calloc(count, size)
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        (**self).realloc(ptr, size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        (**self).free(ptr)
    }
}

/// The process heap, via libc.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl RawAllocator for SystemAllocator {
    fn malloc(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions.
        unsafe { libc::malloc(size) as *mut u8 }
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        // SAFETY: calloc checks count * size for overflow itself.
        unsafe { libc::calloc(count, size) as *mut u8 }
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        libc::realloc(ptr as *mut libc::c_void, size) as *mut u8
    }

    unsafe fn free(&self, ptr: *mut u8) {
        libc::free(ptr as *mut libc::c_void)
    }
}
