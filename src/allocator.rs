//! Kernel heap behind `alloc`.
//!
//! The boot code maps the heap region and hands it over once through
//! [`init_heap`] before the first allocation.

use linked_list_allocator::LockedHeap;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Give the allocator its memory.
///
/// # Safety
/// `[start, start + size)` must be mapped, writable, unused by anything
/// else, and this must be called exactly once.
pub unsafe fn init_heap(start: *mut u8, size: usize) {
    ALLOCATOR.lock().init(start, size);
    crate::log_info!("Heap: {} KiB at {:p}", size / 1024, start);
}
