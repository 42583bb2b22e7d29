//! # Kernel Heap
//!
//! Dynamic memory for kernel-owned task stacks and semaphore control
//! blocks. Two layers live here:
//!
//! - [`allocate`] / [`release`]: the interface the rest of the kernel uses.
//!   Thin wrappers over the global allocator that keep outstanding-block
//!   counters, so tests (and a debugger) can observe that every destroyed
//!   task gave back exactly what it took. Thread context only — handler
//!   code never allocates.
//! - A first-fit free-list allocator over a fixed arena, installed as the
//!   `#[global_allocator]` when building for the target. Host builds (unit
//!   tests) keep std's allocator underneath the same counting wrappers.
//!
//! Allocations are served in 16-byte granules, which also bounds the
//! supported alignment.

use core::alloc::Layout;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Allocation granule and maximum supported alignment.
const GRANULE: usize = 16;

// ---------------------------------------------------------------------------
// Counted kernel-facing interface
// ---------------------------------------------------------------------------

static OUTSTANDING: AtomicUsize = AtomicUsize::new(0);
static TOTAL_ALLOCATED: AtomicUsize = AtomicUsize::new(0);
static TOTAL_RELEASED: AtomicUsize = AtomicUsize::new(0);

/// Allocate `size` bytes for a kernel object. Returns `None` when the heap
/// cannot satisfy the request.
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }
    let layout = Layout::from_size_align(size, 8).ok()?;
    // Safety: layout has non-zero size.
    let raw = unsafe { alloc::alloc::alloc(layout) };
    let ptr = NonNull::new(raw)?;
    OUTSTANDING.fetch_add(1, Ordering::Relaxed);
    TOTAL_ALLOCATED.fetch_add(1, Ordering::Relaxed);
    Some(ptr)
}

/// Give back a block obtained from [`allocate`] with the same `size`.
///
/// # Safety
/// `ptr` must come from [`allocate`] with this exact `size`, and must not
/// be released twice.
pub unsafe fn release(ptr: NonNull<u8>, size: usize) {
    let layout = Layout::from_size_align_unchecked(size, 8);
    alloc::alloc::dealloc(ptr.as_ptr(), layout);
    OUTSTANDING.fetch_sub(1, Ordering::Relaxed);
    TOTAL_RELEASED.fetch_add(1, Ordering::Relaxed);
}

/// Number of kernel allocations not yet released.
pub fn outstanding() -> usize {
    OUTSTANDING.load(Ordering::Relaxed)
}

/// Total [`allocate`] calls that succeeded.
pub fn total_allocated() -> usize {
    TOTAL_ALLOCATED.load(Ordering::Relaxed)
}

/// Total [`release`] calls.
pub fn total_released() -> usize {
    TOTAL_RELEASED.load(Ordering::Relaxed)
}

/// Serialize tests that allocate through the counted interface: the test
/// harness runs modules in parallel threads, and counter assertions only
/// make sense with the interface quiesced.
#[cfg(test)]
pub(crate) fn counter_test_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// First-fit free list
// ---------------------------------------------------------------------------

/// Header written at the start of every free block. Allocated blocks carry
/// no header; the layout handed to `dealloc` tells us the size again.
#[cfg_attr(not(all(target_arch = "arm", target_os = "none")), allow(dead_code))]
struct FreeBlock {
    size: usize,
    next: *mut FreeBlock,
}

/// Address-ordered free list over one contiguous region.
#[cfg_attr(not(all(target_arch = "arm", target_os = "none")), allow(dead_code))]
struct FreeList {
    head: *mut FreeBlock,
}

#[cfg_attr(not(all(target_arch = "arm", target_os = "none")), allow(dead_code))]
impl FreeList {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// Donate the whole region as one free block.
    ///
    /// # Safety
    /// `base` must be valid for `size` bytes, `GRANULE`-aligned, and not
    /// otherwise in use.
    unsafe fn attach(&mut self, base: *mut u8, size: usize) {
        debug_assert_eq!(base as usize % GRANULE, 0);
        debug_assert!(size >= GRANULE);
        let block = base.cast::<FreeBlock>();
        (*block).size = size & !(GRANULE - 1);
        (*block).next = ptr::null_mut();
        self.head = block;
    }

    fn rounded(size: usize) -> usize {
        size.max(1).div_ceil(GRANULE) * GRANULE
    }

    /// First-fit allocation. Splits the tail of the chosen block when the
    /// remainder is large enough to stand alone.
    unsafe fn allocate(&mut self, size: usize, align: usize) -> *mut u8 {
        if align > GRANULE {
            return ptr::null_mut();
        }
        let size = Self::rounded(size);
        let mut prev: *mut FreeBlock = ptr::null_mut();
        let mut cur = self.head;
        while !cur.is_null() {
            if (*cur).size >= size {
                let remainder = (*cur).size - size;
                let replacement = if remainder >= GRANULE {
                    let tail = cur.cast::<u8>().add(size).cast::<FreeBlock>();
                    (*tail).size = remainder;
                    (*tail).next = (*cur).next;
                    tail
                } else {
                    (*cur).next
                };
                if prev.is_null() {
                    self.head = replacement;
                } else {
                    (*prev).next = replacement;
                }
                return cur.cast();
            }
            prev = cur;
            cur = (*cur).next;
        }
        ptr::null_mut()
    }

    /// Return a block, keeping the list address-ordered and coalescing with
    /// both neighbors where they touch.
    unsafe fn free(&mut self, ptr_in: *mut u8, size: usize) {
        let size = Self::rounded(size);
        let block = ptr_in.cast::<FreeBlock>();
        (*block).size = size;

        // Find the insertion point: prev < block < cur.
        let mut prev: *mut FreeBlock = ptr::null_mut();
        let mut cur = self.head;
        while !cur.is_null() && cur < block {
            prev = cur;
            cur = (*cur).next;
        }
        (*block).next = cur;
        if prev.is_null() {
            self.head = block;
        } else {
            (*prev).next = block;
        }

        // Coalesce forward.
        if !cur.is_null() && block.cast::<u8>().add((*block).size) == cur.cast() {
            (*block).size += (*cur).size;
            (*block).next = (*cur).next;
        }
        // Coalesce backward.
        if !prev.is_null() && prev.cast::<u8>().add((*prev).size) == block.cast() {
            (*prev).size += (*block).size;
            (*prev).next = (*block).next;
        }
    }
}

// ---------------------------------------------------------------------------
// Global allocator (target only)
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod global {
    use super::FreeList;
    use crate::config::KERNEL_HEAP_SIZE;
    use crate::sync;
    use core::alloc::{GlobalAlloc, Layout};
    use core::cell::UnsafeCell;

    #[repr(align(16))]
    struct Arena(UnsafeCell<[u8; KERNEL_HEAP_SIZE]>);
    // Safety: only touched through KernelHeap's critical sections.
    unsafe impl Sync for Arena {}

    static ARENA: Arena = Arena(UnsafeCell::new([0; KERNEL_HEAP_SIZE]));

    struct KernelHeap {
        list: UnsafeCell<FreeList>,
        attached: UnsafeCell<bool>,
    }
    // Safety: all access happens inside a critical section.
    unsafe impl Sync for KernelHeap {}

    #[global_allocator]
    static HEAP: KernelHeap = KernelHeap {
        list: UnsafeCell::new(FreeList::new()),
        attached: UnsafeCell::new(false),
    };

    unsafe impl GlobalAlloc for KernelHeap {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            sync::critical_section(|| {
                let list = &mut *self.list.get();
                let attached = &mut *self.attached.get();
                if !*attached {
                    list.attach(ARENA.0.get().cast(), KERNEL_HEAP_SIZE);
                    *attached = true;
                }
                list.allocate(layout.size(), layout.align())
            })
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            sync::critical_section(|| {
                (*self.list.get()).free(ptr, layout.size());
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct TestArena {
        _backing: std::vec::Vec<u8>,
        base: *mut u8,
        size: usize,
    }

    fn arena(size: usize) -> TestArena {
        // Over-allocate so the base can be aligned up to a granule.
        let mut backing = std::vec::Vec::with_capacity(size + GRANULE);
        let raw = backing.as_mut_ptr() as usize;
        let base = (raw + GRANULE - 1) & !(GRANULE - 1);
        TestArena {
            _backing: backing,
            base: base as *mut u8,
            size,
        }
    }

    #[test]
    fn allocate_and_free_round_trip() {
        let a = arena(1024);
        let mut list = FreeList::new();
        unsafe {
            list.attach(a.base, a.size);
            let p = list.allocate(100, 8);
            assert!(!p.is_null());
            list.free(p, 100);
            // After coalescing, the full arena is available again.
            let q = list.allocate(1024, 8);
            assert_eq!(q, a.base);
        }
    }

    #[test]
    fn exhaustion_returns_null() {
        let a = arena(256);
        let mut list = FreeList::new();
        unsafe {
            list.attach(a.base, a.size);
            let p = list.allocate(200, 8);
            assert!(!p.is_null());
            assert!(list.allocate(200, 8).is_null());
            list.free(p, 200);
            assert!(!list.allocate(200, 8).is_null());
        }
    }

    #[test]
    fn neighboring_frees_coalesce() {
        let a = arena(512);
        let mut list = FreeList::new();
        unsafe {
            list.attach(a.base, a.size);
            let p1 = list.allocate(128, 8);
            let p2 = list.allocate(128, 8);
            let p3 = list.allocate(128, 8);
            assert!(!p3.is_null());
            // Free out of order; the blocks must merge back together.
            list.free(p2, 128);
            list.free(p1, 128);
            list.free(p3, 128);
            let whole = list.allocate(512, 8);
            assert_eq!(whole, a.base);
        }
    }

    #[test]
    fn oversized_alignment_is_refused() {
        let a = arena(256);
        let mut list = FreeList::new();
        unsafe {
            list.attach(a.base, a.size);
            assert!(list.allocate(64, 64).is_null());
        }
    }

    #[test]
    fn counters_track_outstanding_blocks() {
        let _serial = counter_test_guard();
        let before = outstanding();
        let p = allocate(64).unwrap();
        assert_eq!(outstanding(), before + 1);
        unsafe { release(p, 64) };
        assert_eq!(outstanding(), before);
    }
}
