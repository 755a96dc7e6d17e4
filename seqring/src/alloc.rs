//! Pluggable backing memory for the slot array.
//!
//! A queue makes exactly one allocation (the slot array, at construction)
//! and one deallocation (at teardown), so the capability it consumes is
//! deliberately small: [`RingAlloc::alloc`] plus [`RingAlloc::dealloc`].
//! Arena-style allocators that cannot free individual blocks keep the
//! default no-op `dealloc` and reclaim their whole region at once.
//!
//! Two realizations ship here:
//!
//! - [`SystemAlloc`] - straight through to the process heap.
//! - [`Arena`] - a bump allocator over an anonymous private mapping,
//!   unmapped wholesale when the last cloned handle drops.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rustix::mm::{MapFlags, ProtFlags, mmap_anonymous, munmap};
use thiserror::Error;

use crate::ring::align_up;
use crate::trace;

/// Capability consumed by the queues to back their slot arrays.
///
/// The queue stores its allocator by value and keeps it only for teardown;
/// it never owns the allocator's backing state beyond that handle.
///
/// # Safety
///
/// `alloc` must return a pointer valid for reads and writes of
/// `layout.size()` bytes at `layout.align()` alignment, exclusive to the
/// caller until handed back to `dealloc`.
pub unsafe trait RingAlloc {
    /// Returns a block satisfying `layout`, or `None` when exhausted.
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a block previously returned by [`alloc`](Self::alloc).
    ///
    /// The default does nothing, which is the correct behavior for arenas
    /// that only reclaim their region wholesale.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `self.alloc(layout)` with the same `layout` and
    /// must not be used afterwards.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        let _ = (ptr, layout);
    }
}

/// Process-heap backing via `std::alloc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAlloc;

// SAFETY: delegates to the global allocator, which hands out exclusive,
// properly aligned blocks.
unsafe impl RingAlloc for SystemAlloc {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        // SAFETY: the queues never request a zero-size slot array (capacity
        // and slot size are validated before the layout is built).
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: `ptr` was produced by `std::alloc::alloc` with `layout`.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// Errors surfaced while reserving an arena region.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// The anonymous mapping could not be created.
    #[error("mmap of {size}-byte arena region failed: {source}")]
    Map {
        size: usize,
        source: rustix::io::Errno,
    },
}

/// Bump allocator over an anonymous private memory mapping.
///
/// Blocks are carved off the front of the region and never returned
/// individually; the whole mapping is unmapped when the last handle drops.
/// Handles are cheap clones over one shared region, so a queue can retain
/// its copy for teardown without owning the arena's backing state.
///
/// The bump offset is reserved with a CAS loop, so handles may be used
/// from multiple threads.
#[derive(Debug, Clone)]
pub struct Arena {
    region: Arc<ArenaRegion>,
}

#[derive(Debug)]
struct ArenaRegion {
    base: NonNull<u8>,
    size: usize,
    /// Offset of the first byte not yet handed out.
    next: AtomicUsize,
}

// SAFETY: the region is exclusively owned mapped memory; concurrent bump
// reservations are serialized by the atomic `next` offset.
unsafe impl Send for ArenaRegion {}
unsafe impl Sync for ArenaRegion {}

impl Arena {
    /// Maps a fresh `size`-byte region.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::Map`] when the kernel refuses the mapping
    /// (zero size, exhausted address space, resource limits).
    pub fn with_capacity(size: usize) -> Result<Self, ArenaError> {
        // SAFETY: anonymous private mapping at no particular address; the
        // kernel picks a free range or reports an errno.
        let ptr = unsafe {
            mmap_anonymous(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )
        }
        .map_err(|source| ArenaError::Map { size, source })?;

        // A successful mmap never yields null; failures arrive as Err above.
        let base = NonNull::new(ptr.cast::<u8>()).ok_or(ArenaError::Map {
            size,
            source: rustix::io::Errno::NOMEM,
        })?;

        trace::debug!(size, "arena region mapped");

        Ok(Self {
            region: Arc::new(ArenaRegion {
                base,
                size,
                next: AtomicUsize::new(0),
            }),
        })
    }

    /// Bytes not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.size() - self.region.next.load(Ordering::Relaxed).min(self.size())
    }

    /// Total bytes in the region.
    #[must_use]
    pub fn size(&self) -> usize {
        self.region.size
    }
}

// SAFETY: blocks are disjoint by construction (each CAS moves `next` past
// the block it reserves) and stay mapped for the life of the region, which
// outlives every handle-holding queue.
unsafe impl RingAlloc for Arena {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        let region = &*self.region;
        let base_addr = region.base.as_ptr() as usize;

        let mut next = region.next.load(Ordering::Relaxed);
        loop {
            let start = align_up(base_addr.checked_add(next)?, layout.align()) - base_addr;
            let end = start.checked_add(layout.size())?;
            if end > region.size {
                return None;
            }
            match region
                .next
                .compare_exchange_weak(next, end, Ordering::Relaxed, Ordering::Relaxed)
            {
                // SAFETY: `start < size`, so the offset stays inside the
                // mapping.
                Ok(_) => return NonNull::new(unsafe { region.base.as_ptr().add(start) }),
                Err(observed) => next = observed,
            }
        }
    }

    // dealloc: inherited no-op. The region is reclaimed wholesale below.
}

impl Drop for ArenaRegion {
    fn drop(&mut self) {
        trace::trace!(size = self.size, "arena region unmapped");
        // SAFETY: `base` spans exactly `size` mapped bytes and no handle
        // references the region once the last one is gone. Teardown is best
        // effort; there is nowhere left to report an errno to.
        let _ = unsafe { munmap(self.base.as_ptr().cast(), self.size) };
    }
}
