//! Core slot array and sequence-number protocol.
//!
//! Both queue flavors store their payloads in a [`RawRing`]: one contiguous
//! allocation of `capacity` fixed-stride slots, each headed by a 32-bit
//! atomic generation counter. The flavors differ only in how they advance
//! their cursors; the layout math, the generation protocol, the claim
//! tokens, and teardown all live here.
//!
//! # Protocol
//!
//! A free-running 32-bit position `p` folds to slot index `p & mask`. The
//! slot's generation counter takes exactly one of four states relative to
//! `p`:
//!
//! - `seq == p` - empty, claimable by a producer
//! - `seq == p + 1` - filled, claimable by a consumer
//! - `seq == p + capacity` - empty again, claimable by the producer that
//!   arrives on the next lap
//! - anything else - a claim is in flight and the slot is not ours
//!
//! Producers and consumers compare `seq` against their expected value with
//! wrapping 32-bit arithmetic, so cursor wrap past `2^32` is invisible to
//! the algorithm. The generation advances by `capacity` per lap; with
//! capacity capped at `2^31`, a cursor would have to lap the entire 32-bit
//! range within a single claim window for two positions to alias.
//!
//! # Memory ordering
//!
//! The only cross-thread handoff is the payload, and it is gated entirely
//! by the slot's generation counter: claim-side loads are `Acquire`,
//! publish/release stores are `Release`. The `head`/`tail` cursors are
//! hints and stay `Relaxed` throughout, including the MPMC
//! compare-exchange.

use std::alloc::Layout;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use crate::alloc::RingAlloc;
use crate::trace;

/// Cache-line size assumed for false-sharing separation.
pub(crate) const CACHE_LINE: usize = 64;

/// Errors surfaced while building a queue.
#[derive(Debug, Error)]
pub enum InitError {
    /// Capacity must be a power of two between 2 and 2^31.
    #[error("capacity {0} is not a power of two >= 2")]
    BadCapacity(u32),
    /// Slots must hold at least one payload byte.
    #[error("slot size must be non-zero")]
    ZeroSlotSize,
    /// `capacity * stride` does not fit in the address space.
    #[error("slot array of {capacity} slots with {slot_size}-byte payloads overflows the address space")]
    LayoutOverflow { capacity: u32, slot_size: u32 },
    /// The allocator returned no memory; the queue was not created.
    #[error("allocator could not provide the {size}-byte slot array")]
    AllocFailed { size: usize },
}

/// Unsuccessful outcomes of a copy-in [`push`](crate::spsc::Producer::push).
///
/// `Full` is flow control, not a fault: callers pick their own retry
/// discipline (spin, yield, back off).
#[derive(Debug, PartialEq, Eq, Error)]
pub enum PushError {
    /// No slot has been released by the consumer side yet.
    #[error("queue is full")]
    Full,
    /// The source buffer does not fit in a slot.
    #[error("payload of {len} bytes exceeds slot size {slot_size}")]
    TooLarge { len: usize, slot_size: u32 },
}

/// Unsuccessful outcomes of a copy-out [`pop`](crate::spsc::Consumer::pop).
#[derive(Debug, PartialEq, Eq, Error)]
pub enum PopError {
    /// No published slot is waiting at the tail.
    #[error("queue is empty")]
    Empty,
    /// The destination buffer asks for more bytes than a slot holds.
    #[error("read of {len} bytes exceeds slot size {slot_size}")]
    TooLarge { len: usize, slot_size: u32 },
}

/// Rounds `n` up to the next multiple of `align` (a power of two).
pub(crate) const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Per-slot header: the generation counter that drives the protocol.
#[repr(C)]
struct SlotHeader {
    seq: AtomicU32,
}

const SLOT_HEADER_SIZE: usize = size_of::<SlotHeader>();
const SLOT_HEADER_ALIGN: usize = align_of::<SlotHeader>();

/// A free-running 32-bit cursor, alone on its cache line.
///
/// `head` and `tail` sit in separate [`Cursor`] cells so producer-side and
/// consumer-side traffic never false-share.
#[repr(C)]
#[repr(align(64))]
pub(crate) struct Cursor(AtomicU32);

impl Cursor {
    const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> u32 {
        self.0.load(order)
    }

    #[inline]
    pub(crate) fn store(&self, pos: u32, order: Ordering) {
        self.0.store(pos, order);
    }

    #[inline]
    pub(crate) fn compare_exchange_weak(
        &self,
        current: u32,
        new: u32,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u32, u32> {
        self.0.compare_exchange_weak(current, new, success, failure)
    }
}

/// The slot array shared by both queue flavors.
///
/// Owns a single `capacity * stride` allocation. Slot `i` begins at
/// `base + i * stride` with its header first and `slot_size` payload bytes
/// after it. The allocator handle is retained for teardown only.
pub(crate) struct RawRing<A: RingAlloc> {
    /// Base of the slot allocation.
    slots: NonNull<u8>,
    /// Payload bytes available in each slot.
    slot_size: u32,
    /// Payload-inclusive slot footprint, aligned to the header alignment.
    stride: u32,
    /// `capacity - 1`; positions fold to slot indices with `pos & mask`.
    mask: u32,
    /// Retained so teardown returns the slot array where it came from.
    alloc: A,
    /// Producer cursor.
    pub(crate) head: Cursor,
    /// Consumer cursor.
    pub(crate) tail: Cursor,
}

impl<A: RingAlloc> RawRing<A> {
    /// Allocates the slot array and stamps every slot with generation 0.
    ///
    /// Slot payloads start zeroed so the byte views handed out by grants
    /// are always over initialized memory.
    pub(crate) fn new(alloc: A, capacity: u32, slot_size: u32) -> Result<Self, InitError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(InitError::BadCapacity(capacity));
        }
        if slot_size == 0 {
            return Err(InitError::ZeroSlotSize);
        }

        // Stride math in u64: a u32 slot size plus the header cannot wrap
        // there, and the result must still fit a u32 per the data model.
        let stride64 = {
            let bytes = SLOT_HEADER_SIZE as u64 + u64::from(slot_size);
            (bytes + SLOT_HEADER_ALIGN as u64 - 1) & !(SLOT_HEADER_ALIGN as u64 - 1)
        };
        let stride = usize::try_from(stride64)
            .ok()
            .filter(|&s| s <= u32::MAX as usize)
            .ok_or(InitError::LayoutOverflow { capacity, slot_size })?;
        let size = stride
            .checked_mul(capacity as usize)
            .ok_or(InitError::LayoutOverflow { capacity, slot_size })?;
        let layout = Layout::from_size_align(size, CACHE_LINE)
            .map_err(|_| InitError::LayoutOverflow { capacity, slot_size })?;

        let slots = alloc
            .alloc(layout)
            .ok_or(InitError::AllocFailed { size })?;

        // SAFETY: the allocator handed us `size` exclusive bytes. Zero the
        // whole region first (payload bytes must be initialized before a
        // grant exposes them as &[u8]), then stamp each slot header with
        // its index, the producer-generation-0 state.
        unsafe {
            slots.as_ptr().write_bytes(0, size);
            for i in 0..capacity {
                let header = slots.as_ptr().add(i as usize * stride).cast::<SlotHeader>();
                header.write(SlotHeader {
                    seq: AtomicU32::new(i),
                });
            }
        }

        trace::debug!(capacity, slot_size, stride, "slot array allocated");

        Ok(Self {
            slots,
            slot_size,
            stride: stride as u32,
            mask: capacity - 1,
            alloc,
            head: Cursor::new(),
            tail: Cursor::new(),
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u32 {
        self.mask + 1
    }

    #[inline]
    pub(crate) fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Generation counter of the slot that `pos` folds to.
    #[inline]
    pub(crate) fn seq(&self, pos: u32) -> &AtomicU32 {
        // SAFETY: `pos & mask` is < capacity so the offset stays inside the
        // allocation, and every header was initialized in `new`.
        unsafe {
            let header = self
                .slots
                .as_ptr()
                .add((pos & self.mask) as usize * self.stride as usize)
                .cast::<SlotHeader>();
            &(*header).seq
        }
    }

    /// Payload area of the slot that `pos` folds to.
    ///
    /// Valid for `slot_size` bytes. Callers must hold the claim on `pos`
    /// before touching it.
    #[inline]
    fn payload_ptr(&self, pos: u32) -> *mut u8 {
        // SAFETY: in bounds per the mask fold; the payload begins directly
        // after the header.
        unsafe {
            self.slots
                .as_ptr()
                .add((pos & self.mask) as usize * self.stride as usize)
                .add(SLOT_HEADER_SIZE)
        }
    }

    /// Builds the write token for a position the caller has just claimed.
    #[inline]
    pub(crate) fn write_grant(&self, pos: u32) -> WriteGrant<'_> {
        WriteGrant {
            seq: self.seq(pos),
            payload: self.payload_ptr(pos),
            len: self.slot_size as usize,
            pos,
        }
    }

    /// Builds the read token for a position the caller has just claimed.
    #[inline]
    pub(crate) fn read_grant(&self, pos: u32) -> ReadGrant<'_> {
        ReadGrant {
            seq: self.seq(pos),
            payload: self.payload_ptr(pos),
            len: self.slot_size as usize,
            pos,
            next_seq: pos.wrapping_add(self.capacity()),
        }
    }

    /// Restarts the ring as if `pos` pushes and pops had already happened.
    ///
    /// Test hook for exercising 32-bit cursor wrap without driving four
    /// billion operations. `pos` must be a multiple of the capacity so the
    /// re-stamped generations line up with their slot indices.
    #[cfg(test)]
    pub(crate) fn restart_at(&self, pos: u32) {
        debug_assert_eq!(pos & self.mask, 0);
        for i in 0..self.capacity() {
            self.seq(pos.wrapping_add(i))
                .store(pos.wrapping_add(i), Ordering::Relaxed);
        }
        self.head.store(pos, Ordering::Relaxed);
        self.tail.store(pos, Ordering::Relaxed);
    }
}

impl<A: RingAlloc> Drop for RawRing<A> {
    fn drop(&mut self) {
        let size = self.stride as usize * (self.mask as usize + 1);
        trace::trace!(size, "slot array released");
        // SAFETY: `slots` came from `self.alloc` with exactly this layout,
        // and the ring is the sole owner of the allocation.
        unsafe {
            let layout = Layout::from_size_align_unchecked(size, CACHE_LINE);
            self.alloc.dealloc(self.slots, layout);
        }
    }
}

// SAFETY: the ring owns its slot allocation outright; cross-thread access
// to payload bytes is gated by the acquire/release pair on each slot's
// generation counter, and the cursors are atomics.
unsafe impl<A: RingAlloc + Send> Send for RawRing<A> {}
unsafe impl<A: RingAlloc + Sync> Sync for RawRing<A> {}

/// Exclusive claim on one slot's payload area, write side.
///
/// Derefs to the whole `slot_size`-byte payload as `&mut [u8]`. The slot
/// becomes visible to the consumer side when the grant is
/// [`publish`](WriteGrant::publish)ed; dropping the grant publishes too,
/// with whatever bytes the slot currently holds. Consuming the grant is
/// what makes "publish exactly once after a successful claim" structural
/// rather than a caller obligation.
pub struct WriteGrant<'a> {
    seq: &'a AtomicU32,
    payload: *mut u8,
    len: usize,
    pos: u32,
}

impl WriteGrant<'_> {
    /// Position token of the claimed slot.
    #[must_use]
    pub fn position(&self) -> u32 {
        self.pos
    }

    /// Publishes the slot, handing it to the consumer side.
    ///
    /// Equivalent to dropping the grant; spelled out so call sites read as
    /// the claim/publish protocol.
    #[inline]
    pub fn publish(self) {}
}

impl Deref for WriteGrant<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        // SAFETY: the grant holds the claim on this slot, so the payload
        // area is exclusively ours for `len` initialized bytes.
        unsafe { slice::from_raw_parts(self.payload, self.len) }
    }
}

impl DerefMut for WriteGrant<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `deref`; the claim gives exclusive write access.
        unsafe { slice::from_raw_parts_mut(self.payload, self.len) }
    }
}

impl Drop for WriteGrant<'_> {
    #[inline]
    fn drop(&mut self) {
        // Release pairs with the consumer's acquire load of the generation
        // counter, making the payload bytes visible.
        self.seq.store(self.pos.wrapping_add(1), Ordering::Release);
    }
}

/// Exclusive claim on one slot's payload area, read side.
///
/// Derefs to the payload as `&[u8]`. The slot returns to the producer pool
/// when the grant is [`release`](ReadGrant::release)d or dropped.
pub struct ReadGrant<'a> {
    seq: &'a AtomicU32,
    payload: *const u8,
    len: usize,
    pos: u32,
    next_seq: u32,
}

impl ReadGrant<'_> {
    /// Position token of the claimed slot.
    #[must_use]
    pub fn position(&self) -> u32 {
        self.pos
    }

    /// Returns the slot to the producer pool.
    ///
    /// Equivalent to dropping the grant.
    #[inline]
    pub fn release(self) {}
}

impl Deref for ReadGrant<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        // SAFETY: the grant holds the claim on this slot; the producer's
        // release store happened before our acquire load of the generation.
        unsafe { slice::from_raw_parts(self.payload, self.len) }
    }
}

impl Drop for ReadGrant<'_> {
    #[inline]
    fn drop(&mut self) {
        // Release stores the generation the producer expects on its next
        // lap around the ring.
        self.seq.store(self.next_seq, Ordering::Release);
    }
}
