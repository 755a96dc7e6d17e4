//! Lock-free MPMC byte queue for inter-thread handoff.
//!
//! The multi-producer, multi-consumer flavor of the per-slot generation
//! protocol. Claiming a position becomes a compare-exchange loop on the
//! cursor; everything else - slot layout, publish/release stores, the
//! full/empty rules - is identical to [`crate::spsc`].
//!
//! # Overview
//!
//! - [`Producer`] / [`Consumer`] - cloneable ends; one handle per thread,
//!   any number of handles
//! - Global FIFO: successful consumer claims yield positions `0, 1, 2, …`
//!   in claim order across all consumer threads
//! - Per-position integrity: a consumer at position `p` observes exactly
//!   the bytes the producer at `p` published, even when producers finish
//!   their in-slot writes out of order
//!
//! # Example
//!
//! ```
//! let (tx, rx) = seqring::mpmc::channel(1024, 16)?;
//!
//! let tx2 = tx.clone();
//! tx.push(b"from handle one")?;
//! tx2.push(b"from handle two")?;
//!
//! let mut buf = [0u8; 15];
//! rx.pop(&mut buf)?;
//! assert_eq!(&buf, b"from handle one");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::alloc::{RingAlloc, SystemAlloc};
use crate::ring::{InitError, PopError, PushError, RawRing, ReadGrant, WriteGrant};

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the MPMC queue.
///
/// # Thread Safety
///
/// `Producer` is [`Send`] and `Clone` but **not** [`Sync`]: clone one
/// handle per producer thread instead of sharing a reference. Any number
/// of producer handles may push concurrently.
pub struct Producer<A: RingAlloc = SystemAlloc> {
    ring: Arc<RawRing<A>>,
    _unsync: PhantomUnsync,
}

/// Read end of the MPMC queue.
///
/// Cloneable like [`Producer`]; any number of consumer handles may pop
/// concurrently, and their successful claims observe globally FIFO
/// positions.
pub struct Consumer<A: RingAlloc = SystemAlloc> {
    ring: Arc<RawRing<A>>,
    _unsync: PhantomUnsync,
}

impl<A: RingAlloc> Clone for Producer<A> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            _unsync: PhantomData,
        }
    }
}

impl<A: RingAlloc> Clone for Consumer<A> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            _unsync: PhantomData,
        }
    }
}

/// Creates a bounded MPMC byte queue on the process heap.
///
/// Argument constraints and teardown are as
/// [`spsc::channel`](crate::spsc::channel): power-of-two capacity in
/// `[2, 2^31]`, non-zero slot size, slot array released when the last
/// handle drops.
///
/// # Errors
///
/// Returns [`InitError`] for invalid arguments or allocation failure.
pub fn channel(capacity: u32, slot_size: u32) -> Result<(Producer, Consumer), InitError> {
    channel_in(SystemAlloc, capacity, slot_size)
}

/// Creates a bounded MPMC byte queue backed by the given allocator.
///
/// # Errors
///
/// As [`channel`].
pub fn channel_in<A: RingAlloc>(
    alloc: A,
    capacity: u32,
    slot_size: u32,
) -> Result<(Producer<A>, Consumer<A>), InitError> {
    let ring = Arc::new(RawRing::new(alloc, capacity, slot_size)?);
    Ok((
        Producer {
            ring: Arc::clone(&ring),
            _unsync: PhantomData,
        },
        Consumer {
            ring,
            _unsync: PhantomData,
        },
    ))
}

impl<A: RingAlloc> Producer<A> {
    /// Payload width of each slot, in bytes.
    #[must_use]
    pub fn slot_size(&self) -> u32 {
        self.ring.slot_size()
    }

    /// Number of slots in the ring.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.ring.capacity()
    }

    /// Claims a slot at the head cursor for in-place writing.
    ///
    /// Returns `None` when the queue is full. The compare-exchange on the
    /// cursor is relaxed on both paths - slot handoff is ordered by the
    /// generation counter, not by the cursor - and a failed exchange
    /// retries from the value it observed.
    #[inline]
    #[must_use]
    pub fn push_claim(&self) -> Option<WriteGrant<'_>> {
        let ring = &*self.ring;

        let mut pos = ring.head.load(Ordering::Relaxed);
        loop {
            let seq = ring.seq(pos).load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as i32;

            if diff == 0 {
                // Slot is in producer hands at this position; race the
                // other producers for it.
                match ring.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some(ring.write_grant(pos)),
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                // The consumer side has not released this slot yet.
                return None;
            } else {
                // Another producer already advanced past this position.
                pos = ring.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Copies `data` into a claimed slot and publishes it.
    ///
    /// # Errors
    ///
    /// [`PushError::TooLarge`] if `data` exceeds the slot size,
    /// [`PushError::Full`] when no slot is available.
    #[inline]
    pub fn push(&self, data: &[u8]) -> Result<(), PushError> {
        let slot_size = self.ring.slot_size();
        if data.len() > slot_size as usize {
            return Err(PushError::TooLarge {
                len: data.len(),
                slot_size,
            });
        }
        let mut grant = self.push_claim().ok_or(PushError::Full)?;
        grant[..data.len()].copy_from_slice(data);
        grant.publish();
        Ok(())
    }
}

impl<A: RingAlloc> Consumer<A> {
    /// Payload width of each slot, in bytes.
    #[must_use]
    pub fn slot_size(&self) -> u32 {
        self.ring.slot_size()
    }

    /// Number of slots in the ring.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.ring.capacity()
    }

    /// Claims a slot at the tail cursor for in-place reading.
    ///
    /// Returns `None` when the queue is empty. A consumer at position `p`
    /// only wins the claim once the producer at `p` has published, so the
    /// payload bytes it sees are complete.
    #[inline]
    #[must_use]
    pub fn pop_claim(&self) -> Option<ReadGrant<'_>> {
        let ring = &*self.ring;

        let mut pos = ring.tail.load(Ordering::Relaxed);
        loop {
            let seq = ring.seq(pos).load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as i32;

            if diff == 0 {
                // Slot is published at this position; race the other
                // consumers for it.
                match ring.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some(ring.read_grant(pos)),
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                // No published record at the tail.
                return None;
            } else {
                // Another consumer already advanced past this position.
                pos = ring.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Copies the front record into `dest` and releases its slot.
    ///
    /// # Errors
    ///
    /// [`PopError::TooLarge`] if `dest` asks for more bytes than a slot
    /// holds, [`PopError::Empty`] when nothing is published.
    #[inline]
    pub fn pop(&self, dest: &mut [u8]) -> Result<(), PopError> {
        let slot_size = self.ring.slot_size();
        if dest.len() > slot_size as usize {
            return Err(PopError::TooLarge {
                len: dest.len(),
                slot_size,
            });
        }
        let grant = self.pop_claim().ok_or(PopError::Empty)?;
        dest.copy_from_slice(&grant[..dest.len()]);
        grant.release();
        Ok(())
    }
}
