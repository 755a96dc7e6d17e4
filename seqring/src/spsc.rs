//! Lock-free SPSC byte queue for inter-thread handoff.
//!
//! A bounded queue moving fixed-size byte records between exactly one
//! producer and exactly one consumer. Both roles run the per-slot
//! generation protocol from [`crate::ring`]; with a single thread per role
//! there is no contention on the cursors, so claims are a plain load,
//! compare, and relaxed store - no compare-exchange anywhere.
//!
//! # Overview
//!
//! - [`Producer`] - write end (single producer per queue)
//! - [`Consumer`] - read end (single consumer per queue)
//! - Claim/publish split for zero-copy in-place construction, with
//!   copy-in [`push`](Producer::push) / copy-out [`pop`](Consumer::pop)
//!   built strictly on top of it
//! - Non-blocking: full and empty are immediate returns; callers choose
//!   their own retry discipline
//!
//! # Example
//!
//! ```
//! let (tx, rx) = seqring::spsc::channel(1024, 16)?;
//!
//! // Zero-copy: write straight into the slot, then publish.
//! let mut grant = tx.push_claim().expect("fresh queue has room");
//! grant[..8].copy_from_slice(&31337u64.to_le_bytes());
//! grant.publish();
//!
//! let grant = rx.pop_claim().expect("just published");
//! assert_eq!(grant[..8], 31337u64.to_le_bytes());
//! grant.release();
//! # Ok::<(), seqring::InitError>(())
//! ```
//!
//! # Differences from [`crate::mpmc`]
//!
//! Same external contract, same slot protocol. This flavor trades the CAS
//! loop for single-role cursor ownership and refuses to hand out clones of
//! its handles.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::alloc::{RingAlloc, SystemAlloc};
use crate::ring::{InitError, PopError, PushError, RawRing, ReadGrant, WriteGrant};

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the SPSC queue.
///
/// # Thread Safety
///
/// `Producer` is [`Send`] but **not** [`Sync`] and not `Clone`, enforcing
/// the single-producer contract at compile time:
/// - Ownership can move to another thread
/// - `&Producer` cannot be shared across threads (no concurrent claims)
pub struct Producer<A: RingAlloc = SystemAlloc> {
    ring: Arc<RawRing<A>>,
    _unsync: PhantomUnsync,
}

/// Read end of the SPSC queue.
///
/// Only one consumer exists per queue. See [`Producer`] for thread safety
/// details (same semantics apply).
pub struct Consumer<A: RingAlloc = SystemAlloc> {
    ring: Arc<RawRing<A>>,
    _unsync: PhantomUnsync,
}

/// Creates a bounded SPSC byte queue on the process heap.
///
/// `capacity` must be a power of two between 2 and 2^31; `slot_size` is the
/// payload width in bytes, at least 1. Both are fixed for the life of the
/// queue. The slot array is released when the last handle drops.
///
/// # Errors
///
/// Returns [`InitError`] for an invalid capacity or slot size, or when the
/// allocation fails. No queue exists on error.
pub fn channel(capacity: u32, slot_size: u32) -> Result<(Producer, Consumer), InitError> {
    channel_in(SystemAlloc, capacity, slot_size)
}

/// Creates a bounded SPSC byte queue backed by the given allocator.
///
/// The queue keeps a copy of `alloc` and returns the slot array through it
/// on teardown. See [`channel`] for argument constraints.
///
/// # Errors
///
/// As [`channel`]; [`InitError::AllocFailed`] reports an exhausted
/// allocator.
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

    /// Claims the slot at the head cursor for in-place writing.
    ///
    /// Returns `None` when the queue is full - the consumer has not yet
    /// released the slot this position folds to. The claim advances the
    /// head immediately; the slot becomes visible to the consumer only when
    /// the returned grant publishes. Several claims may be outstanding at
    /// once and may publish in any order.
    ///
    /// The head advance is a relaxed store issued before the payload is
    /// written. That is sound here: the cursor is a single-role hint, and
    /// both fullness detection and payload visibility are gated exclusively
    /// by the slot's generation counter.
    #[inline]
    #[must_use]
    pub fn push_claim(&self) -> Option<WriteGrant<'_>> {
        let ring = &*self.ring;

        let pos = ring.head.load(Ordering::Relaxed);
        // Acquire pairs with the consumer's release; a matching generation
        // means the slot is back in producer hands.
        let seq = ring.seq(pos).load(Ordering::Acquire);
        if seq != pos {
            return None;
        }
        ring.head.store(pos.wrapping_add(1), Ordering::Relaxed);
        Some(ring.write_grant(pos))
    }

    /// Copies `data` into the next slot and publishes it.
    ///
    /// `data` may be shorter than the slot; the payload's tail bytes keep
    /// whatever the slot last held.
    ///
    /// # Errors
    ///
    /// [`PushError::TooLarge`] if `data` exceeds the slot size,
    /// [`PushError::Full`] when no slot is available. Full is flow control,
    /// not a fault.
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

    /// Claims the slot at the tail cursor for in-place reading.
    ///
    /// Returns `None` when the queue is empty - no published record waits
    /// at the tail. On success the tail advances and the slot returns to
    /// the producer pool when the grant is released.
    #[inline]
    #[must_use]
    pub fn pop_claim(&self) -> Option<ReadGrant<'_>> {
        let ring = &*self.ring;

        let pos = ring.tail.load(Ordering::Relaxed);
        // Acquire pairs with the producer's publish; generation `pos + 1`
        // means the payload write completed.
        let seq = ring.seq(pos).load(Ordering::Acquire);
        if seq != pos.wrapping_add(1) {
            return None;
        }
        ring.tail.store(pos.wrapping_add(1), Ordering::Relaxed);
        Some(ring.read_grant(pos))
    }

    /// Copies the front record into `dest` and releases its slot.
    ///
    /// Exactly `dest.len()` bytes are copied from the start of the payload.
    ///
    /// # Errors
    ///
    /// [`PopError::TooLarge`] if `dest` asks for more bytes than a slot
    /// holds, [`PopError::Empty`] when nothing is published. Empty is flow
    /// control, not a fault.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Arena;

    #[test]
    fn basic_push_pop() {
        let (tx, rx) = channel(8, 4).unwrap();

        tx.push(&42u32.to_le_bytes()).unwrap();

        let mut buf = [0u8; 4];
        rx.pop(&mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 42);
        assert_eq!(rx.pop(&mut buf), Err(PopError::Empty));
    }

    #[test]
    fn rejects_bad_capacities() {
        for capacity in [0, 1, 3, 5, 6, 7, 9, 12, 1000] {
            assert!(
                matches!(channel(capacity, 8), Err(InitError::BadCapacity(c)) if c == capacity),
                "capacity {capacity} should be rejected"
            );
        }
        for capacity in [2, 4, 8, 1024, 1 << 20] {
            assert!(channel(capacity, 8).is_ok(), "capacity {capacity} is legal");
        }
    }

    #[test]
    fn rejects_zero_slot_size() {
        assert!(matches!(channel(8, 0), Err(InitError::ZeroSlotSize)));
    }

    #[test]
    fn rejects_oversized_payloads() {
        let (tx, rx) = channel(4, 4).unwrap();

        assert_eq!(
            tx.push(&[0u8; 5]),
            Err(PushError::TooLarge {
                len: 5,
                slot_size: 4
            })
        );

        let mut big = [0u8; 5];
        assert_eq!(
            rx.pop(&mut big),
            Err(PopError::TooLarge {
                len: 5,
                slot_size: 4
            })
        );
    }

    #[test]
    fn exact_fullness_boundary() {
        let (tx, rx) = channel(4, 4).unwrap();

        for i in 0..4u32 {
            tx.push(&i.to_le_bytes()).unwrap();
        }
        assert_eq!(tx.push(&99u32.to_le_bytes()), Err(PushError::Full));

        // One pop re-enables exactly one push.
        let mut buf = [0u8; 4];
        rx.pop(&mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 0);
        tx.push(&4u32.to_le_bytes()).unwrap();
        assert_eq!(tx.push(&100u32.to_le_bytes()), Err(PushError::Full));
    }

    #[test]
    fn emptiness_signaling() {
        let (tx, rx) = channel(8, 4).unwrap();
        let mut buf = [0u8; 4];

        assert_eq!(rx.pop(&mut buf), Err(PopError::Empty));
        tx.push(&7u32.to_le_bytes()).unwrap();
        rx.pop(&mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 7);
        assert_eq!(rx.pop(&mut buf), Err(PopError::Empty));
    }

    #[test]
    fn smallest_legal_capacity() {
        let (tx, rx) = channel(2, 8).unwrap();
        let mut buf = [0u8; 8];

        for round in 0..5u64 {
            tx.push(&(round * 2).to_le_bytes()).unwrap();
            tx.push(&(round * 2 + 1).to_le_bytes()).unwrap();
            assert_eq!(tx.push(&[0u8; 8]), Err(PushError::Full));

            rx.pop(&mut buf).unwrap();
            assert_eq!(u64::from_le_bytes(buf), round * 2);
            rx.pop(&mut buf).unwrap();
            assert_eq!(u64::from_le_bytes(buf), round * 2 + 1);
            assert_eq!(rx.pop(&mut buf), Err(PopError::Empty));
        }
    }

    #[test]
    fn short_push_leaves_slot_tail_bytes() {
        let (tx, rx) = channel(2, 4).unwrap();
        let mut buf = [0u8; 4];

        tx.push(&[0xAA; 4]).unwrap();
        rx.pop(&mut buf).unwrap();

        // Same slot on the next lap: a 2-byte push must leave the old tail
        // bytes in place, and a short pop reads only what it asked for.
        tx.push(&[0u8; 4]).unwrap();
        rx.pop(&mut buf).unwrap();
        tx.push(&[0x55, 0x66]).unwrap();
        rx.pop(&mut buf).unwrap();
        assert_eq!(buf, [0x55, 0x66, 0xAA, 0xAA]);
    }

    #[test]
    fn claim_positions_are_sequential() {
        let (tx, rx) = channel(8, 4).unwrap();

        let a = tx.push_claim().unwrap();
        let b = tx.push_claim().unwrap();
        assert_eq!(a.position(), 0);
        assert_eq!(b.position(), 1);

        // Out-of-order publish: position 1 lands first, but the consumer
        // still cannot see past the unpublished position 0.
        b.publish();
        assert!(rx.pop_claim().is_none());
        a.publish();

        let first = rx.pop_claim().unwrap();
        assert_eq!(first.position(), 0);
        first.release();
        assert_eq!(rx.pop_claim().unwrap().position(), 1);
    }

    #[test]
    fn dropped_write_grant_publishes_zeroed_slot() {
        let (tx, rx) = channel(4, 4).unwrap();

        drop(tx.push_claim().unwrap());

        let mut buf = [0u8; 4];
        rx.pop(&mut buf).unwrap();
        assert_eq!(buf, [0u8; 4]);
    }

    #[test]
    fn arena_backed_channel() {
        let arena = Arena::with_capacity(1 << 16).unwrap();
        let (tx, rx) = channel_in(arena.clone(), 64, 16).unwrap();

        for i in 0..64u64 {
            let mut msg = [0u8; 16];
            msg[..8].copy_from_slice(&i.to_le_bytes());
            tx.push(&msg).unwrap();
        }

        let mut buf = [0u8; 16];
        for i in 0..64u64 {
            rx.pop(&mut buf).unwrap();
            assert_eq!(u64::from_le_bytes(buf[..8].try_into().unwrap()), i);
        }

        assert!(arena.remaining() < 1 << 16);
    }

    #[test]
    fn arena_exhaustion_reports_alloc_failure() {
        let arena = Arena::with_capacity(128).unwrap();
        assert!(matches!(
            channel_in(arena, 1024, 64),
            Err(InitError::AllocFailed { .. })
        ));
    }

    #[test]
    fn survives_position_wrap() {
        let (tx, rx) = channel(4, 8).unwrap();

        // Restart the cursors a few laps short of u32::MAX, then drive the
        // queue across the wrap. Only seq-minus-position diffs are ever
        // inspected, so nothing special may happen at the boundary.
        let start = 0u32.wrapping_sub(4 * 4);
        tx.ring.restart_at(start);

        let mut buf = [0u8; 8];
        for i in 0..32u64 {
            tx.push(&i.to_le_bytes()).unwrap();
            rx.pop(&mut buf).unwrap();
            assert_eq!(u64::from_le_bytes(buf), i);
        }
        assert_eq!(rx.pop(&mut buf), Err(PopError::Empty));
    }

    #[test]
    fn full_and_empty_across_wrap() {
        let (tx, rx) = channel(2, 4).unwrap();
        let start = 0u32.wrapping_sub(2);
        tx.ring.restart_at(start);

        // Fill exactly to capacity right before the wrap.
        tx.push(&1u32.to_le_bytes()).unwrap();
        tx.push(&2u32.to_le_bytes()).unwrap();
        assert_eq!(tx.push(&3u32.to_le_bytes()), Err(PushError::Full));

        let mut buf = [0u8; 4];
        rx.pop(&mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 1);
        tx.push(&3u32.to_le_bytes()).unwrap();

        rx.pop(&mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 2);
        rx.pop(&mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 3);
        assert_eq!(rx.pop(&mut buf), Err(PopError::Empty));
    }

    #[test]
    fn concurrent_producer_consumer() {
        let (tx, rx) = channel(64, 16).unwrap();
        let count = 100_000u64;

        let producer = std::thread::spawn(move || {
            for i in 0..count {
                let mut msg = [0u8; 16];
                msg[..8].copy_from_slice(&i.to_le_bytes());
                msg[8..].copy_from_slice(&(i.wrapping_mul(31337)).to_le_bytes());
                while tx.push(&msg).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let consumer = std::thread::spawn(move || {
            let mut buf = [0u8; 16];
            for i in 0..count {
                while rx.pop(&mut buf).is_err() {
                    std::hint::spin_loop();
                }
                let seq = u64::from_le_bytes(buf[..8].try_into().unwrap());
                let value = u64::from_le_bytes(buf[8..].try_into().unwrap());
                assert_eq!(seq, i, "messages must arrive in FIFO order");
                assert_eq!(value, i.wrapping_mul(31337));
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();
    }

    #[test]
    fn handles_move_to_threads() {
        let (tx, rx) = channel(16, 8).unwrap();

        std::thread::spawn(move || {
            for i in 0..10u64 {
                tx.push(&i.to_le_bytes()).unwrap();
            }
        })
        .join()
        .unwrap();

        let mut buf = [0u8; 8];
        for i in 0..10u64 {
            rx.pop(&mut buf).unwrap();
            assert_eq!(u64::from_le_bytes(buf), i);
        }
    }
}
