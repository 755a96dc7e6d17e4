//! Bounded, lock-free byte queues built on per-slot generation counters.
//!
//! `seqring` transfers fixed-size byte records between threads through a
//! power-of-two ring of slots, each headed by a 32-bit atomic generation
//! counter. The counter - not a head-chases-tail comparison - decides who
//! may touch a slot, which is what makes the multi-producer flavor correct
//! without a lock and makes full/empty detection local to each slot.
//!
//! Two specializations share the protocol and the external contract:
//!
//! - [`spsc`] - exactly one producer, one consumer; cursor advances are
//!   plain relaxed stores
//! - [`mpmc`] - any number of cloned handles per side; cursor advances are
//!   a relaxed compare-exchange loop
//!
//! The primary API is the claim/publish split: claim a slot, write (or
//! read) the payload in place through the grant, then publish (or release)
//! it. Copy-in [`push`](spsc::Producer::push) and copy-out
//! [`pop`](spsc::Consumer::pop) are strict compositions on top. Callers
//! that move large payloads should prefer the split.
//!
//! Slot storage comes from a pluggable [`alloc::RingAlloc`] backing:
//! the process heap ([`alloc::SystemAlloc`]) or a bump
//! [`Arena`](alloc::Arena) over an anonymous mapping.
//!
//! Operations never block and never allocate after construction; "full"
//! and "empty" are immediate returns and callers decide whether to spin,
//! yield, or back off.
//!
//! # Example
//!
//! ```
//! let (tx, rx) = seqring::spsc::channel(8, 16)?;
//!
//! tx.push(b"hello")?;
//!
//! let grant = rx.pop_claim().expect("just published");
//! assert_eq!(&grant[..5], b"hello");
//! grant.release();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod alloc;
pub mod mpmc;
pub mod spsc;

mod ring;
mod trace;

pub use ring::{InitError, PopError, PushError, ReadGrant, WriteGrant};
pub use trace::init_tracing;
