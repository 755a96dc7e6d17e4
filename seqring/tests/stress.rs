//! End-to-end stress scenarios for both queue flavors.
//!
//! These run the full workloads at test-suite scale: deterministic
//! SPSC ordering, MPMC completeness with disjoint producer ranges and
//! exactly-once accounting, and a capacity-2 wrap-around soak. The bench
//! binary (`ring_bench`) drives the same workloads at full 10M-message
//! scale.
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=seqring=trace cargo test --features tracing --test stress -- --nocapture
//! ```

use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicU8, Ordering};

use seqring::{PopError, mpmc, spsc};

static INIT_TRACING: Once = Once::new();

/// Initialize tracing for tests (only once).
fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        seqring::init_tracing();
    });
}

fn encode(buf: &mut [u8], seq: u64) {
    buf[..8].copy_from_slice(&seq.to_le_bytes());
    buf[8..16].copy_from_slice(&seq.wrapping_mul(31337).to_le_bytes());
}

fn decode(buf: &[u8]) -> (u64, u64) {
    let seq = u64::from_le_bytes(buf[..8].try_into().unwrap());
    let value = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    (seq, value)
}

#[test]
#[serial_test::serial]
fn spsc_determinism() {
    init_test_tracing();

    let count = 1_000_000u64;
    let (tx, rx) = spsc::channel(1024, 16).unwrap();

    let producer = std::thread::spawn(move || {
        let mut msg = [0u8; 16];
        for seq in 0..count {
            encode(&mut msg, seq);
            while tx.push(&msg).is_err() {
                std::hint::spin_loop();
            }
        }
    });

    let consumer = std::thread::spawn(move || {
        let mut buf = [0u8; 16];
        for expected in 0..count {
            while rx.pop(&mut buf).is_err() {
                std::hint::spin_loop();
            }
            let (seq, value) = decode(&buf);
            assert_eq!(seq, expected, "out-of-order delivery");
            assert_eq!(value, seq.wrapping_mul(31337), "payload corrupted");
        }
        assert_eq!(rx.pop(&mut buf), Err(PopError::Empty));
    });

    producer.join().unwrap();
    consumer.join().unwrap();
}

#[test]
#[serial_test::serial]
fn mpmc_completeness_and_integrity() {
    init_test_tracing();

    let sides = 4u64;
    let per_side = 250_000u64;
    let total = sides * per_side;

    let (tx, rx) = mpmc::channel(1024, 16).unwrap();
    let seen: Arc<Vec<AtomicU8>> = Arc::new((0..total).map(|_| AtomicU8::new(0)).collect());

    let mut handles = Vec::new();
    // Producers own disjoint sequence ranges.
    for p in 0..sides {
        let tx = tx.clone();
        handles.push(std::thread::spawn(move || {
            let mut msg = [0u8; 16];
            for i in 0..per_side {
                encode(&mut msg, p * per_side + i);
                while tx.push(&msg).is_err() {
                    std::hint::spin_loop();
                }
            }
        }));
    }
    // Each consumer takes exactly a quarter of the stream.
    for _ in 0..sides {
        let rx = rx.clone();
        let seen = Arc::clone(&seen);
        handles.push(std::thread::spawn(move || {
            let mut buf = [0u8; 16];
            for _ in 0..per_side {
                while rx.pop(&mut buf).is_err() {
                    std::hint::spin_loop();
                }
                let (seq, value) = decode(&buf);
                assert_eq!(value, seq.wrapping_mul(31337), "payload corrupted");
                let prev = seen[seq as usize].fetch_add(1, Ordering::Relaxed);
                assert_eq!(prev, 0, "sequence {seq} delivered twice");
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for (seq, flag) in seen.iter().enumerate() {
        assert_eq!(flag.load(Ordering::Relaxed), 1, "sequence {seq} missed");
    }
    let mut buf = [0u8; 16];
    assert_eq!(rx.pop(&mut buf), Err(PopError::Empty));
}

#[test]
fn capacity_two_soak() {
    init_test_tracing();

    let (tx, rx) = spsc::channel(2, 16).unwrap();
    let mut msg = [0u8; 16];
    let mut buf = [0u8; 16];

    // Sequential push/pop pairs lap the two slots half a million times
    // each; every payload must round-trip intact.
    for seq in 0..1_000_000u64 {
        encode(&mut msg, seq);
        tx.push(&msg).unwrap();
        rx.pop(&mut buf).unwrap();
        assert_eq!(buf, msg);
    }
    assert_eq!(rx.pop(&mut buf), Err(PopError::Empty));
}

#[test]
fn mpmc_arena_backed_round_trip() {
    init_test_tracing();

    let arena = seqring::alloc::Arena::with_capacity(1 << 20).unwrap();
    let (tx, rx) = mpmc::channel_in(arena, 256, 32).unwrap();

    let mut msg = [0u8; 32];
    for seq in 0..256u64 {
        encode(&mut msg, seq);
        tx.push(&msg).unwrap();
    }

    let mut buf = [0u8; 32];
    for expected in 0..256u64 {
        rx.pop(&mut buf).unwrap();
        let (seq, value) = decode(&buf);
        assert_eq!(seq, expected);
        assert_eq!(value, seq.wrapping_mul(31337));
    }
}
