//! Queue throughput and correctness stress harness.
//!
//! Usage:
//!     cargo run --release --bin ring_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin the (first) producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin the (first) consumer to CPU 2 (default: 2)
//!
//! Drives 10M 16-byte messages `{seq, value = seq * 31337}` through each
//! queue flavor, verifying every payload on the consumer side and printing
//! throughput in M msg/s.

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use minstant::Instant;

use seqring::{mpmc, spsc};

const CAPACITY: u32 = 1024;
const SLOT_SIZE: u32 = 16;
const MSG_COUNT: u64 = 10_000_000;

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn encode(grant: &mut [u8], seq: u64) {
    grant[..8].copy_from_slice(&seq.to_le_bytes());
    grant[8..16].copy_from_slice(&seq.wrapping_mul(31337).to_le_bytes());
}

fn decode(buf: &[u8]) -> (u64, u64) {
    let seq = u64::from_le_bytes(buf[..8].try_into().unwrap());
    let value = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    (seq, value)
}

fn bench_spsc(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (tx, rx) = spsc::channel(CAPACITY, SLOT_SIZE).unwrap();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        let mut errors = 0u64;
        for expected in 0..MSG_COUNT {
            loop {
                if let Some(grant) = rx.pop_claim() {
                    let (seq, value) = decode(&grant);
                    if seq != expected || value != seq.wrapping_mul(31337) {
                        errors += 1;
                    }
                    grant.release();
                    break;
                }
                hint::spin_loop();
            }
        }
        errors
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }
    pin_to_cpu(producer_cpu);

    let start = Instant::now();
    for seq in 0..MSG_COUNT {
        loop {
            if let Some(mut grant) = tx.push_claim() {
                encode(&mut grant, seq);
                grant.publish();
                break;
            }
            hint::spin_loop();
        }
    }

    let errors = consumer.join().unwrap();
    let elapsed = start.elapsed();

    let mmsg_per_s = MSG_COUNT as f64 / elapsed.as_secs_f64() / 1e6;
    println!("spsc: {mmsg_per_s:.2} M msg/s, {errors} errors");
}

fn bench_mpmc(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let sides = 4u64;
    let per_side = MSG_COUNT / sides;

    let (tx, rx) = mpmc::channel(CAPACITY, SLOT_SIZE).unwrap();
    let received_sum = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));

    let start = Instant::now();

    let mut handles = Vec::new();
    for p in 0..sides {
        let tx = tx.clone();
        handles.push(std::thread::spawn(move || {
            if p == 0 {
                pin_to_cpu(producer_cpu);
            }
            for i in 0..per_side {
                let seq = p * per_side + i;
                loop {
                    if let Some(mut grant) = tx.push_claim() {
                        encode(&mut grant, seq);
                        grant.publish();
                        break;
                    }
                    hint::spin_loop();
                }
            }
        }));
    }
    for c in 0..sides {
        let rx = rx.clone();
        let received_sum = Arc::clone(&received_sum);
        let errors = Arc::clone(&errors);
        handles.push(std::thread::spawn(move || {
            if c == 0 {
                pin_to_cpu(consumer_cpu);
            }
            let mut sum = 0u64;
            let mut bad = 0u64;
            for _ in 0..per_side {
                loop {
                    if let Some(grant) = rx.pop_claim() {
                        let (seq, value) = decode(&grant);
                        if value != seq.wrapping_mul(31337) {
                            bad += 1;
                        }
                        sum = sum.wrapping_add(seq);
                        grant.release();
                        break;
                    }
                    hint::spin_loop();
                }
            }
            received_sum.fetch_add(sum, Ordering::Relaxed);
            errors.fetch_add(bad, Ordering::Relaxed);
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
    let elapsed = start.elapsed();

    // Sum over [0, MSG_COUNT) catches any missed or duplicated sequence.
    let expected_sum = MSG_COUNT * (MSG_COUNT - 1) / 2;
    let complete = received_sum.load(Ordering::Relaxed) == expected_sum;

    let mmsg_per_s = MSG_COUNT as f64 / elapsed.as_secs_f64() / 1e6;
    println!(
        "mpmc 4x4: {mmsg_per_s:.2} M msg/s, {} errors, completeness {}",
        errors.load(Ordering::Relaxed),
        if complete { "ok" } else { "FAILED" }
    );
}

fn main() {
    seqring::init_tracing();
    let (producer_cpu, consumer_cpu) = get_cpu_affinity();

    println!("seqring (capacity={CAPACITY}, slot_size={SLOT_SIZE}, msgs={MSG_COUNT}):");
    bench_spsc(producer_cpu, consumer_cpu);
    bench_mpmc(producer_cpu, consumer_cpu);
}
