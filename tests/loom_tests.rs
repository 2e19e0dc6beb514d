//! Loom-based concurrency tests for the SPSC ring's cached-sequence protocol.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! Loom exhaustively explores thread interleavings to catch memory-ordering
//! bugs that only manifest under specific schedules. We re-derive a
//! simplified version of `Spsc<T>`'s head/tail/cached-head/cached-tail
//! protocol here (loom requires its own atomic types, so `src/spsc.rs` isn't
//! used directly), at a small fixed capacity to keep the state space small
//! enough for exhaustive exploration.

#![cfg(feature = "loom")]

use loom::cell::UnsafeCell;
use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;

const CAPACITY: usize = 4;

struct LoomSpsc {
    tail: AtomicU64,
    cached_head: UnsafeCell<u64>,
    head: AtomicU64,
    cached_tail: UnsafeCell<u64>,
    buffer: [UnsafeCell<u64>; CAPACITY],
}

unsafe impl Send for LoomSpsc {}
unsafe impl Sync for LoomSpsc {}

impl LoomSpsc {
    fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            cached_head: UnsafeCell::new(0),
            head: AtomicU64::new(0),
            cached_tail: UnsafeCell::new(0),
            buffer: std::array::from_fn(|_| UnsafeCell::new(0)),
        }
    }

    fn try_push(&self, value: u64) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let cached_head = unsafe { self.cached_head.with(|p| *p) };
        if tail.wrapping_sub(cached_head) as usize >= CAPACITY {
            let head = self.head.load(Ordering::Acquire);
            unsafe { self.cached_head.with_mut(|p| *p = head) };
            if tail.wrapping_sub(head) as usize >= CAPACITY {
                return false;
            }
        }
        let idx = (tail as usize) % CAPACITY;
        unsafe { self.buffer[idx].with_mut(|p| *p = value) };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    fn try_pop(&self) -> Option<u64> {
        let head = self.head.load(Ordering::Relaxed);
        let mut cached_tail = unsafe { self.cached_tail.with(|p| *p) };
        if head == cached_tail {
            cached_tail = self.tail.load(Ordering::Acquire);
            unsafe { self.cached_tail.with_mut(|p| *p = cached_tail) };
            if head == cached_tail {
                return None;
            }
        }
        let idx = (head as usize) % CAPACITY;
        let value = unsafe { self.buffer[idx].with(|p| *p) };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

/// A value observed by `try_pop` was always written by a `try_push` that
/// happened-before it — no torn or stale reads slip through the cached
/// head/tail refresh.
#[test]
fn loom_spsc_preserves_values() {
    loom::model(|| {
        let ring = Arc::new(LoomSpsc::new());
        let producer_ring = Arc::clone(&ring);

        let producer = thread::spawn(move || {
            producer_ring.try_push(42);
            producer_ring.try_push(43);
        });

        let mut received = Vec::new();
        for _ in 0..4 {
            if let Some(v) = ring.try_pop() {
                received.push(v);
            }
        }

        producer.join().unwrap();
        for _ in 0..4 {
            if let Some(v) = ring.try_pop() {
                received.push(v);
            }
        }

        for v in received {
            assert!(v == 42 || v == 43);
        }
    });
}

/// The queue never holds more items than its capacity, regardless of
/// interleaving between the producer filling it and the consumer draining it.
#[test]
fn loom_spsc_full_ring_then_drain() {
    loom::model(|| {
        let ring = Arc::new(LoomSpsc::new());
        for i in 0..CAPACITY as u64 {
            assert!(ring.try_push(i));
        }
        assert!(!ring.try_push(99));

        let consumer_ring = Arc::clone(&ring);
        let consumer = thread::spawn(move || consumer_ring.try_pop());

        let popped = consumer.join().unwrap();
        assert_eq!(popped, Some(0));
        assert!(ring.try_push(99));
    });
}

/// A concurrent producer/consumer pair never lets the consumer observe more
/// items than the producer actually published.
#[test]
fn loom_spsc_concurrent_never_overreads() {
    loom::model(|| {
        let ring = Arc::new(LoomSpsc::new());
        let producer_ring = Arc::clone(&ring);
        let consumer_ring = Arc::clone(&ring);

        let producer = thread::spawn(move || {
            let mut sent = 0u32;
            if producer_ring.try_push(100) {
                sent += 1;
            }
            if producer_ring.try_push(200) {
                sent += 1;
            }
            sent
        });

        let consumer = thread::spawn(move || {
            let mut received = 0u32;
            for _ in 0..2 {
                if consumer_ring.try_pop().is_some() {
                    received += 1;
                }
            }
            received
        });

        let sent = producer.join().unwrap();
        let received = consumer.join().unwrap();
        assert!(received <= sent);
    });
}
