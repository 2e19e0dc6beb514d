//! Lock-free single-producer single-consumer bounded queue.
//!
//! Same head/tail-sequence protocol as a classic SPSC ring: each side owns a
//! cached view of the other's position so the common case never touches the
//! other side's atomic, only refreshing it (with `Acquire`) when its own
//! cache says the ring looks full or empty.

use crate::config::RingConfig;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// A bounded single-producer single-consumer queue.
///
/// `T` must be `Send`; the queue itself provides the synchronization that
/// makes moving `T` across the producer/consumer boundary sound.
pub struct Spsc<T> {
    tail: CachePadded<AtomicU64>,
    cached_head: CachePadded<UnsafeCell<u64>>,
    head: CachePadded<AtomicU64>,
    cached_tail: CachePadded<UnsafeCell<u64>>,
    config: RingConfig,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

unsafe impl<T: Send> Send for Spsc<T> {}
unsafe impl<T: Send> Sync for Spsc<T> {}

impl<T> Spsc<T> {
    /// Creates a new queue with `config.capacity()` slots.
    #[must_use]
    pub fn new(config: RingConfig) -> Self {
        let buffer = (0..config.capacity())
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            config,
            buffer,
        }
    }

    /// Returns the queue's capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Returns the number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    /// Returns `true` if the queue holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the queue cannot accept another item.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Attempts to push `value`. Returns `Err(value)` if the queue is full.
    ///
    /// Must only be called from the single producer.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        // SAFETY: only the producer ever writes `cached_head`.
        let cached_head = unsafe { *self.cached_head.get() };
        if tail.wrapping_sub(cached_head) as usize >= self.capacity() {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: see above; this Acquire synchronizes with the
            // consumer's Release store to `head`.
            unsafe { *self.cached_head.get() = head };
            if tail.wrapping_sub(head) as usize >= self.capacity() {
                return Err(value);
            }
        }
        let idx = (tail as usize) & self.config.mask();
        // SAFETY: slot `idx` is beyond the consumer's current head, so only
        // the producer touches it until `tail` is published below.
        unsafe { (*self.buffer[idx].get()).write(value) };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Attempts to pop the oldest item. Returns `None` if the queue is empty.
    ///
    /// Must only be called from the single consumer.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        // SAFETY: only the consumer ever writes `cached_tail`.
        let mut cached_tail = unsafe { *self.cached_tail.get() };
        if head == cached_tail {
            cached_tail = self.tail.load(Ordering::Acquire);
            // SAFETY: see above; this Acquire synchronizes with the
            // producer's Release store to `tail`.
            unsafe { *self.cached_tail.get() = cached_tail };
            if head == cached_tail {
                return None;
            }
        }
        let idx = (head as usize) & self.config.mask();
        // SAFETY: slot `idx` was published by the producer's Release store
        // to `tail`, observed above via the Acquire load.
        let value = unsafe { (*self.buffer[idx].get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

impl<T> Drop for Spsc<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let mut pos = head;
        while pos != tail {
            let idx = (pos as usize) & self.config.mask();
            // SAFETY: every slot in `[head, tail)` was written by a
            // successful `try_push` and never consumed.
            unsafe { (*self.buffer[idx].get()).assume_init_drop() };
            pos = pos.wrapping_add(1);
        }
    }
}
