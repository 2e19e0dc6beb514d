//! Lock-free bounded multi-producer multi-consumer queue.
//!
//! Vyukov's bounded MPMC design: each slot carries its own sequence number
//! instead of relying on a single shared head/tail pair, so producers (and
//! consumers) racing for the same slot detect the collision via a failed
//! `compare_exchange` on the slot's sequence rather than on a global
//! counter. This is the queue used to move work across OS threads — the
//! scheduler's own ready queue and channels are single-threaded and use
//! [`crate::spsc::Spsc`] or a plain `VecDeque` instead.

use crate::config::RingConfig;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded multi-producer multi-consumer queue, safe to share across OS threads.
pub struct Mpmc<T> {
    buffer: Box<[CachePadded<Slot<T>>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for Mpmc<T> {}
unsafe impl<T: Send> Sync for Mpmc<T> {}

impl<T> Mpmc<T> {
    /// Creates a new queue with `config.capacity()` slots.
    #[must_use]
    pub fn new(config: RingConfig) -> Self {
        let capacity = config.capacity();
        let buffer = (0..capacity)
            .map(|i| {
                CachePadded::new(Slot {
                    sequence: AtomicUsize::new(i),
                    value: UnsafeCell::new(MaybeUninit::uninit()),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            mask: config.mask(),
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the queue's capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Attempts to push `value`. Returns `Err(value)` if the queue is
    /// observed full at the moment of the attempt.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            match diff.cmp(&0) {
                std::cmp::Ordering::Equal => {
                    match self.enqueue_pos.compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            // SAFETY: winning the CAS above grants exclusive
                            // write access to this slot until the sequence
                            // bump below publishes it to a consumer.
                            unsafe { (*slot.value.get()).write(value) };
                            slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                            return Ok(());
                        }
                        Err(actual) => pos = actual,
                    }
                }
                std::cmp::Ordering::Less => return Err(value),
                std::cmp::Ordering::Greater => pos = self.enqueue_pos.load(Ordering::Relaxed),
            }
        }
    }

    /// Attempts to pop the oldest item. Returns `None` if the queue is
    /// observed empty at the moment of the attempt.
    pub fn try_pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos.wrapping_add(1)) as isize;
            match diff.cmp(&0) {
                std::cmp::Ordering::Equal => {
                    match self.dequeue_pos.compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            // SAFETY: winning the CAS above grants exclusive
                            // read access to this slot; the producer
                            // published it via the Release store observed
                            // in the Acquire load above.
                            let value = unsafe { (*slot.value.get()).assume_init_read() };
                            slot.sequence.store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                            return Some(value);
                        }
                        Err(actual) => pos = actual,
                    }
                }
                std::cmp::Ordering::Less => return None,
                std::cmp::Ordering::Greater => pos = self.dequeue_pos.load(Ordering::Relaxed),
            }
        }
    }
}

impl<T> Drop for Mpmc<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_single_threaded() {
        let q = Mpmc::<u64>::new(RingConfig::new(4));
        for i in 0..16 {
            assert!(q.try_push(i).is_ok());
            assert_eq!(q.try_pop(), Some(i));
        }
    }

    #[test]
    fn fills_up_and_rejects() {
        let q = Mpmc::<u64>::new(RingConfig::new(2)); // 4 slots
        for i in 0..4 {
            assert!(q.try_push(i).is_ok());
        }
        assert_eq!(q.try_push(99), Err(99));
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_total_count() {
        const PER_PRODUCER: u64 = 1000;
        const PRODUCERS: u64 = 4;
        let q = Arc::new(Mpmc::<u64>::new(RingConfig::new(10))); // 1024 slots
        let remaining_producers = Arc::new(std::sync::atomic::AtomicUsize::new(PRODUCERS as usize));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|t| {
                let q = Arc::clone(&q);
                let remaining_producers = Arc::clone(&remaining_producers);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        while q.try_push(t * PER_PRODUCER + i).is_err() {
                            std::hint::spin_loop();
                        }
                    }
                    remaining_producers.fetch_sub(1, Ordering::Release);
                })
            })
            .collect();

        let consumers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let q = Arc::clone(&q);
                let remaining_producers = Arc::clone(&remaining_producers);
                thread::spawn(move || {
                    let mut count = 0_u64;
                    loop {
                        if let Some(_item) = q.try_pop() {
                            count += 1;
                        } else if remaining_producers.load(Ordering::Acquire) == 0 {
                            // All producers finished; one last drain in case
                            // a push landed after our check above.
                            while let Some(_item) = q.try_pop() {
                                count += 1;
                            }
                            break;
                        }
                    }
                    count
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        let total: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
    }
}
