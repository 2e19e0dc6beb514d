//! Property-based tests for the lock-free queues, checking the same
//! invariants the unit tests in `src/spsc.rs`/`src/mpmc.rs` spot-check, but
//! across randomized operation sequences.

use proptest::prelude::*;
use weave_rt::{Mpmc, RingConfig, Spsc};

proptest! {
    /// A `Spsc` never reports more items than its configured capacity, and
    /// `len()` tracks pushes/pops exactly in a single-threaded interleaving.
    #[test]
    fn spsc_length_matches_pushes_minus_pops(
        ops in prop::collection::vec(prop::bool::ANY, 1..200),
    ) {
        let ring = Spsc::<u64>::new(RingConfig::new(6)); // 64 slots
        let mut model_len = 0usize;
        let mut next_value = 0u64;

        for push in ops {
            if push {
                let pushed = ring.try_push(next_value).is_ok();
                if pushed {
                    next_value += 1;
                    model_len += 1;
                }
            } else if ring.try_pop().is_some() {
                model_len -= 1;
            }
            prop_assert_eq!(ring.len(), model_len);
            prop_assert!(ring.len() <= ring.capacity());
        }
    }

    /// Values come back out of a `Spsc` in the order they went in.
    #[test]
    fn spsc_preserves_fifo_order(
        values in prop::collection::vec(any::<u32>(), 0..64),
    ) {
        let ring = Spsc::<u32>::new(RingConfig::new(6));
        for &v in &values {
            ring.try_push(v).unwrap();
        }
        for &expected in &values {
            prop_assert_eq!(ring.try_pop(), Some(expected));
        }
        prop_assert_eq!(ring.try_pop(), None);
    }

    /// Same invariant for `Mpmc`, single-threaded: `try_push`/`try_pop` never
    /// let the length exceed capacity and preserve submission order.
    #[test]
    fn mpmc_length_matches_pushes_minus_pops(
        ops in prop::collection::vec(prop::bool::ANY, 1..200),
    ) {
        let queue = Mpmc::<u64>::new(RingConfig::new(6));
        let mut model: std::collections::VecDeque<u64> = std::collections::VecDeque::new();
        let mut next_value = 0u64;

        for push in ops {
            if push {
                if model.len() < queue.capacity() {
                    queue.try_push(next_value).unwrap();
                    model.push_back(next_value);
                    next_value += 1;
                } else {
                    prop_assert!(queue.try_push(next_value).is_err());
                }
            } else if let Some(expected) = model.pop_front() {
                prop_assert_eq!(queue.try_pop(), Some(expected));
            } else {
                prop_assert_eq!(queue.try_pop(), None);
            }
        }
    }

    /// A full `Spsc` never accepts a push beyond its configured capacity.
    #[test]
    fn spsc_rejects_pushes_once_full(capacity_bits in 1u8..8) {
        let ring = Spsc::<u8>::new(RingConfig::new(capacity_bits));
        let capacity = ring.capacity();
        for i in 0..capacity {
            prop_assert!(ring.try_push(i as u8).is_ok());
        }
        prop_assert!(ring.is_full());
        prop_assert!(ring.try_push(0).is_err());
    }
}
