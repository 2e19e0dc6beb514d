//! Typed atomic wrappers and memory-order primitives.
//!
//! Thin, `Debug`-able wrappers around `std::sync::atomic`, giving every
//! integer/boolean/pointer atomic the same method set (`load`, `store`,
//! `exchange`, `compare_exchange`, and for integers the `fetch_*` family),
//! each parameterized by an explicit [`Order`]. There is no lock fallback:
//! every operation lowers to a single hardware atomic instruction.

use std::sync::atomic::{
    self, AtomicBool, AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicU16,
    AtomicU32, AtomicU64, AtomicU8, AtomicUsize,
};

/// Memory ordering for an atomic operation. Re-exports `std::sync::atomic::Ordering`
/// under the vocabulary used by the specification, with `SeqCst` as the default.
pub type Order = atomic::Ordering;

/// `SeqCst`, the default ordering used when callers don't need anything weaker.
pub const SEQ_CST: Order = Order::SeqCst;

/// Hints the CPU that this thread is in a busy-wait spin loop (`pause`/`yield`
/// instruction). Use inside tight retry loops such as a ticket lock's wait or
/// an MPMC slot retry.
#[inline]
pub fn spin_hint() {
    std::hint::spin_loop();
}

/// A thread fence: establishes a synchronizes-with edge without being tied to
/// a specific atomic variable.
#[inline]
pub fn thread_fence(order: Order) {
    atomic::fence(order);
}

/// A compiler-only fence visible to the current thread's signal handlers;
/// does not emit a CPU fence instruction.
#[inline]
pub fn signal_fence(order: Order) {
    atomic::compiler_fence(order);
}

macro_rules! atomic_int {
    ($name:ident, $inner:ty, $prim:ty) => {
        #[doc = concat!("Typed atomic `", stringify!($prim), "`.")]
        #[derive(Debug)]
        #[repr(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new atomic with the given initial value.
            #[inline]
            #[must_use]
            pub const fn new(value: $prim) -> Self {
                Self(<$inner>::new(value))
            }

            /// Loads the current value.
            #[inline]
            pub fn load(&self, order: Order) -> $prim {
                self.0.load(order)
            }

            /// Stores a new value.
            #[inline]
            pub fn store(&self, value: $prim, order: Order) {
                self.0.store(value, order);
            }

            /// Stores a new value, returning the previous one.
            #[inline]
            pub fn exchange(&self, value: $prim, order: Order) -> $prim {
                self.0.swap(value, order)
            }

            /// Stores `new` iff the current value equals `current`.
            ///
            /// Returns `Ok(previous)` on success, `Err(actual)` on failure —
            /// the failure branch hands back the value actually observed, so
            /// callers can retry with an updated `expected` without a second load.
            #[inline]
            pub fn compare_exchange(
                &self,
                current: $prim,
                new: $prim,
                success: Order,
                failure: Order,
            ) -> Result<$prim, $prim> {
                self.0.compare_exchange(current, new, success, failure)
            }

            /// Adds to the current value, returning the previous one.
            #[inline]
            pub fn fetch_add(&self, value: $prim, order: Order) -> $prim {
                self.0.fetch_add(value, order)
            }

            /// Subtracts from the current value, returning the previous one.
            #[inline]
            pub fn fetch_sub(&self, value: $prim, order: Order) -> $prim {
                self.0.fetch_sub(value, order)
            }

            /// Bitwise-ANDs the current value, returning the previous one.
            #[inline]
            pub fn fetch_and(&self, value: $prim, order: Order) -> $prim {
                self.0.fetch_and(value, order)
            }

            /// Bitwise-ORs the current value, returning the previous one.
            #[inline]
            pub fn fetch_or(&self, value: $prim, order: Order) -> $prim {
                self.0.fetch_or(value, order)
            }

            /// Bitwise-XORs the current value, returning the previous one.
            #[inline]
            pub fn fetch_xor(&self, value: $prim, order: Order) -> $prim {
                self.0.fetch_xor(value, order)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new(<$prim>::default())
            }
        }
    };
}

atomic_int!(AtomicU8Ext, AtomicU8, u8);
atomic_int!(AtomicU16Ext, AtomicU16, u16);
atomic_int!(AtomicU32Ext, AtomicU32, u32);
atomic_int!(AtomicU64Ext, AtomicU64, u64);
atomic_int!(AtomicUsizeExt, AtomicUsize, usize);
atomic_int!(AtomicI8Ext, AtomicI8, i8);
atomic_int!(AtomicI16Ext, AtomicI16, i16);
atomic_int!(AtomicI32Ext, AtomicI32, i32);
atomic_int!(AtomicI64Ext, AtomicI64, i64);
atomic_int!(AtomicIsizeExt, AtomicIsize, isize);

/// Typed atomic `bool`.
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicFlag(AtomicBool);

impl AtomicFlag {
    /// Creates a new atomic flag with the given initial value.
    #[inline]
    #[must_use]
    pub const fn new(value: bool) -> Self {
        Self(AtomicBool::new(value))
    }

    /// Loads the current value.
    #[inline]
    pub fn load(&self, order: Order) -> bool {
        self.0.load(order)
    }

    /// Stores a new value.
    #[inline]
    pub fn store(&self, value: bool, order: Order) {
        self.0.store(value, order);
    }

    /// Stores a new value, returning the previous one.
    #[inline]
    pub fn exchange(&self, value: bool, order: Order) -> bool {
        self.0.swap(value, order)
    }

    /// Stores `new` iff the current value equals `current`.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: bool,
        new: bool,
        success: Order,
        failure: Order,
    ) -> Result<bool, bool> {
        self.0.compare_exchange(current, new, success, failure)
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Typed atomic raw pointer.
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicTaggedPtr<T>(atomic::AtomicPtr<T>);

impl<T> AtomicTaggedPtr<T> {
    /// Creates a new atomic pointer with the given initial value.
    #[inline]
    #[must_use]
    pub fn new(value: *mut T) -> Self {
        Self(atomic::AtomicPtr::new(value))
    }

    /// Loads the current value.
    #[inline]
    pub fn load(&self, order: Order) -> *mut T {
        self.0.load(order)
    }

    /// Stores a new value.
    #[inline]
    pub fn store(&self, value: *mut T, order: Order) {
        self.0.store(value, order);
    }

    /// Stores a new value, returning the previous one.
    #[inline]
    pub fn exchange(&self, value: *mut T, order: Order) -> *mut T {
        self.0.swap(value, order)
    }

    /// Stores `new` iff the current value equals `current`.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: *mut T,
        new: *mut T,
        success: Order,
        failure: Order,
    ) -> Result<*mut T, *mut T> {
        self.0.compare_exchange(current, new, success, failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_exchange_updates_expected_on_failure() {
        let a = AtomicU64Ext::new(5);
        let result = a.compare_exchange(10, 20, SEQ_CST, SEQ_CST);
        assert_eq!(result, Err(5));
        assert_eq!(a.load(SEQ_CST), 5);
    }

    #[test]
    fn compare_exchange_succeeds_when_expected_matches() {
        let a = AtomicU64Ext::new(5);
        let result = a.compare_exchange(5, 20, SEQ_CST, SEQ_CST);
        assert_eq!(result, Ok(5));
        assert_eq!(a.load(SEQ_CST), 20);
    }

    #[test]
    fn fetch_add_returns_previous_value() {
        let a = AtomicI32Ext::new(1);
        assert_eq!(a.fetch_add(4, SEQ_CST), 1);
        assert_eq!(a.load(SEQ_CST), 5);
    }

    #[test]
    fn flag_exchange() {
        let f = AtomicFlag::new(false);
        assert!(!f.exchange(true, SEQ_CST));
        assert!(f.load(SEQ_CST));
    }
}
