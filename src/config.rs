//! Runtime configuration.
//!
//! Plain `Copy` structs with `const fn` constructors, in the same shape as
//! every other tunable in this crate (power-of-two capacities validated once
//! at construction, then read without further checks on the hot path).

/// Default per-coroutine stack size for the per-coroutine-stack backend (2 MiB).
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Default size of the shared stack used by the shared-stack backend (8 MiB).
pub const DEFAULT_SHARED_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Tunables for the scheduler and its coroutines.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Stack size handed to each spawned coroutine (per-coroutine-stack backend only).
    pub stack_size: usize,
    /// Number of spin iterations a fast mutex attempts before yielding to the scheduler.
    pub mutex_spin_budget: u32,
}

impl SchedulerConfig {
    /// Creates a new configuration.
    ///
    /// # Panics
    ///
    /// Panics if `stack_size` is smaller than one page (4 KiB).
    pub const fn new(stack_size: usize, mutex_spin_budget: u32) -> Self {
        assert!(stack_size >= 4096, "stack_size must be at least 4096 bytes");
        Self {
            stack_size,
            mutex_spin_budget,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            mutex_spin_budget: 256,
        }
    }
}

/// Configuration for a bounded ring (SPSC or MPMC).
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    bits: u8,
}

impl RingConfig {
    /// Creates a configuration for a ring with `1 << bits` slots.
    ///
    /// # Panics
    ///
    /// Panics if `bits` is `0` or greater than `24` (16M slots max).
    pub const fn new(bits: u8) -> Self {
        assert!(bits > 0 && bits <= 24, "bits must be between 1 and 24");
        Self { bits }
    }

    /// Returns the ring capacity.
    #[inline]
    pub const fn capacity(self) -> usize {
        1 << self.bits
    }

    /// Returns the index mask used to wrap sequence numbers into slot indices.
    #[inline]
    pub const fn mask(self) -> usize {
        self.capacity() - 1
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::new(10) // 1024 slots
    }
}

/// Low-latency ring sizing (256 slots).
pub const LOW_LATENCY_RING: RingConfig = RingConfig::new(8);

/// High-throughput ring sizing (64K slots).
pub const HIGH_THROUGHPUT_RING: RingConfig = RingConfig::new(16);
