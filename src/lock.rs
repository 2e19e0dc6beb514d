//! Lock variants for code shared across coroutines: a fast mutex, a FIFO
//! ticket lock, and a reader-writer lock, each built on a [`Backoff`] spin
//! phase that falls back to [`crate::scheduler::Scheduler::yield_now`] once
//! exhausted — never an OS thread yield, since parking the only OS thread
//! a single-threaded scheduler runs on would deadlock every coroutine.

use crate::atomic::{AtomicFlag, AtomicUsizeExt, SEQ_CST};
use crate::backoff::Backoff;
use crate::scheduler::Scheduler;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

fn yield_to_scheduler() {
    Scheduler::current().yield_now();
}

/// A simple mutual-exclusion lock: one atomic flag, spin-then-yield to acquire.
pub struct FastMutex<T> {
    locked: AtomicFlag,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for FastMutex<T> {}
unsafe impl<T: Send> Sync for FastMutex<T> {}

impl<T> FastMutex<T> {
    /// Creates a new, unlocked mutex wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicFlag::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<FastMutexGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, SEQ_CST, SEQ_CST)
            .ok()
            .map(|_| FastMutexGuard { lock: self })
    }

    /// Acquires the lock, spinning and then cooperatively yielding until it is free.
    pub fn lock(&self) -> FastMutexGuard<'_, T> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            if backoff.spin_exhausted() {
                yield_to_scheduler();
                backoff.reset();
            } else {
                backoff.spin();
            }
        }
    }

    /// Runs `f` with exclusive access to the protected value.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }
}

/// RAII guard returned by [`FastMutex::lock`]/[`FastMutex::try_lock`].
pub struct FastMutexGuard<'a, T> {
    lock: &'a FastMutex<T>,
}

impl<T> Deref for FastMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard proves exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for FastMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard proves exclusive access.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for FastMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, SEQ_CST);
    }
}

/// A FIFO-fair lock: waiters are served strictly in arrival order, avoiding
/// the starvation a plain CAS mutex allows under contention.
pub struct TicketLock<T> {
    next_ticket: crate::atomic::AtomicU64Ext,
    now_serving: crate::atomic::AtomicU64Ext,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TicketLock<T> {}
unsafe impl<T: Send> Sync for TicketLock<T> {}

impl<T> TicketLock<T> {
    /// Creates a new, unlocked lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: crate::atomic::AtomicU64Ext::new(0),
            now_serving: crate::atomic::AtomicU64Ext::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Attempts to acquire the lock without blocking. Fails not just when
    /// the lock is held, but also when another ticket is already queued
    /// ahead of a fresh one — a non-blocking acquire must never let a caller
    /// jump the FIFO line that `lock()` enforces.
    pub fn try_acquire(&self) -> Option<TicketLockGuard<'_, T>> {
        let now_serving = self.now_serving.load(SEQ_CST);
        self.next_ticket
            .compare_exchange(now_serving, now_serving + 1, SEQ_CST, SEQ_CST)
            .ok()
            .map(|_| TicketLockGuard { lock: self })
    }

    /// Acquires the lock, spinning and then cooperatively yielding until
    /// this caller's ticket is being served.
    pub fn lock(&self) -> TicketLockGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, SEQ_CST);
        let mut backoff = Backoff::new();
        while self.now_serving.load(SEQ_CST) != ticket {
            if backoff.spin_exhausted() {
                yield_to_scheduler();
                backoff.reset();
            } else {
                backoff.spin();
            }
        }
        TicketLockGuard { lock: self }
    }

    /// Runs `f` with exclusive access to the protected value.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }
}

/// RAII guard returned by [`TicketLock::lock`].
pub struct TicketLockGuard<'a, T> {
    lock: &'a TicketLock<T>,
}

impl<T> Deref for TicketLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard proves this ticket is currently being served.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for TicketLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard proves this ticket is currently being served.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for TicketLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, SEQ_CST);
    }
}

const WRITER_BIT: usize = 1 << (usize::BITS - 1);

/// A reader-writer lock packed into a single atomic word: bit 63 is the
/// writer-held flag, the remaining bits count concurrent readers.
pub struct RwLock<T> {
    state: AtomicUsizeExt,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Creates a new, unlocked lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicUsizeExt::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Attempts to acquire a shared (read) lock without blocking. Fails if a
    /// writer currently holds it.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let state = self.state.load(SEQ_CST);
        if state & WRITER_BIT != 0 {
            return None;
        }
        self.state
            .compare_exchange(state, state + 1, SEQ_CST, SEQ_CST)
            .ok()
            .map(|_| RwLockReadGuard { lock: self })
    }

    /// Attempts to acquire the exclusive (write) lock without blocking.
    /// Fails if any reader or writer currently holds it.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.state
            .compare_exchange(0, WRITER_BIT, SEQ_CST, SEQ_CST)
            .ok()
            .map(|_| RwLockWriteGuard { lock: self })
    }

    /// Acquires a shared (read) lock, spinning and then cooperatively
    /// yielding while a writer holds it.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let mut backoff = Backoff::new();
        loop {
            let state = self.state.load(SEQ_CST);
            if state & WRITER_BIT == 0
                && self
                    .state
                    .compare_exchange(state, state + 1, SEQ_CST, SEQ_CST)
                    .is_ok()
            {
                return RwLockReadGuard { lock: self };
            }
            if backoff.spin_exhausted() {
                yield_to_scheduler();
                backoff.reset();
            } else {
                backoff.spin();
            }
        }
    }

    /// Acquires the exclusive (write) lock, spinning and then cooperatively
    /// yielding while any reader or writer holds it.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let mut backoff = Backoff::new();
        loop {
            if self.state.compare_exchange(0, WRITER_BIT, SEQ_CST, SEQ_CST).is_ok() {
                return RwLockWriteGuard { lock: self };
            }
            if backoff.spin_exhausted() {
                yield_to_scheduler();
                backoff.reset();
            } else {
                backoff.spin();
            }
        }
    }

    /// Runs `f` with shared access to the protected value.
    pub fn with_read_lock<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.read();
        f(&guard)
    }

    /// Runs `f` with exclusive access to the protected value.
    pub fn with_write_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.write();
        f(&mut guard)
    }
}

/// RAII guard returned by [`RwLock::read`].
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a read guard proves no writer is active.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, SEQ_CST);
    }
}

/// RAII guard returned by [`RwLock::write`].
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the write guard proves exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the write guard proves exclusive access.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(0, SEQ_CST);
    }
}
