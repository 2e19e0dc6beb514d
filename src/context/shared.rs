//! Shared-stack backend: every coroutine using this backend takes turns
//! running on one large per-thread stack buffer; switching away from a
//! coroutine copies its live stack bytes out into a private backup, and
//! switching back into it copies them back in before the register swap.
//!
//! This is the "copying stackful coroutine" technique used by C coroutine
//! libraries that want a single, pre-faulted stack region instead of one
//! `mmap` per coroutine; functionally it behaves exactly like the
//! per-coroutine-stack backend, trading a `memcpy` per switch for lower
//! per-coroutine memory footprint and fewer stack allocations.

use super::raw;
use crate::config::DEFAULT_SHARED_STACK_SIZE;
use std::cell::RefCell;

thread_local! {
    static SHARED: RefCell<Option<Box<[u8]>>> = RefCell::new(None);
}

fn with_shared<R>(f: impl FnOnce(&mut [u8]) -> R) -> R {
    SHARED.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(vec![0_u8; DEFAULT_SHARED_STACK_SIZE].into_boxed_slice());
        }
        f(slot.as_mut().unwrap())
    })
}

/// A coroutine's state while it is not resident on the shared stack.
pub(crate) struct SharedSlot {
    /// Absolute stack pointer within the shared buffer, valid only while resident.
    rsp: usize,
    /// Bytes backing `[rsp, top)` while this coroutine is not resident.
    backup: Vec<u8>,
    trampoline: unsafe extern "C" fn() -> !,
    initialized: bool,
}

impl SharedSlot {
    pub(crate) fn new(trampoline: unsafe extern "C" fn() -> !) -> Self {
        Self {
            rsp: 0,
            backup: Vec::new(),
            trampoline,
            initialized: false,
        }
    }

    /// The stack pointer to pass as the `out_rsp` slot for this coroutine's
    /// next switch (mirrors the fiber backend's `ctx_rsp` field).
    pub(crate) fn rsp_slot(&mut self) -> *mut usize {
        std::ptr::addr_of_mut!(self.rsp)
    }
}

/// Makes `slot` resident on the shared stack, returning the stack pointer to
/// switch into. Must be called immediately before the `swap` that resumes
/// this coroutine.
pub(crate) fn install(slot: &mut SharedSlot) -> usize {
    with_shared(|buf| {
        if !slot.initialized {
            // SAFETY: `buf` is the thread's dedicated shared stack and is not
            // concurrently in use (single-threaded scheduler invariant).
            let rsp = unsafe { raw::init_stack(buf, slot.trampoline) };
            slot.rsp = rsp;
            slot.initialized = true;
        } else {
            let base = buf.as_ptr() as usize;
            let top = base + buf.len();
            let offset = slot.rsp - base;
            let len = top - slot.rsp;
            debug_assert_eq!(len, slot.backup.len(), "shared stack backup length mismatch");
            buf[offset..offset + len].copy_from_slice(&slot.backup);
        }
        slot.rsp
    })
}

/// Copies `slot`'s live stack bytes out of the shared buffer into its
/// private backup. Must be called immediately after a `swap` that suspended
/// this coroutine returns control to the caller.
pub(crate) fn evict(slot: &mut SharedSlot) {
    with_shared(|buf| {
        let base = buf.as_ptr() as usize;
        let top = base + buf.len();
        let offset = slot.rsp - base;
        let len = top - slot.rsp;
        slot.backup.clear();
        slot.backup.extend_from_slice(&buf[offset..offset + len]);
    });
}
