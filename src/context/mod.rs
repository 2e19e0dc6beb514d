//! Stackful coroutine context switching.
//!
//! Two backends implement the same primitive — "switch CPU execution from
//! one saved register/stack state to another" — and are otherwise
//! interchangeable from [`crate::coroutine`]'s point of view:
//!
//! - [`fiber`]: every coroutine owns a fixed-size, dedicated stack; a switch
//!   is six pushes, a stack-pointer swap, six pops.
//! - [`shared`]: every coroutine on a given OS thread takes turns on one
//!   shared buffer; a switch additionally copies the outgoing coroutine's
//!   live stack bytes out and the incoming coroutine's bytes back in.
//!
//! Both are x86_64 System V AMD64 ABI only; see [`raw`] for the calling
//! convention this relies on.

mod fiber;
mod raw;
mod shared;

use crate::config::DEFAULT_STACK_SIZE;

pub(crate) use fiber::FiberStack;
pub(crate) use shared::SharedSlot;

/// Which stack discipline a coroutine uses.
///
/// Chosen once per coroutine at spawn time; see
/// [`crate::scheduler::Scheduler::spawn_named`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackKind {
    /// Dedicated stack, sized by [`crate::config::SchedulerConfig::stack_size`].
    Owned,
    /// Shared per-thread stack; cheaper to spawn, costs a `memcpy` per switch.
    Shared,
}

impl Default for StackKind {
    fn default() -> Self {
        Self::Owned
    }
}

/// A coroutine's stack storage, uniform over both backends.
///
/// Holds whichever backend-specific state [`StackKind`] selected, and
/// exposes [`Context::rsp_slot`] / [`Context::switch_in`] /
/// [`Context::switch_out`] so [`crate::coroutine::CoroutineInner`] never has
/// to branch on backend.
pub(crate) enum Context {
    Owned { stack: FiberStack, rsp: usize },
    Shared(SharedSlot),
}

impl Context {
    /// Allocates stack storage of the given kind, laid out to jump into
    /// `trampoline` on first switch.
    pub(crate) fn new(kind: StackKind, stack_size: usize, trampoline: unsafe extern "C" fn() -> !) -> Self {
        match kind {
            StackKind::Owned => {
                let size = if stack_size == 0 { DEFAULT_STACK_SIZE } else { stack_size };
                let (stack, rsp) = FiberStack::new(size, trampoline);
                Self::Owned { stack, rsp }
            }
            StackKind::Shared => Self::Shared(SharedSlot::new(trampoline)),
        }
    }

    /// Switches the CPU onto this context, saving the caller's resulting
    /// stack pointer into `caller_rsp`.
    ///
    /// # Safety
    /// See [`raw::swap`]; additionally, for [`StackKind::Shared`] this must
    /// not be called while another coroutine's bytes are resident on the
    /// same thread's shared buffer (the scheduler only ever resumes one
    /// coroutine at a time, so this holds by construction).
    pub(crate) unsafe fn switch_in(&mut self, caller_rsp: *mut usize) {
        match self {
            Self::Owned { rsp, .. } => fiber::switch(caller_rsp, *rsp),
            Self::Shared(slot) => {
                let rsp = shared::install(slot);
                fiber::switch(caller_rsp, rsp);
                shared::evict(slot);
            }
        }
    }

    /// Returns the stack-pointer slot this context was last suspended at, so
    /// a future `switch_in` can resume it — only meaningful for
    /// [`StackKind::Owned`], whose resident rsp is written directly by
    /// `switch_in`'s `caller_rsp` argument on some *other* context's switch.
    pub(crate) fn owned_rsp_slot(&mut self) -> Option<*mut usize> {
        match self {
            Self::Owned { rsp, .. } => Some(std::ptr::addr_of_mut!(*rsp)),
            Self::Shared(_) => None,
        }
    }

    pub(crate) fn shared_rsp_slot(&mut self) -> Option<*mut usize> {
        match self {
            Self::Owned { .. } => None,
            Self::Shared(slot) => Some(slot.rsp_slot()),
        }
    }

    /// The slot `raw::swap` should write this context's own rsp into when
    /// *it* is the one suspending (called from inside the coroutine, on its
    /// own stack, via [`yield_to`]) — the mirror image of the slot
    /// `switch_in` writes the resumer's rsp into.
    pub(crate) fn own_rsp_slot(&mut self) -> *mut usize {
        self.owned_rsp_slot()
            .or_else(|| self.shared_rsp_slot())
            .expect("a Context is always exactly one of Owned or Shared")
    }
}

/// Suspends the currently running context, saving its rsp into `own_slot`
/// and resuming whatever context previously switched into it at
/// `resumer_rsp`.
///
/// Called from inside a coroutine's own stack (by
/// [`crate::coroutine::CoroutineInner::yield_now_raw`]) — the other half of
/// the round trip [`Context::switch_in`] started.
///
/// # Safety
/// `resumer_rsp` must be the value [`Context::switch_in`] wrote into its
/// `caller_rsp` argument for the switch that is currently resident on this
/// stack. `own_slot` must be this same context's [`Context::own_rsp_slot`].
pub(crate) unsafe fn yield_to(own_slot: *mut usize, resumer_rsp: usize) {
    raw::swap(own_slot, resumer_rsp);
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owned { stack, .. } => f.debug_tuple("Owned").field(stack).finish(),
            Self::Shared(_) => f.write_str("Shared"),
        }
    }
}
