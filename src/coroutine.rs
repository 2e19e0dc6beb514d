//! Coroutine lifecycle: the user-facing unit of cooperative execution.
//!
//! A [`CoroutineInner`] owns a stack (via [`crate::context::Context`]) and a
//! boxed entry closure. [`resume`](CoroutineInner::resume) switches the CPU
//! onto that stack; the coroutine runs until it either returns (finishing)
//! or calls [`yield_now_raw`], which switches back to whoever resumed it.
//! Everything above this module (the scheduler, channels, locks) only ever
//! calls `resume`/`yield_now_raw` — never touches the raw context-switch
//! primitives directly.

use crate::context::{Context, StackKind};
use crate::error::UsageError;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::rc::Rc;

/// Lifecycle state of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Allocated but never resumed; its entry closure has not started.
    Created,
    /// In the scheduler's ready queue, waiting for its turn to run.
    Ready,
    /// Currently executing on its stack.
    Running,
    /// Parked: suspended mid-execution, waiting to be made `Ready` again.
    Suspended,
    /// Its entry closure has returned or panicked; its stack will not be resumed again.
    Finished,
}

thread_local! {
    static CURRENT: Cell<*const CoroutineInner> = const { Cell::new(std::ptr::null()) };
    static PENDING_ENTRY: RefCell<Option<Box<dyn FnOnce()>>> = const { RefCell::new(None) };
}

/// The backing state of one coroutine.
///
/// Held behind an `Rc` so both the scheduler's ready queue and whatever a
/// coroutine is parked on (a channel's waiter list, a timer heap entry) can
/// reference the same coroutine without the scheduler owning every
/// reference outright.
pub(crate) struct CoroutineInner {
    // SAFETY invariant: `context` is accessed through a raw pointer both
    // from `resume` (the resumer's side) and from `yield_now_raw`/`trampoline`
    // (the coroutine's own side, running on the very stack this cell
    // describes). A `RefCell` cannot express this — the borrow taken by
    // `resume` would still be outstanding, by construction, when the
    // coroutine's own side tries to borrow it again. Exclusivity instead
    // comes from the scheduler never running two coroutines at once and
    // never touching a coroutine's context while it is `Running`.
    context: UnsafeCell<Context>,
    /// Stack pointer to switch back into when this coroutine yields or finishes.
    caller_rsp: Cell<usize>,
    status: Cell<Status>,
    entry: RefCell<Option<Box<dyn FnOnce()>>>,
    panic: RefCell<Option<Box<dyn std::any::Any + Send>>>,
    name: Option<Box<str>>,
}

impl CoroutineInner {
    pub(crate) fn new(
        name: Option<String>,
        kind: StackKind,
        stack_size: usize,
        entry: Box<dyn FnOnce()>,
    ) -> Rc<Self> {
        Rc::new(Self {
            context: UnsafeCell::new(Context::new(kind, stack_size, trampoline)),
            caller_rsp: Cell::new(0),
            status: Cell::new(Status::Created),
            entry: RefCell::new(Some(entry)),
            panic: RefCell::new(None),
            name: name.map(String::into_boxed_str),
        })
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn status(&self) -> Status {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.status.set(status);
    }

    /// Takes the panic payload left behind by a finished coroutine's entry
    /// closure, if it panicked. Returns `None` on a clean return or if this
    /// has already been taken.
    pub(crate) fn take_panic(&self) -> Option<Box<dyn std::any::Any + Send>> {
        self.panic.borrow_mut().take()
    }

    /// Runs `f` with a reference to the panic payload, if this coroutine
    /// finished by panicking, without consuming it — unlike
    /// [`CoroutineInner::take_panic`], a later caller (e.g.
    /// [`crate::scheduler::CoroutineHandle::take_panic`]) can still retrieve
    /// it afterward.
    pub(crate) fn with_panic<R>(&self, f: impl FnOnce(Option<&(dyn std::any::Any + Send)>) -> R) -> R {
        let guard = self.panic.borrow();
        f(guard.as_ref().map(|payload| payload.as_ref()))
    }

    /// Switches onto this coroutine's stack and runs until it yields or finishes.
    ///
    /// # Errors
    /// Returns [`UsageError::ResumeFinished`] if called on a coroutine that
    /// is not `Created` or `Ready`.
    pub(crate) fn resume(self: &Rc<Self>) -> Result<(), UsageError> {
        if !matches!(self.status.get(), Status::Created | Status::Ready) {
            return Err(UsageError::ResumeFinished);
        }
        if self.status.get() == Status::Created {
            let entry = self.entry.borrow_mut().take().expect("entry already consumed");
            PENDING_ENTRY.with(|p| *p.borrow_mut() = Some(entry));
        }
        self.status.set(Status::Running);
        let previous = CURRENT.with(|c| c.replace(Rc::as_ptr(self)));
        // SAFETY: no other code touches `self.context` while this coroutine
        // is resident (see the field's invariant note above); `caller_rsp`
        // points at a live `Cell` for the duration of the switch.
        unsafe {
            let context = &mut *self.context.get();
            context.switch_in(self.caller_rsp.as_ptr());
        }
        CURRENT.with(|c| c.set(previous));
        Ok(())
    }

    /// Suspends the calling coroutine, switching back to whoever last
    /// resumed it. Must be called from inside a coroutine's own stack.
    ///
    /// # Panics
    /// Panics if called outside of a running coroutine.
    pub(crate) fn yield_now_raw() {
        let ptr = CURRENT.with(Cell::get);
        assert!(!ptr.is_null(), "yield_now called outside a coroutine");
        // SAFETY: `ptr` was stashed by `resume` for the coroutine currently
        // executing; we are that coroutine, running on its own stack.
        let this = unsafe { &*ptr };
        this.status.set(Status::Suspended);
        let resumer_rsp = this.caller_rsp.get();
        unsafe {
            let context = &mut *this.context.get();
            let own_slot = context.own_rsp_slot();
            crate::context::yield_to(own_slot, resumer_rsp);
        }
        // We only get here once some later `resume()` switches back in.
        this.status.set(Status::Running);
    }

    /// Returns the currently running coroutine's handle, if any.
    pub(crate) fn current_ptr() -> *const CoroutineInner {
        CURRENT.with(Cell::get)
    }
}

impl std::fmt::Debug for CoroutineInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutineInner")
            .field("name", &self.name)
            .field("status", &self.status.get())
            .finish()
    }
}

/// The fixed entry point every coroutine's stack is bootstrapped to jump
/// into on its first resume. Reads this coroutine's entry closure out of the
/// thread-local stash `resume` just populated, runs it under `catch_unwind`,
/// then switches away one last time and never returns.
unsafe extern "C" fn trampoline() -> ! {
    let entry = PENDING_ENTRY
        .with(|p| p.borrow_mut().take())
        .expect("trampoline entered without a pending entry");
    let ptr = CoroutineInner::current_ptr();
    debug_assert!(!ptr.is_null());
    let this = &*ptr;

    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry)) {
        tracing::error!(name = this.name().unwrap_or("<unnamed>"), "coroutine panicked");
        *this.panic.borrow_mut() = Some(payload);
    }

    this.status.set(Status::Finished);
    let resumer_rsp = this.caller_rsp.get();
    let context = &mut *this.context.get();
    let own_slot = context.own_rsp_slot();
    crate::context::yield_to(own_slot, resumer_rsp);
    unreachable!("a finished coroutine's stack must never be resumed");
}
