//! The single-threaded cooperative scheduler.
//!
//! One [`Scheduler`] owns every coroutine spawned on its OS thread: a FIFO
//! ready queue, the set of coroutines parked waiting on something else (a
//! channel, a lock, a timer, a socket), and the [`EventLoop`] that wakes
//! parked coroutines back up. `run_all` drains the ready queue until both it
//! and the event loop are empty.
//!
//! Exactly one `Scheduler` is live per OS thread at a time, reached through
//! [`Scheduler::current`] so that code deep inside a channel or lock
//! implementation — running on a coroutine's own stack — can get back to the
//! scheduler without threading a reference through every call.

use crate::config::SchedulerConfig;
use crate::context::StackKind;
use crate::coroutine::{CoroutineInner, Status};
use crate::error::UsageError;
use crate::event_loop::EventLoop;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Opaque handle to a spawned coroutine, usable to check completion or to
/// park other coroutines waiting on it.
#[derive(Clone)]
pub struct CoroutineHandle(pub(crate) Rc<CoroutineInner>);

impl CoroutineHandle {
    /// Returns `true` once the coroutine's entry closure has returned or panicked.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.0.status() == Status::Finished
    }

    /// Returns the panic payload left behind if the coroutine's entry
    /// closure panicked. Consumes it: a second call returns `None`.
    pub fn take_panic(&self) -> Option<Box<dyn std::any::Any + Send>> {
        self.0.take_panic()
    }
}

impl std::fmt::Debug for CoroutineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CoroutineHandle").field(&self.0).finish()
    }
}

/// Receives uncaught coroutine panics once `run_all` observes them.
///
/// The default [`LoggingReporter`] logs via `tracing`; callers that want
/// panics to abort the process, or to be collected for a test harness, can
/// install their own via [`Scheduler::set_reporter`].
pub trait Reporter {
    /// Called once per coroutine that finished by panicking.
    fn report(&self, name: Option<&str>, payload: &(dyn std::any::Any + Send));
}

/// Default [`Reporter`]: logs the coroutine's name (if any) at `error` level.
#[derive(Debug, Default)]
pub struct LoggingReporter;

impl Reporter for LoggingReporter {
    fn report(&self, name: Option<&str>, _payload: &(dyn std::any::Any + Send)) {
        tracing::error!(coroutine = name.unwrap_or("<unnamed>"), "uncaught coroutine panic");
    }
}

struct Inner {
    config: SchedulerConfig,
    ready: VecDeque<Rc<CoroutineInner>>,
    all: Vec<Rc<CoroutineInner>>,
    event_loop: EventLoop,
    reporter: Box<dyn Reporter>,
}

/// Owns the ready queue, the full coroutine set, and the event loop for one
/// OS thread.
pub struct Scheduler {
    inner: RefCell<Inner>,
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<Scheduler>>> = const { RefCell::new(None) };
}

impl Scheduler {
    /// Creates a new scheduler and installs it as current for this thread.
    ///
    /// # Panics
    /// Panics if a scheduler is already installed on this thread.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Rc<Self> {
        let scheduler = Rc::new(Self {
            inner: RefCell::new(Inner {
                config,
                ready: VecDeque::new(),
                all: Vec::new(),
                event_loop: EventLoop::new(),
                reporter: Box::new(LoggingReporter),
            }),
        });
        CURRENT.with(|c| {
            let mut slot = c.borrow_mut();
            assert!(slot.is_none(), "a Scheduler is already installed on this thread");
            *slot = Some(Rc::clone(&scheduler));
        });
        scheduler
    }

    /// Returns the scheduler installed on the current thread.
    ///
    /// # Panics
    /// Panics if no scheduler has been created on this thread.
    #[must_use]
    pub fn current() -> Rc<Self> {
        CURRENT
            .with(|c| c.borrow().clone())
            .expect("no Scheduler installed on this thread; call Scheduler::new first")
    }

    /// Installs a custom panic [`Reporter`], replacing [`LoggingReporter`].
    pub fn set_reporter(&self, reporter: impl Reporter + 'static) {
        self.inner.borrow_mut().reporter = Box::new(reporter);
    }

    pub(crate) fn event_loop(&self) -> std::cell::Ref<'_, EventLoop> {
        std::cell::Ref::map(self.inner.borrow(), |i| &i.event_loop)
    }

    pub(crate) fn event_loop_mut(&self) -> std::cell::RefMut<'_, EventLoop> {
        std::cell::RefMut::map(self.inner.borrow_mut(), |i| &mut i.event_loop)
    }

    /// Spawns a new coroutine with the default stack backend, returning a
    /// handle usable to check on its completion.
    pub fn spawn(self: &Rc<Self>, body: impl FnOnce() + 'static) -> CoroutineHandle {
        self.spawn_named(None, StackKind::Owned, body)
    }

    /// Spawns a new coroutine on the given stack backend, with an optional
    /// name used in logs and panic reports.
    pub fn spawn_named(
        self: &Rc<Self>,
        name: Option<&str>,
        kind: StackKind,
        body: impl FnOnce() + 'static,
    ) -> CoroutineHandle {
        let stack_size = self.inner.borrow().config.stack_size;
        let inner = CoroutineInner::new(name.map(str::to_owned), kind, stack_size, Box::new(body));
        inner.set_status(Status::Ready);
        let mut guard = self.inner.borrow_mut();
        guard.all.push(Rc::clone(&inner));
        guard.ready.push_back(Rc::clone(&inner));
        CoroutineHandle(inner)
    }

    /// Moves a parked coroutine back onto the ready queue. Called by
    /// channels, locks, timers, and the event loop once whatever a
    /// coroutine was waiting on becomes available.
    pub(crate) fn ready(&self, coroutine: Rc<CoroutineInner>) {
        coroutine.set_status(Status::Ready);
        self.inner.borrow_mut().ready.push_back(coroutine);
    }

    /// Releases a finished coroutine's bookkeeping early. `run_all` already
    /// does this automatically for every coroutine it drains to `Finished`;
    /// this is for callers that hold a [`CoroutineHandle`] and want to drop
    /// its resources without going through another `run_all` pass.
    ///
    /// # Errors
    /// Returns [`UsageError::DestroyWhileLive`] if the coroutine has not
    /// reached `Status::Finished` yet.
    pub fn destroy(&self, handle: &CoroutineHandle) -> Result<(), UsageError> {
        if !handle.is_finished() {
            return Err(UsageError::DestroyWhileLive);
        }
        self.inner.borrow_mut().all.retain(|c| !Rc::ptr_eq(c, &handle.0));
        Ok(())
    }

    /// Suspends the calling coroutine. The caller is responsible for having
    /// already recorded it somewhere (a waiter list, a timer heap) that will
    /// eventually call [`Scheduler::ready`] on it again — otherwise it parks
    /// forever.
    ///
    /// # Panics
    /// Panics if called outside of a running coroutine.
    pub fn park() {
        CoroutineInner::yield_now_raw();
    }

    /// Returns the `Rc` handle for the coroutine currently executing.
    ///
    /// # Panics
    /// Panics if called outside of a running coroutine.
    pub(crate) fn current_coroutine(&self) -> Rc<CoroutineInner> {
        let ptr = CoroutineInner::current_ptr();
        assert!(!ptr.is_null(), "current_coroutine called outside a coroutine");
        self.inner
            .borrow()
            .all
            .iter()
            .find(|c| Rc::as_ptr(c) == ptr)
            .cloned()
            .expect("current coroutine missing from scheduler's coroutine set")
    }

    /// Yields the calling coroutine to the back of the ready queue,
    /// immediately eligible to run again once its turn comes back around.
    pub fn yield_now(self: &Rc<Self>) {
        let current = self.current_coroutine();
        self.ready(current);
        CoroutineInner::yield_now_raw();
    }

    /// Runs the ready queue and event loop until both are empty.
    ///
    /// This is the scheduler's top-level drive loop: pop a ready coroutine,
    /// resume it until it yields or finishes, repeat; once the ready queue
    /// drains, block in the event loop for the next fd-readiness or timer
    /// event (waking the coroutines parked on it, which re-enters the ready
    /// queue), and keep going until nothing is left anywhere.
    pub fn run_all(self: &Rc<Self>) {
        loop {
            while let Some(coroutine) = self.inner.borrow_mut().ready.pop_front() {
                coroutine
                    .resume()
                    .expect("scheduler only resumes coroutines it just dequeued as Ready");
                if coroutine.status() == Status::Finished {
                    // Report by reference, not by taking: a caller still
                    // holding the `CoroutineHandle` is entitled to observe
                    // the same panic payload via `CoroutineHandle::take_panic`.
                    coroutine.with_panic(|payload| {
                        if let Some(payload) = payload {
                            self.inner.borrow().reporter.report(coroutine.name(), payload);
                        }
                    });
                    self.inner.borrow_mut().all.retain(|c| !Rc::ptr_eq(c, &coroutine));
                }
            }
            let has_waiters = self.inner.borrow().event_loop.has_waiters();
            if !has_waiters {
                break;
            }
            let woken = self.inner.borrow_mut().event_loop.poll_and_wake();
            if woken.is_empty() && self.inner.borrow().ready.is_empty() {
                // No fd became ready and no timer fired within the poll's
                // deadline, and there is nothing else to run: every
                // remaining waiter is stuck forever. Rather than spin,
                // surface this as an empty drive loop.
                break;
            }
            for coroutine in woken {
                self.ready(coroutine);
            }
        }
    }

    /// Returns `true` if there is no ready or parked work left.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let guard = self.inner.borrow();
        guard.ready.is_empty() && !guard.event_loop.has_waiters()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.borrow();
        f.debug_struct("Scheduler")
            .field("ready_len", &guard.ready.len())
            .field("coroutines", &guard.all.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fresh() -> Rc<Scheduler> {
        Scheduler::new(SchedulerConfig::default())
    }

    #[test]
    fn at_most_one_coroutine_runs_at_a_time() {
        let scheduler = fresh();
        let running = Rc::new(Cell::new(0u32));
        let max_observed = Rc::new(Cell::new(0u32));

        for _ in 0..4 {
            let running = Rc::clone(&running);
            let max_observed = Rc::clone(&max_observed);
            scheduler.spawn(move || {
                running.set(running.get() + 1);
                max_observed.set(max_observed.get().max(running.get()));
                Scheduler::current().yield_now();
                running.set(running.get() - 1);
            });
        }
        scheduler.run_all();
        assert_eq!(max_observed.get(), 1, "two coroutines were Running at once");
    }

    #[test]
    fn yield_now_gives_every_ready_coroutine_a_turn_per_pass() {
        let scheduler = fresh();
        let turns = Rc::new(RefCell::new(Vec::new()));
        for id in 0..3 {
            let turns = Rc::clone(&turns);
            scheduler.spawn(move || {
                turns.borrow_mut().push(id);
            });
        }
        scheduler.run_all();
        assert_eq!(*turns.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn run_all_returns_once_idle_with_nothing_spawned() {
        let scheduler = fresh();
        assert!(scheduler.is_idle());
        scheduler.run_all();
        assert!(scheduler.is_idle());
    }

    #[test]
    fn run_all_terminates_after_draining_a_parked_coroutine() {
        let scheduler = fresh();
        let ch = crate::channel::Channel::<u32>::new(0);
        let received = Rc::new(Cell::new(None));
        {
            let ch = ch.clone();
            let received = Rc::clone(&received);
            scheduler.spawn(move || {
                received.set(ch.recv().ok());
            });
        }
        scheduler.spawn(move || {
            ch.send(7).unwrap();
        });
        scheduler.run_all();
        assert_eq!(received.get(), Some(7));
        assert!(scheduler.is_idle());
    }

    #[test]
    fn a_panicking_coroutine_is_reported_and_does_not_abort_others() {
        struct Capturing(Rc<RefCell<Vec<String>>>);
        impl Reporter for Capturing {
            fn report(&self, name: Option<&str>, _payload: &(dyn std::any::Any + Send)) {
                self.0.borrow_mut().push(name.unwrap_or("<unnamed>").to_string());
            }
        }

        let scheduler = fresh();
        let reports = Rc::new(RefCell::new(Vec::new()));
        scheduler.set_reporter(Capturing(Rc::clone(&reports)));

        scheduler.spawn_named(Some("boom"), StackKind::Owned, || {
            panic!("coroutine-internal failure");
        });
        let survivor_ran = Rc::new(Cell::new(false));
        {
            let survivor_ran = Rc::clone(&survivor_ran);
            scheduler.spawn(move || survivor_ran.set(true));
        }
        scheduler.run_all();

        assert_eq!(*reports.borrow(), vec!["boom".to_string()]);
        assert!(survivor_ran.get());
    }

    #[test]
    fn handle_reports_finished_and_panic_payload() {
        let scheduler = fresh();
        scheduler.set_reporter(LoggingReporter);
        let handle = scheduler.spawn(|| panic!("expected"));
        scheduler.run_all();
        assert!(handle.is_finished());
        assert!(handle.take_panic().is_some());
        assert!(handle.take_panic().is_none(), "panic payload should only be taken once");
    }
}
