//! Non-blocking arbitration across multiple channel operations.
//!
//! A [`Select`] is built from one or more [`Case`]s (a channel `recv` or
//! `send` paired with a closure to run on success), plus an optional
//! `default` or `timeout` branch. [`Select::run`] tries every case once, in
//! a rotated order so no case is systematically favored under contention;
//! if none are immediately ready and there is no `default`, the calling
//! coroutine registers itself as a waiter on every case and parks, racing to
//! be woken by whichever channel becomes ready first and cancelling its
//! registration on the rest.

use crate::channel::{Channel, SendOutcome, TryRecvError, TrySendError};
use crate::coroutine::CoroutineInner;
use crate::error::{ChannelError, RuntimeError};
use crate::scheduler::Scheduler;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// One arm of a [`Select`]: a channel operation plus the closure to run if
/// it is the one chosen.
pub trait Case {
    /// Tries the operation once. Returns `true` if it fired — the case's
    /// body has already run.
    fn try_fire(&mut self) -> bool;

    /// Registers the calling coroutine as a waiter on whatever this case is
    /// blocked on, so a future wake-up can retry it.
    fn register(&mut self, coroutine: Rc<CoroutineInner>);

    /// Cancels a registration made by [`Case::register`]. Called on every
    /// case that was not the one woken, so they don't leak a stale waiter.
    fn cancel(&mut self);
}

/// A `recv` case: tries `channel.try_recv()`, running `body` with the
/// result on success.
pub struct RecvCase<'a, T, F: FnMut(Result<T, ChannelError>)> {
    channel: &'a Channel<T>,
    body: Option<F>,
}

impl<'a, T, F: FnMut(Result<T, ChannelError>)> RecvCase<'a, T, F> {
    /// Creates a `recv` case over `channel`, running `body` once it fires.
    pub fn new(channel: &'a Channel<T>, body: F) -> Self {
        Self { channel, body: Some(body) }
    }
}

impl<T, F: FnMut(Result<T, ChannelError>)> Case for RecvCase<'_, T, F> {
    fn try_fire(&mut self) -> bool {
        match self.channel.try_recv() {
            Ok(value) => {
                (self.body.as_mut().expect("case body missing"))(Ok(value));
                true
            }
            Err(TryRecvError::Closed) => {
                (self.body.as_mut().expect("case body missing"))(Err(ChannelError::Closed));
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }

    fn register(&mut self, coroutine: Rc<CoroutineInner>) {
        self.channel.register_recv_waiter(coroutine);
    }

    fn cancel(&mut self) {
        self.channel.cancel_recv_waiter();
    }
}

/// A `send` case: tries `channel.try_send(value)`, running `body` with the
/// outcome on success. The value to send is taken once, on construction —
/// if the case never fires in a non-blocking [`Select::try_run`], it is
/// simply dropped along with the case.
pub struct SendCase<'a, T, F: FnMut(Result<(), ChannelError>)> {
    channel: &'a Channel<T>,
    value: Option<T>,
    pending: Option<Rc<RefCell<SendOutcome<T>>>>,
    body: Option<F>,
}

impl<'a, T, F: FnMut(Result<(), ChannelError>)> SendCase<'a, T, F> {
    /// Creates a `send` case over `channel`, running `body` once it fires.
    pub fn new(channel: &'a Channel<T>, value: T, body: F) -> Self {
        Self { channel, value: Some(value), pending: None, body: Some(body) }
    }
}

impl<T, F: FnMut(Result<(), ChannelError>)> Case for SendCase<'_, T, F> {
    fn try_fire(&mut self) -> bool {
        // A prior `register` may have already been serviced by some other
        // coroutine's `recv`/`close` while we were parked; check that before
        // attempting a fresh `try_send`.
        if let Some(pending) = &self.pending {
            let resolved = !matches!(*pending.borrow(), SendOutcome::Pending(_));
            if resolved {
                let pending = self.pending.take().unwrap();
                let outcome = Rc::try_unwrap(pending)
                    .ok()
                    .expect("no other reference outlives delivery")
                    .into_inner();
                let result = match outcome {
                    SendOutcome::Delivered => Ok(()),
                    SendOutcome::ClosedDiscard => Err(ChannelError::Closed),
                    SendOutcome::Pending(_) => unreachable!("checked above"),
                };
                (self.body.as_mut().expect("case body missing"))(result);
                return true;
            }
            return false;
        }
        let value = match self.value.take() {
            Some(v) => v,
            None => return false, // already fired once; a Select never retries a spent case
        };
        match self.channel.try_send(value) {
            Ok(()) => {
                (self.body.as_mut().expect("case body missing"))(Ok(()));
                true
            }
            Err(TrySendError::Closed(_)) => {
                (self.body.as_mut().expect("case body missing"))(Err(ChannelError::Closed));
                true
            }
            Err(TrySendError::Full(v)) => {
                self.value = Some(v);
                false
            }
        }
    }

    fn register(&mut self, coroutine: Rc<CoroutineInner>) {
        if let Some(value) = self.value.take() {
            self.pending = Some(self.channel.register_send_waiter(coroutine, value));
        }
    }

    fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.value = self.channel.cancel_send_waiter(pending);
        }
    }
}

thread_local! {
    /// A simple xorshift generator, used only to rotate the case-evaluation
    /// order so that under sustained contention no single case starves the
    /// others. Not cryptographic, not even a dependency: a `rand` crate
    /// would be overkill for "rotate a small slice differently each call".
    static FAIRNESS_STATE: Cell<u64> = const { Cell::new(0x9E37_79B9_7F4A_7C15) };
}

fn next_rotation(len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    FAIRNESS_STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        (x % len as u64) as usize
    })
}

/// Builds and runs a non-blocking or blocking select over a set of [`Case`]s.
pub struct Select<'a> {
    cases: Vec<Box<dyn Case + 'a>>,
}

impl<'a> Select<'a> {
    /// Creates an empty select; add cases with [`Select::case`].
    #[must_use]
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Adds a case.
    #[must_use]
    pub fn case(mut self, case: impl Case + 'a) -> Self {
        self.cases.push(Box::new(case));
        self
    }

    /// Tries every case once, in a fairness-rotated order, running the
    /// first one that fires. Returns `true` if any case fired.
    ///
    /// Never blocks: callers that want a `default` branch just check the
    /// return value and run their default body on `false`.
    #[must_use]
    pub fn try_run(mut self) -> bool {
        let start = next_rotation(self.cases.len());
        let len = self.cases.len();
        for offset in 0..len {
            let idx = (start + offset) % len;
            if self.cases[idx].try_fire() {
                return true;
            }
        }
        false
    }

    /// Tries every case once in rotated order; returns the index of the one
    /// that fired, cancelling every other case's registration (a no-op for
    /// a case that was never registered).
    fn fire_one_and_cancel_rest(&mut self) -> Option<usize> {
        let len = self.cases.len();
        let fired = (0..len).find(|&idx| self.cases[idx].try_fire());
        if let Some(idx) = fired {
            for (j, other) in self.cases.iter_mut().enumerate() {
                if j != idx {
                    other.cancel();
                }
            }
        }
        fired
    }

    /// Tries every case once; if none fire, parks the calling coroutine
    /// registered on all of them, retrying each time it is woken, until
    /// one fires.
    pub fn run(mut self) {
        let start = next_rotation(self.cases.len());
        let len = self.cases.len();
        for offset in 0..len {
            let idx = (start + offset) % len;
            if self.fire_one_and_cancel_rest_from(idx).is_some() {
                return;
            }
        }
        let coroutine = Scheduler::current().current_coroutine();
        for case in &mut self.cases {
            case.register(Rc::clone(&coroutine));
        }
        loop {
            Scheduler::park();
            if self.fire_one_and_cancel_rest().is_some() {
                return;
            }
            // Spurious wake with nothing resolved yet; park again.
        }
    }

    /// Like [`Select::run`], but gives up and returns
    /// [`RuntimeError::TimedOut`] if no case fires before `deadline`.
    ///
    /// # Errors
    /// Returns [`RuntimeError::TimedOut`] if `deadline` passes before any
    /// case fires.
    pub fn run_until(mut self, deadline: Instant) -> Result<(), RuntimeError> {
        let start = next_rotation(self.cases.len());
        let len = self.cases.len();
        for offset in 0..len {
            let idx = (start + offset) % len;
            if self.fire_one_and_cancel_rest_from(idx).is_some() {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(RuntimeError::TimedOut);
        }
        let coroutine = Scheduler::current().current_coroutine();
        for case in &mut self.cases {
            case.register(Rc::clone(&coroutine));
        }
        let timer_id = Scheduler::current().event_loop_mut().register_timer(deadline, coroutine);
        loop {
            Scheduler::park();
            if self.fire_one_and_cancel_rest().is_some() {
                // A case won the race against the timeout; revoke it so it
                // doesn't keep the event loop (and a finished scheduler)
                // waiting on a deadline nothing cares about anymore.
                Scheduler::current().event_loop_mut().cancel_timer(timer_id);
                return Ok(());
            }
            if Instant::now() >= deadline {
                for case in &mut self.cases {
                    case.cancel();
                }
                return Err(RuntimeError::TimedOut);
            }
        }
    }

    /// Tries a single case index first (the fairness-rotated starting
    /// point), falling back to [`Select::fire_one_and_cancel_rest`]'s full
    /// scan order starting there. Used by the initial non-blocking pass so
    /// the rotation offset is honored before any registration happens.
    fn fire_one_and_cancel_rest_from(&mut self, idx: usize) -> Option<usize> {
        if self.cases[idx].try_fire() {
            for (j, other) in self.cases.iter_mut().enumerate() {
                if j != idx {
                    other.cancel();
                }
            }
            return Some(idx);
        }
        None
    }

    /// Convenience for a select with a fixed timeout from now.
    ///
    /// # Errors
    /// Returns [`RuntimeError::TimedOut`] if `timeout` elapses before any
    /// case fires.
    pub fn run_with_timeout(self, timeout: Duration) -> Result<(), RuntimeError> {
        self.run_until(Instant::now() + timeout)
    }
}

impl Default for Select<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;

    #[test]
    fn picks_the_only_ready_branch() {
        let a = Channel::<u32>::new(1);
        let b = Channel::<u32>::new(1);
        b.try_send(7).unwrap();

        let mut fired: Option<u32> = None;
        let picked = Select::new()
            .case(RecvCase::new(&a, |_r| unreachable!("a has nothing to offer")))
            .case(RecvCase::new(&b, |r| fired = r.ok()))
            .try_run();

        assert!(picked);
        assert_eq!(fired, Some(7));
    }

    #[test]
    fn try_run_returns_false_when_nothing_ready() {
        let a = Channel::<u32>::new(1);
        let picked = Select::new().case(RecvCase::new(&a, |_r| {})).try_run();
        assert!(!picked);
    }

    #[test]
    fn blocking_select_wakes_on_whichever_channel_sends_first() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let a = Channel::<u32>::new(0);
        let b = Channel::<u32>::new(0);
        let result = Rc::new(Cell::new(None));

        {
            let a = a.clone();
            let b = b.clone();
            let result = Rc::clone(&result);
            scheduler.spawn(move || {
                Select::new()
                    .case(RecvCase::new(&a, |r| result.set(r.ok().map(|v| ("a", v)))))
                    .case(RecvCase::new(&b, |r| result.set(r.ok().map(|v| ("b", v)))))
                    .run();
            });
        }
        {
            let b = b.clone();
            scheduler.spawn(move || {
                b.send(99).unwrap();
            });
        }
        scheduler.run_all();
        assert_eq!(result.get(), Some(("b", 99)));
    }

    #[test]
    fn run_with_timeout_gives_up_after_the_deadline() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let a = Channel::<u32>::new(0);
        let timed_out = Rc::new(Cell::new(None));
        {
            let a = a.clone();
            let timed_out = Rc::clone(&timed_out);
            scheduler.spawn(move || {
                let got = Select::new()
                    .case(RecvCase::new(&a, |_r| unreachable!("a never receives anything")))
                    .run_with_timeout(std::time::Duration::from_millis(20));
                timed_out.set(Some(matches!(got, Err(RuntimeError::TimedOut))));
            });
        }
        scheduler.run_all();
        assert_eq!(timed_out.get(), Some(true));
    }

    #[test]
    fn run_with_timeout_fires_the_case_if_it_beats_the_deadline() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let a = Channel::<u32>::new(0);
        let result = Rc::new(Cell::new(None));
        {
            let a = a.clone();
            let result = Rc::clone(&result);
            scheduler.spawn(move || {
                let got = Select::new()
                    .case(RecvCase::new(&a, |r| result.set(r.ok())))
                    .run_with_timeout(std::time::Duration::from_secs(5));
                assert!(got.is_ok());
            });
        }
        {
            let a = a.clone();
            scheduler.spawn(move || {
                a.send(11).unwrap();
            });
        }
        scheduler.run_all();
        assert_eq!(result.get(), Some(11));
    }

    #[test]
    fn a_fired_case_cancels_its_own_pending_timeout() {
        // Regression test: once a case wins the race against the timeout,
        // the timer must be revoked, or the event loop still reports a
        // waiter and the scheduler blocks until the (long) deadline before
        // noticing the select coroutine already finished.
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let a = Channel::<u32>::new(0);
        {
            let a = a.clone();
            scheduler.spawn(move || {
                let got = Select::new()
                    .case(RecvCase::new(&a, |_r| {}))
                    .run_with_timeout(std::time::Duration::from_secs(3600));
                assert!(got.is_ok());
            });
        }
        {
            let a = a.clone();
            scheduler.spawn(move || {
                a.send(1).unwrap();
            });
        }
        let start = std::time::Instant::now();
        scheduler.run_all();
        assert!(
            start.elapsed() < std::time::Duration::from_secs(1),
            "run_all waited on a cancelled timer instead of finishing immediately"
        );
    }
}
