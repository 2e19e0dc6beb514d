//! Readiness-based event loop.
//!
//! Wraps a `mio::Poll` with a per-(fd, direction) waiter table and a timer
//! min-heap, giving the scheduler a single place to block when the ready
//! queue is empty: wait for either an fd to become readable/writable or a
//! timer to expire, then hand the woken coroutines back to the ready queue.
//!
//! Only one coroutine may wait on a given (fd, direction) pair at a time —
//! a second registration is a programming error ([`UsageError::DuplicateWaiter`]),
//! matching the single-reader/single-writer discipline [`crate::socket::AsyncSocket`] relies on.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use mio::{Events, Interest, Poll, Token};

use crate::coroutine::CoroutineInner;
use crate::error::UsageError;
use crate::timer::TimerEntry;

/// Which direction of readiness a coroutine is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Readable.
    Read,
    /// Writable.
    Write,
}

struct FdWaiter {
    coroutine: Rc<CoroutineInner>,
    interest: Interest,
}

/// Opaque handle to a timer registered via [`EventLoop::register_timer`],
/// usable to revoke it before it fires (e.g. once the `select` branch it was
/// racing against wins instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerId(u64);

/// The event loop owned by one [`crate::scheduler::Scheduler`].
pub struct EventLoop {
    poll: Poll,
    events: Events,
    next_token: usize,
    fd_waiters: HashMap<Token, FdWaiter>,
    timers: BinaryHeap<Reverse<TimerSortKey>>,
    timer_seq: u64,
    /// Timers cancelled before they fired. The heap has no efficient
    /// arbitrary-element removal, so a cancelled entry is left in place and
    /// discarded the moment `drain_expired_timers` would otherwise pop it —
    /// `has_waiters` also treats it as absent in the meantime so the
    /// scheduler never blocks waiting on a timer nothing still cares about.
    cancelled_timers: HashSet<u64>,
}

/// Wraps [`TimerEntry`] so the heap orders by deadline without requiring
/// `TimerEntry` itself to be `Copy`.
struct TimerSortKey(TimerEntry);

impl PartialEq for TimerSortKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq(&other.0)
    }
}
impl Eq for TimerSortKey {}
impl PartialOrd for TimerSortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerSortKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

const DEFAULT_EVENT_CAPACITY: usize = 1024;

impl EventLoop {
    /// Creates a new, empty event loop.
    ///
    /// # Panics
    /// Panics if the OS poller cannot be created (e.g. fd exhaustion).
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll: Poll::new().expect("failed to create OS event poller"),
            events: Events::with_capacity(DEFAULT_EVENT_CAPACITY),
            next_token: 0,
            fd_waiters: HashMap::new(),
            timers: BinaryHeap::new(),
            timer_seq: 0,
            cancelled_timers: HashSet::new(),
        }
    }

    /// Allocates a fresh `mio::Token` for a newly registered source.
    pub(crate) fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Registers interest in `direction` for `token`, parking `coroutine` to
    /// be woken once it fires.
    ///
    /// # Errors
    /// Returns [`UsageError::DuplicateWaiter`] if another coroutine is
    /// already registered for this exact token.
    pub(crate) fn register_waiter(
        &mut self,
        source: &mut dyn mio::event::Source,
        token: Token,
        direction: Direction,
        coroutine: Rc<CoroutineInner>,
    ) -> Result<(), UsageError> {
        if self.fd_waiters.contains_key(&token) {
            return Err(UsageError::DuplicateWaiter);
        }
        let interest = match direction {
            Direction::Read => Interest::READABLE,
            Direction::Write => Interest::WRITABLE,
        };
        // Best-effort: a failed OS registration leaves no waiter behind, and
        // the caller (an async socket op) surfaces the `io::Error` itself.
        if self.poll.registry().register(source, token, interest).is_err() {
            return Ok(());
        }
        self.fd_waiters.insert(token, FdWaiter { coroutine, interest });
        Ok(())
    }

    /// Removes any waiter registered for `token`, deregistering it from the
    /// OS poller. A no-op if nothing was registered.
    pub(crate) fn deregister_waiter(&mut self, source: &mut dyn mio::event::Source, token: Token) {
        self.fd_waiters.remove(&token);
        let _ = self.poll.registry().deregister(source);
    }

    /// Parks `coroutine` until `deadline` elapses. Returns a [`TimerId`] that
    /// [`EventLoop::cancel_timer`] can later use to revoke it.
    pub(crate) fn register_timer(&mut self, deadline: Instant, coroutine: Rc<CoroutineInner>) -> TimerId {
        let seq = self.timer_seq;
        self.timer_seq += 1;
        self.timers.push(Reverse(TimerSortKey(TimerEntry { deadline, seq, coroutine })));
        TimerId(seq)
    }

    /// Revokes a timer registered via [`EventLoop::register_timer`] before it
    /// fires. A no-op if it already fired or was already cancelled.
    pub(crate) fn cancel_timer(&mut self, id: TimerId) {
        self.cancelled_timers.insert(id.0);
    }

    /// Returns `true` if anything is parked on this event loop (fd or timer).
    /// A cancelled timer still sitting in the heap does not count.
    #[must_use]
    pub fn has_waiters(&self) -> bool {
        if !self.fd_waiters.is_empty() {
            return true;
        }
        self.timers
            .iter()
            .any(|Reverse(TimerSortKey(entry))| !self.cancelled_timers.contains(&entry.seq))
    }

    /// Blocks until the next fd readiness event or timer deadline, then
    /// returns every coroutine that became runnable.
    ///
    /// A `None` poll timeout (no registered timers) blocks indefinitely;
    /// this is only safe because the scheduler only calls this when the
    /// ready queue is otherwise empty — if the event loop has no waiters at
    /// all either, the scheduler does not call this in the first place.
    pub(crate) fn poll_and_wake(&mut self) -> Vec<Rc<CoroutineInner>> {
        let timeout = self.timers.peek().map(|Reverse(TimerSortKey(entry))| {
            entry.deadline.saturating_duration_since(Instant::now())
        });
        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() != std::io::ErrorKind::Interrupted {
                tracing::warn!(%err, "event loop poll failed");
            }
            return self.drain_expired_timers();
        }
        let mut woken = Vec::new();
        for event in &self.events {
            if let Some(waiter) = self.fd_waiters.remove(&event.token()) {
                woken.push(waiter.coroutine);
            }
        }
        woken.extend(self.drain_expired_timers());
        woken
    }

    fn drain_expired_timers(&mut self) -> Vec<Rc<CoroutineInner>> {
        let now = Instant::now();
        let mut expired = Vec::new();
        while let Some(Reverse(TimerSortKey(entry))) = self.timers.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(TimerSortKey(entry)) = self.timers.pop().unwrap();
            if self.cancelled_timers.remove(&entry.seq) {
                continue; // cancelled before it got the chance to fire
            }
            expired.push(entry.coroutine);
        }
        expired
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("fd_waiters", &self.fd_waiters.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}
