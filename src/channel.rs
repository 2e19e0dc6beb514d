//! CSP-style channels: a single shared handle (cloned per sender/receiver,
//! Go-channel style rather than split `Sender`/`Receiver` halves) backed by
//! a bounded FIFO buffer. Capacity `0` makes it a rendezvous channel: a
//! `send` only completes once a `recv` is there to take the value directly.
//!
//! Blocking operations park the calling coroutine on the scheduler rather
//! than the OS thread; everything here assumes it runs on one scheduler's
//! coroutines only (see [`crate::mpmc::Mpmc`] for the cross-thread queue).

use crate::coroutine::CoroutineInner;
use crate::error::{ChannelError, UsageError};
use crate::scheduler::Scheduler;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A stashed value belonging to a coroutine parked in [`ChannelState::send_waiters`].
pub(crate) enum SendOutcome<T> {
    /// Still waiting to be picked up.
    Pending(T),
    /// A receiver took it; the waiting `send` should return `Ok(())`.
    Delivered,
    /// The channel closed while this sender was parked; per this crate's
    /// close semantics the stashed value is discarded and the waiting
    /// `send` returns [`ChannelError::Closed`].
    ClosedDiscard,
}

struct SendWaiter<T> {
    coroutine: Rc<CoroutineInner>,
    outcome: Rc<RefCell<SendOutcome<T>>>,
}

struct ChannelState<T> {
    capacity: usize,
    buffer: VecDeque<T>,
    send_waiters: VecDeque<SendWaiter<T>>,
    recv_waiters: VecDeque<Rc<CoroutineInner>>,
    closed: bool,
}

/// A CSP channel. Cloning shares the same underlying queue and waiter
/// lists — every clone is an equally valid sender and receiver.
pub struct Channel<T> {
    inner: Rc<RefCell<ChannelState<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

/// Error returned by [`Channel::try_send`], carrying the value back when it
/// could not be delivered.
#[derive(Debug)]
pub enum TrySendError<T> {
    /// The buffer (or, for a rendezvous channel, the lack of a waiting
    /// receiver) has no room for the value right now.
    Full(T),
    /// The channel is closed.
    Closed(T),
}

/// Error returned by [`Channel::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing is available right now, but the channel is still open.
    Empty,
    /// The channel is closed and drained.
    Closed,
}

impl<T> Channel<T> {
    /// Creates a new channel. `capacity == 0` makes it a rendezvous channel.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ChannelState {
                capacity,
                buffer: VecDeque::new(),
                send_waiters: VecDeque::new(),
                recv_waiters: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Returns the channel's configured capacity (`0` for rendezvous).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity
    }

    /// Returns `true` once [`Channel::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Attempts to send without blocking.
    ///
    /// Succeeds immediately if a receiver is already parked waiting (the
    /// value is handed off and that receiver is woken) or if the buffer has
    /// room; otherwise returns [`TrySendError::Full`] with the value.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.inner.borrow_mut();
        if state.closed {
            return Err(TrySendError::Closed(value));
        }
        if let Some(waiter) = state.recv_waiters.pop_front() {
            state.buffer.push_back(value);
            drop(state);
            Scheduler::current().ready(waiter);
            return Ok(());
        }
        if state.buffer.len() < state.capacity {
            state.buffer.push_back(value);
            return Ok(());
        }
        Err(TrySendError::Full(value))
    }

    /// Attempts to receive without blocking.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.inner.borrow_mut();
        if let Some(value) = state.buffer.pop_front() {
            self.pull_waiting_sender_into_buffer(&mut state);
            return Ok(value);
        }
        if let Some(waiter) = state.send_waiters.pop_front() {
            let outcome = std::mem::replace(&mut *waiter.outcome.borrow_mut(), SendOutcome::Delivered);
            drop(state);
            Scheduler::current().ready(waiter.coroutine);
            return match outcome {
                SendOutcome::Pending(value) => Ok(value),
                SendOutcome::Delivered | SendOutcome::ClosedDiscard => {
                    unreachable!("a queued sender's outcome is Pending until taken exactly once")
                }
            };
        }
        if state.closed {
            return Err(TryRecvError::Closed);
        }
        Err(TryRecvError::Empty)
    }

    /// Registers `coroutine` as a waiting receiver, for use by
    /// [`crate::select::Select`]. A plain blocking [`Channel::recv`]
    /// registers itself the same way internally.
    pub(crate) fn register_recv_waiter(&self, coroutine: Rc<CoroutineInner>) {
        self.inner.borrow_mut().recv_waiters.push_back(coroutine);
    }

    /// Removes the calling coroutine's receive-waiter registration, if
    /// still present (it may already have been popped and woken).
    pub(crate) fn cancel_recv_waiter(&self) {
        let ptr = CoroutineInner::current_ptr();
        let mut state = self.inner.borrow_mut();
        if let Some(pos) = state.recv_waiters.iter().position(|c| Rc::as_ptr(c) == ptr) {
            state.recv_waiters.remove(pos);
        }
    }

    /// Registers `coroutine` as a waiting sender carrying `value`, for use
    /// by [`crate::select::Select`]. Returns the shared cell the select case
    /// polls to learn the outcome.
    pub(crate) fn register_send_waiter(
        &self,
        coroutine: Rc<CoroutineInner>,
        value: T,
    ) -> Rc<RefCell<SendOutcome<T>>> {
        let outcome = Rc::new(RefCell::new(SendOutcome::Pending(value)));
        self.inner.borrow_mut().send_waiters.push_back(SendWaiter {
            coroutine,
            outcome: Rc::clone(&outcome),
        });
        outcome
    }

    /// Removes a send-waiter registration made by
    /// [`Channel::register_send_waiter`], returning the stashed value if it
    /// was never delivered.
    pub(crate) fn cancel_send_waiter(&self, outcome: Rc<RefCell<SendOutcome<T>>>) -> Option<T> {
        let mut state = self.inner.borrow_mut();
        if let Some(pos) = state.send_waiters.iter().position(|w| Rc::ptr_eq(&w.outcome, &outcome)) {
            state.send_waiters.remove(pos);
        }
        drop(state);
        match Rc::try_unwrap(outcome) {
            Ok(cell) => match cell.into_inner() {
                SendOutcome::Pending(value) => Some(value),
                SendOutcome::Delivered | SendOutcome::ClosedDiscard => None,
            },
            Err(_) => None,
        }
    }

    /// Moves a waiting sender's value into the buffer slot a `recv` just
    /// freed up, and wakes that sender. A no-op if no sender is waiting.
    fn pull_waiting_sender_into_buffer(&self, state: &mut ChannelState<T>) {
        if let Some(waiter) = state.send_waiters.pop_front() {
            let outcome = std::mem::replace(&mut *waiter.outcome.borrow_mut(), SendOutcome::Delivered);
            if let SendOutcome::Pending(value) = outcome {
                state.buffer.push_back(value);
            }
            Scheduler::current().ready(waiter.coroutine);
        }
    }

    /// Sends a value, parking the calling coroutine until it is accepted.
    ///
    /// # Errors
    /// Returns [`ChannelError::Closed`] if the channel was already closed,
    /// or closed while this call was parked waiting to send.
    pub fn send(&self, mut value: T) -> Result<(), ChannelError> {
        loop {
            match self.try_send(value) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(ChannelError::Closed),
                Err(TrySendError::Full(v)) => value = v,
            }
            let outcome = Rc::new(RefCell::new(SendOutcome::Pending(value)));
            let coroutine = Scheduler::current().current_coroutine();
            self.inner.borrow_mut().send_waiters.push_back(SendWaiter {
                coroutine,
                outcome: Rc::clone(&outcome),
            });
            Scheduler::park();
            match Rc::try_unwrap(outcome).ok().expect("no other reference outlives the park").into_inner() {
                SendOutcome::Delivered => return Ok(()),
                SendOutcome::ClosedDiscard => return Err(ChannelError::Closed),
                SendOutcome::Pending(v) => value = v, // spurious wake; retry
            }
        }
    }

    /// Receives a value, parking the calling coroutine until one is available.
    ///
    /// # Errors
    /// Returns [`ChannelError::Closed`] once the channel is closed and drained.
    pub fn recv(&self) -> Result<T, ChannelError> {
        loop {
            match self.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Closed) => return Err(ChannelError::Closed),
                Err(TryRecvError::Empty) => {
                    let coroutine = Scheduler::current().current_coroutine();
                    self.inner.borrow_mut().recv_waiters.push_back(coroutine);
                    Scheduler::park();
                }
            }
        }
    }

    /// Closes the channel.
    ///
    /// Every parked receiver wakes to a [`ChannelError::Closed`] `recv`.
    /// Every parked sender wakes to a [`ChannelError::Closed`] `send`, and
    /// its stashed value is dropped without being delivered.
    ///
    /// # Errors
    /// Returns [`UsageError::DoubleClose`] if already closed — calling
    /// `close()` twice on the same channel is a programming error, not a
    /// recoverable channel state.
    pub fn close(&self) -> Result<(), UsageError> {
        let mut state = self.inner.borrow_mut();
        if state.closed {
            return Err(UsageError::DoubleClose);
        }
        state.closed = true;
        let send_waiters = std::mem::take(&mut state.send_waiters);
        let recv_waiters = std::mem::take(&mut state.recv_waiters);
        drop(state);
        let scheduler = Scheduler::current();
        for waiter in send_waiters {
            *waiter.outcome.borrow_mut() = SendOutcome::ClosedDiscard;
            scheduler.ready(waiter.coroutine);
        }
        for coroutine in recv_waiters {
            scheduler.ready(coroutine);
        }
        Ok(())
    }
}
