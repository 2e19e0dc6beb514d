//! Error taxonomy.
//!
//! `WouldBlock` never appears here: it is an internal signal that a blocking
//! operation translates into parking the calling coroutine. Try-variants
//! surface `QueueFull`/`QueueEmpty` as a `bool`/`Option` return rather than an
//! error value, matching the propagation policy in the specification.

use std::io;

/// Errors surfaced by channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel has been closed; no new value can be sent, and a `recv`
    /// found it both closed and empty.
    #[error("channel is closed")]
    Closed,
}

impl ChannelError {
    /// Returns `true` if this error indicates the channel is permanently unusable.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// An I/O failure from an async socket operation, carrying the OS error and
/// the fd it occurred on.
#[derive(Debug, thiserror::Error)]
#[error("io error on fd {fd}: {source}")]
pub struct IoError {
    /// The file descriptor the failing syscall was issued against.
    pub fd: i32,
    /// The underlying OS error.
    #[source]
    pub source: io::Error,
}

impl IoError {
    pub(crate) fn new(fd: i32, source: io::Error) -> Self {
        Self { fd, source }
    }
}

/// Programming-usage errors: double-close, resuming a finished coroutine,
/// destroying a running coroutine, registering a second waiter on the same
/// (fd, direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// `close()` called twice on the same resource.
    #[error("double close")]
    DoubleClose,
    /// `resume()` called on a coroutine that already reached `Finished`.
    #[error("resume of finished coroutine")]
    ResumeFinished,
    /// `destroy()` called on a coroutine that is not `Finished`.
    #[error("destroy of non-finished coroutine")]
    DestroyWhileLive,
    /// `register()` called twice for the same (fd, direction).
    #[error("duplicate waiter registration")]
    DuplicateWaiter,
}

/// Top-level runtime error, returned by operations that can fail for more
/// than one reason (e.g. a timed `select`, an async socket op).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// See [`ChannelError`].
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// A time-bounded operation did not complete before its deadline.
    #[error("operation timed out")]
    TimedOut,
    /// See [`IoError`].
    #[error(transparent)]
    Io(#[from] IoError),
    /// See [`UsageError`].
    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl RuntimeError {
    /// Returns `true` if retrying the same operation later might succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}
