//! Async TCP sockets: thin wrappers over `mio::net` that park the calling
//! coroutine on the event loop instead of blocking the OS thread when an
//! operation would block.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::{TcpListener as MioListener, TcpStream as MioStream};

use crate::error::IoError;
use crate::event_loop::Direction;
use crate::scheduler::Scheduler;

fn raw_fd(stream: &MioStream) -> i32 {
    use std::os::unix::io::AsRawFd;
    stream.as_raw_fd()
}

fn raw_fd_listener(listener: &MioListener) -> i32 {
    use std::os::unix::io::AsRawFd;
    listener.as_raw_fd()
}

/// Parks the calling coroutine until `source` is ready for `direction`,
/// retrying `op` each time. `op` should itself be a non-blocking syscall
/// wrapper (e.g. `TcpStream::read`) that returns `io::ErrorKind::WouldBlock`
/// when not ready.
fn retry_until_ready<S, R>(
    source: &mut S,
    fd: i32,
    direction: Direction,
    mut op: impl FnMut(&mut S) -> io::Result<R>,
) -> Result<R, IoError>
where
    S: mio::event::Source,
{
    loop {
        match op(source) {
            Ok(value) => return Ok(value),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                let scheduler = Scheduler::current();
                let coroutine = scheduler.current_coroutine();
                let token = scheduler.event_loop_mut().allocate_token();
                // Registration failures here mean another waiter beat us to
                // this exact (fd, direction) pair, which `AsyncSocket`'s
                // single-reader/single-writer contract rules out; treat it
                // as a bug rather than a recoverable I/O error.
                scheduler
                    .event_loop_mut()
                    .register_waiter(source, token, direction, coroutine)
                    .expect("AsyncSocket never has two waiters on the same direction");
                Scheduler::park();
                scheduler.event_loop_mut().deregister_waiter(source, token);
            }
            Err(err) => return Err(IoError::new(fd, err)),
        }
    }
}

/// A non-blocking TCP connection, parking on the event loop rather than the
/// OS thread when a read or write would block.
pub struct AsyncTcpStream {
    inner: MioStream,
    fd: i32,
}

impl AsyncTcpStream {
    /// Wraps an already-connected `mio::net::TcpStream`.
    #[must_use]
    pub fn from_mio(inner: MioStream) -> Self {
        let fd = raw_fd(&inner);
        Self { inner, fd }
    }

    /// Begins a non-blocking connect to `addr`, parking until it completes.
    ///
    /// # Errors
    /// Returns an [`IoError`] if the underlying `connect(2)` fails for a
    /// reason other than it being in progress.
    pub fn connect(addr: SocketAddr) -> Result<Self, IoError> {
        let mut inner = MioStream::connect(addr).map_err(|e| IoError::new(-1, e))?;
        let fd = raw_fd(&inner);
        // A fresh non-blocking connect is "writable" once established (or
        // failed), whichever comes first; `take_error` tells them apart.
        let scheduler = Scheduler::current();
        let coroutine = scheduler.current_coroutine();
        let token = scheduler.event_loop_mut().allocate_token();
        scheduler
            .event_loop_mut()
            .register_waiter(&mut inner, token, Direction::Write, coroutine)
            .expect("a freshly connected socket has no prior waiter");
        Scheduler::park();
        scheduler.event_loop_mut().deregister_waiter(&mut inner, token);
        if let Some(err) = inner.take_error().map_err(|e| IoError::new(fd, e))? {
            return Err(IoError::new(fd, err));
        }
        Ok(Self { inner, fd })
    }

    /// Reads into `buf`, parking until data is available.
    ///
    /// # Errors
    /// Returns an [`IoError`] on any I/O failure other than would-block.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        let fd = self.fd;
        retry_until_ready(&mut self.inner, fd, Direction::Read, |s| s.read(buf))
    }

    /// Writes from `buf`, parking until the socket accepts more data.
    ///
    /// # Errors
    /// Returns an [`IoError`] on any I/O failure other than would-block.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        let fd = self.fd;
        retry_until_ready(&mut self.inner, fd, Direction::Write, |s| s.write(buf))
    }

    /// Writes all of `buf`, parking between partial writes as needed.
    ///
    /// # Errors
    /// Returns an [`IoError`] on any I/O failure other than would-block.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<(), IoError> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Returns the remote peer's address.
    ///
    /// # Errors
    /// Returns an [`IoError`] if the socket is not connected.
    pub fn peer_addr(&self) -> Result<SocketAddr, IoError> {
        self.inner.peer_addr().map_err(|e| IoError::new(self.fd, e))
    }
}

/// A non-blocking TCP listener, parking on the event loop rather than the
/// OS thread while waiting for an incoming connection.
pub struct AsyncTcpListener {
    inner: MioListener,
    fd: i32,
}

impl AsyncTcpListener {
    /// Binds a new listener to `addr`.
    ///
    /// # Errors
    /// Returns an [`IoError`] if the bind fails.
    pub fn bind(addr: SocketAddr) -> Result<Self, IoError> {
        let inner = MioListener::bind(addr).map_err(|e| IoError::new(-1, e))?;
        let fd = raw_fd_listener(&inner);
        Ok(Self { inner, fd })
    }

    /// Accepts the next incoming connection, parking until one arrives.
    ///
    /// # Errors
    /// Returns an [`IoError`] on any I/O failure other than would-block.
    pub fn accept(&mut self) -> Result<(AsyncTcpStream, SocketAddr), IoError> {
        let fd = self.fd;
        let (stream, addr) = retry_until_ready(&mut self.inner, fd, Direction::Read, |l| l.accept())?;
        Ok((AsyncTcpStream::from_mio(stream), addr))
    }

    /// Returns the address this listener is bound to.
    ///
    /// # Errors
    /// Returns an [`IoError`] if the OS call fails.
    pub fn local_addr(&self) -> Result<SocketAddr, IoError> {
        self.inner.local_addr().map_err(|e| IoError::new(self.fd, e))
    }
}
