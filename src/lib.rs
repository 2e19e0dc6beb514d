//! weave-rt — a user-space cooperative concurrency runtime.
//!
//! Stackful coroutines are scheduled cooperatively on a single OS thread:
//! [`Scheduler`] drives a FIFO ready queue and an event loop that wakes
//! coroutines parked on a socket or a timer. Coroutines talk to each other
//! through Go-style CSP [`Channel`]s (with a non-blocking [`Select`] across
//! several of them at once), or through the lower-level lock-free queues
//! ([`Spsc`], [`Mpmc`]) and lock variants ([`FastMutex`], [`TicketLock`],
//! [`RwLock`]) for code shared across OS threads.
//!
//! # Example
//!
//! ```
//! use weave_rt::{Channel, Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! let ping = Channel::<u32>::new(0);
//!
//! {
//!     let ping = ping.clone();
//!     scheduler.spawn(move || {
//!         ping.send(1).unwrap();
//!     });
//! }
//! {
//!     let ping = ping.clone();
//!     scheduler.spawn(move || {
//!         assert_eq!(ping.recv().unwrap(), 1);
//!     });
//! }
//! scheduler.run_all();
//! ```

mod atomic;
mod backoff;
mod channel;
mod config;
mod context;
mod coroutine;
mod error;
mod event_loop;
mod lock;
mod mpmc;
mod scheduler;
mod select;
mod socket;
mod spsc;
mod timer;

pub use atomic::{
    signal_fence, spin_hint, thread_fence, AtomicFlag, AtomicI16Ext, AtomicI32Ext, AtomicI64Ext,
    AtomicI8Ext, AtomicIsizeExt, AtomicTaggedPtr, AtomicU16Ext, AtomicU32Ext, AtomicU64Ext,
    AtomicU8Ext, AtomicUsizeExt, Order, SEQ_CST,
};
pub use backoff::Backoff;
pub use channel::{Channel, TryRecvError, TrySendError};
pub use config::{
    RingConfig, SchedulerConfig, DEFAULT_SHARED_STACK_SIZE, DEFAULT_STACK_SIZE,
    HIGH_THROUGHPUT_RING, LOW_LATENCY_RING,
};
pub use context::StackKind;
pub use coroutine::Status;
pub use error::{ChannelError, IoError, RuntimeError, UsageError};
pub use event_loop::Direction;
pub use lock::{
    FastMutex, FastMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TicketLock,
    TicketLockGuard,
};
pub use mpmc::Mpmc;
pub use scheduler::{CoroutineHandle, LoggingReporter, Reporter, Scheduler};
pub use select::{Case, RecvCase, Select, SendCase};
pub use socket::{AsyncTcpListener, AsyncTcpStream};
pub use spsc::Spsc;
