//! # revent - multi-threaded epoll reactor for network servers
//!
//! One event loop per thread, an acceptor that fans new connections out
//! round-robin, cross-thread task submission with eventfd wakeup, and
//! idle-connection expiry through a lazily-deleted timer heap.
//!
//! This crate is the public face; the pieces live in:
//!
//! - `revent-core` - event masks, errors, logging, env utilities
//! - `revent-reactor` - the Linux epoll runtime
//!
//! ## Minimal server
//!
//! ```ignore
//! use revent::{Acceptor, ConnFactory, EventLoop, LoopPool, ReactorConfig, net};
//! use std::rc::Rc;
//! use std::sync::Arc;
//!
//! fn main() {
//!     revent::signal::ignore_sigpipe().expect("sigpipe");
//!     let cfg = ReactorConfig::from_env();
//!
//!     let mut base = EventLoop::new();
//!     let pool = Rc::new(LoopPool::new(base.handle(), cfg.num_workers));
//!     pool.start();
//!
//!     let listen_fd = net::bind_listen(cfg.port).expect("bind");
//!     let factory: ConnFactory = Arc::new(|_lp, fd| MyConn::new(fd));
//!     let acceptor = Acceptor::new(listen_fd, pool.clone(), factory,
//!                                  cfg.idle_timeout_ms, cfg.max_fds);
//!     acceptor.start(&mut base);
//!
//!     base.run();
//!     pool.stop();
//! }
//! ```
//!
//! A connection type implements [`Connection`]: expose one
//! [`EventSource`] with read/write/error/re-arm handlers installed, and
//! keep the timer-handle linkage so activity can refresh the idle
//! deadline. See `cmd/echo` for a complete example.

pub use revent_core::error::{ReactorError, ReactorResult};
pub use revent_core::mask::EventMask;
pub use revent_core::{env, rlog};
pub use revent_core::{rdebug, rerror, rinfo, rtrace, rwarn};

pub use revent_reactor::{net, signal};
pub use revent_reactor::{
    Acceptor, Callback, ConnFactory, Connection, EventLoop, EventSource, LoopHandle, LoopPool,
    Poller, ReactorConfig, SharedConnection, SharedSource, Task, TimerHandle, TimerStats,
    TimerWheel,
};
