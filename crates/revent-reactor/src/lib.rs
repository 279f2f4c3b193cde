//! # revent-reactor - multi-threaded epoll reactor runtime
//!
//! A small pool of OS threads, one event loop per thread, multiplexing
//! many socket descriptors each. A single acceptor drains inbound
//! connections and fans them out round-robin; idle connections are
//! expired by a per-loop lazily-deleted timer heap.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  base loop (acceptor thread)                             │
//! │    listen fd ──accept4 drain──► pool.next() ──submit──┐  │
//! └───────────────────────────────────────────────────────┼──┘
//!                                                         │ Task (Send)
//! ┌───────────────────────────────────────────────────────▼──┐
//! │  worker loop thread (one of N)                           │
//! │                                                          │
//! │   loop:  poller.wait()     ◄── eventfd wakeup            │
//! │          dispatch ready sources (read/write/error/rearm) │
//! │          drain queued tasks (register new connections)   │
//! │          timer expiration pass (close idle connections)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! Inside a loop everything is `Rc`-based and thread-local: the poller's
//! registry owns the armed event sources, a source owns its descriptor,
//! and a pending timer entry owns its connection (the owner of last
//! resort for handed-off connections). The only state shared between
//! threads is each loop's [`LoopHandle`]: a mutex-guarded task queue, a
//! quit flag and an eventfd.
//!
//! ## Quick start
//!
//! ```ignore
//! use revent_reactor::{Acceptor, ConnFactory, EventLoop, LoopPool, ReactorConfig, net};
//! use std::rc::Rc;
//! use std::sync::Arc;
//!
//! let cfg = ReactorConfig::from_env();
//! let mut base = EventLoop::new();
//! let pool = Rc::new(LoopPool::new(base.handle(), cfg.num_workers));
//! pool.start();
//!
//! let listen_fd = net::bind_listen(cfg.port).expect("bind");
//! let factory: ConnFactory = Arc::new(|_lp, fd| MyConn::new(fd));
//! let acceptor = Acceptor::new(listen_fd, pool.clone(), factory,
//!                              cfg.idle_timeout_ms, cfg.max_fds);
//! acceptor.start(&mut base);
//! base.run();
//! pool.stop();
//! ```

pub mod acceptor;
pub mod config;
pub mod conn;
pub mod event_loop;
pub mod net;
pub mod poller;
pub mod pool;
pub mod signal;
pub mod source;
pub mod timer;

// Re-export the main types
pub use acceptor::{Acceptor, ConnFactory};
pub use config::ReactorConfig;
pub use conn::{Connection, SharedConnection};
pub use event_loop::{EventLoop, LoopHandle, Task};
pub use poller::Poller;
pub use pool::LoopPool;
pub use source::{Callback, EventSource, SharedSource};
pub use timer::{TimerHandle, TimerStats, TimerWheel};
