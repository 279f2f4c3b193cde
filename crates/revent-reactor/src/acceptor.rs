//! # Acceptor - the single producer feeding the reactor
//!
//! Runs on the base loop. The listening socket is registered readable and
//! edge-triggered, so one readiness notification may stand for many
//! queued connections: the read handler drains `accept4` until it would
//! block, every time.
//!
//! Each accepted socket is made non-blocking at accept time, gets
//! `TCP_NODELAY`, and is handed to a round-robin-selected loop as a
//! queued task. The task carries the raw descriptor plus a `Send`
//! factory; the connection object itself is constructed and registered on
//! the target loop's own thread. That is the only point where a new
//! connection crosses threads, and it crosses exactly once.
//!
//! Back-pressure is refusal: once the descriptor ceiling is reached, a
//! freshly accepted socket is closed on the spot and existing connections
//! are left alone.

use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use revent_core::mask::EventMask;
use revent_core::{rdebug, rinfo, rwarn};

use crate::conn::SharedConnection;
use crate::event_loop::EventLoop;
use crate::net::{self, last_errno};
use crate::pool::LoopPool;
use crate::source::{EventSource, SharedSource};

/// Builds a connection for a freshly accepted descriptor, on the loop
/// that will own it.
pub type ConnFactory = Arc<dyn Fn(&mut EventLoop, RawFd) -> SharedConnection + Send + Sync>;

pub struct Acceptor {
    inner: Rc<AcceptorInner>,
}

struct AcceptorInner {
    listen_fd: RawFd,
    source: SharedSource,
    pool: Rc<LoopPool>,
    factory: ConnFactory,
    idle_timeout_ms: u64,
    max_fds: RawFd,
}

impl Acceptor {
    /// Wrap a bound, listening, non-blocking descriptor. The acceptor's
    /// source takes ownership of `listen_fd`.
    pub fn new(
        listen_fd: RawFd,
        pool: Rc<LoopPool>,
        factory: ConnFactory,
        idle_timeout_ms: u64,
        max_fds: i32,
    ) -> Self {
        let source = EventSource::new(listen_fd);
        let inner = Rc::new(AcceptorInner {
            listen_fd,
            source: source.clone(),
            pool,
            factory,
            idle_timeout_ms,
            max_fds,
        });

        let weak: Weak<AcceptorInner> = Rc::downgrade(&inner);
        source.borrow_mut().set_read_handler(Rc::new(move |_lp| {
            if let Some(inner) = weak.upgrade() {
                inner.accept_all();
            }
        }));

        let weak = Rc::downgrade(&inner);
        source.borrow_mut().set_rearm_handler(Rc::new(move |lp| {
            if let Some(inner) = weak.upgrade() {
                inner
                    .source
                    .borrow_mut()
                    .set_interest(EventMask::READABLE | EventMask::EDGE);
                lp.update(&inner.source, 0);
            }
        }));

        Acceptor { inner }
    }

    /// Register the listening socket with the base loop.
    pub fn start(&self, lp: &mut EventLoop) {
        self.inner
            .source
            .borrow_mut()
            .set_interest(EventMask::READABLE | EventMask::EDGE);
        lp.register_source(&self.inner.source);
        rinfo!(
            "revent-acceptor: accepting on descriptor {}",
            self.inner.listen_fd
        );
    }
}

impl AcceptorInner {
    /// Drain every queued connection; mandatory under edge triggering.
    fn accept_all(&self) {
        loop {
            let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            let mut addr_len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            let fd = unsafe {
                libc::accept4(
                    self.listen_fd,
                    &mut addr as *mut _ as *mut libc::sockaddr,
                    &mut addr_len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if fd < 0 {
                let errno = last_errno();
                if errno == libc::EAGAIN {
                    break; // queue drained
                }
                if errno == libc::EINTR {
                    continue;
                }
                rwarn!("revent-acceptor: accept failed: errno {}", errno);
                break;
            }

            if fd >= self.max_fds {
                rwarn!(
                    "revent-acceptor: descriptor ceiling reached, refusing descriptor {}",
                    fd
                );
                unsafe {
                    libc::close(fd);
                }
                continue;
            }

            net::set_nodelay(fd);
            rdebug!(
                "revent-acceptor: connection from {} on descriptor {}",
                net::format_peer(&addr),
                fd
            );

            let target = self.pool.next();
            let factory = self.factory.clone();
            let timeout_ms = self.idle_timeout_ms;
            target.submit(Box::new(move |lp: &mut EventLoop| {
                let conn = factory(lp, fd);
                lp.register(&conn, timeout_ms);
            }));
        }
    }
}
