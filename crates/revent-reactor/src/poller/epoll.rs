//! epoll backend
//!
//! One `Poller` per loop, touched only by the owning thread. It keeps two
//! registries keyed by descriptor:
//!
//! - fd to event source, STRONG: this is what keeps a source (and its
//!   descriptor) alive while it is armed;
//! - fd to connection, WEAK: consulted only when a timer has to be
//!   attached or refreshed.
//!
//! A descriptor is in the registries iff it is registered with epoll.
//! Control-operation failures are logged and the descriptor is evicted on
//! the spot; a failed registration is never left half-done and never
//! retried, since the usual cause is a descriptor that is already dead.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use revent_core::error::{ReactorError, ReactorResult};
use revent_core::mask::EventMask;
use revent_core::{rerror, rwarn};

use crate::conn::{Connection, SharedConnection};
use crate::net::last_errno;
use crate::source::SharedSource;
use crate::timer::{TimerStats, TimerWheel};

/// Upper bound on ready descriptors returned by one wait.
const READY_BATCH: usize = 4096;
/// Bounded wait so an idle loop still services tasks and timers.
const WAIT_TIMEOUT_MS: i32 = 10_000;

pub struct Poller {
    epfd: RawFd,
    sources: HashMap<RawFd, SharedSource>,
    conns: HashMap<RawFd, Weak<dyn Connection>>,
    ready: Vec<libc::epoll_event>,
    timers: TimerWheel,
}

fn to_epoll(mask: EventMask) -> u32 {
    let mut ev = 0u32;
    if mask.contains(EventMask::READABLE) {
        ev |= libc::EPOLLIN as u32;
    }
    if mask.contains(EventMask::WRITABLE) {
        ev |= libc::EPOLLOUT as u32;
    }
    if mask.contains(EventMask::ERROR) {
        ev |= libc::EPOLLERR as u32;
    }
    if mask.contains(EventMask::HANGUP) {
        ev |= libc::EPOLLHUP as u32;
    }
    if mask.contains(EventMask::READ_HANGUP) {
        ev |= libc::EPOLLRDHUP as u32;
    }
    if mask.contains(EventMask::PRIORITY) {
        ev |= libc::EPOLLPRI as u32;
    }
    if mask.contains(EventMask::EDGE) {
        ev |= libc::EPOLLET as u32;
    }
    ev
}

fn from_epoll(ev: u32) -> EventMask {
    let mut mask = EventMask::empty();
    if ev & libc::EPOLLIN as u32 != 0 {
        mask |= EventMask::READABLE;
    }
    if ev & libc::EPOLLOUT as u32 != 0 {
        mask |= EventMask::WRITABLE;
    }
    if ev & libc::EPOLLERR as u32 != 0 {
        mask |= EventMask::ERROR;
    }
    if ev & libc::EPOLLHUP as u32 != 0 {
        mask |= EventMask::HANGUP;
    }
    if ev & libc::EPOLLRDHUP as u32 != 0 {
        mask |= EventMask::READ_HANGUP;
    }
    if ev & libc::EPOLLPRI as u32 != 0 {
        mask |= EventMask::PRIORITY;
    }
    mask
}

impl Poller {
    /// Create the epoll instance. Failure here is an integration error
    /// (fd table exhausted before the reactor even starts), so it aborts.
    pub fn new() -> Self {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        assert!(epfd >= 0, "epoll_create1 failed: errno {}", last_errno());
        Poller {
            epfd,
            sources: HashMap::new(),
            conns: HashMap::new(),
            ready: vec![libc::epoll_event { events: 0, u64: 0 }; READY_BATCH],
            timers: TimerWheel::new(),
        }
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, mask: EventMask) -> ReactorResult<()> {
        let mut ev = libc::epoll_event {
            events: to_epoll(mask),
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(ReactorError::Os(last_errno()));
        }
        Ok(())
    }

    fn evict(&mut self, fd: RawFd) {
        self.sources.remove(&fd);
        self.conns.remove(&fd);
    }

    fn conn_for(&self, fd: RawFd) -> ReactorResult<SharedConnection> {
        self.conns
            .get(&fd)
            .and_then(Weak::upgrade)
            .ok_or(ReactorError::UnknownDescriptor(fd))
    }

    /// Add a descriptor with the source's current interest mask.
    ///
    /// `timeout_ms > 0` also schedules an idle timer for `conn`, which is
    /// why the connection rides along here at all.
    pub fn register(
        &mut self,
        src: &SharedSource,
        conn: Option<&SharedConnection>,
        timeout_ms: u64,
    ) {
        let fd = src.borrow().fd();
        if timeout_ms > 0 {
            match conn {
                Some(c) => {
                    self.timers.add(c, timeout_ms);
                    self.conns.insert(fd, Rc::downgrade(c));
                }
                None => rwarn!(
                    "revent-poller: no connection for descriptor {}, timer not attached",
                    fd
                ),
            }
        }
        src.borrow_mut().commit_interest();
        self.sources.insert(fd, src.clone());
        let mask = src.borrow().interest();
        if let Err(e) = self.ctl(libc::EPOLL_CTL_ADD, fd, mask) {
            rerror!("revent-poller: add failed for descriptor {}: {}", fd, e);
            self.evict(fd);
        }
    }

    /// Re-apply the interest mask if it changed since it was last applied;
    /// refresh the connection's idle timer when `timeout_ms > 0`.
    pub fn modify(&mut self, src: &SharedSource, timeout_ms: u64) {
        let fd = src.borrow().fd();
        if timeout_ms > 0 {
            match self.conn_for(fd) {
                Ok(conn) => self.timers.add(&conn, timeout_ms),
                Err(e) => rwarn!("revent-poller: timer refresh skipped: {}", e),
            }
        }
        if src.borrow_mut().commit_interest() {
            let mask = src.borrow().interest();
            if let Err(e) = self.ctl(libc::EPOLL_CTL_MOD, fd, mask) {
                rerror!("revent-poller: modify failed for descriptor {}: {}", fd, e);
                self.evict(fd);
            }
        }
    }

    /// Remove a descriptor and clear both registries for it.
    pub fn unregister(&mut self, src: &SharedSource) {
        let (fd, last) = {
            let s = src.borrow();
            (s.fd(), s.last_applied())
        };
        if let Err(e) = self.ctl(libc::EPOLL_CTL_DEL, fd, last) {
            rerror!("revent-poller: del failed for descriptor {}: {}", fd, e);
        }
        self.evict(fd);
    }

    /// Block until at least one registered descriptor is ready.
    ///
    /// The wait itself is bounded; timeouts and EINTR loop internally so
    /// the caller never sees an empty batch. Each returned source has its
    /// observed readiness set and its interest cleared: deciding the next
    /// interest set is the dispatch step's job.
    pub fn wait(&mut self) -> Vec<SharedSource> {
        loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    self.ready.as_mut_ptr(),
                    READY_BATCH as i32,
                    WAIT_TIMEOUT_MS,
                )
            };
            if n < 0 {
                let errno = last_errno();
                if errno != libc::EINTR {
                    rerror!("revent-poller: epoll_wait failed: errno {}", errno);
                }
                continue;
            }
            let mut out = Vec::with_capacity(n as usize);
            for i in 0..n as usize {
                let ev = self.ready[i];
                let fd = ev.u64 as RawFd;
                match self.sources.get(&fd) {
                    Some(src) => {
                        {
                            let mut s = src.borrow_mut();
                            s.set_readiness(from_epoll(ev.events));
                            s.clear_interest();
                        }
                        out.push(src.clone());
                    }
                    // stale event for a descriptor evicted mid-batch:
                    // an anomaly worth a line, not a crash
                    None => rwarn!(
                        "revent-poller: ready descriptor {} has no registry entry",
                        fd
                    ),
                }
            }
            if !out.is_empty() {
                return out;
            }
            // idle iteration: the bounded timeout elapsed with nothing
            // ready, so service the timer heap before blocking again;
            // otherwise a silent loop would never expire its connections
            self.run_expiration_pass();
        }
    }

    /// Pop deleted and expired timer entries. An expired connection whose
    /// only remaining owner is the popped entry is evicted here, so the
    /// reference drop below closes it; connections the application still
    /// holds just lose their idle timer.
    pub fn run_expiration_pass(&mut self) {
        for conn in self.timers.expire_pass() {
            if Rc::strong_count(&conn) == 1 {
                let fd = conn.source().borrow().fd();
                if let Some(src) = self.sources.get(&fd).cloned() {
                    self.unregister(&src);
                }
            }
        }
    }

    #[inline]
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.sources.contains_key(&fd)
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.timers.stats()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if self.epfd >= 0 {
            unsafe {
                libc::close(self.epfd);
            }
            self.epfd = -1;
        }
    }
}
