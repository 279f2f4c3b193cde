//! # EventSource - one monitored descriptor
//!
//! An `EventSource` ties a file descriptor to the handlers that service
//! its readiness. It does not talk to the poller itself: registration and
//! re-arming go through the owning [`EventLoop`]. The source OWNS its
//! descriptor and closes it on drop, which is what finally releases an fd
//! once the registry, the connection and any timer entry have let go.
//!
//! Interest changes are cheap: `commit_interest` reports whether the mask
//! actually differs from the last one applied to the OS, so a re-arm with
//! an unchanged mask costs no syscall.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use revent_core::mask::EventMask;

use crate::event_loop::EventLoop;

/// Handler invoked during dispatch. Handlers receive the owning loop so
/// they can re-arm, re-register or tear down through it.
pub type Callback = Rc<dyn Fn(&mut EventLoop)>;

/// Loop-thread-local shared handle to an event source.
pub type SharedSource = Rc<RefCell<EventSource>>;

/// One monitored descriptor: interest, observed readiness and handlers.
pub struct EventSource {
    fd: RawFd,
    interest: EventMask,
    last_applied: EventMask,
    readiness: EventMask,
    read_cb: Option<Callback>,
    write_cb: Option<Callback>,
    error_cb: Option<Callback>,
    rearm_cb: Option<Callback>,
}

impl EventSource {
    /// Wrap a descriptor. The source takes ownership of `fd` and closes
    /// it when dropped.
    pub fn new(fd: RawFd) -> SharedSource {
        Rc::new(RefCell::new(EventSource {
            fd,
            interest: EventMask::empty(),
            last_applied: EventMask::empty(),
            readiness: EventMask::empty(),
            read_cb: None,
            write_cb: None,
            error_cb: None,
            rearm_cb: None,
        }))
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn interest(&self) -> EventMask {
        self.interest
    }

    #[inline]
    pub fn set_interest(&mut self, mask: EventMask) {
        self.interest = mask;
    }

    #[inline]
    pub fn clear_interest(&mut self) {
        self.interest = EventMask::empty();
    }

    #[inline]
    pub fn readiness(&self) -> EventMask {
        self.readiness
    }

    /// Record what the poller observed for this descriptor.
    #[inline]
    pub fn set_readiness(&mut self, mask: EventMask) {
        self.readiness = mask;
    }

    #[inline]
    pub fn last_applied(&self) -> EventMask {
        self.last_applied
    }

    /// Sync the last-applied mask with the current interest. Returns true
    /// when they differed, i.e. when the OS still has to be told.
    #[inline]
    pub fn commit_interest(&mut self) -> bool {
        let changed = self.last_applied != self.interest;
        self.last_applied = self.interest;
        changed
    }

    pub fn set_read_handler(&mut self, cb: Callback) {
        self.read_cb = Some(cb);
    }

    pub fn set_write_handler(&mut self, cb: Callback) {
        self.write_cb = Some(cb);
    }

    pub fn set_error_handler(&mut self, cb: Callback) {
        self.error_cb = Some(cb);
    }

    /// The re-arm handler runs after every dispatch. Servicing I/O usually
    /// changes the desired interest set; this is where the change gets
    /// re-applied to the poller before the next wait.
    pub fn set_rearm_handler(&mut self, cb: Callback) {
        self.rearm_cb = Some(cb);
    }

    /// Route observed readiness to the installed handlers.
    ///
    /// Decision order, each arm terminal unless noted:
    ///
    /// 1. hangup with nothing left to read: no handler runs;
    /// 2. error: the error handler alone;
    /// 3. readable/priority/read-hangup fire the read handler, writable
    ///    fires the write handler, and the re-arm handler ALWAYS runs
    ///    last, whether or not any I/O handler fired.
    ///
    /// Dispatch never touches the poller; handlers do that through `lp`.
    pub fn dispatch(src: &SharedSource, lp: &mut EventLoop) {
        let (ready, read_cb, write_cb, error_cb, rearm_cb) = {
            let s = src.borrow();
            (
                s.readiness,
                s.read_cb.clone(),
                s.write_cb.clone(),
                s.error_cb.clone(),
                s.rearm_cb.clone(),
            )
        };

        if ready.contains(EventMask::HANGUP) && !ready.contains(EventMask::READABLE) {
            src.borrow_mut().clear_interest();
            return;
        }

        if ready.contains(EventMask::ERROR) {
            if let Some(cb) = error_cb {
                cb(lp);
            }
            src.borrow_mut().clear_interest();
            return;
        }

        if ready.intersects(EventMask::READABLE | EventMask::PRIORITY | EventMask::READ_HANGUP) {
            if let Some(cb) = read_cb {
                cb(lp);
            }
        }
        if ready.contains(EventMask::WRITABLE) {
            if let Some(cb) = write_cb {
                cb(lp);
            }
        }
        if let Some(cb) = rearm_cb {
            cb(lp);
        }
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fd() -> RawFd {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        assert!(fd >= 0);
        fd
    }

    /// Install recording handlers; returns the shared call log.
    fn instrument(src: &SharedSource) -> Rc<RefCell<Vec<&'static str>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let handlers: [(&'static str, fn(&mut EventSource, Callback)); 4] = [
            ("read", EventSource::set_read_handler),
            ("write", EventSource::set_write_handler),
            ("error", EventSource::set_error_handler),
            ("rearm", EventSource::set_rearm_handler),
        ];
        let mut s = src.borrow_mut();
        for (name, set) in handlers {
            let log = log.clone();
            set(&mut s, Rc::new(move |_lp| log.borrow_mut().push(name)));
        }
        log
    }

    #[test]
    fn test_commit_interest_gates_reapply() {
        let src = EventSource::new(test_fd());
        let mut s = src.borrow_mut();

        s.set_interest(EventMask::READABLE | EventMask::EDGE);
        assert!(s.commit_interest());
        // same mask again: nothing to re-apply
        s.set_interest(EventMask::READABLE | EventMask::EDGE);
        assert!(!s.commit_interest());
        // changed mask
        s.set_interest(EventMask::READABLE | EventMask::WRITABLE | EventMask::EDGE);
        assert!(s.commit_interest());
        assert_eq!(s.last_applied(), s.interest());
    }

    #[test]
    fn test_dispatch_hangup_only_runs_nothing() {
        let mut lp = EventLoop::new();
        let src = EventSource::new(test_fd());
        let log = instrument(&src);

        src.borrow_mut().set_interest(EventMask::READABLE);
        src.borrow_mut().set_readiness(EventMask::HANGUP);
        EventSource::dispatch(&src, &mut lp);

        assert!(log.borrow().is_empty());
        assert!(src.borrow().interest().is_empty());
    }

    #[test]
    fn test_dispatch_error_runs_error_handler_only() {
        let mut lp = EventLoop::new();
        let src = EventSource::new(test_fd());
        let log = instrument(&src);

        src.borrow_mut().set_readiness(EventMask::ERROR | EventMask::WRITABLE);
        EventSource::dispatch(&src, &mut lp);

        assert_eq!(*log.borrow(), vec!["error"]);
        assert!(src.borrow().interest().is_empty());
    }

    #[test]
    fn test_dispatch_read_write_rearm_order() {
        let mut lp = EventLoop::new();
        let src = EventSource::new(test_fd());
        let log = instrument(&src);

        src.borrow_mut().set_readiness(EventMask::READABLE | EventMask::WRITABLE);
        EventSource::dispatch(&src, &mut lp);

        assert_eq!(*log.borrow(), vec!["read", "write", "rearm"]);
    }

    #[test]
    fn test_dispatch_hangup_with_readable_still_reads() {
        let mut lp = EventLoop::new();
        let src = EventSource::new(test_fd());
        let log = instrument(&src);

        src.borrow_mut().set_readiness(EventMask::HANGUP | EventMask::READABLE);
        EventSource::dispatch(&src, &mut lp);

        assert_eq!(*log.borrow(), vec!["read", "rearm"]);
    }

    #[test]
    fn test_dispatch_rearm_runs_even_with_no_io() {
        let mut lp = EventLoop::new();
        let src = EventSource::new(test_fd());
        let log = instrument(&src);

        src.borrow_mut().set_readiness(EventMask::empty());
        EventSource::dispatch(&src, &mut lp);

        assert_eq!(*log.borrow(), vec!["rearm"]);
    }
}
