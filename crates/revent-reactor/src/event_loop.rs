//! # EventLoop - one reactor loop per thread
//!
//! Each loop cycles through four steps on its owning thread:
//!
//! 1. block in the poller's bounded wait
//! 2. dispatch every ready source, in report order
//! 3. drain and run queued cross-thread tasks
//! 4. run the timer expiration pass
//!
//! The loop's internals (poller registries, timer heap, sources) are
//! `Rc`-based and therefore cannot leave the owning thread; the ONLY
//! cross-thread surface is the [`LoopHandle`]: a mutex-guarded FIFO of
//! tasks, a quit flag and an eventfd that interrupts a blocked wait.
//!
//! A task submitted from a foreign thread runs at step 3 of the next
//! cycle; the submitter signals the eventfd so a loop parked in step 1
//! returns promptly instead of sleeping out the bounded timeout. Tasks
//! queued while step 3 is draining run in the following cycle, never the
//! current one, so a task that resubmits itself cannot live-lock the loop.

use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use revent_core::mask::EventMask;
use revent_core::{rinfo, rwarn};

use crate::conn::SharedConnection;
use crate::net::last_errno;
use crate::poller::Poller;
use crate::source::{EventSource, SharedSource};

/// Work shipped to a loop from another thread. The task runs on the
/// owning thread and receives the loop itself, which is how a new
/// connection gets registered with a poller it could never touch
/// directly.
pub type Task = Box<dyn FnOnce(&mut EventLoop) + Send + 'static>;

thread_local! {
    /// One loop per thread. Checked at construction, cleared on drop.
    static LOOP_ON_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// The cross-thread face of an [`EventLoop`].
pub struct LoopHandle {
    owner: ThreadId,
    wakeup_fd: RawFd,
    quit: AtomicBool,
    draining: AtomicBool,
    pending: Mutex<Vec<Task>>,
}

impl LoopHandle {
    /// Queue a task for the owning thread and wake it if needed.
    ///
    /// The wakeup fires when the caller is a foreign thread, or when the
    /// owner is mid-drain (a task queued during the drain would otherwise
    /// sit until some unrelated readiness event).
    pub fn submit(&self, task: Task) {
        {
            let mut pending = self.pending.lock().unwrap();
            pending.push(task);
        }
        if thread::current().id() != self.owner || self.draining.load(Ordering::Acquire) {
            self.wakeup();
        }
    }

    /// Ask the loop to stop after its current cycle. Idempotent, safe
    /// from any thread; a remote caller gets the loop out of its blocked
    /// wait immediately rather than after the bounded timeout.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
        if thread::current().id() != self.owner {
            self.wakeup();
        }
    }

    #[inline]
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    fn wakeup(&self) {
        let one: u64 = 1;
        let n = unsafe {
            libc::write(
                self.wakeup_fd,
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            let errno = last_errno();
            // EAGAIN means the counter is saturated: a wakeup is already
            // pending, which is all we wanted
            if errno != libc::EAGAIN {
                rwarn!("revent-loop: wakeup write failed: errno {}", errno);
            }
        }
    }
}

/// A single-threaded reactor loop. `!Send` on purpose: everything inside
/// belongs to the thread that built it.
pub struct EventLoop {
    poller: Poller,
    handle: Arc<LoopHandle>,
    wakeup_source: SharedSource,
    looping: bool,
}

fn create_wakeup_fd() -> RawFd {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    // without a wakeup primitive cross-thread submission is broken;
    // nothing sensible to degrade to
    assert!(fd >= 0, "eventfd creation failed: errno {}", last_errno());
    fd
}

impl EventLoop {
    /// Build a loop owned by the current thread.
    ///
    /// Panics if this thread already owns a loop, or if the epoll or
    /// eventfd descriptors cannot be created.
    pub fn new() -> Self {
        LOOP_ON_THREAD.with(|flag| {
            assert!(!flag.get(), "this thread already owns an event loop");
            flag.set(true);
        });

        let mut poller = Poller::new();
        let wakeup_fd = create_wakeup_fd();
        let handle = Arc::new(LoopHandle {
            owner: thread::current().id(),
            wakeup_fd,
            quit: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
        });

        let wakeup_source = EventSource::new(wakeup_fd);
        {
            let mut s = wakeup_source.borrow_mut();
            s.set_interest(EventMask::READABLE | EventMask::EDGE);

            // drain the full counter every time; an undrained eventfd
            // cannot re-trigger under edge-triggered registration
            let weak = Rc::downgrade(&wakeup_source);
            s.set_read_handler(Rc::new(move |_lp| {
                let mut buf: u64 = 0;
                let n = unsafe {
                    libc::read(
                        wakeup_fd,
                        &mut buf as *mut u64 as *mut libc::c_void,
                        std::mem::size_of::<u64>(),
                    )
                };
                if n != std::mem::size_of::<u64>() as isize {
                    rwarn!("revent-loop: wakeup drain read {} bytes instead of 8", n);
                }
                if let Some(src) = weak.upgrade() {
                    src.borrow_mut()
                        .set_interest(EventMask::READABLE | EventMask::EDGE);
                }
            }));

            let weak = Rc::downgrade(&wakeup_source);
            s.set_rearm_handler(Rc::new(move |lp| {
                if let Some(src) = weak.upgrade() {
                    lp.update(&src, 0);
                }
            }));
        }
        poller.register(&wakeup_source, None, 0);

        EventLoop {
            poller,
            handle,
            wakeup_source,
            looping: false,
        }
    }

    /// The shareable cross-thread handle.
    pub fn handle(&self) -> Arc<LoopHandle> {
        self.handle.clone()
    }

    #[inline]
    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.handle.owner
    }

    #[inline]
    fn assert_owner(&self) {
        assert!(
            self.is_owner(),
            "event loop touched from a foreign thread"
        );
    }

    /// Run the wait/dispatch/drain/expire cycle until quit is observed.
    pub fn run(&mut self) {
        self.assert_owner();
        assert!(!self.looping, "event loop is already running");
        self.looping = true;

        while !self.handle.quit.load(Ordering::Acquire) {
            for src in self.poller.wait() {
                EventSource::dispatch(&src, self);
            }
            self.drain_pending();
            self.poller.run_expiration_pass();
        }

        rinfo!("revent-loop: stopped");
        self.looping = false;
    }

    /// Execute a task inline. Owning thread only; foreign threads go
    /// through [`LoopHandle::submit`].
    pub fn run_in_loop<F>(&mut self, f: F)
    where
        F: FnOnce(&mut EventLoop),
    {
        self.assert_owner();
        f(self);
    }

    /// Register a connection's source, with an idle timeout when
    /// `timeout_ms > 0`.
    pub fn register(&mut self, conn: &SharedConnection, timeout_ms: u64) {
        self.assert_owner();
        let src = conn.source();
        self.poller.register(&src, Some(conn), timeout_ms);
    }

    /// Register a bare source with no connection and no timer (wakeup
    /// channels, listening sockets).
    pub fn register_source(&mut self, src: &SharedSource) {
        self.assert_owner();
        self.poller.register(src, None, 0);
    }

    /// Re-apply a source's interest; refresh its connection's idle timer
    /// when `timeout_ms > 0`.
    pub fn update(&mut self, src: &SharedSource, timeout_ms: u64) {
        self.assert_owner();
        self.poller.modify(src, timeout_ms);
    }

    /// Drop a source from the poller. The handler layer calls this when a
    /// connection is done with its descriptor.
    pub fn remove(&mut self, src: &SharedSource) {
        self.assert_owner();
        self.poller.unregister(src);
    }

    fn drain_pending(&mut self) {
        self.handle.draining.store(true, Ordering::Release);
        // swap under the lock, run outside it: submitters stay unblocked
        // and anything they queue now lands in the next cycle's batch
        let tasks: Vec<Task> = {
            let mut pending = self.handle.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        for task in tasks {
            task(self);
        }
        self.handle.draining.store(false, Ordering::Release);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // dropping the wakeup source afterwards closes the eventfd
        self.poller.unregister(&self.wakeup_source);
        LOOP_ON_THREAD.with(|flag| flag.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[test]
    fn test_run_in_loop_is_inline() {
        let mut lp = EventLoop::new();
        let mut hit = false;
        lp.run_in_loop(|_| hit = true);
        assert!(hit);
    }

    #[test]
    #[should_panic(expected = "already owns an event loop")]
    fn test_second_loop_on_thread_panics() {
        let _a = EventLoop::new();
        let _b = EventLoop::new();
    }

    #[test]
    fn test_loop_slot_freed_on_drop() {
        let a = EventLoop::new();
        drop(a);
        let _b = EventLoop::new();
    }

    #[test]
    fn test_foreign_submit_wakes_blocked_wait() {
        let mut lp = EventLoop::new();
        let handle = lp.handle();
        let ran = Arc::new(AtomicUsize::new(0));

        let ran2 = ran.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let quitter = handle.clone();
            handle.submit(Box::new(move |_lp| {
                ran2.fetch_add(1, Ordering::SeqCst);
                quitter.quit();
            }));
        });

        let start = Instant::now();
        lp.run();
        // well under the 10s bounded wait: the submit signal got us out
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        t.join().unwrap();
    }

    #[test]
    fn test_wakeup_retriggers_across_cycles() {
        let mut lp = EventLoop::new();
        let handle = lp.handle();
        let ran = Arc::new(AtomicUsize::new(0));

        let ran2 = ran.clone();
        let t = thread::spawn(move || {
            for i in 0..3 {
                thread::sleep(Duration::from_millis(30));
                let ran = ran2.clone();
                let quitter = if i == 2 { Some(handle.clone()) } else { None };
                handle.submit(Box::new(move |_lp| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    if let Some(q) = quitter {
                        q.quit();
                    }
                }));
            }
        });

        let start = Instant::now();
        lp.run();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        t.join().unwrap();
    }

    #[test]
    fn test_remote_quit_bounds_shutdown_latency() {
        let mut lp = EventLoop::new();
        let handle = lp.handle();

        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.quit();
            // a second quit is harmless
            // (the loop may already be gone by the time it lands)
        });

        let start = Instant::now();
        lp.run();
        assert!(start.elapsed() < Duration::from_secs(5));
        t.join().unwrap();
    }
}
