//! revent echo server
//!
//! Multi-threaded TCP echo on the revent reactor: one acceptor loop,
//! N worker loops, idle connections expired by the per-loop timer wheel.
//!
//! Usage:
//!     cargo build --release -p revent-echo
//!     ./target/release/revent-echo [port] [workers]
//!
//! Environment overrides (see ReactorConfig): REV_PORT, REV_NUM_WORKERS,
//! REV_MAX_FDS, REV_IDLE_TIMEOUT_MS, REV_LOG_LEVEL.
//!
//! Test with:
//!     echo "hello" | nc localhost 8888

use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::Arc;

use revent::{
    net, rdebug, rinfo, rwarn, signal, Acceptor, ConnFactory, Connection, EventLoop, EventMask,
    EventSource, LoopPool, ReactorConfig, SharedConnection, SharedSource, TimerHandle,
};

const READ_CHUNK: usize = 4096;

/// One echo connection: whatever comes in goes back out.
///
/// The source owns the descriptor; this object owns the source and the
/// outbound buffer. Any activity refreshes the idle timer through the
/// re-arm handler, so only genuinely silent connections expire.
struct EchoConn {
    fd: RawFd,
    source: SharedSource,
    out: RefCell<Vec<u8>>,
    timer: RefCell<Option<TimerHandle>>,
    closing: Cell<bool>,
    idle_timeout_ms: u64,
}

impl EchoConn {
    fn new(fd: RawFd, idle_timeout_ms: u64) -> SharedConnection {
        let source = EventSource::new(fd);
        source
            .borrow_mut()
            .set_interest(EventMask::READABLE | EventMask::EDGE);

        let conn = Rc::new(EchoConn {
            fd,
            source: source.clone(),
            out: RefCell::new(Vec::new()),
            timer: RefCell::new(None),
            closing: Cell::new(false),
            idle_timeout_ms,
        });

        let weak = Rc::downgrade(&conn);
        source.borrow_mut().set_read_handler(Rc::new(move |lp| {
            if let Some(c) = weak.upgrade() {
                c.handle_read(lp);
            }
        }));
        let weak = Rc::downgrade(&conn);
        source.borrow_mut().set_write_handler(Rc::new(move |_lp| {
            if let Some(c) = weak.upgrade() {
                c.handle_write();
            }
        }));
        let weak = Rc::downgrade(&conn);
        source.borrow_mut().set_error_handler(Rc::new(move |lp| {
            if let Some(c) = weak.upgrade() {
                c.handle_error(lp);
            }
        }));
        let weak = Rc::downgrade(&conn);
        source.borrow_mut().set_rearm_handler(Rc::new(move |lp| {
            if let Some(c) = weak.upgrade() {
                c.handle_rearm(lp);
            }
        }));

        conn
    }

    fn handle_read(&self, lp: &mut EventLoop) {
        if self.closing.get() {
            return;
        }
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = unsafe {
                libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, READ_CHUNK)
            };
            if n > 0 {
                self.out.borrow_mut().extend_from_slice(&buf[..n as usize]);
                continue;
            }
            if n == 0 {
                // peer closed
                self.teardown(lp);
                return;
            }
            let errno = unsafe { *libc::__errno_location() };
            if errno == libc::EAGAIN {
                break; // drained
            }
            if errno == libc::EINTR {
                continue;
            }
            rwarn!("revent-echo: read failed on descriptor {}: errno {}", self.fd, errno);
            self.teardown(lp);
            return;
        }
        self.flush_out();
    }

    fn handle_write(&self) {
        if self.closing.get() {
            return;
        }
        self.flush_out();
    }

    /// Push buffered bytes out, then pick the interest set for the next
    /// wait: always readable, writable only while bytes remain. The
    /// re-arm handler applies whatever is picked here.
    fn flush_out(&self) {
        let mut out = self.out.borrow_mut();
        while !out.is_empty() {
            let n = unsafe {
                libc::write(self.fd, out.as_ptr() as *const libc::c_void, out.len())
            };
            if n > 0 {
                out.drain(..n as usize);
                continue;
            }
            let errno = unsafe { *libc::__errno_location() };
            if errno == libc::EAGAIN {
                break; // socket buffer full, wait for writable
            }
            if errno == libc::EINTR {
                continue;
            }
            rwarn!("revent-echo: write failed on descriptor {}: errno {}", self.fd, errno);
            out.clear();
            break;
        }
        let mut interest = EventMask::READABLE | EventMask::EDGE;
        if !out.is_empty() {
            interest |= EventMask::WRITABLE;
        }
        self.source.borrow_mut().set_interest(interest);
    }

    fn handle_error(&self, lp: &mut EventLoop) {
        rwarn!("revent-echo: error on descriptor {}", self.fd);
        self.teardown(lp);
    }

    fn handle_rearm(&self, lp: &mut EventLoop) {
        if self.closing.get() {
            return;
        }
        // re-apply interest and push the idle deadline out
        lp.update(&self.source, self.idle_timeout_ms);
    }

    fn teardown(&self, lp: &mut EventLoop) {
        if self.closing.replace(true) {
            return;
        }
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.cancel();
        }
        lp.remove(&self.source);
        // the last strong reference drops when the caller returns;
        // dropping the source then closes the descriptor
    }
}

impl Connection for EchoConn {
    fn source(&self) -> SharedSource {
        self.source.clone()
    }
    fn set_timer_handle(&self, handle: TimerHandle) {
        *self.timer.borrow_mut() = Some(handle);
    }
    fn take_timer_handle(&self) -> Option<TimerHandle> {
        self.timer.borrow_mut().take()
    }
}

impl Drop for EchoConn {
    fn drop(&mut self) {
        rdebug!("revent-echo: connection on descriptor {} closed", self.fd);
    }
}

fn main() {
    let mut cfg = ReactorConfig::from_env();
    let args: Vec<String> = std::env::args().collect();
    if let Some(port) = args.get(1).and_then(|a| a.parse().ok()) {
        cfg.port = port;
    }
    if let Some(workers) = args.get(2).and_then(|a| a.parse().ok()) {
        cfg.num_workers = workers;
    }

    signal::ignore_sigpipe().expect("failed to ignore SIGPIPE");

    let mut base = EventLoop::new();
    let pool = Rc::new(LoopPool::new(base.handle(), cfg.num_workers));
    pool.start();

    let listen_fd = net::bind_listen(cfg.port)
        .unwrap_or_else(|e| panic!("bind to port {} failed: {}", cfg.port, e));

    let idle_timeout_ms = cfg.idle_timeout_ms;
    let factory: ConnFactory = Arc::new(move |_lp, fd| EchoConn::new(fd, idle_timeout_ms));
    let acceptor = Acceptor::new(
        listen_fd,
        pool.clone(),
        factory,
        cfg.idle_timeout_ms,
        cfg.max_fds,
    );
    acceptor.start(&mut base);

    rinfo!(
        "revent-echo: port {} with {} worker loops, idle timeout {} ms",
        cfg.port,
        cfg.num_workers,
        cfg.idle_timeout_ms
    );
    base.run();
    pool.stop();
}
