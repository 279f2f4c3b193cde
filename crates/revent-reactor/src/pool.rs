//! # LoopPool - N worker threads, one EventLoop each
//!
//! The pool is driven from the thread that owns the base loop: that
//! thread starts the workers, and it alone calls `next()` to pick a
//! target loop for each new connection, cycling round-robin over a list
//! that is fixed once `start()` returns.
//!
//! `start()` blocks until every worker has published its handle, so a
//! caller can never get hold of a loop that is not yet running.

use std::cell::{Cell, RefCell};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use revent_core::rinfo;

use crate::event_loop::{EventLoop, LoopHandle};

pub struct LoopPool {
    base: Arc<LoopHandle>,
    num_loops: usize,
    loops: RefCell<Vec<Arc<LoopHandle>>>,
    threads: RefCell<Vec<JoinHandle<()>>>,
    next: Cell<usize>,
    started: Cell<bool>,
}

impl LoopPool {
    /// A pool fanning out from `base`. Zero workers is legal: `next()`
    /// then always answers with the base loop itself.
    pub fn new(base: Arc<LoopHandle>, num_loops: usize) -> Self {
        LoopPool {
            base,
            num_loops,
            loops: RefCell::new(Vec::new()),
            threads: RefCell::new(Vec::new()),
            next: Cell::new(0),
            started: Cell::new(false),
        }
    }

    fn assert_base_thread(&self) {
        assert_eq!(
            thread::current().id(),
            self.base.owner(),
            "loop pool driven from a thread that does not own the base loop"
        );
    }

    /// Spawn the worker threads and wait until each one's loop handle has
    /// been published. Starting twice is an integration error.
    pub fn start(&self) {
        self.assert_base_thread();
        assert!(!self.started.get(), "loop pool already started");
        self.started.set(true);

        type Slots = (Mutex<Vec<Option<Arc<LoopHandle>>>>, Condvar);
        let published: Arc<Slots> = Arc::new((Mutex::new(vec![None; self.num_loops]), Condvar::new()));

        for i in 0..self.num_loops {
            let published = published.clone();
            let handle = thread::Builder::new()
                .name(format!("revent-loop-{}", i))
                .spawn(move || {
                    let mut lp = EventLoop::new();
                    {
                        let (slots, cond) = &*published;
                        slots.lock().unwrap()[i] = Some(lp.handle());
                        cond.notify_one();
                    }
                    lp.run();
                })
                .expect("failed to spawn loop thread");
            self.threads.borrow_mut().push(handle);
        }

        let (slots, cond) = &*published;
        let mut filled = slots.lock().unwrap();
        while filled.iter().any(|slot| slot.is_none()) {
            filled = cond.wait(filled).unwrap();
        }
        *self.loops.borrow_mut() = filled.iter().map(|slot| slot.clone().unwrap()).collect();

        rinfo!("revent-pool: {} worker loops running", self.num_loops);
    }

    /// The next loop in strict round-robin order; the base loop when the
    /// pool has no workers. Only the base loop's thread may ask, since
    /// the cursor is meant for the single acceptor.
    pub fn next(&self) -> Arc<LoopHandle> {
        self.assert_base_thread();
        assert!(self.started.get(), "loop pool not started");
        let loops = self.loops.borrow();
        if loops.is_empty() {
            return self.base.clone();
        }
        let i = self.next.get();
        self.next.set((i + 1) % loops.len());
        loops[i].clone()
    }

    /// Quit every worker loop and join the threads.
    pub fn stop(&self) {
        for handle in self.loops.borrow().iter() {
            handle.quit();
        }
        for t in self.threads.borrow_mut().drain(..) {
            let _ = t.join();
        }
    }

    #[inline]
    pub fn num_loops(&self) -> usize {
        self.num_loops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_visits_each_loop_twice() {
        let base = EventLoop::new();
        let pool = LoopPool::new(base.handle(), 3);
        pool.start();

        let picks: Vec<_> = (0..6).map(|_| pool.next()).collect();
        // wraps modulo 3, starting at index 0
        for i in 0..3 {
            assert!(Arc::ptr_eq(&picks[i], &picks[i + 3]));
        }
        assert!(!Arc::ptr_eq(&picks[0], &picks[1]));
        assert!(!Arc::ptr_eq(&picks[1], &picks[2]));
        assert!(!Arc::ptr_eq(&picks[0], &picks[2]));
        // workers, not the base
        for pick in &picks {
            assert!(!Arc::ptr_eq(pick, &base.handle()));
        }

        pool.stop();
    }

    #[test]
    fn test_empty_pool_returns_base() {
        let base = EventLoop::new();
        let pool = LoopPool::new(base.handle(), 0);
        pool.start();
        assert!(Arc::ptr_eq(&pool.next(), &base.handle()));
        assert!(Arc::ptr_eq(&pool.next(), &base.handle()));
        pool.stop();
    }

    #[test]
    #[should_panic(expected = "already started")]
    fn test_double_start_panics() {
        let base = EventLoop::new();
        let pool = LoopPool::new(base.handle(), 0);
        pool.start();
        pool.start();
    }

    #[test]
    fn test_submitted_tasks_run_on_worker_threads() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let base = EventLoop::new();
        let pool = LoopPool::new(base.handle(), 2);
        pool.start();

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let ran = ran.clone();
            pool.next().submit(Box::new(move |_lp| {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ran.load(Ordering::SeqCst) < 4 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 4);
        pool.stop();
    }
}
