//! # TimerWheel - lazily-deleted idle-connection timers
//!
//! One wheel per loop, touched only by that loop's thread, so no locking.
//!
//! Entries live in a min-heap ordered by deadline. Cancellation marks the
//! entry deleted in place and drops its connection reference; the entry is
//! physically removed only once it surfaces at the heap top. That keeps
//! cancellation O(1) and avoids arbitrary-position removal from a binary
//! heap, at the cost that a cancelled entry can occupy heap space for up
//! to one full timeout period. Deliberate trade-off, not a leak.
//!
//! A live entry holds a strong reference to its connection. A connection
//! that has been handed off to a loop is otherwise only referenced weakly
//! (registry) or not at all, so the pending timer entry is its owner of
//! last resort: popping the entry with no other owners left is what tears
//! the connection down.
//!
//! Deadlines are `Instant`s from the monotonic clock, which cannot wrap;
//! plain `<=` comparison is safe.
//!
//! # Complexity
//!
//! - add: O(log n)
//! - cancel: O(1)
//! - expire pass: O(k log n) for k popped entries

use std::cell::{Cell, RefCell};
use std::collections::BinaryHeap;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::conn::SharedConnection;

/// One pending expiration.
pub struct TimerNode {
    deadline: Instant,
    /// Insertion sequence, tie-breaks equal deadlines deterministically.
    seq: u64,
    deleted: Cell<bool>,
    conn: RefCell<Option<SharedConnection>>,
}

/// Weak handle a connection keeps so it can cancel its pending entry
/// without a heap search.
pub struct TimerHandle {
    node: Weak<TimerNode>,
}

impl TimerHandle {
    /// Mark the entry deleted and drop its connection reference.
    /// Returns false when the entry was already gone from the heap.
    pub fn cancel(&self) -> bool {
        match self.node.upgrade() {
            Some(node) => {
                node.deleted.set(true);
                node.conn.borrow_mut().take();
                true
            }
            None => false,
        }
    }
}

/// Heap adapter: min-heap by (deadline, seq).
struct HeapNode(Rc<TimerNode>);

impl PartialEq for HeapNode {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.seq == other.0.seq
    }
}

impl Eq for HeapNode {}

impl PartialOrd for HeapNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        match other.0.deadline.cmp(&self.0.deadline) {
            std::cmp::Ordering::Equal => other.0.seq.cmp(&self.0.seq),
            ord => ord,
        }
    }
}

/// Statistics snapshot for a wheel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerStats {
    /// Entries currently in the heap, deleted ones included.
    pub in_heap: usize,
    /// Entries popped because their deadline passed (lifetime).
    pub expired: u64,
    /// Deleted entries discarded from the heap top (lifetime).
    pub cancelled_discarded: u64,
}

/// Per-loop timer wheel.
pub struct TimerWheel {
    heap: BinaryHeap<HeapNode>,
    next_seq: u64,
    expired: u64,
    cancelled_discarded: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        TimerWheel {
            heap: BinaryHeap::new(),
            next_seq: 0,
            expired: 0,
            cancelled_discarded: 0,
        }
    }

    /// Schedule expiration for `conn` at now + `timeout_ms`.
    ///
    /// Any entry previously linked into the connection is cancelled first;
    /// refreshing a deadline is push-new-mark-old, never in-place mutation
    /// of a key already inside the heap.
    pub fn add(&mut self, conn: &SharedConnection, timeout_ms: u64) {
        if let Some(prev) = conn.take_timer_handle() {
            prev.cancel();
        }
        let node = Rc::new(TimerNode {
            deadline: Instant::now() + Duration::from_millis(timeout_ms),
            seq: self.next_seq,
            deleted: Cell::new(false),
            conn: RefCell::new(Some(conn.clone())),
        });
        self.next_seq += 1;
        conn.set_timer_handle(TimerHandle {
            node: Rc::downgrade(&node),
        });
        self.heap.push(HeapNode(node));
    }

    /// Pop deleted and expired entries off the heap top.
    ///
    /// Stops at the first live entry whose deadline has not passed; the
    /// rest of the heap is never visited. Returns the connections whose
    /// deadlines expired, strong references included, so the caller
    /// decides eviction before the references drop.
    pub fn expire_pass(&mut self) -> Vec<SharedConnection> {
        let now = Instant::now();
        let mut lapsed = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.0.deleted.get() {
                self.heap.pop();
                self.cancelled_discarded += 1;
                continue;
            }
            if top.0.deadline <= now {
                let node = self.heap.pop().unwrap();
                self.expired += 1;
                if let Some(conn) = node.0.conn.borrow_mut().take() {
                    lapsed.push(conn);
                }
                continue;
            }
            break;
        }
        lapsed
    }

    /// Entries currently in the heap, deleted ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn stats(&self) -> TimerStats {
        TimerStats {
            in_heap: self.heap.len(),
            expired: self.expired,
            cancelled_discarded: self.cancelled_discarded,
        }
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Connection;
    use crate::source::{EventSource, SharedSource};
    use std::thread;

    struct TestConn {
        source: SharedSource,
        timer: RefCell<Option<TimerHandle>>,
    }

    impl TestConn {
        fn new() -> SharedConnection {
            let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
            assert!(fd >= 0);
            Rc::new(TestConn {
                source: EventSource::new(fd),
                timer: RefCell::new(None),
            })
        }
    }

    impl Connection for TestConn {
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

    #[test]
    fn test_never_pops_before_deadline() {
        let mut wheel = TimerWheel::new();
        let conn = TestConn::new();
        wheel.add(&conn, 10_000);

        assert!(wheel.expire_pass().is_empty());
        assert_eq!(wheel.stats().expired, 0);
        assert_eq!(wheel.len(), 1);
        // the pending entry holds one of the two strong refs
        assert_eq!(Rc::strong_count(&conn), 2);
    }

    #[test]
    fn test_expired_entry_releases_connection() {
        let mut wheel = TimerWheel::new();
        let conn = TestConn::new();
        wheel.add(&conn, 10);

        thread::sleep(Duration::from_millis(30));
        let lapsed = wheel.expire_pass();
        assert_eq!(lapsed.len(), 1);
        assert!(Rc::ptr_eq(&lapsed[0], &conn));
        assert_eq!(wheel.stats().expired, 1);
        assert!(wheel.is_empty());

        // the wheel no longer owns it: refs are our local + the returned one
        drop(lapsed);
        assert_eq!(Rc::strong_count(&conn), 1);
    }

    #[test]
    fn test_cancel_drops_reference_immediately() {
        let mut wheel = TimerWheel::new();
        let conn = TestConn::new();
        wheel.add(&conn, 10_000);
        assert_eq!(Rc::strong_count(&conn), 2);

        assert!(conn.take_timer_handle().unwrap().cancel());
        // reference released at cancel time, entry still parked in the heap
        assert_eq!(Rc::strong_count(&conn), 1);
        assert_eq!(wheel.len(), 1);
    }

    #[test]
    fn test_cancelled_entry_discarded_at_top_without_scan() {
        let mut wheel = TimerWheel::new();
        let a = TestConn::new();
        let b = TestConn::new();
        wheel.add(&a, 50);
        wheel.add(&b, 60_000);

        // cancel the earliest entry; the pass discards it from the top and
        // stops at the live unexpired one without visiting further
        a.take_timer_handle().unwrap().cancel();
        assert!(wheel.expire_pass().is_empty());

        let stats = wheel.stats();
        assert_eq!(stats.cancelled_discarded, 1);
        assert_eq!(stats.expired, 0);
        assert_eq!(stats.in_heap, 1);
    }

    #[test]
    fn test_refresh_marks_prior_entry_deleted() {
        let mut wheel = TimerWheel::new();
        let conn = TestConn::new();
        wheel.add(&conn, 5);
        wheel.add(&conn, 60_000); // activity refresh

        // one strong ref per live entry, the refreshed-away one released
        assert_eq!(Rc::strong_count(&conn), 2);
        assert_eq!(wheel.len(), 2);

        thread::sleep(Duration::from_millis(20));
        // the stale entry is deleted, not expired; nothing closes
        assert!(wheel.expire_pass().is_empty());
        let stats = wheel.stats();
        assert_eq!(stats.cancelled_discarded, 1);
        assert_eq!(stats.expired, 0);
        assert_eq!(stats.in_heap, 1);
    }

    #[test]
    fn test_expiry_order_is_deadline_order() {
        let mut wheel = TimerWheel::new();
        let first = TestConn::new();
        let second = TestConn::new();
        // inserted out of order
        wheel.add(&second, 20);
        wheel.add(&first, 5);

        thread::sleep(Duration::from_millis(40));
        let lapsed = wheel.expire_pass();
        assert_eq!(lapsed.len(), 2);
        assert!(Rc::ptr_eq(&lapsed[0], &first));
        assert!(Rc::ptr_eq(&lapsed[1], &second));
    }

    #[test]
    fn test_cancel_after_pop_reports_gone() {
        let mut wheel = TimerWheel::new();
        let conn = TestConn::new();
        wheel.add(&conn, 5);
        let handle = conn.take_timer_handle().unwrap();

        thread::sleep(Duration::from_millis(20));
        wheel.expire_pass();
        assert!(!handle.cancel());
    }
}
