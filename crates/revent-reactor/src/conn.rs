//! Connection contract
//!
//! The reactor core never parses protocol bytes. A connection object is
//! anything that exposes one [`EventSource`](crate::source::EventSource)
//! with its handlers installed and accepts timer-handle linkage so the
//! owning loop's timer wheel can expire it when idle.
//!
//! Ownership rules:
//!
//! - the poller's source registry holds the EventSource strongly, never
//!   the connection;
//! - the poller's connection registry holds the connection weakly, for
//!   timer attachment only;
//! - a pending timer entry holds the connection strongly. For a handed-off
//!   connection this is the owner of last resort: when the entry is popped
//!   and nothing else holds the connection, the reactor evicts its
//!   descriptor and the connection's `Drop` runs.
//!
//! Release-on-close is therefore the implementor's `Drop`, not a trait
//! method. Teardown triggered by the handler layer goes through
//! [`EventLoop::remove`](crate::event_loop::EventLoop::remove) plus
//! cancelling the linked timer.

use std::rc::Rc;

use crate::source::SharedSource;
use crate::timer::TimerHandle;

/// A protocol-layer connection as seen by the reactor core.
pub trait Connection {
    /// The one event source this connection is driven by.
    fn source(&self) -> SharedSource;

    /// Retain a handle to the pending timer entry, replacing any prior one.
    /// The implementor needs interior mutability; timer linkage only ever
    /// happens on the owning loop's thread.
    fn set_timer_handle(&self, handle: TimerHandle);

    /// Give up the currently linked timer handle, if any.
    fn take_timer_handle(&self) -> Option<TimerHandle>;
}

/// Reference-counted connection, scoped to its owning loop's thread.
pub type SharedConnection = Rc<dyn Connection>;
