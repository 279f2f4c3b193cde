//! OS readiness multiplexer
//!
//! Platform-specific backends live in submodules; the rest of the crate
//! only sees the `Poller` type they export.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod epoll;
        pub use epoll::Poller;
    } else {
        compile_error!("revent-reactor currently supports Linux (epoll) only");
    }
}
