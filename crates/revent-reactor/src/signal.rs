//! Process signal setup for servers
//!
//! A peer that resets a connection mid-write turns the next send into a
//! SIGPIPE, which kills the process by default. Servers ignore it and
//! handle the EPIPE errno at the write site instead.

use revent_core::error::{ReactorError, ReactorResult};

use nix::sys::signal::{signal, SigHandler, Signal};

/// Ignore SIGPIPE for the whole process. Call once before serving.
pub fn ignore_sigpipe() -> ReactorResult<()> {
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .map(|_| ())
        .map_err(|errno| ReactorError::Os(errno as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_sigpipe() {
        ignore_sigpipe().expect("sigpipe");
        // second call is fine too
        ignore_sigpipe().expect("sigpipe again");
    }
}
