//! Leveled stderr logging for revent
//!
//! Thread-safe line-oriented logging with optional per-line flushing.
//!
//! # Environment Variables
//!
//! - `REV_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//! - `REV_FLUSH_EPRINT=1` - flush stderr after each line (debugging crashes)
//!
//! # Usage
//!
//! ```ignore
//! use revent_core::{rerror, rwarn, rinfo, rdebug, rtrace};
//!
//! rinfo!("loop {} started", id);
//! rwarn!("descriptor {} has no registry entry", fd);
//! rerror!("epoll_ctl add failed: errno {}", errno);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels, lowest to most verbose
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Level::Off,
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Level::Off => "",
            Level::Error => "[ERROR]",
            Level::Warn => "[WARN] ",
            Level::Info => "[INFO] ",
            Level::Debug => "[DEBUG]",
            Level::Trace => "[TRACE]",
        }
    }
}

static FLUSH: AtomicBool = AtomicBool::new(false);
static LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize from environment. Called automatically on first log.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    FLUSH.store(crate::env::env_get_bool("REV_FLUSH_EPRINT", false), Ordering::Relaxed);
    if let Ok(val) = std::env::var("REV_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => Level::Off,
            "error" | "1" => Level::Error,
            "warn" | "2" => Level::Warn,
            "info" | "3" => Level::Info,
            "debug" | "4" => Level::Debug,
            "trace" | "5" => Level::Trace,
            _ => Level::Info,
        };
        LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

/// Current log level
#[inline]
pub fn level() -> Level {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    Level::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Set the log level programmatically (tests, embedding applications)
pub fn set_level(level: Level) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Check whether a level would be printed
#[inline]
pub fn enabled(level: Level) -> bool {
    level as u8 <= self::level() as u8
}

/// Internal: leveled line write. The stderr lock keeps lines atomic.
#[doc(hidden)]
pub fn _rlog_impl(level: Level, args: std::fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.tag());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

/// Error level log
#[macro_export]
macro_rules! rerror {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::Level::Error, format_args!($($arg)*));
    }};
}

/// Warning level log
#[macro_export]
macro_rules! rwarn {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::Level::Warn, format_args!($($arg)*));
    }};
}

/// Info level log
#[macro_export]
macro_rules! rinfo {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::Level::Info, format_args!($($arg)*));
    }};
}

/// Debug level log
#[macro_export]
macro_rules! rdebug {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::Level::Debug, format_args!($($arg)*));
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! rtrace {
    ($($arg:tt)*) => {{
        $crate::rlog::_rlog_impl($crate::rlog::Level::Trace, format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn test_level_from_u8() {
        assert_eq!(Level::from_u8(0), Level::Off);
        assert_eq!(Level::from_u8(3), Level::Info);
        assert_eq!(Level::from_u8(200), Level::Trace);
    }

    #[test]
    fn test_macros_compile() {
        set_level(Level::Off); // suppress output during test
        rerror!("error {}", 1);
        rwarn!("warn");
        rinfo!("info {}", "x");
        rdebug!("debug");
        rtrace!("trace");
    }
}
