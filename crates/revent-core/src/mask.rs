//! Interest/readiness bitset
//!
//! A source's interest mask says which conditions it wants reported; the
//! readiness mask says which conditions the poller observed. Both are the
//! same bitset type. The bits here are revent's own - translation to and
//! from the OS multiplexer's constants happens inside the poller backend,
//! so this crate stays platform-agnostic.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Bitwise-OR combination of readiness conditions.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventMask(u32);

impl EventMask {
    /// Data available for reading.
    pub const READABLE: EventMask = EventMask(1 << 0);
    /// Writing would not block.
    pub const WRITABLE: EventMask = EventMask(1 << 1);
    /// Error condition on the descriptor.
    pub const ERROR: EventMask = EventMask(1 << 2);
    /// Peer closed both directions (or the descriptor hung up).
    pub const HANGUP: EventMask = EventMask(1 << 3);
    /// Peer closed its write side; reads may still drain buffered data.
    pub const READ_HANGUP: EventMask = EventMask(1 << 4);
    /// Urgent/priority data available.
    pub const PRIORITY: EventMask = EventMask(1 << 5);
    /// Edge-triggered registration: one notification per state transition.
    pub const EDGE: EventMask = EventMask(1 << 6);

    /// The empty mask.
    #[inline]
    pub const fn empty() -> Self {
        EventMask(0)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// At least one bit of `other` is set in `self`.
    #[inline]
    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: EventMask) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: EventMask) {
        self.0 &= !other.0;
    }

    /// Raw bit pattern (revent bits, not OS bits).
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        EventMask(bits)
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    #[inline]
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    #[inline]
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(EventMask, &str); 7] = [
            (EventMask::READABLE, "READABLE"),
            (EventMask::WRITABLE, "WRITABLE"),
            (EventMask::ERROR, "ERROR"),
            (EventMask::HANGUP, "HANGUP"),
            (EventMask::READ_HANGUP, "READ_HANGUP"),
            (EventMask::PRIORITY, "PRIORITY"),
            (EventMask::EDGE, "EDGE"),
        ];
        if self.is_empty() {
            return write!(f, "(empty)");
        }
        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let m = EventMask::empty();
        assert!(m.is_empty());
        assert!(!m.contains(EventMask::READABLE));
        assert!(!m.intersects(EventMask::READABLE | EventMask::WRITABLE));
    }

    #[test]
    fn test_or_and_contains() {
        let m = EventMask::READABLE | EventMask::EDGE;
        assert!(m.contains(EventMask::READABLE));
        assert!(m.contains(EventMask::EDGE));
        assert!(!m.contains(EventMask::READABLE | EventMask::WRITABLE));
        assert!(m.intersects(EventMask::READABLE | EventMask::WRITABLE));
    }

    #[test]
    fn test_insert_remove() {
        let mut m = EventMask::empty();
        m.insert(EventMask::WRITABLE);
        m |= EventMask::READABLE;
        assert!(m.contains(EventMask::READABLE | EventMask::WRITABLE));

        m.remove(EventMask::WRITABLE);
        assert!(!m.contains(EventMask::WRITABLE));
        assert!(m.contains(EventMask::READABLE));
    }

    #[test]
    fn test_bits_roundtrip() {
        let m = EventMask::READABLE | EventMask::HANGUP | EventMask::EDGE;
        assert_eq!(EventMask::from_bits(m.bits()), m);
    }

    #[test]
    fn test_debug_names() {
        let m = EventMask::READABLE | EventMask::WRITABLE;
        let s = format!("{:?}", m);
        assert!(s.contains("READABLE"));
        assert!(s.contains("WRITABLE"));
        assert_eq!(format!("{:?}", EventMask::empty()), "(empty)");
    }
}
