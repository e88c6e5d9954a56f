use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// The set of readiness kinds a registration wants to hear about.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

impl Interest {
    /// No readiness at all. The descriptor stays registered but silent.
    pub const NONE: Interest = Interest(0);
    /// Data can be read.
    pub const READ: Interest = Interest(0b001);
    /// Data can be written.
    pub const WRITE: Interest = Interest(0b010);
    /// A non-blocking connect finished. Reported as write readiness.
    pub const CONNECT: Interest = Interest(0b100);

    /// Union of two sets.
    pub const fn add(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    /// `self` without the kinds in `other`.
    pub const fn remove(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }

    /// Whether every kind in `other` is part of `self`.
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    /// True for WRITE and for CONNECT.
    pub const fn is_writable(self) -> bool {
        self.0 & (Self::WRITE.0 | Self::CONNECT.0) != 0
    }

    /// The OS-level interest, or `None` for the empty set.
    pub(crate) fn to_mio(self) -> Option<mio::Interest> {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        *self = self.add(rhs);
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Interest::READ) {
            names.push("READ");
        }
        if self.contains(Interest::WRITE) {
            names.push("WRITE");
        }
        if self.contains(Interest::CONNECT) {
            names.push("CONNECT");
        }
        if names.is_empty() {
            names.push("NONE");
        }
        f.write_str(&names.join(" | "))
    }
}

/// What the OS reported for a registration in one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    /// The peer shut down its write side (EOF is pending).
    pub read_closed: bool,
    pub write_closed: bool,
}

impl Readiness {
    pub(crate) fn from_event(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_maps_to_writable() {
        assert!(Interest::CONNECT.is_writable());
        assert!(!Interest::CONNECT.is_readable());
        assert_eq!(Interest::CONNECT.to_mio(), Some(mio::Interest::WRITABLE));
    }

    #[test]
    fn add_and_remove() {
        let mut interest = Interest::READ;
        interest |= Interest::WRITE;
        assert!(interest.contains(Interest::READ | Interest::WRITE));

        let interest = interest.remove(Interest::WRITE);
        assert_eq!(interest, Interest::READ);
        assert!(!interest.is_writable());
        assert!(interest.remove(Interest::READ).is_empty());
        assert_eq!(Interest::NONE.to_mio(), None);
    }

    #[test]
    fn debug_lists_kinds() {
        assert_eq!(format!("{:?}", Interest::READ | Interest::WRITE), "READ | WRITE");
        assert_eq!(format!("{:?}", Interest::NONE), "NONE");
    }
}
