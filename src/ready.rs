//! Readiness bitset shared between the poller and every resource kind.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct Ready(u8);

impl Ready {
    pub const EMPTY: Ready = Ready(0);
    pub const READABLE: Ready = Ready(0b0001);
    pub const WRITABLE: Ready = Ready(0b0010);
    pub const ERROR: Ready = Ready(0b0100);
    pub const HUP: Ready = Ready(0b1000);

    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub fn is_error(self) -> bool {
        self.0 & Self::ERROR.0 != 0
    }

    pub fn is_hup(self) -> bool {
        self.0 & Self::HUP.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Ready) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn remove(self, other: Ready) -> Ready {
        Ready(self.0 & !other.0)
    }

    /// Error and hangup are must-have: every subscription implicitly asks
    /// for them regardless of what the caller requested.
    pub fn with_must_have(self) -> Ready {
        self | Ready::ERROR | Ready::HUP
    }
}

impl BitOr for Ready {
    type Output = Ready;
    fn bitor(self, rhs: Ready) -> Ready {
        Ready(self.0 | rhs.0)
    }
}

impl BitOrAssign for Ready {
    fn bitor_assign(&mut self, rhs: Ready) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Ready({}{}{}{})",
            if self.is_readable() { "r" } else { "-" },
            if self.is_writable() { "w" } else { "-" },
            if self.is_error() { "e" } else { "-" },
            if self.is_hup() { "h" } else { "-" },
        )
    }
}
