//! Thread flags and states.

/// Status bits of a [`ThreadNode`](crate::ThreadNode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadFlags(u32);

impl ThreadFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Arrived at the barrier of tic phase 0.
    pub const WAIT_0: Self = Self(1 << 0);
    /// Arrived at the barrier of tic phase 1.
    pub const WAIT_1: Self = Self(1 << 1);
    /// Arrived at the barrier of tic phase 2.
    pub const WAIT_2: Self = Self(1 << 2);
    /// Worker loop is live.
    pub const RUNNING: Self = Self(1 << 3);
    /// Started but not yet parked at its first barrier.
    pub const INITIAL_RUN: Self = Self(1 << 4);
    /// Arrived at the barrier of the current tic.
    pub const READY: Self = Self(1 << 5);
    /// Missed too many timelock windows; the tree no longer waits for it.
    pub const SKIPPED_BY_TIMELOCK: Self = Self(1 << 6);
    /// Skipped its run because a greedy lock is held elsewhere.
    pub const SKIP_NON_GREEDY: Self = Self(1 << 7);
    /// Suspend requested by an interrupt.
    pub const RECOVER_INTERRUPTED: Self = Self(1 << 8);
    /// Resume requested by an interrupt.
    pub const RESUME_INTERRUPTED: Self = Self(1 << 9);
    /// Inside a critical section of its routine.
    pub const LOCKED: Self = Self(1 << 10);

    /// Barrier bit for tic phase `tic` (taken modulo 3).
    pub const fn wait(tic: u8) -> Self {
        match tic % 3 {
            0 => Self::WAIT_0,
            1 => Self::WAIT_1,
            _ => Self::WAIT_2,
        }
    }

    /// All barrier bits.
    pub const fn wait_all() -> Self {
        Self(Self::WAIT_0.0 | Self::WAIT_1.0 | Self::WAIT_2.0)
    }

    /// Returns `true` if all bits in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if any bit in `other` is set in `self`.
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns the union of two flag sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

/// Life-cycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Not started, or stopped.
    Idle = 0,
    /// Parked at the barrier.
    Waiting = 1,
    /// Executing its routine.
    Running = 2,
    /// Suspended by an interrupt; arrives at barriers without running.
    Suspended = 3,
}

impl ThreadState {
    pub(crate) const fn from_u8(v: u8) -> Self {
        match v {
            1 => ThreadState::Waiting,
            2 => ThreadState::Running,
            3 => ThreadState::Suspended,
            _ => ThreadState::Idle,
        }
    }
}

/// Next tic phase: 0 → 1 → 2 → 0.
pub const fn next_tic(tic: u8) -> u8 {
    (tic + 1) % 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_bits_cycle() {
        assert_eq!(ThreadFlags::wait(0), ThreadFlags::WAIT_0);
        assert_eq!(ThreadFlags::wait(4), ThreadFlags::WAIT_1);
        assert!(ThreadFlags::wait_all().contains(ThreadFlags::WAIT_2));
        assert_eq!(next_tic(2), 0);
        assert_eq!(next_tic(0), 1);
    }

    #[test]
    fn state_from_u8() {
        for state in [
            ThreadState::Idle,
            ThreadState::Waiting,
            ThreadState::Running,
            ThreadState::Suspended,
        ] {
            assert_eq!(ThreadState::from_u8(state as u8), state);
        }
    }
}
