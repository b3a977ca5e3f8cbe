//! Lifecycle bits of a recall.

/// Lifecycle and role bits of a [`Recall`](super::Recall).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecallFlags(u32);

impl RecallFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Definition only; duplicated per run, never run itself.
    pub const TEMPLATE: Self = Self(1 << 0);
    /// Ignores `done` until persistence is stopped.
    pub const PERSISTENT: Self = Self(1 << 1);
    /// Marks the parent done once its last child is removed.
    pub const PROPAGATE_DONE: Self = Self(1 << 2);
    /// `run_init_post` has completed.
    pub const RUN_INITIALIZED: Self = Self(1 << 3);
    /// Set from `run_init_post` until the end of the first `run_post`.
    pub const INITIAL_RUN: Self = Self(1 << 4);
    /// The instance finished and waits for removal.
    pub const DONE: Self = Self(1 << 5);
    /// Cancellation was requested.
    pub const CANCEL: Self = Self(1 << 6);
    /// Cancellation was observed at a `run_pre`.
    pub const CANCEL_OBSERVED: Self = Self(1 << 7);
    /// Removed from its parent or list.
    pub const REMOVED: Self = Self(1 << 8);
    /// A required dependency could not be resolved.
    pub const ABANDONED: Self = Self(1 << 9);

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

    /// Returns `self` without the bits in `other`.
    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_difference() {
        let flags = RecallFlags::TEMPLATE.union(RecallFlags::PERSISTENT);
        assert!(flags.contains(RecallFlags::TEMPLATE));
        assert!(flags.intersects(RecallFlags::PERSISTENT.union(RecallFlags::DONE)));
        let cleared = flags.difference(RecallFlags::TEMPLATE);
        assert!(!cleared.contains(RecallFlags::TEMPLATE));
        assert!(cleared.contains(RecallFlags::PERSISTENT));
    }
}
