//! Per-run identity tokens.
//!
//! One [`RecallId`] exists per (recall template, recycling context) run. Every
//! duplicate created for that run holds the same `Arc<RecallId>`, so two
//! simultaneous notes get two ids and therefore two independent instances.

use crate::id::next_id;
use crate::recycling_context::{RecyclingContext, SoundScope};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Stage bits recorded on a [`RecallId`] as its run advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingFlags(u32);

impl StagingFlags {
    /// No stage reached.
    pub const NONE: Self = Self(0);
    /// `run_init_pre` finished.
    pub const INIT_PRE: Self = Self(1 << 0);
    /// `run_init_inter` finished.
    pub const INIT_INTER: Self = Self(1 << 1);
    /// `run_init_post` finished.
    pub const INIT_POST: Self = Self(1 << 2);
    /// `run_pre` finished for the current tic.
    pub const RUN_PRE: Self = Self(1 << 3);
    /// `run_inter` finished for the current tic.
    pub const RUN_INTER: Self = Self(1 << 4);
    /// `run_post` finished for the current tic.
    pub const RUN_POST: Self = Self(1 << 5);
    /// The run is done.
    pub const DONE: Self = Self(1 << 6);
    /// The run was cancelled.
    pub const CANCEL: Self = Self(1 << 7);

    /// Returns `true` if all bits in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of two flag sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Identity of one concurrent run.
#[derive(Debug)]
pub struct RecallId {
    id: u64,
    recycling_context: Arc<RecyclingContext>,
    staging: AtomicU32,
}

impl RecallId {
    /// Create a run identity bound to `recycling_context`.
    pub fn new(recycling_context: &Arc<RecyclingContext>) -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            recycling_context: Arc::clone(recycling_context),
            staging: AtomicU32::new(0),
        })
    }

    /// Identifier used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The context this run belongs to.
    pub fn recycling_context(&self) -> &Arc<RecyclingContext> {
        &self.recycling_context
    }

    /// Sound scope of the owning context.
    pub fn sound_scope(&self) -> SoundScope {
        self.recycling_context.sound_scope()
    }

    /// Whether every bit of `flags` is set.
    pub fn check_staging(&self, flags: StagingFlags) -> bool {
        StagingFlags(self.staging.load(Ordering::Acquire)).contains(flags)
    }

    /// Set staging bits.
    pub fn set_staging(&self, flags: StagingFlags) {
        self.staging.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clear staging bits.
    pub fn unset_staging(&self, flags: StagingFlags) {
        self.staging.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Current staging bits.
    pub fn staging(&self) -> StagingFlags {
        StagingFlags(self.staging.load(Ordering::Acquire))
    }

    /// Whether two ids refer to the same run scope.
    pub fn same_context(&self, other: &RecallId) -> bool {
        Arc::ptr_eq(&self.recycling_context, &other.recycling_context)
    }

    /// First id in `ids` bound to `context`.
    pub fn find_recycling_context(
        ids: &[Arc<RecallId>],
        context: &Arc<RecyclingContext>,
    ) -> Option<Arc<RecallId>> {
        ids.iter()
            .find(|id| Arc::ptr_eq(&id.recycling_context, context))
            .cloned()
    }

    /// First id in `ids` whose context's parent is `parent`.
    pub fn find_parent_recycling_context(
        ids: &[Arc<RecallId>],
        parent: &Arc<RecyclingContext>,
    ) -> Option<Arc<RecallId>> {
        ids.iter()
            .find(|id| {
                id.recycling_context
                    .parent()
                    .is_some_and(|p| Arc::ptr_eq(&p, parent))
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_flags() {
        let ctx = RecyclingContext::new(SoundScope::Playback, 1);
        let id = RecallId::new(&ctx);
        id.set_staging(StagingFlags::RUN_PRE.union(StagingFlags::RUN_INTER));
        assert!(id.check_staging(StagingFlags::RUN_PRE));
        id.unset_staging(StagingFlags::RUN_PRE);
        assert!(!id.check_staging(StagingFlags::RUN_PRE));
        assert!(id.check_staging(StagingFlags::RUN_INTER));
    }

    #[test]
    fn test_find_by_context() {
        let root = RecyclingContext::new(SoundScope::Sequencer, 1);
        let a = RecyclingContext::new_child(&root, SoundScope::Notation, 1);
        let b = RecyclingContext::new_child(&root, SoundScope::Notation, 1);
        let ids = vec![RecallId::new(&a), RecallId::new(&b)];
        let found = RecallId::find_recycling_context(&ids, &b).unwrap();
        assert!(Arc::ptr_eq(found.recycling_context(), &b));
        let by_parent = RecallId::find_parent_recycling_context(&ids, &root).unwrap();
        assert!(Arc::ptr_eq(by_parent.recycling_context(), &a));
    }

    #[test]
    fn test_sound_scope_from_context() {
        let ctx = RecyclingContext::new(SoundScope::Wave, 1);
        assert_eq!(RecallId::new(&ctx).sound_scope(), SoundScope::Wave);
    }
}
