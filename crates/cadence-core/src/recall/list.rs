//! Play and recall lists: running top-level recalls stage by stage.

use super::{Recall, RecallFlags};
use crate::error::Result;
use crate::recall_id::StagingFlags;
use std::sync::Arc;

/// One of the six phases of a tic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// `run_init_pre`
    InitPre,
    /// `run_init_inter`
    InitInter,
    /// `run_init_post`
    InitPost,
    /// `run_pre`
    Pre,
    /// `run_inter`
    Inter,
    /// `run_post`
    Post,
}

impl Stage {
    /// Every stage in tic order.
    pub const ALL: [Stage; 6] = [
        Stage::InitPre,
        Stage::InitInter,
        Stage::InitPost,
        Stage::Pre,
        Stage::Inter,
        Stage::Post,
    ];

    /// Hook name, for logs.
    pub fn name(self) -> &'static str {
        match self {
            Stage::InitPre => "run_init_pre",
            Stage::InitInter => "run_init_inter",
            Stage::InitPost => "run_init_post",
            Stage::Pre => "run_pre",
            Stage::Inter => "run_inter",
            Stage::Post => "run_post",
        }
    }

    /// Staging bit recorded on a [`RecallId`](crate::RecallId) once this stage ran.
    pub fn staging(self) -> StagingFlags {
        match self {
            Stage::InitPre => StagingFlags::INIT_PRE,
            Stage::InitInter => StagingFlags::INIT_INTER,
            Stage::InitPost => StagingFlags::INIT_POST,
            Stage::Pre => StagingFlags::RUN_PRE,
            Stage::Inter => StagingFlags::RUN_INTER,
            Stage::Post => StagingFlags::RUN_POST,
        }
    }

    /// Apply this stage to one recall tree.
    pub fn apply(self, recall: &Recall) -> Result<()> {
        match self {
            Stage::InitPre => recall.run_init_pre(),
            Stage::InitInter => recall.run_init_inter(),
            Stage::InitPost => recall.run_init_post(),
            Stage::Pre => recall.run_pre(),
            Stage::Inter => recall.run_inter(),
            Stage::Post => recall.run_post(),
        }
    }
}

/// Run `stage` over every list in order (play list before recall list).
///
/// Templates in the lists are skipped silently. A failing recall is logged
/// and abandoned; the others still run.
pub fn run_stage(lists: &[&[Arc<Recall>]], stage: Stage) {
    for list in lists {
        for recall in list.iter() {
            if recall.has_flags(RecallFlags::TEMPLATE) {
                continue;
            }
            if let Some(id) = recall.recall_id() {
                if stage == Stage::Pre {
                    id.unset_staging(
                        StagingFlags::RUN_PRE
                            .union(StagingFlags::RUN_INTER)
                            .union(StagingFlags::RUN_POST),
                    );
                }
                id.set_staging(stage.staging());
            }
            if let Err(err) = stage.apply(recall) {
                tracing::warn!(
                    recall = %recall.name(),
                    stage = stage.name(),
                    error = %err,
                    "recall failed, abandoning instance"
                );
                recall.set_flags(RecallFlags::ABANDONED);
                recall.unset_flags(RecallFlags::PERSISTENT);
                recall.done();
            }
        }
    }
}

/// Run all six stages over `lists`, stage-major.
pub fn run_tic(lists: &[&[Arc<Recall>]]) {
    for stage in Stage::ALL {
        run_stage(lists, stage);
    }
}

/// Remove finished recalls from `list` and from every tree in it.
///
/// Returns the removed recalls so the caller can hand them to the destroy
/// worker. Call only between tics.
pub fn collect_done(list: &mut Vec<Arc<Recall>>) -> Vec<Arc<Recall>> {
    let mut removed = Vec::new();
    for recall in list.iter() {
        removed.extend(recall.collect_done_children());
    }
    let (finished, keep): (Vec<_>, Vec<_>) = list.drain(..).partition(|r| r.is_done());
    *list = keep;
    for recall in &finished {
        recall.set_flags(RecallFlags::REMOVED);
        tracing::debug!(recall = %recall.name(), instance = recall.id(), "recall removed");
    }
    removed.extend(finished);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recall::{RecallBehavior, RecallKind};
    use crate::recall_id::RecallId;
    use crate::recycling_context::{RecyclingContext, SoundScope};
    use parking_lot::Mutex;

    struct Tag(&'static str, Arc<Mutex<Vec<String>>>);

    impl RecallBehavior for Tag {
        fn duplicate(&self) -> Box<dyn RecallBehavior> {
            Box::new(Tag(self.0, Arc::clone(&self.1)))
        }

        fn run_inter(&mut self, _recall: &Recall) -> Result<()> {
            self.1.lock().push(self.0.to_string());
            Ok(())
        }
    }

    struct Failing;

    impl RecallBehavior for Failing {
        fn duplicate(&self) -> Box<dyn RecallBehavior> {
            Box::new(Failing)
        }

        fn run_inter(&mut self, recall: &Recall) -> Result<()> {
            Err(crate::Error::MissingRecallId(recall.name().to_string()))
        }
    }

    fn run_id() -> Arc<RecallId> {
        RecallId::new(&RecyclingContext::new(SoundScope::Playback, 1))
    }

    #[test]
    fn test_play_list_runs_before_recall_list() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = run_id();
        let play = vec![
            Recall::builder("play", RecallKind::Channel)
                .behavior(Tag("play", Arc::clone(&log)))
                .build()
                .duplicate(&id),
        ];
        let recall = vec![
            Recall::builder("recall", RecallKind::Channel)
                .behavior(Tag("recall", Arc::clone(&log)))
                .build()
                .duplicate(&id),
        ];
        run_tic(&[&play, &recall]);
        assert_eq!(*log.lock(), vec!["play", "recall"]);
        assert!(id.check_staging(StagingFlags::RUN_POST));
    }

    #[test]
    fn test_templates_in_list_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let list = vec![
            Recall::builder("t", RecallKind::Audio)
                .behavior(Tag("t", Arc::clone(&log)))
                .build(),
        ];
        run_tic(&[&list]);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_failing_recall_abandoned_others_continue() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = run_id();
        let mut list = vec![
            Recall::builder("bad", RecallKind::Audio)
                .behavior(Failing)
                .build()
                .duplicate(&id),
            Recall::builder("good", RecallKind::Audio)
                .behavior(Tag("good", Arc::clone(&log)))
                .build()
                .duplicate(&id),
        ];
        run_tic(&[&list]);
        assert!(list[0].has_flags(RecallFlags::ABANDONED));
        assert_eq!(*log.lock(), vec!["good"]);

        let removed = collect_done(&mut list);
        assert_eq!(removed.len(), 1);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name(), "good");
    }
}
