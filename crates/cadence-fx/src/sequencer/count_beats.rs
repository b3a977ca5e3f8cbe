//! Step counting and loop handling.

use super::FxDelay;
use crate::signal::{port_bool, port_u64, set_port};
use cadence_core::{
    Port, PortValue, Recall, RecallBehavior, RecallDependency, RecallKind, Result, SoundScope,
};
use std::sync::Arc;

/// Beat counter recall.
///
/// On every delay step after the first it advances one counter: the
/// notation counter for notation runs, the sequencer counter otherwise.
/// Reaching the loop end wraps to zero when looping is on. Without looping
/// the run ends there: count-beats and its delay finish.
#[derive(Debug, Clone)]
pub struct FxCountBeats {
    first_step: bool,
}

impl Default for FxCountBeats {
    fn default() -> Self {
        Self { first_step: true }
    }
}

/// Ports of one counter.
struct Counter {
    counter: &'static str,
    looping: &'static str,
    loop_end: &'static str,
    default_end: u64,
}

impl FxCountBeats {
    /// Name dependents refer to.
    pub const NAME: &'static str = "count-beats";
    /// Port enabling the sequencer loop.
    pub const SEQUENCER_LOOP: &'static str = "sequencer-loop";
    /// Port holding the sequencer loop length in steps.
    pub const SEQUENCER_LOOP_END: &'static str = "sequencer-loop-end";
    /// Port enabling the notation loop.
    pub const NOTATION_LOOP: &'static str = "notation-loop";
    /// Port holding the notation loop length in steps.
    pub const NOTATION_LOOP_END: &'static str = "notation-loop-end";
    /// Per-instance sequencer step.
    pub const SEQUENCER_COUNTER: &'static str = "sequencer-counter";
    /// Per-instance notation step.
    pub const NOTATION_COUNTER: &'static str = "notation-counter";

    const SEQUENCER: Counter = Counter {
        counter: Self::SEQUENCER_COUNTER,
        looping: Self::SEQUENCER_LOOP,
        loop_end: Self::SEQUENCER_LOOP_END,
        default_end: 16,
    };
    const NOTATION: Counter = Counter {
        counter: Self::NOTATION_COUNTER,
        looping: Self::NOTATION_LOOP,
        loop_end: Self::NOTATION_LOOP_END,
        default_end: 64,
    };

    /// Audio-level template counting 16 sequencer and 64 notation steps.
    pub fn template(looping: bool) -> Arc<Recall> {
        Recall::builder(Self::NAME, RecallKind::Audio)
            .port(Port::new(Self::SEQUENCER_LOOP, PortValue::Bool(looping)))
            .port(Port::new(Self::SEQUENCER_LOOP_END, PortValue::Uint(16)).with_range(1.0, 65536.0))
            .port(Port::new(Self::NOTATION_LOOP, PortValue::Bool(looping)))
            .port(Port::new(Self::NOTATION_LOOP_END, PortValue::Uint(64)).with_range(1.0, 65536.0))
            .local_port(Port::new(Self::SEQUENCER_COUNTER, PortValue::Uint(0)))
            .local_port(Port::new(Self::NOTATION_COUNTER, PortValue::Uint(0)))
            .dependency(RecallDependency::required(FxDelay::NAME))
            .behavior(FxCountBeats::default())
            .build()
    }

    /// Current sequencer step of a count-beats instance.
    pub fn sequencer_step(count_beats: &Recall) -> u64 {
        port_u64(count_beats, Self::SEQUENCER_COUNTER, 0)
    }

    /// Current notation step of a count-beats instance.
    pub fn notation_step(count_beats: &Recall) -> u64 {
        port_u64(count_beats, Self::NOTATION_COUNTER, 0)
    }

    /// Advance `counter`; returns whether a non-looping counter ran out.
    fn advance(recall: &Recall, counter: &Counter) -> Result<bool> {
        let value = port_u64(recall, counter.counter, 0);
        let end = port_u64(recall, counter.loop_end, counter.default_end).max(1);
        if value + 1 < end {
            set_port(recall, counter.counter, PortValue::Uint(value + 1))?;
            return Ok(false);
        }
        set_port(recall, counter.counter, PortValue::Uint(0))?;
        Ok(!port_bool(recall, counter.looping))
    }
}

impl RecallBehavior for FxCountBeats {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxCountBeats::default())
    }

    fn run_pre(&mut self, recall: &Recall) -> Result<()> {
        let Some(delay) = recall.dependency(FxDelay::NAME) else {
            recall.done();
            return Ok(());
        };
        if !FxDelay::is_step(&delay) {
            return Ok(());
        }
        if self.first_step {
            self.first_step = false;
            return Ok(());
        }

        let counter = match recall.recall_id().map(|id| id.sound_scope()) {
            Some(SoundScope::Notation) => &Self::NOTATION,
            _ => &Self::SEQUENCER,
        };
        if Self::advance(recall, counter)? {
            tracing::debug!(counter = counter.counter, "loop end reached, run finished");
            recall.done();
            delay.done();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{RecallId, RecyclingContext};

    struct Run {
        delay: Arc<Recall>,
        count_beats: Arc<Recall>,
    }

    impl Run {
        fn new(scope: SoundScope, delay: f64, looping: bool, end: u64) -> Self {
            let id = RecallId::new(&RecyclingContext::new(scope, 1));
            let delay = FxDelay::template(delay).duplicate(&id);
            let count_beats = FxCountBeats::template(looping).duplicate(&id);
            for end_port in [FxCountBeats::SEQUENCER_LOOP_END, FxCountBeats::NOTATION_LOOP_END] {
                count_beats.port(end_port).unwrap().set(PortValue::Uint(end)).unwrap();
            }
            count_beats
                .resolve_dependencies(&[Arc::clone(&delay), Arc::clone(&count_beats)])
                .unwrap();
            Self { delay, count_beats }
        }

        fn tic(&self) {
            for recall in [&self.delay, &self.count_beats] {
                recall.run_tic().unwrap();
            }
        }
    }

    #[test]
    fn counts_one_per_step() {
        let run = Run::new(SoundScope::Sequencer, 2.0, true, 16);
        let mut seen = Vec::new();
        for _ in 0..8 {
            run.tic();
            seen.push(FxCountBeats::sequencer_step(&run.count_beats));
        }
        assert_eq!(seen, vec![0, 0, 1, 1, 2, 2, 3, 3]);
        assert_eq!(FxCountBeats::notation_step(&run.count_beats), 0);
    }

    #[test]
    fn looping_wraps_at_end() {
        let run = Run::new(SoundScope::Sequencer, 1.0, true, 3);
        let seen: Vec<u64> = (0..7)
            .map(|_| {
                run.tic();
                FxCountBeats::sequencer_step(&run.count_beats)
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
        assert!(!run.count_beats.is_done());
    }

    #[test]
    fn without_loop_run_ends_after_last_step() {
        let run = Run::new(SoundScope::Sequencer, 1.0, false, 4);
        for _ in 0..4 {
            run.tic();
            assert!(!run.count_beats.is_done());
        }
        assert_eq!(FxCountBeats::sequencer_step(&run.count_beats), 3);
        run.tic();
        assert!(run.count_beats.is_done());
        assert!(run.delay.is_done());
    }

    #[test]
    fn notation_runs_use_notation_counter() {
        let run = Run::new(SoundScope::Notation, 1.0, false, 8);
        for _ in 0..3 {
            run.tic();
        }
        assert_eq!(FxCountBeats::notation_step(&run.count_beats), 2);
        assert_eq!(FxCountBeats::sequencer_step(&run.count_beats), 0);
    }

    #[test]
    fn missing_delay_abandons_instance() {
        let id = RecallId::new(&RecyclingContext::new(SoundScope::Sequencer, 1));
        let count_beats = FxCountBeats::template(true).duplicate(&id);
        assert!(count_beats.resolve_dependencies(&[]).is_err());
        assert!(count_beats.is_done());
    }
}
