//! Tic to step clock.

use crate::signal::{port_f64, port_u64, set_port};
use cadence_core::{Port, PortValue, Recall, RecallBehavior, RecallKind, Result};
use std::sync::Arc;

/// Step clock recall.
///
/// Each `run_pre` marks the tic as a step when the counter is at zero, then
/// advances the counter, wrapping once `counter + 1` reaches the delay. The
/// first tic of a run is always a step. The delay never finishes on its own;
/// [`FxCountBeats`](super::FxCountBeats) ends it together with the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct FxDelay;

impl FxDelay {
    /// Name dependents refer to.
    pub const NAME: &'static str = "delay";
    /// Port holding the tics per step; fractional values round the wrap up.
    pub const DELAY: &'static str = "sequencer-delay";
    /// Per-instance tic counter within the current step.
    pub const COUNTER: &'static str = "delay-counter";
    /// Per-instance flag, set while the current tic starts a step.
    pub const STEP: &'static str = "delay-step";

    /// Audio-level template stepping every `delay` tics.
    pub fn template(delay: f64) -> Arc<Recall> {
        Recall::builder(Self::NAME, RecallKind::Audio)
            .port(Port::new(Self::DELAY, PortValue::Double(delay)).with_range(1.0, 65536.0))
            .local_port(Port::new(Self::COUNTER, PortValue::Uint(0)))
            .local_port(Port::new(Self::STEP, PortValue::Bool(false)))
            .behavior(FxDelay)
            .build()
    }

    /// Tics per sixteenth note at `bpm`.
    pub fn delay_for_bpm(bpm: f64, samplerate: u32, buffer_size: usize) -> f64 {
        let bpm = if bpm > 0.0 { bpm } else { 120.0 };
        f64::from(samplerate) * 60.0 / (bpm * 4.0 * buffer_size.max(1) as f64)
    }

    /// Whether the current tic of `delay` starts a step.
    pub fn is_step(delay: &Recall) -> bool {
        delay.port(Self::STEP).is_some_and(|port| port.get_bool())
    }
}

impl RecallBehavior for FxDelay {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxDelay)
    }

    fn run_pre(&mut self, recall: &Recall) -> Result<()> {
        let delay = port_f64(recall, Self::DELAY, 1.0);
        let counter = port_u64(recall, Self::COUNTER, 0);
        set_port(recall, Self::STEP, PortValue::Bool(counter == 0))?;
        let next = if (counter + 1) as f64 >= delay { 0 } else { counter + 1 };
        set_port(recall, Self::COUNTER, PortValue::Uint(next))
    }
}
