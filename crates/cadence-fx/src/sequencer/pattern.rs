//! Drum-machine patterns and the recall that plays them.

use super::{FxCountBeats, FxDelay, STEP_256TH, Voices, buffers_for_steps};
use crate::signal::{port_f64, port_u64};
use cadence_core::{
    Error, Note, Port, PortValue, Recall, RecallBehavior, RecallDependency, RecallKind, Result,
    SoundScope,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// A pattern shared between a task editing it and the recalls playing it.
pub type SharedPattern = Arc<Mutex<Pattern>>;

/// On/off steps addressed by two bank indices and a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    banks: (usize, usize),
    length: usize,
    bits: Vec<bool>,
}

impl Pattern {
    /// All steps off.
    pub fn new(bank_0: usize, bank_1: usize, length: usize) -> Self {
        Self {
            banks: (bank_0, bank_1),
            length,
            bits: vec![false; bank_0 * bank_1 * length],
        }
    }

    /// Single-bank pattern from a step string: `x` (or `X`) is on, anything else off.
    pub fn from_steps(steps: &str) -> Self {
        let bits: Vec<bool> = steps.chars().map(|c| c.eq_ignore_ascii_case(&'x')).collect();
        Self {
            banks: (1, 1),
            length: bits.len(),
            bits,
        }
    }

    /// Wrap for sharing.
    pub fn into_shared(self) -> SharedPattern {
        Arc::new(Mutex::new(self))
    }

    /// Bank dimensions.
    pub fn banks(&self) -> (usize, usize) {
        self.banks
    }

    /// Steps per bank.
    pub fn length(&self) -> usize {
        self.length
    }

    fn index(&self, i: usize, j: usize, step: usize) -> Option<usize> {
        (i < self.banks.0 && j < self.banks.1 && step < self.length)
            .then(|| (i * self.banks.1 + j) * self.length + step)
    }

    /// Whether the step is on; out of range reads as off.
    pub fn get(&self, i: usize, j: usize, step: usize) -> bool {
        self.index(i, j, step).is_some_and(|index| self.bits[index])
    }

    /// Set a step. Returns `false` when the address is out of range.
    pub fn set(&mut self, i: usize, j: usize, step: usize, on: bool) -> bool {
        match self.index(i, j, step) {
            Some(index) => {
                self.bits[index] = on;
                true
            }
            None => false,
        }
    }

    /// Flip a step. Returns the new state, `None` when out of range.
    pub fn toggle(&mut self, i: usize, j: usize, step: usize) -> Option<bool> {
        let index = self.index(i, j, step)?;
        self.bits[index] = !self.bits[index];
        Some(self.bits[index])
    }

    /// Change the steps per bank, keeping the steps that still fit.
    pub fn set_length(&mut self, length: usize) {
        let mut bits = vec![false; self.banks.0 * self.banks.1 * length];
        for bank in 0..self.banks.0 * self.banks.1 {
            for step in 0..self.length.min(length) {
                bits[bank * length + step] = self.bits[bank * self.length + step];
            }
        }
        self.bits = bits;
        self.length = length;
    }
}

/// Pattern player recall.
///
/// On every delay step it reads the bit at the count-beats sequencer step in
/// the selected bank and, when set, starts a one-step note of `key` on its
/// channel. It finishes together with count-beats.
#[derive(Debug, Clone)]
pub struct FxCopyPattern {
    pattern: SharedPattern,
    voices: Arc<Voices>,
}

impl FxCopyPattern {
    /// Port selecting the first bank index.
    pub const BANK_INDEX_0: &'static str = "bank-index-0";
    /// Port selecting the second bank index.
    pub const BANK_INDEX_1: &'static str = "bank-index-1";
    /// Port holding the MIDI key of started notes.
    pub const KEY: &'static str = "key";
    /// Port holding the velocity of started notes.
    pub const VELOCITY: &'static str = "velocity";

    /// Channel-level template playing `pattern` through `voices`.
    pub fn template(pattern: SharedPattern, voices: Arc<Voices>, key: u8) -> Arc<Recall> {
        Recall::builder("copy-pattern", RecallKind::Channel)
            .port(Port::new(Self::BANK_INDEX_0, PortValue::Uint(0)))
            .port(Port::new(Self::BANK_INDEX_1, PortValue::Uint(0)))
            .port(Port::new(Self::KEY, PortValue::Uint(u64::from(key))).with_range(0.0, 127.0))
            .port(Port::new(Self::VELOCITY, PortValue::Uint(127)).with_range(0.0, 127.0))
            .dependency(RecallDependency::required(FxDelay::NAME))
            .dependency(RecallDependency::required(FxCountBeats::NAME))
            .behavior(FxCopyPattern { pattern, voices })
            .build()
    }
}

impl RecallBehavior for FxCopyPattern {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(self.clone())
    }

    fn run_pre(&mut self, recall: &Recall) -> Result<()> {
        if recall
            .dependency(FxCountBeats::NAME)
            .is_none_or(|count_beats| count_beats.is_done())
        {
            recall.done();
        }
        Ok(())
    }

    fn run_inter(&mut self, recall: &Recall) -> Result<()> {
        let (Some(delay), Some(count_beats)) = (
            recall.dependency(FxDelay::NAME),
            recall.dependency(FxCountBeats::NAME),
        ) else {
            return Ok(());
        };
        if recall.is_done() || !FxDelay::is_step(&delay) {
            return Ok(());
        }

        let step = FxCountBeats::sequencer_step(&count_beats);
        let bank_0 = port_u64(recall, Self::BANK_INDEX_0, 0) as usize;
        let bank_1 = port_u64(recall, Self::BANK_INDEX_1, 0) as usize;
        if !self.pattern.lock().get(bank_0, bank_1, step as usize) {
            return Ok(());
        }

        let run = recall
            .recall_id()
            .ok_or_else(|| Error::MissingRecallId(recall.name().to_string()))?;
        let Some(channel) = recall.channel() else {
            return Ok(());
        };
        let key = port_u64(recall, Self::KEY, 60).min(127) as u8;
        let velocity = port_u64(recall, Self::VELOCITY, 127).min(127) as u8;
        let x0 = step * STEP_256TH;
        let buffers = buffers_for_steps(1.0, port_f64(&delay, FxDelay::DELAY, 1.0));
        self.voices.start(
            &channel,
            &run,
            SoundScope::Sequencer,
            Note::new(key, velocity, x0, x0 + STEP_256TH),
            buffers,
        );
        Ok(())
    }
}
