//! Piano-roll notation and the recall that plays it.

use super::{FxCountBeats, FxDelay, STEP_256TH, Voices, buffers_for_steps};
use crate::signal::{port_f64, port_u64};
use cadence_core::{
    ChannelKind, Error, Note, Port, PortValue, Recall, RecallBehavior, RecallDependency,
    RecallKind, Result, SoundScope,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// A note placed on one audio channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotationNote {
    /// Audio channel within the output pad.
    pub audio_channel: usize,
    /// The note.
    pub note: Note,
}

/// Notes of a piano roll, kept sorted by onset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notation {
    notes: Vec<NotationNote>,
}

impl Notation {
    /// Empty notation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `note` on `audio_channel`.
    pub fn add_note(&mut self, audio_channel: usize, note: Note) {
        let at = self.notes.partition_point(|n| n.note.x0_256th <= note.x0_256th);
        self.notes.insert(at, NotationNote { audio_channel, note });
    }

    /// Remove every note on `audio_channel` starting at `x0_256th` with `key`.
    pub fn remove_note(&mut self, audio_channel: usize, x0_256th: u64, key: u8) -> usize {
        let before = self.notes.len();
        self.notes.retain(|n| {
            !(n.audio_channel == audio_channel && n.note.x0_256th == x0_256th && n.note.key == key)
        });
        before - self.notes.len()
    }

    /// All notes in onset order.
    pub fn notes(&self) -> &[NotationNote] {
        &self.notes
    }

    /// Number of notes.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Whether there are no notes.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes whose onset falls within sequencer step `step`.
    pub fn starting_at(&self, step: u64) -> impl Iterator<Item = &NotationNote> {
        self.notes
            .iter()
            .filter(move |n| n.note.x0_256th / STEP_256TH == step)
    }

    /// Steps up to the end of the last note.
    pub fn length_in_steps(&self) -> u64 {
        self.notes
            .iter()
            .map(|n| n.note.x1_256th.div_ceil(STEP_256TH))
            .max()
            .unwrap_or(0)
    }
}

/// Notation player recall.
///
/// On every delay step it starts the notes beginning at the count-beats
/// notation step, each on the output channel of its audio channel in the
/// selected pad, lasting its duration in steps. It finishes together with
/// count-beats.
#[derive(Debug, Clone)]
pub struct FxPlayNotation {
    notation: Arc<Mutex<Notation>>,
    voices: Arc<Voices>,
}

impl FxPlayNotation {
    /// Port selecting the output pad notes start on.
    pub const PAD: &'static str = "pad";

    /// Audio-level template playing `notation` through `voices`.
    pub fn template(notation: Arc<Mutex<Notation>>, voices: Arc<Voices>) -> Arc<Recall> {
        Recall::builder("play-notation", RecallKind::Audio)
            .port(Port::new(Self::PAD, PortValue::Uint(0)))
            .dependency(RecallDependency::required(FxDelay::NAME))
            .dependency(RecallDependency::required(FxCountBeats::NAME))
            .behavior(FxPlayNotation { notation, voices })
            .build()
    }
}

impl RecallBehavior for FxPlayNotation {
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
        let Some(audio) = recall.audio() else {
            return Ok(());
        };
        let run = recall
            .recall_id()
            .ok_or_else(|| Error::MissingRecallId(recall.name().to_string()))?;

        let step = FxCountBeats::notation_step(&count_beats);
        let pad = port_u64(recall, Self::PAD, 0) as usize;
        let tics_per_step = port_f64(&delay, FxDelay::DELAY, 1.0);
        let starting: Vec<NotationNote> = self.notation.lock().starting_at(step).copied().collect();
        for entry in starting {
            let channel = match audio.channel_at(ChannelKind::Output, pad, entry.audio_channel) {
                Ok(channel) => channel,
                Err(err) => {
                    tracing::debug!(error = %err, key = entry.note.key, "note outside layout, skipped");
                    continue;
                }
            };
            let steps = entry.note.duration_256th() as f64 / STEP_256TH as f64;
            self.voices.start(
                &channel,
                &run,
                SoundScope::Notation,
                entry.note,
                buffers_for_steps(steps, tics_per_step),
            );
        }
        Ok(())
    }
}
