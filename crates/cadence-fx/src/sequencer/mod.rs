//! Step sequencing recalls.
//!
//! A sequencer run is a handful of recalls bound to each other by name
//! through [`RecallDependency`](cadence_core::RecallDependency):
//!
//! - [`FxDelay`] (audio) turns tics into steps, one every `sequencer-delay` tics
//! - [`FxCountBeats`] (audio, needs `delay`) counts steps and ends the run at the loop end
//! - [`FxCopyPattern`] (channel, needs both) starts a voice on every set [`Pattern`] step
//! - [`FxPlayNotation`] (audio, needs both) starts a voice for every [`Notation`] note
//!   beginning on the current notation step; run it under [`SoundScope::Notation`]
//!
//! Add the delay before count-beats: count-beats reads the step flag the
//! delay sets in the same `run_pre` stage. Channel recalls run after the
//! audio-level lists, so they see the counters of the current step.
//!
//! Started notes play through [`Voices`]: each gets its own audio signal in
//! the channel's recycling and a child recall id whose context nests under
//! the run's.

mod count_beats;
mod delay;
mod notation;
mod pattern;

pub use count_beats::FxCountBeats;
pub use delay::FxDelay;
pub use notation::{FxPlayNotation, Notation, NotationNote};
pub use pattern::{FxCopyPattern, Pattern, SharedPattern};

use crate::stream_sink::FxStreamSink;
use cadence_core::{
    AudioSignal, Channel, Note, Recall, RecallId, RecallTarget, RecyclingContext, SharedSignal,
    SoundScope,
};
use std::sync::Arc;

/// 256th notes per sequencer step (one sixteenth).
pub const STEP_256TH: u64 = 16;

/// What a started note plays through.
///
/// `players` are audio-signal templates (synths) duplicated per note onto the
/// note's signal. When a bus is registered for the channel's line, a stream
/// sink mixes the note into it; the channel-level `effects` are duplicated
/// for the note as children of that sink, so they process the note's buffer
/// before it is mixed and finish with it.
#[derive(Debug, Clone)]
pub struct Voices {
    players: Vec<Arc<Recall>>,
    effects: Vec<Arc<Recall>>,
    buses: Vec<SharedSignal>,
    sink: Arc<Recall>,
}

impl Default for Voices {
    fn default() -> Self {
        Self::new()
    }
}

impl Voices {
    /// No players, no buses.
    pub fn new() -> Self {
        Self {
            players: Vec::new(),
            effects: Vec::new(),
            buses: Vec::new(),
            sink: FxStreamSink::template(false),
        }
    }

    /// Add a player template.
    pub fn with_player(mut self, template: Arc<Recall>) -> Self {
        self.players.push(template);
        self
    }

    /// Add a channel-level effect template, applied in insertion order.
    pub fn with_effect(mut self, template: Arc<Recall>) -> Self {
        self.effects.push(template);
        self
    }

    /// Add the bus of the next output line.
    pub fn with_bus(mut self, bus: SharedSignal) -> Self {
        self.buses.push(bus);
        self
    }

    /// Bus of output line `line`.
    pub fn bus(&self, line: usize) -> Option<&SharedSignal> {
        self.buses.get(line)
    }

    /// Start `note` on `channel` for `buffers` tics.
    ///
    /// The players run from the channel's next list snapshot. Returns the note's signal,
    /// or `None` when the channel's recycling has no template to size it from.
    pub fn start(
        &self,
        channel: &Arc<Channel>,
        parent: &Arc<RecallId>,
        scope: SoundScope,
        note: Note,
        buffers: usize,
    ) -> Option<SharedSignal> {
        let recycling = channel.recycling();
        let Some(template) = recycling.template() else {
            tracing::debug!(line = channel.line(), "no template signal, note dropped");
            return None;
        };
        let (samplerate, buffer_size, format) = {
            let template = template.lock();
            (template.samplerate(), template.buffer_size(), template.format())
        };

        let context = RecyclingContext::new_child(parent.recycling_context(), scope, 1);
        context.replace(Some(Arc::clone(&recycling)), 0);
        let run = RecallId::new(&context);

        let mut signal = AudioSignal::new(samplerate, buffer_size, format)
            .with_recall_id(Arc::clone(&run))
            .with_note(note);
        signal.stream_resize(buffers.max(1));
        let signal = signal.into_shared();
        recycling.add_audio_signal(Arc::clone(&signal));

        for player in &self.players {
            channel.add_play(player.duplicate_with_target(
                &run,
                Some(RecallTarget::AudioSignal {
                    source: Arc::clone(&signal),
                    destination: None,
                }),
            ));
        }
        if let Some(bus) = self.bus(channel.line()) {
            let sink = self.sink.duplicate_with_target(
                &run,
                Some(RecallTarget::AudioSignal {
                    source: Arc::clone(&signal),
                    destination: Some(Arc::clone(bus)),
                }),
            );
            for effect in &self.effects {
                sink.add_child(effect.duplicate_with_target(
                    &run,
                    Some(RecallTarget::Channel(Arc::downgrade(channel))),
                ));
            }
            channel.add_recall(sink);
        }

        tracing::debug!(
            line = channel.line(),
            key = note.key,
            x0 = note.x0_256th,
            buffers,
            scope = scope.name(),
            "voice started"
        );
        Some(signal)
    }
}

/// Buffers covering `steps` steps of `delay` tics each.
pub fn buffers_for_steps(steps: f64, delay: f64) -> usize {
    (steps * delay).ceil().max(1.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm_synth::{FxFmSynth, Waveform};
    use crate::volume::FxVolume;
    use cadence_core::{Audio, ChannelKind, SampleFormat};

    fn bus() -> SharedSignal {
        let mut bus = AudioSignal::new(48000, 32, SampleFormat::Float);
        bus.stream_resize(1);
        bus.into_shared()
    }

    #[test]
    fn start_adds_signal_players_and_sink() {
        let audio = Audio::new("voices", 48000, 32, SampleFormat::Float);
        audio.set_audio_channels(1);
        audio.set_pads(ChannelKind::Output, 1);
        let channel = audio.channel(ChannelKind::Output, 0).unwrap();
        let voices = Voices::new()
            .with_player(FxFmSynth::template(Waveform::Sine))
            .with_effect(FxVolume::template(0.5))
            .with_bus(bus());
        let parent = RecallId::new(&RecyclingContext::new(SoundScope::Sequencer, 1));

        let signal = voices
            .start(&channel, &parent, SoundScope::Sequencer, Note::new(60, 100, 0, 16), 3)
            .unwrap();
        assert_eq!(signal.lock().length(), 3);
        assert_eq!(channel.play().len(), 1);
        assert_eq!(channel.recall().len(), 1);
        let effects = channel.recall()[0].children();
        assert_eq!(effects.len(), 1);
        assert!(Arc::ptr_eq(&effects[0].channel().unwrap(), &channel));

        let run = signal.lock().recall_id().cloned().unwrap();
        assert_eq!(run.sound_scope(), SoundScope::Sequencer);
        assert!(Arc::ptr_eq(
            &run.recycling_context().parent().unwrap(),
            parent.recycling_context()
        ));
        assert!(channel.recycling().find_by_recall_id(&run).is_some());
    }

    #[test]
    fn step_buffers_round_up() {
        assert_eq!(buffers_for_steps(1.0, 5.6), 6);
        assert_eq!(buffers_for_steps(2.0, 3.0), 6);
        assert_eq!(buffers_for_steps(0.0, 3.0), 1);
    }
}
