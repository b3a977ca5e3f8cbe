//! Cadence Fx - effect and synthesis recalls
//!
//! Every unit comes in two layers: a plain `*Util` struct holding the DSP
//! state, usable on its own, and an `Fx*` recall behaviour that reads its
//! ports and applies the util to the signal of its run.
//!
//! - [`FxVolume`] - gain and mute
//! - [`FxEnvelope`] - attack/release ramps over a stream
//! - [`FxPeak`] - peak meter written to an output port
//! - [`FxLowPass`] / [`FxHighPass`] - RBJ biquads with coefficient glide
//! - [`FxEq10`] - ten octave-band peaking equalizer
//! - [`FxLfo`] - LFO amplitude modulation
//! - [`FxFmSynth`] - note-driven oscillator with LFO frequency modulation
//! - [`FxSf2Synth`] - pitched sample-table playback from an [`Sf2Bank`]
//! - [`FxStreamSink`] - mixes a stream into a bus and detects decaying tails
//! - [`FxPlugin`] - per-voice hosting of a [`PluginBackend`]
//!
//! The [`sequencer`] module adds recalls that start notes rather than
//! process them: [`FxDelay`], [`FxCountBeats`], [`FxCopyPattern`] and
//! [`FxPlayNotation`], wired to each other through named dependencies.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cadence_fx::{FxFmSynth, FxStreamSink, FxVolume, Waveform};
//!
//! channel.add_recall(FxVolume::template(0.8));
//! let synth = FxFmSynth::template(Waveform::Sine);
//! let sink = FxStreamSink::template(true);
//! // duplicate `synth` and `sink` per note, bound to the note's signal
//! ```

pub mod context;
pub mod envelope;
pub mod eq10;
pub mod error;
pub mod fm_synth;
pub mod iir_filter;
pub mod lfo;
pub mod peak;
pub mod plugin;
pub mod sequencer;
pub mod sf2_synth;
pub mod stream_sink;
pub mod volume;

pub(crate) mod signal;

// Re-export main types at crate root
pub use context::FxContext;
pub use envelope::{EnvelopeUtil, FxEnvelope};
pub use eq10::{EQ10_BANDS, Eq10Util, FxEq10};
pub use error::{FxError, Result};
pub use fm_synth::{FmSynthUtil, FxFmSynth, Waveform};
pub use iir_filter::{FilterType, FxFilter, FxHighPass, FxLowPass, IirFilterUtil};
pub use lfo::{FxLfo, LfoUtil};
pub use peak::{FxPeak, PeakUtil};
pub use plugin::{
    FxPlugin, MAX_MIDI_KEYS, PluginBackend, PluginFactory, PluginHandle, PluginIo, PluginRegistry,
    PortBuffer,
};
pub use sequencer::{
    FxCopyPattern, FxCountBeats, FxDelay, FxPlayNotation, Notation, NotationNote, Pattern,
    SharedPattern, Voices,
};
pub use sf2_synth::{FxSf2Synth, Sf2Bank, Sf2Sample, Sf2SynthUtil};
pub use stream_sink::FxStreamSink;
pub use volume::{FxVolume, VolumeUtil};
