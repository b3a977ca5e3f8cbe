//! Cadence Core - audio graph and recall execution model
//!
//! This crate holds the entities a real-time audio engine clocks once per
//! tic, and the per-run processing units that act on them.
//!
//! # Core Abstractions
//!
//! ## Graph
//!
//! - [`Audio`] - A machine owning output and input lines, laid out pad-major
//! - [`Channel`] - One line; owns a [`Recycling`] and play/recall lists
//! - [`Recycling`] - An append-only voice slot of [`AudioSignal`]s
//! - [`AudioSignal`] - A stream of fixed-size [`SampleBuffer`]s with a forward cursor
//!
//! ## Runs
//!
//! - [`RecyclingContext`] - Scope token tree (playback, sequencer, notation, wave, midi)
//! - [`RecallId`] - Identity of one run inside a context
//! - [`Recall`] - Processing unit: a template, or an instance duplicated per run
//! - [`RecallBehavior`] - The hooks a recall variant implements
//!
//! ## Services
//!
//! - [`Port`] - Typed, lock-guarded control value shared across duplicates
//! - [`DestroyWorker`] - Drops finished items off the real-time path
//! - [`EngineContext`] - Defaults, destroy worker and control registry
//!
//! # Example
//!
//! ```rust
//! use cadence_core::{
//!     Audio, ChannelKind, Recall, RecallId, RecallKind, RecyclingContext, SampleFormat,
//!     SoundScope,
//! };
//!
//! let audio = Audio::new("drums", 48000, 256, SampleFormat::Float);
//! audio.set_audio_channels(2);
//! audio.set_pads(ChannelKind::Output, 1);
//! for channel in audio.channels(ChannelKind::Output) {
//!     channel.add_play(Recall::builder("play", RecallKind::Channel).build());
//! }
//!
//! let context = RecyclingContext::new(SoundScope::Playback, 2);
//! let run = RecallId::new(&context);
//! audio.duplicate_recall(&run);
//! audio.run_tic();
//! ```
//!
//! # Design Principles
//!
//! - **Templates are never run**: every run gets its own duplicates
//! - **Removal between tics only**: `done` flags, `collect_done` unlinks
//! - **No frees on the audio thread**: finished items go to the destroy worker

pub mod audio;
pub mod audio_signal;
pub mod channel;
pub mod context;
pub mod dispose;
pub mod error;
pub mod format;
pub mod id;
pub mod note;
pub mod port;
pub mod recall;
pub mod recall_id;
pub mod recycling;
pub mod recycling_context;

// Re-export main types at crate root
pub use audio::Audio;
pub use audio_signal::{AudioSignal, SharedSignal, SignalFlags};
pub use channel::{Channel, ChannelKind};
pub use context::{AudioConfig, EngineContext};
pub use dispose::DestroyWorker;
pub use error::{Error, Result};
pub use format::{Complex32, ParseFormatError, SampleBuffer, SampleFormat};
pub use note::{Note, NoteClock, TICKS_PER_QUARTER, key_frequency};
pub use port::{Port, PortValue};
pub use recall::{
    CancelAction, ContainerBehavior, Recall, RecallBehavior, RecallBuilder, RecallDependency,
    RecallEvent, RecallFlags, RecallKind, RecallTarget, Stage,
};
pub use recall_id::{RecallId, StagingFlags};
pub use recycling::Recycling;
pub use recycling_context::{RecyclingContext, SoundScope};
