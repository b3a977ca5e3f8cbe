//! Audio I/O layer for cadence.
//!
//! This crate provides:
//!
//! - **Soundcards**: the [`Soundcard`] trait the engine plays into, with an
//!   [`OfflineSoundcard`] collecting PCM for rendering and a
//!   [`CpalSoundcard`] feeding a live device
//! - **Backends**: [`AudioBackend`](backend::AudioBackend) abstracts the
//!   platform audio API; [`CpalBackend`](cpal_backend::CpalBackend) is the default
//! - **Devices**: [`list_devices`] and [`default_device`]
//! - **WAV file I/O**: [`read_wav`], [`read_wav_interleaved`] and [`write_wav`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadence_core::SampleFormat;
//! use cadence_io::{OfflineSoundcard, Soundcard, WavSpec};
//!
//! let mut card = OfflineSoundcard::new(48000, 512, 2, SampleFormat::Signed16);
//! card.play(&interleaved)?;
//! card.tic()?;
//! card.write_wav("out.wav")?;
//! ```

pub mod backend;
pub mod cpal_backend;
mod devices;
mod soundcard;
mod wav;

pub use devices::{AudioDevice, default_device, list_devices};
pub use soundcard::{CpalSoundcard, OfflineSoundcard, Soundcard, interleave_lines};
pub use wav::{WavFormat, WavInfo, WavSpec, read_wav, read_wav_info, read_wav_interleaved, write_wav};

/// Error types for audio I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("No audio device available")]
    NoDevice,

    /// The requested sample format is not supported.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The requested audio device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A buffer handed to a soundcard does not match its layout.
    #[error("buffer of {len} samples is not a multiple of {channels} channels")]
    Layout {
        /// Samples in the buffer.
        len: usize,
        /// Channels of the soundcard.
        channels: usize,
    },

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
