//! Cadence MIDI - byte codec for MIDI streams and standard MIDI files
//!
//! # Core Abstractions
//!
//! - [`MidiMessage`] - Channel voice, system common, realtime and meta messages
//! - [`Framing`] - Live wire bytes versus `MTrk` track data
//! - [`Smf`], [`Header`], [`Track`] - Standard MIDI file chunks
//! - [`SeqEvent`] - Timestamped sequencer-style events
//! - [`read_varlen`], [`write_varlen`] - Variable-length quantities
//!
//! # Example
//!
//! ```rust
//! use cadence_midi::{Framing, MidiMessage, Smf, Track};
//!
//! let mut track = Track::default();
//! track.push(0, MidiMessage::NoteOn { channel: 0, key: 60, velocity: 100 });
//! track.push(96, MidiMessage::NoteOff { channel: 0, key: 60, velocity: 0 });
//!
//! let mut smf = Smf::new(0, 96);
//! smf.tracks.push(track);
//! let bytes = smf.to_bytes().unwrap();
//! assert_eq!(Smf::parse(&bytes).unwrap().tracks[0].events.len(), 3);
//! ```

pub mod error;
pub mod message;
pub mod seq;
pub mod smf;
pub mod varlen;

pub use error::{MidiError, Result};
pub use message::{Framing, MetaEvent, MidiMessage};
pub use seq::{SeqEvent, SeqEventKind, events_to_track, track_events};
pub use smf::{Header, Smf, Track, TrackEvent};
pub use varlen::{VARLEN_MAX, read_varlen, varlen_size, write_varlen};

/// Decode a buffer of live MIDI bytes, keeping running status across messages.
///
/// Decoding stops at the first malformed message; everything before it is
/// returned along with the error.
pub fn decode_live(bytes: &[u8]) -> (Vec<MidiMessage>, Option<MidiError>) {
    let mut messages = Vec::new();
    let mut running = None;
    let mut pos = 0;
    while pos < bytes.len() {
        match MidiMessage::decode(bytes, pos, &mut running, Framing::Live) {
            Ok((message, n)) => {
                messages.push(message);
                pos += n;
            }
            Err(err) => return (messages, Some(err)),
        }
    }
    (messages, None)
}
