//! Sequencer events: timestamped, unpacked MIDI in the style of a
//! sequencer API, converted to and from [`MidiMessage`]s.

use crate::message::{MetaEvent, MidiMessage};
use crate::smf::Track;
use serde::{Deserialize, Serialize};

/// Payload of a sequencer event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SeqEventKind {
    /// Key pressed.
    NoteOn {
        /// Key.
        note: u8,
        /// Velocity.
        velocity: u8,
    },
    /// Key released.
    NoteOff {
        /// Key.
        note: u8,
        /// Release velocity.
        velocity: u8,
    },
    /// Polyphonic aftertouch.
    KeyPressure {
        /// Key.
        note: u8,
        /// Pressure.
        value: u8,
    },
    /// Control change.
    Controller {
        /// Controller number.
        param: u8,
        /// Value.
        value: u8,
    },
    /// Program change.
    ProgramChange {
        /// Program.
        value: u8,
    },
    /// Channel aftertouch.
    ChannelPressure {
        /// Pressure.
        value: u8,
    },
    /// Pitch bend, signed around centre (-8192..=8191).
    PitchBend {
        /// Bend.
        value: i16,
    },
    /// System exclusive payload.
    SysEx {
        /// Bytes between `F0` and `F7`.
        data: Vec<u8>,
    },
    /// MTC quarter frame.
    QuarterFrame {
        /// Packed type and value byte.
        value: u8,
    },
    /// Song position pointer.
    SongPosition {
        /// MIDI beats.
        value: u16,
    },
    /// Song select.
    SongSelect {
        /// Song number.
        value: u8,
    },
    /// Tune request.
    TuneRequest,
    /// Tempo change in microseconds per quarter.
    Tempo {
        /// Microseconds per quarter note.
        value: u32,
    },
}

/// A sequencer event at an absolute tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqEvent {
    /// Absolute position in ticks.
    pub tick: u64,
    /// Channel (0-based); ignored by system events.
    pub channel: u8,
    /// Payload.
    pub kind: SeqEventKind,
}

impl SeqEvent {
    /// Convert a message at `tick`. Meta events other than tempo have no
    /// sequencer counterpart and yield `None`.
    pub fn from_message(tick: u64, message: &MidiMessage) -> Option<SeqEvent> {
        let channel = message.channel().unwrap_or(0);
        let kind = match message {
            MidiMessage::NoteOn { key, velocity, .. } => SeqEventKind::NoteOn {
                note: *key,
                velocity: *velocity,
            },
            MidiMessage::NoteOff { key, velocity, .. } => SeqEventKind::NoteOff {
                note: *key,
                velocity: *velocity,
            },
            MidiMessage::KeyPressure { key, pressure, .. } => SeqEventKind::KeyPressure {
                note: *key,
                value: *pressure,
            },
            MidiMessage::ControlChange {
                controller, value, ..
            } => SeqEventKind::Controller {
                param: *controller,
                value: *value,
            },
            MidiMessage::ProgramChange { program, .. } => {
                SeqEventKind::ProgramChange { value: *program }
            }
            MidiMessage::ChannelPressure { pressure, .. } => {
                SeqEventKind::ChannelPressure { value: *pressure }
            }
            MidiMessage::PitchBend { value, .. } => SeqEventKind::PitchBend {
                value: i16::try_from(*value).unwrap_or(i16::MAX) - 8192,
            },
            MidiMessage::SysEx(data) => SeqEventKind::SysEx { data: data.clone() },
            MidiMessage::QuarterFrame {
                message_type,
                values,
            } => SeqEventKind::QuarterFrame {
                value: (message_type << 4) | values,
            },
            MidiMessage::SongPosition(value) => SeqEventKind::SongPosition { value: *value },
            MidiMessage::SongSelect(value) => SeqEventKind::SongSelect { value: *value },
            MidiMessage::TuneRequest => SeqEventKind::TuneRequest,
            MidiMessage::Meta(MetaEvent::Tempo(value)) => SeqEventKind::Tempo { value: *value },
            MidiMessage::Meta(_) | MidiMessage::Realtime(_) => return None,
        };
        Some(SeqEvent {
            tick,
            channel,
            kind,
        })
    }

    /// The equivalent message.
    pub fn to_message(&self) -> MidiMessage {
        let channel = self.channel & 0x0F;
        match &self.kind {
            SeqEventKind::NoteOn { note, velocity } => MidiMessage::NoteOn {
                channel,
                key: *note,
                velocity: *velocity,
            },
            SeqEventKind::NoteOff { note, velocity } => MidiMessage::NoteOff {
                channel,
                key: *note,
                velocity: *velocity,
            },
            SeqEventKind::KeyPressure { note, value } => MidiMessage::KeyPressure {
                channel,
                key: *note,
                pressure: *value,
            },
            SeqEventKind::Controller { param, value } => MidiMessage::ControlChange {
                channel,
                controller: *param,
                value: *value,
            },
            SeqEventKind::ProgramChange { value } => MidiMessage::ProgramChange {
                channel,
                program: *value,
            },
            SeqEventKind::ChannelPressure { value } => MidiMessage::ChannelPressure {
                channel,
                pressure: *value,
            },
            SeqEventKind::PitchBend { value } => MidiMessage::PitchBend {
                channel,
                value: (i32::from(*value) + 8192).clamp(0, 0x3FFF) as u16,
            },
            SeqEventKind::SysEx { data } => MidiMessage::SysEx(data.clone()),
            SeqEventKind::QuarterFrame { value } => MidiMessage::QuarterFrame {
                message_type: (value >> 4) & 0x07,
                values: value & 0x0F,
            },
            SeqEventKind::SongPosition { value } => MidiMessage::SongPosition(*value),
            SeqEventKind::SongSelect { value } => MidiMessage::SongSelect(*value),
            SeqEventKind::TuneRequest => MidiMessage::TuneRequest,
            SeqEventKind::Tempo { value } => MidiMessage::Meta(MetaEvent::Tempo(*value)),
        }
    }
}

/// Sequencer events of a track, in tick order.
pub fn track_events(track: &Track) -> Vec<SeqEvent> {
    track
        .absolute()
        .filter_map(|(tick, message)| SeqEvent::from_message(tick, message))
        .collect()
}

/// Build a track from events sorted by tick.
pub fn events_to_track(events: &[SeqEvent]) -> Track {
    let mut track = Track::default();
    let mut last = 0u64;
    for event in events {
        let delta = event.tick.saturating_sub(last);
        last = last.max(event.tick);
        track.push(u32::try_from(delta).unwrap_or(u32::MAX), event.to_message());
    }
    track
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_bend_centre_is_zero() {
        let msg = MidiMessage::PitchBend {
            channel: 2,
            value: 8192,
        };
        let event = SeqEvent::from_message(0, &msg).unwrap();
        assert_eq!(event.kind, SeqEventKind::PitchBend { value: 0 });
        assert_eq!(event.channel, 2);
        assert_eq!(event.to_message(), msg);
    }

    #[test]
    fn meta_other_than_tempo_dropped() {
        assert!(SeqEvent::from_message(0, &MidiMessage::Meta(MetaEvent::EndOfTrack)).is_none());
        assert!(SeqEvent::from_message(0, &MidiMessage::Meta(MetaEvent::Tempo(1))).is_some());
    }

    #[test]
    fn track_conversion_keeps_ticks() {
        let events = vec![
            SeqEvent {
                tick: 0,
                channel: 0,
                kind: SeqEventKind::NoteOn {
                    note: 60,
                    velocity: 100,
                },
            },
            SeqEvent {
                tick: 96,
                channel: 0,
                kind: SeqEventKind::NoteOff {
                    note: 60,
                    velocity: 0,
                },
            },
        ];
        let track = events_to_track(&events);
        assert_eq!(track.events[1].delta, 96);
        assert_eq!(track_events(&track), events);
    }

    #[test]
    fn serde_tagged() {
        let event = SeqEvent {
            tick: 5,
            channel: 1,
            kind: SeqEventKind::Controller { param: 7, value: 100 },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"controller\""));
    }
}
