//! MIDI messages and their byte encoding.
//!
//! Two framings exist for the same messages:
//!
//! - [`Framing::Live`]: the wire protocol. Sysex runs from `F0` to `F7`,
//!   `F8..=FF` are one-byte realtime messages.
//! - [`Framing::File`]: inside an `MTrk` chunk. Sysex carries a
//!   variable-length size after `F0`, and `FF` introduces a meta event.
//!
//! Decoding honours running status: a data byte where a status byte is
//! expected reuses the last channel status. Sysex and meta events clear it.

use crate::error::{MidiError, Result};
use crate::varlen::{read_varlen, write_varlen};
use serde::{Deserialize, Serialize};

/// Where a byte stream comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Realtime wire bytes.
    Live,
    /// Track data of a standard MIDI file.
    File,
}

/// Meta event types (file framing only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaEvent {
    /// `FF 00 02 ss ss`
    SequenceNumber(u16),
    /// `FF 01..=0F len text`: text, copyright, track name, lyric, marker...
    Text {
        /// Meta type byte (0x01 to 0x0F).
        kind: u8,
        /// Raw text bytes.
        text: Vec<u8>,
    },
    /// `FF 2F 00`
    EndOfTrack,
    /// `FF 51 03 tt tt tt`: microseconds per quarter note.
    Tempo(u32),
    /// `FF 54 05 hr mn se fr ff`
    SmpteOffset {
        /// Hours, with the frame rate in bits 5-6.
        hours: u8,
        /// Minutes.
        minutes: u8,
        /// Seconds.
        seconds: u8,
        /// Frames.
        frames: u8,
        /// Hundredths of a frame.
        subframes: u8,
    },
    /// `FF 58 04 nn dd cc bb`
    TimeSignature {
        /// Numerator.
        numerator: u8,
        /// Denominator as a power of two.
        denominator: u8,
        /// MIDI clocks per metronome click.
        clocks_per_click: u8,
        /// Notated 32nd notes per quarter.
        notated_32nds: u8,
    },
    /// `FF 59 02 sf mi`
    KeySignature {
        /// Sharps (positive) or flats (negative).
        sharps: i8,
        /// Minor key.
        minor: bool,
    },
    /// `FF 7F len data`
    SequencerSpecific(Vec<u8>),
    /// Any other meta type, kept verbatim.
    Unknown {
        /// Meta type byte.
        kind: u8,
        /// Payload.
        data: Vec<u8>,
    },
}

/// One MIDI message. Channels are 0-based (0..=15).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiMessage {
    /// `8n kk vv`
    NoteOff {
        /// Channel.
        channel: u8,
        /// Key.
        key: u8,
        /// Release velocity.
        velocity: u8,
    },
    /// `9n kk vv`
    NoteOn {
        /// Channel.
        channel: u8,
        /// Key.
        key: u8,
        /// Velocity.
        velocity: u8,
    },
    /// `An kk pp`
    KeyPressure {
        /// Channel.
        channel: u8,
        /// Key.
        key: u8,
        /// Pressure.
        pressure: u8,
    },
    /// `Bn cc vv`
    ControlChange {
        /// Channel.
        channel: u8,
        /// Controller number.
        controller: u8,
        /// Value.
        value: u8,
    },
    /// `Cn pp`
    ProgramChange {
        /// Channel.
        channel: u8,
        /// Program number.
        program: u8,
    },
    /// `Dn pp`
    ChannelPressure {
        /// Channel.
        channel: u8,
        /// Pressure.
        pressure: u8,
    },
    /// `En ll mm`: 14-bit value, LSB first on the wire; 8192 is centre.
    PitchBend {
        /// Channel.
        channel: u8,
        /// Bend value (0..=16383).
        value: u16,
    },
    /// `F0 ... F7`; the payload excludes both framing bytes.
    SysEx(Vec<u8>),
    /// `F1 0t vvvv`
    QuarterFrame {
        /// Piece of the timecode (0..=7).
        message_type: u8,
        /// Nibble value.
        values: u8,
    },
    /// `F2 ll mm`: MIDI beats since song start.
    SongPosition(u16),
    /// `F3 ss`
    SongSelect(u8),
    /// `F6`
    TuneRequest,
    /// `F8..=FF` in live framing.
    Realtime(u8),
    /// `FF tt len data` in file framing.
    Meta(MetaEvent),
}

impl MidiMessage {
    /// Channel of a channel voice message.
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::KeyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Whether this message ends a note: note-off, or note-on with velocity 0.
    pub fn is_note_end(&self) -> bool {
        matches!(
            self,
            MidiMessage::NoteOff { .. } | MidiMessage::NoteOn { velocity: 0, .. }
        )
    }

    /// Append the encoded message to `out`.
    pub fn encode(&self, out: &mut Vec<u8>, framing: Framing) -> Result<()> {
        match self {
            MidiMessage::NoteOff { channel, key, velocity } => {
                out.extend([0x80 | (channel & 0x0F), key & 0x7F, velocity & 0x7F]);
            }
            MidiMessage::NoteOn { channel, key, velocity } => {
                out.extend([0x90 | (channel & 0x0F), key & 0x7F, velocity & 0x7F]);
            }
            MidiMessage::KeyPressure { channel, key, pressure } => {
                out.extend([0xA0 | (channel & 0x0F), key & 0x7F, pressure & 0x7F]);
            }
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => {
                out.extend([0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F]);
            }
            MidiMessage::ProgramChange { channel, program } => {
                out.extend([0xC0 | (channel & 0x0F), program & 0x7F]);
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                out.extend([0xD0 | (channel & 0x0F), pressure & 0x7F]);
            }
            MidiMessage::PitchBend { channel, value } => {
                let value = (*value).min(0x3FFF);
                out.extend([
                    0xE0 | (channel & 0x0F),
                    (value & 0x7F) as u8,
                    (value >> 7) as u8,
                ]);
            }
            MidiMessage::SysEx(data) => {
                out.push(0xF0);
                if framing == Framing::File {
                    write_varlen(len_u32(data.len() + 1)?, out)?;
                }
                out.extend(data.iter().map(|b| b & 0x7F));
                out.push(0xF7);
            }
            MidiMessage::QuarterFrame {
                message_type,
                values,
            } => {
                out.extend([0xF1, ((message_type & 0x07) << 4) | (values & 0x0F)]);
            }
            MidiMessage::SongPosition(position) => {
                let position = (*position).min(0x3FFF);
                out.extend([0xF2, (position & 0x7F) as u8, (position >> 7) as u8]);
            }
            MidiMessage::SongSelect(song) => out.extend([0xF3, song & 0x7F]),
            MidiMessage::TuneRequest => out.push(0xF6),
            MidiMessage::Realtime(status) => out.push(*status | 0xF8),
            MidiMessage::Meta(meta) => encode_meta(meta, out)?,
        }
        Ok(())
    }

    /// Encode into a fresh vector.
    pub fn to_bytes(&self, framing: Framing) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(3);
        self.encode(&mut out, framing)?;
        Ok(out)
    }

    /// Decode one message at `offset`. Returns it and the bytes consumed.
    ///
    /// `running` holds the running status between calls.
    pub fn decode(
        bytes: &[u8],
        offset: usize,
        running: &mut Option<u8>,
        framing: Framing,
    ) -> Result<(MidiMessage, usize)> {
        let first = byte_at(bytes, offset)?;
        let (status, data_start) = if first & 0x80 == 0 {
            let status = running.ok_or(MidiError::MissingRunningStatus { offset })?;
            (status, offset)
        } else {
            (first, offset + 1)
        };

        if status < 0xF0 {
            *running = Some(status);
            let channel = status & 0x0F;
            let d0 = data_byte(bytes, data_start)?;
            let message = match status & 0xF0 {
                0x80 => MidiMessage::NoteOff {
                    channel,
                    key: d0,
                    velocity: data_byte(bytes, data_start + 1)?,
                },
                0x90 => MidiMessage::NoteOn {
                    channel,
                    key: d0,
                    velocity: data_byte(bytes, data_start + 1)?,
                },
                0xA0 => MidiMessage::KeyPressure {
                    channel,
                    key: d0,
                    pressure: data_byte(bytes, data_start + 1)?,
                },
                0xB0 => MidiMessage::ControlChange {
                    channel,
                    controller: d0,
                    value: data_byte(bytes, data_start + 1)?,
                },
                0xC0 => MidiMessage::ProgramChange { channel, program: d0 },
                0xD0 => MidiMessage::ChannelPressure { channel, pressure: d0 },
                _ => MidiMessage::PitchBend {
                    channel,
                    value: u16::from(d0) | (u16::from(data_byte(bytes, data_start + 1)?) << 7),
                },
            };
            let data_len = if matches!(status & 0xF0, 0xC0 | 0xD0) { 1 } else { 2 };
            return Ok((message, data_start + data_len - offset));
        }

        match (status, framing) {
            (0xF0, Framing::Live) => {
                *running = None;
                let end = bytes[data_start..]
                    .iter()
                    .position(|&b| b == 0xF7)
                    .ok_or(MidiError::UnexpectedEof { offset: bytes.len() })?;
                let data = bytes[data_start..data_start + end].to_vec();
                Ok((MidiMessage::SysEx(data), 1 + end + 1))
            }
            (0xF0 | 0xF7, Framing::File) => {
                *running = None;
                let (len, n) = read_varlen(bytes, data_start)?;
                let start = data_start + n;
                let end = start + len as usize;
                let mut data = bytes
                    .get(start..end)
                    .ok_or(MidiError::UnexpectedEof { offset: bytes.len() })?
                    .to_vec();
                if data.last() == Some(&0xF7) {
                    data.pop();
                }
                Ok((MidiMessage::SysEx(data), end - offset))
            }
            (0xF1, _) => {
                *running = None;
                let v = data_byte(bytes, data_start)?;
                Ok((
                    MidiMessage::QuarterFrame {
                        message_type: (v >> 4) & 0x07,
                        values: v & 0x0F,
                    },
                    2,
                ))
            }
            (0xF2, _) => {
                *running = None;
                let lsb = u16::from(data_byte(bytes, data_start)?);
                let msb = u16::from(data_byte(bytes, data_start + 1)?);
                Ok((MidiMessage::SongPosition(lsb | (msb << 7)), 3))
            }
            (0xF3, _) => {
                *running = None;
                Ok((MidiMessage::SongSelect(data_byte(bytes, data_start)?), 2))
            }
            (0xF6, _) => {
                *running = None;
                Ok((MidiMessage::TuneRequest, 1))
            }
            (0xFF, Framing::File) => {
                *running = None;
                let kind = byte_at(bytes, data_start)?;
                let (len, n) = read_varlen(bytes, data_start + 1)?;
                let start = data_start + 1 + n;
                let end = start + len as usize;
                let data = bytes
                    .get(start..end)
                    .ok_or(MidiError::UnexpectedEof { offset: bytes.len() })?;
                Ok((MidiMessage::Meta(decode_meta(kind, data)), end - offset))
            }
            (0xF8..=0xFF, Framing::Live) if status != 0xF9 && status != 0xFD => {
                Ok((MidiMessage::Realtime(status), 1))
            }
            _ => Err(MidiError::InvalidStatus { status, offset }),
        }
    }
}

fn byte_at(bytes: &[u8], offset: usize) -> Result<u8> {
    bytes
        .get(offset)
        .copied()
        .ok_or(MidiError::UnexpectedEof { offset })
}

fn data_byte(bytes: &[u8], offset: usize) -> Result<u8> {
    let byte = byte_at(bytes, offset)?;
    if byte & 0x80 != 0 {
        return Err(MidiError::InvalidStatus {
            status: byte,
            offset,
        });
    }
    Ok(byte)
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| MidiError::VarlenOverflow(u32::MAX))
}

fn encode_meta(meta: &MetaEvent, out: &mut Vec<u8>) -> Result<()> {
    let (kind, data): (u8, Vec<u8>) = match meta {
        MetaEvent::SequenceNumber(n) => (0x00, n.to_be_bytes().to_vec()),
        MetaEvent::Text { kind, text } => (*kind, text.clone()),
        MetaEvent::EndOfTrack => (0x2F, Vec::new()),
        MetaEvent::Tempo(us) => (0x51, us.to_be_bytes()[1..].to_vec()),
        MetaEvent::SmpteOffset {
            hours,
            minutes,
            seconds,
            frames,
            subframes,
        } => (0x54, vec![*hours, *minutes, *seconds, *frames, *subframes]),
        MetaEvent::TimeSignature {
            numerator,
            denominator,
            clocks_per_click,
            notated_32nds,
        } => (
            0x58,
            vec![*numerator, *denominator, *clocks_per_click, *notated_32nds],
        ),
        MetaEvent::KeySignature { sharps, minor } => {
            (0x59, vec![sharps.to_be_bytes()[0], u8::from(*minor)])
        }
        MetaEvent::SequencerSpecific(data) => (0x7F, data.clone()),
        MetaEvent::Unknown { kind, data } => (*kind, data.clone()),
    };
    out.extend([0xFF, kind]);
    write_varlen(len_u32(data.len())?, out)?;
    out.extend(data);
    Ok(())
}

fn decode_meta(kind: u8, data: &[u8]) -> MetaEvent {
    match (kind, data) {
        (0x00, [hi, lo]) => MetaEvent::SequenceNumber(u16::from_be_bytes([*hi, *lo])),
        (0x01..=0x0F, text) => MetaEvent::Text {
            kind,
            text: text.to_vec(),
        },
        (0x2F, []) => MetaEvent::EndOfTrack,
        (0x51, [a, b, c]) => MetaEvent::Tempo(u32::from_be_bytes([0, *a, *b, *c])),
        (0x54, [hours, minutes, seconds, frames, subframes]) => MetaEvent::SmpteOffset {
            hours: *hours,
            minutes: *minutes,
            seconds: *seconds,
            frames: *frames,
            subframes: *subframes,
        },
        (0x58, [numerator, denominator, clocks_per_click, notated_32nds]) => {
            MetaEvent::TimeSignature {
                numerator: *numerator,
                denominator: *denominator,
                clocks_per_click: *clocks_per_click,
                notated_32nds: *notated_32nds,
            }
        }
        (0x59, [sf, mi]) => MetaEvent::KeySignature {
            sharps: i8::from_be_bytes([*sf]),
            minor: *mi != 0,
        },
        (0x7F, data) => MetaEvent::SequencerSpecific(data.to_vec()),
        _ => MetaEvent::Unknown {
            kind,
            data: data.to_vec(),
        },
    }
}
