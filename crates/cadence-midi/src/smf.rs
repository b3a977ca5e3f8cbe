//! Standard MIDI files: the `MThd` header and `MTrk` chunks.

use crate::error::{MidiError, Result};
use crate::message::{Framing, MetaEvent, MidiMessage};
use crate::varlen::{read_varlen, write_varlen};
use std::path::Path;

/// Contents of the `MThd` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// 0 (single track), 1 (simultaneous tracks) or 2 (independent tracks).
    pub format: u16,
    /// Number of `MTrk` chunks.
    pub track_count: u16,
    /// Ticks per quarter note, or SMPTE timing when the high bit is set.
    pub division: u16,
}

impl Header {
    /// Byte size of an encoded header chunk.
    pub const SIZE: usize = 14;

    /// Append the header chunk.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(b"MThd");
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&self.format.to_be_bytes());
        out.extend_from_slice(&self.track_count.to_be_bytes());
        out.extend_from_slice(&self.division.to_be_bytes());
    }

    /// Decode a header chunk at the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Header> {
        let tag = chunk_tag(bytes, 0)?;
        if &tag != b"MThd" {
            return Err(MidiError::BadChunk {
                expected: "MThd",
                found: tag,
            });
        }
        let length = be_u32(bytes, 4)?;
        if length != 6 {
            return Err(MidiError::InvalidHeaderLength(length));
        }
        Ok(Header {
            format: be_u16(bytes, 8)?,
            track_count: be_u16(bytes, 10)?,
            division: be_u16(bytes, 12)?,
        })
    }

    /// Ticks per quarter note, when the division is metrical.
    pub fn ticks_per_quarter(&self) -> Option<u16> {
        (self.division & 0x8000 == 0).then_some(self.division)
    }
}

/// A message with its delta time in ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    /// Ticks since the previous event of the track.
    pub delta: u32,
    /// The message.
    pub message: MidiMessage,
}

/// One `MTrk` chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Track {
    /// Events in order.
    pub events: Vec<TrackEvent>,
}

impl Track {
    /// Append an event.
    pub fn push(&mut self, delta: u32, message: MidiMessage) {
        self.events.push(TrackEvent { delta, message });
    }

    /// Events paired with their absolute tick.
    pub fn absolute(&self) -> impl Iterator<Item = (u64, &MidiMessage)> {
        self.events.iter().scan(0u64, |tick, event| {
            *tick += u64::from(event.delta);
            Some((*tick, &event.message))
        })
    }

    /// Append the chunk, adding an end-of-track event if missing.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut body = Vec::new();
        for event in &self.events {
            write_varlen(event.delta, &mut body)?;
            event.message.encode(&mut body, Framing::File)?;
        }
        let terminated = self
            .events
            .last()
            .is_some_and(|e| e.message == MidiMessage::Meta(MetaEvent::EndOfTrack));
        if !terminated {
            write_varlen(0, &mut body)?;
            MidiMessage::Meta(MetaEvent::EndOfTrack).encode(&mut body, Framing::File)?;
        }
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend(body);
        Ok(())
    }

    /// Decode a track chunk at `offset`. Returns it and the bytes consumed.
    pub fn decode(bytes: &[u8], offset: usize) -> Result<(Track, usize)> {
        let tag = chunk_tag(bytes, offset)?;
        if &tag != b"MTrk" {
            return Err(MidiError::BadChunk {
                expected: "MTrk",
                found: tag,
            });
        }
        let length = be_u32(bytes, offset + 4)? as usize;
        let start = offset + 8;
        let end = start + length;
        let body = bytes
            .get(..end)
            .ok_or(MidiError::UnexpectedEof { offset: bytes.len() })?;

        let mut track = Track::default();
        let mut running = None;
        let mut pos = start;
        while pos < end {
            let (delta, n) = read_varlen(body, pos)?;
            pos += n;
            let (message, m) = MidiMessage::decode(body, pos, &mut running, Framing::File)?;
            pos += m;
            let last = message == MidiMessage::Meta(MetaEvent::EndOfTrack);
            track.push(delta, message);
            if last {
                break;
            }
        }
        Ok((track, end - offset))
    }
}

/// A whole standard MIDI file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smf {
    /// File header; `track_count` is kept in sync on encode.
    pub header: Header,
    /// Tracks in file order.
    pub tracks: Vec<Track>,
}

impl Smf {
    /// Empty file with metrical timing.
    pub fn new(format: u16, ticks_per_quarter: u16) -> Self {
        Self {
            header: Header {
                format,
                track_count: 0,
                division: ticks_per_quarter & 0x7FFF,
            },
            tracks: Vec::new(),
        }
    }

    /// Parse a complete file. Unknown chunks between tracks are skipped.
    pub fn parse(bytes: &[u8]) -> Result<Smf> {
        let header = Header::decode(bytes)?;
        let mut tracks = Vec::with_capacity(usize::from(header.track_count));
        let mut pos = Header::SIZE;
        while tracks.len() < usize::from(header.track_count) && pos < bytes.len() {
            let tag = chunk_tag(bytes, pos)?;
            if &tag == b"MTrk" {
                let (track, n) = Track::decode(bytes, pos)?;
                tracks.push(track);
                pos += n;
            } else {
                let length = be_u32(bytes, pos + 4)? as usize;
                tracing::debug!(chunk = ?tag, length, "skipping unknown chunk");
                pos += 8 + length;
            }
        }
        if tracks.len() < usize::from(header.track_count) {
            tracing::warn!(
                declared = header.track_count,
                found = tracks.len(),
                "file has fewer tracks than declared"
            );
        }
        Ok(Smf { header, tracks })
    }

    /// Encode the whole file.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        Header {
            track_count: self.tracks.len() as u16,
            ..self.header
        }
        .encode(&mut out);
        for track in &self.tracks {
            track.encode(&mut out)?;
        }
        Ok(out)
    }

    /// Read and parse a file.
    pub fn read(path: impl AsRef<Path>) -> Result<Smf> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| MidiError::read_file(path, e))?;
        let smf = Smf::parse(&bytes)?;
        tracing::debug!(path = %path.display(), tracks = smf.tracks.len(), "midi file read");
        Ok(smf)
    }

    /// Encode and write a file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| MidiError::write_file(path, e))
    }
}

fn chunk_tag(bytes: &[u8], offset: usize) -> Result<[u8; 4]> {
    bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(MidiError::UnexpectedEof { offset })
}

fn be_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    chunk_tag(bytes, offset).map(u32::from_be_bytes)
}

fn be_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|s| u16::from_be_bytes([s[0], s[1]]))
        .ok_or(MidiError::UnexpectedEof { offset })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes() {
        let mut out = Vec::new();
        Header {
            format: 1,
            track_count: 2,
            division: 96,
        }
        .encode(&mut out);
        assert_eq!(
            out,
            [b'M', b'T', b'h', b'd', 0, 0, 0, 6, 0, 1, 0, 2, 0, 96]
        );
        assert_eq!(Header::decode(&out).unwrap().ticks_per_quarter(), Some(96));
    }

    #[test]
    fn header_length_checked() {
        let bytes = [b'M', b'T', b'h', b'd', 0, 0, 0, 7, 0, 1, 0, 2, 0, 96];
        assert!(matches!(
            Header::decode(&bytes),
            Err(MidiError::InvalidHeaderLength(7))
        ));
    }

    #[test]
    fn wrong_tag_rejected() {
        assert!(matches!(
            Header::decode(b"RIFF\0\0\0\x06\0\0\0\x01\0\x60"),
            Err(MidiError::BadChunk { expected: "MThd", .. })
        ));
    }

    #[test]
    fn track_gets_end_of_track() {
        let mut track = Track::default();
        track.push(
            0,
            MidiMessage::NoteOn {
                channel: 0,
                key: 60,
                velocity: 100,
            },
        );
        let mut out = Vec::new();
        track.encode(&mut out).unwrap();
        assert_eq!(&out[8..], [0x00, 0x90, 60, 100, 0x00, 0xFF, 0x2F, 0x00]);

        let (decoded, used) = Track::decode(&out, 0).unwrap();
        assert_eq!(used, out.len());
        assert_eq!(decoded.events.len(), 2);
    }

    #[test]
    fn absolute_ticks() {
        let mut track = Track::default();
        track.push(10, MidiMessage::TuneRequest);
        track.push(5, MidiMessage::TuneRequest);
        let ticks: Vec<u64> = track.absolute().map(|(t, _)| t).collect();
        assert_eq!(ticks, [10, 15]);
    }

    #[test]
    fn unknown_chunks_skipped() {
        let mut smf = Smf::new(0, 480);
        smf.tracks.push(Track::default());
        let bytes = smf.to_bytes().unwrap();
        let mut patched = bytes[..Header::SIZE].to_vec();
        patched.extend_from_slice(b"XFIH\0\0\0\x02ab");
        patched.extend_from_slice(&bytes[Header::SIZE..]);
        let parsed = Smf::parse(&patched).unwrap();
        assert_eq!(parsed.tracks.len(), 1);
    }
}
