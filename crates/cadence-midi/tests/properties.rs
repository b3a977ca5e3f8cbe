//! Property-based tests for cadence-midi.
//!
//! The decoders must reject malformed input with an error, never a panic,
//! and must agree with the encoder on well-formed channel messages.

use cadence_midi::{Framing, MidiMessage, Smf, decode_live, read_varlen, write_varlen};
use proptest::prelude::*;

fn channel_message() -> impl Strategy<Value = MidiMessage> {
    (0u8..16, 0u8..128, 0u8..128, 0u16..16384, 0usize..7).prop_map(|(channel, a, b, bend, kind)| {
        match kind {
            0 => MidiMessage::NoteOff { channel, key: a, velocity: b },
            1 => MidiMessage::NoteOn { channel, key: a, velocity: b },
            2 => MidiMessage::KeyPressure { channel, key: a, pressure: b },
            3 => MidiMessage::ControlChange { channel, controller: a, value: b },
            4 => MidiMessage::ProgramChange { channel, program: a },
            5 => MidiMessage::ChannelPressure { channel, pressure: a },
            _ => MidiMessage::PitchBend { channel, value: bend },
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Arbitrary bytes never panic the live decoder.
    #[test]
    fn live_decoder_total(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = decode_live(&bytes);
    }

    /// Arbitrary bytes behind a valid header never panic the file parser.
    #[test]
    fn file_parser_total(body in prop::collection::vec(any::<u8>(), 0..128)) {
        let mut bytes = b"MThd\0\0\0\x06\0\0\0\x01\0\x60MTrk".to_vec();
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend(body);
        let _ = Smf::parse(&bytes);
    }

    /// Streams of channel messages decode back to the same sequence.
    #[test]
    fn channel_stream_decodes(messages in prop::collection::vec(channel_message(), 1..16)) {
        let mut bytes = Vec::new();
        for m in &messages {
            m.encode(&mut bytes, Framing::Live).unwrap();
        }
        let (decoded, err) = decode_live(&bytes);
        prop_assert!(err.is_none());
        prop_assert_eq!(decoded, messages);
    }

    /// Encoded quantities never exceed four bytes and read back whole.
    #[test]
    fn varlen_fits(value in 0u32..=0x0FFF_FFFF) {
        let mut out = Vec::new();
        write_varlen(value, &mut out).unwrap();
        prop_assert!(out.len() <= 4);
        prop_assert_eq!(read_varlen(&out, 0).unwrap(), (value, out.len()));
    }
}
