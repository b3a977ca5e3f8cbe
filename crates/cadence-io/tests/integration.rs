//! Integration tests for cadence-io soundcards and WAV output.

use cadence_core::{AudioSignal, SampleBuffer, SampleFormat, SharedSignal};
use cadence_io::{
    OfflineSoundcard, Soundcard, WavFormat, interleave_lines, read_wav_info, read_wav_interleaved,
};
use tempfile::NamedTempFile;

const BUFFER: usize = 32;

fn line(value: f32) -> SharedSignal {
    let mut signal = AudioSignal::new(48000, BUFFER, SampleFormat::Float);
    signal.stream_resize(1);
    *signal.buffer_mut(0).unwrap() = SampleBuffer::Float(vec![value; BUFFER]);
    signal.into_shared()
}

// ---------------------------------------------------------------------------
// Offline rendering
// ---------------------------------------------------------------------------

#[test]
fn offline_render_to_s16_wav() {
    let lines = [line(0.5), line(-0.25)];
    let mut card = OfflineSoundcard::new(48000, BUFFER, 2, SampleFormat::Signed16);
    let mut out = vec![0.0; BUFFER * 2];

    for _ in 0..4 {
        interleave_lines(&lines, &mut out);
        card.play(&out).unwrap();
        card.tic().unwrap();
    }
    // lines were drained after the first tic
    assert_eq!(card.frames(), BUFFER * 4);
    assert!(card.samples()[BUFFER * 2..].iter().all(|&s| s == 0.0));

    let file = NamedTempFile::new().unwrap();
    card.write_wav(file.path()).unwrap();

    let info = read_wav_info(file.path()).unwrap();
    assert_eq!(info.channels, 2);
    assert_eq!(info.bits_per_sample, 16);
    assert_eq!(info.format, WavFormat::Pcm);
    assert_eq!(info.num_frames, (BUFFER * 4) as u64);

    let (samples, _) = read_wav_interleaved(file.path()).unwrap();
    assert!((samples[0] - 0.5).abs() < 1e-4);
    assert!((samples[1] + 0.25).abs() < 1e-4);
}

#[test]
fn offline_render_float_keeps_precision() {
    let mut card = OfflineSoundcard::new(44100, 4, 1, SampleFormat::Float);
    card.play(&[0.1, 0.2, 0.3, 0.4]).unwrap();

    let file = NamedTempFile::new().unwrap();
    card.write_wav(file.path()).unwrap();

    let (samples, spec) = read_wav_interleaved(file.path()).unwrap();
    assert_eq!(spec.sample_rate, 44100);
    assert_eq!(samples, [0.1, 0.2, 0.3, 0.4]);
}
