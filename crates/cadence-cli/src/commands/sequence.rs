//! Play a drum-machine pattern.
//!
//! One output line per audio channel, all playing the same pattern. The
//! audio carries the step clock (delay and count-beats) and every line a
//! copy-pattern recall. Steps that are on start a short synth note that
//! passes an optional EQ and a volume stage before it is mixed into the
//! line's bus.

use super::common::load_config;
use anyhow::Context;
use cadence_config::EngineConfig;
use cadence_core::{
    Audio, AudioSignal, ChannelKind, EngineContext, PortValue, RecallId, RecyclingContext,
    SampleFormat, SharedSignal, SoundScope,
};
use cadence_fx::{
    FxCopyPattern, FxCountBeats, FxDelay, FxEq10, FxFmSynth, FxVolume, Pattern, Voices, Waveform,
};
use cadence_io::{OfflineSoundcard, Soundcard, interleave_lines};
use cadence_thread::{AudioLoop, AudioRoutine};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args)]
pub struct SequenceArgs {
    /// Steps, one sixteenth each: `x` plays, anything else rests
    #[arg(short, long, default_value = "x...x...x...x.x.")]
    pattern: String,

    /// Tempo in beats per minute
    #[arg(long, default_value = "120.0")]
    bpm: f64,

    /// Times the pattern is played
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    repeat: u32,

    /// MIDI key of every note
    #[arg(long, default_value = "48", value_parser = clap::value_parser!(u8).range(0..128))]
    key: u8,

    /// Synth waveform (sine, saw, triangle, square, impulse)
    #[arg(long, default_value = "triangle")]
    waveform: Waveform,

    /// Gain of the 56 Hz band, applied through a ten band EQ
    #[arg(long)]
    bass: Option<f32>,

    /// Output gain
    #[arg(long, default_value = "0.8")]
    volume: f32,

    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    /// Engine config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Tics needed to play `steps` steps `repeat` times, plus one step to end the run.
fn total_tics(steps: usize, repeat: u32, delay: f64) -> u64 {
    ((steps as u64 * u64::from(repeat) + 1) as f64 * delay.ceil()) as u64
}

/// Build the machine for `pattern`. Returns it with its per-line buses.
fn build(
    config: &EngineConfig,
    pattern: Pattern,
    args: &SequenceArgs,
    delay: f64,
) -> anyhow::Result<(Arc<Audio>, Vec<SharedSignal>)> {
    let audio = Audio::new("sequence", config.samplerate, config.buffer_size, config.format);
    audio.set_audio_channels(config.audio_channels);
    audio.set_pads(ChannelKind::Output, 1);

    let buses: Vec<SharedSignal> = (0..config.audio_channels)
        .map(|_| {
            let mut bus = AudioSignal::new(config.samplerate, config.buffer_size, SampleFormat::Float);
            bus.stream_resize(1);
            bus.into_shared()
        })
        .collect();
    let mut voices = Voices::new().with_player(FxFmSynth::template(args.waveform));
    if let Some(bass) = args.bass {
        let eq = FxEq10::template();
        if let Some(port) = eq.port(FxEq10::PEAKS[1]) {
            port.set(PortValue::Float(bass))?;
        }
        voices = voices.with_effect(eq);
    }
    voices = voices.with_effect(FxVolume::template(args.volume));
    let voices = Arc::new(
        buses
            .iter()
            .fold(voices, |voices, bus| voices.with_bus(Arc::clone(bus))),
    );

    let steps = pattern.length().max(1) as u64;
    audio.add_recall(FxDelay::template(delay));
    let count_beats = FxCountBeats::template(false);
    if let Some(end) = count_beats.port(FxCountBeats::SEQUENCER_LOOP_END) {
        end.set(PortValue::Uint(steps))?;
    }
    audio.add_recall(count_beats);

    let pattern = pattern.into_shared();
    for channel in audio.channels(ChannelKind::Output) {
        channel.add_recall(FxCopyPattern::template(Arc::clone(&pattern), Arc::clone(&voices), args.key));
    }
    Ok((audio, buses))
}

pub fn run(args: SequenceArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let steps = args.pattern.chars().count();
    if steps == 0 {
        anyhow::bail!("Pattern must have at least one step");
    }
    if args.bpm <= 0.0 || !args.bpm.is_finite() {
        anyhow::bail!("Tempo must be positive, got {}", args.bpm);
    }

    // written out `repeat` times and played once
    let pattern = Pattern::from_steps(&args.pattern.repeat(args.repeat as usize));
    let delay = FxDelay::delay_for_bpm(args.bpm, config.samplerate, config.buffer_size);
    let (audio, buses) = build(&config, pattern, &args, delay)?;

    let engine = EngineContext::new(config.audio_config())?;
    let audio_loop = AudioLoop::new(
        config.tree_config(),
        AudioRoutine::new(Arc::clone(&audio), engine),
    );
    let run_id = RecallId::new(&RecyclingContext::new(SoundScope::Sequencer, buses.len()));
    audio.duplicate_recall(&run_id);

    let mut card = OfflineSoundcard::new(
        config.samplerate,
        config.buffer_size,
        config.audio_channels,
        config.format,
    );
    let mut interleaved = vec![0.0; config.buffer_size * buses.len()];
    let tics = total_tics(steps, args.repeat, delay);
    tracing::info!(steps, delay, tics, bpm = args.bpm, "sequencing");
    for _ in 0..tics {
        audio_loop.tic();
        interleave_lines(&buses, &mut interleaved);
        card.play(&interleaved)?;
        card.tic()?;
        for channel in audio.channels(ChannelKind::Output) {
            channel.recycling().remove_exhausted();
        }
    }
    audio_loop.shutdown();
    run_id.recycling_context().finish();

    card.write_wav(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!(
        "Wrote {} ({} steps x {}, {} frames)",
        args.output.display(),
        steps,
        args.repeat,
        card.frames()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pattern: &str) -> SequenceArgs {
        SequenceArgs {
            pattern: pattern.to_string(),
            bpm: 120.0,
            repeat: 1,
            key: 57,
            waveform: Waveform::Square,
            bass: Some(2.0),
            volume: 0.5,
            output: PathBuf::from("unused.wav"),
            config: None,
        }
    }

    #[test]
    fn tics_cover_every_step() {
        assert_eq!(total_tics(16, 1, 6.0), 102);
        assert_eq!(total_tics(4, 2, 2.5), 27);
    }

    #[test]
    fn pattern_renders_only_on_steps() {
        let config = EngineConfig {
            samplerate: 8000,
            buffer_size: 100,
            audio_channels: 1,
            format: SampleFormat::Float,
            ..EngineConfig::default()
        };
        let args = args("x.x.");
        // 120 bpm at 8000/100: 10 tics per step
        let delay = FxDelay::delay_for_bpm(args.bpm, config.samplerate, config.buffer_size);
        assert_eq!(delay, 10.0);
        let (audio, buses) = build(&config, Pattern::from_steps(&args.pattern), &args, delay).unwrap();
        audio.duplicate_recall(&RecallId::new(&RecyclingContext::new(SoundScope::Sequencer, 1)));

        let mut energy = Vec::new();
        let mut interleaved = vec![0.0; 100];
        for _ in 0..total_tics(4, 1, delay) {
            audio.run_tic();
            audio.collect_done();
            interleave_lines(&buses, &mut interleaved);
            energy.push(interleaved.iter().map(|s| s.abs()).sum::<f32>());
        }
        // notes start on steps 0 and 2 and sound from the following tic
        assert!(energy[1..11].iter().all(|e| *e > 0.0));
        assert!(energy[12..21].iter().all(|e| *e == 0.0));
        assert!(energy[21..31].iter().all(|e| *e > 0.0));
        assert!(energy[32..].iter().all(|e| *e == 0.0));
    }
}
