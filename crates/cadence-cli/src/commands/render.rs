//! Render notes through a synth chain.
//!
//! Every output line of one machine gets a volume stage and an optional
//! low-pass. Each note becomes one audio signal per line, played by a synth
//! instance and drained by a stream sink into that line's bus. The audio
//! loop clocks the machine; after every tic the buses are interleaved into
//! the soundcard.

use super::common::load_config;
use anyhow::Context;
use cadence_config::EngineConfig;
use cadence_core::{
    Audio, AudioSignal, ChannelKind, EngineContext, Note, Recall, RecallId, RecallTarget,
    RecyclingContext, SampleFormat, SharedSignal, SoundScope, TICKS_PER_QUARTER,
};
use cadence_fx::{
    FxContext, FxFmSynth, FxLowPass, FxStreamSink, FxVolume, Sf2Bank, Sf2Sample, Waveform,
};
use cadence_io::backend::BackendStreamConfig;
use cadence_io::cpal_backend::CpalBackend;
use cadence_io::{CpalSoundcard, OfflineSoundcard, Soundcard, interleave_lines, read_wav};
use cadence_thread::{AudioLoop, AudioRoutine, TicReport};
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Extra tics allowed after the notes end for tails and releases.
const TAIL_TICS: u64 = 64;

/// Bank name the render command registers its sample under.
const BANK_NAME: &str = "render";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SynthKind {
    /// FM oscillator
    Fm,
    /// Sample player
    Sf2,
}

#[derive(Args)]
pub struct RenderArgs {
    /// MIDI keys to play together, comma separated
    #[arg(long, value_delimiter = ',', default_value = "60", value_parser = clap::value_parser!(u8).range(0..128))]
    notes: Vec<u8>,

    /// Note length in seconds
    #[arg(short, long, default_value = "2.0")]
    duration: f64,

    /// Synth that plays the notes
    #[arg(long, value_enum, default_value = "fm")]
    synth: SynthKind,

    /// Carrier waveform for the FM synth (sine, saw, triangle, square, impulse)
    #[arg(long, default_value = "sine")]
    waveform: Waveform,

    /// WAV file for the sample player; a looped sine is used when omitted
    #[arg(long)]
    sample: Option<PathBuf>,

    /// Key the sample was recorded at
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u8).range(0..128))]
    root_key: u8,

    /// Low-pass cutoff in Hz
    #[arg(long)]
    cutoff: Option<f32>,

    /// Output gain
    #[arg(long, default_value = "0.8")]
    volume: f32,

    /// Note velocity
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u8).range(0..128))]
    velocity: u8,

    /// Tempo used to place notes on the 256th-note grid
    #[arg(long, default_value = "120.0")]
    bpm: f64,

    /// Output WAV file
    #[arg(short, long, required_unless_present = "live")]
    output: Option<PathBuf>,

    /// Play through the configured output device instead of a file
    #[arg(long)]
    live: bool,

    /// Engine config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Per-line effect settings.
#[derive(Debug, Clone, Copy)]
pub struct Chain {
    /// Volume stage gain.
    pub volume: f32,
    /// Low-pass cutoff; no filter when `None`.
    pub cutoff: Option<f32>,
}

/// Instances started for one note.
struct Voice {
    run: Arc<RecallId>,
    players: Vec<Arc<Recall>>,
    retired: bool,
}

impl Voice {
    fn is_finished(&self) -> bool {
        self.players.iter().all(|recall| recall.is_done())
    }
}

/// One machine, its audio loop and the per-line buses it renders into.
pub struct Renderer {
    audio: Arc<Audio>,
    fx: Arc<FxContext>,
    audio_loop: AudioLoop,
    lines: Vec<SharedSignal>,
    voices: Vec<Voice>,
    interleaved: Vec<f32>,
    tics: u64,
}

impl Renderer {
    /// Build the machine and its chain from `config`.
    pub fn new(config: &EngineConfig, chain: Chain) -> anyhow::Result<Self> {
        let engine = EngineContext::new(config.audio_config())?;
        let fx = FxContext::new(Arc::clone(&engine));

        let audio = Audio::new("render", config.samplerate, config.buffer_size, config.format);
        audio.set_audio_channels(config.audio_channels);
        audio.set_pads(ChannelKind::Output, 1);

        let mut lines = Vec::with_capacity(config.audio_channels);
        for channel in audio.channels(ChannelKind::Output) {
            channel.add_recall(FxVolume::template(chain.volume));
            if let Some(cutoff) = chain.cutoff {
                channel.add_recall(FxLowPass::template(cutoff));
            }
            let mut bus = AudioSignal::new(config.samplerate, config.buffer_size, SampleFormat::Float);
            bus.stream_resize(1);
            lines.push(bus.into_shared());
        }

        let audio_loop = AudioLoop::new(
            config.tree_config(),
            AudioRoutine::new(Arc::clone(&audio), engine),
        );
        tracing::info!(
            samplerate = config.samplerate,
            buffer_size = config.buffer_size,
            lines = lines.len(),
            format = %config.format,
            "renderer ready"
        );

        Ok(Self {
            interleaved: vec![0.0; config.buffer_size * lines.len()],
            audio,
            fx,
            audio_loop,
            lines,
            voices: Vec::new(),
            tics: 0,
        })
    }

    /// Effect context holding the sample banks.
    pub fn fx(&self) -> &Arc<FxContext> {
        &self.fx
    }

    /// Start `note` on every line with `synth`, lasting `buffers` tics.
    pub fn note_on(&mut self, synth: &Arc<Recall>, note: Note, buffers: usize) -> anyhow::Result<()> {
        let context = RecyclingContext::new(SoundScope::Playback, self.lines.len());
        let run = RecallId::new(&context);
        let mut players = Vec::new();

        for (line, bus) in self.lines.iter().enumerate() {
            let channel = self.audio.channel(ChannelKind::Output, line)?;
            let mut signal = AudioSignal::new(
                self.audio.samplerate(),
                self.audio.buffer_size(),
                self.audio.format(),
            )
            .with_recall_id(Arc::clone(&run))
            .with_note(note);
            signal.stream_resize(buffers);
            let signal = signal.into_shared();
            channel.recycling().add_audio_signal(Arc::clone(&signal));
            channel.duplicate_recall(&run);

            let player = synth.duplicate_with_target(
                &run,
                Some(RecallTarget::AudioSignal {
                    source: Arc::clone(&signal),
                    destination: None,
                }),
            );
            channel.add_play(Arc::clone(&player));
            let sink = FxStreamSink::template(true).duplicate_with_target(
                &run,
                Some(RecallTarget::AudioSignal {
                    source: signal,
                    destination: Some(Arc::clone(bus)),
                }),
            );
            channel.add_recall(Arc::clone(&sink));
            players.push(player);
            players.push(sink);
        }

        tracing::debug!(key = note.key, velocity = note.velocity, buffers, "note on");
        self.voices.push(Voice {
            run,
            players,
            retired: false,
        });
        Ok(())
    }

    /// Whether any note is still sounding.
    pub fn is_active(&self) -> bool {
        self.voices.iter().any(|voice| !voice.retired)
    }

    /// Tics run so far.
    pub fn tics(&self) -> u64 {
        self.tics
    }

    /// Run one tic and hand the mixed buffer to `card`.
    pub fn tic(&mut self, card: &mut dyn Soundcard) -> anyhow::Result<TicReport> {
        let report = self.audio_loop.tic();
        if self.audio_loop.hangcheck() {
            tracing::warn!(count = report.count, "renderer recovered from hang");
        }
        self.tics += 1;

        interleave_lines(&self.lines, &mut self.interleaved);
        card.play(&self.interleaved)?;
        card.tic()?;

        for voice in self.voices.iter_mut().filter(|v| !v.retired) {
            if voice.is_finished() {
                for channel in self.audio.channels(ChannelKind::Output) {
                    channel.cancel_recall(&voice.run);
                    channel.recycling().remove_exhausted();
                }
                voice.retired = true;
            }
        }
        Ok(report)
    }

    /// Stop the audio loop.
    pub fn shutdown(&self) {
        self.audio_loop.shutdown();
    }
}

/// Bank with one preset at bank 0, program 0.
///
/// Without a file the preset is one second of A4 looped end to end.
pub fn sample_bank(path: Option<&Path>, root_key: u8, samplerate: u32) -> anyhow::Result<Sf2Bank> {
    let sample = match path {
        Some(path) => {
            let (data, spec) = read_wav(path)?;
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "sample".to_string());
            Sf2Sample::new(name, data, root_key, 0, 0, spec.sample_rate)?
        }
        None => {
            let len = samplerate as usize;
            let data = (0..len)
                .map(|i| {
                    let phase = 440.0 * i as f64 / f64::from(samplerate);
                    (std::f64::consts::TAU * phase).sin() as f32
                })
                .collect();
            Sf2Sample::new("sine", data, 69, 0, len, samplerate)?
        }
    };
    let mut bank = Sf2Bank::new(BANK_NAME);
    bank.add_preset(0, 0, sample)?;
    Ok(bank)
}

fn note_length(duration: f64, bpm: f64) -> u64 {
    (duration * bpm / 60.0 * TICKS_PER_QUARTER as f64).round() as u64
}

fn open_live(config: &EngineConfig) -> anyhow::Result<CpalSoundcard> {
    let stream = BackendStreamConfig {
        sample_rate: config.samplerate,
        buffer_size: config.buffer_size as u32,
        channels: config.audio_channels as u16,
        device_name: config.soundcard.device.clone(),
    };
    CpalSoundcard::open(&CpalBackend::new(), &stream, config.format).context("opening output device")
}

/// Tic until every note has finished, `limit` is reached or `running` clears.
///
/// Returns the number of timelock skips seen.
fn render_loop(
    renderer: &mut Renderer,
    card: &mut dyn Soundcard,
    buffers: u64,
    running: &AtomicBool,
) -> anyhow::Result<usize> {
    let limit = buffers + TAIL_TICS;
    let pb = ProgressBar::new(buffers);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tics ({eta})")?
            .progress_chars("##-"),
    );

    let mut skipped = 0;
    while renderer.is_active() && renderer.tics() < limit && running.load(Ordering::SeqCst) {
        let report = renderer.tic(card)?;
        skipped += report.skipped.len();
        pb.set_position(renderer.tics().min(buffers));
    }
    pb.finish_and_clear();
    renderer.shutdown();
    Ok(skipped)
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    if args.duration <= 0.0 || !args.duration.is_finite() {
        anyhow::bail!("Duration must be positive, got {}", args.duration);
    }

    let mut renderer = Renderer::new(
        &config,
        Chain {
            volume: args.volume,
            cutoff: args.cutoff,
        },
    )?;

    let synth = match args.synth {
        SynthKind::Fm => FxFmSynth::template(args.waveform),
        SynthKind::Sf2 => {
            let bank = sample_bank(args.sample.as_deref(), args.root_key, config.samplerate)?;
            renderer.fx().register_bank(bank);
            renderer.fx().sf2_synth(BANK_NAME)?
        }
    };

    let frames = (args.duration * f64::from(config.samplerate)).ceil() as usize;
    let buffers = frames.div_ceil(config.buffer_size).max(1);
    let length = note_length(args.duration, args.bpm);
    for &key in &args.notes {
        renderer.note_on(&synth, Note::new(key, args.velocity, 0, length), buffers)?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let skipped = if args.live {
        let mut card = open_live(&config)?;
        let skipped = render_loop(&mut renderer, &mut card, buffers as u64, &running)?;
        if card.underruns() > 0 {
            println!("Warning: {} output underrun(s)", card.underruns());
        }
        skipped
    } else {
        let output = args.output.as_ref().context("--output is required without --live")?;
        let mut card = OfflineSoundcard::new(
            config.samplerate,
            config.buffer_size,
            config.audio_channels,
            config.format,
        );
        let skipped = render_loop(&mut renderer, &mut card, buffers as u64, &running)?;
        card.write_wav(output)?;
        println!("Wrote {} ({} frames)", output.display(), card.frames());
        skipped
    };

    println!(
        "Rendered {} note(s) over {} tics ({:.2}s)",
        args.notes.len(),
        renderer.tics(),
        renderer.tics() as f64 * config.buffer_size as f64 / f64::from(config.samplerate)
    );
    if skipped > 0 {
        println!("Warning: {skipped} thread skip(s) by timelock");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> EngineConfig {
        EngineConfig {
            samplerate: 8000,
            buffer_size: 64,
            audio_channels: 2,
            format: SampleFormat::Float,
            ..EngineConfig::default()
        }
    }

    fn render(renderer: &mut Renderer, card: &mut OfflineSoundcard) {
        while renderer.is_active() && renderer.tics() < 32 {
            renderer.tic(card).unwrap();
        }
        renderer.shutdown();
    }

    #[test]
    fn fm_note_renders_to_both_lines() {
        let config = small_config();
        let mut renderer = Renderer::new(
            &config,
            Chain {
                volume: 0.5,
                cutoff: None,
            },
        )
        .unwrap();
        let synth = FxFmSynth::template(Waveform::Sine);
        renderer.note_on(&synth, Note::new(69, 127, 0, 64), 4).unwrap();

        let mut card = OfflineSoundcard::new(8000, 64, 2, SampleFormat::Float);
        render(&mut renderer, &mut card);

        assert!(!renderer.is_active());
        assert!(renderer.tics() >= 4 && renderer.tics() < 32);
        assert_eq!(card.frames() as u64, renderer.tics() * 64);

        let samples = card.samples();
        assert!(samples.iter().any(|s| s.abs() > 0.1));
        assert!(samples.iter().all(|s| s.abs() <= 0.5 + 1e-4));
        for frame in samples.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn low_pass_darkens_square() {
        let config = small_config();
        let energy = |cutoff| {
            let mut renderer = Renderer::new(&config, Chain { volume: 1.0, cutoff }).unwrap();
            let synth = FxFmSynth::template(Waveform::Square);
            renderer.note_on(&synth, Note::new(81, 127, 0, 64), 8).unwrap();
            let mut card = OfflineSoundcard::new(8000, 64, 2, SampleFormat::Float);
            render(&mut renderer, &mut card);
            card.samples()
                .windows(4)
                .map(|w| f64::from(w[2] - w[0]).abs())
                .sum::<f64>()
        };
        assert!(energy(Some(200.0)) < energy(None));
    }

    #[test]
    fn default_bank_loops_a_sine() {
        let bank = sample_bank(None, 60, 8000).unwrap();
        assert_eq!(bank.len(), 1);
        let sample = bank.select(0, 0).unwrap();
        assert_eq!(sample.root_key, 69);
        assert!(sample.loops());
        assert_eq!(sample.data.len(), 8000);
    }

    #[test]
    fn sf2_note_renders() {
        let config = small_config();
        let mut renderer = Renderer::new(
            &config,
            Chain {
                volume: 1.0,
                cutoff: Some(2000.0),
            },
        )
        .unwrap();
        renderer
            .fx()
            .register_bank(sample_bank(None, 60, 8000).unwrap());
        let synth = renderer.fx().sf2_synth(BANK_NAME).unwrap();
        renderer.note_on(&synth, Note::new(57, 100, 0, 64), 4).unwrap();
        renderer.note_on(&synth, Note::new(64, 100, 0, 64), 4).unwrap();

        let mut card = OfflineSoundcard::new(8000, 64, 2, SampleFormat::Float);
        render(&mut renderer, &mut card);
        assert!(!renderer.is_active());
        assert!(card.samples().iter().any(|s| s.abs() > 0.05));
    }

    #[test]
    fn note_length_in_256ths() {
        assert_eq!(note_length(2.0, 120.0), 256);
        assert_eq!(note_length(0.5, 60.0), 32);
    }
}
