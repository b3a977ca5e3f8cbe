//! Sample-table playback.
//!
//! # Core Abstractions
//!
//! - [`Sf2Sample`]: one mono sample table with its root key and loop points
//! - [`Sf2Bank`]: presets keyed by `(bank, program)`, registered by name on
//!   an [`FxContext`](crate::FxContext)
//! - [`Sf2SynthUtil`]: pitched, linearly interpolated playback of one sample
//!   that loops until released and then fades out
//! - [`FxSf2Synth`]: the per-note recall
//!
//! Reading SoundFont files is left to the caller; banks are built from
//! decoded sample data.

use crate::error::{FxError, Result as FxResult};
use crate::signal::{port_f32, port_u64, run_signal};
use cadence_core::{
    CancelAction, Port, PortValue, Recall, RecallBehavior, RecallKind, Result, SampleBuffer,
    key_frequency,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Release fade length in seconds.
pub const RELEASE_SECONDS: f64 = 0.05;

/// One mono sample table.
#[derive(Debug, Clone, PartialEq)]
pub struct Sf2Sample {
    /// Sample name, used in diagnostics.
    pub name: String,
    /// Normalized sample data.
    pub data: Vec<f32>,
    /// MIDI key played back at the recorded pitch.
    pub root_key: u8,
    /// First frame of the sustain loop.
    pub loop_start: usize,
    /// Frame after the last frame of the sustain loop. Equal to
    /// `loop_start` when the sample does not loop.
    pub loop_end: usize,
    /// Rate the data was recorded at.
    pub samplerate: u32,
}

impl Sf2Sample {
    /// Create a validated sample.
    pub fn new(
        name: impl Into<String>,
        data: Vec<f32>,
        root_key: u8,
        loop_start: usize,
        loop_end: usize,
        samplerate: u32,
    ) -> FxResult<Self> {
        let sample = Self {
            name: name.into(),
            data,
            root_key,
            loop_start,
            loop_end,
            samplerate,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Check data and loop points.
    pub fn validate(&self) -> FxResult<()> {
        let invalid = |reason| FxError::InvalidSample {
            name: self.name.clone(),
            reason,
        };
        if self.data.is_empty() {
            return Err(invalid("no sample data"));
        }
        if self.samplerate == 0 {
            return Err(invalid("zero sample rate"));
        }
        if self.loop_start > self.loop_end || self.loop_end > self.data.len() {
            return Err(invalid("loop outside the sample data"));
        }
        Ok(())
    }

    /// Whether the sample has a sustain loop.
    pub fn loops(&self) -> bool {
        self.loop_end > self.loop_start
    }
}

/// Named collection of presets.
#[derive(Debug, Clone, Default)]
pub struct Sf2Bank {
    name: String,
    presets: HashMap<(u16, u8), Arc<Sf2Sample>>,
}

impl Sf2Bank {
    /// Create an empty bank.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            presets: HashMap::new(),
        }
    }

    /// Bank name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `sample` as preset `bank:program`, replacing any previous one.
    pub fn add_preset(&mut self, bank: u16, program: u8, sample: Sf2Sample) -> FxResult<()> {
        sample.validate()?;
        self.presets.insert((bank, program), Arc::new(sample));
        Ok(())
    }

    /// Preset at `bank:program`.
    pub fn select(&self, bank: u16, program: u8) -> FxResult<Arc<Sf2Sample>> {
        self.presets
            .get(&(bank, program))
            .cloned()
            .ok_or_else(|| FxError::MissingPreset {
                bank: self.name.clone(),
                preset: bank,
                program,
            })
    }

    /// Number of presets.
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    /// Whether the bank has no presets.
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

/// Playback cursor over one sample.
#[derive(Debug, Clone)]
pub struct Sf2SynthUtil {
    sample: Arc<Sf2Sample>,
    position: f64,
    step: f64,
    /// Output gain.
    pub volume: f64,
    release: Option<(f64, f64)>,
}

impl Sf2SynthUtil {
    /// Play `sample` at `key` into a stream running at `samplerate`.
    pub fn new(sample: Arc<Sf2Sample>, key: u8, samplerate: u32) -> Self {
        let pitch = key_frequency(key) / key_frequency(sample.root_key);
        let step = pitch * f64::from(sample.samplerate) / f64::from(samplerate.max(1));
        Self {
            sample,
            position: 0.0,
            step,
            volume: 1.0,
            release: None,
        }
    }

    /// Frames advanced per output sample.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Stop looping and fade out over `frames` output samples.
    pub fn release(&mut self, frames: usize) {
        if self.release.is_none() {
            let frames = frames.max(1) as f64;
            self.release = Some((1.0, 1.0 / frames));
        }
    }

    /// Whether [`release`](Self::release) was called.
    pub fn is_released(&self) -> bool {
        self.release.is_some()
    }

    /// Whether playback has run off the data or faded out.
    pub fn is_finished(&self) -> bool {
        self.position >= self.sample.data.len() as f64
            || self.release.is_some_and(|(gain, _)| gain <= 0.0)
    }

    #[inline]
    fn interpolate(&self) -> f64 {
        let data = &self.sample.data;
        let index = self.position as usize;
        let frac = self.position - index as f64;
        let a = f64::from(data[index]);
        let next = index + 1;
        let b = if self.sample.loops() && self.release.is_none() && next >= self.sample.loop_end {
            f64::from(data[self.sample.loop_start])
        } else {
            data.get(next).copied().map_or(0.0, f64::from)
        };
        a + (b - a) * frac
    }

    /// Produce the next sample; silence once finished.
    #[inline]
    pub fn next_sample(&mut self) -> f64 {
        if self.is_finished() {
            return 0.0;
        }
        let mut out = self.interpolate() * self.volume;
        if let Some((gain, decrement)) = self.release.as_mut() {
            out *= *gain;
            *gain -= *decrement;
        }
        self.position += self.step;
        let sample = &self.sample;
        if sample.loops() && self.release.is_none() {
            let (start, end) = (sample.loop_start as f64, sample.loop_end as f64);
            while self.position >= end {
                self.position -= end - start;
            }
        }
        out
    }

    /// Add the next `buffer.len()` samples into `buffer`.
    pub fn compute(&mut self, buffer: &mut SampleBuffer) {
        for i in 0..buffer.len() {
            if self.is_finished() {
                break;
            }
            let value = buffer.sample(i) + self.next_sample();
            buffer.set_sample(i, value);
        }
    }
}

/// Per-note sample player.
///
/// Selects its preset from the bank at the first tic using the `bank` and
/// `program` ports. A missing preset finishes the instance with a warning.
/// The note loops until the last buffer of its signal or a cancel request,
/// then fades out over [`RELEASE_SECONDS`].
#[derive(Debug, Clone)]
pub struct FxSf2Synth {
    bank: Arc<Sf2Bank>,
    voice: Option<Sf2SynthUtil>,
}

impl FxSf2Synth {
    /// Port holding the preset bank number.
    pub const BANK: &'static str = "bank";
    /// Port holding the program number.
    pub const PROGRAM: &'static str = "program";
    /// Port holding the output gain.
    pub const VOLUME: &'static str = "volume";

    /// Audio-signal template playing from `bank`.
    pub fn template(bank: Arc<Sf2Bank>) -> Arc<Recall> {
        Recall::builder("fx-sf2-synth", RecallKind::AudioSignal)
            .port(Port::new(Self::BANK, PortValue::Uint(0)).with_range(0.0, f64::from(u16::MAX)))
            .port(Port::new(Self::PROGRAM, PortValue::Uint(0)).with_range(0.0, 127.0))
            .port(Port::new(Self::VOLUME, PortValue::Float(1.0)).with_range(0.0, 2.0))
            .behavior(FxSf2Synth { bank, voice: None })
            .build()
    }

    /// Voice of this instance, once selected.
    pub fn voice(&self) -> Option<&Sf2SynthUtil> {
        self.voice.as_ref()
    }
}

impl RecallBehavior for FxSf2Synth {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxSf2Synth {
            bank: Arc::clone(&self.bank),
            voice: None,
        })
    }

    fn run_init_pre(&mut self, recall: &Recall) -> Result<()> {
        let bank = port_u64(recall, Self::BANK, 0).min(u64::from(u16::MAX)) as u16;
        let program = port_u64(recall, Self::PROGRAM, 0).min(127) as u8;
        let Some(signal) = run_signal(recall) else {
            recall.done();
            return Ok(());
        };
        let (key, samplerate) = {
            let signal = signal.lock();
            (signal.note().map_or(60, |note| note.key), signal.samplerate())
        };
        match self.bank.select(bank, program) {
            Ok(sample) => self.voice = Some(Sf2SynthUtil::new(sample, key, samplerate)),
            Err(err) => {
                tracing::warn!(bank = %self.bank.name(), error = %err, "no preset, note dropped");
                recall.done();
            }
        }
        Ok(())
    }

    fn run_inter(&mut self, recall: &Recall) -> Result<()> {
        let volume = f64::from(port_f32(recall, Self::VOLUME, 1.0));
        let (Some(voice), Some(signal)) = (self.voice.as_mut(), run_signal(recall)) else {
            return Ok(());
        };
        let mut signal = signal.lock();
        let gain = signal.note().map_or(1.0, |note| note.gain());
        voice.volume = volume * gain;
        let is_last = signal
            .current_index()
            .is_some_and(|index| index + 1 >= signal.length());
        if is_last {
            let frames = (RELEASE_SECONDS * f64::from(signal.samplerate())) as usize;
            voice.release(frames.min(signal.buffer_size()));
        }
        if let Some(buffer) = signal.current_buffer_mut() {
            voice.compute(buffer);
        }
        Ok(())
    }

    fn run_post(&mut self, recall: &Recall) -> Result<()> {
        let exhausted = run_signal(recall).is_none_or(|signal| signal.lock().is_exhausted());
        if exhausted || self.voice.as_ref().is_some_and(Sf2SynthUtil::is_finished) {
            recall.done();
        }
        Ok(())
    }

    fn cancel(&mut self, recall: &Recall) -> CancelAction {
        match self.voice.as_mut() {
            Some(voice) => {
                let samplerate = run_signal(recall).map_or(48000, |s| s.lock().samplerate());
                voice.release((RELEASE_SECONDS * f64::from(samplerate)) as usize);
                CancelAction::Release
            }
            None => CancelAction::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32 / len as f32).collect()
    }

    #[test]
    fn validation() {
        assert!(Sf2Sample::new("empty", vec![], 60, 0, 0, 48000).is_err());
        assert!(Sf2Sample::new("loop", vec![0.0; 8], 60, 4, 9, 48000).is_err());
        assert!(Sf2Sample::new("backwards", vec![0.0; 8], 60, 6, 4, 48000).is_err());
        let one_shot = Sf2Sample::new("ok", vec![0.0; 8], 60, 0, 0, 48000).unwrap();
        assert!(!one_shot.loops());
    }

    #[test]
    fn bank_select() {
        let mut bank = Sf2Bank::new("gm");
        bank.add_preset(0, 1, Sf2Sample::new("piano", ramp(8), 60, 0, 0, 48000).unwrap())
            .unwrap();
        assert_eq!(bank.select(0, 1).unwrap().name, "piano");
        assert!(matches!(
            bank.select(0, 2),
            Err(FxError::MissingPreset { program: 2, .. })
        ));
    }

    #[test]
    fn octave_up_doubles_step() {
        let sample = Arc::new(Sf2Sample::new("s", ramp(8), 60, 0, 0, 48000).unwrap());
        assert!((Sf2SynthUtil::new(Arc::clone(&sample), 72, 48000).step() - 2.0).abs() < 1e-9);
        assert!((Sf2SynthUtil::new(sample, 60, 24000).step() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn one_shot_plays_to_the_end() {
        let sample = Arc::new(Sf2Sample::new("s", ramp(4), 60, 0, 0, 48000).unwrap());
        let mut voice = Sf2SynthUtil::new(sample, 60, 48000);
        let out: Vec<f64> = (0..6).map(|_| voice.next_sample()).collect();
        assert_eq!(out, [0.0, 0.25, 0.5, 0.75, 0.0, 0.0]);
        assert!(voice.is_finished());
    }

    #[test]
    fn loop_sustains_until_release() {
        let sample = Arc::new(Sf2Sample::new("s", vec![0.1, 0.2, 0.3, 0.4], 60, 2, 4, 48000).unwrap());
        let mut voice = Sf2SynthUtil::new(sample, 60, 48000);
        let out: Vec<f64> = (0..8).map(|_| voice.next_sample() as f32 as f64).collect();
        let expected: Vec<f64> = [0.1f32, 0.2, 0.3, 0.4, 0.3, 0.4, 0.3, 0.4]
            .iter()
            .map(|&v| f64::from(v))
            .collect();
        assert_eq!(out, expected);
        assert!(!voice.is_finished());

        voice.release(100);
        for _ in 0..8 {
            voice.next_sample();
        }
        assert!(voice.is_finished());
    }

    #[test]
    fn release_fades_to_silence() {
        let sample = Arc::new(Sf2Sample::new("s", vec![1.0; 4], 60, 0, 4, 48000).unwrap());
        let mut voice = Sf2SynthUtil::new(sample, 60, 48000);
        voice.release(4);
        let out: Vec<f64> = (0..5).map(|_| voice.next_sample()).collect();
        assert_eq!(out[0], 1.0);
        assert!(out[1] < out[0] && out[2] < out[1]);
        assert!(voice.is_finished());
    }
}
