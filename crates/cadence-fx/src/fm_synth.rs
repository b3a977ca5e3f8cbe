//! Oscillator with LFO frequency modulation.
//!
//! The carrier runs at `freq * (1 + depth * sin(2π * lfo * t))` where `t` is
//! the time in seconds since the oscillator started. Phase accumulates per
//! sample so changing the modulation never produces a discontinuity.

use crate::signal::{port_f32, port_u64, run_signal};
use cadence_core::{
    CancelAction, Port, PortValue, Recall, RecallBehavior, RecallKind, Result, SampleBuffer,
};
use core::f64::consts::PI;
use std::sync::Arc;

/// Carrier waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    /// Pure sine.
    #[default]
    Sine,
    /// Rising ramp from -1 to 1.
    Sawtooth,
    /// Linear triangle.
    Triangle,
    /// +1 for the first half period, -1 for the second.
    Square,
    /// A single 1.0 sample at the start of each period.
    Impulse,
}

impl Waveform {
    /// Every waveform, in port index order.
    pub const ALL: [Waveform; 5] = [
        Waveform::Sine,
        Waveform::Sawtooth,
        Waveform::Triangle,
        Waveform::Square,
        Waveform::Impulse,
    ];

    /// Waveform for a port index; out of range indices fall back to sine.
    pub fn from_index(index: usize) -> Self {
        Self::ALL.get(index).copied().unwrap_or_default()
    }

    /// Short name, as accepted by [`str::parse`].
    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Triangle => "triangle",
            Waveform::Square => "square",
            Waveform::Impulse => "impulse",
        }
    }

    /// Value at normalized phase `p` in `[0, 1)`.
    #[inline]
    pub(crate) fn value(self, p: f64, wrapped: bool) -> f64 {
        match self {
            Waveform::Sine => libm::sin(2.0 * PI * p),
            Waveform::Sawtooth => 2.0 * p - 1.0,
            Waveform::Triangle => {
                if p < 0.5 {
                    4.0 * p - 1.0
                } else {
                    3.0 - 4.0 * p
                }
            }
            Waveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Impulse => {
                if wrapped {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl core::str::FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|w| w.name().eq_ignore_ascii_case(s) || (s == "saw" && *w == Waveform::Sawtooth))
            .ok_or_else(|| format!("unknown waveform '{s}'"))
    }
}

/// FM oscillator state.
#[derive(Debug, Clone)]
pub struct FmSynthUtil {
    /// Carrier waveform.
    pub waveform: Waveform,
    /// Carrier frequency in Hz.
    pub frequency: f64,
    /// Modulator frequency in Hz.
    pub lfo_frequency: f64,
    /// Modulation depth as a fraction of the carrier frequency.
    pub lfo_depth: f64,
    /// Output gain.
    pub volume: f64,
    samplerate: f64,
    phase: f64,
    frame: u64,
}

impl FmSynthUtil {
    /// Create an unmodulated oscillator.
    pub fn new(waveform: Waveform, frequency: f64, samplerate: u32) -> Self {
        Self {
            waveform,
            frequency,
            lfo_frequency: 0.0,
            lfo_depth: 0.0,
            volume: 1.0,
            samplerate: f64::from(samplerate.max(1)),
            phase: 0.0,
            frame: 0,
        }
    }

    /// Frames generated so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Instantaneous carrier frequency at the current frame.
    pub fn modulated_frequency(&self) -> f64 {
        let t = self.frame as f64 / self.samplerate;
        self.frequency * (1.0 + self.lfo_depth * libm::sin(2.0 * PI * self.lfo_frequency * t))
    }

    /// Produce the next sample.
    #[inline]
    pub fn next_sample(&mut self) -> f64 {
        let wrapped = self.frame == 0 || self.phase == 0.0;
        let out = self.waveform.value(self.phase, wrapped) * self.volume;
        let increment = self.modulated_frequency() / self.samplerate;
        self.phase += increment;
        if self.phase >= 1.0 || self.phase < 0.0 {
            self.phase = self.phase.rem_euclid(1.0);
            if self.waveform == Waveform::Impulse {
                // the next sample starts a new period
                self.phase = 0.0;
            }
        }
        self.frame += 1;
        out
    }

    /// Add the next `buffer.len()` samples into `buffer`.
    pub fn compute(&mut self, buffer: &mut SampleBuffer) {
        match buffer {
            SampleBuffer::Float(b) => {
                for s in b.iter_mut() {
                    *s += self.next_sample() as f32;
                }
            }
            SampleBuffer::Double(b) => {
                for s in b.iter_mut() {
                    *s += self.next_sample();
                }
            }
            other => {
                for i in 0..other.len() {
                    let value = other.sample(i) + self.next_sample();
                    other.set_sample(i, value);
                }
            }
        }
    }
}

/// Note-driven FM oscillator recall.
///
/// Bound to one audio signal per note; generates into the current buffer of
/// that signal each tic and finishes once the signal is exhausted.
#[derive(Debug, Default, Clone)]
pub struct FxFmSynth {
    osc: Option<FmSynthUtil>,
}

impl FxFmSynth {
    /// Port selecting the waveform by index into [`Waveform::ALL`].
    pub const WAVEFORM: &'static str = "waveform";
    /// Port holding the LFO frequency in Hz.
    pub const LFO_FREQUENCY: &'static str = "lfo-frequency";
    /// Port holding the LFO depth.
    pub const LFO_DEPTH: &'static str = "lfo-depth";
    /// Port holding the output gain.
    pub const VOLUME: &'static str = "volume";
    /// Port holding the tuning offset in cents.
    pub const TUNING: &'static str = "tuning";

    /// Audio-signal template with shared control ports.
    pub fn template(waveform: Waveform) -> Arc<Recall> {
        let index = Waveform::ALL.iter().position(|w| *w == waveform).unwrap_or(0);
        Recall::builder("fx-fm-synth", RecallKind::AudioSignal)
            .port(Port::new(Self::WAVEFORM, PortValue::Uint(index as u64)).with_range(0.0, 4.0))
            .port(Port::new(Self::LFO_FREQUENCY, PortValue::Float(0.0)).with_range(0.0, 100.0))
            .port(Port::new(Self::LFO_DEPTH, PortValue::Float(0.0)).with_range(0.0, 1.0))
            .port(Port::new(Self::VOLUME, PortValue::Float(1.0)).with_range(0.0, 2.0))
            .port(Port::new(Self::TUNING, PortValue::Float(0.0)).with_range(-1200.0, 1200.0))
            .behavior(FxFmSynth::default())
            .build()
    }
}

impl RecallBehavior for FxFmSynth {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxFmSynth::default())
    }

    fn run_pre(&mut self, recall: &Recall) -> Result<()> {
        if run_signal(recall).is_none_or(|signal| signal.lock().is_exhausted()) {
            recall.done();
        }
        Ok(())
    }

    fn run_inter(&mut self, recall: &Recall) -> Result<()> {
        let waveform = Waveform::from_index(port_u64(recall, Self::WAVEFORM, 0) as usize);
        let lfo_frequency = f64::from(port_f32(recall, Self::LFO_FREQUENCY, 0.0));
        let lfo_depth = f64::from(port_f32(recall, Self::LFO_DEPTH, 0.0));
        let volume = f64::from(port_f32(recall, Self::VOLUME, 1.0));
        let tuning = f64::from(port_f32(recall, Self::TUNING, 0.0));
        let Some(signal) = run_signal(recall) else {
            return Ok(());
        };
        let mut signal = signal.lock();
        let (frequency, gain) = signal
            .note()
            .map_or((440.0, 1.0), |note| (note.frequency(), note.gain()));
        let samplerate = signal.samplerate();
        let osc = self
            .osc
            .get_or_insert_with(|| FmSynthUtil::new(waveform, frequency, samplerate));
        osc.waveform = waveform;
        osc.frequency = frequency * 2f64.powf(tuning / 1200.0);
        osc.lfo_frequency = lfo_frequency;
        osc.lfo_depth = lfo_depth;
        osc.volume = volume * gain;
        if let Some(buffer) = signal.current_buffer_mut() {
            osc.compute(buffer);
        }
        Ok(())
    }

    fn cancel(&mut self, _recall: &Recall) -> CancelAction {
        CancelAction::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::SampleFormat;

    #[test]
    fn sine_starts_at_zero_and_peaks_at_quarter_period() {
        let mut osc = FmSynthUtil::new(Waveform::Sine, 1000.0, 48000);
        let samples: Vec<f64> = (0..48).map(|_| osc.next_sample()).collect();
        assert!(samples[0].abs() < 1e-12);
        assert!((samples[12] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sawtooth_and_square_ranges() {
        let mut saw = FmSynthUtil::new(Waveform::Sawtooth, 100.0, 48000);
        let mut square = FmSynthUtil::new(Waveform::Square, 100.0, 48000);
        for _ in 0..4800 {
            let s = saw.next_sample();
            assert!((-1.0..1.0).contains(&s));
            let q = square.next_sample();
            assert!(q == 1.0 || q == -1.0);
        }
    }

    #[test]
    fn impulse_fires_once_per_period() {
        let mut osc = FmSynthUtil::new(Waveform::Impulse, 1000.0, 48000);
        let count = (0..4800).filter(|_| osc.next_sample() == 1.0).count();
        // 0.1 s at 1 kHz
        assert!((95..=101).contains(&count), "{count}");
    }

    #[test]
    fn lfo_modulates_frequency() {
        let mut osc = FmSynthUtil::new(Waveform::Sine, 440.0, 48000);
        osc.lfo_frequency = 1.0;
        osc.lfo_depth = 0.5;
        assert_eq!(osc.modulated_frequency(), 440.0);
        for _ in 0..12000 {
            osc.next_sample();
        }
        // quarter LFO period: sin = 1
        assert!((osc.modulated_frequency() - 660.0).abs() < 1e-6);
    }

    #[test]
    fn compute_adds_into_buffer() {
        let mut buffer = SampleBuffer::Float(vec![0.5; 4]);
        let mut osc = FmSynthUtil::new(Waveform::Square, 10.0, 48000);
        osc.compute(&mut buffer);
        assert_eq!(buffer, SampleBuffer::Float(vec![1.5; 4]));
        let mut buffer = SampleBuffer::new(SampleFormat::Signed16, 2);
        osc.compute(&mut buffer);
        assert_eq!(buffer, SampleBuffer::S16(vec![32767, 32767]));
    }

    #[test]
    fn waveform_parsing() {
        assert_eq!("saw".parse::<Waveform>().unwrap(), Waveform::Sawtooth);
        assert_eq!("Triangle".parse::<Waveform>().unwrap(), Waveform::Triangle);
        assert!("noise".parse::<Waveform>().is_err());
        assert_eq!(Waveform::from_index(9), Waveform::Sine);
    }
}
