//! Low frequency amplitude modulation.
//!
//! Every sample is multiplied by a modulator built from an LFO and a
//! constant offset:
//!
//! ```text
//! y[n] = x[n] · (tuning / 1200 + wave(freq · (offset + n + phase) / samplerate) · depth)
//! ```
//!
//! `offset` is the number of frames processed before the buffer and `phase`
//! shifts the LFO by a number of frames. With `tuning` at 0 the output is
//! ring modulated; `tuning` at 1200 with a small depth gives a tremolo.

use crate::fm_synth::Waveform;
use crate::signal::{port_bool, port_f32, port_u64, run_signal};
use cadence_core::{
    Port, PortValue, Recall, RecallBehavior, RecallEvent, RecallKind, Result, SampleBuffer,
};
use std::sync::Arc;

/// LFO modulator state.
#[derive(Debug, Clone)]
pub struct LfoUtil {
    /// LFO shape.
    pub waveform: Waveform,
    /// LFO frequency in Hz.
    pub frequency: f64,
    /// LFO phase offset in frames.
    pub phase: f64,
    /// Modulation depth.
    pub depth: f64,
    /// Constant part of the modulator in cents; 1200 adds 1.0.
    pub tuning: f64,
    samplerate: f64,
    offset: u64,
    last_position: f64,
}

impl LfoUtil {
    /// Sine LFO at `frequency` with full depth and no offset.
    pub fn new(frequency: f64, samplerate: u32) -> Self {
        Self {
            waveform: Waveform::Sine,
            frequency,
            phase: 0.0,
            depth: 1.0,
            tuning: 0.0,
            samplerate: f64::from(samplerate.max(1)),
            offset: 0,
            last_position: 1.0,
        }
    }

    /// Frames processed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Change the sample rate; the frame counter is kept.
    pub fn set_samplerate(&mut self, samplerate: u32) {
        self.samplerate = f64::from(samplerate.max(1));
    }

    /// Modulator value for the next frame.
    #[inline]
    pub fn next_gain(&mut self) -> f64 {
        let cycles = self.frequency * (self.offset as f64 + self.phase) / self.samplerate;
        let position = cycles.rem_euclid(1.0);
        let wrapped = position < self.last_position;
        self.last_position = position;
        self.offset += 1;
        self.tuning / 1200.0 + self.waveform.value(position, wrapped) * self.depth
    }

    /// Modulate `buffer` in place.
    pub fn compute(&mut self, buffer: &mut SampleBuffer) {
        match buffer {
            SampleBuffer::Float(b) => {
                for s in b.iter_mut() {
                    *s = (f64::from(*s) * self.next_gain()) as f32;
                }
            }
            SampleBuffer::Double(b) => {
                for s in b.iter_mut() {
                    *s *= self.next_gain();
                }
            }
            other => {
                for i in 0..other.len() {
                    let out = other.sample(i) * self.next_gain();
                    other.set_sample(i, out);
                }
            }
        }
    }
}

/// LFO recall.
#[derive(Debug, Default, Clone)]
pub struct FxLfo {
    state: Option<LfoUtil>,
}

impl FxLfo {
    /// Port switching the modulation on.
    pub const ENABLED: &'static str = "enabled";
    /// Port selecting the waveform by index into [`Waveform::ALL`].
    pub const WAVE: &'static str = "lfo-wave";
    /// Port holding the LFO frequency in Hz.
    pub const FREQUENCY: &'static str = "lfo-freq";
    /// Port holding the phase offset in frames.
    pub const PHASE: &'static str = "lfo-phase";
    /// Port holding the modulation depth.
    pub const DEPTH: &'static str = "lfo-depth";
    /// Port holding the constant offset in cents.
    pub const TUNING: &'static str = "lfo-tuning";

    /// Channel-level template.
    pub fn template(frequency: f32) -> Arc<Recall> {
        Recall::builder("fx-lfo", RecallKind::Channel)
            .port(Port::new(Self::ENABLED, PortValue::Bool(true)))
            .port(Port::new(Self::WAVE, PortValue::Uint(0)).with_range(0.0, 4.0))
            .port(Port::new(Self::FREQUENCY, PortValue::Float(frequency)).with_range(0.01, 100.0))
            .port(Port::new(Self::PHASE, PortValue::Float(0.0)).with_range(0.0, 192000.0))
            .port(Port::new(Self::DEPTH, PortValue::Float(1.0)).with_range(0.0, 1.0))
            .port(Port::new(Self::TUNING, PortValue::Float(0.0)).with_range(-1200.0, 1200.0))
            .behavior(FxLfo::default())
            .build()
    }
}

impl RecallBehavior for FxLfo {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxLfo::default())
    }

    fn run_inter(&mut self, recall: &Recall) -> Result<()> {
        if !port_bool(recall, Self::ENABLED) {
            return Ok(());
        }
        let waveform = Waveform::from_index(port_u64(recall, Self::WAVE, 0) as usize);
        let frequency = f64::from(port_f32(recall, Self::FREQUENCY, 6.0));
        let Some(signal) = run_signal(recall) else {
            return Ok(());
        };
        let mut signal = signal.lock();
        let samplerate = signal.samplerate();
        let lfo = self.state.get_or_insert_with(|| LfoUtil::new(frequency, samplerate));
        lfo.waveform = waveform;
        lfo.frequency = frequency;
        lfo.phase = f64::from(port_f32(recall, Self::PHASE, 0.0));
        lfo.depth = f64::from(port_f32(recall, Self::DEPTH, 1.0));
        lfo.tuning = f64::from(port_f32(recall, Self::TUNING, 0.0));
        if let Some(buffer) = signal.current_buffer_mut() {
            lfo.compute(buffer);
        }
        Ok(())
    }

    fn notify(&mut self, event: &RecallEvent) {
        if let (RecallEvent::Samplerate(rate), Some(lfo)) = (event, self.state.as_mut()) {
            lfo.set_samplerate(*rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_modulator_follows_formula() {
        let mut lfo = LfoUtil::new(1000.0, 48000);
        lfo.depth = 0.5;
        lfo.tuning = 600.0;
        let gains: Vec<f64> = (0..48).map(|_| lfo.next_gain()).collect();
        assert!((gains[0] - 0.5).abs() < 1e-12);
        // quarter period of 1 kHz at 48 kHz
        assert!((gains[12] - 1.0).abs() < 1e-9);
        assert!((gains[36] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn offset_carries_across_buffers() {
        let mut split = LfoUtil::new(3.0, 8000);
        let mut first = SampleBuffer::Float(vec![1.0; 32]);
        let mut second = SampleBuffer::Float(vec![1.0; 32]);
        split.compute(&mut first);
        split.compute(&mut second);
        assert_eq!(split.offset(), 64);

        let mut whole = LfoUtil::new(3.0, 8000);
        let mut buffer = SampleBuffer::Float(vec![1.0; 64]);
        whole.compute(&mut buffer);
        let joined: Vec<f64> = first.to_f64_vec().into_iter().chain(second.to_f64_vec()).collect();
        assert_eq!(joined, buffer.to_f64_vec());
    }

    #[test]
    fn phase_shifts_by_frames() {
        let mut shifted = LfoUtil::new(100.0, 48000);
        shifted.phase = 120.0;
        let mut plain = LfoUtil::new(100.0, 48000);
        for _ in 0..120 {
            plain.next_gain();
        }
        assert!((shifted.next_gain() - plain.next_gain()).abs() < 1e-12);
    }

    #[test]
    fn template_ports_toggle_and_defaults() {
        let template = FxLfo::template(6.0);
        template.port(FxLfo::ENABLED).unwrap().set(PortValue::Bool(false)).unwrap();
        assert!(!template.port(FxLfo::ENABLED).unwrap().get_bool());
        assert_eq!(template.port(FxLfo::FREQUENCY).unwrap().get_f32(), 6.0);
        assert_eq!(template.port(FxLfo::DEPTH).unwrap().get_f32(), 1.0);
    }
}
