//! Linear gain ramps.

use crate::signal::{port_f32, run_signal};
use cadence_core::{Port, PortValue, Recall, RecallBehavior, RecallKind, Result, SampleBuffer};
use std::sync::Arc;

/// Multiplies sample `i` by `volume + i * amount`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeUtil {
    /// Gain at the first sample.
    pub volume: f64,
    /// Gain increment per sample.
    pub amount: f64,
}

impl EnvelopeUtil {
    /// Ramp from `from` to `to` over `len` samples.
    pub fn ramp(from: f64, to: f64, len: usize) -> Self {
        let amount = if len == 0 { 0.0 } else { (to - from) / len as f64 };
        Self { volume: from, amount }
    }

    /// Write `source[i] * (volume + i * amount)` into `destination`.
    ///
    /// Processes the common prefix of both buffers; formats may differ.
    pub fn compute(&self, destination: &mut SampleBuffer, source: &SampleBuffer) {
        let n = destination.len().min(source.len());
        match (destination, source) {
            (SampleBuffer::Float(dst), SampleBuffer::Float(src)) => {
                for i in 0..n {
                    dst[i] = src[i] * (self.volume + i as f64 * self.amount) as f32;
                }
            }
            (SampleBuffer::Double(dst), SampleBuffer::Double(src)) => {
                for i in 0..n {
                    dst[i] = src[i] * (self.volume + i as f64 * self.amount);
                }
            }
            (dst, src) => {
                for i in 0..n {
                    dst.set_sample(i, src.sample(i) * (self.volume + i as f64 * self.amount));
                }
            }
        }
    }

    /// In-place variant of [`compute`](Self::compute).
    pub fn apply(&self, buffer: &mut SampleBuffer) {
        let source = buffer.clone();
        self.compute(buffer, &source);
    }
}

/// Attack/release envelope over the whole stream of a run's signal.
///
/// The gain rises linearly over the first `attack` fraction of the stream
/// and falls over the last `release` fraction. Each buffer gets a linear
/// piece of that curve.
#[derive(Debug, Default, Clone, Copy)]
pub struct FxEnvelope;

impl FxEnvelope {
    /// Port holding the attack length as a fraction of the stream.
    pub const ATTACK: &'static str = "attack";
    /// Port holding the release length as a fraction of the stream.
    pub const RELEASE: &'static str = "release";

    /// Audio-signal template with shared `attack` and `release` ports.
    pub fn template(attack: f32, release: f32) -> Arc<Recall> {
        Recall::builder("fx-envelope", RecallKind::AudioSignal)
            .port(Port::new(Self::ATTACK, PortValue::Float(attack)).with_range(0.0, 1.0))
            .port(Port::new(Self::RELEASE, PortValue::Float(release)).with_range(0.0, 1.0))
            .behavior(FxEnvelope)
            .build()
    }

    /// Gain at `frame` of a stream `total` frames long.
    pub fn gain_at(frame: usize, total: usize, attack: f64, release: f64) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let attack_frames = attack * total as f64;
        let release_frames = release * total as f64;
        let frame = frame as f64;
        let rise = if attack_frames > 0.0 {
            (frame / attack_frames).min(1.0)
        } else {
            1.0
        };
        let fall = if release_frames > 0.0 {
            ((total as f64 - frame) / release_frames).min(1.0)
        } else {
            1.0
        };
        (rise * fall).max(0.0)
    }
}

impl RecallBehavior for FxEnvelope {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxEnvelope)
    }

    fn run_inter(&mut self, recall: &Recall) -> Result<()> {
        let attack = f64::from(port_f32(recall, Self::ATTACK, 0.0));
        let release = f64::from(port_f32(recall, Self::RELEASE, 0.0));
        let Some(signal) = run_signal(recall) else {
            return Ok(());
        };
        let mut signal = signal.lock();
        let total = signal.frame_count();
        let buffer_size = signal.buffer_size();
        let Some(index) = signal.current_index() else {
            return Ok(());
        };
        if let Some(buffer) = signal.current_buffer_mut() {
            let start = index * buffer_size;
            let len = buffer.len();
            let from = Self::gain_at(start, total, attack, release);
            let to = Self::gain_at(start + len, total, attack, release);
            EnvelopeUtil::ramp(from, to, len).apply(buffer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::SampleFormat;

    #[test]
    fn ramp_multiplies_linearly() {
        let source = SampleBuffer::Double(vec![1.0; 4]);
        let mut destination = SampleBuffer::new(SampleFormat::Double, 4);
        EnvelopeUtil::ramp(0.0, 1.0, 4).compute(&mut destination, &source);
        assert_eq!(destination, SampleBuffer::Double(vec![0.0, 0.25, 0.5, 0.75]));
    }

    #[test]
    fn compute_converts_formats() {
        let source = SampleBuffer::Float(vec![0.5, 0.5]);
        let mut destination = SampleBuffer::new(SampleFormat::Signed16, 2);
        EnvelopeUtil { volume: 1.0, amount: 0.0 }.compute(&mut destination, &source);
        assert_eq!(destination, SampleBuffer::S16(vec![16384, 16384]));
    }

    #[test]
    fn gain_curve_shape() {
        assert_eq!(FxEnvelope::gain_at(0, 100, 0.1, 0.1), 0.0);
        assert_eq!(FxEnvelope::gain_at(50, 100, 0.1, 0.1), 1.0);
        assert_eq!(FxEnvelope::gain_at(100, 100, 0.1, 0.1), 0.0);
        assert_eq!(FxEnvelope::gain_at(5, 100, 0.1, 0.0), 0.5);
    }
}
