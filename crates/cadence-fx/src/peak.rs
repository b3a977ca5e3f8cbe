//! Peak metering.

use crate::signal::run_signal;
use cadence_core::{Port, PortValue, Recall, RecallBehavior, RecallKind, Result, SampleBuffer};
use std::sync::Arc;

/// Meter value of a buffer, shaped for a level display.
///
/// Every non-zero sample contributes `1 / (sample * pressure_factor)`; the
/// sum is mapped through `atan(1 / harmonic_rate) / sin(sum / nyquist)`.
/// A silent buffer reads `0.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakUtil {
    /// Sample rate in Hz.
    pub samplerate: u32,
    /// Shapes the meter curve.
    pub harmonic_rate: f64,
    /// Scales each sample before inversion.
    pub pressure_factor: f64,
}

impl PeakUtil {
    /// Default harmonic rate.
    pub const DEFAULT_HARMONIC_RATE: f64 = 1.0;
    /// Default pressure factor.
    pub const DEFAULT_PRESSURE_FACTOR: f64 = 1.0;

    /// Create a meter with default shaping.
    pub fn new(samplerate: u32) -> Self {
        Self {
            samplerate,
            harmonic_rate: Self::DEFAULT_HARMONIC_RATE,
            pressure_factor: Self::DEFAULT_PRESSURE_FACTOR,
        }
    }

    /// Meter value of `buffer`.
    pub fn compute(&self, buffer: &SampleBuffer) -> f64 {
        let mut sum = 0.0;
        for i in 0..buffer.len() {
            let sample = buffer.sample(i);
            if sample != 0.0 {
                sum += 1.0 / (sample * self.pressure_factor);
            }
        }
        if sum == 0.0 {
            return 0.0;
        }
        let nyquist = f64::from(self.samplerate.max(1)) / 2.0;
        libm::atan(1.0 / self.harmonic_rate) / libm::sin(sum / nyquist)
    }
}

/// Writes the peak of its run's current buffer into an output port.
#[derive(Debug, Default, Clone, Copy)]
pub struct FxPeak;

impl FxPeak {
    /// Output port receiving the meter value.
    pub const PEAK: &'static str = "peak";

    /// Channel-level template with a per-run `peak` output port.
    pub fn template() -> Arc<Recall> {
        Recall::builder("fx-peak", RecallKind::Channel)
            .local_port(Port::new(Self::PEAK, PortValue::Double(0.0)).as_output())
            .behavior(FxPeak)
            .build()
    }
}

impl RecallBehavior for FxPeak {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxPeak)
    }

    fn run_post(&mut self, recall: &Recall) -> Result<()> {
        let (Some(port), Some(signal)) = (recall.port(Self::PEAK), run_signal(recall)) else {
            return Ok(());
        };
        let peak = {
            let signal = signal.lock();
            signal
                .current_buffer()
                .map_or(0.0, |buffer| PeakUtil::new(signal.samplerate()).compute(buffer))
        };
        port.set(PortValue::Double(peak))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_reads_zero() {
        let buffer = SampleBuffer::Float(vec![0.0; 64]);
        assert_eq!(PeakUtil::new(48000).compute(&buffer), 0.0);
    }

    #[test]
    fn signal_reads_non_zero() {
        let buffer = SampleBuffer::Float(vec![0.5; 64]);
        let peak = PeakUtil::new(48000).compute(&buffer);
        // sum = 128, atan(1) / sin(128 / 24000)
        let expected = libm::atan(1.0) / libm::sin(128.0 / 24000.0);
        assert!((peak - expected).abs() < 1e-9);
        assert!(peak > 0.0);
    }
}
