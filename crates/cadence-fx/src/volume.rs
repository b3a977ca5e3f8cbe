//! Gain and mute.
//!
//! [`VolumeUtil`] scales a buffer in place, dispatching on the storage
//! format. [`FxVolume`] is the recall wrapping it: it reads its `volume` and
//! `muted` ports once per `run_inter` and applies them to the current buffer
//! of its run's signal.

use crate::signal::{port_bool, port_f32, run_signal};
use cadence_core::{
    Port, PortValue, Recall, RecallBehavior, RecallKind, Result, SampleBuffer, SampleFormat,
};
use std::sync::Arc;

/// Scales samples by a constant factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeUtil {
    /// Linear gain.
    pub volume: f64,
}

impl Default for VolumeUtil {
    fn default() -> Self {
        Self { volume: 1.0 }
    }
}

#[inline]
fn scale_int(sample: f64, volume: f64, full_scale: f64) -> f64 {
    (sample * volume).clamp(-full_scale, full_scale).round()
}

impl VolumeUtil {
    /// Create a util with gain `volume`.
    pub fn new(volume: f64) -> Self {
        Self { volume }
    }

    /// Scale `buffer` in place. Integer formats saturate at full scale.
    pub fn compute(&self, buffer: &mut SampleBuffer) {
        let v = self.volume;
        match buffer {
            SampleBuffer::S8(b) => {
                let fs = SampleFormat::Signed8.full_scale();
                b.iter_mut().for_each(|s| *s = scale_int(f64::from(*s), v, fs) as i8);
            }
            SampleBuffer::S16(b) => {
                let fs = SampleFormat::Signed16.full_scale();
                b.iter_mut().for_each(|s| *s = scale_int(f64::from(*s), v, fs) as i16);
            }
            SampleBuffer::S24(b) => {
                let fs = SampleFormat::Signed24.full_scale();
                b.iter_mut().for_each(|s| *s = scale_int(f64::from(*s), v, fs) as i32);
            }
            SampleBuffer::S32(b) => {
                let fs = SampleFormat::Signed32.full_scale();
                b.iter_mut().for_each(|s| *s = scale_int(f64::from(*s), v, fs) as i32);
            }
            SampleBuffer::S64(b) => {
                let fs = SampleFormat::Signed64.full_scale();
                b.iter_mut().for_each(|s| *s = scale_int(*s as f64, v, fs) as i64);
            }
            SampleBuffer::Float(b) => {
                let v = v as f32;
                b.iter_mut().for_each(|s| *s *= v);
            }
            SampleBuffer::Double(b) => b.iter_mut().for_each(|s| *s *= v),
            SampleBuffer::Complex(b) => {
                let v = v as f32;
                b.iter_mut().for_each(|s| {
                    s.re *= v;
                    s.im *= v;
                });
            }
        }
    }
}

/// Gain/mute recall.
#[derive(Debug, Default, Clone, Copy)]
pub struct FxVolume;

impl FxVolume {
    /// Port holding the linear gain, clamped to `[0, 2]`.
    pub const VOLUME: &'static str = "volume";
    /// Port muting the output when `true`.
    pub const MUTED: &'static str = "muted";

    /// Channel-level template with shared `volume` and `muted` ports.
    pub fn template(volume: f32) -> Arc<Recall> {
        Recall::builder("fx-volume", RecallKind::Channel)
            .port(Port::new(Self::VOLUME, PortValue::Float(volume)).with_range(0.0, 2.0))
            .port(Port::new(Self::MUTED, PortValue::Bool(false)))
            .behavior(FxVolume)
            .build()
    }
}

impl RecallBehavior for FxVolume {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxVolume)
    }

    fn run_inter(&mut self, recall: &Recall) -> Result<()> {
        let muted = port_bool(recall, Self::MUTED);
        let volume = port_f32(recall, Self::VOLUME, 1.0);
        let Some(signal) = run_signal(recall) else {
            return Ok(());
        };
        let mut signal = signal.lock();
        if let Some(buffer) = signal.current_buffer_mut() {
            if muted {
                buffer.clear();
            } else {
                VolumeUtil::new(f64::from(volume)).compute(buffer);
            }
        }
        Ok(())
    }
}
