//! Second-order IIR low-pass, high-pass and peaking filters.
//!
//! Coefficients follow the RBJ Audio EQ Cookbook, normalized by `a0`:
//!
//! ```text
//! omega = 2π · fres / samplerate      alpha = sin(omega) / (2q)
//! a1 = -2cos(omega) / a0              a2 = (1 - alpha) / a0
//! low-pass:   b1 = (1 - cos) / a0 · gain,    b0 = b2 = b1 / 2
//! high-pass:  b1 = -(1 + cos) / a0 · gain,   b0 = b2 = (1 + cos) / a0 · gain / 2
//! ```
//!
//! The peaking shape boosts or cuts a band around `fres` by `gain` (linear)
//! with `A = sqrt(gain)`:
//!
//! ```text
//! a0 = 1 + alpha / A     b0 = (1 + alpha · A) / a0     b2 = (1 - alpha · A) / a0
//! b1 = a1 = -2cos(omega) / a0                          a2 = (1 - alpha / A) / a0
//! ```
//!
//! `fres` is clamped to `[5 Hz, 0.45 · samplerate]`. When the parameters
//! change, the coefficients glide from the old to the new set over
//! `transition` samples so cutoff automation does not click.

use crate::signal::{port_f32, run_signal};
use cadence_core::{
    Port, PortValue, Recall, RecallBehavior, RecallEvent, RecallKind, Result, SampleBuffer,
};
use core::f64::consts::PI;
use libm::{cos, sin, sqrt};
use std::sync::Arc;

/// Lowest accepted cutoff in Hz.
pub const MIN_FRES: f64 = 5.0;

/// Highest accepted cutoff as a fraction of the sample rate.
pub const MAX_FRES_RATIO: f64 = 0.45;

/// Default coefficient glide in samples.
pub const DEFAULT_TRANSITION: usize = 64;

/// Response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Pass below the cutoff.
    LowPass,
    /// Pass above the cutoff.
    HighPass,
    /// Boost or cut a band around the centre frequency.
    Peak,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coefficients {
    fn compute(filter_type: FilterType, fres: f64, q: f64, gain: f64, samplerate: f64) -> Self {
        let fres = fres.clamp(MIN_FRES, MAX_FRES_RATIO * samplerate);
        let omega = 2.0 * PI * fres / samplerate;
        let cos_omega = cos(omega);
        let alpha = sin(omega) / (2.0 * q.max(1e-3));
        let a0_inv = 1.0 / (1.0 + alpha);
        let a1 = -2.0 * cos_omega * a0_inv;
        let a2 = (1.0 - alpha) * a0_inv;
        match filter_type {
            FilterType::LowPass => {
                let b1 = (1.0 - cos_omega) * a0_inv * gain;
                Self { b0: b1 / 2.0, b1, b2: b1 / 2.0, a1, a2 }
            }
            FilterType::HighPass => {
                let b1 = -(1.0 + cos_omega) * a0_inv * gain;
                let b0 = (1.0 + cos_omega) * a0_inv * gain / 2.0;
                Self { b0, b1, b2: b0, a1, a2 }
            }
            FilterType::Peak => {
                let a = sqrt(gain.max(1e-6));
                let a0_inv = 1.0 / (1.0 + alpha / a);
                let b1 = -2.0 * cos_omega * a0_inv;
                Self {
                    b0: (1.0 + alpha * a) * a0_inv,
                    b1,
                    b2: (1.0 - alpha * a) * a0_inv,
                    a1: b1,
                    a2: (1.0 - alpha / a) * a0_inv,
                }
            }
        }
    }

    fn lerp(&self, target: &Self, t: f64) -> Self {
        let mix = |a: f64, b: f64| a + (b - a) * t;
        Self {
            b0: mix(self.b0, target.b0),
            b1: mix(self.b1, target.b1),
            b2: mix(self.b2, target.b2),
            a1: mix(self.a1, target.a1),
            a2: mix(self.a2, target.a2),
        }
    }
}

/// Biquad filter state with ramped coefficient changes.
#[derive(Debug, Clone)]
pub struct IirFilterUtil {
    filter_type: FilterType,
    samplerate: f64,
    fres: f64,
    q: f64,
    gain: f64,
    transition: usize,
    from: Coefficients,
    target: Coefficients,
    ramp_pos: usize,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl IirFilterUtil {
    /// Create a filter at `fres` Hz with quality `q` and passband `gain`.
    pub fn new(filter_type: FilterType, samplerate: u32, fres: f64, q: f64, gain: f64) -> Self {
        let samplerate = f64::from(samplerate.max(1));
        let target = Coefficients::compute(filter_type, fres, q, gain, samplerate);
        Self {
            filter_type,
            samplerate,
            fres,
            q,
            gain,
            transition: DEFAULT_TRANSITION,
            from: target,
            target,
            ramp_pos: DEFAULT_TRANSITION,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Response shape.
    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// Cutoff after clamping.
    pub fn fres(&self) -> f64 {
        self.fres.clamp(MIN_FRES, MAX_FRES_RATIO * self.samplerate)
    }

    /// Set the glide length for future parameter changes.
    pub fn set_transition(&mut self, transition: usize) {
        self.transition = transition;
    }

    /// Change cutoff, quality and gain. Starts a glide when they differ.
    pub fn set_params(&mut self, fres: f64, q: f64, gain: f64) {
        if fres == self.fres && q == self.q && gain == self.gain {
            return;
        }
        self.fres = fres;
        self.q = q;
        self.gain = gain;
        self.retarget();
    }

    /// Change the sample rate, keeping the cutoff in Hz.
    pub fn set_samplerate(&mut self, samplerate: u32) {
        self.samplerate = f64::from(samplerate.max(1));
        self.retarget();
    }

    fn retarget(&mut self) {
        self.from = self.current();
        self.target = Coefficients::compute(self.filter_type, self.fres, self.q, self.gain, self.samplerate);
        self.ramp_pos = 0;
        if self.transition == 0 {
            self.from = self.target;
            self.ramp_pos = 0;
        }
    }

    fn current(&self) -> Coefficients {
        if self.transition == 0 || self.ramp_pos >= self.transition {
            self.target
        } else {
            self.from
                .lerp(&self.target, self.ramp_pos as f64 / self.transition as f64)
        }
    }

    /// Filter one sample.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let c = self.current();
        if self.ramp_pos < self.transition {
            self.ramp_pos += 1;
        }
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }

    /// Filter `buffer` in place.
    pub fn compute(&mut self, buffer: &mut SampleBuffer) {
        match buffer {
            SampleBuffer::Float(b) => {
                for s in b.iter_mut() {
                    *s = self.process(f64::from(*s)) as f32;
                }
            }
            SampleBuffer::Double(b) => {
                for s in b.iter_mut() {
                    *s = self.process(*s);
                }
            }
            other => {
                for i in 0..other.len() {
                    let out = self.process(other.sample(i));
                    other.set_sample(i, out);
                }
            }
        }
    }

    /// Clear the delay lines.
    pub fn clear(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

// --- Recalls ---

/// Port holding the cutoff frequency in Hz.
pub const CUTOFF: &str = "cutoff";
/// Port holding the filter quality.
pub const Q: &str = "q";
/// Port holding the passband gain.
pub const GAIN: &str = "gain";

fn filter_template(name: &str, behavior: FxFilter, cutoff: f32) -> Arc<Recall> {
    Recall::builder(name, RecallKind::Channel)
        .port(Port::new(CUTOFF, PortValue::Float(cutoff)).with_range(MIN_FRES, 22050.0))
        .port(Port::new(Q, PortValue::Float(0.707)).with_range(0.1, 20.0))
        .port(Port::new(GAIN, PortValue::Float(1.0)).with_range(0.0, 4.0))
        .behavior(behavior)
        .build()
}

/// Filter recall shared by [`FxLowPass`] and [`FxHighPass`].
///
/// Each instance keeps its own delay lines, so two runs on one channel never
/// share filter state.
#[derive(Debug, Clone)]
pub struct FxFilter {
    filter_type: FilterType,
    state: Option<IirFilterUtil>,
}

impl FxFilter {
    fn new(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            state: None,
        }
    }
}

impl RecallBehavior for FxFilter {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxFilter::new(self.filter_type))
    }

    fn run_inter(&mut self, recall: &Recall) -> Result<()> {
        let cutoff = f64::from(port_f32(recall, CUTOFF, 1000.0));
        let q = f64::from(port_f32(recall, Q, 0.707));
        let gain = f64::from(port_f32(recall, GAIN, 1.0));
        let Some(signal) = run_signal(recall) else {
            return Ok(());
        };
        let mut signal = signal.lock();
        let samplerate = signal.samplerate();
        let filter_type = self.filter_type;
        let state = self
            .state
            .get_or_insert_with(|| IirFilterUtil::new(filter_type, samplerate, cutoff, q, gain));
        state.set_params(cutoff, q, gain);
        if let Some(buffer) = signal.current_buffer_mut() {
            state.compute(buffer);
        }
        Ok(())
    }

    fn notify(&mut self, event: &RecallEvent) {
        if let (RecallEvent::Samplerate(rate), Some(state)) = (event, self.state.as_mut()) {
            state.set_samplerate(*rate);
        }
    }
}

/// Low-pass filter recall with `cutoff`, `q` and `gain` ports.
#[derive(Debug, Clone, Copy)]
pub struct FxLowPass;

impl FxLowPass {
    /// Channel-level template.
    pub fn template(cutoff: f32) -> Arc<Recall> {
        filter_template("fx-low-pass", FxFilter::new(FilterType::LowPass), cutoff)
    }
}

/// High-pass filter recall with `cutoff`, `q` and `gain` ports.
#[derive(Debug, Clone, Copy)]
pub struct FxHighPass;

impl FxHighPass {
    /// Channel-level template.
    pub fn template(cutoff: f32) -> Arc<Recall> {
        filter_template("fx-high-pass", FxFilter::new(FilterType::HighPass), cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / rate).sin()).collect()
    }

    fn rms(samples: &[f64]) -> f64 {
        (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
    }

    #[test]
    fn low_pass_attenuates_highs() {
        let mut filter = IirFilterUtil::new(FilterType::LowPass, 48000, 500.0, 0.707, 1.0);
        let out: Vec<f64> = sine(8000.0, 48000.0, 4800).into_iter().map(|s| filter.process(s)).collect();
        assert!(rms(&out[2400..]) < 0.05);

        let mut filter = IirFilterUtil::new(FilterType::LowPass, 48000, 5000.0, 0.707, 1.0);
        let out: Vec<f64> = sine(100.0, 48000.0, 4800).into_iter().map(|s| filter.process(s)).collect();
        assert!((rms(&out[2400..]) - core::f64::consts::FRAC_1_SQRT_2).abs() < 0.05);
    }

    #[test]
    fn high_pass_attenuates_lows() {
        let mut filter = IirFilterUtil::new(FilterType::HighPass, 48000, 5000.0, 0.707, 1.0);
        let out: Vec<f64> = sine(100.0, 48000.0, 4800).into_iter().map(|s| filter.process(s)).collect();
        assert!(rms(&out[2400..]) < 0.05);
    }

    #[test]
    fn cutoff_is_clamped() {
        let filter = IirFilterUtil::new(FilterType::LowPass, 48000, 1.0, 0.707, 1.0);
        assert_eq!(filter.fres(), MIN_FRES);
        let filter = IirFilterUtil::new(FilterType::LowPass, 48000, 30000.0, 0.707, 1.0);
        assert_eq!(filter.fres(), 0.45 * 48000.0);
    }

    #[test]
    fn coefficient_change_glides() {
        let mut filter = IirFilterUtil::new(FilterType::LowPass, 48000, 1000.0, 0.707, 1.0);
        filter.set_transition(4);
        let before = filter.current();
        filter.set_params(4000.0, 0.707, 1.0);
        assert_eq!(filter.current(), before);
        filter.process(0.0);
        filter.process(0.0);
        let mid = filter.current();
        assert_ne!(mid, before);
        assert_ne!(mid, filter.target);
        filter.process(0.0);
        filter.process(0.0);
        assert_eq!(filter.current(), filter.target);
    }

    #[test]
    fn low_pass_dc_gain_is_unity() {
        let c = Coefficients::compute(FilterType::LowPass, 1000.0, 0.707, 1.0, 48000.0);
        let dc = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
        assert!((dc - 1.0).abs() < 1e-9);
    }

    #[test]
    fn peak_boosts_centre_and_leaves_dc() {
        let c = Coefficients::compute(FilterType::Peak, 1000.0, 1.0, 4.0, 48000.0);
        let dc = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
        assert!((dc - 1.0).abs() < 1e-9);

        let mut filter = IirFilterUtil::new(FilterType::Peak, 48000, 1000.0, 1.0, 4.0);
        let out: Vec<f64> = sine(1000.0, 48000.0, 9600).into_iter().map(|s| filter.process(s)).collect();
        assert!((rms(&out[4800..]) / core::f64::consts::FRAC_1_SQRT_2 - 4.0).abs() < 0.1);
    }

    #[test]
    fn unity_peak_is_transparent() {
        let c = Coefficients::compute(FilterType::Peak, 2000.0, 1.4, 1.0, 48000.0);
        assert!((c.b0 - 1.0).abs() < 1e-12);
        assert!((c.b1 - c.a1).abs() < 1e-12);
        assert!((c.b2 - c.a2).abs() < 1e-12);
    }
}
