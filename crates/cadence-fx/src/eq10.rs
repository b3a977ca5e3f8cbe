//! Ten band graphic equalizer.
//!
//! One peaking biquad per octave band from 28 Hz to 14336 Hz, in series,
//! followed by a `pressure` gain. Band gains are linear: 1.0 leaves the band
//! untouched, 2.0 doubles its amplitude at the centre frequency.

use crate::iir_filter::{FilterType, IirFilterUtil};
use crate::signal::{port_f32, run_signal};
use cadence_core::{
    Port, PortValue, Recall, RecallBehavior, RecallEvent, RecallKind, Result, SampleBuffer,
};
use std::sync::Arc;

/// Centre frequencies in Hz.
pub const EQ10_BANDS: [f64; 10] = [
    28.0, 56.0, 112.0, 224.0, 448.0, 896.0, 1792.0, 3584.0, 7168.0, 14336.0,
];

/// Quality giving each band one octave of bandwidth.
pub const EQ10_Q: f64 = core::f64::consts::SQRT_2;

/// Series of ten peaking bands and an output gain.
#[derive(Debug, Clone)]
pub struct Eq10Util {
    bands: Vec<IirFilterUtil>,
    gains: [f64; 10],
    /// Output gain applied after the bands.
    pub pressure: f64,
}

impl Eq10Util {
    /// Flat equalizer at `samplerate`.
    pub fn new(samplerate: u32) -> Self {
        let bands = EQ10_BANDS
            .iter()
            .map(|&fres| {
                let mut band = IirFilterUtil::new(FilterType::Peak, samplerate, fres, EQ10_Q, 1.0);
                band.set_transition(0);
                band
            })
            .collect();
        Self {
            bands,
            gains: [1.0; 10],
            pressure: 1.0,
        }
    }

    /// Current band gains.
    pub fn gains(&self) -> [f64; 10] {
        self.gains
    }

    /// Set the gain of every band. Unchanged bands keep their state.
    pub fn set_gains(&mut self, gains: [f64; 10]) {
        for ((band, &fres), (&gain, current)) in self
            .bands
            .iter_mut()
            .zip(EQ10_BANDS.iter())
            .zip(gains.iter().zip(self.gains.iter_mut()))
        {
            if gain != *current {
                band.set_params(fres, EQ10_Q, gain);
                *current = gain;
            }
        }
    }

    /// Change the sample rate of every band.
    pub fn set_samplerate(&mut self, samplerate: u32) {
        for band in &mut self.bands {
            band.set_samplerate(samplerate);
        }
    }

    /// Process one sample.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        self.bands.iter_mut().fold(input, |x, band| band.process(x)) * self.pressure
    }

    /// Equalize `buffer` in place.
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
}

/// Equalizer recall with one `peak-<freq>hz` port per band and `pressure`.
#[derive(Debug, Default, Clone)]
pub struct FxEq10 {
    state: Option<Eq10Util>,
}

impl FxEq10 {
    /// Band gain ports, in [`EQ10_BANDS`] order.
    pub const PEAKS: [&'static str; 10] = [
        "peak-28hz",
        "peak-56hz",
        "peak-112hz",
        "peak-224hz",
        "peak-448hz",
        "peak-896hz",
        "peak-1792hz",
        "peak-3584hz",
        "peak-7168hz",
        "peak-14336hz",
    ];
    /// Port holding the output gain.
    pub const PRESSURE: &'static str = "pressure";

    /// Channel-level template, flat.
    pub fn template() -> Arc<Recall> {
        let builder = Self::PEAKS.iter().fold(
            Recall::builder("fx-eq10", RecallKind::Channel),
            |builder, peak| builder.port(Port::new(*peak, PortValue::Float(1.0)).with_range(0.0, 4.0)),
        );
        builder
            .port(Port::new(Self::PRESSURE, PortValue::Float(1.0)).with_range(0.0, 2.0))
            .behavior(FxEq10::default())
            .build()
    }
}

impl RecallBehavior for FxEq10 {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxEq10::default())
    }

    fn run_inter(&mut self, recall: &Recall) -> Result<()> {
        let mut gains = [1.0; 10];
        for (gain, peak) in gains.iter_mut().zip(Self::PEAKS) {
            *gain = f64::from(port_f32(recall, peak, 1.0));
        }
        let pressure = f64::from(port_f32(recall, Self::PRESSURE, 1.0));
        let Some(signal) = run_signal(recall) else {
            return Ok(());
        };
        let mut signal = signal.lock();
        let samplerate = signal.samplerate();
        let eq = self.state.get_or_insert_with(|| Eq10Util::new(samplerate));
        eq.set_gains(gains);
        eq.pressure = pressure;
        if let Some(buffer) = signal.current_buffer_mut() {
            eq.compute(buffer);
        }
        Ok(())
    }

    fn notify(&mut self, event: &RecallEvent) {
        if let (RecallEvent::Samplerate(rate), Some(eq)) = (event, self.state.as_mut()) {
            eq.set_samplerate(*rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f64::consts::PI;

    fn tone_rms(eq: &mut Eq10Util, freq: f64) -> f64 {
        let n = 19200;
        let out: Vec<f64> = (0..n)
            .map(|i| eq.process((2.0 * PI * freq * i as f64 / 48000.0).sin()))
            .collect();
        let tail = &out[n / 2..];
        (tail.iter().map(|s| s * s).sum::<f64>() / tail.len() as f64).sqrt()
    }

    #[test]
    fn flat_eq_passes_tones() {
        let mut eq = Eq10Util::new(48000);
        for freq in [100.0, 1000.0, 5000.0] {
            let rms = tone_rms(&mut eq, freq);
            assert!((rms - core::f64::consts::FRAC_1_SQRT_2).abs() < 0.01, "{freq}: {rms}");
        }
    }

    #[test]
    fn boosted_band_is_louder_than_neighbours() {
        let mut gains = [1.0; 10];
        gains[5] = 3.0;
        let mut boosted = Eq10Util::new(48000);
        boosted.set_gains(gains);
        let centre = tone_rms(&mut boosted, 896.0);
        let mut boosted = Eq10Util::new(48000);
        boosted.set_gains(gains);
        let far = tone_rms(&mut boosted, 7168.0);
        assert!(centre > 1.5, "{centre}");
        assert!((far - core::f64::consts::FRAC_1_SQRT_2).abs() < 0.1, "{far}");
    }

    #[test]
    fn pressure_scales_output() {
        let mut eq = Eq10Util::new(48000);
        eq.pressure = 0.5;
        assert!((eq.process(0.8) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn template_has_a_port_per_band() {
        let template = FxEq10::template();
        for peak in FxEq10::PEAKS {
            assert_eq!(template.port(peak).unwrap().get_f32(), 1.0);
        }
        assert_eq!(template.port(FxEq10::PRESSURE).unwrap().get_f32(), 1.0);
    }
}
