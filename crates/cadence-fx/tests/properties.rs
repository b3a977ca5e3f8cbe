//! Property-based tests for cadence-fx utilities.
//!
//! Checks saturation, filter stability and sample-player bounds with
//! proptest.

use cadence_core::SampleBuffer;
use cadence_fx::{FilterType, IirFilterUtil, Sf2Sample, Sf2SynthUtil, VolumeUtil};
use proptest::prelude::*;
use std::sync::Arc;

fn looped_sample() -> impl Strategy<Value = Sf2Sample> {
    prop::collection::vec(-1.0f32..=1.0, 4..64).prop_flat_map(|data| {
        let len = data.len();
        (Just(data), 0..len - 1).prop_flat_map(move |(data, start)| {
            (Just(data), Just(start), start + 1..=len).prop_map(|(data, start, end)| {
                Sf2Sample {
                    name: "prop".to_string(),
                    data,
                    root_key: 60,
                    loop_start: start,
                    loop_end: end,
                    samplerate: 48000,
                }
            })
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Any gain on 16-bit samples saturates at full scale.
    #[test]
    fn volume_saturates_s16(
        samples in prop::collection::vec(any::<i16>(), 1..128),
        volume in 0.0f64..8.0,
    ) {
        let mut buffer = SampleBuffer::S16(samples);
        VolumeUtil::new(volume).compute(&mut buffer);
        let SampleBuffer::S16(out) = buffer else {
            panic!("format changed");
        };
        prop_assert!(out.iter().all(|s| s.unsigned_abs() <= 32767));
    }

    /// Bounded input through either filter type stays finite and bounded.
    #[test]
    fn filter_is_stable(
        input in prop::collection::vec(-1.0f64..=1.0, 64..512),
        cutoff in 1.0f64..30000.0,
        q in 0.3f64..4.0,
        high in any::<bool>(),
    ) {
        let filter_type = if high { FilterType::HighPass } else { FilterType::LowPass };
        let mut filter = IirFilterUtil::new(filter_type, 48000, cutoff, q, 1.0);
        for x in input {
            let y = filter.process(x);
            prop_assert!(y.is_finite());
            prop_assert!(y.abs() < 64.0, "runaway output {}", y);
        }
    }

    /// A looping voice never runs out and never exceeds its data's range.
    #[test]
    fn looped_voice_stays_in_range(sample in looped_sample(), key in 24u8..108) {
        let peak = sample.data.iter().fold(0.0f64, |m, s| m.max(f64::from(s.abs())));
        let mut voice = Sf2SynthUtil::new(Arc::new(sample), key, 48000);
        for _ in 0..1000 {
            let out = voice.next_sample();
            prop_assert!(out.abs() <= peak + 1e-6);
        }
        prop_assert!(!voice.is_finished());
    }

    /// A released voice is silent after its fade.
    #[test]
    fn release_finishes_within_fade(sample in looped_sample(), frames in 1usize..256) {
        let mut voice = Sf2SynthUtil::new(Arc::new(sample), 60, 48000);
        voice.release(frames);
        for _ in 0..=frames {
            voice.next_sample();
        }
        prop_assert!(voice.is_finished());
        prop_assert_eq!(voice.next_sample(), 0.0);
    }
}
