//! Sample formats and format-tagged sample buffers.
//!
//! Every buffer in the graph carries one of eight storage formats. Processing
//! code dispatches on [`SampleBuffer`] with an explicit `match` per variant so
//! the real-time path never goes through a vtable for per-sample work.
//!
//! Integer formats are normalized to `[-1.0, 1.0]` when read through
//! [`SampleBuffer::sample`] and clipped when written back through
//! [`SampleBuffer::set_sample`].
//!
//! # Example
//!
//! ```rust
//! use cadence_core::{SampleBuffer, SampleFormat};
//!
//! let mut buffer = SampleBuffer::new(SampleFormat::Signed16, 4);
//! buffer.set_sample(0, 0.5);
//! assert!((buffer.sample(0) - 0.5).abs() < 1e-4);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Storage format of a sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 8 bit integer.
    #[serde(rename = "s8")]
    Signed8,
    /// Signed 16 bit integer.
    #[default]
    #[serde(rename = "s16")]
    Signed16,
    /// Signed 24 bit integer stored in 32 bits.
    #[serde(rename = "s24")]
    Signed24,
    /// Signed 32 bit integer.
    #[serde(rename = "s32")]
    Signed32,
    /// Signed 64 bit integer.
    #[serde(rename = "s64")]
    Signed64,
    /// 32 bit IEEE float.
    #[serde(rename = "float")]
    Float,
    /// 64 bit IEEE float.
    #[serde(rename = "double")]
    Double,
    /// Complex pairs of 32 bit floats.
    #[serde(rename = "complex")]
    Complex,
}

impl SampleFormat {
    /// All formats, in declaration order.
    pub const ALL: [SampleFormat; 8] = [
        SampleFormat::Signed8,
        SampleFormat::Signed16,
        SampleFormat::Signed24,
        SampleFormat::Signed32,
        SampleFormat::Signed64,
        SampleFormat::Float,
        SampleFormat::Double,
        SampleFormat::Complex,
    ];

    /// Bytes used to store one sample.
    pub const fn word_size(self) -> usize {
        match self {
            SampleFormat::Signed8 => 1,
            SampleFormat::Signed16 => 2,
            SampleFormat::Signed24 | SampleFormat::Signed32 | SampleFormat::Float => 4,
            SampleFormat::Signed64 | SampleFormat::Double | SampleFormat::Complex => 8,
        }
    }

    /// Full-scale value of integer formats, `1.0` for floating formats.
    pub const fn full_scale(self) -> f64 {
        match self {
            SampleFormat::Signed8 => 127.0,
            SampleFormat::Signed16 => 32767.0,
            SampleFormat::Signed24 => 8_388_607.0,
            SampleFormat::Signed32 => 2_147_483_647.0,
            SampleFormat::Signed64 => 9_223_372_036_854_775_807.0,
            SampleFormat::Float | SampleFormat::Double | SampleFormat::Complex => 1.0,
        }
    }

    /// Whether the format stores integers.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            SampleFormat::Signed8
                | SampleFormat::Signed16
                | SampleFormat::Signed24
                | SampleFormat::Signed32
                | SampleFormat::Signed64
        )
    }

    /// Short lowercase name, as used in configuration files.
    pub const fn name(self) -> &'static str {
        match self {
            SampleFormat::Signed8 => "s8",
            SampleFormat::Signed16 => "s16",
            SampleFormat::Signed24 => "s24",
            SampleFormat::Signed32 => "s32",
            SampleFormat::Signed64 => "s64",
            SampleFormat::Float => "float",
            SampleFormat::Double => "double",
            SampleFormat::Complex => "complex",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown format name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sample format: {0}")]
pub struct ParseFormatError(pub String);

impl FromStr for SampleFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SampleFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseFormatError(s.to_string()))
    }
}

/// One complex sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex32 {
    /// Real part.
    pub re: f32,
    /// Imaginary part.
    pub im: f32,
}

impl Complex32 {
    /// Create a complex sample.
    pub const fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }
}

/// A buffer of samples in one concrete storage format.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    /// Signed 8 bit samples.
    S8(Vec<i8>),
    /// Signed 16 bit samples.
    S16(Vec<i16>),
    /// Signed 24 bit samples (stored in the low 24 bits).
    S24(Vec<i32>),
    /// Signed 32 bit samples.
    S32(Vec<i32>),
    /// Signed 64 bit samples.
    S64(Vec<i64>),
    /// 32 bit float samples.
    Float(Vec<f32>),
    /// 64 bit float samples.
    Double(Vec<f64>),
    /// Complex samples.
    Complex(Vec<Complex32>),
}

#[inline]
fn quantize(value: f64, full_scale: f64) -> f64 {
    (value.clamp(-1.0, 1.0) * full_scale).round()
}

impl SampleBuffer {
    /// Allocate a zeroed buffer of `len` samples.
    pub fn new(format: SampleFormat, len: usize) -> Self {
        match format {
            SampleFormat::Signed8 => SampleBuffer::S8(vec![0; len]),
            SampleFormat::Signed16 => SampleBuffer::S16(vec![0; len]),
            SampleFormat::Signed24 => SampleBuffer::S24(vec![0; len]),
            SampleFormat::Signed32 => SampleBuffer::S32(vec![0; len]),
            SampleFormat::Signed64 => SampleBuffer::S64(vec![0; len]),
            SampleFormat::Float => SampleBuffer::Float(vec![0.0; len]),
            SampleFormat::Double => SampleBuffer::Double(vec![0.0; len]),
            SampleFormat::Complex => SampleBuffer::Complex(vec![Complex32::default(); len]),
        }
    }

    /// Build a buffer from normalized samples.
    pub fn from_samples(format: SampleFormat, samples: &[f64]) -> Self {
        let mut buffer = Self::new(format, samples.len());
        for (i, &s) in samples.iter().enumerate() {
            buffer.set_sample(i, s);
        }
        buffer
    }

    /// Storage format of this buffer.
    pub fn format(&self) -> SampleFormat {
        match self {
            SampleBuffer::S8(_) => SampleFormat::Signed8,
            SampleBuffer::S16(_) => SampleFormat::Signed16,
            SampleBuffer::S24(_) => SampleFormat::Signed24,
            SampleBuffer::S32(_) => SampleFormat::Signed32,
            SampleBuffer::S64(_) => SampleFormat::Signed64,
            SampleBuffer::Float(_) => SampleFormat::Float,
            SampleBuffer::Double(_) => SampleFormat::Double,
            SampleBuffer::Complex(_) => SampleFormat::Complex,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::S8(b) => b.len(),
            SampleBuffer::S16(b) => b.len(),
            SampleBuffer::S24(b) | SampleBuffer::S32(b) => b.len(),
            SampleBuffer::S64(b) => b.len(),
            SampleBuffer::Float(b) => b.len(),
            SampleBuffer::Double(b) => b.len(),
            SampleBuffer::Complex(b) => b.len(),
        }
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero every sample.
    pub fn clear(&mut self) {
        match self {
            SampleBuffer::S8(b) => b.fill(0),
            SampleBuffer::S16(b) => b.fill(0),
            SampleBuffer::S24(b) | SampleBuffer::S32(b) => b.fill(0),
            SampleBuffer::S64(b) => b.fill(0),
            SampleBuffer::Float(b) => b.fill(0.0),
            SampleBuffer::Double(b) => b.fill(0.0),
            SampleBuffer::Complex(b) => b.fill(Complex32::default()),
        }
    }

    /// Grow (zero-filled) or truncate to `len` samples.
    pub fn resize(&mut self, len: usize) {
        match self {
            SampleBuffer::S8(b) => b.resize(len, 0),
            SampleBuffer::S16(b) => b.resize(len, 0),
            SampleBuffer::S24(b) | SampleBuffer::S32(b) => b.resize(len, 0),
            SampleBuffer::S64(b) => b.resize(len, 0),
            SampleBuffer::Float(b) => b.resize(len, 0.0),
            SampleBuffer::Double(b) => b.resize(len, 0.0),
            SampleBuffer::Complex(b) => b.resize(len, Complex32::default()),
        }
    }

    /// Read sample `i` normalized to `[-1.0, 1.0]` (complex: real part).
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[inline]
    pub fn sample(&self, i: usize) -> f64 {
        match self {
            SampleBuffer::S8(b) => b[i] as f64 / SampleFormat::Signed8.full_scale(),
            SampleBuffer::S16(b) => b[i] as f64 / SampleFormat::Signed16.full_scale(),
            SampleBuffer::S24(b) => b[i] as f64 / SampleFormat::Signed24.full_scale(),
            SampleBuffer::S32(b) => b[i] as f64 / SampleFormat::Signed32.full_scale(),
            SampleBuffer::S64(b) => b[i] as f64 / SampleFormat::Signed64.full_scale(),
            SampleBuffer::Float(b) => b[i] as f64,
            SampleBuffer::Double(b) => b[i],
            SampleBuffer::Complex(b) => b[i].re as f64,
        }
    }

    /// Write a normalized sample at `i`, clipping integer formats.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[inline]
    pub fn set_sample(&mut self, i: usize, value: f64) {
        match self {
            SampleBuffer::S8(b) => b[i] = quantize(value, SampleFormat::Signed8.full_scale()) as i8,
            SampleBuffer::S16(b) => {
                b[i] = quantize(value, SampleFormat::Signed16.full_scale()) as i16;
            }
            SampleBuffer::S24(b) => {
                b[i] = quantize(value, SampleFormat::Signed24.full_scale()) as i32;
            }
            SampleBuffer::S32(b) => {
                b[i] = quantize(value, SampleFormat::Signed32.full_scale()) as i32;
            }
            SampleBuffer::S64(b) => {
                b[i] = quantize(value, SampleFormat::Signed64.full_scale()) as i64;
            }
            SampleBuffer::Float(b) => b[i] = value as f32,
            SampleBuffer::Double(b) => b[i] = value,
            SampleBuffer::Complex(b) => b[i] = Complex32::new(value as f32, 0.0),
        }
    }

    /// Whether any sample inside `range` is non-zero.
    pub fn has_signal_in(&self, range: Range<usize>) -> bool {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        match self {
            SampleBuffer::S8(b) => b[start..end].iter().any(|&s| s != 0),
            SampleBuffer::S16(b) => b[start..end].iter().any(|&s| s != 0),
            SampleBuffer::S24(b) | SampleBuffer::S32(b) => b[start..end].iter().any(|&s| s != 0),
            SampleBuffer::S64(b) => b[start..end].iter().any(|&s| s != 0),
            SampleBuffer::Float(b) => b[start..end].iter().any(|&s| s != 0.0),
            SampleBuffer::Double(b) => b[start..end].iter().any(|&s| s != 0.0),
            SampleBuffer::Complex(b) => b[start..end].iter().any(|s| s.re != 0.0 || s.im != 0.0),
        }
    }

    /// Copy `other` into `self`, converting formats. Copies the common prefix.
    pub fn copy_from(&mut self, other: &SampleBuffer) {
        let n = self.len().min(other.len());
        match (self, other) {
            (SampleBuffer::S8(dst), SampleBuffer::S8(src)) => dst[..n].copy_from_slice(&src[..n]),
            (SampleBuffer::S16(dst), SampleBuffer::S16(src)) => {
                dst[..n].copy_from_slice(&src[..n]);
            }
            (SampleBuffer::S24(dst), SampleBuffer::S24(src))
            | (SampleBuffer::S32(dst), SampleBuffer::S32(src)) => {
                dst[..n].copy_from_slice(&src[..n]);
            }
            (SampleBuffer::S64(dst), SampleBuffer::S64(src)) => {
                dst[..n].copy_from_slice(&src[..n]);
            }
            (SampleBuffer::Float(dst), SampleBuffer::Float(src)) => {
                dst[..n].copy_from_slice(&src[..n]);
            }
            (SampleBuffer::Double(dst), SampleBuffer::Double(src)) => {
                dst[..n].copy_from_slice(&src[..n]);
            }
            (SampleBuffer::Complex(dst), SampleBuffer::Complex(src)) => {
                dst[..n].copy_from_slice(&src[..n]);
            }
            (dst, src) => {
                for i in 0..n {
                    dst.set_sample(i, src.sample(i));
                }
            }
        }
    }

    /// Mix `other` into `self` sample by sample, clipping integer formats.
    pub fn add_from(&mut self, other: &SampleBuffer) {
        let n = self.len().min(other.len());
        match (self, other) {
            (SampleBuffer::Float(dst), SampleBuffer::Float(src)) => {
                for (d, s) in dst[..n].iter_mut().zip(&src[..n]) {
                    *d += *s;
                }
            }
            (SampleBuffer::Double(dst), SampleBuffer::Double(src)) => {
                for (d, s) in dst[..n].iter_mut().zip(&src[..n]) {
                    *d += *s;
                }
            }
            (SampleBuffer::S16(dst), SampleBuffer::S16(src)) => {
                for (d, s) in dst[..n].iter_mut().zip(&src[..n]) {
                    *d = d.saturating_add(*s);
                }
            }
            (dst, src) => {
                for i in 0..n {
                    let mixed = dst.sample(i) + src.sample(i);
                    dst.set_sample(i, mixed);
                }
            }
        }
    }

    /// Copy all samples out as normalized `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.sample(i)).collect()
    }

    /// Write normalized samples into every `stride`-th slot of `out`, starting at `offset`.
    ///
    /// Used to interleave one line into a soundcard buffer. Stops at whichever of
    /// the two buffers runs out first.
    pub fn write_interleaved(&self, out: &mut [f32], offset: usize, stride: usize) {
        let stride = stride.max(1);
        for (i, slot) in out.iter_mut().skip(offset).step_by(stride).enumerate() {
            if i >= self.len() {
                break;
            }
            *slot += self.sample(i) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse_roundtrip_names() {
        for format in SampleFormat::ALL {
            assert_eq!(format.name().parse::<SampleFormat>(), Ok(format));
        }
        assert!("s12".parse::<SampleFormat>().is_err());
    }

    #[test]
    fn test_word_size() {
        assert_eq!(SampleFormat::Signed8.word_size(), 1);
        assert_eq!(SampleFormat::Signed24.word_size(), 4);
        assert_eq!(SampleFormat::Complex.word_size(), 8);
    }

    #[test]
    fn test_integer_clipping() {
        let mut buffer = SampleBuffer::new(SampleFormat::Signed16, 2);
        buffer.set_sample(0, 3.0);
        buffer.set_sample(1, -3.0);
        assert_eq!(buffer, SampleBuffer::S16(vec![32767, -32767]));
    }

    #[test]
    fn test_copy_converts_formats() {
        let src = SampleBuffer::from_samples(SampleFormat::Float, &[0.5, -0.25, 1.0]);
        let mut dst = SampleBuffer::new(SampleFormat::Signed24, 3);
        dst.copy_from(&src);
        assert!((dst.sample(0) - 0.5).abs() < 1e-6);
        assert!((dst.sample(1) + 0.25).abs() < 1e-6);
        assert!((dst.sample(2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_copy_shorter_source() {
        let src = SampleBuffer::from_samples(SampleFormat::Double, &[0.5]);
        let mut dst = SampleBuffer::from_samples(SampleFormat::Double, &[0.1, 0.2]);
        dst.copy_from(&src);
        assert_eq!(dst, SampleBuffer::Double(vec![0.5, 0.2]));
    }

    #[test]
    fn test_add_from_saturates_s16() {
        let mut dst = SampleBuffer::S16(vec![30000, -5]);
        dst.add_from(&SampleBuffer::S16(vec![10000, 5]));
        assert_eq!(dst, SampleBuffer::S16(vec![i16::MAX, 0]));
    }

    #[test]
    fn test_has_signal_in_range() {
        let mut buffer = SampleBuffer::new(SampleFormat::Signed32, 8);
        assert!(!buffer.has_signal_in(0..8));
        buffer.set_sample(6, 0.1);
        assert!(!buffer.has_signal_in(0..4));
        assert!(buffer.has_signal_in(4..8));
        assert!(buffer.has_signal_in(4..100));
    }

    #[test]
    fn test_write_interleaved() {
        let buffer = SampleBuffer::from_samples(SampleFormat::Float, &[0.5, 0.25]);
        let mut out = [0.0f32; 4];
        buffer.write_interleaved(&mut out, 1, 2);
        assert_eq!(out, [0.0, 0.5, 0.0, 0.25]);
    }

    #[test]
    fn test_complex_reads_real_part() {
        let buffer = SampleBuffer::Complex(vec![Complex32::new(0.75, 0.1)]);
        assert!((buffer.sample(0) - 0.75).abs() < 1e-6);
    }
}
