//! Notes and 256th-note timing.
//!
//! Note positions are kept in 256th-note units so timing stays independent of
//! the buffer size. [`NoteClock`] maps those positions onto frame offsets
//! inside the current buffer.

use serde::{Deserialize, Serialize};

/// 256th-note ticks per quarter note.
pub const TICKS_PER_QUARTER: u64 = 64;

/// A note event in 256th-note coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    /// Onset position.
    pub x0_256th: u64,
    /// Release position (exclusive).
    pub x1_256th: u64,
    /// MIDI key number.
    pub key: u8,
    /// MIDI velocity.
    pub velocity: u8,
}

impl Note {
    /// Create a note from key, velocity and 256th-note bounds.
    pub fn new(key: u8, velocity: u8, x0_256th: u64, x1_256th: u64) -> Self {
        Self {
            x0_256th,
            x1_256th: x1_256th.max(x0_256th),
            key,
            velocity,
        }
    }

    /// Length in 256th notes.
    pub fn duration_256th(&self) -> u64 {
        self.x1_256th - self.x0_256th
    }

    /// Equal-tempered frequency of the key (A4 = 440 Hz).
    pub fn frequency(&self) -> f64 {
        key_frequency(self.key)
    }

    /// Velocity scaled to `[0.0, 1.0]`.
    pub fn gain(&self) -> f64 {
        f64::from(self.velocity.min(127)) / 127.0
    }
}

/// Equal-tempered frequency of a MIDI key (A4 = 440 Hz).
pub fn key_frequency(key: u8) -> f64 {
    440.0 * 2f64.powf((f64::from(key) - 69.0) / 12.0)
}

/// Frame-accurate cursor over a 256th-note timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteClock {
    bpm: f64,
    samplerate: u32,
    buffer_size: usize,
    frame: u64,
}

impl NoteClock {
    /// Create a clock at frame zero.
    pub fn new(bpm: f64, samplerate: u32, buffer_size: usize) -> Self {
        Self {
            bpm: if bpm > 0.0 { bpm } else { 120.0 },
            samplerate: samplerate.max(1),
            buffer_size: buffer_size.max(1),
            frame: 0,
        }
    }

    /// Frames per 256th note at the current tempo.
    pub fn frames_per_256th(&self) -> f64 {
        f64::from(self.samplerate) * 60.0 / self.bpm / TICKS_PER_QUARTER as f64
    }

    /// Frame at which `x_256th` starts.
    pub fn frame_of(&self, x_256th: u64) -> u64 {
        (x_256th as f64 * self.frames_per_256th()).round() as u64
    }

    /// 256th-note position of the first frame of the current buffer.
    pub fn offset_256th(&self) -> u64 {
        (self.frame as f64 / self.frames_per_256th()).floor() as u64
    }

    /// First frame of the current buffer.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Frame offset of `x_256th` inside the current buffer, if it falls there.
    pub fn offset_in_buffer(&self, x_256th: u64) -> Option<usize> {
        let at = self.frame_of(x_256th);
        let end = self.frame + self.buffer_size as u64;
        (self.frame..end)
            .contains(&at)
            .then(|| (at - self.frame) as usize)
    }

    /// Number of buffers needed to hold `note` from onset to release.
    pub fn buffers_for(&self, note: &Note) -> usize {
        let frames = self.frame_of(note.x1_256th) - self.frame_of(note.x0_256th);
        (frames as usize).div_ceil(self.buffer_size).max(1)
    }

    /// Move to the next buffer.
    pub fn advance(&mut self) {
        self.frame += self.buffer_size as u64;
    }

    /// Change tempo, keeping the frame position.
    pub fn set_bpm(&mut self, bpm: f64) {
        if bpm > 0.0 {
            self.bpm = bpm;
        }
    }
}
