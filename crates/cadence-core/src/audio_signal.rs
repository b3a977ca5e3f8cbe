//! Buffered PCM streams flowing through a recycling.
//!
//! An [`AudioSignal`] owns a time-ordered list of fixed-size
//! [`SampleBuffer`]s (its *stream*) plus a cursor to the buffer being
//! processed this tic. The cursor only moves forward; once it runs off the
//! end the signal is exhausted and its run finishes.
//!
//! # Architecture
//!
//! ```text
//!  stream:  [buf 0] [buf 1] [buf 2] [buf 3]
//!                       ^
//!                    current   (None once past buf 3)
//! ```
//!
//! Signals are shared as [`SharedSignal`] (`Arc<Mutex<AudioSignal>>`) because a
//! signal may be the source of one recall chain and the destination of
//! another. Once linked into a [`Recycling`] the recycling owns it; removal
//! hands it to the destroy worker instead of freeing it on the audio thread.
//!
//! # Example
//!
//! ```rust
//! use cadence_core::{AudioSignal, SampleFormat};
//!
//! let mut signal = AudioSignal::new(48000, 256, SampleFormat::Float);
//! signal.stream_resize(4);
//! assert_eq!(signal.length(), 4);
//! while signal.next_buffer() {}
//! assert!(signal.is_exhausted());
//! ```

use crate::format::{SampleBuffer, SampleFormat};
use crate::id::next_id;
use crate::note::Note;
use crate::recall_id::RecallId;
use crate::recycling::Recycling;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Shared handle to an audio signal.
pub type SharedSignal = Arc<Mutex<AudioSignal>>;

/// Role bits of an audio signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalFlags(u32);

impl SignalFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Template signal: source material copied into per-run signals.
    pub const TEMPLATE: Self = Self(1 << 0);
    /// Real-time template used by live input.
    pub const RT_TEMPLATE: Self = Self(1 << 1);
    /// Master signal that sinks mix into.
    pub const MASTER: Self = Self(1 << 2);
    /// Signal fed continuously rather than pre-rendered.
    pub const FEED: Self = Self(1 << 3);
    /// Signal created by recycling a finished one.
    pub const RECYCLED: Self = Self(1 << 4);
    /// Signal is being streamed to the soundcard.
    pub const STREAM: Self = Self(1 << 5);

    /// Returns `true` if all bits in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of two flag sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns `self` without the bits in `other`.
    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// A stream of sample buffers for one voice run.
#[derive(Debug)]
pub struct AudioSignal {
    id: u64,
    flags: SignalFlags,
    samplerate: u32,
    buffer_size: usize,
    format: SampleFormat,
    stream: Vec<SampleBuffer>,
    current: Option<usize>,
    recycling: Weak<Recycling>,
    recall_id: Option<Arc<RecallId>>,
    note: Option<Note>,
    /// Frames of pre-delay before the signal starts sounding.
    pub delay: f64,
    /// Frame offset of the onset inside the first buffer.
    pub attack: usize,
    /// Loop start frame for sample playback.
    pub loop_start: u64,
    /// Loop end frame for sample playback.
    pub loop_end: u64,
}

impl AudioSignal {
    /// Create a signal with an empty stream.
    pub fn new(samplerate: u32, buffer_size: usize, format: SampleFormat) -> Self {
        Self {
            id: next_id(),
            flags: SignalFlags::NONE,
            samplerate,
            buffer_size,
            format,
            stream: Vec::new(),
            current: None,
            recycling: Weak::new(),
            recall_id: None,
            note: None,
            delay: 0.0,
            attack: 0,
            loop_start: 0,
            loop_end: 0,
        }
    }

    /// Bind the signal to a run.
    pub fn with_recall_id(mut self, recall_id: Arc<RecallId>) -> Self {
        self.recall_id = Some(recall_id);
        self
    }

    /// Attach the note that triggered the signal.
    pub fn with_note(mut self, note: Note) -> Self {
        self.note = Some(note);
        self
    }

    /// Set role flags.
    pub fn with_flags(mut self, flags: SignalFlags) -> Self {
        self.flags = self.flags.union(flags);
        self
    }

    /// Wrap into a shared handle.
    pub fn into_shared(self) -> SharedSignal {
        Arc::new(Mutex::new(self))
    }

    // --- Accessors ---

    /// Identifier used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Role flags.
    pub fn flags(&self) -> SignalFlags {
        self.flags
    }

    /// Add role flags.
    pub fn set_flags(&mut self, flags: SignalFlags) {
        self.flags = self.flags.union(flags);
    }

    /// Remove role flags.
    pub fn unset_flags(&mut self, flags: SignalFlags) {
        self.flags = self.flags.difference(flags);
    }

    /// Whether this is a template signal.
    pub fn is_template(&self) -> bool {
        self.flags.contains(SignalFlags::TEMPLATE)
    }

    /// Sample rate in Hz.
    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }

    /// Frames per buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Storage format.
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// The run this signal belongs to.
    pub fn recall_id(&self) -> Option<&Arc<RecallId>> {
        self.recall_id.as_ref()
    }

    /// Rebind the signal to a run.
    pub fn set_recall_id(&mut self, recall_id: Option<Arc<RecallId>>) {
        self.recall_id = recall_id;
    }

    /// The triggering note, if any.
    pub fn note(&self) -> Option<&Note> {
        self.note.as_ref()
    }

    /// The owning recycling, if linked.
    pub fn recycling(&self) -> Option<Arc<Recycling>> {
        self.recycling.upgrade()
    }

    pub(crate) fn set_recycling(&mut self, recycling: Weak<Recycling>) {
        self.recycling = recycling;
    }

    // --- Stream management ---

    /// Number of buffers in the stream.
    pub fn length(&self) -> usize {
        self.stream.len()
    }

    /// Number of buffers before the current one (the full length once exhausted).
    pub fn length_till_current(&self) -> usize {
        self.current.unwrap_or(self.stream.len())
    }

    /// Index of the current buffer.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// All buffers.
    pub fn stream(&self) -> &[SampleBuffer] {
        &self.stream
    }

    /// Buffer at `index`.
    pub fn buffer(&self, index: usize) -> Option<&SampleBuffer> {
        self.stream.get(index)
    }

    /// Mutable buffer at `index`.
    pub fn buffer_mut(&mut self, index: usize) -> Option<&mut SampleBuffer> {
        self.stream.get_mut(index)
    }

    /// The buffer processed this tic.
    pub fn current_buffer(&self) -> Option<&SampleBuffer> {
        self.current.and_then(|i| self.stream.get(i))
    }

    /// Mutable view of the buffer processed this tic.
    pub fn current_buffer_mut(&mut self) -> Option<&mut SampleBuffer> {
        self.current.and_then(|i| self.stream.get_mut(i))
    }

    /// The final buffer of the stream.
    pub fn last_buffer(&self) -> Option<&SampleBuffer> {
        self.stream.last()
    }

    /// Append one zeroed buffer. Sets the cursor if the stream was empty.
    pub fn add_stream(&mut self) {
        self.stream.push(SampleBuffer::new(self.format, self.buffer_size));
        if self.stream.len() == 1 {
            self.current = Some(0);
        }
    }

    /// Grow by appending zeroed buffers or shrink by truncating.
    ///
    /// Shrinking at or below the cursor leaves the signal exhausted.
    pub fn stream_resize(&mut self, length: usize) {
        let old = self.stream.len();
        if length > old {
            for _ in old..length {
                self.add_stream();
            }
        } else if length < old {
            self.stream.truncate(length);
            if self.current.is_some_and(|c| c >= length) {
                self.current = None;
            }
        }
    }

    /// Resize without dropping the current buffer or anything before it.
    pub fn stream_safe_resize(&mut self, length: usize) {
        let keep = match self.current {
            Some(current) => current + 1,
            None => self.stream.len(),
        };
        self.stream_resize(length.max(keep));
    }

    /// Replace the stream with a copy of `template`'s, converting format.
    ///
    /// The cursor is reset to the first buffer.
    pub fn duplicate_stream(&mut self, template: &AudioSignal) {
        let frames = template.flatten();
        let frames = if template.samplerate != self.samplerate && template.samplerate > 0 {
            resample_linear(&frames, template.samplerate, self.samplerate)
        } else {
            frames
        };
        self.stream = chunk_frames(&frames, self.format, self.buffer_size);
        self.current = if self.stream.is_empty() { None } else { Some(0) };
    }

    /// Change the buffer size, re-chunking existing audio.
    pub fn realloc_buffer_size(&mut self, buffer_size: usize) {
        if buffer_size == 0 || buffer_size == self.buffer_size {
            return;
        }
        let cursor_frame = self.current.map(|c| c * self.buffer_size);
        let frames = self.flatten();
        self.buffer_size = buffer_size;
        self.stream = chunk_frames(&frames, self.format, buffer_size);
        self.current = cursor_frame
            .map(|frame| frame / buffer_size)
            .filter(|&c| c < self.stream.len());
    }

    /// Change the sample rate, resampling existing audio.
    pub fn set_samplerate(&mut self, samplerate: u32) {
        if samplerate == 0 || samplerate == self.samplerate {
            return;
        }
        let frames = resample_linear(&self.flatten(), self.samplerate, samplerate);
        self.samplerate = samplerate;
        let had_cursor = self.current.is_some();
        self.stream = chunk_frames(&frames, self.format, self.buffer_size);
        self.current = (had_cursor && !self.stream.is_empty()).then_some(0);
    }

    /// Change the storage format, converting every buffer.
    pub fn set_format(&mut self, format: SampleFormat) {
        if format == self.format {
            return;
        }
        for buffer in &mut self.stream {
            let mut converted = SampleBuffer::new(format, buffer.len());
            converted.copy_from(buffer);
            *buffer = converted;
        }
        self.format = format;
    }

    /// Zero every buffer.
    pub fn clear(&mut self) {
        self.stream.iter_mut().for_each(SampleBuffer::clear);
    }

    /// Advance the cursor. Returns `false` once the signal is exhausted.
    pub fn next_buffer(&mut self) -> bool {
        self.current = match self.current {
            Some(c) if c + 1 < self.stream.len() => Some(c + 1),
            _ => None,
        };
        self.current.is_some()
    }

    /// Put the cursor back on the first buffer.
    pub fn rewind(&mut self) {
        self.current = if self.stream.is_empty() { None } else { Some(0) };
    }

    /// Whether the cursor has run off the stream.
    pub fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }

    /// Whether the second half of the final buffer holds non-zero samples.
    pub fn tail_has_signal(&self) -> bool {
        self.stream.last().is_some_and(|last| {
            let len = last.len();
            last.has_signal_in(len / 2..len)
        })
    }

    /// Total frames in the stream.
    pub fn frame_count(&self) -> usize {
        self.stream.iter().map(SampleBuffer::len).sum()
    }

    fn flatten(&self) -> Vec<f64> {
        let mut frames = Vec::with_capacity(self.frame_count());
        for buffer in &self.stream {
            frames.extend(buffer.to_f64_vec());
        }
        frames
    }

    // --- List helpers ---

    /// First signal in `list` bound to `recall_id`.
    ///
    /// Locks each signal in turn; the caller must not hold any of them.
    pub fn find_by_recall_id(list: &[SharedSignal], recall_id: &Arc<RecallId>) -> Option<SharedSignal> {
        list.iter()
            .find(|s| {
                s.lock()
                    .recall_id
                    .as_ref()
                    .is_some_and(|id| Arc::ptr_eq(id, recall_id))
            })
            .cloned()
    }

    /// First template signal in `list`.
    pub fn find_template(list: &[SharedSignal]) -> Option<SharedSignal> {
        list.iter().find(|s| s.lock().is_template()).cloned()
    }

    /// Whether any signal in `list` runs under `recall_id`'s recycling context.
    pub fn is_active(list: &[SharedSignal], recall_id: &RecallId) -> bool {
        list.iter().any(|s| {
            s.lock()
                .recall_id
                .as_ref()
                .is_some_and(|id| id.same_context(recall_id))
        })
    }
}

/// Split normalized frames into buffers of `buffer_size`, zero-padding the last.
fn chunk_frames(frames: &[f64], format: SampleFormat, buffer_size: usize) -> Vec<SampleBuffer> {
    let buffer_size = buffer_size.max(1);
    frames
        .chunks(buffer_size)
        .map(|chunk| {
            let mut buffer = SampleBuffer::new(format, buffer_size);
            for (i, &s) in chunk.iter().enumerate() {
                buffer.set_sample(i, s);
            }
            buffer
        })
        .collect()
}

/// Linear-interpolation resampler.
fn resample_linear(frames: &[f64], from: u32, to: u32) -> Vec<f64> {
    if frames.is_empty() || from == 0 || to == 0 {
        return Vec::new();
    }
    let ratio = f64::from(from) / f64::from(to);
    let out_len = ((frames.len() as f64) / ratio).round() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = pos - idx as f64;
            let a = frames[idx.min(frames.len() - 1)];
            let b = frames[(idx + 1).min(frames.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}
