//! Output devices the engine plays into.
//!
//! The engine hands a soundcard one buffer of interleaved f32 samples per
//! tic through [`Soundcard::play`], then calls [`Soundcard::tic`] to account
//! for the cycle. [`OfflineSoundcard`] keeps everything in memory for
//! rendering to a file; [`CpalSoundcard`] queues buffers to a live stream.

use crate::backend::{AudioBackend, BackendStreamConfig, StreamHandle};
use crate::wav::{WavSpec, write_wav};
use crate::{Error, Result};
use cadence_core::{SampleFormat, SharedSignal};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Buffers queued between the engine and a live device.
const QUEUE_DEPTH: usize = 4;

/// How long `play` waits for the device before giving up.
const PLAY_TIMEOUT: Duration = Duration::from_secs(1);

/// A sink for interleaved engine output.
pub trait Soundcard: Send {
    /// Sample rate in Hz.
    fn samplerate(&self) -> u32;

    /// Frames per buffer.
    fn buffer_size(&self) -> usize;

    /// Interleaved channels.
    fn channels(&self) -> usize;

    /// Storage format the output is rendered in.
    fn format(&self) -> SampleFormat;

    /// Queue one buffer of interleaved samples.
    fn play(&mut self, interleaved: &[f32]) -> Result<()>;

    /// Finish the current cycle.
    fn tic(&mut self) -> Result<()>;
}

fn check_layout(len: usize, channels: usize) -> Result<()> {
    if channels == 0 || len % channels != 0 {
        return Err(Error::Layout { len, channels });
    }
    Ok(())
}

/// Interleave the current buffer of each line's signal into `out`.
///
/// Line `i` lands in channel `i`. Each consumed buffer is zeroed so the
/// next tic mixes into silence. `out` is cleared first.
pub fn interleave_lines(lines: &[SharedSignal], out: &mut [f32]) {
    out.fill(0.0);
    let stride = lines.len();
    for (channel, line) in lines.iter().enumerate() {
        let mut line = line.lock();
        if let Some(buffer) = line.current_buffer_mut() {
            buffer.write_interleaved(out, channel, stride);
            buffer.clear();
        }
    }
}

// --- Offline ---

/// Collects played buffers in memory.
#[derive(Debug, Clone)]
pub struct OfflineSoundcard {
    samplerate: u32,
    buffer_size: usize,
    channels: usize,
    format: SampleFormat,
    samples: Vec<f32>,
    tics: u64,
}

impl OfflineSoundcard {
    /// Create an empty offline card.
    pub fn new(samplerate: u32, buffer_size: usize, channels: usize, format: SampleFormat) -> Self {
        Self {
            samplerate,
            buffer_size,
            channels,
            format,
            samples: Vec::new(),
            tics: 0,
        }
    }

    /// Everything played so far, interleaved.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Frames played so far.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    /// Cycles completed.
    pub fn tics(&self) -> u64 {
        self.tics
    }

    /// Write the collected audio, at the depth of the card's format.
    pub fn write_wav<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let spec = WavSpec::for_format(self.format, self.channels as u16, self.samplerate);
        write_wav(path, &self.samples, spec)
    }
}

impl Soundcard for OfflineSoundcard {
    fn samplerate(&self) -> u32 {
        self.samplerate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn format(&self) -> SampleFormat {
        self.format
    }

    fn play(&mut self, interleaved: &[f32]) -> Result<()> {
        check_layout(interleaved.len(), self.channels)?;
        self.samples.extend_from_slice(interleaved);
        Ok(())
    }

    fn tic(&mut self) -> Result<()> {
        self.tics += 1;
        Ok(())
    }
}

// --- Live ---

/// Feeds a live output stream through a short buffer queue.
///
/// `play` blocks while the queue is full, which paces the engine to the
/// device clock. The device callback plays silence when the queue runs dry
/// and counts the underrun.
pub struct CpalSoundcard {
    samplerate: u32,
    buffer_size: usize,
    channels: usize,
    format: SampleFormat,
    queue: Sender<Vec<f32>>,
    spent: Receiver<Vec<f32>>,
    underruns: Arc<AtomicU64>,
    reported_underruns: u64,
    _stream: StreamHandle,
}

impl std::fmt::Debug for CpalSoundcard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalSoundcard")
            .field("samplerate", &self.samplerate)
            .field("buffer_size", &self.buffer_size)
            .field("channels", &self.channels)
            .field("underruns", &self.underruns.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CpalSoundcard {
    /// Open an output stream on `backend`.
    pub fn open(backend: &dyn AudioBackend, config: &BackendStreamConfig, format: SampleFormat) -> Result<Self> {
        let (queue, source) = bounded::<Vec<f32>>(QUEUE_DEPTH);
        let (recycle, spent) = bounded::<Vec<f32>>(QUEUE_DEPTH * 2);
        let underruns = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&underruns);

        let mut current: Option<Vec<f32>> = None;
        let mut pos = 0;
        let callback = Box::new(move |out: &mut [f32]| {
            let mut written = 0;
            while written < out.len() {
                if current.as_ref().is_none_or(|buf| pos >= buf.len()) {
                    if let Some(done) = current.take() {
                        let _ = recycle.try_send(done);
                    }
                    pos = 0;
                    match source.try_recv() {
                        Ok(next) => current = Some(next),
                        Err(_) => {
                            out[written..].fill(0.0);
                            counter.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                    }
                }
                if let Some(buf) = current.as_ref() {
                    let n = (buf.len() - pos).min(out.len() - written);
                    out[written..written + n].copy_from_slice(&buf[pos..pos + n]);
                    pos += n;
                    written += n;
                }
            }
        });
        let error_callback = Box::new(|message: &str| {
            tracing::error!(error = message, "output stream error");
        });

        let stream = backend.build_output_stream(config, callback, error_callback)?;
        Ok(Self {
            samplerate: backend.actual_sample_rate(config),
            buffer_size: config.buffer_size as usize,
            channels: usize::from(config.channels),
            format,
            queue,
            spent,
            underruns,
            reported_underruns: 0,
            _stream: stream,
        })
    }

    /// Device callbacks that found the queue empty.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl Soundcard for CpalSoundcard {
    fn samplerate(&self) -> u32 {
        self.samplerate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn format(&self) -> SampleFormat {
        self.format
    }

    fn play(&mut self, interleaved: &[f32]) -> Result<()> {
        check_layout(interleaved.len(), self.channels)?;
        let mut buffer = self.spent.try_recv().unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(interleaved);
        self.queue
            .send_timeout(buffer, PLAY_TIMEOUT)
            .map_err(|e| Error::Stream(format!("output stalled: {e}")))
    }

    fn tic(&mut self) -> Result<()> {
        let underruns = self.underruns();
        if underruns > self.reported_underruns {
            tracing::warn!(total = underruns, new = underruns - self.reported_underruns, "output underrun");
            self.reported_underruns = underruns;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AudioDevice;
    use crate::backend::{ErrorCallback, OutputCallback};
    use cadence_core::{AudioSignal, SampleBuffer};
    use std::sync::Mutex;

    #[test]
    fn offline_collects_interleaved() {
        let mut card = OfflineSoundcard::new(48000, 2, 2, SampleFormat::Signed16);
        card.play(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        card.tic().unwrap();
        assert_eq!(card.frames(), 2);
        assert_eq!(card.tics(), 1);
        assert!(matches!(card.play(&[0.0; 3]), Err(Error::Layout { len: 3, channels: 2 })));
    }

    #[test]
    fn lines_interleave_and_clear() {
        let make = |value: f32| {
            let mut signal = AudioSignal::new(48000, 2, SampleFormat::Float);
            signal.stream_resize(1);
            *signal.buffer_mut(0).unwrap() = SampleBuffer::Float(vec![value; 2]);
            signal.into_shared()
        };
        let lines = [make(0.25), make(-0.5)];
        let mut out = vec![9.0; 4];
        interleave_lines(&lines, &mut out);
        assert_eq!(out, [0.25, -0.5, 0.25, -0.5]);
        assert_eq!(lines[0].lock().buffer(0), Some(&SampleBuffer::Float(vec![0.0; 2])));
    }

    /// Keeps the callback so the test can pull audio like a device would.
    struct ManualBackend {
        callback: Arc<Mutex<Option<OutputCallback>>>,
    }

    impl AudioBackend for ManualBackend {
        fn name(&self) -> &str {
            "manual"
        }

        fn list_devices(&self) -> Result<Vec<AudioDevice>> {
            Ok(Vec::new())
        }

        fn default_output_device(&self) -> Result<Option<AudioDevice>> {
            Ok(None)
        }

        fn build_output_stream(
            &self,
            _config: &BackendStreamConfig,
            callback: OutputCallback,
            _error_callback: ErrorCallback,
        ) -> Result<StreamHandle> {
            *self.callback.lock().unwrap() = Some(callback);
            Ok(StreamHandle::new(()))
        }
    }

    #[test]
    fn live_card_feeds_callback_and_counts_underruns() {
        let slot = Arc::new(Mutex::new(None));
        let backend = ManualBackend {
            callback: Arc::clone(&slot),
        };
        let config = BackendStreamConfig {
            buffer_size: 2,
            channels: 1,
            ..BackendStreamConfig::default()
        };
        let mut card = CpalSoundcard::open(&backend, &config, SampleFormat::Float).unwrap();
        card.play(&[0.5, 0.25]).unwrap();
        card.play(&[0.125, 0.0625]).unwrap();

        let mut guard = slot.lock().unwrap();
        let callback = guard.as_mut().unwrap();
        let mut out = [0.0; 3];
        callback(&mut out);
        assert_eq!(out, [0.5, 0.25, 0.125]);
        let mut out = [1.0; 3];
        callback(&mut out);
        assert_eq!(out, [0.0625, 0.0, 0.0]);
        drop(guard);

        assert_eq!(card.underruns(), 1);
        card.tic().unwrap();
    }
}
