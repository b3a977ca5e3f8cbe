//! Tasks: graph mutations queued from any thread and applied by the root
//! strictly between tics.
//!
//! One-shot tasks travel over an unbounded channel and are launched at most
//! once. Cyclic tasks stay registered and launch on every tic until removed.

use crate::error::{Result, ThreadError};
use cadence_core::{Audio, AudioConfig, ChannelKind, EngineContext, Port, PortValue};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unit of work applied between tics.
pub trait Task: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Apply the task.
    fn launch(&mut self) -> Result<()>;
}

/// Queue of tasks drained by the root at the start of every tic.
pub struct TaskLauncher {
    tx: Sender<Box<dyn Task>>,
    rx: Receiver<Box<dyn Task>>,
    cyclic: Mutex<Vec<(u64, Box<dyn Task>)>>,
    next_id: AtomicU64,
}

impl Default for TaskLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLauncher")
            .field("pending", &self.rx.len())
            .field("cyclic", &self.cyclic.lock().len())
            .finish()
    }
}

impl TaskLauncher {
    /// Create an empty launcher.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            cyclic: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue a one-shot task.
    pub fn add_task(&self, task: impl Task + 'static) {
        // The launcher owns the receiver, so the channel cannot be disconnected.
        let _ = self.tx.send(Box::new(task));
    }

    /// Queue several one-shot tasks, launched in order.
    pub fn add_task_all(&self, tasks: Vec<Box<dyn Task>>) {
        for task in tasks {
            let _ = self.tx.send(task);
        }
    }

    /// Register a task launched on every tic. Returns its id.
    pub fn add_cyclic_task(&self, task: impl Task + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.cyclic.lock().push((id, Box::new(task)));
        id
    }

    /// Unregister a cyclic task. Returns `false` for unknown ids.
    pub fn remove_cyclic_task(&self, id: u64) -> bool {
        let mut cyclic = self.cyclic.lock();
        let before = cyclic.len();
        cyclic.retain(|(task_id, _)| *task_id != id);
        cyclic.len() != before
    }

    /// Number of queued one-shot tasks.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Launch every queued one-shot task, then every cyclic task. A failing
    /// task is logged and dropped; the rest still run. Returns the number of
    /// tasks launched.
    pub fn run(&self) -> usize {
        let mut launched = 0;
        while let Ok(mut task) = self.rx.try_recv() {
            launch(task.as_mut());
            launched += 1;
        }
        let mut cyclic = self.cyclic.lock();
        for (_, task) in cyclic.iter_mut() {
            launch(task.as_mut());
            launched += 1;
        }
        launched
    }
}

fn launch(task: &mut dyn Task) {
    tracing::debug!(task = %task.name(), "launching task");
    if let Err(e) = task.launch() {
        tracing::warn!(task = %task.name(), error = %e, "task failed");
    }
}

// --- Concrete tasks ---

/// Toggle a boolean `muted` port.
#[derive(Debug)]
pub struct SetMuted {
    port: Arc<Port>,
    muted: bool,
}

impl SetMuted {
    /// Mute or unmute through `port`.
    pub fn new(port: Arc<Port>, muted: bool) -> Self {
        Self { port, muted }
    }
}

impl Task for SetMuted {
    fn name(&self) -> &str {
        "set-muted"
    }

    fn launch(&mut self) -> Result<()> {
        self.port
            .set(PortValue::Bool(self.muted))
            .map_err(|e| ThreadError::task("set-muted", e))
    }
}

/// Write a value into a port.
#[derive(Debug)]
pub struct SetPortValue {
    port: Arc<Port>,
    value: PortValue,
}

impl SetPortValue {
    /// Write `value` into `port`.
    pub fn new(port: Arc<Port>, value: PortValue) -> Self {
        Self { port, value }
    }
}

impl Task for SetPortValue {
    fn name(&self) -> &str {
        "set-port-value"
    }

    fn launch(&mut self) -> Result<()> {
        self.port
            .set(self.value.clone())
            .map_err(|e| ThreadError::task("set-port-value", e))
    }
}

/// What a [`ResizeAudio`] changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOp {
    /// Number of audio channels per pad.
    AudioChannels(usize),
    /// Number of pads of one direction.
    Pads(ChannelKind, usize),
}

/// Resize an audio; removed channels go to the destroy worker.
pub struct ResizeAudio {
    audio: Arc<Audio>,
    op: ResizeOp,
    context: Arc<EngineContext>,
}

impl ResizeAudio {
    /// Apply `op` to `audio`.
    pub fn new(audio: Arc<Audio>, op: ResizeOp, context: Arc<EngineContext>) -> Self {
        Self { audio, op, context }
    }
}

impl Task for ResizeAudio {
    fn name(&self) -> &str {
        "resize-audio"
    }

    fn launch(&mut self) -> Result<()> {
        let removed = match self.op {
            ResizeOp::AudioChannels(n) => self.audio.set_audio_channels(n),
            ResizeOp::Pads(kind, n) => self.audio.set_pads(kind, n),
        };
        tracing::debug!(audio = %self.audio.name(), op = ?self.op, removed = removed.len(), "audio resized");
        for channel in removed {
            self.context.dispose(channel);
        }
        Ok(())
    }
}

/// Push a new samplerate / buffer size / format to a set of audios and the
/// engine context.
pub struct ApplySoundConfig {
    audios: Vec<Arc<Audio>>,
    config: AudioConfig,
    context: Arc<EngineContext>,
}

impl ApplySoundConfig {
    /// Apply `config` to `audios` and `context`.
    pub fn new(audios: Vec<Arc<Audio>>, config: AudioConfig, context: Arc<EngineContext>) -> Self {
        Self {
            audios,
            config,
            context,
        }
    }
}

impl Task for ApplySoundConfig {
    fn name(&self) -> &str {
        "apply-sound-config"
    }

    fn launch(&mut self) -> Result<()> {
        let task = "apply-sound-config";
        self.context
            .set_config(self.config)
            .map_err(|e| ThreadError::task(task, e))?;
        for audio in &self.audios {
            audio
                .set_samplerate(self.config.samplerate)
                .map_err(|e| ThreadError::task(task, e))?;
            audio
                .set_buffer_size(self.config.buffer_size)
                .map_err(|e| ThreadError::task(task, e))?;
            audio.set_format(self.config.format);
        }
        tracing::info!(
            samplerate = self.config.samplerate,
            buffer_size = self.config.buffer_size,
            audios = self.audios.len(),
            "sound config applied"
        );
        Ok(())
    }
}
