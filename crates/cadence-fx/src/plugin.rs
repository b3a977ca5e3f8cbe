//! Hosting of externally implemented processors.
//!
//! A [`PluginBackend`] wraps one loaded plugin binary (or an in-process
//! implementation in tests). [`FxPlugin`] is the per-voice recall driving it:
//! every instance owns a handle and scratch buffers sized to the audio's
//! buffer size, copies its signal in, runs the plugin and copies the result
//! back. Instruments also receive the note as MIDI events.
//!
//! # Failure handling
//!
//! Any backend error (missing plugin, failed instantiate, failed run) turns
//! the instance into a passthrough: the signal is left untouched and the
//! failure is logged once at `warn`. The engine never stops for a plugin.
//!
//! # Voices
//!
//! Effects and polyphonic instruments instantiate one handle per voice, up
//! to [`MAX_MIDI_KEYS`]. A live instrument shares a single handle across all
//! voices and routes notes to it as events.

use crate::error::{FxError, Result as FxResult};
use crate::signal::run_signal;
use cadence_core::{
    CancelAction, Port, Recall, RecallBehavior, RecallEvent, RecallKind, Result, SampleBuffer,
};
use cadence_midi::MidiMessage;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Maximum simultaneous voices per plugin.
pub const MAX_MIDI_KEYS: usize = 128;

/// Opaque instance handle issued by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(pub u64);

/// Data connected to a plugin port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PortBuffer {
    /// Control value, read by the plugin at the next `run`.
    Control(f32),
}

/// Audio buffers for one `run` call.
#[derive(Debug)]
pub struct PluginIo<'a> {
    /// Input samples.
    pub input: &'a [f32],
    /// Output samples, zeroed before the call.
    pub output: &'a mut [f32],
}

/// Interface to a plugin implementation.
///
/// Calls for one handle are serialized by the host.
pub trait PluginBackend: Send {
    /// Plugin name, used in diagnostics.
    fn name(&self) -> &str;

    /// Whether the plugin generates sound from MIDI events.
    fn is_instrument(&self) -> bool {
        false
    }

    /// Create an instance.
    fn instantiate(&mut self, samplerate: u32, buffer_size: usize) -> FxResult<PluginHandle>;

    /// Connect data to port `index`.
    fn connect_port(&mut self, handle: PluginHandle, index: u32, buffer: PortBuffer) -> FxResult<()>;

    /// Prepare an instance for processing.
    fn activate(&mut self, handle: PluginHandle) -> FxResult<()>;

    /// Stop processing on an instance.
    fn deactivate(&mut self, handle: PluginHandle) -> FxResult<()>;

    /// Process `frames` samples.
    fn run(
        &mut self,
        handle: PluginHandle,
        io: PluginIo<'_>,
        events: &[MidiMessage],
        frames: usize,
    ) -> FxResult<()>;

    /// Release an instance.
    fn cleanup(&mut self, handle: PluginHandle);
}

/// Constructor registered under a plugin name.
pub type PluginFactory = Arc<dyn Fn() -> FxResult<Box<dyn PluginBackend>> + Send + Sync>;

/// Name to factory map.
#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> FxResult<Box<dyn PluginBackend>> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(plugin = %name, "plugin registered");
        self.factories.write().insert(name, Arc::new(factory));
    }

    /// Load a fresh backend.
    pub fn create(&self, name: &str) -> FxResult<Box<dyn PluginBackend>> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FxError::UnknownPlugin(name.to_owned()))?;
        factory()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

// --- Host ---

/// Backend shared by all voices of one plugin template.
struct PluginHost {
    name: String,
    backend: Option<Box<dyn PluginBackend>>,
    voices: usize,
    live_instrument: bool,
    live: Option<PluginHandle>,
}

impl PluginHost {
    fn acquire(&mut self, samplerate: u32, buffer_size: usize) -> FxResult<PluginHandle> {
        if self.live_instrument {
            if let Some(handle) = self.live {
                return Ok(handle);
            }
        } else if self.voices >= MAX_MIDI_KEYS {
            return Err(FxError::plugin(&self.name, "voice limit reached"));
        }
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| FxError::plugin(&self.name, "backend unavailable"))?;
        let handle = backend.instantiate(samplerate, buffer_size)?;
        if let Err(err) = backend.activate(handle) {
            backend.cleanup(handle);
            return Err(err);
        }
        if self.live_instrument {
            self.live = Some(handle);
        } else {
            self.voices += 1;
        }
        Ok(handle)
    }

    fn release(&mut self, handle: PluginHandle) {
        if self.live == Some(handle) {
            return;
        }
        if let Some(backend) = self.backend.as_mut() {
            if let Err(err) = backend.deactivate(handle) {
                tracing::warn!(plugin = %self.name, error = %err, "deactivate failed");
            }
            backend.cleanup(handle);
        }
        self.voices = self.voices.saturating_sub(1);
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        if let (Some(handle), Some(backend)) = (self.live.take(), self.backend.as_mut()) {
            if let Err(err) = backend.deactivate(handle) {
                tracing::warn!(plugin = %self.name, error = %err, "deactivate failed");
            }
            backend.cleanup(handle);
        }
    }
}

// --- Recall ---

/// Per-voice plugin recall.
///
/// Control ports are the recall ports carrying a
/// [`plugin_index`](Port::plugin_index); their values are connected before
/// every run.
pub struct FxPlugin {
    host: Arc<Mutex<PluginHost>>,
    handle: Option<PluginHandle>,
    loaded: bool,
    input: Vec<f32>,
    output: Vec<f32>,
    events: Vec<MidiMessage>,
    note_sent: bool,
    releasing: bool,
}

impl fmt::Debug for FxPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FxPlugin")
            .field("plugin", &self.host.lock().name)
            .field("handle", &self.handle)
            .field("buffer_size", &self.input.len())
            .finish()
    }
}

impl FxPlugin {
    /// Template for the plugin registered as `name`.
    ///
    /// A name the registry does not know still yields a template; its
    /// instances pass audio through.
    pub fn template(
        registry: &PluginRegistry,
        name: &str,
        ports: Vec<Port>,
        live_instrument: bool,
    ) -> Arc<Recall> {
        let backend = match registry.create(name) {
            Ok(backend) => Some(backend),
            Err(err) => {
                tracing::warn!(plugin = %name, error = %err, "plugin unavailable, passing through");
                None
            }
        };
        let host = PluginHost {
            name: name.to_owned(),
            backend,
            voices: 0,
            live_instrument,
            live: None,
        };
        let behavior = FxPlugin::with_host(Arc::new(Mutex::new(host)));
        let mut builder = Recall::builder(format!("fx-plugin:{name}"), RecallKind::AudioSignal);
        for port in ports {
            builder = builder.port(port);
        }
        builder.behavior(behavior).build()
    }

    fn with_host(host: Arc<Mutex<PluginHost>>) -> Self {
        Self {
            host,
            handle: None,
            loaded: false,
            input: Vec::new(),
            output: Vec::new(),
            events: Vec::new(),
            note_sent: false,
            releasing: false,
        }
    }

    /// Instantiate and activate this voice and allocate scratch buffers.
    ///
    /// On failure the voice stays a passthrough.
    pub fn load_plugin(&mut self, samplerate: u32, buffer_size: usize) {
        self.loaded = true;
        self.input = vec![0.0; buffer_size];
        self.output = vec![0.0; buffer_size];
        let mut host = self.host.lock();
        match host.acquire(samplerate, buffer_size) {
            Ok(handle) => {
                tracing::debug!(plugin = %host.name, handle = handle.0, "plugin voice loaded");
                self.handle = Some(handle);
            }
            Err(err) => {
                tracing::warn!(plugin = %host.name, error = %err, "plugin load failed, passing through");
            }
        }
    }

    /// Whether this voice has a live plugin instance.
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    fn unload(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.host.lock().release(handle);
        }
    }

    fn process(&mut self, recall: &Recall, buffer: &mut SampleBuffer) -> FxResult<()> {
        let Some(handle) = self.handle else {
            return Ok(());
        };
        let frames = buffer.len().min(self.input.len());
        for (i, slot) in self.input.iter_mut().enumerate().take(frames) {
            *slot = buffer.sample(i) as f32;
        }
        self.output.fill(0.0);

        let mut host = self.host.lock();
        let instrument = host
            .backend
            .as_ref()
            .is_some_and(|backend| backend.is_instrument());
        let Some(backend) = host.backend.as_mut() else {
            return Ok(());
        };
        for port in recall.ports() {
            if let Some(index) = port.plugin_index() {
                backend.connect_port(handle, index, PortBuffer::Control(port.get_f32()))?;
            }
        }
        backend.run(
            handle,
            PluginIo {
                input: &self.input[..frames],
                output: &mut self.output[..frames],
            },
            &self.events,
            frames,
        )?;
        drop(host);
        self.events.clear();

        for (i, &value) in self.output.iter().enumerate().take(frames) {
            if instrument {
                buffer.set_sample(i, buffer.sample(i) + f64::from(value));
            } else {
                buffer.set_sample(i, f64::from(value));
            }
        }
        Ok(())
    }

    fn queue_note_off(&mut self, key: u8) {
        if self.note_sent && !self.releasing {
            self.releasing = true;
            self.events.push(MidiMessage::NoteOff {
                channel: 0,
                key,
                velocity: 0,
            });
        }
    }
}

impl Drop for FxPlugin {
    fn drop(&mut self) {
        self.unload();
    }
}

impl RecallBehavior for FxPlugin {
    fn duplicate(&self) -> Box<dyn RecallBehavior> {
        Box::new(FxPlugin::with_host(Arc::clone(&self.host)))
    }

    fn run_init_pre(&mut self, recall: &Recall) -> Result<()> {
        if let Some(signal) = run_signal(recall) {
            let (samplerate, buffer_size) = {
                let signal = signal.lock();
                (signal.samplerate(), signal.buffer_size())
            };
            self.load_plugin(samplerate, buffer_size);
        }
        Ok(())
    }

    fn run_inter(&mut self, recall: &Recall) -> Result<()> {
        let Some(signal) = run_signal(recall) else {
            return Ok(());
        };
        let mut signal = signal.lock();
        if !self.loaded {
            let (samplerate, buffer_size) = (signal.samplerate(), signal.buffer_size());
            self.load_plugin(samplerate, buffer_size);
        }
        let note = signal.note().copied();
        if let Some(note) = note {
            if !self.note_sent {
                self.note_sent = true;
                self.events.push(MidiMessage::NoteOn {
                    channel: 0,
                    key: note.key,
                    velocity: note.velocity,
                });
            }
            let is_last = signal
                .current_index()
                .is_some_and(|index| index + 1 >= signal.length());
            if is_last {
                self.queue_note_off(note.key);
            }
        }
        let Some(buffer) = signal.current_buffer_mut() else {
            return Ok(());
        };
        if let Err(err) = self.process(recall, buffer) {
            let plugin = self.host.lock().name.clone();
            tracing::warn!(plugin = %plugin, error = %err, "plugin run failed, passing through");
            self.unload();
        }
        Ok(())
    }

    fn run_post(&mut self, recall: &Recall) -> Result<()> {
        if run_signal(recall).is_none_or(|signal| signal.lock().is_exhausted()) {
            recall.done();
        }
        Ok(())
    }

    fn cancel(&mut self, recall: &Recall) -> CancelAction {
        let key = run_signal(recall).and_then(|signal| signal.lock().note().map(|note| note.key));
        match key {
            Some(key) if self.note_sent && self.handle.is_some() => {
                self.queue_note_off(key);
                CancelAction::Release
            }
            _ => CancelAction::Done,
        }
    }

    fn notify(&mut self, event: &RecallEvent) {
        match *event {
            RecallEvent::BufferSize(buffer_size) if self.loaded => {
                self.input.resize(buffer_size, 0.0);
                self.output.resize(buffer_size, 0.0);
            }
            RecallEvent::Samplerate(_) if self.loaded => {
                // reinstantiated at the next run
                self.unload();
                self.loaded = false;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Invert;

    impl PluginBackend for Invert {
        fn name(&self) -> &str {
            "invert"
        }
        fn instantiate(&mut self, _samplerate: u32, _buffer_size: usize) -> FxResult<PluginHandle> {
            Ok(PluginHandle(1))
        }
        fn connect_port(&mut self, _: PluginHandle, _: u32, _: PortBuffer) -> FxResult<()> {
            Ok(())
        }
        fn activate(&mut self, _: PluginHandle) -> FxResult<()> {
            Ok(())
        }
        fn deactivate(&mut self, _: PluginHandle) -> FxResult<()> {
            Ok(())
        }
        fn run(&mut self, _: PluginHandle, io: PluginIo<'_>, _: &[MidiMessage], _: usize) -> FxResult<()> {
            for (o, i) in io.output.iter_mut().zip(io.input) {
                *o = -*i;
            }
            Ok(())
        }
        fn cleanup(&mut self, _: PluginHandle) {}
    }

    #[test]
    fn registry_lookup() {
        let registry = PluginRegistry::new();
        registry.register("invert", || Ok(Box::new(Invert) as Box<dyn PluginBackend>));
        assert!(registry.contains("invert"));
        assert_eq!(registry.names(), ["invert"]);
        assert_eq!(registry.create("invert").unwrap().name(), "invert");
        assert!(matches!(
            registry.create("reverb"),
            Err(FxError::UnknownPlugin(name)) if name == "reverb"
        ));
    }

    #[test]
    fn voice_limit() {
        let mut host = PluginHost {
            name: "invert".into(),
            backend: Some(Box::new(Invert)),
            voices: MAX_MIDI_KEYS,
            live_instrument: false,
            live: None,
        };
        assert!(host.acquire(48000, 64).is_err());
        host.voices = 0;
        assert!(host.acquire(48000, 64).is_ok());
        assert_eq!(host.voices, 1);
    }

    #[test]
    fn live_instrument_shares_one_handle() {
        let mut host = PluginHost {
            name: "invert".into(),
            backend: Some(Box::new(Invert)),
            voices: 0,
            live_instrument: true,
            live: None,
        };
        let a = host.acquire(48000, 64).unwrap();
        let b = host.acquire(48000, 64).unwrap();
        assert_eq!(a, b);
        host.release(a);
        assert_eq!(host.live, Some(a));
    }

    #[test]
    fn scratch_follows_buffer_size() {
        let host = PluginHost {
            name: "invert".into(),
            backend: Some(Box::new(Invert)),
            voices: 0,
            live_instrument: false,
            live: None,
        };
        let mut fx = FxPlugin::with_host(Arc::new(Mutex::new(host)));
        fx.load_plugin(48000, 64);
        assert!(fx.is_active());
        fx.notify(&RecallEvent::BufferSize(128));
        assert_eq!(fx.input.len(), 128);
        assert_eq!(fx.output.len(), 128);
    }

    struct Stubborn {
        cleaned: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl PluginBackend for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }
        fn instantiate(&mut self, _samplerate: u32, _buffer_size: usize) -> FxResult<PluginHandle> {
            Ok(PluginHandle(7))
        }
        fn connect_port(&mut self, _: PluginHandle, _: u32, _: PortBuffer) -> FxResult<()> {
            Ok(())
        }
        fn activate(&mut self, _: PluginHandle) -> FxResult<()> {
            Ok(())
        }
        fn deactivate(&mut self, _: PluginHandle) -> FxResult<()> {
            Err(FxError::plugin("stubborn", "still busy"))
        }
        fn run(&mut self, _: PluginHandle, _: PluginIo<'_>, _: &[MidiMessage], _: usize) -> FxResult<()> {
            Ok(())
        }
        fn cleanup(&mut self, _: PluginHandle) {
            self.cleaned.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn failed_deactivate_still_cleans_up_live_handle() {
        let cleaned = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut host = PluginHost {
            name: "stubborn".into(),
            backend: Some(Box::new(Stubborn {
                cleaned: Arc::clone(&cleaned),
            })),
            voices: 0,
            live_instrument: true,
            live: None,
        };
        host.acquire(48000, 64).unwrap();
        drop(host);
        assert_eq!(cleaned.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
