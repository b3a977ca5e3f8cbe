//! Process-wide engine state passed explicitly instead of global singletons.

use crate::dispose::DestroyWorker;
use crate::error::{Error, Result};
use crate::format::SampleFormat;
use crate::port::Port;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Default audio settings for new machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Sample rate in Hz.
    pub samplerate: u32,
    /// Frames per buffer.
    pub buffer_size: usize,
    /// Storage format of new signals.
    pub format: SampleFormat,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            samplerate: 48000,
            buffer_size: 512,
            format: SampleFormat::Signed16,
        }
    }
}

impl AudioConfig {
    /// Reject zero sample rates and buffer sizes.
    pub fn validate(&self) -> Result<()> {
        if self.samplerate == 0 {
            return Err(Error::InvalidConfig {
                what: "samplerate",
                value: 0,
            });
        }
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig {
                what: "buffer size",
                value: 0,
            });
        }
        Ok(())
    }
}

/// Shared engine services: defaults, the destroy worker and the control
/// port registry.
#[derive(Debug)]
pub struct EngineContext {
    config: RwLock<AudioConfig>,
    destroy: DestroyWorker,
    controls: RwLock<HashMap<String, Weak<Port>>>,
}

impl EngineContext {
    /// Create a context with `config` as defaults.
    pub fn new(config: AudioConfig) -> Result<Arc<Self>> {
        config.validate()?;
        tracing::info!(
            samplerate = config.samplerate,
            buffer_size = config.buffer_size,
            format = %config.format,
            "engine context created"
        );
        Ok(Arc::new(Self {
            config: RwLock::new(config),
            destroy: DestroyWorker::new(),
            controls: RwLock::new(HashMap::new()),
        }))
    }

    /// Current defaults.
    pub fn config(&self) -> AudioConfig {
        *self.config.read()
    }

    /// Replace the defaults.
    pub fn set_config(&self, config: AudioConfig) -> Result<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    /// The destroy worker.
    pub fn destroy_worker(&self) -> &DestroyWorker {
        &self.destroy
    }

    /// Hand `item` to the destroy worker, dropping it here if the worker is gone.
    pub fn dispose<T: Send + 'static>(&self, item: T) {
        if let Err(err) = self.destroy.add(item) {
            tracing::warn!(error = %err, "dropping on caller thread");
        }
    }

    /// Publish a port under `name` for external control.
    pub fn register_control(&self, name: impl Into<String>, port: &Arc<Port>) {
        let name = name.into();
        tracing::debug!(control = %name, port = port.specifier(), "control registered");
        self.controls.write().insert(name, Arc::downgrade(port));
    }

    /// Look up a published port. Ports whose recall is gone resolve to `None`.
    pub fn control(&self, name: &str) -> Option<Arc<Port>> {
        self.controls.read().get(name).and_then(Weak::upgrade)
    }

    /// Names of every live control, sorted.
    pub fn control_names(&self) -> Vec<String> {
        let mut controls = self.controls.write();
        controls.retain(|_, port| port.strong_count() > 0);
        let mut names: Vec<_> = controls.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortValue;

    #[test]
    fn test_rejects_zero_buffer_size() {
        let config = AudioConfig {
            buffer_size: 0,
            ..AudioConfig::default()
        };
        assert!(EngineContext::new(config).is_err());
    }

    #[test]
    fn test_control_registry_drops_dead_ports() {
        let ctx = EngineContext::new(AudioConfig::default()).unwrap();
        let port = Arc::new(Port::new("volume", PortValue::Float(1.0)));
        ctx.register_control("master/volume", &port);
        assert!(ctx.control("master/volume").is_some());
        assert_eq!(ctx.control_names(), vec!["master/volume".to_string()]);
        drop(port);
        assert!(ctx.control("master/volume").is_none());
        assert!(ctx.control_names().is_empty());
    }

    #[test]
    fn test_dispose_goes_through_worker() {
        let ctx = EngineContext::new(AudioConfig::default()).unwrap();
        ctx.dispose(vec![0u8; 16]);
        ctx.destroy_worker().flush().unwrap();
        assert_eq!(ctx.destroy_worker().disposed_count(), 1);
    }
}
