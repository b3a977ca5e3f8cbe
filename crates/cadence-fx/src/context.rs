//! Shared effect resources.

use crate::error::{FxError, Result};
use crate::plugin::{FxPlugin, PluginRegistry};
use crate::sf2_synth::{FxSf2Synth, Sf2Bank};
use cadence_core::{EngineContext, Port, Recall};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Engine services plus the plugin registry and sample banks.
///
/// Create one per engine and pass it to whatever builds effect templates.
#[derive(Debug)]
pub struct FxContext {
    engine: Arc<EngineContext>,
    plugins: PluginRegistry,
    banks: RwLock<HashMap<String, Arc<Sf2Bank>>>,
}

impl FxContext {
    /// Wrap `engine` with an empty registry and no banks.
    pub fn new(engine: Arc<EngineContext>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            plugins: PluginRegistry::new(),
            banks: RwLock::new(HashMap::new()),
        })
    }

    /// The wrapped engine context.
    pub fn engine(&self) -> &Arc<EngineContext> {
        &self.engine
    }

    /// Plugin factories.
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Register `bank` under its name, replacing any bank of the same name.
    pub fn register_bank(&self, bank: Sf2Bank) -> Arc<Sf2Bank> {
        let bank = Arc::new(bank);
        tracing::debug!(bank = %bank.name(), presets = bank.len(), "sample bank registered");
        self.banks
            .write()
            .insert(bank.name().to_owned(), Arc::clone(&bank));
        bank
    }

    /// Bank registered as `name`.
    pub fn bank(&self, name: &str) -> Result<Arc<Sf2Bank>> {
        self.banks
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FxError::UnknownBank(name.to_owned()))
    }

    /// Registered bank names, sorted.
    pub fn bank_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.banks.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Sample player template for bank `name`.
    pub fn sf2_synth(&self, name: &str) -> Result<Arc<Recall>> {
        Ok(FxSf2Synth::template(self.bank(name)?))
    }

    /// Plugin template for the plugin registered as `name`.
    pub fn plugin(&self, name: &str, ports: Vec<Port>, live_instrument: bool) -> Arc<Recall> {
        FxPlugin::template(&self.plugins, name, ports, live_instrument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sf2_synth::Sf2Sample;
    use cadence_core::AudioConfig;

    #[test]
    fn banks_by_name() {
        let fx = FxContext::new(EngineContext::new(AudioConfig::default()).unwrap());
        let mut bank = Sf2Bank::new("gm");
        bank.add_preset(0, 0, Sf2Sample::new("sine", vec![0.0, 1.0, 0.0, -1.0], 69, 0, 4, 48000).unwrap())
            .unwrap();
        fx.register_bank(bank);

        assert_eq!(fx.bank_names(), ["gm"]);
        assert!(fx.sf2_synth("gm").unwrap().is_template());
        assert!(matches!(fx.bank("drums"), Err(FxError::UnknownBank(_))));
    }
}
