//! Lookup helpers shared by the effect recalls.

use cadence_core::{PortValue, Recall, Result, SharedSignal};

/// The signal an instance processes this tic.
///
/// Audio-signal variants use their bound source. Channel and recycling
/// variants look up the signal of their own run in the bound recycling.
pub(crate) fn run_signal(recall: &Recall) -> Option<SharedSignal> {
    if let Some(source) = recall.source() {
        return Some(source);
    }
    let recall_id = recall.recall_id()?;
    let recycling = recall
        .recycling()
        .or_else(|| recall.channel().map(|channel| channel.effective_recycling()))?;
    recycling.find_by_recall_id(&recall_id)
}

/// Float value of a port, or `default` when the recall has none.
pub(crate) fn port_f32(recall: &Recall, specifier: &str, default: f32) -> f32 {
    recall.find_port(specifier).map_or(default, |port| port.get_f32())
}

/// Boolean value of a port, or `false` when the recall has none.
pub(crate) fn port_bool(recall: &Recall, specifier: &str) -> bool {
    recall.find_port(specifier).is_some_and(|port| port.get_bool())
}

/// Unsigned value of a port, or `default` when the recall has none.
pub(crate) fn port_u64(recall: &Recall, specifier: &str, default: u64) -> u64 {
    recall
        .find_port(specifier)
        .map_or(default, |port| port.get_f64().max(0.0) as u64)
}

/// Double value of a port, or `default` when the recall has none.
pub(crate) fn port_f64(recall: &Recall, specifier: &str, default: f64) -> f64 {
    recall.find_port(specifier).map_or(default, |port| port.get_f64())
}

/// Write `value` to a port of `recall`, if it has one.
pub(crate) fn set_port(recall: &Recall, specifier: &str, value: PortValue) -> Result<()> {
    match recall.port(specifier) {
        Some(port) => port.set(value),
        None => Ok(()),
    }
}
