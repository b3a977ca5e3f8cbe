//! Mutex-guarded control values shared between recalls and tasks.
//!
//! A [`Port`] is the only mutable state touched both by scheduler threads and
//! by the task launcher. Reads copy the value out under the lock so callers
//! compute outside the critical section:
//!
//! ```rust
//! use cadence_core::{Port, PortValue};
//!
//! let volume = Port::new("volume", PortValue::Float(1.0)).with_range(0.0, 2.0);
//! volume.set(PortValue::Float(3.0)).unwrap();
//! assert_eq!(volume.get_f32(), 2.0);
//! ```
//!
//! Duplicated recalls share the same `Arc<Port>` as their template unless the
//! recall asks for private ports, so a task writing the template's port is
//! seen by every running instance.

use crate::error::{Error, Result};
use parking_lot::Mutex;

/// Typed value held by a [`Port`].
#[derive(Debug, Clone, PartialEq)]
pub enum PortValue {
    /// Toggle (mute, bypass).
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer (bank/program index).
    Uint(u64),
    /// Single precision scalar.
    Float(f32),
    /// Double precision scalar.
    Double(f64),
    /// Array of floats (e.g. per-key tuning).
    FloatArray(Vec<f32>),
}

impl PortValue {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PortValue::Bool(_) => "bool",
            PortValue::Int(_) => "int",
            PortValue::Uint(_) => "uint",
            PortValue::Float(_) => "float",
            PortValue::Double(_) => "double",
            PortValue::FloatArray(_) => "float-array",
        }
    }

    /// Numeric view of scalar values; arrays report their first element.
    pub fn as_f64(&self) -> f64 {
        match self {
            PortValue::Bool(b) => f64::from(u8::from(*b)),
            PortValue::Int(v) => *v as f64,
            PortValue::Uint(v) => *v as f64,
            PortValue::Float(v) => f64::from(*v),
            PortValue::Double(v) => *v,
            PortValue::FloatArray(v) => v.first().copied().map_or(0.0, f64::from),
        }
    }

    fn clamped(self, lower: f64, upper: f64) -> Self {
        match self {
            PortValue::Int(v) => PortValue::Int((v as f64).clamp(lower, upper) as i64),
            PortValue::Uint(v) => PortValue::Uint((v as f64).clamp(lower, upper) as u64),
            PortValue::Float(v) => PortValue::Float(v.clamp(lower as f32, upper as f32)),
            PortValue::Double(v) => PortValue::Double(v.clamp(lower, upper)),
            PortValue::FloatArray(v) => PortValue::FloatArray(
                v.into_iter()
                    .map(|x| x.clamp(lower as f32, upper as f32))
                    .collect(),
            ),
            other @ PortValue::Bool(_) => other,
        }
    }
}

/// A named, typed, mutex-guarded value cell.
#[derive(Debug)]
pub struct Port {
    specifier: String,
    plugin_index: Option<u32>,
    is_output: bool,
    range: Option<(f64, f64)>,
    value: Mutex<PortValue>,
}

impl Port {
    /// Create an input port holding `value`.
    pub fn new(specifier: impl Into<String>, value: PortValue) -> Self {
        Self {
            specifier: specifier.into(),
            plugin_index: None,
            is_output: false,
            range: None,
            value: Mutex::new(value),
        }
    }

    /// Clamp written values into `[lower, upper]`.
    pub fn with_range(mut self, lower: f64, upper: f64) -> Self {
        self.range = Some((lower, upper));
        let current = self.value.get_mut().clone();
        *self.value.get_mut() = current.clamped(lower, upper);
        self
    }

    /// Bind the port to a plugin port index.
    pub fn with_plugin_index(mut self, index: u32) -> Self {
        self.plugin_index = Some(index);
        self
    }

    /// Mark the port as written by the recall (meters, peaks).
    pub fn as_output(mut self) -> Self {
        self.is_output = true;
        self
    }

    /// The port's name.
    pub fn specifier(&self) -> &str {
        &self.specifier
    }

    /// Plugin port index, when bound to a hosted plugin.
    pub fn plugin_index(&self) -> Option<u32> {
        self.plugin_index
    }

    /// Whether the owning recall writes this port.
    pub fn is_output(&self) -> bool {
        self.is_output
    }

    /// Value range, if any.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    /// Consistent snapshot of the value.
    pub fn get(&self) -> PortValue {
        self.value.lock().clone()
    }

    /// Scalar snapshot as `f32`.
    pub fn get_f32(&self) -> f32 {
        self.value.lock().as_f64() as f32
    }

    /// Scalar snapshot as `f64`.
    pub fn get_f64(&self) -> f64 {
        self.value.lock().as_f64()
    }

    /// Toggle snapshot; numeric values are true when non-zero.
    pub fn get_bool(&self) -> bool {
        match &*self.value.lock() {
            PortValue::Bool(b) => *b,
            other => other.as_f64() != 0.0,
        }
    }

    /// Replace the value. The new value must have the port's type.
    pub fn set(&self, value: PortValue) -> Result<()> {
        let value = match self.range {
            Some((lower, upper)) => value.clamped(lower, upper),
            None => value,
        };
        let mut guard = self.value.lock();
        if std::mem::discriminant(&*guard) != std::mem::discriminant(&value) {
            return Err(Error::PortType {
                port: self.specifier.clone(),
                expected: guard.type_name(),
                found: value.type_name(),
            });
        }
        *guard = value;
        Ok(())
    }

    /// Apply `f` to the value under the lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut PortValue) -> R) -> R {
        f(&mut self.value.lock())
    }

    /// Independent copy with the same specifier, range and current value.
    pub fn detached_copy(&self) -> Self {
        Self {
            specifier: self.specifier.clone(),
            plugin_index: self.plugin_index,
            is_output: self.is_output,
            range: self.range,
            value: Mutex::new(self.get()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_returns_snapshot() {
        let port = Port::new("cutoff", PortValue::Double(440.0));
        let snapshot = port.get();
        port.set(PortValue::Double(880.0)).unwrap();
        assert_eq!(snapshot, PortValue::Double(440.0));
        assert_eq!(port.get_f64(), 880.0);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let port = Port::new("muted", PortValue::Bool(false));
        let err = port.set(PortValue::Float(1.0)).unwrap_err();
        assert!(matches!(err, Error::PortType { expected: "bool", found: "float", .. }));
        assert!(!port.get_bool());
    }

    #[test]
    fn test_range_clamps() {
        let port = Port::new("q", PortValue::Float(0.5)).with_range(0.1, 10.0);
        port.set(PortValue::Float(0.0)).unwrap();
        assert_eq!(port.get_f32(), 0.1);
    }

    #[test]
    fn test_shared_between_threads() {
        let port = Arc::new(Port::new("volume", PortValue::Float(0.0)));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let port = Arc::clone(&port);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        port.update(|v| {
                            if let PortValue::Float(x) = v {
                                *x += 1.0;
                            }
                        });
                    }
                    i
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(port.get_f32(), 400.0);
    }

    #[test]
    fn test_detached_copy_is_independent() {
        let port = Port::new("pitch", PortValue::Float(1.0));
        let copy = port.detached_copy();
        copy.set(PortValue::Float(2.0)).unwrap();
        assert_eq!(port.get_f32(), 1.0);
        assert_eq!(copy.specifier(), "pitch");
    }
}
