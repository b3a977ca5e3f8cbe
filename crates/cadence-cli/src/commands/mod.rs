//! CLI command implementations.

pub mod common;
pub mod devices;
pub mod info;
pub mod midi_dump;
pub mod render;
pub mod sequence;
