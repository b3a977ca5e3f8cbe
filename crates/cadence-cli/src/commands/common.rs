//! Shared CLI helpers used across multiple commands.

use anyhow::Context;
use cadence_config::EngineConfig;
use std::path::Path;

/// Load the engine config from `path`, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_without_path() {
        let config = load_config(None).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn load_error_names_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "buffer_size = 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("loading engine config"), "got: {msg}");
        assert!(msg.contains("buffer_size must be non-zero"), "got: {msg}");
    }
}
