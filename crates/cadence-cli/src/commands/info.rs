//! Display the effective engine configuration.

use super::common::load_config;
use cadence_config::EngineConfig;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

/// Display engine configuration.
#[derive(Args)]
pub struct InfoArgs {
    /// Engine config file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Configuration plus the timing derived from it.
#[derive(Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    config: &'a EngineConfig,
    effective_freq: f64,
    timelock_window_ms: f64,
    buffer_latency_ms: f64,
}

impl<'a> Report<'a> {
    fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            effective_freq: config.freq(),
            timelock_window_ms: config.tree_config().window().as_secs_f64() * 1000.0,
            buffer_latency_ms: config.buffer_size as f64 / f64::from(config.samplerate) * 1000.0,
        }
    }
}

/// Run the info command.
pub fn run(args: InfoArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let report = Report::new(&config);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Sample Rate:     {} Hz", config.samplerate);
    println!(
        "Buffer Size:     {} frames ({:.2} ms)",
        config.buffer_size, report.buffer_latency_ms
    );
    println!("Audio Channels:  {}", config.audio_channels);
    println!("Format:          {}", config.format);
    println!();
    println!("Thread Tree");
    println!("  Frequency:     {:.2} Hz", report.effective_freq);
    println!("  Window:        {:.3} ms", report.timelock_window_ms);
    println!("  Timelock:      {} cycles", config.thread.timelock_cycles);
    println!("  Hangcheck:     {} cycles", config.thread.hangcheck_cycles);
    println!("  Max Precision: {:.2} Hz", config.thread.max_precision);
    println!();
    println!("Soundcard");
    println!("  Backend:       {}", config.soundcard.backend);
    println!(
        "  Device:        {}",
        config.soundcard.device.as_deref().unwrap_or("(default)")
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_flattens_config() {
        let config = EngineConfig::default();
        let json = serde_json::to_value(Report::new(&config)).unwrap();
        assert_eq!(json["samplerate"], 48000);
        assert_eq!(json["format"], "s16");
        assert_eq!(json["thread"]["hangcheck_cycles"], 8);
        assert_eq!(json["effective_freq"], 93.75);
    }
}
