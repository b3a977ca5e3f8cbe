//! Cadence CLI - command-line front end for the cadence audio engine.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about = "Cadence audio engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render notes through a synth chain to a WAV file or a live device
    Render(commands::render::RenderArgs),

    /// Render a step pattern through the sequencer to a WAV file
    Sequence(commands::sequence::SequenceArgs),

    /// List audio output devices
    Devices(commands::devices::DevicesArgs),

    /// Show the effective engine configuration
    Info(commands::info::InfoArgs),

    /// Decode a standard MIDI file and print its events
    MidiDump(commands::midi_dump::MidiDumpArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    tracing_log::LogTracer::init().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render(args) => commands::render::run(args),
        Commands::Sequence(args) => commands::sequence::run(args),
        Commands::Devices(args) => commands::devices::run(args),
        Commands::Info(args) => commands::info::run(args),
        Commands::MidiDump(args) => commands::midi_dump::run(args),
    }
}
