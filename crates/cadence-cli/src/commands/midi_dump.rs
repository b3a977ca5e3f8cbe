//! Standard MIDI file dump command.

use cadence_midi::{MetaEvent, MidiMessage, Smf};
use clap::Args;
use std::path::PathBuf;

/// Decode a standard MIDI file.
#[derive(Args)]
pub struct MidiDumpArgs {
    /// Path to the .mid file
    pub file: PathBuf,

    /// Only print the header and per-track summaries
    #[arg(long)]
    pub summary: bool,
}

/// Run the midi-dump command.
pub fn run(args: MidiDumpArgs) -> anyhow::Result<()> {
    let smf = Smf::read(&args.file)?;

    println!("File:     {}", args.file.display());
    println!("Format:   {}", smf.header.format);
    println!("Tracks:   {}", smf.tracks.len());
    match smf.header.ticks_per_quarter() {
        Some(tpq) => println!("Division: {tpq} ticks per quarter"),
        None => println!("Division: SMPTE ({:#06x})", smf.header.division),
    }

    for (idx, track) in smf.tracks.iter().enumerate() {
        let notes = track
            .events
            .iter()
            .filter(|e| matches!(e.message, MidiMessage::NoteOn { velocity, .. } if velocity > 0))
            .count();
        println!();
        println!(
            "Track {} ({} events, {} notes)",
            idx,
            track.events.len(),
            notes
        );
        if args.summary {
            continue;
        }
        for (tick, message) in track.absolute() {
            println!("  {:>8}  {}", tick, describe(message));
        }
    }

    Ok(())
}

/// One-line description of a message.
fn describe(message: &MidiMessage) -> String {
    match message {
        MidiMessage::NoteOn {
            channel,
            key,
            velocity,
        } => format!("note-on   ch {:>2}  key {key:>3}  vel {velocity:>3}", channel + 1),
        MidiMessage::NoteOff {
            channel,
            key,
            velocity,
        } => format!("note-off  ch {:>2}  key {key:>3}  vel {velocity:>3}", channel + 1),
        MidiMessage::Meta(MetaEvent::Tempo(us)) => {
            format!("tempo     {:.2} bpm", 60_000_000.0 / f64::from((*us).max(1)))
        }
        other => format!("{other:?}"),
    }
}
