//! Audio device listing command.

use cadence_io::backend::AudioBackend;
use cadence_io::cpal_backend::CpalBackend;
use clap::Args;

#[derive(Args)]
pub struct DevicesArgs {
    /// Also list input-only devices
    #[arg(long)]
    all: bool,
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    let backend = CpalBackend::new();
    let devices = backend.list_devices()?;
    let default = backend.default_output_device()?;

    let shown: Vec<_> = devices
        .iter()
        .filter(|device| args.all || device.is_output)
        .collect();

    if shown.is_empty() {
        println!("No audio devices found.");
        return Ok(());
    }

    println!("Available Audio Devices ({})", backend.name());
    println!("=======================\n");

    for (idx, device) in shown.iter().enumerate() {
        let is_default = default.as_ref().is_some_and(|d| d.name == device.name);
        let direction = match (device.is_input, device.is_output) {
            (true, true) => "input/output",
            (true, false) => "input",
            _ => "output",
        };
        println!(
            "  [{}] {} ({}, {} Hz){}",
            idx,
            device.name,
            direction,
            device.default_sample_rate,
            if is_default { " *default" } else { "" }
        );
    }

    println!();
    println!("Tip: select a device by partial name in the engine config:");
    println!("  [soundcard]");
    println!("  device = \"USB\"");

    Ok(())
}
