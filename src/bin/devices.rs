//! Lists output devices and the channel names effects can address

use anyhow::Result;

use shakelab::audio::device::{channel_roster, list_output_devices};
use shakelab::constants::SAMPLE_RATE;

fn main() -> Result<()> {
    let devices = list_output_devices();

    println!("\n=== Output Devices ===");
    if devices.is_empty() {
        println!("  (none found)");
    }
    for device in &devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Max channels: {}", device.max_channels);
        if let Some(rate) = device.default_sample_rate {
            println!("    Default sample rate: {} Hz", rate);
        }
        if device.supports_sample_rate {
            println!(
                "    Channels: {}",
                channel_roster(device.max_channels).join(", ")
            );
        } else {
            println!("    Does not support {} Hz, unusable", SAMPLE_RATE);
        }
    }
    println!();

    Ok(())
}
