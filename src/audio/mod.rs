//! Audio subsystem module

pub mod device;
pub mod output;
pub mod recording;
pub mod synth;

pub use device::{channel_roster, list_output_devices, OutputDeviceInfo};
pub use output::AudioOutput;
pub use synth::{Renderer, Voice};
