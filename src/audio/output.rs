//! Audio output stream
//!
//! Drives the synthesis renderer from the device callback. The stream lives
//! on a dedicated thread for its whole lifetime, since cpal streams are not
//! `Send` on every platform.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

use crate::audio::device::{channel_roster, default_output_device, find_output_device, output_channels};
use crate::audio::synth::Renderer;
use crate::constants::{BLOCK_SIZES, SAMPLE_RATE};
use crate::error::AudioError;
use crate::state::SharedState;

/// How long to wait for the device to accept the stream
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running output stream on one device
pub struct AudioOutput {
    /// Device name
    device_name: String,

    /// Interleaved output channels
    channels: u16,

    /// Frames per callback requested from the device
    block_size: u32,

    /// Whether the stream thread should keep running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,

    /// Callbacks served
    blocks_rendered: Arc<AtomicU64>,
}

impl AudioOutput {
    /// Open `device` (or the default device) and start rendering from `state`.
    ///
    /// Once the device is playing, the channel roster in `state` is replaced
    /// by the device's channels. On failure nothing in `state` changes.
    pub fn start(
        device: Option<&str>,
        block_size: u32,
        state: Arc<SharedState>,
    ) -> Result<Self, AudioError> {
        if !BLOCK_SIZES.contains(&block_size) {
            return Err(AudioError::UnsupportedBlockSize(block_size));
        }

        let device = match device {
            Some(name) => find_output_device(name)?,
            None => default_output_device()?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let channels = output_channels(&device)?;

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Fixed(block_size),
        };

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let blocks_rendered = Arc::new(AtomicU64::new(0));
        let blocks = blocks_rendered.clone();
        let mut renderer = Renderer::new(state.clone(), channels as usize);

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        renderer.render(data);
                        blocks.fetch_add(1, Ordering::Relaxed);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping output
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut output = Self {
            device_name,
            channels,
            block_size,
            running,
            thread_handle: Some(handle),
            error_rx: Some(error_rx),
            blocks_rendered,
        };

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                state.set_channels(channel_roster(channels));
                info!(
                    device = %output.device_name,
                    channels,
                    block_size,
                    "Audio output started at {} Hz",
                    SAMPLE_RATE
                );
                Ok(output)
            }
            Ok(Err(e)) => {
                output.stop();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                output.stop();
                Err(AudioError::StreamError(format!(
                    "device '{}' did not start",
                    output.device_name
                )))
            }
        }
    }

    /// Stop the stream. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!(device = %self.device_name, "Audio output thread panicked");
            }
            info!(device = %self.device_name, "Audio output stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn blocks_rendered(&self) -> u64 {
        self.blocks_rendered.load(Ordering::Relaxed)
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
