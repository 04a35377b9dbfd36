//! Application orchestration
//!
//! Owns the long-lived pieces (telemetry worker, audio output, pulse timer)
//! and swaps them when the operator changes source, device or block size.
//! A failed swap leaves the old piece stopped rather than half-started.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::audio::device::list_output_devices;
use crate::audio::recording::{default_recording_path, Recorder};
use crate::audio::AudioOutput;
use crate::config::{self, AppConfig, LoadSelection, Settings};
use crate::constants::BLOCK_SIZES;
use crate::effects::PulseScheduler;
use crate::error::{AudioError, Result};
use crate::network::TelemetryWorker;
use crate::schema::{self, TelemetrySource};
use crate::state::SharedState;

/// Running audio stream as reported to the operator
#[derive(Debug, Clone, Serialize)]
pub struct AudioStatus {
    pub device: String,
    pub channels: u16,
    pub block_size: u32,
    pub blocks_rendered: u64,
}

/// Running telemetry worker as reported to the operator
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryStatus {
    pub source: String,
    pub listening: String,
    pub datagrams: u64,
    pub decoded: u64,
    pub unknown: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub telemetry: Option<TelemetryStatus>,
    pub audio: Option<AudioStatus>,
    pub recording: bool,
    pub effects: usize,
}

/// What applying a settings file did
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub effects_loaded: usize,
    /// Effect records that could not be decoded: (key, reason)
    pub skipped: Vec<(String, String)>,
    /// Names that could not be resolved, for the operator
    pub warnings: Vec<String>,
}

pub struct App {
    config: AppConfig,
    state: Arc<SharedState>,
    pulses: PulseScheduler,
    worker: Option<TelemetryWorker>,
    output: Option<AudioOutput>,
    /// Requested output device; `None` is the host default
    device: Option<String>,
    block_size: u32,
    recorder: Option<Recorder>,
    /// Destination chosen after the recording started
    recording_target: Option<PathBuf>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let state = SharedState::shared(config.engine.plot_history);
        let pulses = PulseScheduler::start(state.clone())?;

        Ok(Self {
            device: config.audio.device.clone(),
            block_size: config.audio.block_size,
            config,
            state,
            pulses,
            worker: None,
            output: None,
            recorder: None,
            recording_target: None,
        })
    }

    pub fn state(&self) -> Arc<SharedState> {
        self.state.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn source_name(&self) -> Option<&str> {
        self.worker.as_ref().map(TelemetryWorker::source_name)
    }

    /// Switch to the named telemetry source: stop the current worker, then
    /// bind and start a new one
    pub fn select_source(&mut self, name: &str) -> Result<()> {
        let source: Arc<TelemetrySource> = Arc::new(schema::load_source(name)?);
        self.stop_worker();

        let worker = TelemetryWorker::start(
            source.clone(),
            self.state.clone(),
            self.pulses.clone(),
            &self.config.network,
        )?;
        self.state.set_source(source.name(), source.catalog().to_vec());
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            if let Err(e) = worker.stop() {
                error!(source = worker.source_name(), error = %e, "Previous telemetry worker left running");
            }
        }
        self.state.clear_telemetry();
    }

    /// Open the current device at the current block size
    pub fn start_audio(&mut self) -> Result<()> {
        self.stop_audio();
        let output = AudioOutput::start(self.device.as_deref(), self.block_size, self.state.clone())?;
        self.output = Some(output);
        Ok(())
    }

    pub fn stop_audio(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
    }

    /// Replace the output stream with one on `device`
    pub fn select_device(&mut self, device: Option<&str>) -> Result<()> {
        self.device = device.map(str::to_string);
        self.start_audio()
    }

    /// Restart the output stream with a new block size
    pub fn set_block_size(&mut self, block_size: u32) -> Result<()> {
        if !BLOCK_SIZES.contains(&block_size) {
            return Err(AudioError::UnsupportedBlockSize(block_size).into());
        }
        self.block_size = block_size;
        if self.output.is_some() {
            self.start_audio()?;
        }
        info!(block_size, "Block size changed");
        Ok(())
    }

    /// Set device and block size together and reopen the stream once
    pub fn configure_audio(&mut self, device: Option<&str>, block_size: Option<u32>) -> Result<()> {
        if let Some(block_size) = block_size {
            if !BLOCK_SIZES.contains(&block_size) {
                return Err(AudioError::UnsupportedBlockSize(block_size).into());
            }
            self.block_size = block_size;
        }
        self.select_device(device)
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Surface stream errors reported since the last check
    pub fn check_audio(&self) {
        if let Some(output) = &self.output {
            while let Some(e) = output.check_errors() {
                error!(device = output.device_name(), error = %e, "Audio stream error");
            }
        }
    }

    /// Apply the selected parts of a settings file. Unknown source or device
    /// names are reported and leave the current selection in place.
    pub fn load_settings(&mut self, path: &Path, selection: LoadSelection) -> Result<LoadReport> {
        let loaded = Settings::load(path)?;
        let settings = loaded.settings;
        let mut report = LoadReport {
            skipped: loaded.skipped,
            ..LoadReport::default()
        };

        if selection.game_file {
            if let Some(name) = &settings.game_file {
                if schema::available_sources().contains(&name.as_str()) {
                    if let Err(e) = self.select_source(name) {
                        report.warnings.push(format!("source '{name}' could not start: {e}"));
                    }
                } else {
                    report.warnings.push(format!("source '{name}' not found"));
                }
            }
        }

        if selection.effects {
            report.effects_loaded = settings.effects.len();
            self.state.replace_effects(settings.effects);
        }

        if selection.audio_device {
            if let Some(name) = &settings.audio_device {
                if list_output_devices().iter().any(|d| &d.name == name) {
                    if let Err(e) = self.select_device(Some(name)) {
                        report.warnings.push(format!("device '{name}' could not start: {e}"));
                    }
                } else {
                    report.warnings.push(format!("audio device '{name}' not found"));
                }
            }
        }

        for warning in &report.warnings {
            warn!(path = %path.display(), "{}", warning);
        }
        Ok(report)
    }

    pub fn save_settings(&self, path: &Path) -> Result<()> {
        let settings = Settings {
            game_file: self
                .source_name()
                .map(str::to_string)
                .or_else(|| self.state.source_name()),
            audio_device: self
                .output
                .as_ref()
                .map(|o| o.device_name().to_string())
                .or_else(|| self.device.clone()),
            effects: self.state.effects(),
        };
        settings.save(path)?;
        Ok(())
    }

    /// Start or stop recording. The output streams to `path` given at start
    /// (or a timestamped default). Stopping moves the file to `path` when one
    /// is given there, and returns where it went.
    pub fn set_recording(&mut self, enabled: bool, path: Option<PathBuf>) -> Result<Option<PathBuf>> {
        if enabled {
            if self.recorder.is_some() {
                if path.is_some() {
                    self.recording_target = path;
                }
                return Ok(None);
            }

            let channels = match &self.output {
                Some(output) => output.channels(),
                None => u16::try_from(self.state.channels().len()).unwrap_or(0),
            };
            let path = match path {
                Some(path) => path,
                None => {
                    let dir = config::data_dir().unwrap_or_else(std::env::temp_dir);
                    std::fs::create_dir_all(&dir)?;
                    default_recording_path(&dir)
                }
            };
            let (recorder, tap) = Recorder::start(path, channels)?;
            self.state.set_record_tap(Some(tap));
            self.recorder = Some(recorder);
            self.recording_target = None;
            return Ok(None);
        }

        let Some(recorder) = self.recorder.take() else {
            return Ok(None);
        };
        self.state.set_record_tap(None);
        let summary = recorder.finish()?;

        match path.or_else(|| self.recording_target.take()) {
            Some(target) if target != summary.path => {
                std::fs::rename(&summary.path, &target)?;
                info!(from = %summary.path.display(), to = %target.display(), "Recording moved");
                Ok(Some(target))
            }
            _ => Ok(Some(summary.path)),
        }
    }

    pub fn status(&self) -> AppStatus {
        AppStatus {
            telemetry: self.worker.as_ref().map(|w| {
                let stats = w.stats();
                TelemetryStatus {
                    source: w.source_name().to_string(),
                    listening: w.local_addr().to_string(),
                    datagrams: stats.datagrams.load(Ordering::Relaxed),
                    decoded: stats.decoded.load(Ordering::Relaxed),
                    unknown: stats.unknown.load(Ordering::Relaxed),
                    malformed: stats.malformed.load(Ordering::Relaxed),
                }
            }),
            audio: self.output.as_ref().map(|o| AudioStatus {
                device: o.device_name().to_string(),
                channels: o.channels(),
                block_size: o.block_size(),
                blocks_rendered: o.blocks_rendered(),
            }),
            recording: self.state.is_recording(),
            effects: self.state.effects().len(),
        }
    }

    /// Stop everything, saving an active recording first
    pub fn shutdown(&mut self) {
        if self.recorder.is_some() {
            if let Err(e) = self.set_recording(false, None) {
                error!(error = %e, "Failed to save recording");
            }
        }
        self.stop_worker();
        self.stop_audio();
        info!("Shut down");
    }
}
