//! WAV recording of the rendered output
//!
//! The audio callback hands each rendered block to a [`RecordTap`], which
//! queues it without blocking. A writer thread streams the queue into a
//! 16-bit PCM file. Blocks that find the queue full are dropped and counted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{error, info, warn};

use crate::constants::{RECORD_QUEUE_BLOCKS, SAMPLE_RATE};
use crate::error::AudioError;

/// Callback-side handle feeding a [`Recorder`]
#[derive(Clone)]
pub struct RecordTap {
    tx: Sender<Vec<f32>>,
    dropped: Arc<AtomicU64>,
}

impl RecordTap {
    /// Queue one interleaved block; never blocks
    pub fn push(&self, block: &[f32]) {
        match self.tx.try_send(block.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Summary of a finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub dropped_blocks: u64,
}

/// Running WAV writer thread
pub struct Recorder {
    path: PathBuf,
    handle: Option<JoinHandle<Result<u64, AudioError>>>,
    dropped: Arc<AtomicU64>,
}

impl Recorder {
    /// Create `path` and start the writer. Every [`RecordTap`] clone must be
    /// dropped before [`Recorder::finish`] returns.
    pub fn start(path: PathBuf, channels: u16) -> Result<(Self, RecordTap), AudioError> {
        Self::with_queue(path, channels, RECORD_QUEUE_BLOCKS)
    }

    fn with_queue(
        path: PathBuf,
        channels: u16,
        queue_blocks: usize,
    ) -> Result<(Self, RecordTap), AudioError> {
        if channels == 0 {
            return Err(AudioError::Recording("recording has no channels".to_string()));
        }

        let spec = hound::WavSpec {
            channels,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| AudioError::Recording(format!("{}: {e}", path.display())))?;

        let (tx, rx) = bounded(queue_blocks.max(1));
        let handle = thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || write_blocks(writer, rx, channels))
            .map_err(|e| AudioError::Recording(e.to_string()))?;

        info!(path = %path.display(), channels, "Recording started");

        let dropped = Arc::new(AtomicU64::new(0));
        let tap = RecordTap {
            tx,
            dropped: dropped.clone(),
        };
        Ok((
            Self {
                path,
                handle: Some(handle),
                dropped,
            },
            tap,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the writer to drain the queue and finalize the file
    pub fn finish(mut self) -> Result<RecordingSummary, AudioError> {
        let frames = match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| AudioError::Recording("recording writer panicked".to_string()))??,
            None => 0,
        };

        let dropped_blocks = self.dropped.load(Ordering::Relaxed);
        if dropped_blocks > 0 {
            warn!(dropped_blocks, "Recording queue overflowed, blocks dropped");
        }
        info!(path = %self.path.display(), frames, "Recording saved");

        Ok(RecordingSummary {
            path: self.path.clone(),
            frames,
            dropped_blocks,
        })
    }
}

fn write_blocks(
    mut writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
    rx: Receiver<Vec<f32>>,
    channels: u16,
) -> Result<u64, AudioError> {
    let mut samples = 0u64;
    let mut failure = None;

    // Runs until every tap is dropped
    for block in rx {
        if failure.is_some() {
            continue;
        }
        for &sample in &block {
            if let Err(e) = writer.write_sample(to_pcm16(sample)) {
                error!(error = %e, "Recording write failed");
                failure = Some(AudioError::Recording(e.to_string()));
                break;
            }
            samples += 1;
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    writer
        .finalize()
        .map_err(|e| AudioError::Recording(e.to_string()))?;
    Ok(samples / channels as u64)
}

fn to_pcm16(sample: f32) -> i16 {
    if sample.is_finite() {
        (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
    } else {
        0
    }
}

/// Timestamped file name inside `dir`
pub fn default_recording_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    dir.join(format!("shakelab-{stamp}.wav"))
}
