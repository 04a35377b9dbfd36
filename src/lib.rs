//! # ShakeLab
//!
//! Racing-simulator telemetry turned into haptic audio for bass shakers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          RACING SIMULATOR                                │
//! │          UDP telemetry: [Header | Payload (per packet id)]               │
//! └────────────────────────────────────┬─────────────────────────────────────┘
//!                                      │ UDP (localhost)
//!                                      ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  Telemetry Worker thread (network::worker)        ~10 ms poll            │
//! │  ┌────────────────────┐   ┌────────────────────┐   ┌──────────────────┐  │
//! │  │ TelemetryReceiver  │──▶│  Schema decode     │──▶│  EffectEngine    │  │
//! │  │ (network::receiver)│   │  (schema)          │   │  (effects)       │  │
//! │  └────────────────────┘   └────────────────────┘   └────────┬─────────┘  │
//! └─────────────────────────────────────────────────────────────┼────────────┘
//!                                                               │ amplitudes
//!            ┌─────────────────────────────┐                    ▼
//!            │ Pulse timer thread          │  resets  ┌──────────────────────┐
//!            │ (effects::pulse)            │─────────▶│     SharedState      │
//!            └─────────────────────────────┘          │  (one mutex, state)  │
//!                                                     └──────────┬───────────┘
//!                                                                │ snapshot
//!                                                                ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  Audio callback (audio::output → audio::synth)    block_size / 48 kHz    │
//! │   per effect: sine @ frequency, ramped amplitude, persistent phase       │
//! │   per channel: sum → clip → interleave → device (+ optional recording)   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod audio;
pub mod config;
pub mod effects;
pub mod error;
pub mod network;
pub mod schema;
pub mod state;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// The single sample rate the synthesis engine runs at
    pub const SAMPLE_RATE: u32 = 48000;

    /// Default audio block size in frames
    pub const DEFAULT_BLOCK_SIZE: u32 = 128;

    /// Block sizes offered to the operator
    pub const BLOCK_SIZES: [u32; 5] = [64, 128, 256, 512, 1024];

    /// Receive poll interval in milliseconds
    pub const POLL_INTERVAL_MS: u64 = 10;

    /// Quiet period after which the telemetry source is considered paused
    pub const PAUSE_TIMEOUT_MS: u64 = 100;

    /// Bounded wait for a telemetry worker to stop
    pub const STOP_TIMEOUT_MS: u64 = 5000;

    /// Plot samples retained per effect
    pub const PLOT_HISTORY: usize = 1000;

    /// Receive buffer for a single datagram
    pub const MAX_DATAGRAM_SIZE: usize = 2048;

    /// Default HTTP port for the control API
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Longest accepted trigger pulse in seconds
    pub const MAX_PULSE_DURATION_SECS: f64 = 60.0;

    /// Rendered blocks queued for the recording writer before blocks are dropped
    pub const RECORD_QUEUE_BLOCKS: usize = 256;
}
