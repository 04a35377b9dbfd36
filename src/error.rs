//! Error types for the haptics pipeline

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::effects::EffectId;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Effect error: {0}")]
    Effect(#[from] EffectError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported block size: {0}")]
    UnsupportedBlockSize(u32),

    #[error("cpal error: {0}")]
    CpalError(String),

    #[error("Recording failed: {0}")]
    Recording(String),
}

/// Packet layout and extraction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Unknown telemetry source: {0}")]
    UnknownSource(String),

    #[error("Duplicate packet id {0}")]
    DuplicatePacketId(u8),

    #[error("Buffer too short: expected {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Entity index {index} out of range (0..{count})")]
    EntityIndexOutOfRange { index: usize, count: usize },

    #[error("Field {0} is missing from the decoded packet")]
    MissingValue(usize),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Worker did not stop within {0:?}")]
    StopTimeout(Duration),
}

/// Effect configuration and processing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error("Effect not found: {0}")]
    NotFound(EffectId),

    #[error("Effect already exists: {0}")]
    AlreadyExists(EffectId),

    #[error("Degenerate input range: min_input == max_input == {0}")]
    DegenerateRange(f64),

    #[error("Aggregation '{method}' is not valid for {kind} effects")]
    MethodMismatch { kind: &'static str, method: &'static str },

    #[error("Expected exactly {expected} telemetry input(s), found {found}")]
    SelectorCount { expected: usize, found: usize },

    #[error("Invalid pulse duration: {0}")]
    InvalidPulseDuration(f64),

    #[error("Invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Unknown telemetry field: {0}")]
    UnknownField(String),

    #[error("No telemetry inputs resolved")]
    NoInputs,

    #[error("Input value is not finite")]
    NonFiniteInput,
}

/// Configuration and settings persistence errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {details}")]
    Parse { path: PathBuf, details: String },

    #[error("Failed to serialize: {0}")]
    Serialize(String),

    #[error("No configuration directory available")]
    NoConfigDir,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
