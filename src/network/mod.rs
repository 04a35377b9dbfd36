//! Network subsystem for UDP telemetry intake

pub mod receiver;
pub mod worker;

pub use receiver::{Ingest, ReceiverStats, TelemetryReceiver};
pub use worker::TelemetryWorker;
