//! Effect configuration and transfer functions
//!
//! An effect maps one or more telemetry fields to the amplitude of a sine
//! component on an output channel. Range effects follow a continuous transfer
//! curve; trigger effects pulse on every change of their input.

pub mod engine;
pub mod pulse;

pub use engine::EffectEngine;
pub use pulse::PulseScheduler;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_PULSE_DURATION_SECS;
use crate::error::EffectError;

/// Identifier of a configured effect
pub type EffectId = Uuid;

/// Reduction applied to the resolved telemetry values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Value with the largest magnitude, sign kept
    Max,
    /// Value with the smallest magnitude, sign kept
    Min,
    /// Mean of absolute values. Sign is discarded, so opposing inputs do not cancel.
    Average,
    /// Single raw input, passed through for edge detection
    Change,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Max => "max",
            Aggregation::Min => "min",
            Aggregation::Average => "average",
            Aggregation::Change => "change",
        }
    }

    /// Reduce `values` to one scalar
    pub fn apply(&self, values: &[f64]) -> Result<f64, EffectError> {
        let Some(&first) = values.first() else {
            return Err(EffectError::NoInputs);
        };

        let value = match self {
            Aggregation::Max => values
                .iter()
                .fold(first, |best, &v| if v.abs() > best.abs() { v } else { best }),
            Aggregation::Min => values
                .iter()
                .fold(first, |best, &v| if v.abs() < best.abs() { v } else { best }),
            Aggregation::Average => {
                values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64
            }
            Aggregation::Change => {
                if values.len() != 1 {
                    return Err(EffectError::SelectorCount {
                        expected: 1,
                        found: values.len(),
                    });
                }
                first
            }
        };

        Ok(value)
    }
}

/// Reference to a telemetry field. The packet id is informational; the active
/// source's catalog is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySelector {
    #[serde(rename = "field_name")]
    pub field: String,
    #[serde(default)]
    pub packet_id: Option<u8>,
}

impl TelemetrySelector {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            packet_id: None,
        }
    }
}

/// Transfer curve of a range effect
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeParams {
    #[serde(default)]
    pub min_input: f64,
    #[serde(default)]
    pub max_input: f64,
    #[serde(default)]
    pub min_output_amplitude: f32,
    #[serde(rename = "output_expo", default = "default_exponent")]
    pub output_exponent: f64,
}

impl RangeParams {
    fn validate(&self) -> Result<(), EffectError> {
        let checks = [
            ("min_input", self.min_input),
            ("max_input", self.max_input),
            ("min_output_amplitude", self.min_output_amplitude as f64),
        ];
        for (name, value) in checks {
            if !value.is_finite() {
                return Err(EffectError::InvalidParameter { name, value });
            }
        }
        if !self.output_exponent.is_finite() || self.output_exponent <= 0.0 {
            return Err(EffectError::InvalidParameter {
                name: "output_expo",
                value: self.output_exponent,
            });
        }
        Ok(())
    }

    pub fn is_degenerate(&self) -> bool {
        self.min_input == self.max_input
    }

    /// Amplitude for `input`: zero below `min_input`, otherwise the normalized
    /// input raised to the exponent and scaled into `[min_output, max_output]`.
    /// A degenerate range behaves as a step at `min_input`.
    pub fn amplitude(&self, input: f64, max_output_amplitude: f32) -> f32 {
        if input.is_nan() || input < self.min_input {
            return 0.0;
        }

        let normalized = if self.is_degenerate() {
            1.0
        } else {
            ((input - self.min_input) / (self.max_input - self.min_input)).clamp(0.0, 1.0)
        };

        let min = self.min_output_amplitude as f64;
        let max = max_output_amplitude as f64;
        let amplitude = (min + (max - min) * normalized.powf(self.output_exponent)) as f32;
        if amplitude.is_finite() {
            amplitude
        } else {
            0.0
        }
    }
}

impl Default for RangeParams {
    fn default() -> Self {
        Self {
            min_input: 0.0,
            max_input: 1.0,
            min_output_amplitude: 0.0,
            output_exponent: 1.0,
        }
    }
}

/// Pulse shape of a trigger effect
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerParams {
    /// Seconds the pulse stays at full amplitude
    #[serde(default)]
    pub pulse_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect_type")]
pub enum EffectKind {
    #[serde(rename = "range_effect")]
    Range(RangeParams),
    #[serde(rename = "trigger_effect")]
    Trigger(TriggerParams),
}

impl EffectKind {
    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Range(_) => "range",
            EffectKind::Trigger(_) => "trigger",
        }
    }
}

impl EffectKind {
    /// Aggregation assumed when a record does not name one
    pub fn default_aggregation(&self) -> Aggregation {
        match self {
            EffectKind::Range(_) => Aggregation::Max,
            EffectKind::Trigger(_) => Aggregation::Change,
        }
    }
}

/// One configured effect, as edited by the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "EffectRecord")]
pub struct EffectConfig {
    pub id: EffectId,

    #[serde(rename = "effect_title")]
    pub title: String,

    #[serde(rename = "effect_enabled")]
    pub enabled: bool,

    #[serde(rename = "telemetry_inputs")]
    pub selectors: Vec<TelemetrySelector>,

    #[serde(rename = "process_method")]
    pub aggregation: Aggregation,

    /// Sine frequency in Hz
    pub frequency: f64,

    /// Output channel name, e.g. `channel_1`
    pub channel: String,

    /// Amplitude ceiling, also the trigger pulse level
    pub max_output_amplitude: f32,

    #[serde(flatten)]
    pub kind: EffectKind,
}

/// Stored form of [`EffectConfig`]; the aggregation may be left out
#[derive(Deserialize)]
struct EffectRecord {
    #[serde(default = "Uuid::new_v4")]
    id: EffectId,
    #[serde(rename = "effect_title", default)]
    title: String,
    #[serde(rename = "effect_enabled", default = "default_enabled")]
    enabled: bool,
    #[serde(rename = "telemetry_inputs", default)]
    selectors: Vec<TelemetrySelector>,
    #[serde(rename = "process_method", default)]
    aggregation: Option<Aggregation>,
    #[serde(default)]
    frequency: f64,
    #[serde(default = "default_channel")]
    channel: String,
    #[serde(default = "default_max_amplitude")]
    max_output_amplitude: f32,
    #[serde(flatten)]
    kind: EffectKind,
}

impl From<EffectRecord> for EffectConfig {
    fn from(record: EffectRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            enabled: record.enabled,
            selectors: record.selectors,
            aggregation: record
                .aggregation
                .unwrap_or_else(|| record.kind.default_aggregation()),
            frequency: record.frequency,
            channel: record.channel,
            max_output_amplitude: record.max_output_amplitude,
            kind: record.kind,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_channel() -> String {
    "channel_1".to_string()
}

fn default_max_amplitude() -> f32 {
    0.5
}

fn default_exponent() -> f64 {
    1.0
}

impl EffectConfig {
    /// New enabled range effect reading `fields`, aggregated by magnitude maximum
    pub fn range(title: &str, fields: &[&str], params: RangeParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            enabled: true,
            selectors: fields.iter().map(|f| TelemetrySelector::new(f)).collect(),
            aggregation: Aggregation::Max,
            frequency: 40.0,
            channel: default_channel(),
            max_output_amplitude: default_max_amplitude(),
            kind: EffectKind::Range(params),
        }
    }

    /// New enabled trigger effect pulsing on changes of `field`
    pub fn trigger(title: &str, field: &str, pulse_duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            enabled: true,
            selectors: vec![TelemetrySelector::new(field)],
            aggregation: Aggregation::Change,
            frequency: 60.0,
            channel: default_channel(),
            max_output_amplitude: default_max_amplitude(),
            kind: EffectKind::Trigger(TriggerParams { pulse_duration }),
        }
    }

    /// Check the combination of kind, aggregation and inputs. A failing effect
    /// is held silent by the engine.
    pub fn validate(&self) -> Result<(), EffectError> {
        match &self.kind {
            EffectKind::Range(_) => {
                if self.aggregation == Aggregation::Change {
                    return Err(EffectError::MethodMismatch {
                        kind: self.kind.name(),
                        method: self.aggregation.as_str(),
                    });
                }
            }
            EffectKind::Trigger(params) => {
                if self.aggregation != Aggregation::Change {
                    return Err(EffectError::MethodMismatch {
                        kind: self.kind.name(),
                        method: self.aggregation.as_str(),
                    });
                }
                if self.selectors.len() != 1 {
                    return Err(EffectError::SelectorCount {
                        expected: 1,
                        found: self.selectors.len(),
                    });
                }
                let duration = params.pulse_duration;
                if !(0.0..=MAX_PULSE_DURATION_SECS).contains(&duration) {
                    return Err(EffectError::InvalidPulseDuration(duration));
                }
            }
        }

        if !self.frequency.is_finite() || self.frequency < 0.0 {
            return Err(EffectError::InvalidParameter {
                name: "frequency",
                value: self.frequency,
            });
        }
        if !self.max_output_amplitude.is_finite() {
            return Err(EffectError::InvalidParameter {
                name: "max_output_amplitude",
                value: self.max_output_amplitude as f64,
            });
        }
        if let EffectKind::Range(params) = &self.kind {
            params.validate()?;
        }
        Ok(())
    }

    /// Pulse length of a trigger effect. `None` for range effects and for
    /// durations that do not fit a [`Duration`].
    pub fn pulse_duration(&self) -> Option<Duration> {
        match &self.kind {
            EffectKind::Trigger(params) => Duration::try_from_secs_f64(params.pulse_duration).ok(),
            EffectKind::Range(_) => None,
        }
    }
}
