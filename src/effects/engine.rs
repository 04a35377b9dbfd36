//! Per-cycle effect processing
//!
//! Runs on the telemetry worker after every decoded packet. Each enabled
//! effect resolves its selectors against the latest packets, aggregates them
//! and writes its amplitude into the shared state. A failing effect is held
//! silent and never stops the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::effects::{EffectConfig, EffectId, EffectKind, PulseScheduler, TelemetrySelector};
use crate::error::EffectError;
use crate::schema::{DecodedPacket, FieldLocator, TelemetrySource};
use crate::state::SharedState;

/// Selectors of one effect resolved against the active source
struct Resolution {
    selectors: Vec<TelemetrySelector>,
    locators: Result<Vec<FieldLocator>, EffectError>,
}

/// What one cycle did to an effect
#[derive(Debug, Clone, PartialEq)]
enum Cycle {
    Updated,
    /// Nothing resolvable yet; state untouched
    Skipped,
    /// Updated, but the configuration needs attention
    Degraded(EffectError),
}

pub struct EffectEngine {
    source: Arc<TelemetrySource>,
    state: Arc<SharedState>,
    pulses: PulseScheduler,
    resolved: HashMap<EffectId, Resolution>,
    /// Fault currently reported per effect
    faults: HashMap<EffectId, EffectError>,
    /// (effect, field) pairs already warned about as unresolvable
    waiting: HashSet<(EffectId, String)>,
    /// Effects already warned about for having no inputs
    starved: HashSet<EffectId>,
}

impl EffectEngine {
    pub fn new(source: Arc<TelemetrySource>, state: Arc<SharedState>, pulses: PulseScheduler) -> Self {
        Self {
            source,
            state,
            pulses,
            resolved: HashMap::new(),
            faults: HashMap::new(),
            waiting: HashSet::new(),
            starved: HashSet::new(),
        }
    }

    pub fn source(&self) -> &TelemetrySource {
        &self.source
    }

    /// Run every configured effect once against the current telemetry
    pub fn process(&mut self) {
        let snapshot = self.state.engine_snapshot();

        let live: HashSet<EffectId> = snapshot.effects.iter().map(|e| e.id).collect();
        self.resolved.retain(|id, _| live.contains(id));
        self.faults.retain(|id, _| live.contains(id));
        self.waiting.retain(|(id, _)| live.contains(id));
        self.starved.retain(|id| live.contains(id));

        for effect in &snapshot.effects {
            if !effect.enabled {
                if self.state.silence(effect.id) {
                    debug!(effect = %effect.title, "Effect disabled, silenced");
                }
                self.clear_fault(effect.id);
                continue;
            }

            match self.process_effect(effect, &snapshot.telemetry) {
                Ok(Cycle::Updated) => self.clear_fault(effect.id),
                Ok(Cycle::Skipped) => {}
                Ok(Cycle::Degraded(fault)) => self.report_fault(effect, fault),
                Err(fault) => {
                    self.state.silence(effect.id);
                    self.report_fault(effect, fault);
                }
            }
        }
    }

    /// Silence everything once when the telemetry stream has gone quiet.
    /// Returns whether anything was sounding.
    pub fn pause_if_active(&self) -> bool {
        let silenced = self.state.silence_all_if_active();
        if silenced {
            info!(source = self.source.name(), "Telemetry paused, effects silenced");
        }
        silenced
    }

    fn process_effect(
        &mut self,
        effect: &EffectConfig,
        telemetry: &HashMap<u8, Arc<DecodedPacket>>,
    ) -> Result<Cycle, EffectError> {
        effect.validate()?;
        let locators = self.locators(effect)?;

        let mut values = Vec::with_capacity(locators.len());
        for (selector, locator) in effect.selectors.iter().zip(&locators) {
            let extracted = match telemetry.get(&locator.packet_id) {
                Some(packet) => locator.extract(packet).map_err(|e| e.to_string()),
                None => Err(format!("no packet {} received yet", locator.packet_id)),
            };

            match extracted {
                Ok(value) => {
                    if !self.waiting.is_empty() {
                        self.waiting.remove(&(effect.id, selector.field.clone()));
                    }
                    values.push(value);
                }
                Err(reason) => {
                    if self.waiting.insert((effect.id, selector.field.clone())) {
                        warn!(
                            effect = %effect.title,
                            field = %selector.field,
                            "Telemetry input skipped: {}",
                            reason
                        );
                    }
                }
            }
        }

        if values.is_empty() {
            if self.starved.insert(effect.id) {
                warn!(effect = %effect.title, "No telemetry inputs resolved, effect skipped");
            }
            return Ok(Cycle::Skipped);
        }
        self.starved.remove(&effect.id);

        let input = effect.aggregation.apply(&values)?;
        if !input.is_finite() {
            return Err(EffectError::NonFiniteInput);
        }
        self.state.push_plot_sample(effect.id, input);

        match &effect.kind {
            EffectKind::Range(params) => {
                let amplitude = params.amplitude(input, effect.max_output_amplitude);
                self.state.set_amplitude(effect.id, amplitude);
                debug!(effect = %effect.title, input, amplitude, "Range effect updated");

                if params.is_degenerate() {
                    return Ok(Cycle::Degraded(EffectError::DegenerateRange(params.min_input)));
                }
            }
            EffectKind::Trigger(params) => {
                if let Some(generation) =
                    self.state
                        .fire_on_change(effect.id, input, effect.max_output_amplitude)
                {
                    let duration = effect
                        .pulse_duration()
                        .ok_or(EffectError::InvalidPulseDuration(params.pulse_duration))?;
                    self.pulses.schedule(effect.id, generation, duration);
                    debug!(effect = %effect.title, input, generation, "Trigger fired");
                }
            }
        }

        Ok(Cycle::Updated)
    }

    /// Locators for the effect's selectors, re-resolved only when they change
    fn locators(&mut self, effect: &EffectConfig) -> Result<Vec<FieldLocator>, EffectError> {
        let stale = self
            .resolved
            .get(&effect.id)
            .map_or(true, |r| r.selectors != effect.selectors);

        if stale {
            let locators = effect
                .selectors
                .iter()
                .map(|s| {
                    self.source
                        .locate(&s.field)
                        .copied()
                        .ok_or_else(|| EffectError::UnknownField(s.field.clone()))
                })
                .collect();
            self.waiting.retain(|(id, _)| *id != effect.id);
            self.resolved.insert(
                effect.id,
                Resolution {
                    selectors: effect.selectors.clone(),
                    locators,
                },
            );
        }

        match self.resolved.get(&effect.id) {
            Some(resolution) => resolution.locators.clone(),
            None => Err(EffectError::NoInputs),
        }
    }

    fn report_fault(&mut self, effect: &EffectConfig, fault: EffectError) {
        // Compared as text: parameter faults may carry NaN
        if let Some(current) = self.faults.get(&effect.id) {
            if current.to_string() == fault.to_string() {
                return;
            }
        }
        error!(effect = %effect.title, id = %effect.id, "{}", fault);
        self.state.set_fault(effect.id, Some(fault.to_string()));
        self.faults.insert(effect.id, fault);
    }

    fn clear_fault(&mut self, id: EffectId) {
        if self.faults.remove(&id).is_some() {
            self.state.set_fault(id, None);
            info!(id = %id, "Effect fault cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{Aggregation, RangeParams};
    use crate::schema::f1_23::{self, CAR_TELEMETRY_ID, MOTION_EX_ID};

    struct Rig {
        state: Arc<SharedState>,
        engine: EffectEngine,
    }

    fn rig() -> Rig {
        let state = SharedState::shared(16);
        let pulses = PulseScheduler::start(state.clone()).unwrap();
        let source = Arc::new(f1_23::source().unwrap());
        let engine = EffectEngine::new(source, state.clone(), pulses);
        Rig { state, engine }
    }

    /// Car telemetry for the player in slot 0 at `speed` km/h and `gear`
    fn car_telemetry(rig: &Rig, speed: u16, gear: i8) {
        let schema = f1_23::car_telemetry_packet();
        let mut data = vec![0u8; schema.size()];
        data[6] = CAR_TELEMETRY_ID;
        data[29..31].copy_from_slice(&speed.to_le_bytes());
        data[29 + 15] = gear as u8;
        let values = schema.decode(&data).unwrap();
        rig.state.store_packet(DecodedPacket::new(CAR_TELEMETRY_ID, values));
    }

    fn speed_effect(min_input: f64, max_input: f64) -> EffectConfig {
        EffectConfig::range(
            "speed",
            &["speed"],
            RangeParams {
                min_input,
                max_input,
                min_output_amplitude: 0.0,
                output_exponent: 1.0,
            },
        )
    }

    #[test]
    fn test_range_effect_follows_telemetry() {
        let mut rig = rig();
        let mut effect = speed_effect(0.0, 100.0);
        effect.max_output_amplitude = 1.0;
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();

        car_telemetry(&rig, 50, 3);
        rig.engine.process();
        assert!((rig.state.amplitude(id).unwrap() - 0.5).abs() < 1e-6);
        assert_eq!(rig.state.plot_samples(id), vec![50.0]);

        car_telemetry(&rig, 150, 3);
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(1.0));
    }

    #[test]
    fn test_missing_packet_skips_without_state_change() {
        let mut rig = rig();
        let effect = EffectConfig::range("slip", &["wheelSlipRatioFL"], RangeParams::default());
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();
        rig.state.set_amplitude(id, 0.3);

        car_telemetry(&rig, 50, 3);
        assert!(rig.state.packet(MOTION_EX_ID).is_none());
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.3));
        assert!(rig.state.plot_samples(id).is_empty());
        assert!(rig.state.fault(id).is_none());
    }

    #[test]
    fn test_partially_resolved_selectors_still_aggregate() {
        let mut rig = rig();
        let mut effect = EffectConfig::range(
            "mixed",
            &["speed", "wheelSlipRatioFL"],
            RangeParams {
                min_input: 0.0,
                max_input: 200.0,
                ..RangeParams::default()
            },
        );
        effect.aggregation = Aggregation::Max;
        effect.max_output_amplitude = 1.0;
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();

        car_telemetry(&rig, 100, 3);
        rig.engine.process();
        assert!((rig.state.amplitude(id).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_effect_is_silenced_every_cycle() {
        let mut rig = rig();
        let mut effect = speed_effect(0.0, 100.0);
        effect.enabled = false;
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();
        rig.state.set_amplitude(id, 0.8);

        car_telemetry(&rig, 90, 3);
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.0));
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.0));
        assert!(rig.state.plot_samples(id).is_empty());
    }

    #[test]
    fn test_configuration_fault_silences_only_that_effect() {
        let mut rig = rig();
        let mut broken = speed_effect(0.0, 100.0);
        broken.aggregation = Aggregation::Change;
        let broken_id = broken.id;
        let good = speed_effect(0.0, 100.0);
        let good_id = good.id;
        rig.state.add_effect(broken).unwrap();
        rig.state.add_effect(good).unwrap();
        rig.state.set_amplitude(broken_id, 0.7);

        car_telemetry(&rig, 100, 3);
        rig.engine.process();
        assert_eq!(rig.state.amplitude(broken_id), Some(0.0));
        assert!(rig.state.fault(broken_id).is_some());
        assert_eq!(rig.state.amplitude(good_id), Some(0.5));

        let mut fixed = rig.state.effect(broken_id).unwrap();
        fixed.aggregation = Aggregation::Average;
        rig.state.update_effect(fixed).unwrap();
        rig.engine.process();
        assert!(rig.state.fault(broken_id).is_none());
        assert_eq!(rig.state.amplitude(broken_id), Some(0.5));
    }

    #[test]
    fn test_unknown_field_is_a_fault() {
        let mut rig = rig();
        let effect = EffectConfig::range("bogus", &["warpFactor"], RangeParams::default());
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();

        car_telemetry(&rig, 10, 1);
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.0));
        assert!(rig.state.fault(id).unwrap().contains("warpFactor"));
    }

    #[test]
    fn test_degenerate_range_reports_but_steps() {
        let mut rig = rig();
        let mut effect = speed_effect(80.0, 80.0);
        effect.max_output_amplitude = 0.6;
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();

        car_telemetry(&rig, 90, 3);
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.6));
        assert!(rig.state.fault(id).is_some());

        car_telemetry(&rig, 70, 3);
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.0));
    }

    #[test]
    fn test_trigger_seeds_then_fires_on_change() {
        let mut rig = rig();
        let mut effect = EffectConfig::trigger("shift", "gear", 5.0);
        effect.max_output_amplitude = 0.9;
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();

        car_telemetry(&rig, 100, 3);
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.0));

        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.0));

        car_telemetry(&rig, 100, 4);
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.9));
        assert!(rig.state.runtime(id).unwrap().pulse_pending);
    }

    #[test]
    fn test_oversized_pulse_duration_is_a_fault() {
        let mut rig = rig();
        let shift = EffectConfig::trigger("shift", "gear", 1e20);
        let shift_id = shift.id;
        let speed = speed_effect(0.0, 100.0);
        let speed_id = speed.id;
        rig.state.add_effect(shift).unwrap();
        rig.state.add_effect(speed).unwrap();

        car_telemetry(&rig, 40, 3);
        rig.engine.process();
        car_telemetry(&rig, 60, 4);
        rig.engine.process();

        assert_eq!(rig.state.amplitude(shift_id), Some(0.0));
        assert!(rig.state.fault(shift_id).unwrap().contains("pulse duration"));
        assert!(!rig.state.runtime(shift_id).unwrap().pulse_pending);
        assert!((rig.state.amplitude(speed_id).unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_non_positive_exponent_is_a_fault() {
        let mut rig = rig();
        let mut effect = EffectConfig::range(
            "inverse",
            &["speed"],
            RangeParams {
                min_input: 0.0,
                max_input: 100.0,
                min_output_amplitude: 0.0,
                output_exponent: -1.0,
            },
        );
        effect.max_output_amplitude = 1.0;
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();
        rig.state.set_amplitude(id, 0.5);

        car_telemetry(&rig, 0, 1);
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.0));
        assert!(rig.state.fault(id).unwrap().contains("output_expo"));
    }

    #[test]
    fn test_nan_amplitude_fault_is_reported_once() {
        let mut rig = rig();
        let mut effect = speed_effect(0.0, 100.0);
        effect.max_output_amplitude = f32::NAN;
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();

        car_telemetry(&rig, 50, 3);
        rig.engine.process();
        rig.engine.process();
        assert_eq!(rig.state.amplitude(id), Some(0.0));
        assert!(rig.state.fault(id).unwrap().contains("max_output_amplitude"));
        assert_eq!(rig.engine.faults.len(), 1);
    }

    #[test]
    fn test_pause_silences_once() {
        let mut rig = rig();
        let effect = speed_effect(0.0, 100.0);
        let id = effect.id;
        rig.state.add_effect(effect).unwrap();
        car_telemetry(&rig, 60, 3);
        rig.engine.process();
        assert!(rig.state.amplitude(id).unwrap() > 0.0);

        assert!(rig.engine.pause_if_active());
        assert_eq!(rig.state.amplitude(id), Some(0.0));
        assert!(!rig.engine.pause_if_active());
    }
}
