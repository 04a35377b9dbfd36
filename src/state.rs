//! Shared telemetry/audio state
//!
//! The single synchronized store between the telemetry worker, the pulse timer
//! and the audio callback. Every access takes the one mutex for a copy in or
//! out; no computation or I/O happens while it is held.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::audio::recording::RecordTap;
use crate::audio::synth::Voice;
use crate::effects::{EffectConfig, EffectId};
use crate::error::EffectError;
use crate::schema::{CatalogEntry, DecodedPacket};

/// Per-effect mutable synthesis state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EffectRuntime {
    /// Target amplitude for the next audio block
    pub amplitude: f32,
    /// Amplitude the previous block ended at
    pub prev_amplitude: f32,
    /// Oscillator phase in radians
    pub phase: f64,
    /// Last input seen by a trigger effect
    pub last_input: Option<f64>,
    /// Bumped on every pulse and every cancellation
    pub pulse_generation: u64,
    pub pulse_pending: bool,
}

impl EffectRuntime {
    fn cancel_pulse(&mut self) {
        if self.pulse_pending {
            self.pulse_generation += 1;
            self.pulse_pending = false;
        }
    }
}

/// Everything the effect engine needs for one cycle
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub effects: Vec<EffectConfig>,
    pub telemetry: HashMap<u8, Arc<DecodedPacket>>,
}

struct Inner {
    telemetry: HashMap<u8, Arc<DecodedPacket>>,
    effects: Vec<EffectConfig>,
    runtime: HashMap<EffectId, EffectRuntime>,
    plots: HashMap<EffectId, VecDeque<f64>>,
    faults: HashMap<EffectId, String>,
    channels: Vec<String>,
    source: Option<String>,
    catalog: Vec<CatalogEntry>,
    record_tap: Option<RecordTap>,
    plot_capacity: usize,
}

/// Process-wide state, passed explicitly to every component
pub struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    pub fn new(plot_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                telemetry: HashMap::new(),
                effects: Vec::new(),
                runtime: HashMap::new(),
                plots: HashMap::new(),
                faults: HashMap::new(),
                channels: Vec::new(),
                source: None,
                catalog: Vec::new(),
                record_tap: None,
                plot_capacity: plot_capacity.max(1),
            }),
        }
    }

    /// Create a new shared handle
    pub fn shared(plot_capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(plot_capacity))
    }

    // ---------------------------------------------------------------------
    // Telemetry
    // ---------------------------------------------------------------------

    /// Replace the stored packet for its id (last value wins)
    pub fn store_packet(&self, packet: DecodedPacket) {
        let packet = Arc::new(packet);
        self.inner.lock().telemetry.insert(packet.packet_id, packet);
    }

    pub fn packet(&self, packet_id: u8) -> Option<Arc<DecodedPacket>> {
        self.inner.lock().telemetry.get(&packet_id).cloned()
    }

    pub fn clear_telemetry(&self) {
        self.inner.lock().telemetry.clear();
    }

    /// Record the active source and its field catalog; stale packets are dropped
    pub fn set_source(&self, name: &str, catalog: Vec<CatalogEntry>) {
        let mut inner = self.inner.lock();
        inner.source = Some(name.to_string());
        inner.catalog = catalog;
        inner.telemetry.clear();
    }

    pub fn source_name(&self) -> Option<String> {
        self.inner.lock().source.clone()
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.inner.lock().catalog.clone()
    }

    // ---------------------------------------------------------------------
    // Effect configuration
    // ---------------------------------------------------------------------

    pub fn effects(&self) -> Vec<EffectConfig> {
        self.inner.lock().effects.clone()
    }

    pub fn effect(&self, id: EffectId) -> Option<EffectConfig> {
        self.inner.lock().effects.iter().find(|e| e.id == id).cloned()
    }

    pub fn add_effect(&self, effect: EffectConfig) -> Result<(), EffectError> {
        let mut inner = self.inner.lock();
        if inner.effects.iter().any(|e| e.id == effect.id) {
            return Err(EffectError::AlreadyExists(effect.id));
        }
        inner.runtime.insert(effect.id, EffectRuntime::default());
        inner.effects.push(effect);
        Ok(())
    }

    /// Replace an effect's configuration in place, keeping its position
    pub fn update_effect(&self, effect: EffectConfig) -> Result<(), EffectError> {
        let id = effect.id;
        let mut inner = self.inner.lock();
        let slot = inner
            .effects
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(EffectError::NotFound(id))?;
        let inputs_changed = slot.selectors != effect.selectors;
        *slot = effect;

        // A trigger re-seeds from its new input instead of firing on the switch
        if inputs_changed {
            if let Some(runtime) = inner.runtime.get_mut(&id) {
                runtime.last_input = None;
            }
        }
        Ok(())
    }

    pub fn remove_effect(&self, id: EffectId) -> Result<EffectConfig, EffectError> {
        let mut inner = self.inner.lock();
        let position = inner
            .effects
            .iter()
            .position(|e| e.id == id)
            .ok_or(EffectError::NotFound(id))?;
        inner.runtime.remove(&id);
        inner.plots.remove(&id);
        inner.faults.remove(&id);
        Ok(inner.effects.remove(position))
    }

    /// Replace the whole effect list. Runtime state survives for ids that remain.
    pub fn replace_effects(&self, effects: Vec<EffectConfig>) {
        let mut inner = self.inner.lock();
        let mut runtime = HashMap::with_capacity(effects.len());
        for effect in &effects {
            let state = inner.runtime.remove(&effect.id).unwrap_or_default();
            runtime.insert(effect.id, state);
        }
        inner.plots.retain(|id, _| runtime.contains_key(id));
        inner.faults.retain(|id, _| runtime.contains_key(id));
        inner.runtime = runtime;
        inner.effects = effects;
    }

    /// Effect list and decoded packets, copied out under one lock
    pub fn engine_snapshot(&self) -> EngineSnapshot {
        let inner = self.inner.lock();
        EngineSnapshot {
            effects: inner.effects.clone(),
            telemetry: inner.telemetry.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // Runtime state
    // ---------------------------------------------------------------------

    pub fn runtime(&self, id: EffectId) -> Option<EffectRuntime> {
        self.inner.lock().runtime.get(&id).copied()
    }

    pub fn amplitude(&self, id: EffectId) -> Option<f32> {
        self.inner.lock().runtime.get(&id).map(|r| r.amplitude)
    }

    pub fn set_amplitude(&self, id: EffectId, amplitude: f32) -> bool {
        match self.inner.lock().runtime.get_mut(&id) {
            Some(runtime) => {
                runtime.amplitude = amplitude;
                true
            }
            None => false,
        }
    }

    /// Zero an effect and cancel any pending pulse reset.
    /// Returns whether anything changed.
    pub fn silence(&self, id: EffectId) -> bool {
        let mut inner = self.inner.lock();
        let Some(runtime) = inner.runtime.get_mut(&id) else {
            return false;
        };
        let changed = runtime.amplitude != 0.0 || runtime.pulse_pending;
        runtime.amplitude = 0.0;
        runtime.cancel_pulse();
        changed
    }

    /// Edge detection for trigger effects. The first observation only seeds the
    /// stored input. On a change the amplitude jumps to `amplitude` and the new
    /// pulse generation is returned for scheduling its reset.
    pub fn fire_on_change(&self, id: EffectId, input: f64, amplitude: f32) -> Option<u64> {
        let mut inner = self.inner.lock();
        let runtime = inner.runtime.get_mut(&id)?;
        match runtime.last_input {
            None => {
                runtime.last_input = Some(input);
                None
            }
            Some(previous) if previous == input => None,
            Some(_) => {
                runtime.last_input = Some(input);
                runtime.amplitude = amplitude;
                runtime.pulse_generation += 1;
                runtime.pulse_pending = true;
                Some(runtime.pulse_generation)
            }
        }
    }

    /// End a pulse if `generation` is still the latest one
    pub fn reset_pulse(&self, id: EffectId, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.runtime.get_mut(&id) {
            Some(runtime) if runtime.pulse_pending && runtime.pulse_generation == generation => {
                runtime.amplitude = 0.0;
                runtime.pulse_pending = false;
                true
            }
            _ => false,
        }
    }

    /// Zero every effect if any is sounding. Returns true only when it did,
    /// so repeated calls during one pause act once.
    pub fn silence_all_if_active(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.runtime.values().any(|r| r.amplitude != 0.0) {
            return false;
        }
        for runtime in inner.runtime.values_mut() {
            runtime.amplitude = 0.0;
            runtime.cancel_pulse();
        }
        true
    }

    // ---------------------------------------------------------------------
    // GUI-facing outputs
    // ---------------------------------------------------------------------

    pub fn push_plot_sample(&self, id: EffectId, value: f64) {
        let mut inner = self.inner.lock();
        let capacity = inner.plot_capacity;
        let samples = inner
            .plots
            .entry(id)
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        if samples.len() == capacity {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    pub fn plot_samples(&self, id: EffectId) -> Vec<f64> {
        self.inner
            .lock()
            .plots
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn set_fault(&self, id: EffectId, fault: Option<String>) {
        let mut inner = self.inner.lock();
        match fault {
            Some(message) => {
                inner.faults.insert(id, message);
            }
            None => {
                inner.faults.remove(&id);
            }
        }
    }

    pub fn fault(&self, id: EffectId) -> Option<String> {
        self.inner.lock().faults.get(&id).cloned()
    }

    // ---------------------------------------------------------------------
    // Audio
    // ---------------------------------------------------------------------

    /// Output channel roster, e.g. `channel_1..channel_N`
    pub fn set_channels(&self, channels: Vec<String>) {
        self.inner.lock().channels = channels;
    }

    pub fn channels(&self) -> Vec<String> {
        self.inner.lock().channels.clone()
    }

    /// Copy synthesis parameters of every effect into `voices`
    pub fn snapshot_voices(&self, voices: &mut Vec<Voice>) {
        voices.clear();
        let inner = self.inner.lock();
        for effect in &inner.effects {
            let Some(runtime) = inner.runtime.get(&effect.id) else {
                continue;
            };
            voices.push(Voice {
                id: effect.id,
                frequency: effect.frequency,
                channel: inner.channels.iter().position(|c| *c == effect.channel),
                amplitude: runtime.amplitude,
                prev_amplitude: runtime.prev_amplitude,
                phase: runtime.phase,
            });
        }
    }

    /// Store advanced phases and ramp end points, then hand the block to the
    /// recording tap outside the lock
    pub fn commit_block(&self, voices: &[Voice], rendered: &[f32]) {
        let tap = {
            let mut inner = self.inner.lock();
            for voice in voices {
                if let Some(runtime) = inner.runtime.get_mut(&voice.id) {
                    runtime.phase = voice.phase;
                    runtime.prev_amplitude = voice.amplitude;
                }
            }
            inner.record_tap.clone()
        };
        if let Some(tap) = tap {
            tap.push(rendered);
        }
    }

    /// Install or remove the recording tap. Removing it lets the writer finish.
    pub fn set_record_tap(&self, tap: Option<RecordTap>) {
        self.inner.lock().record_tap = tap;
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().record_tap.is_some()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(crate::constants::PLOT_HISTORY)
    }
}
