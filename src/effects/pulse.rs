//! Deferred pulse resets for trigger effects
//!
//! One timer thread serves every trigger effect. Each scheduled reset carries
//! the pulse generation it belongs to; the shared state ignores a reset whose
//! generation is no longer current, so a retrigger silently supersedes it.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::effects::EffectId;
use crate::state::SharedState;

#[derive(Debug)]
struct Reset {
    id: EffectId,
    generation: u64,
    deadline: Instant,
}

/// Handle to the pulse timer thread.
///
/// Clones share the thread, which exits once every handle is dropped.
#[derive(Clone)]
pub struct PulseScheduler {
    tx: Sender<Reset>,
}

impl PulseScheduler {
    /// Spawn the timer thread resetting pulses in `state`
    pub fn start(state: Arc<SharedState>) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();

        thread::Builder::new()
            .name("pulse-timer".to_string())
            .spawn(move || run(rx, state))?;

        Ok(Self { tx })
    }

    /// End pulse `generation` of effect `id` after `after`.
    /// A later schedule for the same effect replaces this one.
    pub fn schedule(&self, id: EffectId, generation: u64, after: Duration) {
        let now = Instant::now();
        // An unrepresentable deadline ends the pulse on the next tick
        let deadline = now.checked_add(after).unwrap_or(now);
        let reset = Reset {
            id,
            generation,
            deadline,
        };
        if self.tx.send(reset).is_err() {
            warn!(effect = %id, "Pulse timer is gone, reset dropped");
        }
    }
}

fn run(rx: Receiver<Reset>, state: Arc<SharedState>) {
    let mut pending: HashMap<EffectId, (u64, Instant)> = HashMap::new();

    loop {
        let received = match pending.values().map(|&(_, deadline)| deadline).min() {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(reset) => {
                pending.insert(reset.id, (reset.generation, reset.deadline));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        pending.retain(|&id, &mut (generation, deadline)| {
            if deadline > now {
                return true;
            }
            if state.reset_pulse(id, generation) {
                debug!(effect = %id, generation, "Pulse ended");
            }
            false
        });
    }

    debug!("Pulse timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectConfig;

    fn armed_trigger(state: &SharedState) -> EffectId {
        let effect = EffectConfig::trigger("gear", "gear", 0.2);
        let id = effect.id;
        state.add_effect(effect).unwrap();
        assert_eq!(state.fire_on_change(id, 1.0, 0.9), None);
        id
    }

    fn wait_for_silence(state: &SharedState, id: EffectId, limit: Duration) -> Option<Instant> {
        let start = Instant::now();
        while start.elapsed() < limit {
            if state.amplitude(id) == Some(0.0) {
                return Some(Instant::now());
            }
            thread::sleep(Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn test_pulse_ends_after_duration() {
        let state = SharedState::shared(8);
        let scheduler = PulseScheduler::start(state.clone()).unwrap();
        let id = armed_trigger(&state);

        let fired = Instant::now();
        let generation = state.fire_on_change(id, 2.0, 0.9).unwrap();
        scheduler.schedule(id, generation, Duration::from_millis(200));
        assert_eq!(state.amplitude(id), Some(0.9));

        let ended = wait_for_silence(&state, id, Duration::from_secs(2)).unwrap();
        assert!(ended.duration_since(fired) >= Duration::from_millis(200));
    }

    #[test]
    fn test_retrigger_extends_pulse() {
        let state = SharedState::shared(8);
        let scheduler = PulseScheduler::start(state.clone()).unwrap();
        let id = armed_trigger(&state);

        let generation = state.fire_on_change(id, 2.0, 0.9).unwrap();
        scheduler.schedule(id, generation, Duration::from_millis(200));

        thread::sleep(Duration::from_millis(100));
        let retriggered = Instant::now();
        let generation = state.fire_on_change(id, 3.0, 0.9).unwrap();
        scheduler.schedule(id, generation, Duration::from_millis(200));

        // Past the first deadline, still sounding
        thread::sleep(Duration::from_millis(150));
        assert_eq!(state.amplitude(id), Some(0.9));

        let ended = wait_for_silence(&state, id, Duration::from_secs(2)).unwrap();
        assert!(ended.duration_since(retriggered) >= Duration::from_millis(200));
    }

    #[test]
    fn test_unrepresentable_deadline_ends_pulse() {
        let state = SharedState::shared(8);
        let scheduler = PulseScheduler::start(state.clone()).unwrap();
        let id = armed_trigger(&state);

        let generation = state.fire_on_change(id, 2.0, 0.9).unwrap();
        scheduler.schedule(id, generation, Duration::MAX);
        assert!(wait_for_silence(&state, id, Duration::from_secs(2)).is_some());
    }

    #[test]
    fn test_cancelled_pulse_is_not_reset_again() {
        let state = SharedState::shared(8);
        let scheduler = PulseScheduler::start(state.clone()).unwrap();
        let id = armed_trigger(&state);

        let generation = state.fire_on_change(id, 2.0, 0.9).unwrap();
        scheduler.schedule(id, generation, Duration::from_millis(20));
        state.silence(id);
        state.set_amplitude(id, 0.4);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(state.amplitude(id), Some(0.4));
    }
}
