//! Loopback UDP through the telemetry worker into effect amplitudes

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shakelab::config::NetworkConfig;
use shakelab::effects::{EffectConfig, PulseScheduler, RangeParams};
use shakelab::network::TelemetryWorker;
use shakelab::schema::f1_23::{self, CAR_TELEMETRY_ID, MOTION_EX_ID};
use shakelab::state::SharedState;

struct Harness {
    state: Arc<SharedState>,
    worker: TelemetryWorker,
    sender: UdpSocket,
}

impl Harness {
    fn start(pause_timeout_ms: u64) -> Self {
        let state = SharedState::shared(64);
        let pulses = PulseScheduler::start(state.clone()).unwrap();
        let source = Arc::new(f1_23::source().unwrap());
        let config = NetworkConfig {
            bind_address: "127.0.0.1".to_string(),
            udp_port: Some(0),
            pause_timeout_ms,
            ..NetworkConfig::default()
        };
        let worker = TelemetryWorker::start(source, state.clone(), pulses, &config).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        Self {
            state,
            worker,
            sender,
        }
    }

    fn target(&self) -> SocketAddr {
        self.worker.local_addr()
    }

    /// Car telemetry with the player in slot 5
    fn send_car(&self, speed: u16, gear: i8) {
        let mut data = vec![0u8; 1352];
        data[6] = CAR_TELEMETRY_ID;
        data[27] = 5;
        let car = 29 + 5 * 60;
        data[car..car + 2].copy_from_slice(&speed.to_le_bytes());
        data[car + 15] = gear as u8;
        self.sender.send_to(&data, self.target()).unwrap();
    }

    fn wait_until(&self, limit: Duration, check: impl Fn(&SharedState) -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if check(&self.state) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }
}

#[test]
fn range_effect_tracks_player_car() {
    let harness = Harness::start(10_000);
    let mut effect = EffectConfig::range(
        "Speed",
        &["speed"],
        RangeParams {
            min_input: 0.0,
            max_input: 300.0,
            min_output_amplitude: 0.0,
            output_exponent: 1.0,
        },
    );
    effect.max_output_amplitude = 1.0;
    let id = effect.id;
    harness.state.add_effect(effect).unwrap();

    harness.send_car(150, 4);
    assert!(harness.wait_until(Duration::from_secs(2), |s| {
        s.amplitude(id).is_some_and(|a| (a - 0.5).abs() < 1e-6)
    }));

    harness.send_car(300, 4);
    assert!(harness.wait_until(Duration::from_secs(2), |s| s.amplitude(id) == Some(1.0)));
    assert!(harness.state.plot_samples(id).contains(&300.0));
}

#[test]
fn short_datagram_leaves_telemetry_untouched() {
    let harness = Harness::start(10_000);
    harness.send_car(100, 2);
    assert!(harness.wait_until(Duration::from_secs(2), |s| s.packet(CAR_TELEMETRY_ID).is_some()));
    let before = harness.state.packet(CAR_TELEMETRY_ID).unwrap();

    let mut short = vec![0u8; 1200];
    short[6] = CAR_TELEMETRY_ID;
    harness.sender.send_to(&short, harness.target()).unwrap();
    // Motion packet sent afterwards marks that the short one was handled
    let mut motion = vec![0u8; 217];
    motion[6] = MOTION_EX_ID;
    harness.sender.send_to(&motion, harness.target()).unwrap();
    assert!(harness.wait_until(Duration::from_secs(2), |s| s.packet(MOTION_EX_ID).is_some()));

    let after = harness.state.packet(CAR_TELEMETRY_ID).unwrap();
    assert_eq!(before.values, after.values);
    assert_eq!(before.received_at, after.received_at);
}

#[test]
fn quiet_stream_silences_effects() {
    let harness = Harness::start(100);
    let effect = EffectConfig::range(
        "Speed",
        &["speed"],
        RangeParams {
            min_input: 0.0,
            max_input: 100.0,
            ..RangeParams::default()
        },
    );
    let id = effect.id;
    harness.state.add_effect(effect).unwrap();

    harness.send_car(80, 3);
    assert!(harness.wait_until(Duration::from_secs(2), |s| {
        s.amplitude(id).is_some_and(|a| a > 0.0)
    }));
    assert!(harness.wait_until(Duration::from_secs(2), |s| s.amplitude(id) == Some(0.0)));
}

#[test]
fn gear_change_pulses_for_its_duration() {
    let mut harness = Harness::start(10_000);
    let mut effect = EffectConfig::trigger("Shift", "gear", 0.2);
    effect.max_output_amplitude = 0.8;
    let id = effect.id;
    harness.state.add_effect(effect).unwrap();

    harness.send_car(120, 3);
    assert!(harness.wait_until(Duration::from_secs(2), |s| {
        s.runtime(id).is_some_and(|r| r.last_input == Some(3.0))
    }));
    assert_eq!(harness.state.amplitude(id), Some(0.0));

    let shifted = Instant::now();
    harness.send_car(125, 4);
    assert!(harness.wait_until(Duration::from_secs(2), |s| s.amplitude(id) == Some(0.8)));
    assert!(harness.wait_until(Duration::from_secs(2), |s| s.amplitude(id) == Some(0.0)));
    assert!(shifted.elapsed() >= Duration::from_millis(200));

    harness.worker.stop().unwrap();
    harness.worker.stop().unwrap();
}
