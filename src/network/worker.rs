//! Telemetry worker thread
//!
//! Owns the receiver and the effect engine. Each decoded packet drives one
//! engine cycle; a quiet socket past the pause timeout silences the effects.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::effects::{EffectEngine, PulseScheduler};
use crate::error::NetworkError;
use crate::network::receiver::{ReceiverStats, TelemetryReceiver};
use crate::schema::TelemetrySource;
use crate::state::SharedState;

/// A running receive loop for one telemetry source
pub struct TelemetryWorker {
    source_name: String,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
    stop_timeout: Duration,
    stats: Arc<ReceiverStats>,
}

impl TelemetryWorker {
    /// Bind the socket and start the loop. A bind failure leaves nothing running.
    pub fn start(
        source: Arc<TelemetrySource>,
        state: Arc<SharedState>,
        pulses: PulseScheduler,
        config: &NetworkConfig,
    ) -> Result<Self, NetworkError> {
        let addr = config.socket_addr(source.default_port())?;
        let poll_interval = config.poll_interval();
        let pause_timeout = config.pause_timeout();

        let mut receiver = TelemetryReceiver::bind(
            addr,
            poll_interval,
            config.recv_buffer_size,
            source.clone(),
            state.clone(),
        )?;
        let local_addr = receiver.local_addr();
        let stats = receiver.stats();
        let mut engine = EffectEngine::new(source.clone(), state, pulses);

        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(format!("telemetry-{}", source.name()))
            .spawn(move || {
                let mut last_packet = Instant::now();

                while running_for_loop.load(Ordering::Relaxed) {
                    match receiver.poll() {
                        Ok(true) => {
                            last_packet = Instant::now();
                            engine.process();
                        }
                        Ok(false) => {
                            if last_packet.elapsed() >= pause_timeout {
                                engine.pause_if_active();
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Telemetry receive failed");
                            thread::sleep(poll_interval);
                        }
                    }
                }

                debug!("Telemetry loop exited");
                let _ = done_tx.send(());
            })
            .map_err(|e| NetworkError::Spawn(e.to_string()))?;

        info!(source = source.name(), addr = %local_addr, "Telemetry worker started");

        Ok(Self {
            source_name: source.name().to_string(),
            local_addr,
            running,
            thread_handle: Some(handle),
            done_rx,
            stop_timeout: config.stop_timeout(),
            stats,
        })
    }

    /// Stop the loop and wait for it, bounded by the stop timeout.
    /// Safe to call more than once.
    pub fn stop(&mut self) -> Result<(), NetworkError> {
        self.running.store(false, Ordering::SeqCst);

        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };

        match self.done_rx.recv_timeout(self.stop_timeout) {
            Ok(()) => {
                let _ = handle.join();
                info!(source = %self.source_name, "Telemetry worker stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!(source = %self.source_name, "Telemetry worker panicked");
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread is left detached; it exits on its next poll
                warn!(
                    source = %self.source_name,
                    timeout = ?self.stop_timeout,
                    "Telemetry worker did not stop in time"
                );
                Err(NetworkError::StopTimeout(self.stop_timeout))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }
}

impl Drop for TelemetryWorker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
