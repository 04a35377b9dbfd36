//! UDP telemetry receiver
//!
//! Polls one datagram at a time with a short read timeout, classifies it by
//! the header's packet id and stores the decoded payload in the shared state.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, trace, warn};

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;
use crate::schema::{DecodedPacket, TelemetrySource};
use crate::state::SharedState;

/// Outcome of handling one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Known packet decoded and stored
    Decoded(u8),
    /// Shorter than the header; dropped silently
    TooShortForHeader,
    /// Packet id not described by the source
    UnknownPacket(u8),
    /// Shorter than the declared payload size
    SizeMismatch {
        packet_id: u8,
        expected: usize,
        actual: usize,
    },
}

/// Receiver statistics
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub datagrams: AtomicU64,
    pub decoded: AtomicU64,
    pub unknown: AtomicU64,
    pub malformed: AtomicU64,
}

impl ReceiverStats {
    fn record(&self, ingest: &Ingest) {
        self.datagrams.fetch_add(1, Ordering::Relaxed);
        let counter = match ingest {
            Ingest::Decoded(_) => &self.decoded,
            Ingest::UnknownPacket(_) => &self.unknown,
            Ingest::TooShortForHeader | Ingest::SizeMismatch { .. } => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct TelemetryReceiver {
    socket: UdpSocket,
    local_addr: SocketAddr,
    source: Arc<TelemetrySource>,
    state: Arc<SharedState>,
    buffer: Vec<u8>,
    stats: Arc<ReceiverStats>,
}

impl TelemetryReceiver {
    /// Bind `addr` and wait at most `poll_interval` per poll.
    /// A `recv_buffer_size` of zero keeps the OS default.
    pub fn bind(
        addr: SocketAddr,
        poll_interval: Duration,
        recv_buffer_size: usize,
        source: Arc<TelemetrySource>,
        state: Arc<SharedState>,
    ) -> Result<Self, NetworkError> {
        let bind_err = |e: std::io::Error| NetworkError::BindFailed(format!("{addr}: {e}"));

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        if recv_buffer_size > 0 {
            socket.set_recv_buffer_size(recv_buffer_size).map_err(bind_err)?;
        }
        socket.bind(&addr.into()).map_err(bind_err)?;

        let socket: UdpSocket = socket.into();
        socket
            .set_read_timeout(Some(poll_interval.max(Duration::from_millis(1))))
            .map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;

        info!(
            source = source.name(),
            addr = %local_addr,
            "Telemetry receiver bound"
        );

        Ok(Self {
            socket,
            local_addr,
            source,
            state,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
            stats: Arc::new(ReceiverStats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Wait one poll interval for a datagram.
    /// Returns true when a known packet was decoded.
    pub fn poll(&mut self) -> Result<bool, NetworkError> {
        let len = match self.socket.recv(&mut self.buffer) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(false)
            }
            // Windows reports ICMP port-unreachable on UDP sockets
            Err(e) if e.kind() == ErrorKind::ConnectionReset => return Ok(false),
            Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
        };

        let ingest = self.ingest(&self.buffer[..len]);
        Ok(matches!(ingest, Ingest::Decoded(_)))
    }

    /// Classify and decode one datagram, storing it on success
    pub fn ingest(&self, data: &[u8]) -> Ingest {
        let ingest = self.classify(data);
        self.stats.record(&ingest);
        ingest
    }

    fn classify(&self, data: &[u8]) -> Ingest {
        let Some(packet_id) = self.source.header().packet_id(data) else {
            return Ingest::TooShortForHeader;
        };

        let Some(schema) = self.source.packet(packet_id) else {
            trace!(packet_id, "Ignoring unused packet type");
            return Ingest::UnknownPacket(packet_id);
        };

        let expected = schema.size();
        if data.len() < expected {
            warn!(
                packet_id,
                expected,
                actual = data.len(),
                "Packet size mismatch, dropped"
            );
            return Ingest::SizeMismatch {
                packet_id,
                expected,
                actual: data.len(),
            };
        }

        match schema.decode(data) {
            Ok(values) => {
                trace!(packet_id, len = data.len(), "Packet decoded");
                self.state.store_packet(DecodedPacket::new(packet_id, values));
                Ingest::Decoded(packet_id)
            }
            Err(e) => {
                warn!(packet_id, error = %e, "Packet decode failed");
                Ingest::SizeMismatch {
                    packet_id,
                    expected,
                    actual: data.len(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::f1_23::{self, CAR_TELEMETRY_ID, MOTION_EX_ID};

    fn receiver() -> (TelemetryReceiver, Arc<SharedState>) {
        let state = SharedState::shared(8);
        let source = Arc::new(f1_23::source().unwrap());
        let receiver = TelemetryReceiver::bind(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(10),
            0,
            source,
            state.clone(),
        )
        .unwrap();
        (receiver, state)
    }

    fn datagram(packet_id: u8, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[6] = packet_id;
        data
    }

    #[test]
    fn test_classification() {
        let (receiver, state) = receiver();

        assert_eq!(receiver.ingest(&[0u8; 12]), Ingest::TooShortForHeader);
        assert_eq!(receiver.ingest(&datagram(2, 100)), Ingest::UnknownPacket(2));
        assert_eq!(
            receiver.ingest(&datagram(CAR_TELEMETRY_ID, 1000)),
            Ingest::SizeMismatch {
                packet_id: CAR_TELEMETRY_ID,
                expected: 1352,
                actual: 1000
            }
        );
        assert!(state.packet(CAR_TELEMETRY_ID).is_none());

        assert_eq!(
            receiver.ingest(&datagram(MOTION_EX_ID, 217)),
            Ingest::Decoded(MOTION_EX_ID)
        );
        assert!(state.packet(MOTION_EX_ID).is_some());

        let stats = receiver.stats();
        assert_eq!(stats.datagrams.load(Ordering::Relaxed), 4);
        assert_eq!(stats.decoded.load(Ordering::Relaxed), 1);
        assert_eq!(stats.unknown.load(Ordering::Relaxed), 1);
        assert_eq!(stats.malformed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_short_packet_leaves_previous_value() {
        let (receiver, state) = receiver();
        let mut good = datagram(MOTION_EX_ID, 217);
        good[29..33].copy_from_slice(&0.25f32.to_le_bytes());
        receiver.ingest(&good);
        let before = state.packet(MOTION_EX_ID).unwrap();

        receiver.ingest(&datagram(MOTION_EX_ID, 188));
        let after = state.packet(MOTION_EX_ID).unwrap();
        assert_eq!(before.values, after.values);
    }

    #[test]
    fn test_poll_without_data_is_not_an_error() {
        let (mut receiver, _) = receiver();
        assert!(!receiver.poll().unwrap());
    }

    #[test]
    fn test_poll_receives_over_loopback() {
        let (mut receiver, state) = receiver();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&datagram(CAR_TELEMETRY_ID, 1352), receiver.local_addr())
            .unwrap();

        let mut decoded = false;
        for _ in 0..100 {
            if receiver.poll().unwrap() {
                decoded = true;
                break;
            }
        }
        assert!(decoded);
        assert!(state.packet(CAR_TELEMETRY_ID).is_some());
    }
}
