//! The idle/keepalive handler (spec §4.6): stream accounting, idle-timeout
//! scheduling, PING keepalive with strike counting, and graceful GOAWAY
//! quiescence.
//!
//! Kept sans-IO like `connection.rs`: this module never touches a socket or
//! an `h2` connection directly. It tracks the relevant counters and
//! deadlines and emits `KeepaliveAction`s describing what the caller's
//! executor should do (send a frame, (re)schedule a timer); the caller owns
//! the actual `h2::server::Connection` and timer tasks.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::status::{GrpcStatus, StatusCode};

/// Tunables for the PING/idle-timeout policy (spec §4.6), named after the
/// `grpc.keepalive_*`/`grpc.http2.*` channel options they mirror.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    pub idle_timeout: Option<Duration>,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub permit_without_calls: bool,
    pub maximum_pings_without_data: u32,
    pub minimum_received_ping_interval_without_data: Duration,
    pub maximum_ping_strikes: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        KeepaliveConfig {
            idle_timeout: Some(Duration::from_secs(30 * 60)),
            ping_interval: Duration::from_secs(2 * 60 * 60),
            ping_timeout: Duration::from_secs(20),
            permit_without_calls: false,
            maximum_pings_without_data: 2,
            minimum_received_ping_interval_without_data: Duration::from_secs(5 * 60),
            maximum_ping_strikes: 2,
        }
    }
}

/// What the caller's executor must do in response to a `KeepaliveHandler`
/// transition. Several actions can be produced by one event, so callers
/// receive a `Vec`.
#[derive(Debug, Clone, PartialEq)]
pub enum KeepaliveAction {
    /// (Re)schedule the idle-timeout task to fire after this duration from
    /// now, replacing any previously scheduled one.
    ScheduleIdleTimer(Duration),
    /// Cancel a previously scheduled idle-timeout task; none is currently
    /// wanted.
    CancelIdleTimer,
    /// Send a PING with this opaque payload and start its ack-timeout.
    SendPing { payload: [u8; 8] },
    /// Send GOAWAY with the given last-processed-stream-id and status, then
    /// close the connection.
    SendGoAway { last_stream_id: u32, status: GrpcStatus },
    /// The connection must be torn down (a PING ack-timeout fired).
    Shutdown(GrpcStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Quiescing,
    Closed,
}

/// One connection's idle/keepalive bookkeeping (spec §4.6). Distinct from
/// `ConnectionManager`: the manager *observes* the `KeepaliveAction`s this
/// type produces (e.g. a `Shutdown` feeds into `ConnectionManager::channel_error`)
/// rather than owning this logic itself.
#[derive(Debug)]
pub struct KeepaliveHandler {
    config: KeepaliveConfig,
    open_streams: u32,
    last_peer_stream_id: u32,
    max_concurrent_streams: Option<u32>,
    consecutive_data_free_pings: u32,
    ping_strikes: u32,
    awaiting_ack: Option<[u8; 8]>,
    phase: Phase,
    /// A fixed opaque payload generated once per handler instance and
    /// reused for every PING: the liveness probe is a constant, not a
    /// per-probe nonce (spec §3's `PingState` tracks timing and strikes,
    /// never payload identity).
    ping_payload: [u8; 8],
}

impl KeepaliveHandler {
    pub fn new(config: KeepaliveConfig) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E3779B97F4A7C15)
            | 1;
        KeepaliveHandler {
            config,
            open_streams: 0,
            last_peer_stream_id: 0,
            max_concurrent_streams: None,
            consecutive_data_free_pings: 0,
            ping_strikes: 0,
            awaiting_ack: None,
            phase: Phase::Active,
            ping_payload: seed.to_be_bytes(),
        }
    }

    pub fn open_stream_count(&self) -> u32 {
        self.open_streams
    }

    pub fn last_peer_stream_id(&self) -> u32 {
        self.last_peer_stream_id
    }

    /// A peer-initiated stream was opened (spec §4.6 "stream accounting").
    /// Cancels any pending idle timer.
    pub fn stream_opened(&mut self, stream_id: u32) -> Vec<KeepaliveAction> {
        self.open_streams += 1;
        self.last_peer_stream_id = self.last_peer_stream_id.max(stream_id);
        vec![KeepaliveAction::CancelIdleTimer]
    }

    /// A stream closed. If this was the last open stream and an idle
    /// timeout is configured, schedule it.
    pub fn stream_closed(&mut self) -> Vec<KeepaliveAction> {
        self.open_streams = self.open_streams.saturating_sub(1);
        if self.open_streams == 0 {
            if let Some(timeout) = self.config.idle_timeout {
                return vec![KeepaliveAction::ScheduleIdleTimer(timeout)];
            }
        }
        Vec::new()
    }

    /// A SETTINGS frame updated MAX_CONCURRENT_STREAMS; the caller forwards
    /// this value on to the connection manager.
    pub fn observe_max_concurrent_streams(&mut self, value: u32) {
        self.max_concurrent_streams = Some(value);
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// The idle timer fired with zero open streams still true: begin
    /// graceful shutdown (spec §4.6 "idle timeout").
    pub fn idle_timer_fired(&mut self) -> Vec<KeepaliveAction> {
        if self.open_streams > 0 || self.phase != Phase::Active {
            return Vec::new();
        }
        self.initiate_graceful_shutdown(GrpcStatus::ok())
    }

    /// Whether a keepalive PING should be sent right now, given
    /// `permit_without_calls` and `maximum_pings_without_data` (spec §4.6
    /// "keepalive").
    fn may_send_ping(&self) -> bool {
        if self.open_streams > 0 {
            return true;
        }
        self.config.permit_without_calls
            && self.consecutive_data_free_pings < self.config.maximum_pings_without_data
    }

    /// The repeating keepalive timer fired; produces a PING to send, or
    /// nothing if suppressed by `permit_without_calls`/the no-data cap.
    pub fn ping_interval_elapsed(&mut self) -> Vec<KeepaliveAction> {
        if self.phase == Phase::Closed || self.awaiting_ack.is_some() {
            return Vec::new();
        }
        if !self.may_send_ping() {
            return Vec::new();
        }
        if self.open_streams == 0 {
            self.consecutive_data_free_pings += 1;
        } else {
            self.consecutive_data_free_pings = 0;
        }
        self.awaiting_ack = Some(self.ping_payload);
        vec![KeepaliveAction::SendPing { payload: self.ping_payload }]
    }

    /// A PING ACK arrived from the peer, matching the outstanding payload.
    pub fn ping_acked(&mut self, payload: [u8; 8]) {
        if self.awaiting_ack == Some(payload) {
            self.awaiting_ack = None;
        }
    }

    /// The ack-timeout for the outstanding PING fired without an ACK: the
    /// connection is unhealthy (spec §4.6 "shut the connection down with
    /// Unavailable").
    pub fn ping_ack_timeout_fired(&mut self) -> Vec<KeepaliveAction> {
        if self.awaiting_ack.is_none() {
            return Vec::new();
        }
        self.awaiting_ack = None;
        self.phase = Phase::Closed;
        vec![KeepaliveAction::Shutdown(GrpcStatus::new(
            StatusCode::Unavailable,
            Some("keepalive ping was not acknowledged in time".to_string()),
        ))]
    }

    /// A PING arrived *from* the peer with no data flowing; enforces
    /// `minimum_received_ping_interval_without_data` by strike-counting
    /// (spec §4.6, server side). `elapsed_since_last` is the time since the
    /// previous data-free PING from this peer.
    pub fn received_ping_without_data(&mut self, elapsed_since_last: Duration) -> Vec<KeepaliveAction> {
        if elapsed_since_last >= self.config.minimum_received_ping_interval_without_data {
            self.ping_strikes = 0;
            return Vec::new();
        }
        self.ping_strikes += 1;
        if self.ping_strikes > self.config.maximum_ping_strikes {
            self.phase = Phase::Closed;
            return vec![KeepaliveAction::SendGoAway {
                last_stream_id: self.last_peer_stream_id,
                status: GrpcStatus::new(
                    StatusCode::Internal,
                    Some("ENHANCE_YOUR_CALM: too many pings without data".to_string()),
                ),
            }];
        }
        Vec::new()
    }

    /// Begins a graceful shutdown: GOAWAY with the highest processed stream
    /// id now, with the caller expected to schedule a follow-up
    /// `finish_quiescence` after a short delay (spec §4.6 "graceful
    /// quiescence").
    pub fn initiate_graceful_shutdown(&mut self, reason: GrpcStatus) -> Vec<KeepaliveAction> {
        if self.phase == Phase::Closed {
            return Vec::new();
        }
        self.phase = Phase::Quiescing;
        vec![KeepaliveAction::SendGoAway {
            last_stream_id: self.last_peer_stream_id,
            status: reason,
        }]
    }

    /// The short delay after the first quiescence GOAWAY elapsed: emit the
    /// confirming second GOAWAY + PING pair (spec §4.6).
    pub fn finish_quiescence(&mut self) -> Vec<KeepaliveAction> {
        if self.phase != Phase::Quiescing {
            return Vec::new();
        }
        self.phase = Phase::Closed;
        vec![
            KeepaliveAction::SendGoAway {
                last_stream_id: self.last_peer_stream_id,
                status: GrpcStatus::ok(),
            },
            KeepaliveAction::SendPing {
                payload: self.ping_payload,
            },
        ]
    }

    pub fn is_quiescing(&self) -> bool {
        self.phase == Phase::Quiescing
    }
}
