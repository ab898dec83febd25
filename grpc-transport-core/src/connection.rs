//! The client connection manager (spec §4.2): a strict state machine owning
//! one HTTP/2 channel's lifecycle, kept sans-IO per
//! `other_examples/b8bbe785_ariel42-h2-sans-io__src-h2_codec.rs.rs`'s
//! approach — this module decides *what* to do, a caller supplies the
//! actual socket/`h2::client::Connection` plumbing and reports back via the
//! event methods below.
//!
//! Candidate/ready channel vocabulary is adapted from
//! `other_examples/cb935d43_hyperium-tonic__grpc-src-client-transport-mod.rs.rs`
//! and `other_examples/e1f84611_hyperium-tonic__grpc-src-client-transport-tonic-mod.rs.rs`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;

use crate::backoff::{BackoffConfig, BackoffIterator};
use crate::error::{Result, TransportError};
use crate::status::{GrpcStatus, StatusCode};

/// Identifies one connection attempt: a counter (monotonic within the
/// manager) plus a stable value for correlating log lines across a
/// reconnect (spec §4.2 "Connection IDs"). Built from the same kind of
/// lightweight xorshift source `backoff.rs` uses for jitter, rather than
/// pulling in a UUID crate for a single stable identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId {
    pub attempt: u64,
    pub stable: u64,
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{:016x}#{}", self.stable, self.attempt)
    }
}

fn fresh_stable_id() -> u64 {
    let mut x = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x2545F4914F6CDD1D)
        | 1;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

/// How the peer's connection dropped or refused to come up. Carried inside
/// `ConnectionState::TransientFailure`/`Idle` for the benefit of callers of
/// `get_multiplexer` that observe a failure.
pub type FailureReason = GrpcStatus;

/// The connection manager's state (spec §4.2 `ConnectionState`). `Shutdown`
/// is terminal. `close_future`/`scheduled_retry` are represented as plain
/// manager bookkeeping (`ConnectionManager`'s waiter lists, `next_retry`)
/// rather than embedded in the enum, so the state stays comparable and
/// cheap to assert on in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle { last_error: Option<FailureReason> },
    Connecting,
    Active,
    Ready,
    TransientFailure { reason: FailureReason, scheduled_retry: Duration },
    Shutdown { reason: FailureReason },
}

impl ConnectionState {
    fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle { .. } => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Active => "Active",
            ConnectionState::Ready => "Ready",
            ConnectionState::TransientFailure { .. } => "TransientFailure",
            ConnectionState::Shutdown { .. } => "Shutdown",
        }
    }
}

/// `get_multiplexer`'s two call conventions (spec §4.2's table header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexerMode {
    /// Wait for a `Ready` channel (one that has observed the peer's SETTINGS).
    Patient,
    /// Accept any live candidate channel, `Active` or better.
    FastFail,
}

/// What `get_multiplexer` hands back to the caller.
pub enum MultiplexerOutcome {
    /// A channel is usable right now.
    Immediate,
    /// No channel yet; resolves once one becomes usable (or the manager
    /// gives up and the receiver observes a dropped sender as failure).
    Pending(oneshot::Receiver<Result<()>>),
    /// The manager is shut down or has no viable channel and never will
    /// under the caller's failure mode.
    Error(TransportError),
}

/// `shutdown`'s two modes (spec §4.2's table header).
#[derive(Debug, Clone, Copy)]
pub enum ShutdownMode {
    Force,
    Graceful { deadline: Duration },
}

/// Tunables independent of backoff (spec §4.2/§4.6's idle/keepalive fields
/// that the manager itself consults, as opposed to the keepalive handler).
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// `None` disables reconnection: exactly one attempt is made (spec
    /// §4.2 "Backoff").
    pub reconnect: Option<BackoffConfig>,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        ConnectionManagerConfig {
            reconnect: Some(BackoffConfig::default()),
        }
    }
}

/// Owns one channel's lifecycle end to end (spec §4.2). Pure state
/// machine: it never touches a socket itself. A caller drives it with
/// `get_multiplexer` to learn when to dial, and reports outcomes back
/// through `channel_active`/`ready`/`channel_inactive`/`channel_error`.
pub struct ConnectionManager {
    state: ConnectionState,
    config: ConnectionManagerConfig,
    backoff: Option<BackoffIterator>,
    connection_id: ConnectionId,
    candidate_waiters: Vec<oneshot::Sender<Result<()>>>,
    ready_waiters: Vec<oneshot::Sender<Result<()>>>,
    /// The last error `channel_error` observed while `Active`/`Ready`,
    /// retained as the reason for `channel_inactive`'s eventual
    /// `reenter_after_drop` call (spec §7 "retain the last error as the
    /// reason for future `get_multiplexer` failures"). Cleared once
    /// consumed.
    pending_error: Option<GrpcStatus>,
    /// Set once a peer `GOAWAY` is observed (`begin_quiescing`); makes
    /// `get_multiplexer` stop handing out `Immediate` on an otherwise-Ready
    /// channel the peer has already said it won't accept new streams on.
    quiescing: bool,
    /// The deadline `shutdown(ShutdownMode::Graceful { deadline })` was
    /// asked to honor, if any (spec §8 scenario 6). The manager itself owns
    /// no timer; the caller reads this back via `graceful_deadline` to
    /// schedule its own force-close and reports back through
    /// `force_close_deadline_elapsed`.
    graceful_deadline: Option<Duration>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionManagerConfig) -> Self {
        let backoff = config
            .reconnect
            .map(|c| BackoffIterator::new(c, true));
        ConnectionManager {
            state: ConnectionState::Idle { last_error: None },
            config,
            backoff,
            connection_id: ConnectionId { attempt: 0, stable: fresh_stable_id() },
            candidate_waiters: Vec::new(),
            ready_waiters: Vec::new(),
            pending_error: None,
            quiescing: false,
            graceful_deadline: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn begin_connecting(&mut self) {
        self.connection_id.attempt += 1;
        self.state = ConnectionState::Connecting;
        self.quiescing = false;
    }

    /// spec §4.2 `get_multiplexer`.
    pub fn get_multiplexer(&mut self, mode: MultiplexerMode) -> MultiplexerOutcome {
        match (&self.state, mode) {
            (ConnectionState::Idle { .. }, _) => {
                self.begin_connecting();
                let (tx, rx) = oneshot::channel();
                self.candidate_waiters.push(tx);
                MultiplexerOutcome::Pending(rx)
            }
            (ConnectionState::Connecting, _) => {
                let (tx, rx) = oneshot::channel();
                self.candidate_waiters.push(tx);
                MultiplexerOutcome::Pending(rx)
            }
            (ConnectionState::Active, MultiplexerMode::FastFail) => MultiplexerOutcome::Immediate,
            (ConnectionState::Active, MultiplexerMode::Patient) => {
                let (tx, rx) = oneshot::channel();
                self.ready_waiters.push(tx);
                MultiplexerOutcome::Pending(rx)
            }
            // A peer GOAWAY stops new streams from starting here even
            // though existing ones keep draining (spec §4.2 "Quiescence").
            (ConnectionState::Ready, MultiplexerMode::FastFail) if self.quiescing => {
                MultiplexerOutcome::Error(TransportError::UnexpectedConnectionDrop)
            }
            (ConnectionState::Ready, MultiplexerMode::Patient) if self.quiescing => {
                let (tx, rx) = oneshot::channel();
                self.ready_waiters.push(tx);
                MultiplexerOutcome::Pending(rx)
            }
            (ConnectionState::Ready, _) => MultiplexerOutcome::Immediate,
            (ConnectionState::TransientFailure { reason, .. }, MultiplexerMode::Patient) => {
                let (tx, rx) = oneshot::channel();
                self.ready_waiters.push(tx);
                let _ = reason;
                MultiplexerOutcome::Pending(rx)
            }
            (ConnectionState::TransientFailure { reason, .. }, MultiplexerMode::FastFail) => {
                let _ = reason;
                MultiplexerOutcome::Error(TransportError::ConnectTimeout)
            }
            (ConnectionState::Shutdown { .. }, _) => {
                MultiplexerOutcome::Error(TransportError::AlreadyComplete)
            }
        }
    }

    /// spec §4.2 `channel_active`.
    pub fn channel_active(&mut self) {
        match &self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Active;
                for waiter in self.candidate_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            ConnectionState::Active | ConnectionState::Ready => {}
            ConnectionState::Shutdown { .. } => {
                // The caller must still close the channel it just brought up;
                // the manager itself has nothing further to do.
            }
            ConnectionState::Idle { .. } | ConnectionState::TransientFailure { .. } => {}
        }
    }

    /// spec §4.2 `ready` (peer's initial SETTINGS observed).
    pub fn ready(&mut self) {
        match &self.state {
            ConnectionState::Active => {
                self.state = ConnectionState::Ready;
                for waiter in self.ready_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            ConnectionState::Shutdown { .. } => {}
            other => {
                debug_assert!(
                    false,
                    "ready() observed outside Active (state: {})",
                    other.label()
                );
            }
        }
    }

    /// spec §4.2 `channel_inactive`.
    pub fn channel_inactive(&mut self) {
        match &self.state {
            ConnectionState::Idle { .. } | ConnectionState::Shutdown { .. } => {}
            ConnectionState::Connecting | ConnectionState::Active | ConnectionState::Ready => {
                let reason = self.pending_error.take().unwrap_or_else(|| {
                    GrpcStatus::new(StatusCode::Unavailable, Some("channel closed".to_string()))
                });
                self.reenter_after_drop(reason);
            }
            ConnectionState::TransientFailure { .. } => {}
        }
    }

    fn reenter_after_drop(&mut self, reason: GrpcStatus) {
        match self.backoff.as_mut().and_then(|b| b.next()) {
            Some((_, scheduled_retry)) => {
                for waiter in self.candidate_waiters.drain(..) {
                    let _ = waiter.send(Err(TransportError::UnexpectedConnectionDrop));
                }
                for waiter in self.ready_waiters.drain(..) {
                    let _ = waiter.send(Err(TransportError::UnexpectedConnectionDrop));
                }
                self.state = ConnectionState::TransientFailure { reason, scheduled_retry };
            }
            None => {
                self.fail_all_waiters(&reason);
                self.state = ConnectionState::Shutdown { reason };
            }
        }
    }

    fn fail_all_waiters(&mut self, reason: &GrpcStatus) {
        for waiter in self.candidate_waiters.drain(..) {
            let _ = waiter.send(Err(TransportError::ConnectionFailed(reason.clone())));
        }
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(TransportError::ConnectionFailed(reason.clone())));
        }
    }

    /// spec §4.2 `channel_error`.
    pub fn channel_error(&mut self, err: &TransportError) {
        let reason = err.to_status();
        match &self.state {
            ConnectionState::Idle { .. } => {
                self.state = ConnectionState::Idle { last_error: Some(reason) };
            }
            ConnectionState::Connecting => {
                self.fail_all_waiters(&reason);
            }
            ConnectionState::Active | ConnectionState::Ready => {
                // Recorded only; the manager still waits for channel_inactive
                // to decide whether to retry, at which point it reads this
                // back as the failure reason instead of a generic one.
                self.pending_error = Some(reason);
            }
            ConnectionState::TransientFailure { .. } | ConnectionState::Shutdown { .. } => {}
        }
    }

    /// spec §4.2 `idle` (zero open streams, idle-timeout fired).
    pub fn idle(&mut self) {
        match &self.state {
            ConnectionState::Idle { .. } | ConnectionState::TransientFailure { .. } | ConnectionState::Shutdown { .. } => {}
            ConnectionState::Connecting => {
                debug_assert!(false, "idle() observed while Connecting");
            }
            ConnectionState::Active | ConnectionState::Ready => {
                self.quiescing = false;
                self.state = ConnectionState::Idle { last_error: None };
            }
        }
    }

    /// Begins HTTP/2 quiescence after an observed `GOAWAY` (spec §4.2
    /// "Quiescence"). Does not itself change `ConnectionState`; existing
    /// streams keep draining until `channel_inactive` eventually reports
    /// the channel closing, at which point the normal inactive path runs.
    /// Sets the quiescing flag `get_multiplexer` checks so new streams stop
    /// being handed out on a channel the peer has already said it won't
    /// accept them on.
    pub fn begin_quiescing(&mut self) {
        self.quiescing = true;
    }

    pub fn is_quiescing(&self) -> bool {
        self.quiescing
    }

    /// spec §4.2 `shutdown`.
    pub fn shutdown(&mut self, mode: ShutdownMode) {
        if let ShutdownMode::Graceful { deadline } = mode {
            self.graceful_deadline = Some(deadline);
        }
        let reason = GrpcStatus::new(StatusCode::Unavailable, Some("shut down".to_string()));
        match (&self.state, mode) {
            (ConnectionState::Shutdown { .. }, _) => {}
            (ConnectionState::Idle { .. }, _) => {
                self.state = ConnectionState::Shutdown { reason };
            }
            (ConnectionState::Connecting, _) | (ConnectionState::Active, _) => {
                self.fail_all_waiters(&reason);
                self.state = ConnectionState::Shutdown { reason };
            }
            (ConnectionState::Ready, ShutdownMode::Force) => {
                self.state = ConnectionState::Shutdown { reason };
            }
            (ConnectionState::Ready, ShutdownMode::Graceful { .. }) => {
                self.begin_quiescing();
                self.state = ConnectionState::Shutdown { reason };
            }
            (ConnectionState::TransientFailure { .. }, _) => {
                self.state = ConnectionState::Shutdown { reason };
            }
        }
    }

    /// The deadline a caller entering graceful shutdown must force-close
    /// the channel by (spec §8 scenario 6), if `shutdown` was called with
    /// `ShutdownMode::Graceful`. The manager keeps no timer of its own;
    /// the caller schedules one against this value and reports back via
    /// `force_close_deadline_elapsed` once it fires.
    pub fn graceful_deadline(&self) -> Option<Duration> {
        self.graceful_deadline
    }

    /// The caller's force-close timer fired without the channel finishing
    /// the drain on its own. Clears the deadline bookkeeping; the caller
    /// is responsible for actually tearing down the socket.
    pub fn force_close_deadline_elapsed(&mut self) {
        self.graceful_deadline = None;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ConnectionState::Shutdown { .. })
    }
}
