//! Protocol Context / Session FSM (C6, spec §4.6): session-level states
//! layered conceptually on C4, sequence counter, and the `send` framing
//! path.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{CoreError, ErrorKind, PolyResult};
use crate::wire::{FrameCodec, MessageFlags, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Handshake,
    Auth,
    Ready,
    Error,
    Closed,
}

impl SessionState {
    /// Legal transitions table (spec §4.6). Any pair not listed here is
    /// `invalid-transition`.
    fn can_transition_to(self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Init, Handshake) | (Handshake, Auth) | (Auth, Ready) | (Ready, Error) | (Ready, Closed) | (Error, Closed)
        )
    }
}

/// Cooperative cancellation token (Design Notes §9), grounded on the
/// teacher's atomic-bool + `Arc` `Cancellation` shape
/// (`spark-core/src/contract.rs`).
#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Blocking byte sink a session hands framed messages to (spec §4.6
/// "enqueues bytes onto the transport endpoint"). Kept as a trait so the
/// core never depends on a concrete transport.
pub trait TransportEndpoint: Send + Sync {
    fn send(&self, bytes: Bytes) -> PolyResult<()>;
}

type StateChangeCb = Box<dyn Fn(SessionState, SessionState) + Send + Sync>;
type HandshakeCb = Box<dyn Fn() + Send + Sync>;
type AuthRequestCb = Box<dyn Fn(&[u8]) + Send + Sync>;
type CommandCb = Box<dyn Fn(&[u8]) + Send + Sync>;
type ErrorCb = Box<dyn Fn(&str) + Send + Sync>;

/// The five event callbacks of spec §6, plus cancellation and
/// per-operation timeouts (SPEC_FULL §4 C6 supplement).
pub struct SessionConfig {
    pub on_state_change: Option<StateChangeCb>,
    pub on_handshake: Option<HandshakeCb>,
    pub on_auth_request: Option<AuthRequestCb>,
    pub on_command: Option<CommandCb>,
    pub on_error: Option<ErrorCb>,
    pub cancellation: Cancellation,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            on_state_change: None,
            on_handshake: None,
            on_auth_request: None,
            on_command: None,
            on_error: None,
            cancellation: Cancellation::new(),
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            max_message_size: 64 * 1024,
        }
    }
}

/// A session's state, sequence counter, framing buffer and config
/// reference (spec §3 "Session context").
pub struct SessionContext {
    state: SessionState,
    sequence: AtomicU32,
    config: SessionConfig,
    codec: FrameCodec,
    endpoint: Arc<dyn TransportEndpoint>,
}

impl SessionContext {
    pub fn new(config: SessionConfig, endpoint: Arc<dyn TransportEndpoint>) -> Self {
        let codec = FrameCodec::new(config.max_message_size);
        Self { state: SessionState::Init, sequence: AtomicU32::new(0), config, codec, endpoint }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition_to(&mut self, target: SessionState) -> PolyResult<()> {
        if !self.state.can_transition_to(target) {
            return Err(CoreError::with_code(
                ErrorKind::InvalidState,
                "session.invalid_transition",
                format!("cannot move from {:?} to {:?}", self.state, target),
            ));
        }
        let old = self.state;
        self.state = target;
        if let Some(cb) = &self.config.on_state_change {
            cb(old, target);
        }
        Ok(())
    }

    /// Moves to ERROR regardless of the legal-transition table when `err`
    /// is fatal severity, per spec §7 propagation policy ("C6 moves to
    /// ERROR on any f-severity").
    pub fn observe_error(&mut self, err: &CoreError) {
        if let Some(cb) = &self.config.on_error {
            cb(err.message());
        }
        if err.severity() == crate::error::Severity::Fatal && self.state != SessionState::Closed {
            let old = self.state;
            self.state = SessionState::Error;
            if let Some(cb) = &self.config.on_state_change {
                cb(old, SessionState::Error);
            }
        }
    }

    fn message_allowed_in(message_type: MessageType, state: SessionState) -> bool {
        use MessageType::*;
        use SessionState::*;
        match message_type {
            Handshake => state == Init,
            Auth => state == Handshake,
            Command | Publish | Subscribe | Unsubscribe | Response => state == Ready,
            Heartbeat => matches!(state, Ready),
            Error => true,
        }
    }

    /// Allocates a header, fills `sequence` from the post-incremented
    /// session counter, computes the checksum, and enqueues bytes onto the
    /// transport (spec §4.6 "send").
    pub fn send(&self, message_type: MessageType, flags: MessageFlags, payload: &[u8]) -> PolyResult<()> {
        if self.config.cancellation.is_cancelled() {
            return Err(CoreError::cancelled("session send observed cancellation"));
        }
        if !Self::message_allowed_in(message_type, self.state) {
            return Err(CoreError::with_code(
                ErrorKind::InvalidState,
                "session.invalid_state_for_send",
                format!("{:?} is not permitted while session is {:?}", message_type, self.state),
            ));
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = self.codec.encode(message_type, flags, sequence, payload)?;
        self.endpoint.send(bytes).map_err(|err| {
            CoreError::with_code(ErrorKind::Internal, "session.endpoint_send_failed", err.message().to_string())
        })
    }

    /// Dispatch routing table of spec §4.5: advances C6 state for
    /// HANDSHAKE/AUTH/ERROR, fires the matching callback, and leaves
    /// COMMAND/PUBLISH/SUBSCRIBE/UNSUBSCRIBE for the caller (C3/C7) to
    /// handle once this returns `Ok`.
    #[tracing::instrument(skip(self, frame_payload))]
    pub fn on_frame(&mut self, message_type: MessageType, frame_payload: &[u8]) -> PolyResult<()> {
        match message_type {
            MessageType::Handshake => {
                self.transition_to(SessionState::Handshake)?;
                if let Some(cb) = &self.config.on_handshake {
                    cb();
                }
            }
            MessageType::Auth => {
                self.transition_to(SessionState::Auth)?;
                if let Some(cb) = &self.config.on_auth_request {
                    cb(frame_payload);
                }
            }
            MessageType::Command => {
                if self.state != SessionState::Ready {
                    return Err(CoreError::permission_denied("COMMAND dispatched outside READY state"));
                }
                if let Some(cb) = &self.config.on_command {
                    cb(frame_payload);
                }
            }
            MessageType::Error => {
                if let Some(cb) = &self.config.on_error {
                    cb(&String::from_utf8_lossy(frame_payload));
                }
                self.transition_to(SessionState::Error)?;
            }
            MessageType::Heartbeat => {
                debug!("heartbeat received, echoing reply");
                self.send(MessageType::Heartbeat, MessageFlags::empty(), &[])?;
            }
            MessageType::Publish | MessageType::Subscribe | MessageType::Unsubscribe | MessageType::Response => {
                // Routed to C7 or returned directly by the caller; this
                // module's responsibility ends at state validation.
                warn!(?message_type, "left for caller to route");
            }
        }
        Ok(())
    }
}
