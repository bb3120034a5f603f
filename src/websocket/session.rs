//! Per-connection state machine
//!
//! `Connecting -> Authenticated -> Active -> Closed`. The first inbound frame
//! must be an `auth` handshake, read under a deadline. Once registered, an
//! inbound loop (reads, liveness) runs in the driver task while an outbound
//! task drains the queue and owns every write to the socket.

use super::message_types::{AuthMessage, ClientEvent, ServerFrame};
use super::presence;
use super::transport::{CloseFrame, CloseKind, Frame, FrameSink, FrameStream, TransportError};
use super::{ConnectionRegistry, RegistryError, SessionHandle, SessionId};
use crate::auth::{AuthError, AuthGateway, VerifiedIdentity};
use crate::config::Settings;
use actix_web::web::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const CONTROL_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
    pub max_message_size: usize,
    pub send_buffer: usize,
    pub presence: bool,
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            handshake_timeout: settings.read_deadline(),
            pong_wait: settings.pong_wait(),
            ping_period: settings.ping_period(),
            write_wait: settings.write_wait(),
            max_message_size: settings.websocket.max_message_size,
            send_buffer: settings.limits.send_channel_buffer,
            presence: settings.websocket.presence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

/// Reasons a session never reached the active state
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication timeout")]
    HandshakeTimeout,

    #[error("{0}")]
    Protocol(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Capacity(#[from] RegistryError),

    #[error("peer disconnected during handshake")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Text for the `auth_error` frame, or `None` when the peer is unreachable.
    fn peer_message(&self) -> Option<String> {
        match self {
            SessionError::Disconnected | SessionError::Transport(_) => None,
            other => Some(other.to_string()),
        }
    }
}

/// Why an active session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    PeerClosed,
    LivenessTimeout,
    MessageTooBig,
    ReadError,
    WriteError,
    WriteTimeout,
    /// The registry dropped the queue (superseded by a newer session)
    QueueClosed,
    Shutdown,
}

pub struct Session<S, K> {
    stream: S,
    sink: K,
    registry: ConnectionRegistry,
    gateway: Arc<AuthGateway>,
    config: SessionConfig,
    state: SessionState,
}

/// What the inbound loop needs while active
struct ActiveContext {
    registry: ConnectionRegistry,
    identity: VerifiedIdentity,
    session_id: SessionId,
    config: SessionConfig,
    control: mpsc::Sender<Frame>,
}

impl<S, K> Session<S, K>
where
    S: FrameStream,
    K: FrameSink + 'static,
{
    pub fn new(
        stream: S,
        sink: K,
        registry: ConnectionRegistry,
        gateway: Arc<AuthGateway>,
        config: SessionConfig,
    ) -> Self {
        Self {
            stream,
            sink,
            registry,
            gateway,
            config,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the connection to completion.
    ///
    /// Must run on a local task set (actix runtime): the outbound half is
    /// spawned with `actix_web::rt::spawn`.
    pub async fn run(mut self) -> Result<CloseCause, SessionError> {
        let identity = match self.handshake().await {
            Ok(identity) => identity,
            Err(e) => {
                self.reject(&e).await;
                return Err(e);
            }
        };
        self.transition(SessionState::Authenticated);

        let (handle, queue) = SessionHandle::new(identity.clone(), self.config.send_buffer);
        let session_id = handle.id();
        if let Err(e) = self.registry.try_register(handle).await {
            let e = SessionError::from(e);
            self.reject(&e).await;
            return Err(e);
        }

        let written = match ServerFrame::auth_success().to_json() {
            Ok(json) => self.write(Frame::Text(json)).await,
            Err(e) => Err(SessionError::Protocol(e.to_string())),
        };
        if let Err(e) = written {
            self.registry
                .unregister(&identity.team_id, &identity.user_id, session_id)
                .await;
            self.transition(SessionState::Closed);
            return Err(e);
        }

        self.transition(SessionState::Active);
        info!(
            team_id = %identity.team_id,
            user_id = %identity.user_id,
            session_id = %session_id,
            "WebSocket session active"
        );

        if self.config.presence {
            presence::announce_joined(&self.registry, &identity).await;
        }

        let cause = self.run_active(identity, session_id, queue).await;
        Ok(cause)
    }

    async fn handshake(&mut self) -> Result<VerifiedIdentity, SessionError> {
        let text = timeout(self.config.handshake_timeout, self.read_handshake_frame())
            .await
            .map_err(|_| SessionError::HandshakeTimeout)??;

        let auth: AuthMessage = serde_json::from_str(&text)
            .map_err(|e| SessionError::Protocol(format!("invalid auth message: {e}")))?;
        if !auth.is_auth() {
            return Err(SessionError::Protocol(format!(
                "expected auth message, got '{}'",
                auth.kind
            )));
        }
        if auth.team_id.is_empty() || auth.user_id.is_empty() {
            return Err(SessionError::Protocol("auth message requires userId and teamId".into()));
        }

        Ok(self.gateway.authenticate(&auth).await?)
    }

    async fn read_handshake_frame(&mut self) -> Result<String, SessionError> {
        loop {
            match self.stream.next_frame().await {
                Some(Ok(Frame::Text(text))) => {
                    if text.len() > self.config.max_message_size {
                        return Err(SessionError::Protocol("message too big".into()));
                    }
                    return Ok(text);
                }
                Some(Ok(Frame::Ping(payload))) => self.sink.send(Frame::Pong(payload)).await?,
                Some(Ok(Frame::Pong(_))) => {}
                Some(Ok(Frame::Binary(_))) => {
                    return Err(SessionError::Protocol("expected text auth message".into()))
                }
                Some(Ok(Frame::Close(_))) | None => return Err(SessionError::Disconnected),
                Some(Err(TransportError::TooLarge)) => {
                    return Err(SessionError::Protocol("message too big".into()))
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Tell the peer why the handshake failed, then close.
    async fn reject(&mut self, err: &SessionError) {
        warn!(error = %err, "Rejecting WebSocket session");

        if let Some(message) = err.peer_message() {
            if let Ok(json) = ServerFrame::auth_error(message).to_json() {
                let _ = self.write(Frame::Text(json)).await;
            }
            let policy = CloseFrame {
                kind: CloseKind::Policy,
                description: None,
            };
            let _ = self.write(Frame::Close(Some(policy))).await;
        }
        self.transition(SessionState::Closed);
    }

    async fn write(&mut self, frame: Frame) -> Result<(), SessionError> {
        match timeout(self.config.write_wait, self.sink.send(frame)).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::Transport(TransportError::Closed)),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    async fn run_active(
        self,
        identity: VerifiedIdentity,
        session_id: SessionId,
        queue: mpsc::Receiver<String>,
    ) -> CloseCause {
        let Session {
            mut stream,
            sink,
            registry,
            config,
            ..
        } = self;

        let (shutdown_tx, inbound_shutdown) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let outbound_shutdown = shutdown_tx.subscribe();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);

        let outbound = actix_web::rt::spawn(outbound_loop(
            sink,
            queue,
            control_rx,
            shutdown_tx.clone(),
            outbound_shutdown,
            config,
        ));

        let mut ctx = ActiveContext {
            registry: registry.clone(),
            identity,
            session_id,
            config,
            control: control_tx,
        };
        let inbound_cause = inbound_loop(&mut stream, &mut ctx, inbound_shutdown).await;
        shutdown_tx.send_replace(true);

        let outbound_cause = outbound.await.unwrap_or(CloseCause::WriteError);
        let cause = if inbound_cause == CloseCause::Shutdown {
            outbound_cause
        } else {
            inbound_cause
        };

        let ActiveContext { identity, .. } = ctx;
        let removed = registry
            .unregister(&identity.team_id, &identity.user_id, session_id)
            .await;
        if removed && config.presence {
            presence::announce_left(&registry, &identity).await;
        }

        info!(
            team_id = %identity.team_id,
            user_id = %identity.user_id,
            session_id = %session_id,
            cause = ?cause,
            state = ?SessionState::Closed,
            "WebSocket session closed"
        );
        cause
    }
}

async fn inbound_loop<S: FrameStream>(
    stream: &mut S,
    ctx: &mut ActiveContext,
    mut shutdown: watch::Receiver<bool>,
) -> CloseCause {
    let pong_wait = ctx.config.pong_wait;
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => return CloseCause::Shutdown,
            next = timeout_at(deadline, stream.next_frame()) => next,
        };

        let frame = match next {
            Err(_) => {
                warn!(user_id = %ctx.identity.user_id, "No pong within {:?}, closing", pong_wait);
                return CloseCause::LivenessTimeout;
            }
            Ok(None) => return CloseCause::PeerClosed,
            Ok(Some(frame)) => frame,
        };

        match frame {
            Ok(Frame::Text(text)) => {
                if text.len() > ctx.config.max_message_size {
                    return close_too_big(ctx);
                }
                ctx.handle_client_frame(text).await;
            }
            Ok(Frame::Binary(bytes)) => {
                if bytes.len() > ctx.config.max_message_size {
                    return close_too_big(ctx);
                }
                debug!(len = bytes.len(), "Ignoring binary frame");
            }
            Ok(Frame::Ping(payload)) => {
                if ctx.control.try_send(Frame::Pong(payload)).is_err() {
                    debug!("Control channel full, pong skipped");
                }
            }
            Ok(Frame::Pong(_)) => deadline = Instant::now() + pong_wait,
            Ok(Frame::Close(reason)) => {
                debug!(reason = ?reason, "Peer sent close");
                return CloseCause::PeerClosed;
            }
            Err(TransportError::TooLarge) => return close_too_big(ctx),
            Err(e) => {
                warn!(user_id = %ctx.identity.user_id, error = %e, "WebSocket read failed");
                return CloseCause::ReadError;
            }
        }
    }
}

fn close_too_big(ctx: &ActiveContext) -> CloseCause {
    warn!(
        user_id = %ctx.identity.user_id,
        limit = ctx.config.max_message_size,
        "Inbound frame exceeds limit"
    );
    let _ = ctx.control.try_send(Frame::Close(Some(CloseFrame::too_big())));
    CloseCause::MessageTooBig
}

impl ActiveContext {
    /// Relay or answer one client event. Routing never leaves the session's team.
    async fn handle_client_frame(&mut self, text: String) {
        let event = match ClientEvent::from_json(&text) {
            Ok(event) => event,
            Err(e) => {
                debug!(user_id = %self.identity.user_id, error = %e, "Ignoring unrecognized client frame");
                return;
            }
        };

        let team_id = self.identity.team_id.clone();
        match event {
            ClientEvent::UserMessage => {
                self.registry.broadcast_to_team(&team_id, text).await;
            }
            ClientEvent::PrivateMessage { recipient_id } => {
                if recipient_id.is_empty() {
                    debug!("privateMessage without recipientId");
                    return;
                }
                self.registry.send_to_user(&team_id, &recipient_id, text).await;
            }
            ClientEvent::TypingStart { recipient_id } | ClientEvent::TypingStop { recipient_id } => {
                if recipient_id.is_empty() {
                    self.registry.broadcast_to_team(&team_id, text).await;
                } else {
                    self.registry.send_to_user(&team_id, &recipient_id, text).await;
                }
            }
            ClientEvent::GetOnlineUsers => {
                if let Some(roster) = presence::roster_frame(&self.registry, &team_id).await {
                    if self.control.try_send(Frame::Text(roster)).is_err() {
                        debug!("Control channel full, roster reply skipped");
                    }
                }
            }
            ClientEvent::UpdateDisplayName { display_name } => {
                let updated = self
                    .registry
                    .update_display_name(
                        &team_id,
                        &self.identity.user_id,
                        self.session_id,
                        display_name.clone(),
                    )
                    .await;
                if updated {
                    self.identity.display_name = Some(display_name);
                    if self.config.presence {
                        presence::broadcast_roster(&self.registry, &team_id).await;
                    }
                }
            }
        }
    }
}

enum Step {
    Write(Frame),
    Close(Option<CloseFrame>, CloseCause),
}

/// Sole writer to the socket
async fn outbound_loop<K: FrameSink>(
    mut sink: K,
    mut queue: mpsc::Receiver<String>,
    mut control: mpsc::Receiver<Frame>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown: watch::Receiver<bool>,
    config: SessionConfig,
) -> CloseCause {
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let cause = loop {
        let step = tokio::select! {
            biased;
            Some(frame) = control.recv() => match frame {
                Frame::Close(reason) => Step::Close(reason, CloseCause::Shutdown),
                other => Step::Write(other),
            },
            _ = shutdown.changed() => Step::Close(Some(CloseFrame::normal()), CloseCause::Shutdown),
            message = queue.recv() => match message {
                Some(text) => Step::Write(Frame::Text(text)),
                None => {
                    debug!("Outbound queue closed by registry");
                    Step::Close(Some(CloseFrame::normal()), CloseCause::QueueClosed)
                }
            },
            _ = ticker.tick() => Step::Write(Frame::Ping(Bytes::new())),
        };

        match step {
            Step::Write(frame) => match timeout(config.write_wait, sink.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "WebSocket write failed");
                    break CloseCause::WriteError;
                }
                Err(_) => {
                    warn!("WebSocket write timed out after {:?}", config.write_wait);
                    break CloseCause::WriteTimeout;
                }
            },
            Step::Close(reason, cause) => {
                let _ = timeout(config.write_wait, sink.send(Frame::Close(reason))).await;
                break cause;
            }
        }
    };

    shutdown_tx.send_replace(true);
    cause
}
