//! Frame-level transport seam between a [`super::session::Session`] and the socket.
//!
//! The session only sees [`FrameStream`] (inbound) and [`FrameSink`] (outbound).
//! [`WsStream`]/[`WsSink`] adapt an actix-ws connection.

use actix_web::web::Bytes;
use actix_ws::{CloseCode, CloseReason, Message, MessageStream, ProtocolError};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Normal,
    Away,
    Policy,
    Size,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub kind: CloseKind,
    pub description: Option<String>,
}

impl CloseFrame {
    pub fn new(kind: CloseKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: Some(description.into()),
        }
    }

    pub fn normal() -> Self {
        Self {
            kind: CloseKind::Normal,
            description: None,
        }
    }

    pub fn too_big() -> Self {
        Self::new(CloseKind::Size, "message too big")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseFrame>),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("frame exceeds size limit")]
    TooLarge,

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Inbound half. `None` means the peer is gone.
#[async_trait(?Send)]
pub trait FrameStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Outbound half. Exactly one task writes to a sink.
#[async_trait(?Send)]
pub trait FrameSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
}

pub struct WsStream {
    inner: MessageStream,
}

pub struct WsSink {
    session: actix_ws::Session,
}

/// Largest frame payload the actix-ws 0.2 codec accepts. Bigger frames fail
/// decoding with `ProtocolError::Overflow` and surface as [`TransportError::TooLarge`].
pub const MAX_FRAME_SIZE: usize = 65_536;

/// Wrap the halves returned by `actix_ws::handle`.
pub fn split(session: actix_ws::Session, stream: MessageStream) -> (WsStream, WsSink) {
    (WsStream { inner: stream }, WsSink { session })
}

#[async_trait(?Send)]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let frame = match self.inner.recv().await? {
                Ok(Message::Text(text)) => Ok(Frame::Text(text.to_string())),
                Ok(Message::Binary(bytes)) => Ok(Frame::Binary(bytes)),
                Ok(Message::Ping(bytes)) => Ok(Frame::Ping(bytes)),
                Ok(Message::Pong(bytes)) => Ok(Frame::Pong(bytes)),
                Ok(Message::Close(reason)) => Ok(Frame::Close(reason.map(CloseFrame::from))),
                Ok(Message::Continuation(_)) => {
                    debug!("Ignoring fragmented frame");
                    continue;
                }
                Ok(Message::Nop) => continue,
                Err(ProtocolError::Overflow) => Err(TransportError::TooLarge),
                Err(e) => Err(TransportError::Protocol(e.to_string())),
            };
            return Some(frame);
        }
    }
}

#[async_trait(?Send)]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let result = match frame {
            Frame::Text(text) => self.session.text(text).await,
            Frame::Binary(bytes) => self.session.binary(bytes).await,
            Frame::Ping(bytes) => self.session.ping(&bytes).await,
            Frame::Pong(bytes) => self.session.pong(&bytes).await,
            Frame::Close(reason) => self.session.clone().close(reason.map(CloseReason::from)).await,
        };
        result.map_err(|_| TransportError::Closed)
    }
}

impl From<CloseReason> for CloseFrame {
    fn from(reason: CloseReason) -> Self {
        let kind = match reason.code {
            CloseCode::Normal => CloseKind::Normal,
            CloseCode::Away => CloseKind::Away,
            CloseCode::Policy => CloseKind::Policy,
            CloseCode::Size => CloseKind::Size,
            _ => CloseKind::Error,
        };
        Self {
            kind,
            description: reason.description,
        }
    }
}

impl From<CloseFrame> for CloseReason {
    fn from(frame: CloseFrame) -> Self {
        let code = match frame.kind {
            CloseKind::Normal => CloseCode::Normal,
            CloseKind::Away => CloseCode::Away,
            CloseKind::Policy => CloseCode::Policy,
            CloseKind::Size => CloseCode::Size,
            CloseKind::Error => CloseCode::Error,
        };
        CloseReason {
            code,
            description: frame.description,
        }
    }
}
