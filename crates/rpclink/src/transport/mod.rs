//! Duplex frame stream the client runs over.
//!
//! A [`Connector`] dials an address and yields a [`Connection`]: an owned read
//! half and an owned write half. The read half belongs to the read worker and
//! the write half to the write worker of one connection generation; nothing
//! else touches them.

pub mod websocket;

#[cfg(test)]
pub(crate) mod memory;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::bytes::Bytes;

/// Close code for an intentional, orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Stream ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// One discrete message unit on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Serialized request or response.
    Payload(Bytes),
    Ping,
    Pong,
    Close { code: u16, reason: String },
}

impl Frame {
    pub fn normal_close() -> Self {
        Self::Close {
            code: CLOSE_NORMAL,
            reason: String::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Payload(_) => "payload",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Close { .. } => "close",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("connection closed (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl TransportError {
    /// True when the peer ended the stream on purpose.
    pub fn is_graceful_close(&self) -> bool {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match self {
            Self::Closed { code, .. } => *code == CLOSE_NORMAL,
            Self::WebSocket(WsError::ConnectionClosed) => true,
            _ => false,
        }
    }
}

#[async_trait]
pub trait FrameReader: Send {
    /// Block until the next frame arrives.
    ///
    /// A close frame from the peer is reported as [`TransportError::Closed`].
    async fn read_frame(&mut self) -> Result<Frame, TransportError>;

    /// Release the read half. Dropping the reader has the same effect.
    async fn close(&mut self) {}
}

#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// A freshly dialed stream, split into its two halves.
pub struct Connection {
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
}

impl Connection {
    pub fn new(reader: impl FrameReader + 'static, writer: impl FrameWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub(crate) fn writer_mut(&mut self) -> &mut dyn FrameWriter {
        self.writer.as_mut()
    }

    pub fn into_split(self) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (self.reader, self.writer)
    }
}

/// Produces connections to a server address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Connection, TransportError>;
}

/// Read the next frame, giving up after `wait` if set.
pub(crate) async fn read_with_deadline(
    reader: &mut dyn FrameReader,
    wait: Option<Duration>,
) -> Result<Frame, TransportError> {
    match wait {
        Some(after) => tokio::time::timeout(after, reader.read_frame())
            .await
            .map_err(|_| TransportError::Timeout { op: "read", after })?,
        None => reader.read_frame().await,
    }
}

/// Write one frame, giving up after `wait` if set.
pub(crate) async fn write_with_deadline(
    writer: &mut dyn FrameWriter,
    frame: Frame,
    wait: Option<Duration>,
) -> Result<(), TransportError> {
    match wait {
        Some(after) => tokio::time::timeout(after, writer.write_frame(frame))
            .await
            .map_err(|_| TransportError::Timeout { op: "write", after })?,
        None => writer.write_frame(frame).await,
    }
}
