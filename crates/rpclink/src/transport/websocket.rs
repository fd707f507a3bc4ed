//! WebSocket connector built on tokio-tungstenite.
//!
//! Payloads travel as text messages (binary when not valid UTF-8). Ping, pong
//! and close map to the WebSocket control frames of the same name; pings from
//! the server are answered by tungstenite itself.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::bytes::Bytes;

use super::{
    CLOSE_ABNORMAL, CLOSE_NO_STATUS, Connection, Connector, Frame, FrameReader, FrameWriter,
    TransportError,
};

pub const DEFAULT_ENDPOINT: &str = "/websocket";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` / `wss://` endpoints.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn dial(&self, address: &str) -> Result<Connection, TransportError> {
        let url = websocket_url(address, &self.endpoint)?;
        tracing::debug!(%url, "Dialing websocket");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (sink, stream) = stream.split();

        Ok(Connection::new(
            WebSocketReader { stream },
            WebSocketWriter { sink },
        ))
    }
}

/// Build the WebSocket URL for a remote address and endpoint path.
///
/// `tcp://`, `http://`, `ws://` and bare `host:port` addresses use `ws`;
/// `https://` and `wss://` use `wss`.
pub fn websocket_url(address: &str, endpoint: &str) -> Result<String, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let (scheme, host) = match address.split_once("://") {
        Some(("wss" | "https", rest)) => ("wss", rest),
        Some(("ws" | "http" | "tcp", rest)) => ("ws", rest),
        Some((other, _)) => return Err(invalid(&format!("unsupported scheme {other:?}"))),
        None => ("ws", address),
    };

    let host = host.trim_end_matches('/');
    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let endpoint = endpoint.trim_start_matches('/');
    Ok(format!("{scheme}://{host}/{endpoint}"))
}

pub struct WebSocketReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => Ok(Frame::Payload(Bytes::from(text))),
                Some(Ok(Message::Binary(data))) => Ok(Frame::Payload(Bytes::from(data))),
                Some(Ok(Message::Ping(_))) => Ok(Frame::Ping),
                Some(Ok(Message::Pong(_))) => Ok(Frame::Pong),
                Some(Ok(Message::Close(frame))) => Err(match frame {
                    Some(frame) => TransportError::Closed {
                        code: u16::from(frame.code),
                        reason: frame.reason.into_owned(),
                    },
                    None => TransportError::Closed {
                        code: CLOSE_NO_STATUS,
                        reason: String::new(),
                    },
                }),
                // Raw frames only surface when reading below the message layer.
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => Err(e.into()),
                None => Err(TransportError::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: "stream ended".to_string(),
                }),
            };
            return frame;
        }
    }
}

pub struct WebSocketWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Payload(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            },
            Frame::Ping => Message::Ping(Vec::new()),
            Frame::Pong => Message::Pong(Vec::new()),
            Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            })),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            tracing::trace!(error = %e, "Closing websocket sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CLOSE_NORMAL;
    use tokio::net::TcpListener;

    #[test]
    fn url_schemes() {
        assert_eq!(
            websocket_url("tcp://127.0.0.1:26657", "/websocket").unwrap(),
            "ws://127.0.0.1:26657/websocket"
        );
        assert_eq!(
            websocket_url("http://localhost:26657/", "websocket").unwrap(),
            "ws://localhost:26657/websocket"
        );
        assert_eq!(
            websocket_url("localhost:26657", "/websocket").unwrap(),
            "ws://localhost:26657/websocket"
        );
        assert_eq!(
            websocket_url("https://rpc.example.com", "/websocket").unwrap(),
            "wss://rpc.example.com/websocket"
        );
        assert_eq!(
            websocket_url("wss://rpc.example.com:443", "/ws").unwrap(),
            "wss://rpc.example.com:443/ws"
        );
    }

    #[test]
    fn url_rejects_bad_addresses() {
        assert!(matches!(
            websocket_url("unix:///tmp/rpc.sock", "/websocket"),
            Err(TransportError::InvalidAddress { .. })
        ));
        assert!(matches!(
            websocket_url("tcp://", "/websocket"),
            Err(TransportError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn loopback_echo_then_normal_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() {
                    ws.send(msg).await.unwrap();
                    ws.close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "bye".into(),
                    }))
                    .await
                    .unwrap();
                }
            }
        });

        let connector = WebSocketConnector::default();
        let connection = connector.dial(&addr.to_string()).await.unwrap();
        let (mut reader, mut writer) = connection.into_split();

        let payload = Bytes::from_static(br#"{"jsonrpc":"2.0","id":0,"method":"health"}"#);
        writer
            .write_frame(Frame::Payload(payload.clone()))
            .await
            .unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), Frame::Payload(payload));

        let err = reader.read_frame().await.unwrap_err();
        assert!(
            matches!(err, TransportError::Closed { code: CLOSE_NORMAL, .. }),
            "{err}"
        );
        assert!(err.is_graceful_close());
    }

    #[tokio::test]
    async fn dial_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WebSocketConnector::default().dial(&addr.to_string()).await;
        assert!(result.is_err());
    }
}
