//! Resilient JSON-RPC client over a persistent duplex stream.
//!
//! One write worker and one read worker own each connection. When either
//! fails, a coordinator waits for both to exit, redials with exponential
//! backoff, resends the request that was in flight and starts a fresh pair.
//! Keepalive pings measure round-trip latency.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod reconnect;
pub mod state;
pub mod transport;

mod backlog;
mod reader;
mod run_state;
mod worker;
mod writer;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, ConfigError, ReconnectError};
pub use metrics::{LatencySink, LatencySnapshot, LatencyTimer, NoopLatency};
pub use protocol::{Request, RequestId, Response, RpcError};
pub use reconnect::ReconnectHook;
pub use state::Phase;
pub use transport::websocket::WebSocketConnector;
pub use transport::{Connection, Connector, Frame, FrameReader, FrameWriter, TransportError};
