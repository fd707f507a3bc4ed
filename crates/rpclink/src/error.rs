use std::time::Duration;

use thiserror::Error;

use crate::protocol::RequestId;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not running")]
    NotRunning,

    #[error("client already started")]
    AlreadyStarted,

    #[error("client was stopped and cannot be restarted")]
    Stopped,

    #[error("request canceled before it was accepted")]
    Canceled,

    #[error("failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to encode request params: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Why the reconnect coordinator gave up and stopped the client.
#[derive(Debug, Error)]
pub enum ReconnectError {
    #[error("reached maximum reconnect attempts ({attempts}): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },

    #[error("failed to resend backlogged request {id}: {source}")]
    Backlog {
        id: RequestId,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ping period {ping:?} must be shorter than read wait {read:?}")]
    PingNotBelowReadWait { ping: Duration, read: Duration },
}
