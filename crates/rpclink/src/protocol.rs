//! JSON-RPC 2.0 messages carried in payload frames.
//!
//! Requests are correlated with responses by an integer [`RequestId`] assigned
//! when the request is built. A response without an identifier is a push
//! notification (e.g. an event from a subscription).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::bytes::Bytes;

pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation identifier for a request issued by this client instance.
///
/// Only unique among requests of one client; it restarts at zero when the
/// client is recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(i64);

impl RequestId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    /// Named (object) or positional (array) parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Build a request from any serializable params value (map, struct or array).
    pub fn with_params<P: Serialize + ?Sized>(
        id: RequestId,
        method: impl Into<String>,
        params: &P,
    ) -> Result<Self, serde_json::Error> {
        let params = serde_json::to_value(params)?;
        Ok(Self::new(id, method, params))
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Error object returned by the server in place of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid response id {0}: expected an integer")]
    InvalidId(Value),
}

/// Shape of a response as it appears on the wire, before id validation.
#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl Response {
    /// Decode a payload frame and validate its identifier.
    ///
    /// Identifiers are accepted when absent or any integer. Whether
    /// the id belongs to a request this client actually sent is not checked:
    /// subscription events reuse the subscribe request's id.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireResponse = serde_json::from_slice(data)?;
        let id = validate_id(wire.id)?;
        Ok(Self {
            jsonrpc: wire.jsonrpc,
            id,
            result: wire.result,
            error: wire.error,
        })
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

fn validate_id(id: Value) -> Result<Option<RequestId>, DecodeError> {
    match id {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(id) => Ok(Some(RequestId(id))),
            None => Err(DecodeError::InvalidId(Value::Number(n))),
        },
        other => Err(DecodeError::InvalidId(other)),
    }
}
