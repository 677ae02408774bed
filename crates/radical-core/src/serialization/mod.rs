//! Pluggable wire formats for requests and responses.
//!
//! Both serializers encode the same records:
//!
//! ```text
//! request:  { method: str, args: [..] = [], kwargs: {..} = {}, reply_to?: str }
//! response: { result?: any, error?: str }
//! ```
//!
//! Decoding a request validates its shape; anything else is a
//! [`RadicalError::Protocol`], which the worker logs and skips.

mod json;
mod msgpack;

pub use json::JsonSerializer;
pub use msgpack::MessagePackSerializer;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{RadicalError, Result};
use crate::message::{Request, Response, Signature};

/// Encodes and decodes requests and responses.
///
/// Client and worker sharing a queue must use the same serializer.
pub trait Serializer: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn encode_request(&self, request: &Request) -> Result<Vec<u8>>;

    /// Fails with [`RadicalError::Protocol`] on malformed payloads.
    fn decode_request(&self, data: &[u8]) -> Result<Request>;

    /// Only `result` and `error` are encoded.
    fn encode_response(&self, response: &Response) -> Result<Vec<u8>>;

    fn decode_response(&self, data: &[u8]) -> Result<Response>;
}

/// Available serializers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializerKind {
    Json,
    #[default]
    MessagePack,
}

impl SerializerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerializerKind::Json => "json",
            SerializerKind::MessagePack => "msgpack",
        }
    }

    /// Instantiate the serializer.
    pub fn create(&self) -> Arc<dyn Serializer> {
        match self {
            SerializerKind::Json => Arc::new(JsonSerializer),
            SerializerKind::MessagePack => Arc::new(MessagePackSerializer),
        }
    }
}

impl FromStr for SerializerKind {
    type Err = RadicalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" | "radical.serialization.json:jsonserializer" => Ok(SerializerKind::Json),
            "msgpack"
            | "messagepack"
            | "pickle"
            | "radical.serialization.pickle:pickleserializer" => Ok(SerializerKind::MessagePack),
            _ => Err(RadicalError::UnknownSerializer(s.to_string())),
        }
    }
}

impl std::fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Wire records shared by every format
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequestRef<'a> {
    method: &'a str,
    args: &'a [Value],
    kwargs: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WireRequest {
    method: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    kwargs: Map<String, Value>,
    #[serde(default)]
    reply_to: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireResponseRef<'a> {
    result: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl<'a> From<&'a Request> for WireRequestRef<'a> {
    fn from(request: &'a Request) -> Self {
        let signature = request.signature();
        Self {
            method: signature.method(),
            args: signature.args(),
            kwargs: signature.kwargs(),
            reply_to: request.reply_to(),
        }
    }
}

impl From<WireRequest> for Request {
    fn from(wire: WireRequest) -> Self {
        Request::new(
            Signature::new(wire.method, (wire.args, wire.kwargs)),
            wire.reply_to,
        )
    }
}

impl<'a> From<&'a Response> for WireResponseRef<'a> {
    fn from(response: &'a Response) -> Self {
        Self {
            result: response.result(),
            error: response.error(),
        }
    }
}

impl From<WireResponse> for Response {
    fn from(wire: WireResponse) -> Self {
        Response::new(None, wire.result, wire.error)
    }
}
