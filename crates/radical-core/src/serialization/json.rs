//! JSON wire format.

use super::{Serializer, WireRequest, WireRequestRef, WireResponse, WireResponseRef};
use crate::error::{RadicalError, Result};
use crate::message::{Request, Response};

/// Human-readable serializer using serde_json.
///
/// Payloads can be inspected with `redis-cli` or `psql` directly, at the cost
/// of size compared to [`super::MessagePackSerializer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode_request(&self, request: &Request) -> Result<Vec<u8>> {
        serde_json::to_vec(&WireRequestRef::from(request))
            .map_err(|e| RadicalError::protocol(format!("cannot encode request: {}", e)))
    }

    fn decode_request(&self, data: &[u8]) -> Result<Request> {
        let wire: WireRequest = serde_json::from_slice(data).map_err(RadicalError::protocol)?;
        Ok(wire.into())
    }

    fn encode_response(&self, response: &Response) -> Result<Vec<u8>> {
        serde_json::to_vec(&WireResponseRef::from(response))
            .map_err(|e| RadicalError::protocol(format!("cannot encode response: {}", e)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Response> {
        let wire: WireResponse = serde_json::from_slice(data).map_err(RadicalError::protocol)?;
        Ok(wire.into())
    }
}
