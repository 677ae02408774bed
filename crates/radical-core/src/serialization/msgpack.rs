//! MessagePack wire format.

use super::{Serializer, WireRequest, WireRequestRef, WireResponse, WireResponseRef};
use crate::error::{RadicalError, Result};
use crate::message::{Request, Response};

/// Compact binary serializer using rmp-serde.
///
/// Records are written as maps with named fields, so optional fields may be
/// omitted and decoding does not depend on field order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackSerializer;

impl Serializer for MessagePackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode_request(&self, request: &Request) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(&WireRequestRef::from(request))
            .map_err(|e| RadicalError::protocol(format!("cannot encode request: {}", e)))
    }

    fn decode_request(&self, data: &[u8]) -> Result<Request> {
        let wire: WireRequest = rmp_serde::from_slice(data).map_err(RadicalError::protocol)?;
        Ok(wire.into())
    }

    fn encode_response(&self, response: &Response) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(&WireResponseRef::from(response))
            .map_err(|e| RadicalError::protocol(format!("cannot encode response: {}", e)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Response> {
        let wire: WireResponse = rmp_serde::from_slice(data).map_err(RadicalError::protocol)?;
        Ok(wire.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::{JsonSerializer, Serializer};
    use serde_json::json;

    #[test]
    fn test_smaller_than_json() {
        let request = crate::serialization::tests::sample_request(Some("0123456789abcdef"));
        let packed = MessagePackSerializer.encode_request(&request).unwrap();
        let text = JsonSerializer.encode_request(&request).unwrap();
        assert!(packed.len() < text.len());
    }

    #[test]
    fn test_rejects_garbage() {
        let err = MessagePackSerializer.decode_request(b"dafuq!").unwrap_err();
        assert!(matches!(err, RadicalError::Protocol { .. }));
    }

    #[test]
    fn test_rejects_json_payload() {
        let err = MessagePackSerializer
            .decode_request(br#"{"method": "test.add"}"#)
            .unwrap_err();
        assert!(matches!(err, RadicalError::Protocol { .. }));
    }

    #[test]
    fn test_rejects_request_without_method() {
        let data = rmp_serde::to_vec_named(&json!({"args": [1, 2]})).unwrap();
        let err = MessagePackSerializer.decode_request(&data).unwrap_err();
        assert!(matches!(err, RadicalError::Protocol { .. }));
    }

    #[test]
    fn test_preserves_integer_and_float_results() {
        for result in [json!(1337), json!(-5), json!(2.5), json!(u64::MAX)] {
            let response = Response::new(None, result.clone(), None);
            let data = MessagePackSerializer.encode_response(&response).unwrap();
            let decoded = MessagePackSerializer.decode_response(&data).unwrap();
            assert_eq!(decoded.result(), &result);
        }
    }
}
