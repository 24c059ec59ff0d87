//! Envelope encoding, dispatched on the deployment's runtime kind.

use run_core::{EnvelopeEncoding, RequestEnvelope, RequestId, ResponseEnvelope, RuntimeKind};

use crate::error::WireResult;
use crate::{json, proto};

/// Serialize a request in the encoding its runtime's guest SDK reads.
pub fn encode_request(req: &RequestEnvelope) -> WireResult<Vec<u8>> {
    match req.runtime.encoding() {
        EnvelopeEncoding::Protobuf => Ok(proto::encode_request(req)),
        EnvelopeEncoding::Json => json::encode_request(req),
    }
}

/// Parse the response section of a guest's output.
///
/// The returned envelope always carries `request_id`, whatever the guest
/// wrote in its own copy of the field.
pub fn decode_response(
    runtime: RuntimeKind,
    request_id: RequestId,
    bytes: &[u8],
) -> WireResult<ResponseEnvelope> {
    match runtime.encoding() {
        EnvelopeEncoding::Protobuf => proto::decode_response(bytes, request_id),
        EnvelopeEncoding::Json => json::decode_response(bytes, request_id),
    }
}
