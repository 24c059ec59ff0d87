//! Protobuf envelope messages.
//!
//! Field numbers match the `proto.v1` package the Go guest SDK is compiled
//! against, so a guest built with that SDK decodes these bytes unchanged.

use std::collections::HashMap;

use prost::Message;
use run_core::{Headers, RequestEnvelope, ResponseEnvelope, RequestId};

use crate::error::{WireError, WireResult};

#[derive(Clone, PartialEq, Message)]
pub struct HttpRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub body: Vec<u8>,
    #[prost(string, tag = "2")]
    pub method: String,
    #[prost(string, tag = "3")]
    pub url: String,
    #[prost(string, tag = "4")]
    pub endpoint_id: String,
    #[prost(map = "string, string", tag = "5")]
    pub env: HashMap<String, String>,
    #[prost(map = "string, message", tag = "6")]
    pub header: HashMap<String, HeaderFields>,
    #[prost(string, tag = "7")]
    pub runtime: String,
    #[prost(string, tag = "8")]
    pub deployment_id: String,
    #[prost(string, tag = "9")]
    pub id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct HeaderFields {
    #[prost(string, repeated, tag = "1")]
    pub fields: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct HttpResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub body: Vec<u8>,
    #[prost(int32, tag = "2")]
    pub code: i32,
    #[prost(string, tag = "3")]
    pub request_id: String,
    #[prost(map = "string, message", tag = "4")]
    pub header: HashMap<String, HeaderFields>,
}

impl From<&RequestEnvelope> for HttpRequest {
    fn from(req: &RequestEnvelope) -> Self {
        Self {
            body: req.body.clone(),
            method: req.method.clone(),
            url: req.url.clone(),
            endpoint_id: req.endpoint_id.to_string(),
            env: req.env.clone(),
            header: to_proto_headers(&req.headers),
            runtime: req.runtime.to_string(),
            deployment_id: req.deployment_id.to_string(),
            id: req.id.to_string(),
        }
    }
}

impl HttpResponse {
    /// Convert into an envelope stamped with the host's request id.
    ///
    /// The guest's own `request_id` field is ignored.
    pub fn into_envelope(self, request_id: RequestId) -> WireResult<ResponseEnvelope> {
        Ok(ResponseEnvelope {
            request_id,
            status: status_from_code(i64::from(self.code))?,
            headers: from_proto_headers(self.header),
            body: self.body,
        })
    }
}

pub fn encode_request(req: &RequestEnvelope) -> Vec<u8> {
    HttpRequest::from(req).encode_to_vec()
}

pub fn decode_response(bytes: &[u8], request_id: RequestId) -> WireResult<ResponseEnvelope> {
    HttpResponse::decode(bytes)
        .map_err(|e| WireError::Decode(e.to_string()))?
        .into_envelope(request_id)
}

pub(crate) fn to_proto_headers(headers: &Headers) -> HashMap<String, HeaderFields> {
    headers
        .iter()
        .map(|(name, values)| {
            (
                name.clone(),
                HeaderFields {
                    fields: values.clone(),
                },
            )
        })
        .collect()
}

pub(crate) fn from_proto_headers(headers: HashMap<String, HeaderFields>) -> Headers {
    headers
        .into_iter()
        .map(|(name, values)| (name, values.fields))
        .collect()
}

/// Map a guest status code to an HTTP status.
///
/// A guest that never sets a status reports `0`, which means 200 just as
/// it would for a handler that writes a body without calling `WriteHeader`.
pub(crate) fn status_from_code(code: i64) -> WireResult<u16> {
    match code {
        0 => Ok(200),
        100..=999 => Ok(code as u16),
        other => Err(WireError::InvalidStatus(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use run_core::RuntimeKind;
    use uuid::Uuid;

    #[test]
    fn response_wire_bytes_match_known_encoding() {
        let rsp = HttpResponse {
            body: b"ok".to_vec(),
            code: 200,
            request_id: String::new(),
            header: HashMap::new(),
        };
        assert_eq!(rsp.encode_to_vec(), b"\x0a\x02ok\x10\xc8\x01");
    }

    #[test]
    fn request_carries_ids_as_strings() {
        let mut req = RequestEnvelope::new(Uuid::new_v4(), Uuid::new_v4(), RuntimeKind::Go);
        req.method = "POST".to_string();
        req.url = "/users?id=1".to_string();
        req.headers
            .insert("Accept".to_string(), vec!["a".to_string(), "b".to_string()]);
        req.body = b"{}".to_vec();

        let decoded = HttpRequest::decode(encode_request(&req).as_slice()).unwrap();
        assert_eq!(decoded.id, req.id.to_string());
        assert_eq!(decoded.deployment_id, req.deployment_id.to_string());
        assert_eq!(decoded.runtime, "go");
        assert_eq!(decoded.method, "POST");
        assert_eq!(decoded.url, "/users?id=1");
        assert_eq!(decoded.header["Accept"].fields, vec!["a", "b"]);
        assert_eq!(decoded.body, b"{}");
    }

    #[test]
    fn decode_stamps_host_request_id() {
        let id = Uuid::new_v4();
        let bytes = HttpResponse {
            body: b"Hello world!".to_vec(),
            code: 201,
            request_id: "guest-made-this-up".to_string(),
            header: HashMap::from([(
                "Content-Type".to_string(),
                HeaderFields {
                    fields: vec!["text/plain".to_string()],
                },
            )]),
        }
        .encode_to_vec();

        let rsp = decode_response(&bytes, id).unwrap();
        assert_eq!(rsp.request_id, id);
        assert_eq!(rsp.status, 201);
        assert_eq!(rsp.body, b"Hello world!");
        assert_eq!(rsp.headers["Content-Type"], vec!["text/plain"]);
    }

    #[test]
    fn unset_status_means_ok() {
        let rsp = decode_response(b"\x0a\x02ok", Uuid::new_v4()).unwrap();
        assert_eq!(rsp.status, 200);
    }

    #[test]
    fn out_of_range_status_is_rejected() {
        let bytes = HttpResponse {
            code: -1,
            ..Default::default()
        }
        .encode_to_vec();
        assert!(matches!(
            decode_response(&bytes, Uuid::new_v4()),
            Err(WireError::InvalidStatus(-1))
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            decode_response(b"\xff\xff\xff", Uuid::new_v4()),
            Err(WireError::Decode(_))
        ));
    }
}
