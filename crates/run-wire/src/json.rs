//! JSON envelope documents for guests without a protobuf runtime.
//!
//! Field names follow the protobuf messages in snake case. The request body
//! is base64 encoded; the response body is a plain string.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use run_core::{Headers, RequestEnvelope, RequestId, ResponseEnvelope};
use serde::{Deserialize, Serialize};

use crate::error::{WireError, WireResult};
use crate::proto::status_from_code;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRequest {
    pub body: String,
    pub method: String,
    pub url: String,
    pub endpoint_id: String,
    pub env: HashMap<String, String>,
    pub header: Headers,
    pub runtime: String,
    pub deployment_id: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonResponse {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub header: Option<Headers>,
}

impl From<&RequestEnvelope> for JsonRequest {
    fn from(req: &RequestEnvelope) -> Self {
        Self {
            body: STANDARD.encode(&req.body),
            method: req.method.clone(),
            url: req.url.clone(),
            endpoint_id: req.endpoint_id.to_string(),
            env: req.env.clone(),
            header: req.headers.clone(),
            runtime: req.runtime.to_string(),
            deployment_id: req.deployment_id.to_string(),
            id: req.id.to_string(),
        }
    }
}

impl JsonRequest {
    /// Decoded request body bytes.
    pub fn body_bytes(&self) -> WireResult<Vec<u8>> {
        STANDARD
            .decode(&self.body)
            .map_err(|e| WireError::InvalidRequest(format!("body is not base64: {e}")))
    }
}

pub fn encode_request(req: &RequestEnvelope) -> WireResult<Vec<u8>> {
    serde_json::to_vec(&JsonRequest::from(req)).map_err(|e| WireError::Encode(e.to_string()))
}

pub fn decode_response(bytes: &[u8], request_id: RequestId) -> WireResult<ResponseEnvelope> {
    let rsp: JsonResponse =
        serde_json::from_slice(bytes).map_err(|e| WireError::Decode(e.to_string()))?;
    Ok(ResponseEnvelope {
        request_id,
        status: status_from_code(rsp.code.unwrap_or(0))?,
        headers: rsp.header.unwrap_or_default(),
        body: rsp.body.unwrap_or_default().into_bytes(),
    })
}
