//! Request and response envelopes.
//!
//! An envelope is the internal form of an HTTP exchange as it moves from
//! the gateway to a sandbox executor and back. A `RequestEnvelope` is built
//! once per inbound call and consumed by exactly one executor invocation;
//! exactly one `ResponseEnvelope` is produced for it.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::types::{DeploymentId, EndpointId, RequestId, RequestMetric, RuntimeKind};

/// Multi-valued HTTP headers keyed by name.
pub type Headers = BTreeMap<String, Vec<String>>;

/// An inbound HTTP request, resolved to a deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub method: String,
    /// Path remainder after `/{mode}/{id}`, plus the query string.
    pub url: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub endpoint_id: EndpointId,
    pub deployment_id: DeploymentId,
    pub runtime: RuntimeKind,
    pub env: HashMap<String, String>,
}

impl RequestEnvelope {
    /// Start an envelope with a fresh request id.
    pub fn new(
        endpoint_id: EndpointId,
        deployment_id: DeploymentId,
        runtime: RuntimeKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: "GET".to_string(),
            url: "/".to_string(),
            headers: Headers::new(),
            body: Vec::new(),
            endpoint_id,
            deployment_id,
            runtime,
            env: HashMap::new(),
        }
    }
}

/// The response a guest produced (or one synthesized on an error path).
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub request_id: RequestId,
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ResponseEnvelope {
    /// A plain-text error response for `request_id`.
    pub fn error(request_id: RequestId, status: u16, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            headers: Headers::new(),
            body: message.into().into_bytes(),
        }
    }
}

/// What an executor emits for every request it handles.
#[derive(Debug, Clone)]
pub struct Completion {
    pub response: ResponseEnvelope,
    pub metric: Option<RequestMetric>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_gets_unique_ids() {
        let endpoint = Uuid::new_v4();
        let deployment = Uuid::new_v4();
        let a = RequestEnvelope::new(endpoint, deployment, RuntimeKind::Go);
        let b = RequestEnvelope::new(endpoint, deployment, RuntimeKind::Go);
        assert_ne!(a.id, b.id);
        assert_eq!(a.url, "/");
    }

    #[test]
    fn error_response_carries_message() {
        let id = Uuid::new_v4();
        let rsp = ResponseEnvelope::error(id, 500, "boom");
        assert_eq!(rsp.request_id, id);
        assert_eq!(rsp.status, 500);
        assert_eq!(rsp.body, b"boom");
        assert!(rsp.headers.is_empty());
    }
}
