//! Gateway errors and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use run_core::{DeploymentId, EndpointId};
use run_state::StateError;
use thiserror::Error;

pub const UNKNOWN_MODE: &str = "request must be in live or preview mode";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request must be in live or preview mode")]
    UnknownMode(String),

    #[error("invalid id {value:?}: {reason}")]
    InvalidId { value: String, reason: String },

    #[error("endpoint {0} not found")]
    EndpointNotFound(EndpointId),

    #[error("deployment {0} not found")]
    DeploymentNotFound(DeploymentId),

    #[error("endpoint {0} does not have any published deployment")]
    NoActiveDeployment(EndpointId),

    #[error("cannot read request body: {0}")]
    Body(String),

    #[error("response channel closed before a response arrived")]
    ResponseDropped,

    #[error(transparent)]
    State(#[from] StateError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::UnknownMode(_)
            | GatewayError::InvalidId { .. }
            | GatewayError::NoActiveDeployment(_) => StatusCode::BAD_REQUEST,
            GatewayError::EndpointNotFound(_) | GatewayError::DeploymentNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::Body(_) | GatewayError::ResponseDropped | GatewayError::State(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// The JSON body of every gateway-level error response.
pub fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(error_body(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn routing_errors_map_to_client_statuses() {
        assert_eq!(GatewayError::UnknownMode("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GatewayError::NoActiveDeployment(Uuid::new_v4()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::DeploymentNotFound(Uuid::new_v4()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(GatewayError::ResponseDropped.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unknown_mode_message_is_fixed() {
        assert_eq!(GatewayError::UnknownMode("draft".into()).to_string(), UNKNOWN_MODE);
        assert_eq!(error_body(UNKNOWN_MODE)["error"], UNKNOWN_MODE);
    }
}
