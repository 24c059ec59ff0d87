//! run-core — shared types for the Run serverless platform.
//!
//! Holds the data model every other crate speaks:
//!
//! - **types**: endpoints, deployments, blob metadata, request logs, metrics
//! - **envelope**: the request/response envelopes that cross component
//!   boundaries between the gateway and sandbox executors
//! - **config**: the `run.toml` daemon configuration

pub mod config;
pub mod envelope;
pub mod error;
pub mod types;

pub use config::RunConfig;
pub use envelope::{Completion, Headers, RequestEnvelope, ResponseEnvelope};
pub use error::{CoreError, CoreResult};
pub use types::*;
