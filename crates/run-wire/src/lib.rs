//! run-wire — the byte-level contract between the host and a guest.
//!
//! A guest reads one serialized request envelope from stdin and writes its
//! log lines, then one serialized response envelope, then a fixed-width
//! length trailer to stdout:
//!
//! ```text
//! ┌────────────────────────┬──────────────────────┬──────────────────┐
//! │ log lines ("...\n")*   │ response (L bytes)   │ L: u32 LE (4 B)  │
//! └────────────────────────┴──────────────────────┴──────────────────┘
//! ```
//!
//! The host decodes from the end of the buffer backward, so neither part
//! needs to know the other's length up front.
//!
//! - **framing**: trailer encode/decode and log-line splitting
//! - **proto**: protobuf envelope messages (Go and Rust guests)
//! - **json**: JSON envelope documents (Python guests)
//! - **codec**: runtime-kind dispatch between the two encodings
//! - **guest**: the Rust guest SDK

pub mod codec;
pub mod error;
pub mod framing;
pub mod guest;
pub mod json;
pub mod proto;

pub use codec::{decode_response, encode_request};
pub use error::{WireError, WireResult};
pub use framing::{FRAMING_VERSION, Output, TRAILER_LEN, decode_output, encode_output, split_log_lines};
