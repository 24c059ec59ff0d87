//! Guest-side SDK for Rust handlers compiled to `wasm32-wasip1`.
//!
//! ```ignore
//! fn main() {
//!     run_wire::guest::serve(|req| {
//!         run_wire::guest::log_line(&format!("handling {}", req.uri()));
//!         http::Response::new(b"Hello world!".to_vec())
//!     });
//! }
//! ```
//!
//! Anything the handler prints to stdout becomes a log line for the
//! request, as long as it ends with a newline.

use std::io::{Read, Write};

use prost::Message;

use crate::error::{WireError, WireResult};
use crate::framing::encode_output;
use crate::proto::{HeaderFields, HttpRequest, HttpResponse};

/// Write one log line for the current request.
///
/// Embedded newlines split the message into several lines.
pub fn log_line(message: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{message}");
}

/// Decode `input`, run `handler`, and return the framed response section.
pub fn respond<F>(input: &[u8], handler: F) -> WireResult<Vec<u8>>
where
    F: FnOnce(http::Request<Vec<u8>>) -> http::Response<Vec<u8>>,
{
    let raw = HttpRequest::decode(input).map_err(|e| WireError::Decode(e.to_string()))?;
    let request = into_http_request(raw)?;
    let response = handler(request);
    let encoded = from_http_response(response).encode_to_vec();
    encode_output(&[], &encoded)
}

/// Read the request from stdin, run `handler`, and write the response.
///
/// Exits the process with status 1 if the exchange cannot complete, which
/// the host reports as a failed invocation.
pub fn serve<F>(handler: F)
where
    F: FnOnce(http::Request<Vec<u8>>) -> http::Response<Vec<u8>>,
{
    if let Err(e) = try_serve(handler) {
        eprintln!("run: {e}");
        std::process::exit(1);
    }
}

fn try_serve<F>(handler: F) -> WireResult<()>
where
    F: FnOnce(http::Request<Vec<u8>>) -> http::Response<Vec<u8>>,
{
    let mut input = Vec::new();
    std::io::stdin().read_to_end(&mut input)?;
    let output = respond(&input, handler)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&output)?;
    stdout.flush()?;
    Ok(())
}

fn into_http_request(raw: HttpRequest) -> WireResult<http::Request<Vec<u8>>> {
    let method = if raw.method.is_empty() { "GET" } else { raw.method.as_str() };
    let uri = if raw.url.is_empty() { "/" } else { raw.url.as_str() };

    let mut builder = http::Request::builder().method(method).uri(uri);
    for (name, values) in &raw.header {
        for value in &values.fields {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder
        .body(raw.body)
        .map_err(|e| WireError::InvalidRequest(e.to_string()))
}

fn from_http_response(response: http::Response<Vec<u8>>) -> HttpResponse {
    let (parts, body) = response.into_parts();
    let mut header = std::collections::HashMap::<String, HeaderFields>::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            header
                .entry(name.as_str().to_string())
                .or_default()
                .fields
                .push(value.to_string());
        }
    }
    HttpResponse {
        body,
        code: i32::from(parts.status.as_u16()),
        request_id: String::new(),
        header,
    }
}
