//! WAT guests and store fixtures for unit tests.

use std::collections::HashMap;
use std::time::Duration;

use prost::Message;
use run_core::{Deployment, DeploymentId, Endpoint, RequestEnvelope, RequestId, RequestLog, RuntimeKind};
use run_state::{LogStore, MetadataStore, StateStore};
use run_wire::encode_output;
use run_wire::proto::HttpResponse;

const IMPORTS: &str = r#"
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (import "wasi_snapshot_preview1" "environ_sizes_get" (func $environ_sizes_get (param i32 i32) (result i32)))
  (memory (export "memory") 1)
"#;

fn escape(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{b:02x}")).collect()
}

/// A `_start` body that writes `output` (placed at offset 64) to stdout.
fn write_stdout(len: usize) -> String {
    format!(
        "(i32.store (i32.const 0) (i32.const 64))
         (i32.store (i32.const 4) (i32.const {len}))
         (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))"
    )
}

fn guest(output: &[u8], tail: &str) -> Vec<u8> {
    let wat = format!(
        "(module {IMPORTS}
           (data (i32.const 64) \"{data}\")
           (func (export \"_start\") {write} {tail}))",
        data = escape(output),
        write = write_stdout(output.len()),
    );
    wat::parse_str(wat).unwrap()
}

pub fn response_bytes(code: i32, body: &[u8]) -> Vec<u8> {
    HttpResponse {
        body: body.to_vec(),
        code,
        request_id: String::new(),
        header: HashMap::new(),
    }
    .encode_to_vec()
}

/// Writes `logs`, then a response with `code` and `body`.
pub fn framed_guest(logs: &[u8], code: i32, body: &[u8]) -> Vec<u8> {
    let output = encode_output(logs, &response_bytes(code, body)).unwrap();
    guest(&output, "")
}

/// Answers 200 "Hello world!" without logging.
pub fn hello_guest() -> Vec<u8> {
    framed_guest(b"", 200, b"Hello world!")
}

/// Logs "hello", then answers 200 "ok".
pub fn logging_guest() -> Vec<u8> {
    framed_guest(b"hello\n", 200, b"ok")
}

/// Answers like [`hello_guest`], then calls `proc_exit(code)`.
pub fn hello_then_exit_guest(code: i32) -> Vec<u8> {
    let output = encode_output(b"", &response_bytes(200, b"Hello world!")).unwrap();
    guest(&output, &format!("(call $proc_exit (i32.const {code}))"))
}

pub fn exit_guest(code: i32) -> Vec<u8> {
    guest(b"", &format!("(call $proc_exit (i32.const {code}))"))
}

pub fn trap_guest() -> Vec<u8> {
    guest(b"", "unreachable")
}

/// Never returns.
pub fn spin_guest() -> Vec<u8> {
    guest(b"", "(loop $spin (br $spin))")
}

/// Writes two bytes, too short for a trailer.
pub fn bad_framing_guest() -> Vec<u8> {
    guest(b"xy", "")
}

/// Answers 200 when at least one environment variable is set, otherwise
/// exits with status 1.
pub fn env_guest() -> Vec<u8> {
    let output = encode_output(b"", &response_bytes(200, b"env")).unwrap();
    let wat = format!(
        "(module {IMPORTS}
           (data (i32.const 64) \"{data}\")
           (func (export \"_start\")
             (drop (call $environ_sizes_get (i32.const 16) (i32.const 20)))
             (if (i32.eqz (i32.load (i32.const 16)))
               (then (call $proc_exit (i32.const 1))))
             {write}))",
        data = escape(&output),
        write = write_stdout(output.len()),
    );
    wat::parse_str(wat).unwrap()
}

pub fn endpoint(store: &StateStore, runtime: RuntimeKind) -> Endpoint {
    let endpoint = Endpoint::new("test", runtime, HashMap::new());
    store.create_endpoint(&endpoint).unwrap();
    endpoint
}

/// Create an endpoint and an active deployment of `wasm`.
pub fn seed(store: &StateStore, runtime: RuntimeKind, wasm: &[u8]) -> (Endpoint, Deployment) {
    let endpoint = endpoint(store, runtime);
    let deployment = store.deploy(&endpoint, wasm, HashMap::new()).unwrap();
    let endpoint = store.set_active_deployment(endpoint.id, deployment.id).unwrap();
    (endpoint, deployment)
}

pub fn request(endpoint: &Endpoint, deployment: &Deployment) -> RequestEnvelope {
    let mut request = RequestEnvelope::new(endpoint.id, deployment.id, endpoint.runtime);
    request.env = deployment.resolve_env(endpoint);
    request
}

/// Logs are written after the completion is sent; poll until one lands.
pub async fn wait_for_log(
    store: &StateStore,
    deployment_id: DeploymentId,
    request_id: RequestId,
) -> RequestLog {
    for _ in 0..200 {
        if let Some(log) = store.get_request_log(deployment_id, request_id).unwrap() {
            return log;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no log stored for request {request_id}");
}
