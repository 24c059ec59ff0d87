//! Shared fixtures for the runtime integration tests.
//!
//! Guests are hand-written WebAssembly text: they skip stdin and write a
//! precomputed framed output to stdout with `fd_write`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use prost::Message;
use run_core::{Completion, Deployment, Endpoint, RequestEnvelope, RuntimeKind};
use run_runtime::{ExecutorDeps, InstanceManager, ManagerConfig, ModuleCache, SandboxEngine, SandboxLimits};
use run_state::{MetadataStore, StateStore};
use run_wire::encode_output;
use run_wire::proto::HttpResponse;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn guest(output: &[u8]) -> Vec<u8> {
    let data: String = output.iter().map(|b| format!("\\{b:02x}")).collect();
    let wat = format!(
        r#"(module
             (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
             (memory (export "memory") 1)
             (data (i32.const 64) "{data}")
             (func (export "_start")
               (i32.store (i32.const 0) (i32.const 64))
               (i32.store (i32.const 4) (i32.const {len}))
               (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))"#,
        len = output.len(),
    );
    wat::parse_str(wat).unwrap()
}

/// A protobuf-speaking guest (Go or Rust SDK).
pub fn proto_guest(logs: &[u8], code: i32, body: &[u8]) -> Vec<u8> {
    let response = HttpResponse {
        body: body.to_vec(),
        code,
        request_id: String::new(),
        header: HashMap::new(),
    }
    .encode_to_vec();
    guest(&encode_output(logs, &response).unwrap())
}

/// A JSON-speaking guest (Python SDK).
pub fn json_guest(logs: &[u8], response: serde_json::Value) -> Vec<u8> {
    let response = serde_json::to_vec(&response).unwrap();
    guest(&encode_output(logs, &response).unwrap())
}

pub struct Harness {
    pub store: StateStore,
    pub cache: ModuleCache,
    pub manager: InstanceManager,
    pub manager_task: JoinHandle<()>,
    pub completions: mpsc::UnboundedReceiver<Completion>,
}

impl Harness {
    pub fn new(config: ManagerConfig) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let cache = ModuleCache::new();
        let (tx, completions) = mpsc::unbounded_channel();
        let engine = SandboxEngine::new(SandboxLimits::default()).unwrap();
        let deps = ExecutorDeps::from_store(engine, cache.clone(), store.clone(), tx);
        let (manager, manager_task) = InstanceManager::spawn(deps, config);
        Self {
            store,
            cache,
            manager,
            manager_task,
            completions,
        }
    }

    /// Create an endpoint and activate a deployment of `wasm` on it.
    pub fn publish(&self, runtime: RuntimeKind, wasm: &[u8]) -> (Endpoint, Deployment) {
        let endpoint = Endpoint::new("it", runtime, HashMap::new());
        self.store.create_endpoint(&endpoint).unwrap();
        let deployment = self.store.deploy(&endpoint, wasm, HashMap::new()).unwrap();
        let endpoint = self.store.set_active_deployment(endpoint.id, deployment.id).unwrap();
        (endpoint, deployment)
    }

    /// Resolve the deployment's executor, submit one request and wait for
    /// its completion.
    pub async fn call(&mut self, endpoint: &Endpoint, deployment: &Deployment) -> Completion {
        let mut request = RequestEnvelope::new(endpoint.id, deployment.id, endpoint.runtime);
        request.env = deployment.resolve_env(endpoint);
        let handle = self.manager.resolve(deployment.id, endpoint.runtime).await.unwrap();
        handle.submit(request).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.completions.recv())
            .await
            .unwrap()
            .unwrap()
    }
}
