//! Sandbox — one compiled module, invoked as a WASI command per request.

use std::collections::HashMap;

use run_core::DeploymentId;
use tracing::trace;
use wasmtime::Module;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::p2::pipe::{MemoryInputPipe, MemoryOutputPipe};

use crate::engine::SandboxEngine;
use crate::error::{RuntimeError, RuntimeResult};

/// A compiled module bound to a deployment.
///
/// Every invocation instantiates the module in a fresh store, so no guest
/// state survives from one request to the next.
pub struct Sandbox {
    engine: SandboxEngine,
    module: Module,
    deployment_id: DeploymentId,
}

impl Sandbox {
    pub fn new(engine: SandboxEngine, module: Module, deployment_id: DeploymentId) -> Self {
        Self {
            engine,
            module,
            deployment_id,
        }
    }

    pub fn deployment_id(&self) -> DeploymentId {
        self.deployment_id
    }

    /// Run the module's `_start` with `stdin` and `env`, appending whatever
    /// the guest writes to stdout into `stdout`.
    ///
    /// `proc_exit(0)` counts as success. Any other exit status or trap is an
    /// error, and `stdout` is left untouched.
    pub async fn invoke(
        &self,
        stdin: Vec<u8>,
        env: &HashMap<String, String>,
        stdout: &mut Vec<u8>,
    ) -> RuntimeResult<()> {
        let output = MemoryOutputPipe::new(self.engine.limits().stdout_bytes);

        let mut builder = WasiCtxBuilder::new();
        builder
            .stdin(MemoryInputPipe::new(stdin))
            .stdout(output.clone());
        for (key, value) in env {
            builder.env(key, value);
        }
        let mut store = self.engine.new_store(builder.build_p1())?;

        let instance = self
            .engine
            .linker()
            .instantiate_async(&mut store, &self.module)
            .await
            .map_err(|e| RuntimeError::Instantiate(e.to_string()))?;
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|e| RuntimeError::Instantiate(e.to_string()))?;

        if let Err(e) = start.call_async(&mut store, ()).await {
            match e.downcast_ref::<wasmtime_wasi::I32Exit>() {
                Some(exit) if exit.0 == 0 => {}
                Some(exit) => return Err(RuntimeError::Exit(exit.0)),
                None => return Err(RuntimeError::Trap(e.to_string())),
            }
        }
        drop(store);

        let contents = output.contents();
        trace!(deployment_id = %self.deployment_id, bytes = contents.len(), "guest output captured");
        stdout.extend_from_slice(&contents);
        Ok(())
    }
}
