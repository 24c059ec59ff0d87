//! Module cache — compiled artifacts that outlive sandbox instances.
//!
//! A [`CompilationCache`] is a fill-once slot for one deployment's compiled
//! module. The [`ModuleCache`] maps deployment ids to slots so that a new
//! executor for a deployment whose previous executor was evicted skips
//! recompilation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use run_core::DeploymentId;
use tokio::sync::OnceCell;
use tracing::debug;
use wasmtime::Module;

use crate::engine::SandboxEngine;
use crate::error::{RuntimeError, RuntimeResult};

/// A shareable slot holding at most one compiled module.
///
/// Clones share the slot. Concurrent `compile` calls on the same slot run
/// the compiler once; the rest wait for its result.
#[derive(Clone, Default)]
pub struct CompilationCache {
    module: Arc<OnceCell<Module>>,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The compiled module, if the slot has been filled.
    pub fn module(&self) -> Option<Module> {
        self.module.get().cloned()
    }

    pub fn is_compiled(&self) -> bool {
        self.module.initialized()
    }

    /// Compile `bytes` into the slot, or return the module already there.
    pub async fn compile(&self, engine: &SandboxEngine, bytes: Vec<u8>) -> RuntimeResult<Module> {
        self.module
            .get_or_try_init(|| engine.compile(bytes))
            .await
            .cloned()
    }
}

/// Deployment id → compilation slot. Safe to share between executors.
#[derive(Clone, Default)]
pub struct ModuleCache {
    entries: Arc<RwLock<HashMap<DeploymentId, CompilationCache>>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an entry. Write-once: an existing entry is never replaced.
    pub fn put(&self, deployment_id: DeploymentId, entry: CompilationCache) -> RuntimeResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&deployment_id) {
            return Err(RuntimeError::CacheEntryExists(deployment_id));
        }
        entries.insert(deployment_id, entry);
        debug!(%deployment_id, "module cache entry stored");
        Ok(())
    }

    pub fn get(&self, deployment_id: DeploymentId) -> RuntimeResult<CompilationCache> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&deployment_id)
            .cloned()
            .ok_or(RuntimeError::CacheEntryMissing(deployment_id))
    }

    /// Remove an entry. The compiled module is released once no executor
    /// holds it. Returns whether an entry existed.
    pub fn delete(&self, deployment_id: DeploymentId) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&deployment_id)
            .is_some();
        debug!(%deployment_id, removed, "module cache entry deleted");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deployment_ids(&self) -> Vec<DeploymentId> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}
