//! Executor — the serial worker behind one deployment's sandbox.
//!
//! Each executor runs as its own task and drains a bounded mailbox of
//! request envelopes one at a time. The sandbox is built lazily from the
//! first request:
//!
//! ```text
//! Uninitialized ──first request──▶ Initializing ──ok──▶ Ready ──mailbox closed──▶ Stopped
//!        ▲                              │
//!        └──────────── failure ─────────┘
//! ```
//!
//! Every request yields exactly one [`Completion`] on the shared completion
//! channel, including requests that fail before reaching the guest.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use run_core::{
    Completion, DeploymentId, RequestEnvelope, RequestLog, RequestMetric, ResponseEnvelope,
    RuntimeKind, content_hash,
};
use run_state::{BlobStore, LogStore, MetadataStore, StateStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wasmtime::Module;

use crate::cache::{CompilationCache, ModuleCache};
use crate::engine::SandboxEngine;
use crate::error::{RuntimeError, RuntimeResult};
use crate::sandbox::Sandbox;

pub const DEPLOYMENT_MISMATCH: &str = "deployment ID must match runtime's bound deployment";
pub const RUNTIME_MISMATCH: &str = "invalid runtime found in request";

// ── State & stats ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutorState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Stopped = 3,
}

impl ExecutorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ExecutorState::Initializing,
            2 => ExecutorState::Ready,
            3 => ExecutorState::Stopped,
            _ => ExecutorState::Uninitialized,
        }
    }
}

/// Counters shared between an executor task and its handles.
#[derive(Debug)]
pub struct ExecutorStats {
    state: AtomicU8,
    busy: AtomicBool,
    initializations: AtomicU64,
    invocations: AtomicU64,
    cache_hits: AtomicU64,
    started: Instant,
    /// Milliseconds after `started` of the last mailbox activity.
    last_active_ms: AtomicU64,
}

impl ExecutorStats {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ExecutorState::Uninitialized as u8),
            busy: AtomicBool::new(false),
            initializations: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            started: Instant::now(),
            last_active_ms: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Initialization attempts, successful or not.
    pub fn initializations(&self) -> u64 {
        self.initializations.load(Ordering::Relaxed)
    }

    /// Guest invocations (requests that reached the sandbox).
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Initializations served from an already-compiled cache entry.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time since the executor last received or finished a request.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    fn set_state(&self, state: ExecutorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_active_ms.store(now, Ordering::Relaxed);
    }
}

// ── Dependencies ──────────────────────────────────────────────────

/// Everything an executor needs besides its deployment binding.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub engine: SandboxEngine,
    pub cache: ModuleCache,
    pub metadata: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub logs: Arc<dyn LogStore>,
    pub completions: mpsc::UnboundedSender<Completion>,
}

impl ExecutorDeps {
    /// Use one `StateStore` for metadata, blobs, and logs.
    pub fn from_store(
        engine: SandboxEngine,
        cache: ModuleCache,
        store: StateStore,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            engine,
            cache,
            metadata: Arc::new(store.clone()),
            blobs: Arc::new(store.clone()),
            logs: Arc::new(store),
            completions,
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────

/// Sending side of an executor's mailbox. Cheap to clone.
///
/// The executor stops once every handle has been dropped and its mailbox
/// has drained.
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    deployment_id: DeploymentId,
    runtime: RuntimeKind,
    mailbox: mpsc::Sender<RequestEnvelope>,
    stats: Arc<ExecutorStats>,
}

impl ExecutorHandle {
    pub fn deployment_id(&self) -> DeploymentId {
        self.deployment_id
    }

    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    /// Requests waiting in the mailbox.
    pub fn queued(&self) -> usize {
        self.mailbox.max_capacity() - self.mailbox.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Whether handles other than this one are alive.
    pub(crate) fn is_shared(&self) -> bool {
        self.mailbox.strong_count() > 1
    }

    /// Queue a request, waiting for mailbox space if it is full.
    pub async fn submit(&self, request: RequestEnvelope) -> RuntimeResult<()> {
        self.mailbox
            .send(request)
            .await
            .map_err(|_| RuntimeError::ExecutorUnavailable(self.deployment_id))
    }
}

/// Build an executor and return its handle plus the task body to spawn.
pub fn start(
    deployment_id: DeploymentId,
    runtime: RuntimeKind,
    deps: ExecutorDeps,
    mailbox_capacity: usize,
) -> (ExecutorHandle, impl Future<Output = ()> + Send + 'static) {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let stats = Arc::new(ExecutorStats::new());
    let handle = ExecutorHandle {
        deployment_id,
        runtime,
        mailbox: tx,
        stats: Arc::clone(&stats),
    };
    let executor = Executor {
        deployment_id,
        runtime,
        deps,
        sandbox: None,
        stdout: Vec::new(),
        stats,
    };
    (handle, executor.run(rx))
}

/// [`start`] and spawn the executor on the current tokio runtime.
pub fn spawn(
    deployment_id: DeploymentId,
    runtime: RuntimeKind,
    deps: ExecutorDeps,
    mailbox_capacity: usize,
) -> (ExecutorHandle, JoinHandle<()>) {
    let (handle, task) = start(deployment_id, runtime, deps, mailbox_capacity);
    (handle, tokio::spawn(task))
}

// ── Executor ──────────────────────────────────────────────────────

struct Executor {
    deployment_id: DeploymentId,
    runtime: RuntimeKind,
    deps: ExecutorDeps,
    sandbox: Option<Sandbox>,
    /// Captured guest stdout, cleared around every invocation.
    stdout: Vec<u8>,
    stats: Arc<ExecutorStats>,
}

impl Executor {
    async fn run(mut self, mut mailbox: mpsc::Receiver<RequestEnvelope>) {
        debug!(deployment_id = %self.deployment_id, runtime = %self.runtime, "executor started");

        while let Some(request) = mailbox.recv().await {
            self.stats.busy.store(true, Ordering::Release);
            self.stats.touch();

            let (completion, log) = self.handle(request).await;
            if self.deps.completions.send(completion).is_err() {
                warn!(deployment_id = %self.deployment_id, "completion channel closed, response dropped");
            }
            if let Some(log) = log {
                self.store_log(log).await;
            }

            self.stats.touch();
            self.stats.busy.store(false, Ordering::Release);
        }

        self.sandbox = None;
        self.stats.set_state(ExecutorState::Stopped);
        info!(
            deployment_id = %self.deployment_id,
            online = ?self.stats.uptime(),
            invocations = self.stats.invocations(),
            "executor stopped"
        );
    }

    async fn handle(&mut self, request: RequestEnvelope) -> (Completion, Option<RequestLog>) {
        let started = Instant::now();
        let (response, log) = match self.execute(&request).await {
            Ok((response, lines)) => {
                let log = RequestLog::new(self.deployment_id, request.id, lines);
                (response, Some(log))
            }
            Err(rejection) => (rejection, None),
        };

        let metric = RequestMetric {
            request_id: request.id,
            endpoint_id: request.endpoint_id,
            deployment_id: request.deployment_id,
            status: response.status,
            duration: started.elapsed(),
        };
        debug!(
            request_id = %request.id,
            status = response.status,
            duration = ?metric.duration,
            "request handled"
        );
        (
            Completion {
                response,
                metric: Some(metric),
            },
            log,
        )
    }

    /// Run one request. `Err` carries a synthesized error response.
    async fn execute(
        &mut self,
        request: &RequestEnvelope,
    ) -> Result<(ResponseEnvelope, Vec<String>), ResponseEnvelope> {
        if request.deployment_id != self.deployment_id {
            error!(
                bound = %self.deployment_id,
                requested = %request.deployment_id,
                request_id = %request.id,
                "request routed to the wrong executor"
            );
            return Err(ResponseEnvelope::error(request.id, 500, DEPLOYMENT_MISMATCH));
        }
        if request.runtime != self.runtime {
            warn!(
                expected = %self.runtime,
                got = %request.runtime,
                request_id = %request.id,
                "runtime mismatch"
            );
            return Err(ResponseEnvelope::error(request.id, 400, RUNTIME_MISMATCH));
        }

        if self.sandbox.is_none() {
            if let Err(e) = self.initialize().await {
                error!(deployment_id = %self.deployment_id, error = %e, "sandbox initialization failed");
                return Err(ResponseEnvelope::error(
                    request.id,
                    500,
                    format!("failed to initialize sandbox: {e}"),
                ));
            }
        }

        self.invoke(request).await.map_err(|e| {
            warn!(deployment_id = %self.deployment_id, request_id = %request.id, error = %e, "invocation failed");
            ResponseEnvelope::error(request.id, 500, format!("sandbox invocation failed: {e}"))
        })
    }

    async fn initialize(&mut self) -> RuntimeResult<()> {
        self.stats.set_state(ExecutorState::Initializing);
        self.stats.initializations.fetch_add(1, Ordering::Relaxed);

        match self.load_module().await {
            Ok(module) => {
                let sandbox = Sandbox::new(self.deps.engine.clone(), module, self.deployment_id);
                self.sandbox = Some(sandbox);
                self.stats.set_state(ExecutorState::Ready);
                info!(deployment_id = %self.deployment_id, "sandbox ready");
                Ok(())
            }
            Err(e) => {
                self.stats.set_state(ExecutorState::Uninitialized);
                Err(e)
            }
        }
    }

    async fn load_module(&self) -> RuntimeResult<Module> {
        let entry = self
            .deps
            .cache
            .get(self.deployment_id)
            .unwrap_or_else(|_| CompilationCache::new());

        let module = match entry.module() {
            Some(module) => {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(deployment_id = %self.deployment_id, "reusing compiled module");
                module
            }
            None => {
                let bytes = self.fetch_artifact().await?;
                entry.compile(&self.deps.engine, bytes).await?
            }
        };

        if let Err(e) = self.deps.cache.put(self.deployment_id, entry) {
            debug!(deployment_id = %self.deployment_id, error = %e, "module cache entry not stored");
        }
        Ok(module)
    }

    async fn fetch_artifact(&self) -> RuntimeResult<Vec<u8>> {
        let metadata = Arc::clone(&self.deps.metadata);
        let blobs = Arc::clone(&self.deps.blobs);
        let id = self.deployment_id;

        tokio::task::spawn_blocking(move || {
            let deployment = metadata
                .get_deployment(id)?
                .ok_or(RuntimeError::DeploymentNotFound(id))?;
            let blob = metadata
                .get_blob_metadata(id)?
                .ok_or(RuntimeError::ArtifactNotFound(id))?;
            let bytes = blobs
                .get_blob(&blob.location)?
                .ok_or(RuntimeError::ArtifactNotFound(id))?;
            if content_hash(&bytes) != deployment.hash {
                return Err(RuntimeError::ArtifactMismatch {
                    deployment_id: id,
                    expected: deployment.hash,
                });
            }
            Ok(bytes)
        })
        .await
        .map_err(|e| RuntimeError::Join(e.to_string()))?
    }

    async fn invoke(
        &mut self,
        request: &RequestEnvelope,
    ) -> RuntimeResult<(ResponseEnvelope, Vec<String>)> {
        let sandbox = self
            .sandbox
            .as_ref()
            .ok_or(RuntimeError::ExecutorUnavailable(self.deployment_id))?;
        let input = run_wire::encode_request(request)?;

        self.stdout.clear();
        self.stats.invocations.fetch_add(1, Ordering::Relaxed);
        let invoked = sandbox.invoke(input, &request.env, &mut self.stdout).await;
        let decoded = invoked.and_then(|()| {
            let output = run_wire::decode_output(&self.stdout)?;
            let response = run_wire::decode_response(self.runtime, request.id, output.response)?;
            Ok((response, output.log_lines()))
        });
        self.stdout.clear();
        decoded
    }

    async fn store_log(&self, log: RequestLog) {
        let logs = Arc::clone(&self.deps.logs);
        let request_id = log.request_id;
        match tokio::task::spawn_blocking(move || logs.append_log(&log)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(deployment_id = %self.deployment_id, %request_id, error = %e, "failed to store request log");
            }
            Err(e) => {
                warn!(deployment_id = %self.deployment_id, %request_id, error = %e, "request log task failed");
            }
        }
    }
}
