//! InstanceManager — one live executor per deployment.
//!
//! The deployment → executor map is owned by a single actor task. Every
//! lookup-or-create goes through its command channel, so two concurrent
//! first requests for the same deployment are serialized by the actor and
//! share one executor.
//!
//! Callers talk to the actor with a bounded-time ask: a command plus a
//! oneshot reply, raced against a deadline.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use run_core::config::RuntimeConfig;
use run_core::{DeploymentId, RuntimeKind};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::executor::{self, ExecutorDeps, ExecutorHandle};

/// Pending commands the manager will buffer.
const COMMAND_CAPACITY: usize = 256;

/// Boxed future returned by [`InstanceResolver::resolve`].
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = RuntimeResult<ExecutorHandle>> + Send + 'a>>;

/// Anything that can turn a deployment id into a live executor handle.
pub trait InstanceResolver: Send + Sync + 'static {
    fn resolve(&self, deployment_id: DeploymentId, runtime: RuntimeKind) -> ResolveFuture<'_>;
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub ask_timeout: Duration,
    pub mailbox_capacity: usize,
    /// Evict executors idle this long; `None` keeps them until shutdown.
    pub idle_timeout: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for ManagerConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            ask_timeout: config.ask_timeout(),
            mailbox_capacity: config.mailbox_capacity,
            idle_timeout: config.idle_timeout(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

enum Command {
    Resolve {
        deployment_id: DeploymentId,
        runtime: RuntimeKind,
        reply: oneshot::Sender<ExecutorHandle>,
    },
    Retire {
        deployment_id: DeploymentId,
        reply: oneshot::Sender<bool>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Sweep {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Client side of the manager actor. Cheap to clone.
#[derive(Clone)]
pub struct InstanceManager {
    commands: mpsc::Sender<Command>,
    ask_timeout: Duration,
}

impl InstanceManager {
    /// Spawn the manager actor on the current tokio runtime.
    pub fn spawn(deps: ExecutorDeps, config: ManagerConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let manager = Self {
            commands: tx,
            ask_timeout: config.ask_timeout,
        };
        let actor = ManagerActor {
            deps,
            config,
            instances: HashMap::new(),
            tasks: JoinSet::new(),
        };
        (manager, tokio::spawn(actor.run(rx)))
    }

    /// Send a command and wait for its reply, bounded by the ask timeout.
    async fn ask<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> RuntimeResult<T> {
        let (reply, response) = oneshot::channel();
        let exchange = async {
            self.commands
                .send(command(reply))
                .await
                .map_err(|_| RuntimeError::ManagerUnavailable)?;
            response.await.map_err(|_| RuntimeError::ManagerUnavailable)
        };
        tokio::time::timeout(self.ask_timeout, exchange)
            .await
            .map_err(|_| RuntimeError::ResolveTimeout(self.ask_timeout))?
    }

    /// Get the executor for `deployment_id`, creating it on first use.
    pub async fn resolve(
        &self,
        deployment_id: DeploymentId,
        runtime: RuntimeKind,
    ) -> RuntimeResult<ExecutorHandle> {
        self.ask(|reply| Command::Resolve {
            deployment_id,
            runtime,
            reply,
        })
        .await
    }

    /// Evict the executor for `deployment_id` and drop its module cache
    /// entry. Returns whether an executor was live.
    pub async fn retire(&self, deployment_id: DeploymentId) -> RuntimeResult<bool> {
        self.ask(|reply| Command::Retire {
            deployment_id,
            reply,
        })
        .await
    }

    pub async fn instance_count(&self) -> RuntimeResult<usize> {
        self.ask(|reply| Command::Count { reply }).await
    }

    /// Run an idle sweep now. Returns the number of evicted executors.
    pub async fn sweep_idle(&self) -> RuntimeResult<usize> {
        self.ask(|reply| Command::Sweep { reply }).await
    }

    /// Drop every executor and wait for them to drain.
    ///
    /// Not bounded by the ask timeout: queued requests finish first.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| RuntimeError::ManagerUnavailable)?;
        response.await.map_err(|_| RuntimeError::ManagerUnavailable)
    }

    /// A manager whose actor never answers, for exercising the ask timeout.
    #[cfg(test)]
    fn stalled(ask_timeout: Duration) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        (
            Self {
                commands: tx,
                ask_timeout,
            },
            rx,
        )
    }
}

impl InstanceResolver for InstanceManager {
    fn resolve(&self, deployment_id: DeploymentId, runtime: RuntimeKind) -> ResolveFuture<'_> {
        Box::pin(InstanceManager::resolve(self, deployment_id, runtime))
    }
}

// ── Actor ─────────────────────────────────────────────────────────

struct ManagerActor {
    deps: ExecutorDeps,
    config: ManagerConfig,
    instances: HashMap<DeploymentId, ExecutorHandle>,
    tasks: JoinSet<()>,
}

impl ManagerActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            idle_timeout = ?self.config.idle_timeout,
            mailbox_capacity = self.config.mailbox_capacity,
            "instance manager started"
        );

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.shutdown().await;
                        break;
                    };
                    if !self.handle(command).await {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    self.sweep();
                }
            }
        }
    }

    /// Apply one command. Returns `false` once the actor should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Resolve {
                deployment_id,
                runtime,
                reply,
            } => {
                let handle = self.resolve(deployment_id, runtime);
                let _ = reply.send(handle);
            }
            Command::Retire {
                deployment_id,
                reply,
            } => {
                let existed = self.instances.remove(&deployment_id).is_some();
                self.deps.cache.delete(deployment_id);
                info!(%deployment_id, existed, "sandbox instance retired");
                let _ = reply.send(existed);
            }
            Command::Count { reply } => {
                let _ = reply.send(self.instances.len());
            }
            Command::Sweep { reply } => {
                let _ = reply.send(self.sweep());
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn resolve(&mut self, deployment_id: DeploymentId, runtime: RuntimeKind) -> ExecutorHandle {
        if let Some(handle) = self.instances.get(&deployment_id) {
            if !handle.is_closed() {
                handle.stats().touch();
                return handle.clone();
            }
            warn!(%deployment_id, "executor exited unexpectedly, replacing");
            self.instances.remove(&deployment_id);
        }

        let (handle, task) = executor::start(
            deployment_id,
            runtime,
            self.deps.clone(),
            self.config.mailbox_capacity,
        );
        self.tasks.spawn(task);
        self.instances.insert(deployment_id, handle.clone());
        info!(
            %deployment_id,
            %runtime,
            instances = self.instances.len(),
            "sandbox instance created"
        );
        handle
    }

    /// Evict executors that are idle, not busy, have nothing queued, and are
    /// not held by any caller.
    fn sweep(&mut self) -> usize {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "executor task failed");
            }
        }

        let Some(idle_timeout) = self.config.idle_timeout else {
            return 0;
        };

        let before = self.instances.len();
        self.instances.retain(|deployment_id, handle| {
            let stats = handle.stats();
            let keep = stats.is_busy()
                || handle.queued() > 0
                || handle.is_shared()
                || stats.idle_for() < idle_timeout;
            if !keep {
                debug!(%deployment_id, idle = ?stats.idle_for(), "evicting idle sandbox instance");
            }
            keep
        });
        let evicted = before - self.instances.len();
        if evicted > 0 {
            info!(evicted, remaining = self.instances.len(), "idle sweep");
        }
        evicted
    }

    async fn shutdown(&mut self) {
        let count = self.instances.len();
        self.instances.clear();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "executor task failed during shutdown");
            }
        }
        info!(instances = count, "instance manager stopped");
    }
}
