//! run-runtime — WASI preview 1 sandboxes bound to deployments.
//!
//! # Architecture
//!
//! ```text
//! InstanceManager (actor: deployment id → ExecutorHandle)
//!   └── Executor task per deployment (bounded mailbox, serial)
//!         ├── Sandbox (compiled Module + fresh Store per request)
//!         └── ModuleCache (deployment id → CompilationCache)
//!               └── SandboxEngine (shared wasmtime::Engine + Linker)
//! ```
//!
//! Executors emit one [`run_core::Completion`] per request on a shared
//! completion channel; whoever owns the receiving end routes the response
//! back to the caller.

pub mod cache;
pub mod engine;
pub mod error;
pub mod executor;
pub mod manager;
pub mod sandbox;

#[cfg(test)]
mod testing;

pub use cache::{CompilationCache, ModuleCache};
pub use engine::{SandboxEngine, SandboxLimits};
pub use error::{RuntimeError, RuntimeResult};
pub use executor::{ExecutorDeps, ExecutorHandle, ExecutorState, ExecutorStats};
pub use manager::{InstanceManager, InstanceResolver, ManagerConfig, ResolveFuture};
pub use sandbox::Sandbox;
