//! SandboxEngine — shared wasmtime configuration.
//!
//! One `wasmtime::Engine` and one `Linker` with WASI preview 1 registered
//! are shared by every sandbox in the process. Each invocation gets its own
//! `Store<SandboxState>`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use run_core::config::RuntimeConfig;
use wasmtime::{
    Config, Engine, EngineWeak, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap,
    UpdateDeadline,
};
use wasmtime_wasi::p1::WasiP1Ctx;

use crate::error::{RuntimeError, RuntimeResult};

/// Fuel consumed between cooperative yields back to the tokio scheduler.
const FUEL_YIELD_INTERVAL: u64 = 10_000;

/// Period of the engine's epoch counter. Guests yield once per tick.
const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Per-store state: the guest's WASI context plus its resource limits.
pub struct SandboxState {
    pub wasi: WasiP1Ctx,
    pub limits: StoreLimits,
}

/// Resource caps applied to every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub memory_bytes: usize,
    pub stdout_bytes: usize,
    pub fuel: Option<u64>,
    /// Wall-clock budget for one invocation, enforced through epochs.
    pub invoke_timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for SandboxLimits {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            memory_bytes: config.memory_limit_bytes,
            stdout_bytes: config.stdout_capacity_bytes,
            fuel: config.fuel,
            invoke_timeout: config.invoke_timeout(),
        }
    }
}

/// `SandboxEngine` is cheap to clone (holds `Arc` references internally).
#[derive(Clone)]
pub struct SandboxEngine {
    engine: Engine,
    linker: Arc<Linker<SandboxState>>,
    limits: SandboxLimits,
}

impl SandboxEngine {
    pub fn new(limits: SandboxLimits) -> RuntimeResult<Self> {
        let mut config = Config::new();
        config.async_support(true);
        config.epoch_interruption(true);
        if limits.fuel.is_some() {
            config.consume_fuel(true);
        }

        let engine = Engine::new(&config).map_err(|e| RuntimeError::Engine(e.to_string()))?;
        let mut linker = Linker::new(&engine);
        wasmtime_wasi::p1::add_to_linker_async(&mut linker, |state: &mut SandboxState| {
            &mut state.wasi
        })
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;

        spawn_epoch_ticker(engine.weak())?;

        tracing::info!(
            memory_bytes = limits.memory_bytes,
            fuel = ?limits.fuel,
            invoke_timeout = ?limits.invoke_timeout,
            "sandbox engine initialized"
        );

        Ok(Self {
            engine,
            linker: Arc::new(linker),
            limits,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn linker(&self) -> &Linker<SandboxState> {
        &self.linker
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Compile `bytes` on the blocking pool.
    pub async fn compile(&self, bytes: Vec<u8>) -> RuntimeResult<Module> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || Module::new(&engine, &bytes))
            .await
            .map_err(|e| RuntimeError::Join(e.to_string()))?
            .map_err(|e| RuntimeError::Compile(e.to_string()))
    }

    /// A fresh store for one invocation, with memory, fuel, and wall-clock
    /// caps applied.
    ///
    /// The guest yields to the scheduler on every epoch tick and traps with
    /// [`Trap::Interrupt`] once `invoke_timeout` has passed.
    pub fn new_store(&self, wasi: WasiP1Ctx) -> RuntimeResult<Store<SandboxState>> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.limits.memory_bytes)
            .table_elements(10_000)
            .instances(1)
            .build();

        let mut store = Store::new(&self.engine, SandboxState { wasi, limits });
        store.limiter(|state| &mut state.limits);

        if let Some(fuel) = self.limits.fuel {
            store
                .set_fuel(fuel)
                .map_err(|e| RuntimeError::Engine(e.to_string()))?;
            store
                .fuel_async_yield_interval(Some(FUEL_YIELD_INTERVAL))
                .map_err(|e| RuntimeError::Engine(e.to_string()))?;
        }

        let deadline = Instant::now() + self.limits.invoke_timeout;
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(move |_| {
            if Instant::now() >= deadline {
                return Err(Trap::Interrupt.into());
            }
            Ok(UpdateDeadline::Yield(1))
        });
        Ok(store)
    }
}

/// Advance the engine's epoch every [`EPOCH_TICK`] until the engine is dropped.
fn spawn_epoch_ticker(engine: EngineWeak) -> RuntimeResult<()> {
    std::thread::Builder::new()
        .name("run-epoch-ticker".into())
        .spawn(move || {
            while let Some(engine) = engine.upgrade() {
                engine.increment_epoch();
                drop(engine);
                std::thread::sleep(EPOCH_TICK);
            }
        })
        .map(drop)
        .map_err(|e| RuntimeError::Engine(e.to_string()))
}
