//! # tally-runtime
//!
//! Wasm VM adapter for contract execution. Wraps `wasmtime` with fuel
//! metering enabled: every call carries an explicit fuel budget, and a
//! module that exhausts it traps with the "execution limit exceeded"
//! rejection rather than halting the chain.
//!
//! Compiled modules can be serialized for the store's cache column and
//! deserialized on later loads; a corrupt or missing cache falls back to
//! recompiling the raw Wasm.
//!
//! Chain state is reached through the [`StateAccessor`] trait. Host imports
//! exposed to the guest: the current chain id, a per-contract key-value
//! store, transfers against the calling address, and SHA-256.
//!
//! Calls honor the caller's [`Cancel`] signal through the metering hooks:
//! every host call checks the flag, and epoch interruption (driven by a
//! ticker thread on the engine) checks it from inside pure-compute loops,
//! so a cancelled applier aborts an in-flight call within one epoch tick.

pub mod host;

pub use host::{StateAccessor, CALL_COUNT};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tally_fat::fat104::{Abi, AbiType, Func};
use tally_types::{Cancel, TxError, TxResult};
use wasmtime::{Config, Engine, ExternType, Module, Store, Trap, UpdateDeadline, Val};

/// How often the engine epoch advances; the worst-case latency for a
/// cancellation to reach a guest that makes no host calls.
const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Infrastructure failures of the VM layer. Guest misbehavior is never an
/// infrastructure failure; it travels on [`TxError`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("engine init: {0}")]
    Init(String),

    #[error("module serialization: {0}")]
    Serialize(String),

    #[error("stored module unusable: {0}")]
    Load(String),

    /// The caller's cancellation signal fired before or during a call.
    #[error("cancelled")]
    Cancelled,
}

/// The shared Wasm engine for one process. Cheap to clone handles are not
/// needed; chains borrow it for the duration of a call.
pub struct Runtime {
    engine: Engine,
    ticker_stop: Arc<AtomicBool>,
}

/// Result of a completed contract call.
#[derive(Debug)]
pub struct CallOutput {
    /// The function's return value, if its ABI declares one.
    pub ret: Option<i64>,
    /// Fuel consumed by the call.
    pub fuel_used: u64,
}

impl Runtime {
    /// Build an engine with fuel metering and epoch interruption enabled.
    /// A background ticker advances the epoch so running guests reach
    /// their deadline callback even without making host calls.
    pub fn new() -> Result<Self, RuntimeError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(|e| RuntimeError::Init(e.to_string()))?;

        let ticker_stop = Arc::new(AtomicBool::new(false));
        {
            let engine = engine.clone();
            let stop = Arc::clone(&ticker_stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    engine.increment_epoch();
                }
            });
        }
        Ok(Self {
            engine,
            ticker_stop,
        })
    }

    /// Compile raw Wasm seen for the first time. Failure rejects the
    /// contract on the transaction channel.
    pub fn compile(&self, wasm: &[u8]) -> TxResult<Module> {
        Module::new(&self.engine, wasm)
            .map_err(|e| TxError::ContractSetup(format!("compile: {e}")))
    }

    /// Serialize a compiled module for the store's cache column.
    pub fn serialize(&self, module: &Module) -> Result<Vec<u8>, RuntimeError> {
        module
            .serialize()
            .map_err(|e| RuntimeError::Serialize(e.to_string()))
    }

    /// Load a module from its cached serialization, recompiling the stored
    /// Wasm when the cache is missing or corrupted. The Wasm compiled once
    /// before, so failure here is an infrastructure error.
    pub fn load(&self, compiled: Option<&[u8]>, wasm: &[u8]) -> Result<Module, RuntimeError> {
        if let Some(bytes) = compiled {
            // Serialized modules are only ever produced by this process's
            // own engine; deserialization failure means a stale cache.
            if let Ok(module) = unsafe { Module::deserialize(&self.engine, bytes) } {
                return Ok(module);
            }
        }
        Module::new(&self.engine, wasm).map_err(|e| RuntimeError::Load(e.to_string()))
    }

    /// Check that the module exports every function the ABI declares, with
    /// matching arity.
    pub fn validate_abi(&self, module: &Module, abi: &Abi) -> TxResult<()> {
        for (name, func) in abi {
            let export = module
                .get_export(name)
                .ok_or_else(|| TxError::ContractSetup(format!("abi export {name:?} missing")))?;
            let ty = match export {
                ExternType::Func(ty) => ty,
                _ => {
                    return Err(TxError::ContractSetup(format!(
                        "abi export {name:?} is not a function"
                    )))
                }
            };
            let want_results = usize::from(func.ret.is_some());
            if ty.params().len() != func.args.len() || ty.results().len() != want_results {
                return Err(TxError::ContractSetup(format!(
                    "abi export {name:?} arity mismatch"
                )));
            }
        }
        Ok(())
    }

    /// Invoke `name` with `args` under a fuel budget of `limit`.
    ///
    /// Any mutation the guest performs through `state` happens on the
    /// caller's connection and savepoint; a trap or exhausted budget leaves
    /// the rollback to the caller. `cancel` is observed by the metering
    /// hooks and aborts the call on the infrastructure channel.
    pub fn call(
        &self,
        module: &Module,
        name: &str,
        func: &Func,
        args: &[i64],
        state: &mut dyn StateAccessor,
        cancel: &Cancel,
        limit: u64,
    ) -> Result<TxResult<CallOutput>, RuntimeError> {
        if cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        if args.len() != func.args.len() {
            return Ok(Err(TxError::Invalid(format!(
                "{name:?} takes {} args, got {}",
                func.args.len(),
                args.len()
            ))));
        }

        let linker = host::linker(&self.engine).map_err(|e| RuntimeError::Init(e.to_string()))?;
        let ctx = host::HostCtx::new(state, cancel.clone());
        let mut store = Store::new(&self.engine, ctx);
        store
            .set_fuel(limit)
            .map_err(|e| RuntimeError::Init(e.to_string()))?;

        // The epoch hook is the per-instruction metering tick: each engine
        // epoch it either extends the deadline or aborts a cancelled call.
        store.set_epoch_deadline(1);
        let epoch_cancel = cancel.clone();
        store.epoch_deadline_callback(move |_| {
            if epoch_cancel.is_cancelled() {
                Err(wasmtime::Error::msg("cancelled"))
            } else {
                Ok(UpdateDeadline::Continue(1))
            }
        });

        let instance = match linker.instantiate(&mut store, module) {
            Ok(instance) => instance,
            Err(_) if cancel.is_cancelled() => return Err(RuntimeError::Cancelled),
            // Unsatisfiable imports are the contract's fault.
            Err(e) => return Ok(Err(TxError::ContractSetup(format!("instantiate: {e}")))),
        };
        let wasm_func = match instance.get_func(&mut store, name) {
            Some(f) => f,
            None => return Ok(Err(TxError::UndefinedFunc(name.to_string()))),
        };

        let params: Vec<Val> = func
            .args
            .iter()
            .zip(args)
            .map(|(ty, &v)| match ty {
                AbiType::I32 => Val::I32(v as i32),
                AbiType::I64 => Val::I64(v),
            })
            .collect();
        let mut results = vec![Val::I64(0); usize::from(func.ret.is_some())];

        if let Err(e) = wasm_func.call(&mut store, &params, &mut results) {
            // Cancellation surfaces as a trap from the metering hooks; it
            // outranks whatever else the abort looked like.
            if cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            let tx_err = match e.downcast_ref::<Trap>() {
                Some(Trap::OutOfFuel) => TxError::ExecLimitExceeded,
                _ => TxError::Trap(e.to_string()),
            };
            return Ok(Err(tx_err));
        }

        let ret = match func.ret {
            Some(AbiType::I32) => match results[0] {
                Val::I32(v) => Some(v as i64),
                _ => None,
            },
            Some(AbiType::I64) => match results[0] {
                Val::I64(v) => Some(v),
                _ => None,
            },
            None => None,
        };
        let fuel_used = limit.saturating_sub(store.get_fuel().unwrap_or(0));
        Ok(Ok(CallOutput { ret, fuel_used }))
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.ticker_stop.store(true, Ordering::Relaxed);
    }
}
