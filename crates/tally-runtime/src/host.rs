//! The host import surface exposed to contract guests.
//!
//! Guests see five imports under the `env` module: `chain_id`, `kv_get`,
//! `kv_set`, `transfer` and `sha256`. All state access goes through a
//! [`StateAccessor`] provided by the caller; a `String` error from the
//! accessor becomes a trap, aborting the call so the caller's savepoint
//! rolls everything back together.
//!
//! Every import runs the metering tick first: it bumps the advisory call
//! counter and observes the caller's cancellation flag, so a cancelled
//! applier aborts the guest at its next host call. Pure-compute stretches
//! are covered by the engine's epoch hook in the crate root.

use std::sync::atomic::{AtomicU64, Ordering};

use tally_types::Cancel;
use wasmtime::{Caller, Engine, Linker, Memory};

/// Process-global count of metered host calls. Advisory only.
pub static CALL_COUNT: AtomicU64 = AtomicU64::new(0);

/// The metering tick: count the call, then honor cancellation.
fn tick(ctx: &HostCtx) -> Result<(), wasmtime::Error> {
    CALL_COUNT.fetch_add(1, Ordering::Relaxed);
    if ctx.cancel.is_cancelled() {
        return Err(wasmtime::Error::msg("cancelled"));
    }
    Ok(())
}

/// Chain state as seen from inside a contract call.
pub trait StateAccessor {
    /// Id of the chain the contract runs on.
    fn chain_id(&self) -> [u8; 32];

    /// Read a slot of the contract's key-value storage.
    fn kv_get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, String>;

    /// Write a slot of the contract's key-value storage.
    fn kv_set(&mut self, key: &[u8], value: &[u8]) -> Result<(), String>;

    /// Move `amount` units from the calling address to `to`.
    fn transfer(&mut self, to: &[u8; 32], amount: u64) -> Result<(), String>;
}

/// Erased pointer to the caller's accessor.
///
/// The store, and with it this pointer, never outlives the `Runtime::call`
/// frame that borrowed the accessor.
struct StatePtr(*mut dyn StateAccessor);

unsafe impl Send for StatePtr {}
unsafe impl Sync for StatePtr {}

/// Per-call host context carried in the wasmtime store.
pub struct HostCtx {
    state: StatePtr,
    cancel: Cancel,
}

impl HostCtx {
    pub(crate) fn new(state: &mut dyn StateAccessor, cancel: Cancel) -> Self {
        let state: &'static mut dyn StateAccessor = unsafe { std::mem::transmute(state) };
        Self {
            state: StatePtr(state as *mut dyn StateAccessor),
            cancel,
        }
    }
}

fn state(caller: &Caller<'_, HostCtx>) -> &'static mut dyn StateAccessor {
    unsafe { &mut *caller.data().state.0 }
}

fn memory(caller: &mut Caller<'_, HostCtx>) -> Result<Memory, wasmtime::Error> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| wasmtime::Error::msg("guest exports no memory"))
}

fn read_bytes(
    caller: &mut Caller<'_, HostCtx>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, wasmtime::Error> {
    let mem = memory(caller)?;
    let mut buf = vec![0u8; len as u32 as usize];
    mem.read(&mut *caller, ptr as u32 as usize, &mut buf)
        .map_err(|e| wasmtime::Error::msg(format!("guest memory read: {e}")))?;
    Ok(buf)
}

fn write_bytes(
    caller: &mut Caller<'_, HostCtx>,
    ptr: i32,
    bytes: &[u8],
) -> Result<(), wasmtime::Error> {
    let mem = memory(caller)?;
    mem.write(&mut *caller, ptr as u32 as usize, bytes)
        .map_err(|e| wasmtime::Error::msg(format!("guest memory write: {e}")))
}

/// Build a linker with the full host import surface defined.
pub(crate) fn linker(engine: &Engine) -> Result<Linker<HostCtx>, wasmtime::Error> {
    let mut linker: Linker<HostCtx> = Linker::new(engine);

    linker.func_wrap(
        "env",
        "chain_id",
        |mut caller: Caller<'_, HostCtx>, out_ptr: i32| -> Result<(), wasmtime::Error> {
            tick(caller.data())?;
            let id = state(&caller).chain_id();
            write_bytes(&mut caller, out_ptr, &id)
        },
    )?;

    linker.func_wrap(
        "env",
        "kv_get",
        |mut caller: Caller<'_, HostCtx>,
         key_ptr: i32,
         key_len: i32,
         val_ptr: i32,
         val_cap: i32|
         -> Result<i64, wasmtime::Error> {
            tick(caller.data())?;
            let key = read_bytes(&mut caller, key_ptr, key_len)?;
            let value = state(&caller).kv_get(&key).map_err(wasmtime::Error::msg)?;
            match value {
                None => Ok(-1),
                Some(value) => {
                    let n = value.len().min(val_cap as u32 as usize);
                    write_bytes(&mut caller, val_ptr, &value[..n])?;
                    Ok(value.len() as i64)
                }
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "kv_set",
        |mut caller: Caller<'_, HostCtx>,
         key_ptr: i32,
         key_len: i32,
         val_ptr: i32,
         val_len: i32|
         -> Result<(), wasmtime::Error> {
            tick(caller.data())?;
            let key = read_bytes(&mut caller, key_ptr, key_len)?;
            let value = read_bytes(&mut caller, val_ptr, val_len)?;
            state(&caller)
                .kv_set(&key, &value)
                .map_err(wasmtime::Error::msg)
        },
    )?;

    linker.func_wrap(
        "env",
        "transfer",
        |mut caller: Caller<'_, HostCtx>, adr_ptr: i32, amount: i64| -> Result<(), wasmtime::Error> {
            tick(caller.data())?;
            let bytes = read_bytes(&mut caller, adr_ptr, 32)?;
            let mut to = [0u8; 32];
            to.copy_from_slice(&bytes);
            state(&caller)
                .transfer(&to, amount as u64)
                .map_err(wasmtime::Error::msg)
        },
    )?;

    linker.func_wrap(
        "env",
        "sha256",
        |mut caller: Caller<'_, HostCtx>,
         ptr: i32,
         len: i32,
         out_ptr: i32|
         -> Result<(), wasmtime::Error> {
            tick(caller.data())?;
            let data = read_bytes(&mut caller, ptr, len)?;
            let digest = tally_crypto::hash::sha256(&data);
            write_bytes(&mut caller, out_ptr, &digest)
        },
    )?;

    Ok(linker)
}
