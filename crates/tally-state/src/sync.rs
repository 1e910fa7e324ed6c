//! Chain registry and sync driving.
//!
//! At startup every store file in the data directory whose name parses as
//! `<64-hex chain id>.sqlite3` is opened; files with other names are
//! ignored. Each opened chain gets its own applier task owning the write
//! connection; the registry hands out read-side handles to the RPC
//! surface.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use tally_db::ReadPool;
use tally_types::{ChainId, EBlock, KeyMr, NetworkId};

use crate::chain::Chain;
use crate::client::BlockClient;
use crate::{Error, Result};

/// Cooperative cancellation for appliers and in-flight contract calls.
/// Checked between entries, before any external fetch, and by the VM's
/// metering hooks.
pub use tally_types::Cancel;

/// Read-side view of a tracked chain, shared with the RPC surface.
pub struct ChainHandle {
    pub id: ChainId,
    pub token_id: String,
    pub issuer_chain_id: ChainId,
    pub network_id: NetworkId,
    pub(crate) pool: Arc<ReadPool>,
}

/// The set of tracked chains, keyed by chain id.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<HashMap<ChainId, Arc<ChainHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<ChainHandle>) {
        self.inner
            .write()
            .expect("registry poisoned")
            .insert(handle.id, handle);
    }

    pub fn get(&self, id: &ChainId) -> Option<Arc<ChainHandle>> {
        self.inner.read().expect("registry poisoned").get(id).cloned()
    }

    pub fn ids(&self) -> Vec<ChainId> {
        self.inner.read().expect("registry poisoned").keys().copied().collect()
    }
}

/// Open every chain store in `dir`. File names that do not parse are
/// skipped; a store whose recorded chain id disagrees with its file name
/// is a fatal error.
pub fn open_all(
    dir: &Path,
    client: Arc<dyn BlockClient>,
    runtime: Arc<tally_runtime::Runtime>,
) -> Result<Vec<Chain>> {
    let mut chains = Vec::new();
    let mut names: Vec<String> = Vec::new();
    for dirent in std::fs::read_dir(dir)? {
        names.push(dirent?.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    for name in names {
        let file_chain_id = match tally_db::file_name_chain_id(&name) {
            None => {
                debug!(file = %name, "ignoring non-chain file");
                continue;
            }
            Some(id) => id,
        };
        let chain = Chain::open(dir, &name, Arc::clone(&client), Arc::clone(&runtime))?;
        if chain.state.id != file_chain_id {
            return Err(Error::Invariant(format!(
                "file {name} does not match store chain id {}",
                tally_types::hash32_hex(&chain.state.id)
            )));
        }
        chains.push(chain);
    }
    Ok(chains)
}

/// Drive one chain through a height-ordered stream of entry blocks.
/// Stops at the first infrastructure error, leaving the chain at its last
/// fully applied block; the caller decides whether to retry or halt.
pub fn sync_eblocks<I>(chain: &mut Chain, blocks: I, cancel: &Cancel) -> Result<()>
where
    I: IntoIterator<Item = (KeyMr, EBlock)>,
{
    for (db_key_mr, eb) in blocks {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Err(e) = chain.apply_eblock(&db_key_mr, &eb, cancel) {
            warn!(height = eb.height, error = %e, "halting chain sync");
            return Err(e);
        }
    }
    Ok(())
}
