//! Shared fixtures for the end-to-end scenario tests: a scripted block
//! client, signed entry builders for both token standards, and contract
//! chains assembled from WAT sources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tally_crypto::{ed25519::SigningKey, hash, rcd};
use tally_state::{Cancel, Chain};
use tally_state::{BlockClient, ClientError, ContractSource, DBlock};
use tally_types::{ChainId, EBlock, Entry, EntryHash, Identity, KeyMr, NetworkId, RcdHash};

pub const NETWORK: NetworkId = *b"loc1";

/// A scripted stand-in for the block-explorer node.
pub struct TestClient {
    identity: Mutex<Option<Identity>>,
    contracts: Mutex<HashMap<ChainId, ContractSource>>,
    /// How many contract-source fetches the core has issued.
    pub contract_fetches: AtomicU64,
}

impl TestClient {
    fn new(identity: Identity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
            contracts: Mutex::new(HashMap::new()),
            contract_fetches: AtomicU64::new(0),
        }
    }

    pub fn add_contract(&self, source: ContractSource) {
        self.contracts
            .lock()
            .expect("contracts poisoned")
            .insert(source.first_entry.chain_id, source);
    }

    pub fn fetch_count(&self) -> u64 {
        self.contract_fetches.load(Ordering::Relaxed)
    }
}

impl BlockClient for TestClient {
    fn dblock_by_height(&self, _height: u32) -> Result<DBlock, ClientError> {
        Err(ClientError::Transport("not wired".to_string()))
    }

    fn eblock(&self, _key_mr: &KeyMr) -> Result<EBlock, ClientError> {
        Err(ClientError::Transport("not wired".to_string()))
    }

    fn entry(&self, _hash: &EntryHash) -> Result<Entry, ClientError> {
        Err(ClientError::Transport("not wired".to_string()))
    }

    fn identity(&self, chain_id: &ChainId) -> Result<Identity, ClientError> {
        match &*self.identity.lock().expect("identity poisoned") {
            Some(identity) if identity.chain_id == *chain_id => Ok(identity.clone()),
            _ => Err(ClientError::NotFound),
        }
    }

    fn contract_source(&self, chain_id: &ChainId) -> Result<ContractSource, ClientError> {
        self.contract_fetches.fetch_add(1, Ordering::Relaxed);
        self.contracts
            .lock()
            .expect("contracts poisoned")
            .get(chain_id)
            .cloned()
            .ok_or(ClientError::NotFound)
    }
}

/// One token chain under test, with everything needed to feed it blocks.
pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub id1: SigningKey,
    pub issuer_chain: ChainId,
    pub chain_id: ChainId,
    pub first: Entry,
    pub client: Arc<TestClient>,
    pub runtime: Arc<tally_runtime::Runtime>,
    salt: AtomicU64,
}

impl TestEnv {
    pub fn new() -> Self {
        let id1 = SigningKey::generate();
        let issuer_chain: ChainId = [0x1d; 32];
        let ext_ids = tally_fat::token_name_ids("TST", &issuer_chain);
        let chain_id = hash::compute_chain_id(&ext_ids);
        let first = Entry::new(chain_id, ext_ids, Vec::new());
        let identity = Identity {
            chain_id: issuer_chain,
            id1_key: id1.verifying_key().to_bytes(),
            height: 1,
            timestamp: 1_000,
        };
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            id1,
            issuer_chain,
            chain_id,
            first,
            client: Arc::new(TestClient::new(identity)),
            runtime: Arc::new(tally_runtime::Runtime::new().expect("runtime")),
            salt: AtomicU64::new(1),
        }
    }

    fn next_salt(&self) -> String {
        format!("salt-{}", self.salt.fetch_add(1, Ordering::Relaxed))
    }

    pub fn key_mr(height: u32) -> KeyMr {
        hash::sha256(&height.to_be_bytes())
    }

    /// Sign `content` on the token chain with the given keys.
    pub fn signed(&self, content: serde_json::Value, keys: &[&SigningKey]) -> Entry {
        let mut e = Entry::new(
            self.chain_id,
            vec![],
            serde_json::to_vec(&content).expect("json"),
        );
        tally_fat::signing::sign_entry(&mut e, self.next_salt().as_bytes(), keys);
        e
    }

    pub fn issuance(&self, token_type: &str, supply: i64) -> Entry {
        self.signed(
            serde_json::json!({"type": token_type, "supply": supply, "symbol": "TST"}),
            &[&self.id1],
        )
    }

    pub fn fat0_coinbase(&self, outputs: &[(RcdHash, u64)]) -> Entry {
        let total: u64 = outputs.iter().map(|(_, n)| n).sum();
        let outs: serde_json::Map<String, serde_json::Value> = outputs
            .iter()
            .map(|(adr, n)| (hex::encode(adr), serde_json::json!(n)))
            .collect();
        self.signed(
            serde_json::json!({
                "inputs": { hex::encode([0u8; 32]): total },
                "outputs": outs,
            }),
            &[&self.id1],
        )
    }

    pub fn fat0_transfer(&self, from: &SigningKey, to: &RcdHash, amount: u64) -> Entry {
        let from_adr = rcd::hash_of_key(&from.verifying_key());
        self.signed(
            serde_json::json!({
                "inputs": { hex::encode(from_adr): amount },
                "outputs": { hex::encode(to): amount },
            }),
            &[from],
        )
    }

    /// A transfer whose output address is delegated to a contract chain.
    pub fn fat0_delegate(
        &self,
        from: &SigningKey,
        to: &RcdHash,
        amount: u64,
        contract: &ChainId,
    ) -> Entry {
        let from_adr = rcd::hash_of_key(&from.verifying_key());
        self.signed(
            serde_json::json!({
                "inputs": { hex::encode(from_adr): amount },
                "outputs": { hex::encode(to): amount },
                "contract": hex::encode(contract),
            }),
            &[from],
        )
    }

    /// A transfer that calls `func` on the contract bound to `to`.
    pub fn fat0_call(
        &self,
        from: &SigningKey,
        to: &RcdHash,
        amount: u64,
        func: &str,
        args: &[i64],
    ) -> Entry {
        let from_adr = rcd::hash_of_key(&from.verifying_key());
        self.signed(
            serde_json::json!({
                "inputs": { hex::encode(from_adr): amount },
                "outputs": { hex::encode(to): amount },
                "func": func,
                "args": args,
            }),
            &[from],
        )
    }

    pub fn fat1_coinbase(&self, to: &RcdHash, ids: &[u64]) -> Entry {
        self.signed(
            serde_json::json!({
                "inputs": { hex::encode([0u8; 32]): ids },
                "outputs": { hex::encode(to): ids },
            }),
            &[&self.id1],
        )
    }

    pub fn fat1_transfer(&self, from: &SigningKey, to: &RcdHash, ids: &[u64]) -> Entry {
        let from_adr = rcd::hash_of_key(&from.verifying_key());
        self.signed(
            serde_json::json!({
                "inputs": { hex::encode(from_adr): ids },
                "outputs": { hex::encode(to): ids },
            }),
            &[from],
        )
    }

    /// Create the chain from its first entry block: name IDs, issuance,
    /// then any extra entries, at height 10.
    pub fn create_chain(&self, token_type: &str, supply: i64, extra: Vec<Entry>) -> Chain {
        let mut entries = vec![self.first.clone(), self.issuance(token_type, supply)];
        entries.extend(extra);
        let eb = self.eblock(10, [0u8; 32], entries);
        Chain::create(
            self.dir.path(),
            Arc::clone(&self.client) as Arc<dyn BlockClient>,
            Arc::clone(&self.runtime),
            &[0xdb; 32],
            &eb,
            NETWORK,
        )
        .expect("create chain")
    }

    pub fn eblock(&self, height: u32, prev: KeyMr, entries: Vec<Entry>) -> EBlock {
        let mut eb = EBlock {
            chain_id: self.chain_id,
            key_mr: Self::key_mr(height),
            prev_key_mr: prev,
            height,
            timestamp: 0,
            entries,
        };
        eb.set_timestamp(2_000 + height as u64);
        eb
    }

    /// Apply `entries` as the chain's next entry block.
    pub fn apply(&self, chain: &mut Chain, entries: Vec<Entry>) -> tally_state::Result<()> {
        let head = chain.state.head.as_ref().expect("chain has a head");
        let eb = self.eblock(chain.state.sync_height + 1, head.key_mr, entries);
        chain.apply_eblock(&[0xdb; 32], &eb, &Cancel::new())
    }

    /// Register a contract data-store chain with the scripted client.
    /// Returns its chain id.
    pub fn publish_contract(&self, wat_source: &str, abi_json: &str) -> ChainId {
        let wasm = wat::parse_str(wat_source).expect("wat");
        let first_entry = tally_fat::fat107::build_entry(&wasm, abi_json);
        let chain_id = first_entry.chain_id;
        self.client.add_contract(ContractSource { first_entry, wasm });
        chain_id
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Address of a signing key.
pub fn address_of(key: &SigningKey) -> RcdHash {
    rcd::hash_of_key(&key.verifying_key())
}

/// A contract whose `burn` spins until the fuel budget runs out, and whose
/// `pay` forwards part of the received amount to a hard-coded recipient
/// slot written by the host test.
pub const SPIN_AND_PAY_WAT: &str = r#"
(module
  (import "env" "transfer" (func $transfer (param i32 i64)))
  (import "env" "kv_set" (func $kv_set (param i32 i32 i32 i32)))
  (import "env" "kv_get" (func $kv_get (param i32 i32 i32 i32) (result i64)))
  (memory (export "memory") 1)
  (data (i32.const 0) "recipient")
  (func (export "burn")
    (loop br 0))
  (func (export "remember") (param i64)
    ;; store the low byte of the argument under the key "recipient"
    (i32.store8 (i32.const 16) (i32.wrap_i64 (local.get 0)))
    (call $kv_set (i32.const 0) (i32.const 9) (i32.const 16) (i32.const 1)))
  (func (export "pay") (param i64)
    ;; read one byte back; fill a 32-byte address with it and transfer
    (local $i i32)
    (drop (call $kv_get (i32.const 0) (i32.const 9) (i32.const 32) (i32.const 1)))
    (local.set $i (i32.const 32))
    (block
      (loop
        (br_if 1 (i32.ge_u (local.get $i) (i32.const 64)))
        (i32.store8 (local.get $i) (i32.load8_u (i32.const 32)))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br 0)))
    (call $transfer (i32.const 32) (local.get 0))))
"#;

/// ABI for [`SPIN_AND_PAY_WAT`].
pub const SPIN_AND_PAY_ABI: &str =
    r#"{"burn":{"args":[]},"remember":{"args":["i64"]},"pay":{"args":["i64"]}}"#;
