//! Read-only JSON-RPC server over a Unix socket.
//!
//! One JSON object per line in, one per line out. Every method is a read:
//! the handlers only ever borrow from the chains' read-only pools.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use tally_state::query;
use tally_state::Registry;
use tally_types::{ChainId, RcdHash};

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Unknown chain (-32800).
    pub fn token_not_found() -> Self {
        Self {
            code: -32800,
            message: "TOKEN_NOT_FOUND".to_string(),
            data: None,
        }
    }

    /// Known chain, missing object (-32803).
    pub fn not_found() -> Self {
        Self {
            code: -32803,
            message: "NOT_FOUND".to_string(),
            data: None,
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    registry: Arc<Registry>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(registry: Arc<Registry>, socket_path: PathBuf) -> Self {
        Self {
            registry,
            socket_path,
        }
    }

    /// Run the server, accepting connections until the task is dropped.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove a stale socket file from an unclean shutdown.
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("RPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(registry, stream).await {
                            warn!("connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    registry: Arc<Registry>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => dispatch_request(&registry, request).await,
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

type HandlerResult = std::result::Result<serde_json::Value, RpcError>;

async fn dispatch_request(registry: &Registry, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();

    debug!("dispatching RPC method: {}", method);

    let result = match method {
        "get-balance" => get_balance(registry, &request.params).await,
        "get-transaction" => get_transaction(registry, &request.params).await,
        "get-transactions" => get_transactions(registry, &request.params).await,
        "get-nf-token" => get_nf_token(registry, &request.params).await,
        "get-issuance" => get_issuance(registry, &request.params).await,
        "get-stats" => get_stats(registry, &request.params).await,
        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

fn param_hash32(params: &serde_json::Value, key: &str) -> std::result::Result<[u8; 32], RpcError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(tally_types::parse_hash32)
        .ok_or_else(|| RpcError::invalid_params(&format!("{key}: 64 hex chars required")))
}

fn chain_handle(
    registry: &Registry,
    params: &serde_json::Value,
) -> std::result::Result<Arc<tally_state::ChainHandle>, RpcError> {
    let chain_id: ChainId = param_hash32(params, "chain_id")?;
    registry.get(&chain_id).ok_or_else(RpcError::token_not_found)
}

fn internal(e: tally_state::Error) -> RpcError {
    RpcError::internal_error(&e.to_string())
}

fn entry_json(row: &tally_db::entry::EntryRow) -> serde_json::Value {
    serde_json::json!({
        "entry_id": row.id,
        "hash": hex::encode(row.hash),
        "timestamp": row.timestamp,
        "data": hex::encode(&row.data),
    })
}

async fn get_balance(registry: &Registry, params: &serde_json::Value) -> HandlerResult {
    let handle = chain_handle(registry, params)?;
    let address: RcdHash = param_hash32(params, "address")?;
    let balance = query::get_balance(&handle, &address).await.map_err(internal)?;
    Ok(serde_json::json!({ "balance": balance }))
}

async fn get_transaction(registry: &Registry, params: &serde_json::Value) -> HandlerResult {
    let handle = chain_handle(registry, params)?;
    let hash = param_hash32(params, "entry_hash")?;
    match query::get_transaction(&handle, &hash).await.map_err(internal)? {
        None => Err(RpcError::not_found()),
        Some(row) => Ok(entry_json(&row)),
    }
}

async fn get_transactions(registry: &Registry, params: &serde_json::Value) -> HandlerResult {
    let handle = chain_handle(registry, params)?;
    let mut q = query::TxQuery::default();
    if params.get("address").is_some() {
        q.address = Some(param_hash32(params, "address")?);
    }
    if let Some(page) = params.get("page").and_then(|v| v.as_u64()) {
        q.page = page;
    }
    if let Some(limit) = params.get("limit").and_then(|v| v.as_u64()) {
        q.limit = limit.min(100);
    }
    if let Some(order) = params.get("order").and_then(|v| v.as_str()) {
        q.ascending = order != "desc";
    }
    let rows = query::get_transactions(&handle, &q).await.map_err(internal)?;
    Ok(serde_json::Value::Array(rows.iter().map(entry_json).collect()))
}

async fn get_nf_token(registry: &Registry, params: &serde_json::Value) -> HandlerResult {
    let handle = chain_handle(registry, params)?;
    let nf_id = params
        .get("nf_token_id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RpcError::invalid_params("nf_token_id required"))?;
    match query::get_nf_token(&handle, nf_id).await.map_err(internal)? {
        None => Err(RpcError::not_found()),
        Some(record) => {
            let metadata = record
                .metadata
                .as_deref()
                .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(bytes).ok());
            Ok(serde_json::json!({
                "nf_token_id": record.id,
                "owner": hex::encode(record.owner),
                "creation_entry_hash": hex::encode(record.creation_entry_hash),
                "metadata": metadata,
            }))
        }
    }
}

async fn get_issuance(registry: &Registry, params: &serde_json::Value) -> HandlerResult {
    let handle = chain_handle(registry, params)?;
    match query::get_issuance(&handle).await.map_err(internal)? {
        None => Err(RpcError::not_found()),
        Some(row) => {
            let entry = row.entry().map_err(|e| RpcError::internal_error(&e.to_string()))?;
            let issuance: serde_json::Value =
                serde_json::from_slice(&entry.content).unwrap_or(serde_json::Value::Null);
            Ok(serde_json::json!({
                "entry_hash": hex::encode(row.hash),
                "timestamp": row.timestamp,
                "issuance": issuance,
            }))
        }
    }
}

async fn get_stats(registry: &Registry, params: &serde_json::Value) -> HandlerResult {
    let handle = chain_handle(registry, params)?;
    let stats = query::get_stats(&handle).await.map_err(internal)?;
    Ok(serde_json::json!({
        "token_id": handle.token_id,
        "issuer_chain_id": hex::encode(handle.issuer_chain_id),
        "sync_height": stats.sync_height,
        "sync_db_key_mr": hex::encode(stats.sync_db_key_mr),
        "num_issued": stats.num_issued,
        "entries": stats.entries,
        "valid_entries": stats.valid_entries,
    }))
}
