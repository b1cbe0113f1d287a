use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use super::{JsonRpcRequest, JsonRpcResponse};
use crate::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PER_PAGE: u32 = 100;
pub const DEFAULT_UNCONFIRMED_LIMIT: u32 = 30;

/// JSON-RPC 2.0 client for the consensus node, over HTTP POST.
///
/// Numeric parameters are sent as strings, which every CometBFT release accepts.
#[derive(Clone, Debug)]
pub struct RpcClient {
    url: Url,
    http: reqwest::Client,
    timeout: Duration,
    request_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(url: &Url) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: &Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            url: url.clone(),
            http,
            timeout,
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn next_request_id(&self) -> String {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        format!("hubflow-{id}")
    }

    /// Issue one call and return its `result` member.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        debug!(method, id = %request.id, "RPC call");

        let response = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::from_http(e, self.timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::from_http(e, self.timeout))?;

        // Nodes answer some failures with a 500 and a JSON-RPC error body.
        let parsed = serde_json::from_str::<JsonRpcResponse>(&text);

        match parsed {
            Ok(JsonRpcResponse {
                error: Some(error), ..
            }) => Err(Error::RemoteRpc {
                code: error.code,
                message: error.describe(),
            }),
            Ok(JsonRpcResponse {
                result: Some(result),
                ..
            }) if status.is_success() => Ok(result),
            _ if !status.is_success() => Err(Error::RemoteRpc {
                code: i64::from(status.as_u16()),
                message: text,
            }),
            Ok(_) => Err(Error::Protocol(format!(
                "{method}: response carried neither result nor error"
            ))),
            Err(e) => Err(Error::Protocol(format!("{method}: invalid JSON-RPC response: {e}"))),
        }
    }

    pub async fn status(&self) -> Result<Value> {
        self.call("status", json!({})).await
    }

    pub async fn net_info(&self) -> Result<Value> {
        self.call("net_info", json!({})).await
    }

    pub async fn health(&self) -> Result<Value> {
        self.call("health", json!({})).await
    }

    pub async fn genesis(&self) -> Result<Value> {
        self.call("genesis", json!({})).await
    }

    pub async fn genesis_chunked(&self, chunk: u32) -> Result<Value> {
        self.call("genesis_chunked", json!({ "chunk": chunk.to_string() }))
            .await
    }

    pub async fn block(&self, height: Option<u64>) -> Result<Value> {
        self.call("block", height_params(height)).await
    }

    pub async fn block_results(&self, height: Option<u64>) -> Result<Value> {
        self.call("block_results", height_params(height)).await
    }

    pub async fn block_by_hash(&self, hash: &str) -> Result<Value> {
        self.call("block_by_hash", json!({ "hash": hash })).await
    }

    pub async fn blockchain(&self, min_height: u64, max_height: u64) -> Result<Value> {
        self.call(
            "blockchain",
            json!({
                "minHeight": min_height.to_string(),
                "maxHeight": max_height.to_string(),
            }),
        )
        .await
    }

    pub async fn commit(&self, height: Option<u64>) -> Result<Value> {
        self.call("commit", height_params(height)).await
    }

    pub async fn validators(&self, height: Option<u64>, page: u32, per_page: u32) -> Result<Value> {
        let mut params = height_params(height);
        if let Some(map) = params.as_object_mut() {
            map.insert("page".into(), json!(page.to_string()));
            map.insert("per_page".into(), json!(per_page.to_string()));
        }

        self.call("validators", params).await
    }

    pub async fn tx(&self, hash: &str, prove: bool) -> Result<Value> {
        self.call("tx", json!({ "hash": hash, "prove": prove })).await
    }

    pub async fn tx_search(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
        order_by: &str,
    ) -> Result<Value> {
        self.call(
            "tx_search",
            json!({
                "query": query,
                "page": page.to_string(),
                "per_page": per_page.to_string(),
                "order_by": order_by,
            }),
        )
        .await
    }

    pub async fn consensus_state(&self) -> Result<Value> {
        self.call("consensus_state", json!({})).await
    }

    pub async fn consensus_params(&self, height: Option<u64>) -> Result<Value> {
        self.call("consensus_params", height_params(height)).await
    }

    pub async fn unconfirmed_txs(&self, limit: u32) -> Result<Value> {
        self.call("unconfirmed_txs", json!({ "limit": limit.to_string() }))
            .await
    }

    pub async fn num_unconfirmed_txs(&self) -> Result<Value> {
        self.call("num_unconfirmed_txs", json!({})).await
    }

    /// `tx` is the base64 encoded signed transaction.
    pub async fn broadcast_tx_sync(&self, tx: &str) -> Result<Value> {
        self.call("broadcast_tx_sync", json!({ "tx": tx })).await
    }

    pub async fn broadcast_tx_async(&self, tx: &str) -> Result<Value> {
        self.call("broadcast_tx_async", json!({ "tx": tx })).await
    }

    pub async fn broadcast_tx_commit(&self, tx: &str) -> Result<Value> {
        self.call("broadcast_tx_commit", json!({ "tx": tx })).await
    }

    pub async fn check_tx(&self, tx: &str) -> Result<Value> {
        self.call("check_tx", json!({ "tx": tx })).await
    }

    /// `data` is hex encoded, as the node expects for `abci_query`.
    pub async fn abci_query(
        &self,
        path: &str,
        data: Option<&str>,
        height: Option<u64>,
        prove: bool,
    ) -> Result<Value> {
        let mut params = height_params(height);
        if let Some(map) = params.as_object_mut() {
            map.insert("path".into(), json!(path));
            map.insert("prove".into(), json!(prove));
            if let Some(data) = data {
                map.insert("data".into(), json!(data));
            }
        }

        self.call("abci_query", params).await
    }

    pub async fn abci_info(&self) -> Result<Value> {
        self.call("abci_info", json!({})).await
    }
}

fn height_params(height: Option<u64>) -> Value {
    let mut params = Map::new();
    if let Some(height) = height {
        params.insert("height".into(), json!(height.to_string()));
    }
    Value::Object(params)
}
