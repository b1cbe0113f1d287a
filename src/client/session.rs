//! Connected broadcast sessions.
//!
//! [`BroadcastSession`] is everything the signing client needs from a node:
//! chain identity, account state, simulation and broadcast. [`Connector`]
//! opens one. The production pair talks JSON-RPC to the consensus node.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::Engine;
use cosmrs::proto::cosmos::{
    auth::v1beta1::{BaseAccount, QueryAccountRequest, QueryAccountResponse},
    tx::v1beta1::{SimulateRequest, SimulateResponse},
};
use prost::Message;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tendermint::chain;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::{RpcClient, TxResult};
use crate::{Error, Result};

const ACCOUNT_QUERY: &str = "/cosmos.auth.v1beta1.Query/Account";
const SIMULATE_QUERY: &str = "/cosmos.tx.v1beta1.Service/Simulate";
const BASE_ACCOUNT: &str = "/cosmos.auth.v1beta1.BaseAccount";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

#[async_trait]
pub trait BroadcastSession: Send + Sync {
    /// Chain id as reported by the node.
    fn chain_id(&self) -> &chain::Id;

    async fn account(&self, address: &str) -> Result<AccountInfo>;

    /// Gas consumed by a simulated execution of `tx_bytes`.
    async fn simulate(&self, tx_bytes: &[u8]) -> Result<u64>;

    /// Submit `tx_bytes` and wait for the outcome. A non-zero code is data.
    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<TxResult>;

    async fn close(&self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BroadcastSession>>;
}

/// Opens [`RpcSession`]s against a consensus node.
#[derive(Clone, Debug)]
pub struct RpcConnector {
    rpc: RpcClient,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl RpcConnector {
    pub fn new(rpc: RpcClient) -> Self {
        Self {
            rpc,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for RpcConnector {
    async fn connect(&self) -> Result<Arc<dyn BroadcastSession>> {
        let status = self.rpc.status().await?;

        let network = status
            .pointer("/node_info/network")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Protocol("status response has no node_info.network".into()))?;

        let chain_id = chain::Id::try_from(network.to_string())
            .map_err(|e| Error::Protocol(format!("invalid chain id {network:?}: {e}")))?;

        info!(chain_id = %chain_id, rpc = %self.rpc.url(), "Broadcast session opened");

        Ok(Arc::new(RpcSession {
            rpc: self.rpc.clone(),
            chain_id,
            poll_interval: self.poll_interval,
            poll_timeout: self.poll_timeout,
        }))
    }
}

pub struct RpcSession {
    rpc: RpcClient,
    chain_id: chain::Id,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl RpcSession {
    async fn query(&self, path: &str, data: Vec<u8>) -> Result<Vec<u8>> {
        let data = String::from_utf8(subtle_encoding::hex::encode(data))
            .map_err(|e| Error::Protocol(e.to_string()))?;

        let result = self.rpc.abci_query(path, Some(&data), None, false).await?;
        let response = result
            .get("response")
            .ok_or_else(|| Error::Protocol(format!("{path}: missing response")))?;

        let code = lenient_code(response.get("code"));
        if code != 0 {
            let log = response
                .get("log")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            return Err(Error::RemoteRpc {
                code,
                message: log.to_string(),
            });
        }

        let value = response
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        base64::engine::general_purpose::STANDARD
            .decode(value)
            .map_err(|e| Error::Protocol(format!("{path}: {e}")))
    }

    async fn wait_for_commit(&self, hash: &str, hash_bytes: &[u8]) -> Result<TxResult> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(hash_bytes);
        let deadline = Instant::now() + self.poll_timeout;

        loop {
            match self.rpc.tx(&encoded, false).await {
                Ok(result) => return Ok(TxResult::from_rpc(&result)),
                Err(Error::RemoteRpc { message, .. }) if message.contains("not found") => {
                    debug!(%hash, "Transaction not yet committed");
                }
                Err(e) => return Err(e),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(Error::BroadcastTimeout {
                    hash: hash.to_string(),
                    timeout: self.poll_timeout,
                });
            }

            sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl BroadcastSession for RpcSession {
    fn chain_id(&self) -> &chain::Id {
        &self.chain_id
    }

    async fn account(&self, address: &str) -> Result<AccountInfo> {
        let request = QueryAccountRequest {
            address: address.to_string(),
        };

        let bytes = self.query(ACCOUNT_QUERY, request.encode_to_vec()).await?;
        let response = QueryAccountResponse::decode(bytes.as_slice())
            .map_err(|e| Error::Protocol(format!("account response: {e}")))?;

        let account = response
            .account
            .ok_or_else(|| Error::Protocol(format!("no account returned for {address}")))?;

        if account.type_url != BASE_ACCOUNT {
            return Err(Error::Signing(format!(
                "unsupported account type {}",
                account.type_url
            )));
        }

        let account = BaseAccount::decode(account.value.as_slice())
            .map_err(|e| Error::Protocol(format!("base account: {e}")))?;

        Ok(AccountInfo {
            account_number: account.account_number,
            sequence: account.sequence,
        })
    }

    async fn simulate(&self, tx_bytes: &[u8]) -> Result<u64> {
        let request = SimulateRequest {
            tx_bytes: tx_bytes.to_vec(),
            ..Default::default()
        };

        let bytes = self.query(SIMULATE_QUERY, request.encode_to_vec()).await?;
        let response = SimulateResponse::decode(bytes.as_slice())
            .map_err(|e| Error::Protocol(format!("simulate response: {e}")))?;

        response
            .gas_info
            .map(|info| info.gas_used)
            .ok_or_else(|| Error::Protocol("simulate response has no gas info".into()))
    }

    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<TxResult> {
        let hash_bytes = Sha256::digest(tx_bytes);
        let hash = String::from_utf8(subtle_encoding::hex::encode_upper(&hash_bytes))
            .map_err(|e| Error::Protocol(e.to_string()))?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(tx_bytes);
        let checked = self.rpc.broadcast_tx_sync(&encoded).await?;

        let mut check = TxResult::from_rpc(&checked);
        if !check.is_success() {
            if check.transaction_hash.is_empty() {
                check.transaction_hash = hash;
            }
            return Ok(check);
        }

        debug!(%hash, "Transaction accepted into mempool");
        self.wait_for_commit(&hash, &hash_bytes).await
    }

    async fn close(&self) {
        debug!(chain_id = %self.chain_id, "Broadcast session closed");
    }
}

fn lenient_code(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{extract::State, routing::post, Json, Router};
    use cosmrs::proto::cosmos::base::abci::v1beta1::GasInfo;
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::client::testing::serve;

    const ADDRESS: &str = "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4";

    #[derive(Clone, Default)]
    struct Node {
        tx_polls: Arc<AtomicUsize>,
        check_code: u32,
        commit_after: usize,
    }

    fn b64(bytes: Vec<u8>) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    async fn handle(State(node): State<Node>, Json(request): Json<Value>) -> Json<Value> {
        let id = request["id"].clone();
        let params = &request["params"];

        let reply = |result: Value| Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }));

        match request["method"].as_str().unwrap() {
            "status" => reply(json!({ "node_info": { "network": "theta-testnet-001" } })),
            "abci_query" if params["path"] == ACCOUNT_QUERY => {
                let data = subtle_encoding::hex::decode(params["data"].as_str().unwrap()).unwrap();
                let query = QueryAccountRequest::decode(data.as_slice()).unwrap();
                assert_eq!(query.address, ADDRESS);

                let account = BaseAccount {
                    address: ADDRESS.to_string(),
                    pub_key: None,
                    account_number: 7,
                    sequence: 3,
                };
                let response = QueryAccountResponse {
                    account: Some(cosmrs::Any {
                        type_url: BASE_ACCOUNT.to_string(),
                        value: account.encode_to_vec(),
                    }),
                };

                reply(json!({ "response": { "code": 0, "value": b64(response.encode_to_vec()) } }))
            }
            "abci_query" if params["path"] == SIMULATE_QUERY => {
                let response = SimulateResponse {
                    gas_info: Some(GasInfo {
                        gas_wanted: 0,
                        gas_used: 81_234,
                    }),
                    result: None,
                };
                reply(json!({ "response": { "code": 0, "value": b64(response.encode_to_vec()) } }))
            }
            "broadcast_tx_sync" => {
                let log = if node.check_code == 0 { "[]" } else { "insufficient fees" };
                reply(json!({ "code": node.check_code, "log": log, "hash": "" }))
            }
            "tx" => {
                let polls = node.tx_polls.fetch_add(1, Ordering::SeqCst);
                if polls < node.commit_after {
                    return Json(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32603, "message": "Internal error", "data": "tx (AB) not found" }
                    }));
                }

                reply(json!({
                    "hash": "ab",
                    "height": "42",
                    "tx_result": { "code": 0, "log": "", "gas_used": "81234", "gas_wanted": "105604", "events": [] }
                }))
            }
            other => panic!("unexpected method {other}"),
        }
    }

    async fn connect(node: Node) -> Arc<dyn BroadcastSession> {
        let app = Router::new().route("/", post(handle)).with_state(node);
        let rpc = RpcClient::new(&Url::parse(&serve(app).await).unwrap()).unwrap();

        RpcConnector::new(rpc)
            .with_polling(Duration::from_millis(10), Duration::from_millis(200))
            .connect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reads_chain_id_and_account() {
        let session = connect(Node::default()).await;

        assert_eq!(session.chain_id().as_str(), "theta-testnet-001");
        assert_eq!(
            session.account(ADDRESS).await.unwrap(),
            AccountInfo {
                account_number: 7,
                sequence: 3
            }
        );
        assert_eq!(session.simulate(b"tx").await.unwrap(), 81_234);
    }

    #[tokio::test]
    async fn polls_until_committed() {
        let node = Node {
            commit_after: 2,
            ..Node::default()
        };
        let polls = node.tx_polls.clone();
        let session = connect(node).await;

        let result = session.broadcast(b"signed").await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.height, 42);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn check_tx_failure_is_returned_as_data() {
        let session = connect(Node {
            check_code: 13,
            ..Node::default()
        })
        .await;

        let result = session.broadcast(b"signed").await.unwrap();
        assert_eq!(result.code, 13);
        assert_eq!(result.raw_log, "insufficient fees");

        let expected = String::from_utf8(subtle_encoding::hex::encode_upper(Sha256::digest(b"signed"))).unwrap();
        assert_eq!(result.transaction_hash, expected);
    }

    #[tokio::test]
    async fn never_committed_times_out() {
        let session = connect(Node {
            commit_after: usize::MAX,
            ..Node::default()
        })
        .await;

        assert!(matches!(
            session.broadcast(b"signed").await,
            Err(Error::BroadcastTimeout { .. })
        ));
    }
}
