use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod lcd;
pub mod rpc;
pub mod session;
pub mod signing;
pub mod wallet;

pub use lcd::LcdClient;
pub use rpc::RpcClient;
pub use session::{BroadcastSession, Connector, RpcConnector};
pub use signing::{FeeSetting, SigningClient};
pub use wallet::SigningIdentity;

/// Outcome of a broadcast transaction.
///
/// A non-zero `code` is an application-level failure reported as data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResult {
    pub transaction_hash: String,
    pub height: u64,
    pub gas_used: u64,
    pub gas_wanted: u64,
    pub code: u32,
    pub raw_log: String,
    pub events: Vec<TxEvent>,
}

impl TxResult {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Normalize a `tx` or `broadcast_tx_*` RPC result.
    ///
    /// Committed results nest their outcome under `tx_result`; check-tx
    /// results carry it at the top level.
    pub fn from_rpc(result: &Value) -> Self {
        let outcome = result.get("tx_result").unwrap_or(result);

        let events = outcome
            .get("events")
            .and_then(|v| v.as_array())
            .map(|events| events.iter().map(parse_abci_event).collect())
            .unwrap_or_default();

        Self {
            transaction_hash: result
                .get("hash")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_uppercase(),
            height: lenient_u64(result.get("height")),
            gas_used: lenient_u64(outcome.get("gas_used")),
            gas_wanted: lenient_u64(outcome.get("gas_wanted")),
            code: lenient_u64(outcome.get("code")) as u32,
            raw_log: outcome
                .get("log")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            events,
        }
    }
}

/// Transaction event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "type")]
    pub type_str: String,
    pub attributes: Vec<EventAttribute>,
}

/// Event attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: String, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Server message, with the detail from `data` appended when present.
    pub fn describe(&self) -> String {
        match self.data.as_ref().and_then(|d| d.as_str()) {
            Some(data) if !data.is_empty() => format!("{}: {}", self.message, data),
            _ => self.message.clone(),
        }
    }
}

/// Parse an ABCI event whose attributes may be plain text (CometBFT 0.37+)
/// or base64-encoded (0.34).
pub fn parse_abci_event(event: &Value) -> TxEvent {
    let type_str = event
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let plain: Vec<EventAttribute> = event
        .get("attributes")
        .and_then(|v| v.as_array())
        .map(|attrs| attrs.iter().filter_map(parse_attribute).collect())
        .unwrap_or_default();

    // 0.34 nodes encode every pair of an event, so one plain pair rules it out.
    let decoded: Option<Vec<EventAttribute>> = plain.iter().map(decode_base64_attribute).collect();
    let attributes = match decoded {
        Some(decoded) if !decoded.is_empty() => decoded,
        _ => plain,
    };

    TxEvent {
        type_str,
        attributes,
    }
}

fn parse_attribute(attr: &Value) -> Option<EventAttribute> {
    let key = attr.get("key").and_then(|v| v.as_str())?;
    let value = attr
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    Some(EventAttribute {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// Event keys are short identifiers: the key must decode to printable ASCII
// and the value to valid UTF-8.
fn decode_base64_attribute(attr: &EventAttribute) -> Option<EventAttribute> {
    use base64::Engine;
    let engine = base64::engine::general_purpose::STANDARD;

    let key = String::from_utf8(engine.decode(&attr.key).ok()?).ok()?;
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_graphic()) {
        return None;
    }

    let value = String::from_utf8(engine.decode(&attr.value).ok()?).ok()?;
    Some(EventAttribute { key, value })
}

fn lenient_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        net::SocketAddr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::{Router, Server};
    use tendermint::chain;

    use super::{
        session::{AccountInfo, BroadcastSession, Connector},
        TxResult,
    };
    use crate::Result;

    pub const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    pub const SENDER: &str = "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4";
    pub const RECIPIENT: &str = "cosmos1hsk6jryyqjfhp5dhc55tc9jtckygx0eph6dd02";
    pub const VALIDATOR: &str = "cosmosvaloper1hsk6jryyqjfhp5dhc55tc9jtckygx0epjwecre";

    #[derive(Default)]
    pub struct Recorder {
        pub connects: AtomicUsize,
        pub closes: AtomicUsize,
        pub broadcasts: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    /// Session that signs nothing itself: it records broadcast bytes and
    /// answers with a fixed result code.
    pub struct FakeSession {
        chain_id: chain::Id,
        code: u32,
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl BroadcastSession for FakeSession {
        fn chain_id(&self) -> &chain::Id {
            &self.chain_id
        }

        async fn account(&self, address: &str) -> Result<AccountInfo> {
            assert_eq!(address, SENDER);
            Ok(AccountInfo {
                account_number: 12,
                sequence: 4,
            })
        }

        async fn simulate(&self, _tx_bytes: &[u8]) -> Result<u64> {
            Ok(100_000)
        }

        async fn broadcast(&self, tx_bytes: &[u8]) -> Result<TxResult> {
            self.recorder.broadcasts.lock().unwrap().push(tx_bytes.to_vec());

            Ok(TxResult {
                transaction_hash: "A1B2".into(),
                height: if self.code == 0 { 77 } else { 0 },
                code: self.code,
                raw_log: if self.code == 0 {
                    String::new()
                } else {
                    "insufficient funds: 5uatom is smaller than 1000000uatom".into()
                },
                ..TxResult::default()
            })
        }

        async fn close(&self) {
            self.recorder.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub struct FakeConnector {
        pub code: u32,
        pub recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self) -> Result<Arc<dyn BroadcastSession>> {
            self.recorder.connects.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;

            Ok(Arc::new(FakeSession {
                chain_id: chain::Id::try_from("cosmoshub-4".to_string()).unwrap(),
                code: self.code,
                recorder: self.recorder.clone(),
            }))
        }
    }

    /// Serve `app` on an ephemeral local port and return its base URL.
    pub async fn serve(app: Router) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let server = Server::from_tcp(listener).unwrap().serve(app.into_make_service());
        tokio::spawn(server);

        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_plain_attributes() {
        let event = parse_abci_event(&json!({
            "type": "transfer",
            "attributes": [
                { "key": "recipient", "value": "cosmos1abc", "index": true },
                { "key": "amount", "value": "100uatom" }
            ]
        }));

        assert_eq!(event.type_str, "transfer");
        assert_eq!(
            event.attributes,
            vec![
                EventAttribute { key: "recipient".into(), value: "cosmos1abc".into() },
                EventAttribute { key: "amount".into(), value: "100uatom".into() },
            ]
        );
    }

    #[test]
    fn parses_base64_attributes() {
        // "c2VuZGVy" = "sender", "Y29zbW9zMWFiYw==" = "cosmos1abc"
        let event = parse_abci_event(&json!({
            "type": "message",
            "attributes": [
                { "key": "c2VuZGVy", "value": "Y29zbW9zMWFiYw==" },
                { "key": "bW9kdWxl", "value": null }
            ]
        }));

        assert_eq!(event.attributes[0].key, "sender");
        assert_eq!(event.attributes[0].value, "cosmos1abc");
        assert_eq!(event.attributes[1].key, "module");
        assert_eq!(event.attributes[1].value, "");
    }

    #[test]
    fn base64_lookalikes_stay_plain() {
        // "Y2F0" decodes to "cat", but "1000" does not decode to text.
        let event = parse_abci_event(&json!({
            "type": "wasm",
            "attributes": [{ "key": "Y2F0", "value": "1000" }]
        }));
        assert_eq!(
            event.attributes,
            vec![EventAttribute { key: "Y2F0".into(), value: "1000".into() }]
        );

        // Every pair decodes except one, so none are decoded.
        let event = parse_abci_event(&json!({
            "type": "wasm",
            "attributes": [
                { "key": "Y2F0", "value": "ZG9n" },
                { "key": "amount", "value": "5uatom" }
            ]
        }));
        assert_eq!(event.attributes[0].key, "Y2F0");
        assert_eq!(event.attributes[0].value, "ZG9n");
        assert_eq!(event.attributes[1].key, "amount");
    }

    #[test]
    fn normalizes_committed_tx() {
        let result = TxResult::from_rpc(&json!({
            "hash": "ab12",
            "height": "1234",
            "tx_result": {
                "code": 0,
                "log": "",
                "gas_wanted": "200000",
                "gas_used": "81234",
                "events": [{ "type": "tx", "attributes": [{ "key": "fee", "value": "5000uatom" }] }]
            }
        }));

        assert!(result.is_success());
        assert_eq!(result.transaction_hash, "AB12");
        assert_eq!(result.height, 1234);
        assert_eq!(result.gas_used, 81234);
        assert_eq!(result.gas_wanted, 200000);
        assert_eq!(result.events.len(), 1);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["transactionHash"], "AB12");
        assert_eq!(json["gasUsed"], 81234);
        assert_eq!(json["rawLog"], "");
        assert_eq!(json["events"][0]["type"], "tx");
    }

    #[test]
    fn normalizes_check_tx_failure() {
        let result = TxResult::from_rpc(&json!({
            "code": 5,
            "log": "insufficient funds",
            "hash": "CD34",
            "codespace": "sdk"
        }));

        assert!(!result.is_success());
        assert_eq!(result.code, 5);
        assert_eq!(result.raw_log, "insufficient funds");
        assert_eq!(result.height, 0);
    }

    #[test]
    fn describes_rpc_errors() {
        let error = JsonRpcError {
            code: -32603,
            message: "Internal error".into(),
            data: Some(json!("tx already exists in cache")),
        };
        assert_eq!(error.describe(), "Internal error: tx already exists in cache");
    }
}
