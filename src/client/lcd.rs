//! REST query gateway (the chain's LCD / gRPC-gateway interface).

use std::{collections::HashSet, time::Duration};

use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const PAGE_LIMIT: u32 = 100;

type Params<'a> = &'a [(&'a str, String)];

/// Stateless client bound to one query endpoint.
#[derive(Clone, Debug)]
pub struct LcdClient {
    base: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl LcdClient {
    pub fn new(base: &Url) -> Result<Self> {
        Self::with_timeout(base, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base: &Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            base: base.as_str().trim_end_matches('/').to_string(),
            http,
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub async fn get(&self, path: &str, params: Params<'_>) -> Result<Value> {
        debug!(path, "LCD GET");

        let response = self
            .http
            .get(self.url(path))
            .query(params)
            .send()
            .await
            .map_err(|e| Error::from_http(e, self.timeout))?;

        self.read(response).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        debug!(path, "LCD POST");

        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::from_http(e, self.timeout))?;

        self.read(response).await
    }

    async fn read(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::from_http(e, self.timeout))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or(text);

            return Err(Error::RemoteQuery {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Protocol(format!("invalid JSON from query endpoint: {e}")))
    }

    /// Follow `pagination.next_key` until it is empty, concatenating the
    /// `result_key` arrays of every page. A cursor seen twice is fatal.
    pub async fn get_all_pages(
        &self,
        path: &str,
        result_key: &str,
        params: Params<'_>,
    ) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        let mut seen = HashSet::new();
        let mut next_key: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = params.to_vec();
            query.push(("pagination.limit", PAGE_LIMIT.to_string()));
            if let Some(key) = &next_key {
                query.push(("pagination.key", key.clone()));
            }

            let mut page = self.get(path, &query).await?;

            if let Some(Value::Array(items)) = page.get_mut(result_key).map(Value::take) {
                results.extend(items);
            }

            let key = page
                .pointer("/pagination/next_key")
                .and_then(|v| v.as_str())
                .filter(|k| !k.is_empty())
                .map(str::to_string);

            match key {
                None => return Ok(results),
                Some(key) => {
                    if !seen.insert(key.clone()) {
                        return Err(Error::Protocol(format!(
                            "pagination cursor {key:?} repeated on {path}"
                        )));
                    }
                    next_key = Some(key);
                }
            }
        }
    }

    // Bank

    pub async fn balance(&self, address: &str, denom: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/bank/v1beta1/balances/{address}/by_denom"),
            &[("denom", denom.to_string())],
        )
        .await
    }

    pub async fn all_balances(&self, address: &str) -> Result<Value> {
        self.get(&format!("/cosmos/bank/v1beta1/balances/{address}"), &[])
            .await
    }

    pub async fn total_supply(&self) -> Result<Value> {
        self.get("/cosmos/bank/v1beta1/supply", &[]).await
    }

    pub async fn supply_of(&self, denom: &str) -> Result<Value> {
        self.get(
            "/cosmos/bank/v1beta1/supply/by_denom",
            &[("denom", denom.to_string())],
        )
        .await
    }

    pub async fn denom_metadata(&self, denom: &str) -> Result<Value> {
        self.get(&format!("/cosmos/bank/v1beta1/denoms_metadata/{denom}"), &[])
            .await
    }

    pub async fn all_denom_metadata(&self) -> Result<Value> {
        self.get("/cosmos/bank/v1beta1/denoms_metadata", &[]).await
    }

    pub async fn spendable_balances(&self, address: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/bank/v1beta1/spendable_balances/{address}"),
            &[],
        )
        .await
    }

    pub async fn send_enabled(&self) -> Result<Value> {
        self.get("/cosmos/bank/v1beta1/send_enabled", &[]).await
    }

    // Auth

    pub async fn account(&self, address: &str) -> Result<Value> {
        self.get(&format!("/cosmos/auth/v1beta1/accounts/{address}"), &[])
            .await
    }

    pub async fn accounts(&self) -> Result<Value> {
        self.get("/cosmos/auth/v1beta1/accounts", &[]).await
    }

    pub async fn module_accounts(&self) -> Result<Value> {
        self.get("/cosmos/auth/v1beta1/module_accounts", &[]).await
    }

    pub async fn module_account(&self, name: &str) -> Result<Value> {
        self.get(&format!("/cosmos/auth/v1beta1/module_accounts/{name}"), &[])
            .await
    }

    pub async fn auth_params(&self) -> Result<Value> {
        self.get("/cosmos/auth/v1beta1/params", &[]).await
    }

    // Staking

    pub async fn validators(&self, status: Option<&str>) -> Result<Value> {
        let params: Vec<(&str, String)> = status
            .filter(|s| !s.is_empty())
            .map(|s| ("status", s.to_string()))
            .into_iter()
            .collect();

        self.get("/cosmos/staking/v1beta1/validators", &params).await
    }

    /// Every validator with the given status, across all pages.
    pub async fn all_validators(&self, status: Option<&str>) -> Result<Vec<Value>> {
        let params: Vec<(&str, String)> = status
            .filter(|s| !s.is_empty())
            .map(|s| ("status", s.to_string()))
            .into_iter()
            .collect();

        self.get_all_pages("/cosmos/staking/v1beta1/validators", "validators", &params)
            .await
    }

    pub async fn validator(&self, validator: &str) -> Result<Value> {
        self.get(&format!("/cosmos/staking/v1beta1/validators/{validator}"), &[])
            .await
    }

    pub async fn validator_delegations(&self, validator: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/staking/v1beta1/validators/{validator}/delegations"),
            &[],
        )
        .await
    }

    pub async fn delegations(&self, delegator: &str) -> Result<Value> {
        self.get(&format!("/cosmos/staking/v1beta1/delegations/{delegator}"), &[])
            .await
    }

    pub async fn delegation(&self, delegator: &str, validator: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/staking/v1beta1/validators/{validator}/delegations/{delegator}"),
            &[],
        )
        .await
    }

    pub async fn unbonding_delegations(&self, delegator: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/staking/v1beta1/delegators/{delegator}/unbonding_delegations"),
            &[],
        )
        .await
    }

    pub async fn unbonding_delegation(&self, delegator: &str, validator: &str) -> Result<Value> {
        self.get(
            &format!(
                "/cosmos/staking/v1beta1/validators/{validator}/delegations/{delegator}/unbonding_delegation"
            ),
            &[],
        )
        .await
    }

    pub async fn redelegations(&self, delegator: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/staking/v1beta1/delegators/{delegator}/redelegations"),
            &[],
        )
        .await
    }

    pub async fn staking_pool(&self) -> Result<Value> {
        self.get("/cosmos/staking/v1beta1/pool", &[]).await
    }

    pub async fn staking_params(&self) -> Result<Value> {
        self.get("/cosmos/staking/v1beta1/params", &[]).await
    }

    // Distribution

    pub async fn delegation_rewards(&self, delegator: &str, validator: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/distribution/v1beta1/delegators/{delegator}/rewards/{validator}"),
            &[],
        )
        .await
    }

    pub async fn all_rewards(&self, delegator: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/distribution/v1beta1/delegators/{delegator}/rewards"),
            &[],
        )
        .await
    }

    pub async fn withdraw_address(&self, delegator: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/distribution/v1beta1/delegators/{delegator}/withdraw_address"),
            &[],
        )
        .await
    }

    pub async fn community_pool(&self) -> Result<Value> {
        self.get("/cosmos/distribution/v1beta1/community_pool", &[])
            .await
    }

    pub async fn validator_commission(&self, validator: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/distribution/v1beta1/validators/{validator}/commission"),
            &[],
        )
        .await
    }

    pub async fn delegator_validators(&self, delegator: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/distribution/v1beta1/delegators/{delegator}/validators"),
            &[],
        )
        .await
    }

    // Governance

    pub async fn proposals(&self, status: Option<&str>) -> Result<Value> {
        let params: Vec<(&str, String)> = status
            .filter(|s| !s.is_empty())
            .map(|s| ("proposal_status", s.to_string()))
            .into_iter()
            .collect();

        self.get("/cosmos/gov/v1beta1/proposals", &params).await
    }

    pub async fn proposal(&self, id: u64) -> Result<Value> {
        self.get(&format!("/cosmos/gov/v1beta1/proposals/{id}"), &[])
            .await
    }

    pub async fn proposal_deposits(&self, id: u64) -> Result<Value> {
        self.get(&format!("/cosmos/gov/v1beta1/proposals/{id}/deposits"), &[])
            .await
    }

    pub async fn proposal_votes(&self, id: u64) -> Result<Value> {
        self.get(&format!("/cosmos/gov/v1beta1/proposals/{id}/votes"), &[])
            .await
    }

    pub async fn proposal_tally(&self, id: u64) -> Result<Value> {
        self.get(&format!("/cosmos/gov/v1beta1/proposals/{id}/tally"), &[])
            .await
    }

    pub async fn vote(&self, id: u64, voter: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/gov/v1beta1/proposals/{id}/votes/{voter}"),
            &[],
        )
        .await
    }

    /// `params_type` is one of `voting`, `deposit` or `tallying`.
    pub async fn gov_params(&self, params_type: &str) -> Result<Value> {
        self.get(&format!("/cosmos/gov/v1beta1/params/{params_type}"), &[])
            .await
    }

    // IBC

    pub async fn ibc_channels(&self) -> Result<Value> {
        self.get("/ibc/core/channel/v1/channels", &[]).await
    }

    pub async fn ibc_channel(&self, channel: &str, port: &str) -> Result<Value> {
        self.get(
            &format!("/ibc/core/channel/v1/channels/{channel}/ports/{port}"),
            &[],
        )
        .await
    }

    pub async fn ibc_connections(&self) -> Result<Value> {
        self.get("/ibc/core/connection/v1/connections", &[]).await
    }

    pub async fn ibc_connection(&self, connection: &str) -> Result<Value> {
        self.get(
            &format!("/ibc/core/connection/v1/connections/{connection}"),
            &[],
        )
        .await
    }

    pub async fn ibc_client_states(&self) -> Result<Value> {
        self.get("/ibc/core/client/v1/client_states", &[]).await
    }

    pub async fn denom_trace(&self, hash: &str) -> Result<Value> {
        self.get(&format!("/ibc/apps/transfer/v1/denom_traces/{hash}"), &[])
            .await
    }

    pub async fn denom_traces(&self) -> Result<Value> {
        self.get("/ibc/apps/transfer/v1/denom_traces", &[]).await
    }

    // Slashing

    pub async fn signing_infos(&self) -> Result<Value> {
        self.get("/cosmos/slashing/v1beta1/signing_infos", &[]).await
    }

    pub async fn signing_info(&self, cons_address: &str) -> Result<Value> {
        self.get(
            &format!("/cosmos/slashing/v1beta1/signing_infos/{cons_address}"),
            &[],
        )
        .await
    }

    pub async fn slashing_params(&self) -> Result<Value> {
        self.get("/cosmos/slashing/v1beta1/params", &[]).await
    }

    // Mint

    pub async fn inflation(&self) -> Result<Value> {
        self.get("/cosmos/mint/v1beta1/inflation", &[]).await
    }

    pub async fn annual_provisions(&self) -> Result<Value> {
        self.get("/cosmos/mint/v1beta1/annual_provisions", &[]).await
    }

    pub async fn mint_params(&self) -> Result<Value> {
        self.get("/cosmos/mint/v1beta1/params", &[]).await
    }

    // Transactions

    pub async fn tx(&self, hash: &str) -> Result<Value> {
        self.get(&format!("/cosmos/tx/v1beta1/txs/{hash}"), &[]).await
    }

    pub async fn txs_by_events(&self, events: &str) -> Result<Value> {
        self.get("/cosmos/tx/v1beta1/txs", &[("events", events.to_string())])
            .await
    }

    pub async fn txs_by_height(&self, height: u64) -> Result<Value> {
        self.get(&format!("/cosmos/tx/v1beta1/txs/block/{height}"), &[])
            .await
    }

    /// `tx_bytes` is the base64 encoded signed transaction.
    pub async fn simulate(&self, tx_bytes: &str) -> Result<Value> {
        self.post("/cosmos/tx/v1beta1/simulate", &json!({ "tx_bytes": tx_bytes }))
            .await
    }

    pub async fn broadcast(&self, tx_bytes: &str, mode: &str) -> Result<Value> {
        self.post(
            "/cosmos/tx/v1beta1/txs",
            &json!({ "tx_bytes": tx_bytes, "mode": mode }),
        )
        .await
    }

    // Tendermint info

    pub async fn node_info(&self) -> Result<Value> {
        self.get("/cosmos/base/tendermint/v1beta1/node_info", &[]).await
    }

    pub async fn syncing(&self) -> Result<Value> {
        self.get("/cosmos/base/tendermint/v1beta1/syncing", &[]).await
    }

    pub async fn latest_block(&self) -> Result<Value> {
        self.get("/cosmos/base/tendermint/v1beta1/blocks/latest", &[])
            .await
    }

    pub async fn block(&self, height: u64) -> Result<Value> {
        self.get(&format!("/cosmos/base/tendermint/v1beta1/blocks/{height}"), &[])
            .await
    }

    pub async fn latest_validator_set(&self) -> Result<Value> {
        self.get("/cosmos/base/tendermint/v1beta1/validatorsets/latest", &[])
            .await
    }

    pub async fn validator_set(&self, height: u64) -> Result<Value> {
        self.get(
            &format!("/cosmos/base/tendermint/v1beta1/validatorsets/{height}"),
            &[],
        )
        .await
    }
}
