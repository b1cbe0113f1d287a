//! Resource/operation requests and their execution against the gateways
//! and the signing client.
//!
//! A request is a JSON object tagged by `resource` and `operation`, with the
//! operation's parameters alongside in camelCase:
//!
//! ```json
//! { "resource": "governance", "operation": "vote", "proposalId": 42, "option": "yes" }
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    address, amount,
    client::{
        signing::IbcTransferRequest, Connector, FeeSetting, LcdClient, RpcClient,
        SigningClient, SigningIdentity, TxResult,
    },
    config::Credentials,
    ibc,
    metrics::Metrics,
    msg::VoteOption,
    Error, Result,
};

/// Declares an operation enum together with the wire name of each variant.
macro_rules! operations {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $label:literal => $variant:ident $({ $($fields:tt)* })?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $label)]
                $variant $({ $($fields)* })?,
            )*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant { .. } => $label,)*
                }
            }
        }
    };
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum AccountOp {
        "getAccountInfo" => GetAccountInfo { address: Option<String> },
        "getBalance" => GetBalance { address: Option<String>, denom: Option<String> },
        "getAllBalances" => GetAllBalances { address: Option<String> },
        "transfer" => Transfer {
            to_address: String,
            amount: String,
            denom: Option<String>,
            #[serde(default)]
            memo: String,
        },
        "transferToken" => TransferToken {
            to_address: String,
            amount: String,
            denom: String,
            #[serde(default)]
            memo: String,
        },
        "validateAddress" => ValidateAddress { address: String, prefix: Option<String> },
        "getDelegations" => GetDelegations { address: Option<String> },
        "getUnbonding" => GetUnbonding { address: Option<String> },
        "getRedelegations" => GetRedelegations { address: Option<String> },
        "getRewards" => GetRewards { address: Option<String> },
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum StakingOp {
        "getValidators" => GetValidators {
            #[serde(default = "default::bond_status")]
            status: String,
            /// Follow pagination to the end instead of returning one page.
            #[serde(default)]
            all: bool,
        },
        "getValidator" => GetValidator { validator_address: String },
        "delegate" => Delegate {
            validator_address: String,
            amount: String,
            #[serde(default)]
            memo: String,
        },
        "undelegate" => Undelegate {
            validator_address: String,
            amount: String,
            #[serde(default)]
            memo: String,
        },
        "redelegate" => Redelegate {
            src_validator_address: String,
            dst_validator_address: String,
            amount: String,
            #[serde(default)]
            memo: String,
        },
        "getDelegation" => GetDelegation {
            delegator_address: Option<String>,
            validator_address: String,
        },
        "getUnbondingDelegation" => GetUnbondingDelegation {
            delegator_address: Option<String>,
            validator_address: String,
        },
        "getStakingPool" => GetStakingPool,
        "getStakingParams" => GetStakingParams,
        "getValidatorDelegations" => GetValidatorDelegations { validator_address: String },
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum DistributionOp {
        "getDelegationRewards" => GetDelegationRewards {
            delegator_address: Option<String>,
            validator_address: String,
        },
        "getAllRewards" => GetAllRewards { delegator_address: Option<String> },
        "withdrawRewards" => WithdrawRewards {
            validator_address: String,
            #[serde(default)]
            memo: String,
        },
        "withdrawAllRewards" => WithdrawAllRewards {
            #[serde(default)]
            memo: String,
        },
        "getWithdrawAddress" => GetWithdrawAddress { delegator_address: Option<String> },
        "getCommunityPool" => GetCommunityPool,
        "getValidatorCommission" => GetValidatorCommission { validator_address: String },
        "getDelegatorValidators" => GetDelegatorValidators { delegator_address: Option<String> },
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum GovernanceOp {
        "getProposals" => GetProposals { status: Option<String> },
        "getProposal" => GetProposal {
            #[serde(deserialize_with = "lenient::number")]
            proposal_id: u64,
        },
        "getProposalDeposits" => GetProposalDeposits {
            #[serde(deserialize_with = "lenient::number")]
            proposal_id: u64,
        },
        "getProposalVotes" => GetProposalVotes {
            #[serde(deserialize_with = "lenient::number")]
            proposal_id: u64,
        },
        "getProposalTally" => GetProposalTally {
            #[serde(deserialize_with = "lenient::number")]
            proposal_id: u64,
        },
        "vote" => Vote {
            #[serde(deserialize_with = "lenient::number")]
            proposal_id: u64,
            option: VoteOption,
            #[serde(default)]
            memo: String,
        },
        "getVote" => GetVote {
            #[serde(deserialize_with = "lenient::number")]
            proposal_id: u64,
            voter: Option<String>,
        },
        "getGovParams" => GetGovParams {
            #[serde(default = "default::gov_params_type")]
            params_type: String,
        },
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum IbcOp {
        "ibcTransfer" => Transfer {
            destination_chain: String,
            receiver: String,
            amount: String,
            denom: Option<String>,
            #[serde(default, deserialize_with = "lenient::optional_number")]
            timeout_minutes: Option<u64>,
            #[serde(default)]
            memo: String,
        },
        "ibcTransferDirect" => TransferDirect {
            source_channel: String,
            #[serde(default = "default::transfer_port")]
            source_port: String,
            receiver: String,
            amount: String,
            denom: Option<String>,
            #[serde(default, deserialize_with = "lenient::optional_number")]
            timeout_minutes: Option<u64>,
            #[serde(default)]
            memo: String,
        },
        "getChannels" => GetChannels,
        "getChannel" => GetChannel {
            channel_id: String,
            #[serde(default = "default::transfer_port")]
            port_id: String,
        },
        "getConnections" => GetConnections,
        "getConnection" => GetConnection { connection_id: String },
        "getClients" => GetClients,
        "getDenomTrace" => GetDenomTrace { hash: String },
        "getDenomTraces" => GetDenomTraces,
        "getAvailableDestinations" => GetAvailableDestinations,
        "getChannelInfo" => GetChannelInfo { destination_chain: String },
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum BankOp {
        "getTotalSupply" => GetTotalSupply,
        "getSupplyOf" => GetSupplyOf { denom: String },
        "getDenomMetadata" => GetDenomMetadata { denom: String },
        "getAllDenomMetadata" => GetAllDenomMetadata,
        "getSpendableBalances" => GetSpendableBalances { address: Option<String> },
        "getSendEnabled" => GetSendEnabled,
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum AuthOp {
        "getAccount" => GetAccount { address: Option<String> },
        "getAccounts" => GetAccounts,
        "getModuleAccounts" => GetModuleAccounts,
        "getModuleAccount" => GetModuleAccount { name: String },
        "getParams" => GetParams,
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum SlashingOp {
        "getSigningInfos" => GetSigningInfos,
        "getSigningInfo" => GetSigningInfo { cons_address: String },
        "getSlashingParams" => GetSlashingParams,
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum MintOp {
        "getInflation" => GetInflation,
        "getAnnualProvisions" => GetAnnualProvisions,
        "getMintParams" => GetMintParams,
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum TransactionOp {
        "getTx" => GetTx { hash: String },
        "getTxsByEvents" => GetTxsByEvents { events: String },
        "searchTx" => SearchTx {
            query: String,
            #[serde(default = "default::page", deserialize_with = "lenient::number")]
            page: u32,
            #[serde(default = "default::per_page", deserialize_with = "lenient::number")]
            per_page: u32,
            #[serde(default = "default::order_by")]
            order_by: String,
        },
        "getTxsByHeight" => GetTxsByHeight {
            #[serde(deserialize_with = "lenient::number")]
            height: u64,
        },
        /// `txBytes` is a base64 encoded transaction.
        "simulate" => Simulate { tx_bytes: String },
        "broadcastTx" => BroadcastTx {
            tx_bytes: String,
            #[serde(default = "default::broadcast_mode")]
            mode: String,
        },
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum BlockOp {
        "getLatestBlock" => GetLatestBlock,
        "getBlockByHeight" => GetBlockByHeight {
            #[serde(deserialize_with = "lenient::number")]
            height: u64,
        },
        "getBlockByHash" => GetBlockByHash { hash: String },
        "getBlockResults" => GetBlockResults {
            #[serde(default, deserialize_with = "lenient::optional_number")]
            height: Option<u64>,
        },
        "getCommit" => GetCommit {
            #[serde(default, deserialize_with = "lenient::optional_number")]
            height: Option<u64>,
        },
        "getValidatorSet" => GetValidatorSet {
            #[serde(deserialize_with = "lenient::number")]
            height: u64,
        },
        "getLatestValidatorSet" => GetLatestValidatorSet,
        "getBlockchain" => GetBlockchain {
            #[serde(deserialize_with = "lenient::number")]
            min_height: u64,
            #[serde(deserialize_with = "lenient::number")]
            max_height: u64,
        },
    }
}

operations! {
    #[derive(Clone, Debug, Deserialize)]
    #[serde(tag = "operation", rename_all_fields = "camelCase")]
    pub enum TendermintOp {
        "getNodeInfo" => GetNodeInfo,
        "getSyncStatus" => GetSyncStatus,
        "getNetInfo" => GetNetInfo,
        "getHealth" => GetHealth,
        "getStatus" => GetStatus,
        "getGenesis" => GetGenesis,
        "getConsensusState" => GetConsensusState,
        "getConsensusParams" => GetConsensusParams {
            #[serde(default, deserialize_with = "lenient::optional_number")]
            height: Option<u64>,
        },
        "getUnconfirmedTxs" => GetUnconfirmedTxs {
            #[serde(default = "default::unconfirmed_limit", deserialize_with = "lenient::number")]
            limit: u32,
        },
        "getNumUnconfirmedTxs" => GetNumUnconfirmedTxs,
        "abciInfo" => AbciInfo,
        /// `data` is hex encoded.
        "abciQuery" => AbciQuery {
            path: String,
            data: Option<String>,
            #[serde(default, deserialize_with = "lenient::optional_number")]
            height: Option<u64>,
            #[serde(default)]
            prove: bool,
        },
    }
}

/// One operation request.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "resource", rename_all = "camelCase")]
pub enum Request {
    Account(AccountOp),
    Staking(StakingOp),
    Distribution(DistributionOp),
    Governance(GovernanceOp),
    IbcTransfer(IbcOp),
    Bank(BankOp),
    Auth(AuthOp),
    Slashing(SlashingOp),
    Mint(MintOp),
    Transaction(TransactionOp),
    Block(BlockOp),
    Tendermint(TendermintOp),
}

impl Request {
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Account(_) => "account",
            Self::Staking(_) => "staking",
            Self::Distribution(_) => "distribution",
            Self::Governance(_) => "governance",
            Self::IbcTransfer(_) => "ibcTransfer",
            Self::Bank(_) => "bank",
            Self::Auth(_) => "auth",
            Self::Slashing(_) => "slashing",
            Self::Mint(_) => "mint",
            Self::Transaction(_) => "transaction",
            Self::Block(_) => "block",
            Self::Tendermint(_) => "tendermint",
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Account(op) => op.name(),
            Self::Staking(op) => op.name(),
            Self::Distribution(op) => op.name(),
            Self::Governance(op) => op.name(),
            Self::IbcTransfer(op) => op.name(),
            Self::Bank(op) => op.name(),
            Self::Auth(op) => op.name(),
            Self::Slashing(op) => op.name(),
            Self::Mint(op) => op.name(),
            Self::Transaction(op) => op.name(),
            Self::Block(op) => op.name(),
            Self::Tendermint(op) => op.name(),
        }
    }
}

/// A state-changing operation, run against a signing client that lives for
/// exactly one request.
enum TxAction {
    Send {
        to: String,
        amount: String,
        denom: Option<String>,
        memo: String,
    },
    Delegate {
        validator: String,
        amount: String,
        memo: String,
    },
    Undelegate {
        validator: String,
        amount: String,
        memo: String,
    },
    Redelegate {
        src: String,
        dst: String,
        amount: String,
        memo: String,
    },
    WithdrawReward {
        validator: String,
        memo: String,
    },
    WithdrawAllRewards {
        memo: String,
    },
    Vote {
        proposal_id: u64,
        option: VoteOption,
        memo: String,
    },
    IbcTransfer {
        destination: String,
        request: IbcTransferRequest,
    },
    IbcTransferDirect {
        channel: String,
        port: String,
        request: IbcTransferRequest,
    },
}

impl TxAction {
    async fn run(self, client: &SigningClient, lcd: &LcdClient) -> Result<TxResult> {
        let fee = FeeSetting::Auto;

        match self {
            Self::Send {
                to,
                amount,
                denom,
                memo,
            } => client.send(&to, &amount, denom.as_deref(), &memo, fee).await,
            Self::Delegate {
                validator,
                amount,
                memo,
            } => client.delegate(&validator, &amount, &memo, fee).await,
            Self::Undelegate {
                validator,
                amount,
                memo,
            } => client.undelegate(&validator, &amount, &memo, fee).await,
            Self::Redelegate {
                src,
                dst,
                amount,
                memo,
            } => client.redelegate(&src, &dst, &amount, &memo, fee).await,
            Self::WithdrawReward { validator, memo } => {
                client.withdraw_reward(&validator, &memo, fee).await
            }
            Self::WithdrawAllRewards { memo } => {
                let delegator = client.address().await?;
                let rewards = lcd.all_rewards(&delegator).await?;
                let validators = rewarding_validators(&rewards);

                info!(
                    delegator,
                    validators = validators.len(),
                    "Withdrawing rewards from every validator"
                );
                client.withdraw_rewards(&validators, &memo, fee).await
            }
            Self::Vote {
                proposal_id,
                option,
                memo,
            } => client.vote(proposal_id, option, &memo, fee).await,
            Self::IbcTransfer {
                destination,
                request,
            } => client.ibc_transfer(&destination, &request, fee).await,
            Self::IbcTransferDirect {
                channel,
                port,
                request,
            } => {
                client
                    .ibc_transfer_direct(&channel, &port, &request, fee)
                    .await
            }
        }
    }
}

fn rewarding_validators(rewards: &Value) -> Vec<String> {
    rewards
        .get("rewards")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("validator_address").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Routes requests to the LCD gateway, the RPC gateway or a fresh signing client.
pub struct Dispatcher {
    credentials: Credentials,
    lcd: LcdClient,
    rpc: RpcClient,
    connector: Option<Arc<dyn Connector>>,
    metrics: Option<Metrics>,
}

impl Dispatcher {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let lcd = LcdClient::new(&credentials.network.lcd)?;
        let rpc = RpcClient::new(&credentials.network.rpc)?;

        Ok(Self {
            credentials,
            lcd,
            rpc,
            connector: None,
            metrics: None,
        })
    }

    /// Broadcast through `connector` instead of the network's RPC endpoint.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn lcd(&self) -> &LcdClient {
        &self.lcd
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub async fn execute(&self, request: Request) -> Result<Value> {
        let resource = request.resource();
        let operation = request.operation();
        debug!(resource, operation, "Dispatching");

        let result = match request {
            Request::Account(op) => self.account(op).await,
            Request::Staking(op) => self.staking(op).await,
            Request::Distribution(op) => self.distribution(op).await,
            Request::Governance(op) => self.governance(op).await,
            Request::IbcTransfer(op) => self.ibc(op).await,
            Request::Bank(op) => self.bank(op).await,
            Request::Auth(op) => self.auth(op).await,
            Request::Slashing(op) => self.slashing(op).await,
            Request::Mint(op) => self.mint(op).await,
            Request::Transaction(op) => self.transaction(op).await,
            Request::Block(op) => self.block(op).await,
            Request::Tendermint(op) => self.tendermint(op).await,
        };

        if let Some(metrics) = &self.metrics {
            metrics.hubflow_operations(resource, operation, result.is_ok());
        }

        if let Err(e) = &result {
            warn!(resource, operation, error = %e, "Operation failed");
        }

        result
    }

    /// Run `requests` in order. With `continue_on_fail` a failed item yields
    /// `{"error": message}` in its slot; otherwise the first failure aborts.
    pub async fn execute_batch(
        &self,
        requests: Vec<Request>,
        continue_on_fail: bool,
    ) -> Result<Vec<Value>> {
        self.run_all(requests.into_iter().map(Ok), continue_on_fail)
            .await
    }

    /// Run a JSON request document: a single request object, or an array
    /// run as a batch. Array items are parsed one at a time, so with
    /// `continue_on_fail` a malformed item only fails its own slot.
    pub async fn execute_document(&self, document: Value, continue_on_fail: bool) -> Result<Value> {
        match document {
            Value::Array(items) => {
                let requests = items
                    .into_iter()
                    .map(|item| serde_json::from_value::<Request>(item).map_err(Error::from));
                let results = self.run_all(requests, continue_on_fail).await?;
                Ok(Value::Array(results))
            }
            single => {
                let mut results = self
                    .run_all(
                        std::iter::once(serde_json::from_value(single).map_err(Error::from)),
                        continue_on_fail,
                    )
                    .await?;
                Ok(results.pop().unwrap_or(Value::Null))
            }
        }
    }

    async fn run_all(
        &self,
        requests: impl IntoIterator<Item = Result<Request>>,
        continue_on_fail: bool,
    ) -> Result<Vec<Value>> {
        let mut results = Vec::new();

        for request in requests {
            let outcome = match request {
                Ok(request) => self.execute(request).await,
                Err(e) => {
                    warn!(error = %e, "Malformed request");
                    Err(e)
                }
            };

            match outcome {
                Ok(value) => results.push(value),
                Err(e) if continue_on_fail => results.push(json!({ "error": e.to_string() })),
                Err(e) => return Err(e),
            }
        }

        Ok(results)
    }

    fn signer(&self) -> Result<SigningClient> {
        let client = match &self.connector {
            Some(connector) => {
                SigningClient::with_connector(self.credentials.clone(), connector.clone())
            }
            None => SigningClient::new(self.credentials.clone())?,
        };

        Ok(match &self.metrics {
            Some(metrics) => client.with_metrics(metrics.clone()),
            None => client,
        })
    }

    async fn broadcast(&self, action: TxAction) -> Result<Value> {
        let client = self.signer()?;
        let result = action.run(&client, &self.lcd).await;
        client.disconnect().await;

        Ok(serde_json::to_value(result?)?)
    }

    /// The given address, or the configured signer's own address.
    fn address_or_own(&self, address: Option<String>) -> Result<String> {
        match address {
            Some(address) if !address.trim().is_empty() => Ok(address::normalize(&address)),
            _ => {
                let identity = SigningIdentity::from_mnemonic(
                    self.credentials.mnemonic()?,
                    &self.credentials.hd_path,
                    &self.credentials.prefix,
                )?;
                Ok(identity.address().to_string())
            }
        }
    }

    /// Add `displayAmount` and `formatted` to base-denom coins at `pointer`,
    /// which may name a single coin or an array of them.
    fn enrich(&self, mut value: Value, pointer: &str) -> Value {
        match value.pointer_mut(pointer) {
            Some(Value::Array(coins)) => coins.iter_mut().for_each(|c| self.enrich_coin(c)),
            Some(coin) => self.enrich_coin(coin),
            None => {}
        }
        value
    }

    /// Enrich the coin at `child` inside every element of the array at `pointer`.
    fn enrich_each(&self, mut value: Value, pointer: &str, child: &str) -> Value {
        if let Some(Value::Array(entries)) = value.pointer_mut(pointer) {
            entries
                .iter_mut()
                .filter_map(|entry| entry.pointer_mut(child))
                .for_each(|coin| self.enrich_coin(coin));
        }
        value
    }

    fn enrich_coin(&self, coin: &mut Value) {
        let network = &self.credentials.network;
        let Some(fields) = coin.as_object_mut() else {
            return;
        };

        if fields.get("denom").and_then(Value::as_str) != Some(network.min_denom.as_str()) {
            return;
        }

        let Some(base) = fields.get("amount").and_then(Value::as_str) else {
            return;
        };
        // Reward amounts are DecCoins; only the integral part is displayed.
        let base = base.split('.').next().unwrap_or(base).to_string();

        let display = amount::to_decimal_units(&base, network.decimals);
        let formatted = amount::format_display(&base, &network.min_denom, network.decimals);
        if let (Ok(display), Ok(formatted)) = (display, formatted) {
            fields.insert("displayAmount".into(), json!(display));
            fields.insert("formatted".into(), json!(formatted));
        }
    }

    async fn account(&self, op: AccountOp) -> Result<Value> {
        match op {
            AccountOp::GetAccountInfo { address } => {
                self.lcd.account(&self.address_or_own(address)?).await
            }
            AccountOp::GetBalance { address, denom } => {
                let address = self.address_or_own(address)?;
                let denom = denom.unwrap_or_else(|| self.credentials.network.min_denom.clone());
                let balance = self.lcd.balance(&address, &denom).await?;
                Ok(self.enrich(balance, "/balance"))
            }
            AccountOp::GetAllBalances { address } => {
                let balances = self.lcd.all_balances(&self.address_or_own(address)?).await?;
                Ok(self.enrich(balances, "/balances"))
            }
            AccountOp::Transfer {
                to_address,
                amount,
                denom,
                memo,
            } => {
                self.broadcast(TxAction::Send {
                    to: to_address,
                    amount,
                    denom,
                    memo,
                })
                .await
            }
            AccountOp::TransferToken {
                to_address,
                amount,
                denom,
                memo,
            } => {
                self.broadcast(TxAction::Send {
                    to: to_address,
                    amount,
                    denom: Some(denom),
                    memo,
                })
                .await
            }
            AccountOp::ValidateAddress { address, prefix } => {
                let expected = prefix.unwrap_or_else(|| self.credentials.prefix.clone());
                let address = address::normalize(&address);

                Ok(json!({
                    "address": address,
                    "valid": address::validate(&address, Some(&expected)),
                    "prefix": address::prefix_of(&address),
                    "expectedPrefix": expected,
                }))
            }
            AccountOp::GetDelegations { address } => {
                let delegations = self.lcd.delegations(&self.address_or_own(address)?).await?;
                Ok(self.enrich_each(delegations, "/delegation_responses", "/balance"))
            }
            AccountOp::GetUnbonding { address } => {
                self.lcd
                    .unbonding_delegations(&self.address_or_own(address)?)
                    .await
            }
            AccountOp::GetRedelegations { address } => {
                self.lcd.redelegations(&self.address_or_own(address)?).await
            }
            AccountOp::GetRewards { address } => {
                let rewards = self.lcd.all_rewards(&self.address_or_own(address)?).await?;
                Ok(self.enrich(rewards, "/total"))
            }
        }
    }

    async fn staking(&self, op: StakingOp) -> Result<Value> {
        match op {
            StakingOp::GetValidators { status, all: false } => {
                self.lcd.validators(Some(&status)).await
            }
            StakingOp::GetValidators { status, all: true } => {
                let validators = self.lcd.all_validators(Some(&status)).await?;
                Ok(json!({ "count": validators.len(), "validators": validators }))
            }
            StakingOp::GetValidator { validator_address } => {
                self.lcd.validator(&validator_address).await
            }
            StakingOp::Delegate {
                validator_address,
                amount,
                memo,
            } => {
                self.broadcast(TxAction::Delegate {
                    validator: validator_address,
                    amount,
                    memo,
                })
                .await
            }
            StakingOp::Undelegate {
                validator_address,
                amount,
                memo,
            } => {
                self.broadcast(TxAction::Undelegate {
                    validator: validator_address,
                    amount,
                    memo,
                })
                .await
            }
            StakingOp::Redelegate {
                src_validator_address,
                dst_validator_address,
                amount,
                memo,
            } => {
                self.broadcast(TxAction::Redelegate {
                    src: src_validator_address,
                    dst: dst_validator_address,
                    amount,
                    memo,
                })
                .await
            }
            StakingOp::GetDelegation {
                delegator_address,
                validator_address,
            } => {
                let delegator = self.address_or_own(delegator_address)?;
                let delegation = self.lcd.delegation(&delegator, &validator_address).await?;
                Ok(self.enrich(delegation, "/delegation_response/balance"))
            }
            StakingOp::GetUnbondingDelegation {
                delegator_address,
                validator_address,
            } => {
                let delegator = self.address_or_own(delegator_address)?;
                self.lcd
                    .unbonding_delegation(&delegator, &validator_address)
                    .await
            }
            StakingOp::GetStakingPool => self.lcd.staking_pool().await,
            StakingOp::GetStakingParams => self.lcd.staking_params().await,
            StakingOp::GetValidatorDelegations { validator_address } => {
                self.lcd.validator_delegations(&validator_address).await
            }
        }
    }

    async fn distribution(&self, op: DistributionOp) -> Result<Value> {
        match op {
            DistributionOp::GetDelegationRewards {
                delegator_address,
                validator_address,
            } => {
                let delegator = self.address_or_own(delegator_address)?;
                let rewards = self
                    .lcd
                    .delegation_rewards(&delegator, &validator_address)
                    .await?;
                Ok(self.enrich(rewards, "/rewards"))
            }
            DistributionOp::GetAllRewards { delegator_address } => {
                let rewards = self
                    .lcd
                    .all_rewards(&self.address_or_own(delegator_address)?)
                    .await?;
                Ok(self.enrich(rewards, "/total"))
            }
            DistributionOp::WithdrawRewards {
                validator_address,
                memo,
            } => {
                self.broadcast(TxAction::WithdrawReward {
                    validator: validator_address,
                    memo,
                })
                .await
            }
            DistributionOp::WithdrawAllRewards { memo } => {
                self.broadcast(TxAction::WithdrawAllRewards { memo }).await
            }
            DistributionOp::GetWithdrawAddress { delegator_address } => {
                self.lcd
                    .withdraw_address(&self.address_or_own(delegator_address)?)
                    .await
            }
            DistributionOp::GetCommunityPool => self.lcd.community_pool().await,
            DistributionOp::GetValidatorCommission { validator_address } => {
                self.lcd.validator_commission(&validator_address).await
            }
            DistributionOp::GetDelegatorValidators { delegator_address } => {
                self.lcd
                    .delegator_validators(&self.address_or_own(delegator_address)?)
                    .await
            }
        }
    }

    async fn governance(&self, op: GovernanceOp) -> Result<Value> {
        match op {
            GovernanceOp::GetProposals { status } => self.lcd.proposals(status.as_deref()).await,
            GovernanceOp::GetProposal { proposal_id } => self.lcd.proposal(proposal_id).await,
            GovernanceOp::GetProposalDeposits { proposal_id } => {
                self.lcd.proposal_deposits(proposal_id).await
            }
            GovernanceOp::GetProposalVotes { proposal_id } => {
                self.lcd.proposal_votes(proposal_id).await
            }
            GovernanceOp::GetProposalTally { proposal_id } => {
                self.lcd.proposal_tally(proposal_id).await
            }
            GovernanceOp::Vote {
                proposal_id,
                option,
                memo,
            } => {
                self.broadcast(TxAction::Vote {
                    proposal_id,
                    option,
                    memo,
                })
                .await
            }
            GovernanceOp::GetVote { proposal_id, voter } => {
                self.lcd
                    .vote(proposal_id, &self.address_or_own(voter)?)
                    .await
            }
            GovernanceOp::GetGovParams { params_type } => self.lcd.gov_params(&params_type).await,
        }
    }

    async fn ibc(&self, op: IbcOp) -> Result<Value> {
        match op {
            IbcOp::Transfer {
                destination_chain,
                receiver,
                amount,
                denom,
                timeout_minutes,
                memo,
            } => {
                let request = IbcTransferRequest {
                    receiver,
                    amount,
                    denom,
                    timeout_minutes: timeout_minutes.unwrap_or(ibc::DEFAULT_TIMEOUT_MINUTES),
                    memo,
                };
                self.broadcast(TxAction::IbcTransfer {
                    destination: destination_chain,
                    request,
                })
                .await
            }
            IbcOp::TransferDirect {
                source_channel,
                source_port,
                receiver,
                amount,
                denom,
                timeout_minutes,
                memo,
            } => {
                let request = IbcTransferRequest {
                    receiver,
                    amount,
                    denom,
                    timeout_minutes: timeout_minutes.unwrap_or(ibc::DEFAULT_TIMEOUT_MINUTES),
                    memo,
                };
                self.broadcast(TxAction::IbcTransferDirect {
                    channel: source_channel,
                    port: source_port,
                    request,
                })
                .await
            }
            IbcOp::GetChannels => self.lcd.ibc_channels().await,
            IbcOp::GetChannel {
                channel_id,
                port_id,
            } => {
                self.lcd
                    .ibc_channel(
                        &ibc::canonical_channel_id(&channel_id),
                        &ibc::canonical_port(&port_id),
                    )
                    .await
            }
            IbcOp::GetConnections => self.lcd.ibc_connections().await,
            IbcOp::GetConnection { connection_id } => {
                self.lcd.ibc_connection(&connection_id).await
            }
            IbcOp::GetClients => self.lcd.ibc_client_states().await,
            IbcOp::GetDenomTrace { hash } => {
                let hash = ibc::ibc_denom_hash(&hash).unwrap_or(&hash);
                self.lcd.denom_trace(hash).await
            }
            IbcOp::GetDenomTraces => self.lcd.denom_traces().await,
            IbcOp::GetAvailableDestinations => {
                let destinations = ibc::destinations()
                    .map(|(key, route)| route_value(key, route))
                    .collect::<Result<Vec<_>>>()?;
                Ok(json!({ "count": destinations.len(), "destinations": destinations }))
            }
            IbcOp::GetChannelInfo { destination_chain } => {
                let route = ibc::lookup(&destination_chain)?;
                route_value(&destination_chain.trim().to_ascii_lowercase(), route)
            }
        }
    }

    async fn bank(&self, op: BankOp) -> Result<Value> {
        match op {
            BankOp::GetTotalSupply => self.lcd.total_supply().await,
            BankOp::GetSupplyOf { denom } => {
                let supply = self.lcd.supply_of(&denom).await?;
                Ok(self.enrich(supply, "/amount"))
            }
            BankOp::GetDenomMetadata { denom } => self.lcd.denom_metadata(&denom).await,
            BankOp::GetAllDenomMetadata => self.lcd.all_denom_metadata().await,
            BankOp::GetSpendableBalances { address } => {
                let balances = self
                    .lcd
                    .spendable_balances(&self.address_or_own(address)?)
                    .await?;
                Ok(self.enrich(balances, "/balances"))
            }
            BankOp::GetSendEnabled => self.lcd.send_enabled().await,
        }
    }

    async fn auth(&self, op: AuthOp) -> Result<Value> {
        match op {
            AuthOp::GetAccount { address } => {
                self.lcd.account(&self.address_or_own(address)?).await
            }
            AuthOp::GetAccounts => self.lcd.accounts().await,
            AuthOp::GetModuleAccounts => self.lcd.module_accounts().await,
            AuthOp::GetModuleAccount { name } => self.lcd.module_account(&name).await,
            AuthOp::GetParams => self.lcd.auth_params().await,
        }
    }

    async fn slashing(&self, op: SlashingOp) -> Result<Value> {
        match op {
            SlashingOp::GetSigningInfos => self.lcd.signing_infos().await,
            SlashingOp::GetSigningInfo { cons_address } => {
                self.lcd.signing_info(&cons_address).await
            }
            SlashingOp::GetSlashingParams => self.lcd.slashing_params().await,
        }
    }

    async fn mint(&self, op: MintOp) -> Result<Value> {
        match op {
            MintOp::GetInflation => self.lcd.inflation().await,
            MintOp::GetAnnualProvisions => self.lcd.annual_provisions().await,
            MintOp::GetMintParams => self.lcd.mint_params().await,
        }
    }

    async fn transaction(&self, op: TransactionOp) -> Result<Value> {
        match op {
            TransactionOp::GetTx { hash } => self.lcd.tx(hash.trim()).await,
            TransactionOp::GetTxsByEvents { events } => self.lcd.txs_by_events(&events).await,
            TransactionOp::SearchTx {
                query,
                page,
                per_page,
                order_by,
            } => {
                self.rpc
                    .tx_search(&query, page, per_page, &order_by)
                    .await
            }
            TransactionOp::GetTxsByHeight { height } => self.lcd.txs_by_height(height).await,
            TransactionOp::Simulate { tx_bytes } => self.lcd.simulate(&tx_bytes).await,
            TransactionOp::BroadcastTx { tx_bytes, mode } => {
                self.lcd.broadcast(&tx_bytes, &mode).await
            }
        }
    }

    async fn block(&self, op: BlockOp) -> Result<Value> {
        match op {
            BlockOp::GetLatestBlock => self.lcd.latest_block().await,
            BlockOp::GetBlockByHeight { height } => self.lcd.block(height).await,
            BlockOp::GetBlockByHash { hash } => self.rpc.block_by_hash(hash.trim()).await,
            BlockOp::GetBlockResults { height } => self.rpc.block_results(height).await,
            BlockOp::GetCommit { height } => self.rpc.commit(height).await,
            BlockOp::GetValidatorSet { height } => self.lcd.validator_set(height).await,
            BlockOp::GetLatestValidatorSet => self.lcd.latest_validator_set().await,
            BlockOp::GetBlockchain {
                min_height,
                max_height,
            } => {
                if min_height > max_height {
                    return Err(Error::Protocol(format!(
                        "minHeight {min_height} is above maxHeight {max_height}"
                    )));
                }
                self.rpc.blockchain(min_height, max_height).await
            }
        }
    }

    async fn tendermint(&self, op: TendermintOp) -> Result<Value> {
        match op {
            TendermintOp::GetNodeInfo => self.lcd.node_info().await,
            TendermintOp::GetSyncStatus => self.lcd.syncing().await,
            TendermintOp::GetNetInfo => self.rpc.net_info().await,
            TendermintOp::GetHealth => self.rpc.health().await,
            TendermintOp::GetStatus => self.rpc.status().await,
            TendermintOp::GetGenesis => self.rpc.genesis().await,
            TendermintOp::GetConsensusState => self.rpc.consensus_state().await,
            TendermintOp::GetConsensusParams { height } => {
                self.rpc.consensus_params(height).await
            }
            TendermintOp::GetUnconfirmedTxs { limit } => self.rpc.unconfirmed_txs(limit).await,
            TendermintOp::GetNumUnconfirmedTxs => self.rpc.num_unconfirmed_txs().await,
            TendermintOp::AbciInfo => self.rpc.abci_info().await,
            TendermintOp::AbciQuery {
                path,
                data,
                height,
                prove,
            } => {
                self.rpc
                    .abci_query(&path, data.as_deref(), height, prove)
                    .await
            }
        }
    }
}

fn route_value(key: &str, route: &ibc::IbcChannelRoute) -> Result<Value> {
    let mut value = serde_json::to_value(route)?;
    value["key"] = json!(key);
    Ok(value)
}

/// Numeric parameters arrive either as JSON numbers or as strings.
mod lenient {
    use std::{fmt::Display, str::FromStr};

    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Integer(u64),
        Text(String),
    }

    impl Number {
        fn parse<T, E>(self) -> Result<T, E>
        where
            T: FromStr + TryFrom<u64>,
            <T as FromStr>::Err: Display,
            <T as TryFrom<u64>>::Error: Display,
            E: de::Error,
        {
            match self {
                Number::Integer(n) => T::try_from(n).map_err(E::custom),
                Number::Text(s) => s.trim().parse().map_err(E::custom),
            }
        }
    }

    pub fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + TryFrom<u64>,
        <T as FromStr>::Err: Display,
        <T as TryFrom<u64>>::Error: Display,
    {
        Number::deserialize(deserializer)?.parse()
    }

    pub fn optional_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + TryFrom<u64>,
        <T as FromStr>::Err: Display,
        <T as TryFrom<u64>>::Error: Display,
    {
        Option::<Number>::deserialize(deserializer)?
            .map(Number::parse)
            .transpose()
    }
}

mod default {
    use crate::{client::rpc, ibc};

    pub fn bond_status() -> String {
        "BOND_STATUS_BONDED".to_string()
    }

    pub fn gov_params_type() -> String {
        "voting".to_string()
    }

    pub fn transfer_port() -> String {
        ibc::TRANSFER_PORT.to_string()
    }

    pub fn page() -> u32 {
        1
    }

    pub fn per_page() -> u32 {
        rpc::DEFAULT_PER_PAGE
    }

    pub fn order_by() -> String {
        "asc".to_string()
    }

    pub fn broadcast_mode() -> String {
        "BROADCAST_MODE_SYNC".to_string()
    }

    pub fn unconfirmed_limit() -> u32 {
        rpc::DEFAULT_UNCONFIRMED_LIMIT
    }
}
