//! Sign-and-broadcast client.
//!
//! One [`SigningClient`] per logical execution. The signing identity and the
//! broadcast session are created on first use and cached; concurrent first
//! uses wait on the same initialization. Callers must [`SigningClient::disconnect`]
//! before dropping the client.

use std::sync::Arc;

use chrono::Utc;
use cosmrs::{
    tx::{Body, Fee, SignDoc, SignerInfo},
    Denom,
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    session::AccountInfo, BroadcastSession, Connector, RpcClient, RpcConnector, SigningIdentity,
    TxResult,
};
use crate::{
    address,
    amount::{self, Coin},
    config::Credentials,
    ibc,
    metrics::Metrics,
    msg::{Msg, TransferParams, VoteOption},
    Error, Result,
};

/// How the transaction fee is chosen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FeeSetting {
    /// Simulate, scale the gas by the configured adjustment and pay the
    /// configured gas price in the network's base denom.
    #[default]
    Auto,
    Explicit { amount: Coin, gas_limit: u64 },
}

/// Parameters shared by both cross-chain transfer variants.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IbcTransferRequest {
    pub receiver: String,
    pub amount: String,
    pub denom: Option<String>,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default)]
    pub memo: String,
}

fn default_timeout_minutes() -> u64 {
    ibc::DEFAULT_TIMEOUT_MINUTES
}

pub struct SigningClient {
    credentials: Credentials,
    connector: Arc<dyn Connector>,
    identity: Mutex<Option<Arc<SigningIdentity>>>,
    session: Mutex<Option<Arc<dyn BroadcastSession>>>,
    metrics: Option<Metrics>,
}

impl SigningClient {
    /// Client that broadcasts through the network's consensus RPC endpoint.
    pub fn new(credentials: Credentials) -> Result<Self> {
        let rpc = RpcClient::new(&credentials.network.rpc)?;
        Ok(Self::with_connector(
            credentials,
            Arc::new(RpcConnector::new(rpc)),
        ))
    }

    pub fn with_connector(credentials: Credentials, connector: Arc<dyn Connector>) -> Self {
        Self {
            credentials,
            connector,
            identity: Mutex::new(None),
            session: Mutex::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub async fn identity(&self) -> Result<Arc<SigningIdentity>> {
        let mut slot = self.identity.lock().await;

        if let Some(identity) = slot.as_ref() {
            return Ok(identity.clone());
        }

        let identity = Arc::new(SigningIdentity::from_mnemonic(
            self.credentials.mnemonic()?,
            &self.credentials.hd_path,
            &self.credentials.prefix,
        )?);

        debug!(address = %identity.address(), "Derived signing identity");
        *slot = Some(identity.clone());

        Ok(identity)
    }

    pub async fn address(&self) -> Result<String> {
        Ok(self.identity().await?.address().to_string())
    }

    async fn session(&self) -> Result<Arc<dyn BroadcastSession>> {
        let mut slot = self.session.lock().await;

        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        let session = self.connector.connect().await?;
        *slot = Some(session.clone());

        Ok(session)
    }

    /// Release the cached session. Safe to call any number of times.
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();

        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Amount in base units. The network's base denom takes a decimal
    /// display amount; any other denom must already be an integer.
    fn base_coin(&self, amount: &str, denom: Option<&str>) -> Result<Coin> {
        let network = &self.credentials.network;
        let denom = denom
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(network.min_denom.as_str());

        let amount = if denom == network.min_denom {
            amount::to_base_units(amount, network.decimals)?
        } else {
            amount::parse_integer(amount)?.to_string()
        };

        Ok(Coin::new(amount, denom))
    }

    pub async fn send(
        &self,
        to: &str,
        amount: &str,
        denom: Option<&str>,
        memo: &str,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        let to = address::normalize(to);
        if !address::validate(&to, None) {
            return Err(Error::InvalidAddress(to));
        }

        let coin = self.base_coin(amount, denom)?;
        let from = self.address().await?;

        self.sign_and_broadcast(vec![Msg::send(&from, &to, coin)], memo, fee)
            .await
    }

    pub async fn delegate(
        &self,
        validator: &str,
        amount: &str,
        memo: &str,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        let validator = self.validator_address(validator)?;
        let coin = self.base_coin(amount, None)?;
        let delegator = self.address().await?;

        self.sign_and_broadcast(vec![Msg::delegate(&delegator, &validator, coin)], memo, fee)
            .await
    }

    pub async fn undelegate(
        &self,
        validator: &str,
        amount: &str,
        memo: &str,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        let validator = self.validator_address(validator)?;
        let coin = self.base_coin(amount, None)?;
        let delegator = self.address().await?;

        self.sign_and_broadcast(
            vec![Msg::undelegate(&delegator, &validator, coin)],
            memo,
            fee,
        )
        .await
    }

    pub async fn redelegate(
        &self,
        src_validator: &str,
        dst_validator: &str,
        amount: &str,
        memo: &str,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        let src = self.validator_address(src_validator)?;
        let dst = self.validator_address(dst_validator)?;
        let coin = self.base_coin(amount, None)?;
        let delegator = self.address().await?;

        self.sign_and_broadcast(
            vec![Msg::redelegate(&delegator, &src, &dst, coin)],
            memo,
            fee,
        )
        .await
    }

    pub async fn withdraw_reward(
        &self,
        validator: &str,
        memo: &str,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        self.withdraw_rewards(&[validator.to_string()], memo, fee)
            .await
    }

    /// One withdraw message per validator, in a single transaction.
    pub async fn withdraw_rewards(
        &self,
        validators: &[String],
        memo: &str,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        if validators.is_empty() {
            return Err(Error::InvalidAddress(
                "no validators to withdraw rewards from".to_string(),
            ));
        }

        let delegator = self.address().await?;
        let msgs = validators
            .iter()
            .map(|v| Ok(Msg::withdraw_reward(&delegator, &self.validator_address(v)?)))
            .collect::<Result<Vec<_>>>()?;

        self.sign_and_broadcast(msgs, memo, fee).await
    }

    pub async fn vote(
        &self,
        proposal_id: u64,
        option: VoteOption,
        memo: &str,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        let voter = self.address().await?;

        self.sign_and_broadcast(vec![Msg::vote(&voter, proposal_id, option)], memo, fee)
            .await
    }

    /// Transfer over an explicit channel. A bare channel number is accepted.
    pub async fn ibc_transfer_direct(
        &self,
        source_channel: &str,
        source_port: &str,
        request: &IbcTransferRequest,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        let params = TransferParams {
            source_port: ibc::canonical_port(source_port),
            source_channel: ibc::canonical_channel_id(source_channel),
            receiver: request.receiver.trim().to_string(),
            token: self.base_coin(&request.amount, request.denom.as_deref())?,
            timeout_timestamp: ibc::timeout_timestamp_nanos(Utc::now(), request.timeout_minutes)?,
            memo: request.memo.clone(),
        };

        if !address::validate(&params.receiver, None) {
            return Err(Error::InvalidAddress(params.receiver));
        }

        let sender = self.address().await?;
        self.sign_and_broadcast(vec![Msg::transfer(&sender, params)], "", fee)
            .await
    }

    /// Transfer to a chain from the static route table.
    pub async fn ibc_transfer(
        &self,
        destination: &str,
        request: &IbcTransferRequest,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        let route = ibc::lookup(destination)?;

        if !address::validate(request.receiver.trim(), Some(route.prefix)) {
            return Err(Error::InvalidAddress(format!(
                "{} is not a {} address",
                request.receiver, route.chain
            )));
        }

        self.ibc_transfer_direct(route.channel, route.port, request, fee)
            .await
    }

    /// Adjusted gas estimate for `msgs`, without broadcasting.
    pub async fn simulate(&self, msgs: &[Msg], memo: &str) -> Result<u64> {
        address::validate_memo(memo)?;

        let identity = self.identity().await?;
        let session = self.session().await?;
        let account = session.account(identity.address().as_ref()).await?;

        let placeholder = self.fee(0, 0)?;
        let tx_bytes = self.sign(&identity, session.as_ref(), account, msgs, memo, placeholder)?;
        let gas_used = session.simulate(&tx_bytes).await?;

        self.adjusted_gas(gas_used)
    }

    pub async fn sign_and_broadcast(
        &self,
        msgs: Vec<Msg>,
        memo: &str,
        fee: FeeSetting,
    ) -> Result<TxResult> {
        address::validate_memo(memo)?;

        let kind = msgs.first().map(Msg::kind).unwrap_or("empty");
        let identity = self.identity().await?;
        let session = self.session().await?;
        let account = session.account(identity.address().as_ref()).await?;

        let fee = match fee {
            FeeSetting::Explicit { amount, gas_limit } => {
                let base = amount::parse_integer(&amount.amount)?;
                let base = u128::try_from(base)
                    .map_err(|_| Error::InvalidAmount(amount.amount.clone()))?;
                fee_of(base, &amount.denom, gas_limit)?
            }
            FeeSetting::Auto => {
                let placeholder = self.fee(0, 0)?;
                let tx_bytes =
                    self.sign(&identity, session.as_ref(), account, &msgs, memo, placeholder)?;
                let gas_limit = self.adjusted_gas(session.simulate(&tx_bytes).await?)?;

                let price = ceil_below(gas_limit as f64 * self.credentials.gas_price, u128::MAX as f64)
                    .ok_or_else(|| Error::Signing(format!("fee for {gas_limit} gas is out of range")))?
                    as u128;
                debug!(gas_limit, fee = price, "Estimated fee");

                self.fee(price, gas_limit)?
            }
        };

        let tx_bytes = self.sign(&identity, session.as_ref(), account, &msgs, memo, fee)?;
        let result = session.broadcast(&tx_bytes).await?;

        if let Some(metrics) = &self.metrics {
            metrics.hubflow_broadcasts(kind, result.is_success());
        }

        if result.is_success() {
            info!(
                hash = %result.transaction_hash,
                height = result.height,
                gas_used = result.gas_used,
                "Transaction {kind} committed"
            );
        } else {
            warn!(
                hash = %result.transaction_hash,
                code = result.code,
                raw_log = %result.raw_log,
                "Transaction {kind} failed"
            );
        }

        Ok(result)
    }

    fn adjusted_gas(&self, gas_used: u64) -> Result<u64> {
        ceil_below(gas_used as f64 * self.credentials.gas_adjustment, u64::MAX as f64)
            .map(|gas| gas as u64)
            .ok_or_else(|| Error::Signing(format!("adjusted gas for {gas_used} is out of range")))
    }

    fn fee(&self, amount: u128, gas_limit: u64) -> Result<Fee> {
        fee_of(amount, &self.credentials.network.min_denom, gas_limit)
    }

    fn sign(
        &self,
        identity: &SigningIdentity,
        session: &dyn BroadcastSession,
        account: AccountInfo,
        msgs: &[Msg],
        memo: &str,
        fee: Fee,
    ) -> Result<Vec<u8>> {
        let body = Body::new(msgs.iter().map(Msg::to_any), memo, 0u32);
        let auth_info =
            SignerInfo::single_direct(Some(identity.public_key()), account.sequence).auth_info(fee);

        let sign_doc = SignDoc::new(&body, &auth_info, session.chain_id(), account.account_number)
            .map_err(Error::signing)?;

        sign_doc
            .sign(identity.key())
            .and_then(|raw| raw.to_bytes())
            .map_err(Error::signing)
    }

    fn validator_address(&self, validator: &str) -> Result<String> {
        let validator = address::normalize(validator);
        let expected = format!("{}{}", self.credentials.prefix, address::VALOPER_SUFFIX);

        if address::validate(&validator, Some(&expected)) {
            Ok(validator)
        } else {
            Err(Error::InvalidAddress(format!(
                "{validator} is not a {expected} address"
            )))
        }
    }
}

/// `value` rounded up, when that is finite, non-negative and below `limit`.
fn ceil_below(value: f64, limit: f64) -> Option<f64> {
    let value = value.ceil();
    (value.is_finite() && value >= 0.0 && value < limit).then_some(value)
}

fn fee_of(amount: u128, denom: &str, gas_limit: u64) -> Result<Fee> {
    let denom: Denom = denom
        .parse()
        .map_err(|e| Error::InvalidAmount(format!("fee denom {denom:?}: {e}")))?;

    Ok(Fee::from_amount_and_gas(
        cosmrs::Coin { denom, amount },
        gas_limit,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use cosmrs::{proto::cosmos::bank::v1beta1::MsgSend, tx::Tx};
    use prost::Message;

    use super::*;
    use crate::{
        client::testing::{FakeConnector, Recorder, PHRASE, RECIPIENT, SENDER, VALIDATOR},
        config::SignerSection,
        network::NetworkProfile,
    };

    fn client(code: u32) -> (SigningClient, Arc<Recorder>) {
        let signer = SignerSection {
            mnemonic: Some(PHRASE.to_string()),
            ..SignerSection::default()
        };
        let credentials = Credentials::new(NetworkProfile::mainnet().unwrap(), &signer).unwrap();
        let recorder = Arc::new(Recorder::default());

        let connector = Arc::new(FakeConnector {
            code,
            recorder: recorder.clone(),
        });

        (SigningClient::with_connector(credentials, connector), recorder)
    }

    fn last_tx(recorder: &Recorder) -> Tx {
        let bytes = recorder.broadcasts.lock().unwrap().last().cloned().unwrap();
        Tx::from_bytes(&bytes).unwrap()
    }

    #[tokio::test]
    async fn successful_send_with_auto_fee() {
        let (client, recorder) = client(0);

        let result = client
            .send(RECIPIENT, "1.5", None, "hello", FeeSetting::Auto)
            .await
            .unwrap();

        assert_eq!(result.code, 0);
        assert_eq!(result.height, 77);

        let tx = last_tx(&recorder);
        assert_eq!(tx.body.memo, "hello");
        assert_eq!(tx.auth_info.fee.gas_limit, 130_000);
        assert_eq!(tx.auth_info.fee.amount[0].amount, 3_250);
        assert_eq!(tx.auth_info.fee.amount[0].denom.as_ref(), "uatom");
        assert_eq!(tx.auth_info.signer_infos[0].sequence, 4);

        let any = &tx.body.messages[0];
        assert_eq!(any.type_url, "/cosmos.bank.v1beta1.MsgSend");
        let send = MsgSend::decode(any.value.as_slice()).unwrap();
        assert_eq!(send.from_address, SENDER);
        assert_eq!(send.to_address, RECIPIENT);
        assert_eq!(send.amount[0].amount, "1500000");

        client.disconnect().await;
    }

    #[tokio::test]
    async fn oversized_gas_estimates_are_rejected() {
        let huge = [
            SignerSection {
                gas_adjustment: 1e300,
                ..SignerSection::default()
            },
            SignerSection {
                gas_price: Some(1e300),
                ..SignerSection::default()
            },
        ];

        for signer in huge {
            let signer = SignerSection {
                mnemonic: Some(PHRASE.to_string()),
                ..signer
            };
            let credentials =
                Credentials::new(NetworkProfile::mainnet().unwrap(), &signer).unwrap();
            let recorder = Arc::new(Recorder::default());
            let connector = Arc::new(FakeConnector {
                code: 0,
                recorder: recorder.clone(),
            });
            let client = SigningClient::with_connector(credentials, connector);

            let result = client
                .send(RECIPIENT, "1", None, "", FeeSetting::Auto)
                .await;
            assert!(matches!(result, Err(Error::Signing(_))));
            assert!(recorder.broadcasts.lock().unwrap().is_empty());
        }

        assert_eq!(ceil_below(12.2, u64::MAX as f64), Some(13.0));
        assert_eq!(ceil_below(f64::NAN, u64::MAX as f64), None);
        assert_eq!(ceil_below(u64::MAX as f64, u64::MAX as f64), None);
    }

    #[tokio::test]
    async fn on_chain_failure_is_returned_as_data() {
        let (client, _) = client(5);

        let result = client
            .delegate(VALIDATOR, "1", "", FeeSetting::Auto)
            .await
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.code, 5);
        assert!(!result.raw_log.is_empty());
    }

    #[tokio::test]
    async fn explicit_fee_skips_simulation() {
        let (client, recorder) = client(0);

        client
            .vote(
                42,
                VoteOption::NoWithVeto,
                "",
                FeeSetting::Explicit {
                    amount: Coin::new("5000", "uatom"),
                    gas_limit: 200_000,
                },
            )
            .await
            .unwrap();

        let tx = last_tx(&recorder);
        assert_eq!(tx.auth_info.fee.gas_limit, 200_000);
        assert_eq!(tx.auth_info.fee.amount[0].amount, 5_000);
        assert_eq!(tx.body.messages[0].type_url, "/cosmos.gov.v1beta1.MsgVote");
    }

    #[tokio::test]
    async fn concurrent_first_use_opens_one_session() {
        let (client, recorder) = client(0);

        let (a, b) = tokio::join!(client.session(), client.session());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);

        let (a, b) = tokio::join!(client.identity(), client.identity());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (client, recorder) = client(0);

        client.disconnect().await;
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 0);

        client.session().await.unwrap();
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);

        // A later call reconnects lazily.
        client.session().await.unwrap();
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejects_bad_input_before_signing() {
        let (client, recorder) = client(0);

        let long_memo = "m".repeat(300);
        assert!(matches!(
            client.send(RECIPIENT, "1", None, &long_memo, FeeSetting::Auto).await,
            Err(Error::InvalidMemo(_))
        ));
        assert!(matches!(
            client.send("cosmos1bogus", "1", None, "", FeeSetting::Auto).await,
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            client.delegate(RECIPIENT, "1", "", FeeSetting::Auto).await,
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            client.send(RECIPIENT, "0.0000001", None, "", FeeSetting::Auto).await,
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            client.send(RECIPIENT, "1.5", Some("uosmo"), "", FeeSetting::Auto).await,
            Err(Error::InvalidAmount(_))
        ));

        let request = IbcTransferRequest {
            receiver: "osmo1hsk6jryyqjfhp5dhc55tc9jtckygx0eplp7aec".into(),
            amount: "1".into(),
            denom: None,
            timeout_minutes: 10,
            memo: String::new(),
        };
        assert!(matches!(
            client.ibc_transfer("mars", &request, FeeSetting::Auto).await,
            Err(Error::UnknownDestination(_))
        ));
        assert!(matches!(
            client.ibc_transfer("juno", &request, FeeSetting::Auto).await,
            Err(Error::InvalidAddress(_))
        ));

        assert!(recorder.broadcasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ibc_transfer_resolves_route() {
        use ibc_proto::ibc::apps::transfer::v1::MsgTransfer;

        let (client, recorder) = client(0);
        let request = IbcTransferRequest {
            receiver: "osmo1hsk6jryyqjfhp5dhc55tc9jtckygx0eplp7aec".into(),
            amount: "2".into(),
            denom: None,
            timeout_minutes: 10,
            memo: "to osmosis".into(),
        };

        let before = Utc::now().timestamp_nanos_opt().unwrap() as u64;
        client
            .ibc_transfer("Osmosis", &request, FeeSetting::Auto)
            .await
            .unwrap();

        let tx = last_tx(&recorder);
        let transfer = MsgTransfer::decode(tx.body.messages[0].value.as_slice()).unwrap();
        assert_eq!(transfer.source_channel, "channel-141");
        assert_eq!(transfer.source_port, "transfer");
        assert_eq!(transfer.memo, "to osmosis");
        assert_eq!(transfer.token.unwrap().amount, "2000000");
        assert!(transfer.timeout_timestamp >= before + 10 * 60 * 1_000_000_000);
        assert_eq!(transfer.timeout_height.unwrap().revision_height, 0);
    }

    #[tokio::test]
    async fn missing_mnemonic_is_a_signing_error() {
        let credentials =
            Credentials::new(NetworkProfile::mainnet().unwrap(), &SignerSection::default()).unwrap();
        let client = SigningClient::with_connector(
            credentials,
            Arc::new(FakeConnector {
                code: 0,
                recorder: Arc::default(),
            }),
        );

        assert!(matches!(client.address().await, Err(Error::Signing(_))));
    }
}
