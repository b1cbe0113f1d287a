use std::{fmt, fs, path::Path, time::Duration};

use bip32::DerivationPath;
use serde::{Deserialize, Serialize};

use crate::{
    client::wallet::{self, DEFAULT_HD_PATH},
    filter::{EventCategory, FilterParams},
    network::{NetworkProfile, NetworkSection},
    subscription::SubscriptionOptions,
    Error, Result,
};

/// Environment variable consulted when `[signer]` carries no mnemonic.
pub const MNEMONIC_ENV: &str = "HUBFLOW_MNEMONIC";

#[derive(Clone, Debug)]
pub struct Config {
    pub network: NetworkProfile,
    pub credentials: Credentials,
    pub subscription: Subscription,
    pub metrics: Metrics,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub signer: SignerSection,
    #[serde(default)]
    pub subscription: SubscriptionSection,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SignerSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    #[serde(default = "crate::config::default::hd_path")]
    pub hd_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<f64>,
    #[serde(default = "crate::config::default::gas_adjustment")]
    pub gas_adjustment: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Default for SignerSection {
    fn default() -> Self {
        Self {
            mnemonic: None,
            hd_path: default::hd_path(),
            gas_price: None,
            gas_adjustment: default::gas_adjustment(),
            prefix: None,
        }
    }
}

impl fmt::Debug for SignerSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerSection")
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<redacted>"))
            .field("hd_path", &self.hd_path)
            .field("gas_price", &self.gas_price)
            .field("gas_adjustment", &self.gas_adjustment)
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionSection {
    #[serde(default = "crate::config::default::event")]
    pub event: EventCategory,
    pub watch_address: Option<String>,
    pub validator_address: Option<String>,
    pub proposal_id: Option<u64>,
    pub custom_query: Option<String>,
    #[serde(default)]
    pub include_raw: bool,
    #[serde(default = "crate::config::default::reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "crate::config::default::heartbeat_secs")]
    pub heartbeat_secs: u64,
    pub max_reconnects: Option<u32>,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            event: default::event(),
            watch_address: None,
            validator_address: None,
            proposal_id: None,
            custom_query: None,
            include_raw: false,
            reconnect_delay_secs: default::reconnect_delay_secs(),
            heartbeat_secs: default::heartbeat_secs(),
            max_reconnects: None,
        }
    }
}

/// A filter whose query already resolved, plus the engine's tunables.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub filter: FilterParams,
    pub query: String,
    pub options: SubscriptionOptions,
}

impl Subscription {
    pub fn new(section: &SubscriptionSection) -> Result<Self> {
        let filter = FilterParams {
            category: section.event,
            watch_address: section.watch_address.clone(),
            validator_address: section.validator_address.clone(),
            proposal_id: section.proposal_id,
            custom_query: section.custom_query.clone(),
        };

        let query = filter.build_query()?;

        if section.heartbeat_secs == 0 {
            return Err(Error::Config("heartbeat_secs must be positive".to_string()));
        }

        Ok(Self {
            filter,
            query,
            options: SubscriptionOptions {
                include_raw: section.include_raw,
                reconnect_delay: Duration::from_secs(section.reconnect_delay_secs),
                heartbeat: Duration::from_secs(section.heartbeat_secs),
                max_reconnects: section.max_reconnects,
            },
        })
    }
}

/// Validated signing configuration.
#[derive(Clone)]
pub struct Credentials {
    pub network: NetworkProfile,
    mnemonic: Option<String>,
    pub hd_path: DerivationPath,
    pub gas_price: f64,
    pub gas_adjustment: f64,
    pub prefix: String,
}

impl Credentials {
    /// Reject malformed mnemonics, paths, prefixes and gas settings up front.
    pub fn new(network: NetworkProfile, signer: &SignerSection) -> Result<Self> {
        let mnemonic = match signer.mnemonic.as_deref().map(str::trim) {
            Some(phrase) if !phrase.is_empty() => {
                wallet::validate_mnemonic(phrase)
                    .map_err(|_| Error::Config("mnemonic is not a valid BIP-39 phrase".into()))?;
                Some(phrase.to_string())
            }
            _ => None,
        };

        let hd_path: DerivationPath = signer
            .hd_path
            .parse()
            .map_err(|_| Error::Config(format!("invalid derivation path {:?}", signer.hd_path)))?;

        let prefix = signer
            .prefix
            .clone()
            .unwrap_or_else(|| network.prefix.clone());

        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(Error::Config(format!("invalid address prefix {prefix:?}")));
        }

        let gas_price = signer.gas_price.unwrap_or(network.gas_price);
        if !gas_price.is_finite() || gas_price < 0.0 {
            return Err(Error::Config(format!("invalid gas price {gas_price}")));
        }

        if !signer.gas_adjustment.is_finite() || signer.gas_adjustment <= 0.0 {
            return Err(Error::Config(format!(
                "invalid gas adjustment {}",
                signer.gas_adjustment
            )));
        }

        Ok(Self {
            network,
            mnemonic,
            hd_path,
            gas_price,
            gas_adjustment: signer.gas_adjustment,
            prefix,
        })
    }

    pub fn has_mnemonic(&self) -> bool {
        self.mnemonic.is_some()
    }

    pub fn mnemonic(&self) -> Result<&str> {
        self.mnemonic.as_deref().ok_or_else(|| {
            Error::Signing(format!(
                "no mnemonic configured; set [signer] mnemonic or {MNEMONIC_ENV}"
            ))
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("network", &self.network.chain_id)
            .field("has_mnemonic", &self.has_mnemonic())
            .field("hd_path", &self.hd_path.to_string())
            .field("gas_price", &self.gas_price)
            .field("gas_adjustment", &self.gas_adjustment)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        Self::parse(&content, std::env::var(MNEMONIC_ENV).ok())
    }

    /// Parse a TOML document. `env_mnemonic` fills in a missing `[signer] mnemonic`.
    pub fn parse(content: &str, env_mnemonic: Option<String>) -> Result<Self> {
        let mut raw: RawConfig = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        if raw.signer.mnemonic.is_none() {
            raw.signer.mnemonic = env_mnemonic;
        }

        let network = NetworkProfile::build(&raw.network)?;
        let credentials = Credentials::new(network.clone(), &raw.signer)?;
        let subscription = Subscription::new(&raw.subscription)?;

        Ok(Config {
            network,
            credentials,
            subscription,
            metrics: raw.metrics,
        })
    }
}

#[derive(Copy, Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Metrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "crate::config::default::metrics_port")]
    pub port: u16,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default::metrics_port(),
        }
    }
}

mod default {
    use super::*;

    pub fn hd_path() -> String {
        DEFAULT_HD_PATH.to_string()
    }

    pub fn gas_adjustment() -> f64 {
        1.3
    }

    pub fn event() -> EventCategory {
        EventCategory::NewBlock
    }

    pub fn reconnect_delay_secs() -> u64 {
        5
    }

    pub fn heartbeat_secs() -> u64 {
        30
    }

    pub fn metrics_port() -> u16 {
        3000
    }
}
