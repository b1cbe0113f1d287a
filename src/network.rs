use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tendermint::chain;
use tendermint_rpc::WebSocketClientUrl;
use url::Url;

use crate::{Error, Result};

/// Built-in network selector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    #[default]
    Mainnet,
    Testnet,
    Custom,
}

impl FromStr for NetworkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "custom" => Ok(Self::Custom),
            other => Err(Error::Config(format!(
                "unknown network {other:?}, available: mainnet, testnet, custom"
            ))),
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

struct Preset {
    chain_id: &'static str,
    lcd: &'static str,
    rpc: &'static str,
    websocket: &'static str,
    explorer: &'static str,
}

const MAINNET: Preset = Preset {
    chain_id: "cosmoshub-4",
    lcd: "https://rest.cosmos.directory/cosmoshub",
    rpc: "https://rpc.cosmos.directory/cosmoshub",
    websocket: "wss://rpc.cosmos.directory/cosmoshub/websocket",
    explorer: "https://www.mintscan.io/cosmos",
};

const TESTNET: Preset = Preset {
    chain_id: "theta-testnet-001",
    lcd: "https://rest.state-sync-01.theta-testnet.polypore.xyz",
    rpc: "https://rpc.state-sync-01.theta-testnet.polypore.xyz",
    websocket: "wss://rpc.state-sync-01.theta-testnet.polypore.xyz/websocket",
    explorer: "https://explorer.theta-testnet.polypore.xyz",
};

pub const DEFAULT_PREFIX: &str = "cosmos";
pub const DEFAULT_DENOM: &str = "ATOM";
pub const DEFAULT_MIN_DENOM: &str = "uatom";
pub const DEFAULT_DECIMALS: u32 = 6;
pub const DEFAULT_GAS_PRICE: f64 = 0.025;

/// `[network]` section as written by the user. Every field except the
/// selector is optional and overrides the preset when present.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    #[serde(default)]
    pub name: NetworkKind,
    pub lcd: Option<String>,
    pub rpc: Option<String>,
    pub websocket: Option<String>,
    pub chain_id: Option<String>,
    pub prefix: Option<String>,
    pub denom: Option<String>,
    pub min_denom: Option<String>,
    pub decimals: Option<u32>,
    pub gas_price: Option<f64>,
    pub explorer: Option<String>,
}

/// Immutable per-chain connection defaults.
#[derive(Clone, Debug)]
pub struct NetworkProfile {
    pub kind: NetworkKind,
    pub chain_id: chain::Id,
    pub lcd: Url,
    pub rpc: Url,
    pub websocket: WebSocketClientUrl,
    pub prefix: String,
    pub denom: String,
    pub min_denom: String,
    pub decimals: u32,
    pub gas_price: f64,
    pub explorer: Option<String>,
}

impl NetworkProfile {
    pub fn mainnet() -> Result<Self> {
        Self::build(&NetworkSection::default())
    }

    pub fn testnet() -> Result<Self> {
        Self::build(&NetworkSection {
            name: NetworkKind::Testnet,
            ..Default::default()
        })
    }

    /// Resolve a preset and apply the section's overrides on top of it.
    ///
    /// A custom network needs at least `lcd` and `rpc`; when `websocket` is
    /// absent it is derived from `rpc`.
    pub fn build(section: &NetworkSection) -> Result<Self> {
        let preset = match section.name {
            NetworkKind::Mainnet => Some(&MAINNET),
            NetworkKind::Testnet => Some(&TESTNET),
            NetworkKind::Custom => None,
        };

        let lcd = section
            .lcd
            .as_deref()
            .or(preset.map(|p| p.lcd))
            .ok_or_else(|| Error::Config("custom network requires `lcd`".to_string()))?;

        let rpc = section
            .rpc
            .as_deref()
            .or(preset.map(|p| p.rpc))
            .ok_or_else(|| Error::Config("custom network requires `rpc`".to_string()))?;

        let lcd = parse_http_url("lcd", lcd)?;
        let rpc = parse_http_url("rpc", rpc)?;

        let websocket = match section.websocket.as_deref().or(preset.map(|p| p.websocket)) {
            Some(ws) => ws.to_string(),
            None => websocket_from_rpc(&rpc)?,
        };

        let websocket = WebSocketClientUrl::from_str(&websocket)
            .map_err(|e| Error::Config(format!("invalid websocket url {websocket:?}: {e}")))?;

        let chain_id = section
            .chain_id
            .as_deref()
            .or(preset.map(|p| p.chain_id))
            .unwrap_or("custom-chain");

        let chain_id = chain::Id::from_str(chain_id)
            .map_err(|e| Error::Config(format!("invalid chain id {chain_id:?}: {e}")))?;

        let prefix = section.prefix.clone().unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(Error::Config(format!("invalid address prefix {prefix:?}")));
        }

        let gas_price = section.gas_price.unwrap_or(DEFAULT_GAS_PRICE);
        if !gas_price.is_finite() || gas_price < 0.0 {
            return Err(Error::Config(format!("invalid gas price {gas_price}")));
        }

        Ok(Self {
            kind: section.name,
            chain_id,
            lcd,
            rpc,
            websocket,
            prefix,
            denom: section.denom.clone().unwrap_or_else(|| DEFAULT_DENOM.to_string()),
            min_denom: section
                .min_denom
                .clone()
                .unwrap_or_else(|| DEFAULT_MIN_DENOM.to_string()),
            decimals: section.decimals.unwrap_or(DEFAULT_DECIMALS),
            gas_price,
            explorer: section
                .explorer
                .clone()
                .or(preset.map(|p| p.explorer.to_string())),
        })
    }
}

fn parse_http_url(name: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("invalid {name} url {raw:?}: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!(
            "{name} url must be http or https, got {other}"
        ))),
    }
}

fn websocket_from_rpc(rpc: &Url) -> Result<String> {
    let scheme = if rpc.scheme() == "https" { "wss" } else { "ws" };
    let mut ws = rpc.clone();
    ws.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("cannot derive websocket url from {rpc}")))?;

    let path = format!("{}/websocket", ws.path().trim_end_matches('/'));
    ws.set_path(&path);

    Ok(ws.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let main = NetworkProfile::mainnet().unwrap();
        assert_eq!(main.chain_id.as_str(), "cosmoshub-4");
        assert_eq!(main.prefix, "cosmos");
        assert_eq!(main.min_denom, "uatom");
        assert_eq!(main.decimals, 6);
        assert_eq!(main.lcd.as_str(), "https://rest.cosmos.directory/cosmoshub");
        assert_eq!(
            main.websocket.to_string(),
            "wss://rpc.cosmos.directory/cosmoshub/websocket"
        );

        let test = NetworkProfile::testnet().unwrap();
        assert_eq!(test.chain_id.as_str(), "theta-testnet-001");
        assert_eq!(test.kind, NetworkKind::Testnet);
    }

    #[test]
    fn unknown_selector_is_rejected() {
        assert!(matches!(
            "devnet".parse::<NetworkKind>(),
            Err(Error::Config(_))
        ));
        assert_eq!("TestNet".parse::<NetworkKind>().unwrap(), NetworkKind::Testnet);

        let err = toml::from_str::<NetworkSection>("name = \"devnet\"");
        assert!(err.is_err());
    }

    #[test]
    fn overrides_apply_on_top_of_preset() {
        let section = NetworkSection {
            rpc: Some("http://127.0.0.1:26657".to_string()),
            gas_price: Some(0.1),
            ..Default::default()
        };

        let profile = NetworkProfile::build(&section).unwrap();
        assert_eq!(profile.rpc.as_str(), "http://127.0.0.1:26657/");
        assert_eq!(profile.chain_id.as_str(), "cosmoshub-4");
        assert_eq!(profile.gas_price, 0.1);
    }

    #[test]
    fn custom_network_derives_websocket() {
        let section = NetworkSection {
            name: NetworkKind::Custom,
            lcd: Some("http://localhost:1317".to_string()),
            rpc: Some("https://rpc.example.com/hub".to_string()),
            chain_id: Some("localhub-1".to_string()),
            prefix: Some("osmo".to_string()),
            ..Default::default()
        };

        let profile = NetworkProfile::build(&section).unwrap();
        assert_eq!(
            profile.websocket.to_string(),
            "wss://rpc.example.com/hub/websocket"
        );
        assert_eq!(profile.prefix, "osmo");
        assert_eq!(profile.explorer, None);
    }

    #[test]
    fn custom_network_requires_endpoints() {
        let section = NetworkSection {
            name: NetworkKind::Custom,
            ..Default::default()
        };
        assert!(matches!(
            NetworkProfile::build(&section),
            Err(Error::Config(_))
        ));

        let section = NetworkSection {
            lcd: Some("ftp://nope".to_string()),
            ..Default::default()
        };
        assert!(NetworkProfile::build(&section).is_err());

        let section = NetworkSection {
            prefix: Some("Cosmos".to_string()),
            ..Default::default()
        };
        assert!(NetworkProfile::build(&section).is_err());
    }
}
