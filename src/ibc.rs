//! Static cross-chain routes from the Hub and ICS-20 helpers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{Error, Result};

pub const TRANSFER_PORT: &str = "transfer";
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 10;

const CHANNEL_PREFIX: &str = "channel-";
const IBC_DENOM_PREFIX: &str = "ibc/";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IbcChannelRoute {
    pub chain: &'static str,
    pub chain_id: &'static str,
    pub channel: &'static str,
    pub port: &'static str,
    pub counterparty_channel: &'static str,
    pub counterparty_port: &'static str,
    pub prefix: &'static str,
    pub denom: &'static str,
}

const fn route(
    chain: &'static str,
    chain_id: &'static str,
    channel: &'static str,
    counterparty_channel: &'static str,
    prefix: &'static str,
    denom: &'static str,
) -> IbcChannelRoute {
    IbcChannelRoute {
        chain,
        chain_id,
        channel,
        port: TRANSFER_PORT,
        counterparty_channel,
        counterparty_port: TRANSFER_PORT,
        prefix,
        denom,
    }
}

/// Destination key to route, in display order.
pub static ROUTES: &[(&str, IbcChannelRoute)] = &[
    ("osmosis", route("Osmosis", "osmosis-1", "channel-141", "channel-0", "osmo", "uosmo")),
    ("juno", route("Juno", "juno-1", "channel-207", "channel-1", "juno", "ujuno")),
    ("secret", route("Secret Network", "secret-4", "channel-235", "channel-0", "secret", "uscrt")),
    ("stargaze", route("Stargaze", "stargaze-1", "channel-730", "channel-239", "stars", "ustars")),
    ("noble", route("Noble", "noble-1", "channel-536", "channel-4", "noble", "uusdc")),
    ("akash", route("Akash", "akashnet-2", "channel-184", "channel-17", "akash", "uakt")),
    ("kava", route("Kava", "kava_2222-10", "channel-277", "channel-0", "kava", "ukava")),
    ("injective", route("Injective", "injective-1", "channel-220", "channel-1", "inj", "inj")),
    ("stride", route("Stride", "stride-1", "channel-391", "channel-0", "stride", "ustrd")),
    ("celestia", route("Celestia", "celestia", "channel-617", "channel-1", "celestia", "utia")),
    ("dydx", route("dYdX", "dydx-mainnet-1", "channel-750", "channel-0", "dydx", "adydx")),
    ("neutron", route("Neutron", "neutron-1", "channel-569", "channel-1", "neutron", "untrn")),
];

/// Case-insensitive lookup of a destination key.
pub fn lookup(destination: &str) -> Result<&'static IbcChannelRoute> {
    let key = destination.trim().to_ascii_lowercase();

    ROUTES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, route)| route)
        .ok_or_else(|| Error::UnknownDestination(destination.to_string()))
}

pub fn destinations() -> impl Iterator<Item = (&'static str, &'static IbcChannelRoute)> {
    ROUTES.iter().map(|(k, route)| (*k, route))
}

/// `"141"` becomes `"channel-141"`; already canonical ids pass through.
pub fn canonical_channel_id(channel: &str) -> String {
    let channel = channel.trim();
    if channel.starts_with(CHANNEL_PREFIX) {
        channel.to_string()
    } else {
        format!("{CHANNEL_PREFIX}{channel}")
    }
}

pub fn canonical_port(port: &str) -> String {
    let port = port.trim();
    if port.is_empty() {
        TRANSFER_PORT.to_string()
    } else {
        port.to_string()
    }
}

pub fn is_channel_id(channel: &str) -> bool {
    channel
        .strip_prefix(CHANNEL_PREFIX)
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Timeout `minutes` after `now`, as nanoseconds since the Unix epoch.
pub fn timeout_timestamp_nanos(now: DateTime<Utc>, minutes: u64) -> Result<u64> {
    let out_of_range = || Error::Protocol(format!("timeout of {minutes} minutes is out of range"));

    let delta = i64::try_from(minutes)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .ok_or_else(out_of_range)?;
    let deadline = now.checked_add_signed(delta).ok_or_else(out_of_range)?;

    let nanos = deadline
        .timestamp_nanos_opt()
        .ok_or_else(|| Error::Protocol("timeout timestamp overflows".to_string()))?;

    u64::try_from(nanos).map_err(|_| Error::Protocol("timeout timestamp before epoch".to_string()))
}

pub fn is_ibc_denom(denom: &str) -> bool {
    denom.starts_with(IBC_DENOM_PREFIX)
}

/// Trace hash of an `ibc/<hash>` voucher denom.
pub fn ibc_denom_hash(denom: &str) -> Option<&str> {
    denom.strip_prefix(IBC_DENOM_PREFIX).filter(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn every_route_is_well_formed() {
        assert_eq!(ROUTES.len(), 12);

        for (key, route) in destinations() {
            assert_eq!(key, key.to_ascii_lowercase());
            assert!(is_channel_id(route.channel), "{key}: {}", route.channel);
            assert!(is_channel_id(route.counterparty_channel), "{key}");
            assert_eq!(route.port, TRANSFER_PORT);
            assert_eq!(route.counterparty_port, TRANSFER_PORT);
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let osmosis = lookup("Osmosis").unwrap();
        assert_eq!(osmosis.channel, "channel-141");
        assert_eq!(osmosis.prefix, "osmo");
        assert_eq!(lookup("NEUTRON").unwrap().denom, "untrn");

        assert!(matches!(
            lookup("ethereum"),
            Err(Error::UnknownDestination(d)) if d == "ethereum"
        ));
    }

    #[test]
    fn canonicalizes_channel_and_port() {
        assert_eq!(canonical_channel_id("141"), "channel-141");
        assert_eq!(canonical_channel_id("channel-0"), "channel-0");
        assert_eq!(canonical_port(""), "transfer");
        assert_eq!(canonical_port("icahost"), "icahost");

        assert!(is_channel_id("channel-7"));
        assert!(!is_channel_id("channel-"));
        assert!(!is_channel_id("chan-7"));
        assert!(!is_channel_id("channel-7a"));
    }

    #[test]
    fn computes_timeout_nanos() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let nanos = timeout_timestamp_nanos(now, DEFAULT_TIMEOUT_MINUTES).unwrap();

        assert_eq!(nanos, (1_704_067_200 + 600) * 1_000_000_000);
        assert_eq!(
            timeout_timestamp_nanos(now, 0).unwrap(),
            1_704_067_200 * 1_000_000_000
        );
    }

    #[test]
    fn out_of_range_timeouts_are_errors() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for minutes in [
            u64::MAX,
            1_000_000_000_000_000,
            1_000_000_000_000,
            // Past the year 2262, which no longer fits in i64 nanoseconds.
            300 * 366 * 24 * 60,
        ] {
            assert!(
                matches!(timeout_timestamp_nanos(now, minutes), Err(Error::Protocol(_))),
                "{minutes} minutes"
            );
        }
    }

    #[test]
    fn ibc_denoms() {
        let denom = "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2";
        assert!(is_ibc_denom(denom));
        assert_eq!(
            ibc_denom_hash(denom),
            Some("27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2")
        );
        assert!(!is_ibc_denom("uatom"));
        assert_eq!(ibc_denom_hash("uatom"), None);
        assert_eq!(ibc_denom_hash("ibc/"), None);
    }

    #[test]
    fn routes_serialize_camel_case() {
        let json = serde_json::to_value(lookup("noble").unwrap()).unwrap();
        assert_eq!(json["chainId"], "noble-1");
        assert_eq!(json["counterpartyChannel"], "channel-4");
    }
}
