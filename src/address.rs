//! Bech32 account, validator and consensus address handling.

use subtle_encoding::bech32;

use crate::{Error, Result};

pub const VALOPER_SUFFIX: &str = "valoper";
pub const VALCONS_SUFFIX: &str = "valcons";

pub const MAX_MEMO_BYTES: usize = 256;

/// A decoded address: human-readable prefix plus raw payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub prefix: String,
    pub payload: Vec<u8>,
}

/// Checksum-decode a bech32 address.
pub fn decode(address: &str) -> Result<Decoded> {
    let (prefix, payload) = bech32::decode(address)
        .map_err(|e| Error::InvalidAddress(format!("{address}: {e}")))?;

    if payload.is_empty() {
        return Err(Error::InvalidAddress(format!("{address}: empty payload")));
    }

    Ok(Decoded { prefix, payload })
}

pub fn encode(prefix: &str, payload: &[u8]) -> Result<String> {
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
        return Err(Error::InvalidAddress(format!("invalid prefix {prefix:?}")));
    }

    Ok(bech32::encode(prefix, payload))
}

/// True iff `address` decodes and, when given, carries exactly `expected_prefix`.
pub fn validate(address: &str, expected_prefix: Option<&str>) -> bool {
    match decode(address) {
        Ok(decoded) => expected_prefix.map_or(true, |p| decoded.prefix == p),
        Err(_) => false,
    }
}

/// Re-encode the payload of `address` under `new_prefix`.
pub fn reencode(address: &str, new_prefix: &str) -> Result<String> {
    let decoded = decode(address)?;
    encode(new_prefix, &decoded.payload)
}

pub fn prefix_of(address: &str) -> Option<String> {
    decode(address).ok().map(|d| d.prefix)
}

pub fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Account address to validator operator address, e.g. `cosmos1…` to `cosmosvaloper1…`.
pub fn to_validator(address: &str, account_prefix: &str) -> Result<String> {
    reencode(address, &format!("{account_prefix}{VALOPER_SUFFIX}"))
}

pub fn to_consensus(address: &str, account_prefix: &str) -> Result<String> {
    reencode(address, &format!("{account_prefix}{VALCONS_SUFFIX}"))
}

pub fn to_account(address: &str, account_prefix: &str) -> Result<String> {
    reencode(address, account_prefix)
}

/// Shorten for display: `first keep + "..." + last keep`.
pub fn shorten(address: &str, keep: usize) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 2 * keep + 3 {
        return address.to_string();
    }

    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{head}...{tail}")
}

pub fn validate_memo(memo: &str) -> Result<()> {
    if memo.len() > MAX_MEMO_BYTES {
        return Err(Error::InvalidMemo(format!(
            "memo is {} bytes, at most {MAX_MEMO_BYTES} allowed",
            memo.len()
        )));
    }

    Ok(())
}
