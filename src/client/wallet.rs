use std::fmt;

use bip32::DerivationPath;
use bip39::{Language, Mnemonic};
use cosmrs::{
    crypto::{secp256k1::SigningKey, PublicKey},
    AccountId,
};

use crate::{Error, Result};

pub const DEFAULT_HD_PATH: &str = "m/44'/118'/0'/0/0";

/// Check a BIP-39 phrase (word list and checksum) without deriving anything.
/// Any standard length from 12 to 24 words is accepted.
pub fn validate_mnemonic(phrase: &str) -> Result<()> {
    parse_mnemonic(phrase).map(drop)
}

fn parse_mnemonic(phrase: &str) -> Result<Mnemonic> {
    let words = phrase.split_whitespace().collect::<Vec<_>>().join(" ");

    Mnemonic::parse_in_normalized(Language::English, &words)
        .map_err(|e| Error::Signing(format!("invalid mnemonic phrase: {e}")))
}

/// A secp256k1 key derived from a mnemonic, plus its account address.
pub struct SigningIdentity {
    key: SigningKey,
    public_key: PublicKey,
    address: AccountId,
}

impl SigningIdentity {
    pub fn from_mnemonic(phrase: &str, path: &DerivationPath, prefix: &str) -> Result<Self> {
        let seed = parse_mnemonic(phrase)?.to_seed("");

        let key = SigningKey::derive_from_path(seed, path).map_err(Error::signing)?;
        let public_key = key.public_key();
        let address = public_key.account_id(prefix).map_err(Error::signing)?;

        Ok(Self {
            key,
            public_key,
            address,
        })
    }

    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub(crate) fn key(&self) -> &SigningKey {
        &self.key
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address.as_ref())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const PHRASE_24: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art";

    fn path() -> DerivationPath {
        DEFAULT_HD_PATH.parse().unwrap()
    }

    #[test]
    fn derives_the_reference_address() {
        let identity = SigningIdentity::from_mnemonic(PHRASE, &path(), "cosmos").unwrap();
        assert_eq!(
            identity.address().as_ref(),
            "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4"
        );

        let osmo = SigningIdentity::from_mnemonic(PHRASE, &path(), "osmo").unwrap();
        assert_eq!(
            osmo.address().as_ref(),
            "osmo19rl4cm2hmr8afy4kldpxz3fka4jguq0a5m7df8"
        );
    }

    #[test]
    fn accepts_every_standard_length() {
        assert!(validate_mnemonic(PHRASE).is_ok());
        assert!(validate_mnemonic(PHRASE_24).is_ok());
        assert!(validate_mnemonic(&format!("  {}\n", PHRASE.replace(' ', "   "))).is_ok());

        let long = SigningIdentity::from_mnemonic(PHRASE_24, &path(), "cosmos").unwrap();
        let short = SigningIdentity::from_mnemonic(PHRASE, &path(), "cosmos").unwrap();
        assert!(long.address().as_ref().starts_with("cosmos1"));
        assert_ne!(long.address(), short.address());
    }

    #[test]
    fn other_paths_give_other_keys() {
        let other: DerivationPath = "m/44'/118'/0'/0/1".parse().unwrap();
        let identity = SigningIdentity::from_mnemonic(PHRASE, &other, "cosmos").unwrap();
        assert_ne!(
            identity.address().as_ref(),
            "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4"
        );
    }

    #[test]
    fn rejects_bad_phrases() {
        let bad_checksum = PHRASE.replace("about", "abandon");
        assert!(validate_mnemonic(&bad_checksum).is_err());
        assert!(validate_mnemonic("not a mnemonic").is_err());
        assert!(validate_mnemonic(PHRASE).is_ok());

        assert!(matches!(
            SigningIdentity::from_mnemonic("hello world", &path(), "cosmos"),
            Err(Error::Signing(_))
        ));
    }

    #[test]
    fn debug_does_not_leak_the_key() {
        let identity = SigningIdentity::from_mnemonic(PHRASE, &path(), "cosmos").unwrap();
        let debug = format!("{identity:?}");
        assert!(debug.contains("cosmos19rl4cm2"));
        assert!(!debug.contains("key"));
    }
}
