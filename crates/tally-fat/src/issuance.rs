//! Issuance entries: the signed declaration of a chain's token parameters.

use serde::Deserialize;
use tally_types::{Entry, TxError, TxResult};

/// Which token standard a chain follows. The set is closed; dispatch on it
/// is a plain match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum TokenType {
    #[serde(rename = "FAT-0")]
    Fat0,
    #[serde(rename = "FAT-1")]
    Fat1,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Fat0 => write!(f, "FAT-0"),
            TokenType::Fat1 => write!(f, "FAT-1"),
        }
    }
}

/// A validated issuance record.
#[derive(Clone, Debug)]
pub struct Issuance {
    pub token_type: TokenType,
    /// Maximum supply. Positive values are a hard cap; `-1` is unlimited.
    pub supply: i64,
    pub symbol: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IssuanceContent {
    #[serde(rename = "type")]
    token_type: TokenType,
    supply: i64,
    symbol: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl Issuance {
    /// Parse and signature-verify an issuance entry against the issuer
    /// identity's ID1 key.
    pub fn from_entry(e: &Entry, id1_key: &[u8; 32]) -> TxResult<Self> {
        crate::verify_id1(e, id1_key)?;

        let content: IssuanceContent = serde_json::from_slice(&e.content)
            .map_err(|err| TxError::Invalid(format!("issuance content: {err}")))?;
        if content.supply == 0 || content.supply < -1 {
            return Err(TxError::Invalid(format!(
                "supply must be positive or -1, got {}",
                content.supply
            )));
        }
        Ok(Self {
            token_type: content.token_type,
            supply: content.supply,
            symbol: content.symbol,
            metadata: content.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::sign_entry;
    use tally_crypto::ed25519::SigningKey;

    fn issue(content: &str, key: &SigningKey) -> Entry {
        let mut e = Entry::new([2u8; 32], vec![], content.as_bytes().to_vec());
        sign_entry(&mut e, b"987", &[key]);
        e
    }

    #[test]
    fn test_valid_fat0_issuance() {
        let key = SigningKey::generate();
        let e = issue(r#"{"type":"FAT-0","supply":1000,"symbol":"TST"}"#, &key);
        let iss = Issuance::from_entry(&e, &key.verifying_key().to_bytes()).expect("valid");
        assert_eq!(iss.token_type, TokenType::Fat0);
        assert_eq!(iss.supply, 1000);
        assert_eq!(iss.symbol.as_deref(), Some("TST"));
    }

    #[test]
    fn test_unlimited_supply() {
        let key = SigningKey::generate();
        let e = issue(r#"{"type":"FAT-1","supply":-1}"#, &key);
        let iss = Issuance::from_entry(&e, &key.verifying_key().to_bytes()).expect("valid");
        assert_eq!(iss.token_type, TokenType::Fat1);
        assert_eq!(iss.supply, -1);
    }

    #[test]
    fn test_zero_supply_rejected() {
        let key = SigningKey::generate();
        let e = issue(r#"{"type":"FAT-0","supply":0}"#, &key);
        assert!(Issuance::from_entry(&e, &key.verifying_key().to_bytes()).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let key = SigningKey::generate();
        let e = issue(r#"{"type":"FAT-9","supply":10}"#, &key);
        assert!(Issuance::from_entry(&e, &key.verifying_key().to_bytes()).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let key = SigningKey::generate();
        let e = issue(r#"{"type":"FAT-0","supply":10,"bogus":true}"#, &key);
        assert!(Issuance::from_entry(&e, &key.verifying_key().to_bytes()).is_err());
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let key = SigningKey::generate();
        let imposter = SigningKey::generate();
        let e = issue(r#"{"type":"FAT-0","supply":10}"#, &imposter);
        assert!(Issuance::from_entry(&e, &key.verifying_key().to_bytes()).is_err());
    }
}
