//! # tally-fat
//!
//! Parsing and validation for the FAT token standards: issuance entries,
//! FAT-0 (fungible) and FAT-1 (non-fungible) transactions, the FAT-104
//! contract ABI and the FAT-107 Wasm data-store manifest.
//!
//! Everything here is pure: no storage, no network. A function either
//! produces a validated record or rejects the entry on the transaction
//! channel ([`TxError`]); there is no infrastructure failure mode.

pub mod fat0;
pub mod fat1;
pub mod fat104;
pub mod fat107;
pub mod issuance;
pub mod signing;

pub use issuance::{Issuance, TokenType};

use tally_crypto::{ed25519, rcd};
use tally_types::{ChainId, Entry, RcdHash, TxError, TxResult};

/// Build the name IDs of a token chain's first entry.
pub fn token_name_ids(token_id: &str, issuer_chain_id: &ChainId) -> Vec<Vec<u8>> {
    vec![
        b"token".to_vec(),
        token_id.as_bytes().to_vec(),
        b"issuer".to_vec(),
        issuer_chain_id.to_vec(),
    ]
}

/// Parse a first entry's external IDs as token chain name IDs, returning
/// the token id and issuer identity chain id.
pub fn parse_token_name_ids(ext_ids: &[Vec<u8>]) -> Option<(String, ChainId)> {
    if ext_ids.len() != 4 || ext_ids[0] != b"token" || ext_ids[2] != b"issuer" {
        return None;
    }
    let token_id = String::from_utf8(ext_ids[1].clone()).ok()?;
    let issuer: ChainId = ext_ids[3].clone().try_into().ok()?;
    Some((token_id, issuer))
}

/// The bytes a signed entry's signatures cover: salt, chain id, content.
fn signed_message(salt: &[u8], chain_id: &ChainId, content: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(salt.len() + 32 + content.len());
    msg.extend_from_slice(salt);
    msg.extend_from_slice(chain_id);
    msg.extend_from_slice(content);
    msg
}

/// One parsed (RCD, signature) pair from an entry's external IDs.
struct SignaturePair {
    key: ed25519::VerifyingKey,
    rcd_hash: RcdHash,
    sig: ed25519::Signature,
}

/// Split external IDs into the salt and its signature pairs, without yet
/// checking any signature.
fn split_ext_ids(e: &Entry) -> TxResult<(&[u8], Vec<SignaturePair>)> {
    if e.ext_ids.len() < 3 || e.ext_ids.len() % 2 != 1 {
        return Err(TxError::Invalid(
            "expected a salt followed by (RCD, signature) pairs".to_string(),
        ));
    }
    let salt = e.ext_ids[0].as_slice();
    let mut pairs = Vec::with_capacity((e.ext_ids.len() - 1) / 2);
    for pair in e.ext_ids[1..].chunks(2) {
        let key = rcd::parse(&pair[0])
            .map_err(|err| TxError::Invalid(format!("bad RCD: {err}")))?;
        let sig = ed25519::Signature::from_slice(&pair[1])
            .map_err(|err| TxError::Invalid(format!("bad signature: {err}")))?;
        pairs.push(SignaturePair {
            rcd_hash: rcd::hash(&pair[0]),
            key,
            sig,
        });
    }
    Ok((salt, pairs))
}

/// Verify that an entry carries exactly one signature pair, keyed by the
/// issuer identity's ID1 key. Used by issuance and coinbase entries.
pub(crate) fn verify_id1(e: &Entry, id1_key: &[u8; 32]) -> TxResult<()> {
    let (salt, pairs) = split_ext_ids(e)?;
    if pairs.len() != 1 {
        return Err(TxError::Invalid(
            "expected exactly one ID1 signature".to_string(),
        ));
    }
    let pair = &pairs[0];
    if pair.key.to_bytes() != *id1_key {
        return Err(TxError::Invalid("signature key is not ID1".to_string()));
    }
    let msg = signed_message(salt, &e.chain_id, &e.content);
    pair.key
        .verify(&msg, &pair.sig)
        .map_err(|_| TxError::Invalid("ID1 signature verification failed".to_string()))
}

/// Verify that an entry carries exactly one valid signature pair per input
/// address, and nothing else.
pub(crate) fn verify_inputs<I>(e: &Entry, inputs: I, count: usize) -> TxResult<()>
where
    I: Fn(&RcdHash) -> bool,
{
    let (salt, pairs) = split_ext_ids(e)?;
    if pairs.len() != count {
        return Err(TxError::Invalid(format!(
            "expected {count} signatures, found {}",
            pairs.len()
        )));
    }
    let msg = signed_message(salt, &e.chain_id, &e.content);
    let mut seen: Vec<RcdHash> = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        if !inputs(&pair.rcd_hash) {
            return Err(TxError::Invalid(format!(
                "signature by non-input address {}",
                tally_types::hash32_hex(&pair.rcd_hash)
            )));
        }
        if seen.contains(&pair.rcd_hash) {
            return Err(TxError::Invalid("duplicate signature".to_string()));
        }
        seen.push(pair.rcd_hash);
        pair.key
            .verify(&msg, &pair.sig)
            .map_err(|_| TxError::Invalid("input signature verification failed".to_string()))?;
    }
    Ok(())
}

/// Decode a JSON map keyed by hex RCD hashes.
pub(crate) fn parse_address_keys<V>(
    raw: std::collections::BTreeMap<String, V>,
) -> TxResult<std::collections::BTreeMap<RcdHash, V>> {
    let mut out = std::collections::BTreeMap::new();
    for (key, value) in raw {
        let adr = tally_types::parse_hash32(&key)
            .ok_or_else(|| TxError::Invalid(format!("bad address {key:?}")))?;
        out.insert(adr, value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_name_ids_roundtrip() {
        let issuer = [0x11u8; 32];
        let ids = token_name_ids("TST", &issuer);
        assert_eq!(parse_token_name_ids(&ids), Some(("TST".to_string(), issuer)));
    }

    #[test]
    fn test_parse_token_name_ids_rejects_malformed() {
        assert_eq!(parse_token_name_ids(&[]), None);
        assert_eq!(
            parse_token_name_ids(&[b"tkn".to_vec(), b"t".to_vec(), b"issuer".to_vec(), vec![0; 32]]),
            None
        );
        assert_eq!(
            parse_token_name_ids(&[b"token".to_vec(), b"t".to_vec(), b"issuer".to_vec(), vec![0; 8]]),
            None
        );
    }
}
