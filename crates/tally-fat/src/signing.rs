//! Entry signing, for tooling and tests.
//!
//! The indexer itself only verifies; this module is how fixtures and
//! command-line tools produce correctly signed issuance and transaction
//! entries.

use tally_crypto::{ed25519::SigningKey, rcd};
use tally_types::Entry;

use crate::signed_message;

/// Sign `content` on `chain_id` with the given keys, producing the full
/// external ID list: salt followed by one (RCD, signature) pair per key.
pub fn sign_entry(e: &mut Entry, salt: &[u8], keys: &[&SigningKey]) {
    let msg = signed_message(salt, &e.chain_id, &e.content);
    let mut ext_ids = Vec::with_capacity(1 + keys.len() * 2);
    ext_ids.push(salt.to_vec());
    for key in keys {
        let rcd = rcd::compose(&key.verifying_key());
        let sig = key.sign(&msg);
        ext_ids.push(rcd.to_vec());
        ext_ids.push(sig.to_bytes().to_vec());
    }
    e.ext_ids = ext_ids;
}
