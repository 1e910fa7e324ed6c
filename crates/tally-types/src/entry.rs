//! Chain entries and their canonical binary form.
//!
//! The marshaled layout is `[version u8 = 0][chain id 32B][extids size u16 BE]
//! [for each ExtID: len u16 BE || bytes][content]`. The content hash is
//! `sha256(sha512(data) || data)` over that layout. Timestamps are not part
//! of the marshaled data; an entry inherits its enclosing block's timestamp.

use tally_crypto::hash;

use crate::{ChainId, EntryHash};

const ENTRY_VERSION: u8 = 0;

/// A single chain entry: ordered external IDs plus content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub chain_id: ChainId,
    pub ext_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
    /// Unix seconds, inherited from the enclosing block.
    pub timestamp: u64,
}

/// Errors unmarshaling an entry from its binary form.
#[derive(Debug, thiserror::Error)]
pub enum EntryDataError {
    #[error("entry data truncated")]
    Truncated,

    #[error("unsupported entry version {0}")]
    BadVersion(u8),

    #[error("external ID section size mismatch")]
    BadExtIdSize,
}

impl Entry {
    /// Build an entry on `chain_id` with no timestamp set.
    pub fn new(chain_id: ChainId, ext_ids: Vec<Vec<u8>>, content: Vec<u8>) -> Self {
        Self {
            chain_id,
            ext_ids,
            content,
            timestamp: 0,
        }
    }

    /// The canonical binary form.
    pub fn marshal_binary(&self) -> Vec<u8> {
        let ext_size: usize = self.ext_ids.iter().map(|x| 2 + x.len()).sum();
        let mut data = Vec::with_capacity(1 + 32 + 2 + ext_size + self.content.len());
        data.push(ENTRY_VERSION);
        data.extend_from_slice(&self.chain_id);
        data.extend_from_slice(&(ext_size as u16).to_be_bytes());
        for ext_id in &self.ext_ids {
            data.extend_from_slice(&(ext_id.len() as u16).to_be_bytes());
            data.extend_from_slice(ext_id);
        }
        data.extend_from_slice(&self.content);
        data
    }

    /// Decode the canonical binary form. The timestamp is left at zero.
    pub fn unmarshal_binary(data: &[u8]) -> Result<Self, EntryDataError> {
        if data.len() < 1 + 32 + 2 {
            return Err(EntryDataError::Truncated);
        }
        if data[0] != ENTRY_VERSION {
            return Err(EntryDataError::BadVersion(data[0]));
        }
        let mut chain_id = [0u8; 32];
        chain_id.copy_from_slice(&data[1..33]);
        let ext_size = u16::from_be_bytes([data[33], data[34]]) as usize;

        let mut pos = 35;
        let ext_end = pos + ext_size;
        if data.len() < ext_end {
            return Err(EntryDataError::Truncated);
        }
        let mut ext_ids = Vec::new();
        while pos < ext_end {
            if pos + 2 > ext_end {
                return Err(EntryDataError::BadExtIdSize);
            }
            let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            if pos + len > ext_end {
                return Err(EntryDataError::BadExtIdSize);
            }
            ext_ids.push(data[pos..pos + len].to_vec());
            pos += len;
        }

        Ok(Self {
            chain_id,
            ext_ids,
            content: data[ext_end..].to_vec(),
            timestamp: 0,
        })
    }

    /// The content hash of this entry.
    pub fn hash(&self) -> EntryHash {
        hash::entry_hash(&self.marshal_binary())
    }

    /// The chain id its external IDs would found, were this a first entry.
    pub fn derived_chain_id(&self) -> ChainId {
        hash::compute_chain_id(&self.ext_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entry {
        Entry::new(
            [7u8; 32],
            vec![b"token".to_vec(), b"TST".to_vec(), vec![], b"x".to_vec()],
            br#"{"supply":-1}"#.to_vec(),
        )
    }

    #[test]
    fn test_marshal_unmarshal_roundtrip() {
        let e = sample();
        let data = e.marshal_binary();
        let decoded = Entry::unmarshal_binary(&data).expect("decode");
        assert_eq!(decoded.chain_id, e.chain_id);
        assert_eq!(decoded.ext_ids, e.ext_ids);
        assert_eq!(decoded.content, e.content);
    }

    #[test]
    fn test_hash_is_stable_across_roundtrip() {
        let e = sample();
        let decoded = Entry::unmarshal_binary(&e.marshal_binary()).expect("decode");
        assert_eq!(e.hash(), decoded.hash());
    }

    #[test]
    fn test_empty_ext_ids_and_content() {
        let e = Entry::new([0u8; 32], vec![], vec![]);
        let decoded = Entry::unmarshal_binary(&e.marshal_binary()).expect("decode");
        assert!(decoded.ext_ids.is_empty());
        assert!(decoded.content.is_empty());
    }

    #[test]
    fn test_unmarshal_rejects_truncated() {
        let e = sample();
        let data = e.marshal_binary();
        assert!(Entry::unmarshal_binary(&data[..10]).is_err());
        assert!(Entry::unmarshal_binary(&data[..34]).is_err());
    }

    #[test]
    fn test_unmarshal_rejects_bad_version() {
        let mut data = sample().marshal_binary();
        data[0] = 9;
        assert!(matches!(
            Entry::unmarshal_binary(&data),
            Err(EntryDataError::BadVersion(9))
        ));
    }

    #[test]
    fn test_unmarshal_rejects_bad_ext_id_size() {
        let e = sample();
        let mut data = e.marshal_binary();
        // Corrupt the inner length of the first ExtID so it overruns the
        // declared section size.
        data[36] = 0xff;
        assert!(Entry::unmarshal_binary(&data).is_err());
    }
}
