use crypto::sha256;
use network::BLOCK_TRANSACTIONS_PER_CHUNK;
use primitives::hash::H256;
use ser::{serialize, Deserializable, Error as SerError, Reader, Serializable, Stream};
use std::io;
use std::sync::Arc;
use transaction_id::TransactionId;

pub type ChunkRef = Arc<TransactionIdChunk>;

/// A fixed-size slice of a block's transaction id list. Chunks are addressed
/// by their hash, which appears at the same index in the block body.
#[derive(Debug, Clone)]
pub struct TransactionIdChunk {
    transaction_ids: Vec<TransactionId>,
    hash: H256,
}

impl TransactionIdChunk {
    pub const CHUNK_SIZE: usize = BLOCK_TRANSACTIONS_PER_CHUNK;

    pub fn new(transaction_ids: Vec<TransactionId>) -> TransactionIdChunk {
        assert!(
            !transaction_ids.is_empty() && transaction_ids.len() <= TransactionIdChunk::CHUNK_SIZE
        );
        let mut chunk = TransactionIdChunk {
            transaction_ids: transaction_ids,
            hash: H256::default(),
        };
        chunk.hash = sha256(&serialize(&chunk));
        chunk
    }

    pub fn hash(&self) -> &H256 {
        &self.hash
    }

    pub fn transaction_ids(&self) -> &[TransactionId] {
        &self.transaction_ids
    }

    pub fn at(&self, index: usize) -> &TransactionId {
        &self.transaction_ids[index]
    }

    pub fn len(&self) -> usize {
        self.transaction_ids.len()
    }
}

impl PartialEq for TransactionIdChunk {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for TransactionIdChunk {}

impl Serializable for TransactionIdChunk {
    fn serialize(&self, stream: &mut Stream) {
        stream.append_list::<TransactionId, TransactionId>(&self.transaction_ids);
    }
}

impl Deserializable for TransactionIdChunk {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, SerError>
    where
        T: io::Read,
    {
        let transaction_ids: Vec<TransactionId> =
            reader.read_list(TransactionIdChunk::CHUNK_SIZE)?;
        if transaction_ids.is_empty() {
            return Err(SerError::MalformedData);
        }

        let mut chunk = TransactionIdChunk {
            transaction_ids: transaction_ids,
            hash: H256::default(),
        };
        chunk.hash = sha256(&serialize(&chunk));
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::TransactionIdChunk;
    use crypto::sha256;
    use ser::{deserialize, serialize};
    use transaction_id::TransactionId;

    #[test]
    fn test_chunk_round_trip() {
        let ids: Vec<_> = (0..10)
            .map(|i| TransactionId::new(2, i, 100, sha256(&[i as u8])))
            .collect();
        let chunk = TransactionIdChunk::new(ids.clone());

        let parsed: TransactionIdChunk = deserialize(serialize(&chunk).as_ref()).unwrap();
        assert_eq!(parsed.hash(), chunk.hash());
        assert_eq!(parsed.transaction_ids(), &ids[..]);
    }

    #[test]
    fn test_empty_chunk_is_rejected() {
        // a chunk with no ids cannot come off the wire
        let raw = [0u8, 0u8];
        assert!(deserialize::<_, TransactionIdChunk>(&raw[..]).is_err());
    }
}
