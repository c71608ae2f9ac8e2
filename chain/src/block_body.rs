use crypto::sha256;
use network::{BLOCK_MAX_TRANSACTIONS, BLOCK_MAX_TRANSACTIONS_SIZE, BLOCK_TRANSACTIONS_PER_CHUNK};
use primitives::hash::H256;
use ser::{serialize, Deserializable, Error as SerError, Reader, Serializable, Stream};
use std::io;

/// Highest block version this node understands.
pub const MAX_SUPPORTED_VERSION: u8 = 1;

/// Block body: transaction statistics plus the hash of every transaction-id
/// chunk. The chunk hashes are what ties the three-level block download
/// protocol together.
#[derive(Debug, Clone)]
pub struct BlockBody {
    version: u8,
    max_version: u8,
    transactions: u32,
    transactions_size: u32,
    chunk_hashes: Vec<H256>,
    hash: H256,
}

impl BlockBody {
    pub fn new(transactions: u32, transactions_size: u32, chunk_hashes: Vec<H256>) -> BlockBody {
        let mut body = BlockBody {
            version: 1,
            max_version: MAX_SUPPORTED_VERSION,
            transactions: transactions,
            transactions_size: transactions_size,
            chunk_hashes: chunk_hashes,
            hash: H256::default(),
        };
        body.hash = sha256(&serialize(&body));
        body
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn max_version(&self) -> u8 {
        self.max_version
    }

    pub fn transactions(&self) -> u32 {
        self.transactions
    }

    pub fn transactions_size(&self) -> u32 {
        self.transactions_size
    }

    pub fn chunk_hashes(&self) -> &[H256] {
        &self.chunk_hashes
    }

    pub fn hash(&self) -> &H256 {
        &self.hash
    }

    fn expected_chunks(transactions: u32) -> usize {
        (transactions as usize + BLOCK_TRANSACTIONS_PER_CHUNK - 1) / BLOCK_TRANSACTIONS_PER_CHUNK
    }
}

impl PartialEq for BlockBody {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for BlockBody {}

impl Serializable for BlockBody {
    fn serialize(&self, stream: &mut Stream) {
        stream
            .append(&self.version)
            .append(&self.max_version)
            .append(&self.transactions)
            .append(&self.transactions_size);
        stream.append_list_u8::<H256, H256>(&self.chunk_hashes);
    }
}

impl Deserializable for BlockBody {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, SerError>
    where
        T: io::Read,
    {
        let version: u8 = reader.read()?;
        if version != 1 {
            return Err(SerError::MalformedData);
        }
        let max_version: u8 = reader.read()?;
        if max_version < version {
            return Err(SerError::MalformedData);
        }

        let transactions: u32 = reader.read()?;
        if transactions as usize > BLOCK_MAX_TRANSACTIONS {
            return Err(SerError::MalformedData);
        }
        let transactions_size: u32 = reader.read()?;
        if transactions_size as usize > BLOCK_MAX_TRANSACTIONS_SIZE {
            return Err(SerError::MalformedData);
        }

        let chunk_hashes: Vec<H256> = reader.read_list_u8(u8::max_value() as usize)?;
        if chunk_hashes.len() != BlockBody::expected_chunks(transactions) {
            return Err(SerError::MalformedData);
        }

        let mut body = BlockBody {
            version: version,
            max_version: max_version,
            transactions: transactions,
            transactions_size: transactions_size,
            chunk_hashes: chunk_hashes,
            hash: H256::default(),
        };
        body.hash = sha256(&serialize(&body));
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::BlockBody;
    use crypto::sha256;
    use ser::{deserialize, serialize};

    #[test]
    fn test_body_round_trip() {
        let body = BlockBody::new(3, 1024, vec![sha256(b"chunk")]);
        let parsed: BlockBody = deserialize(serialize(&body).as_ref()).unwrap();
        assert_eq!(parsed.hash(), body.hash());
        assert_eq!(parsed.transactions(), 3);
        assert_eq!(parsed.transactions_size(), 1024);
    }

    #[test]
    fn test_body_rejects_wrong_chunk_count() {
        let body = BlockBody::new(2000, 64000, vec![sha256(b"one")]);
        // 2000 transactions require two chunks, only one hash present
        assert!(deserialize::<_, BlockBody>(serialize(&body).as_ref()).is_err());
    }

    #[test]
    fn test_empty_body() {
        let body = BlockBody::new(0, 0, vec![]);
        let parsed: BlockBody = deserialize(serialize(&body).as_ref()).unwrap();
        assert_eq!(parsed.chunk_hashes().len(), 0);
    }
}
