use block_body::BlockBody;
use block_header::BlockHeader;
use crypto::{MinerId, SecretKey};
use network::{BLOCK_MAX_TRANSACTIONS, BLOCK_MAX_TRANSACTIONS_SIZE, TRANSACTION_MAX_SIZE};
use primitives::hash::H256;
use ser::{Deserializable, Error as SerError, Reader, Serializable, Stream};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;
use transaction::{Transaction, TransactionRef};
use transaction_id::TransactionId;
use transaction_id_chunk::{ChunkRef, TransactionIdChunk};
use MinersQueue;

pub type BlockRef = Arc<Block>;

/// A fully materialized block. Immutable once built. On the wire and in the
/// store the whole block travels behind a single compressed envelope.
#[derive(Debug, Clone)]
pub struct Block {
    header: BlockHeader,
    body: BlockBody,
    chunks: Vec<ChunkRef>,
    transactions: BTreeMap<TransactionId, TransactionRef>,
}

impl Block {
    /// Creates and signs a new block from an ordered list of transactions.
    pub fn create(
        id: u32,
        depth: u32,
        next_miners: Vec<MinerId>,
        transactions: Vec<TransactionRef>,
        prev_header_hash: H256,
        key: &SecretKey,
    ) -> BlockRef {
        assert!(!next_miners.is_empty() && transactions.len() <= BLOCK_MAX_TRANSACTIONS);

        let mut transactions_size = 0usize;
        let mut transactions_map = BTreeMap::new();
        let mut chunks = Vec::new();
        let mut chunk_ids = Vec::new();
        for transaction in &transactions {
            let transaction_id = transaction.id();
            assert!(transaction.size() > 0 && transaction.size() <= TRANSACTION_MAX_SIZE);
            transactions_size += transaction.size();
            transactions_map.insert(transaction_id, transaction.clone());
            chunk_ids.push(transaction_id);
            if chunk_ids.len() == TransactionIdChunk::CHUNK_SIZE {
                chunks.push(Arc::new(TransactionIdChunk::new(chunk_ids.split_off(0))));
            }
        }
        if !chunk_ids.is_empty() {
            chunks.push(Arc::new(TransactionIdChunk::new(chunk_ids)));
        }
        // ids must be unique
        assert_eq!(transactions_map.len(), transactions.len());
        assert!(transactions_size <= BLOCK_MAX_TRANSACTIONS_SIZE);

        let chunk_hashes = chunks.iter().map(|chunk| *chunk.hash()).collect();
        let body = BlockBody::new(
            transactions.len() as u32,
            transactions_size as u32,
            chunk_hashes,
        );
        let header = BlockHeader::new(id, depth, prev_header_hash, *body.hash(), next_miners, key);

        Arc::new(Block {
            header: header,
            body: body,
            chunks: chunks,
            transactions: transactions_map,
        })
    }

    /// Assembles a block from already-validated parts.
    pub fn from_parts(
        header: BlockHeader,
        body: BlockBody,
        chunks: Vec<ChunkRef>,
        transactions: BTreeMap<TransactionId, TransactionRef>,
    ) -> Block {
        Block {
            header: header,
            body: body,
            chunks: chunks,
            transactions: transactions,
        }
    }

    pub fn id(&self) -> u32 {
        self.header.id()
    }

    pub fn depth(&self) -> u32 {
        self.header.depth()
    }

    pub fn skipped_blocks(&self) -> u8 {
        self.header.skipped_blocks()
    }

    pub fn miner_id(&self) -> MinerId {
        self.header.miner_id()
    }

    pub fn next_miners(&self) -> &[MinerId] {
        self.header.next_miners()
    }

    pub fn next_miners_queue(&self) -> MinersQueue {
        self.header.next_miners_queue()
    }

    pub fn header_hash(&self) -> &H256 {
        self.header.hash()
    }

    pub fn prev_header_hash(&self) -> &H256 {
        self.header.prev_header_hash()
    }

    pub fn body_hash(&self) -> &H256 {
        self.header.body_hash()
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn body(&self) -> &BlockBody {
        &self.body
    }

    pub fn chunks(&self) -> &[ChunkRef] {
        &self.chunks
    }

    /// Number of transactions in the block.
    pub fn transactions_count(&self) -> usize {
        self.body.transactions() as usize
    }

    pub fn transactions_size(&self) -> usize {
        self.body.transactions_size() as usize
    }

    /// Transaction id at the given position of the recorded order.
    pub fn transaction_id(&self, index: usize) -> &TransactionId {
        let chunk = &self.chunks[index / TransactionIdChunk::CHUNK_SIZE];
        chunk.at(index % TransactionIdChunk::CHUNK_SIZE)
    }

    pub fn transaction(&self, id: &TransactionId) -> Option<TransactionRef> {
        self.transactions.get(id).cloned()
    }

    /// Transactions in the body's recorded order.
    pub fn ordered_transactions<'a>(&'a self) -> impl Iterator<Item = &'a TransactionRef> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.transaction_ids())
            .map(move |id| {
                self.transactions
                    .get(id)
                    .expect("chunk ids match the transactions map; qed")
            })
    }

    /// Validates structure, hashes, transaction linkage and the header
    /// signature against the expected miner and parent.
    pub fn validate(&self, expected_miner: &MinerId, prev_header_hash: &H256) -> bool {
        if self.header.prev_header_hash() != prev_header_hash {
            return false;
        }
        if !self.header.validate(expected_miner) {
            return false;
        }
        if self.header.body_hash() != self.body.hash() {
            return false;
        }

        // chunk linkage
        if self.transactions_count() != self.transactions.len() {
            return false;
        }
        if self.body.chunk_hashes().len() != self.chunks.len() {
            return false;
        }
        let expected_chunks = (self.transactions_count() + TransactionIdChunk::CHUNK_SIZE - 1)
            / TransactionIdChunk::CHUNK_SIZE;
        if expected_chunks != self.chunks.len() {
            return false;
        }
        for (hash, chunk) in self.body.chunk_hashes().iter().zip(self.chunks.iter()) {
            if hash != chunk.hash() {
                return false;
            }
        }

        // transaction linkage
        let mut transactions_size = 0usize;
        let mut unique_ids = BTreeSet::new();
        for chunk in &self.chunks {
            for transaction_id in chunk.transaction_ids() {
                if !unique_ids.insert(*transaction_id) {
                    return false;
                }
                let transaction = match self.transactions.get(transaction_id) {
                    Some(transaction) => transaction,
                    None => return false,
                };
                if transaction.id() != *transaction_id {
                    return false;
                }
                if transaction.size() != transaction_id.transaction_size() {
                    return false;
                }
                if transaction.size() == 0 || transaction.size() > TRANSACTION_MAX_SIZE {
                    return false;
                }
                transactions_size += transaction.size();
            }
        }

        if unique_ids.len() != self.transactions.len() {
            return false;
        }
        if self.transactions_size() != transactions_size {
            return false;
        }
        if transactions_size > BLOCK_MAX_TRANSACTIONS_SIZE {
            return false;
        }

        true
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header.hash() == other.header.hash()
    }
}

impl Eq for Block {}

impl Serializable for Block {
    fn serialize(&self, stream: &mut Stream) {
        let mut inner = Stream::default();
        inner.append(&self.header).append(&self.body);
        for transaction in self.ordered_transactions() {
            inner.append(&**transaction);
        }
        stream.append_compressed(&inner.out());
    }
}

impl Deserializable for Block {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, SerError>
    where
        T: io::Read,
    {
        let data = reader.read_compressed()?;
        let mut inner = Reader::new(&data);

        let header: BlockHeader = inner.read()?;
        let body: BlockBody = inner.read()?;

        let mut transactions = BTreeMap::new();
        let mut chunks = Vec::new();
        let mut chunk_ids = Vec::new();
        for _ in 0..body.transactions() {
            let transaction: Transaction = inner.read()?;
            let transaction_id = transaction.id();
            if transactions
                .insert(transaction_id, Arc::new(transaction))
                .is_some()
            {
                // transactions are not unique
                return Err(SerError::MalformedData);
            }
            chunk_ids.push(transaction_id);
            if chunk_ids.len() == TransactionIdChunk::CHUNK_SIZE {
                chunks.push(Arc::new(TransactionIdChunk::new(chunk_ids.split_off(0))));
            }
        }
        if !chunk_ids.is_empty() {
            chunks.push(Arc::new(TransactionIdChunk::new(chunk_ids)));
        }

        if !inner.is_finished() {
            return Err(SerError::UnreadData);
        }

        Ok(Block::from_parts(header, body, chunks, transactions))
    }
}

#[cfg(test)]
mod tests {
    use super::Block;
    use crypto::{sha256, MinerId, SecretKey, UserId};
    use primitives::hash::H256;
    use ser::{deserialize, serialize};
    use transaction::{Detail, Transaction};

    fn sample_block() -> (SecretKey, super::BlockRef) {
        let key = SecretKey::from_seed(b"miner");
        let transactions = (0..3)
            .map(|i| {
                Transaction::signed(
                    2,
                    Detail::Transfer {
                        to: UserId::from(&key.public()),
                        amount: 100 + i,
                    },
                    &key,
                )
            })
            .collect();
        let block = Block::create(
            2,
            2,
            vec![MinerId::from(&key.public())],
            transactions,
            H256::default(),
            &key,
        );
        (key, block)
    }

    #[test]
    fn test_block_round_trip() {
        let (key, block) = sample_block();
        let parsed: Block = deserialize(serialize(&*block).as_ref()).unwrap();

        assert_eq!(parsed.header_hash(), block.header_hash());
        assert_eq!(parsed.body_hash(), block.body_hash());
        let original_ids: Vec<_> = (0..block.transactions_count())
            .map(|i| *block.transaction_id(i))
            .collect();
        let parsed_ids: Vec<_> = (0..parsed.transactions_count())
            .map(|i| *parsed.transaction_id(i))
            .collect();
        assert_eq!(original_ids, parsed_ids);
        assert!(parsed.validate(&MinerId::from(&key.public()), &H256::default()));
    }

    #[test]
    fn test_block_validate_rejects_wrong_parent() {
        let (key, block) = sample_block();
        let wrong_parent = sha256(b"other parent");
        assert!(!block.validate(&MinerId::from(&key.public()), &wrong_parent));
    }

    #[test]
    fn test_block_transaction_lookup() {
        let (_, block) = sample_block();
        let id = *block.transaction_id(1);
        let transaction = block.transaction(&id).unwrap();
        assert_eq!(transaction.id(), id);
    }
}
