use block::Block;
use block_body::BlockBody;
use block_header::BlockHeader;
use crypto::MinerId;
use parking_lot::RwLock;
use primitives::hash::H256;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use transaction::TransactionRef;
use transaction_id::TransactionId;
use transaction_id_chunk::ChunkRef;

pub type PendingBlockRef = Arc<PendingBlock>;

/// What the pending block is still waiting for, or how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    MissingBody,
    MissingTransactionIds,
    MissingTransactions,
    Complete,
    Finished,
    Expired,
    Invalid,
}

/// Outcome of feeding a part into the pending block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// Block has been updated.
    Correct,
    /// Block already has that data.
    Duplicated,
    /// The part does not belong to this block.
    InvalidData,
    /// The part is fine but the block is already invalid.
    InvalidBlock,
}

/// Piecewise reconstruction buffer for a block: header first, then body,
/// then transaction-id chunks, then the transaction bodies themselves.
/// Shared between session threads and the block tree; the update callback is
/// always invoked outside the internal lock.
pub struct PendingBlock {
    header: BlockHeader,
    miner: MinerId,
    on_updated: Box<dyn Fn(&PendingBlock) + Send + Sync>,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    body: Option<BlockBody>,
    chunks: Vec<Option<ChunkRef>>,
    transactions: BTreeMap<TransactionId, TransactionRef>,
    missing_transactions: BTreeSet<TransactionId>,
    invalid: bool,
    expired: bool,
    finished: bool,
}

impl State {
    fn has_all_chunks(&self) -> bool {
        self.body.is_some() && self.chunks.iter().all(|chunk| chunk.is_some())
    }

    fn status(&self) -> Status {
        if self.invalid {
            return Status::Invalid;
        }
        if self.finished {
            return Status::Finished;
        }
        if self.expired {
            return Status::Expired;
        }
        if self.body.is_none() {
            return Status::MissingBody;
        }
        if !self.chunks.iter().all(|chunk| chunk.is_some()) {
            return Status::MissingTransactionIds;
        }
        if !self.missing_transactions.is_empty() {
            return Status::MissingTransactions;
        }
        Status::Complete
    }
}

impl PendingBlock {
    pub fn new<F>(header: BlockHeader, miner: MinerId, on_updated: F) -> PendingBlockRef
    where
        F: Fn(&PendingBlock) + Send + Sync + 'static,
    {
        Arc::new(PendingBlock {
            header: header,
            miner: miner,
            on_updated: Box::new(on_updated),
            state: RwLock::new(State::default()),
        })
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

    pub fn next_miners(&self) -> &[MinerId] {
        self.header.next_miners()
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
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

    pub fn miner(&self) -> &MinerId {
        &self.miner
    }

    pub fn status(&self) -> Status {
        self.state.read().status()
    }

    /// Adds the block body. First acceptance allocates the chunk slots.
    pub fn add_body(&self, body: BlockBody) -> AddResult {
        {
            let mut state = self.state.write();
            if state.invalid {
                return AddResult::InvalidBlock;
            }
            if body.hash() != self.header.body_hash() {
                return AddResult::InvalidData;
            }
            if state.body.is_some() {
                return AddResult::Duplicated;
            }

            state.chunks = vec![None; body.chunk_hashes().len()];
            state.body = Some(body);
        }
        (self.on_updated)(self);
        AddResult::Correct
    }

    /// (index, hash) pairs of chunks that have not arrived yet.
    pub fn missing_chunk_hashes(&self, limit: usize) -> Vec<(u32, H256)> {
        let state = self.state.read();
        let body = match state.body {
            Some(ref body) => body,
            None => return Vec::new(),
        };

        let mut result = Vec::new();
        for (index, hash) in body.chunk_hashes().iter().enumerate() {
            if state.chunks[index].is_none() {
                result.push((index as u32, *hash));
                if result.len() == limit {
                    break;
                }
            }
        }
        result
    }

    /// Adds transaction-id chunks, located by hash. When the last chunk
    /// arrives the missing-transactions set is populated.
    pub fn add_chunks(&self, chunks: &[ChunkRef]) -> AddResult {
        {
            let mut state = self.state.write();
            if state.invalid {
                return AddResult::InvalidBlock;
            }
            let hashes: Vec<H256> = match state.body {
                Some(ref body) => body.chunk_hashes().to_vec(),
                None => return AddResult::InvalidData,
            };

            let mut new_data = false;
            for chunk in chunks {
                let index = match hashes.iter().position(|hash| hash == chunk.hash()) {
                    Some(index) => index,
                    None => return AddResult::InvalidData,
                };
                if state.chunks[index].is_some() {
                    continue;
                }
                state.chunks[index] = Some(chunk.clone());
                new_data = true;
            }

            if !new_data {
                return AddResult::Duplicated;
            }

            if state.has_all_chunks() {
                debug_assert!(state.missing_transactions.is_empty());
                let mut missing = BTreeSet::new();
                for chunk in &state.chunks {
                    let chunk = chunk.as_ref().expect("all chunks are present; qed");
                    missing.extend(chunk.transaction_ids().iter().cloned());
                }
                state.missing_transactions = missing;
            }
        }
        (self.on_updated)(self);
        AddResult::Correct
    }

    /// All transaction ids, available once every chunk arrived.
    pub fn transaction_ids(&self) -> BTreeSet<TransactionId> {
        let state = self.state.read();
        if !state.has_all_chunks() {
            return BTreeSet::new();
        }

        let mut result = BTreeSet::new();
        for chunk in &state.chunks {
            let chunk = chunk.as_ref().expect("all chunks are present; qed");
            result.extend(chunk.transaction_ids().iter().cloned());
        }
        result
    }

    /// Still-missing transaction ids, bounded by count and total size.
    /// Zero means no limit.
    pub fn missing_transaction_ids(
        &self,
        count_limit: usize,
        size_limit: usize,
    ) -> BTreeSet<TransactionId> {
        let state = self.state.read();
        let mut result = BTreeSet::new();
        let mut size = 0usize;
        for transaction_id in &state.missing_transactions {
            if count_limit != 0 && result.len() >= count_limit {
                break;
            }
            if size_limit != 0 && size + transaction_id.transaction_size() > size_limit {
                continue;
            }
            size += transaction_id.transaction_size();
            result.insert(*transaction_id);
        }
        result
    }

    /// Moves matching transactions from missing to resolved. Entirely
    /// duplicate input yields `Duplicated`, entirely unknown input yields
    /// `InvalidData`.
    pub fn add_transactions(
        &self,
        transactions: &[TransactionRef],
        execute_callback: bool,
    ) -> AddResult {
        {
            let mut state = self.state.write();
            debug_assert!(state.has_all_chunks());
            if state.invalid {
                return AddResult::InvalidBlock;
            }
            if transactions.is_empty() {
                return AddResult::InvalidData;
            }

            let mut new_transactions = 0usize;
            for transaction in transactions {
                let transaction_id = transaction.id();
                if !state.missing_transactions.remove(&transaction_id) {
                    continue;
                }
                state.transactions.insert(transaction_id, transaction.clone());
                new_transactions += 1;
            }

            if new_transactions == 0 {
                for transaction in transactions {
                    if state.transactions.contains_key(&transaction.id()) {
                        return AddResult::Duplicated;
                    }
                }
                return AddResult::InvalidData;
            }
        }
        if execute_callback {
            (self.on_updated)(self);
        }
        AddResult::Correct
    }

    pub fn add_transaction(&self, transaction: &TransactionRef) -> AddResult {
        self.add_transactions(&[transaction.clone()], true)
    }

    pub fn has_transaction(&self, transaction_id: &TransactionId) -> bool {
        self.state.read().transactions.contains_key(transaction_id)
    }

    /// Invalid is terminal and dominates the other flags.
    pub fn set_invalid(&self) {
        self.state.write().invalid = true;
    }

    pub fn is_invalid(&self) -> bool {
        self.state.read().invalid
    }

    pub fn set_expired(&self) {
        let mut state = self.state.write();
        if state.invalid {
            return;
        }
        state.expired = true;
    }

    pub fn is_expired(&self) -> bool {
        self.state.read().expired
    }

    pub fn set_finished(&self) {
        let mut state = self.state.write();
        if state.invalid {
            return;
        }
        state.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.state.read().finished
    }

    /// Builds the block once every part is in place.
    pub fn create_block(&self) -> Option<Block> {
        let state = self.state.read();
        if state.status() != Status::Complete {
            return None;
        }
        let body = state.body.clone().expect("status is Complete; qed");
        if state.transactions.len() != body.transactions() as usize {
            return None;
        }

        let chunks = state
            .chunks
            .iter()
            .map(|chunk| chunk.clone().expect("status is Complete; qed"))
            .collect();
        Some(Block::from_parts(
            self.header.clone(),
            body,
            chunks,
            state.transactions.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{AddResult, PendingBlock, Status};
    use block::Block;
    use crypto::{MinerId, SecretKey, UserId};
    use parking_lot::Mutex;
    use primitives::hash::H256;
    use std::sync::Arc;
    use transaction::{Detail, Transaction};

    fn sample_blocks() -> (SecretKey, super::PendingBlockRef, Arc<Block>, Arc<Block>, Arc<Mutex<usize>>)
    {
        let key = SecretKey::from_seed(b"miner");
        let next_miners = vec![MinerId::from(&key.public())];

        let first_transactions = vec![Transaction::signed(
            1,
            Detail::Transfer {
                to: UserId::from(&key.public()),
                amount: 5,
            },
            &key,
        )];
        let first = Block::create(
            1,
            1,
            next_miners.clone(),
            first_transactions,
            H256::default(),
            &key,
        );

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
            next_miners,
            transactions,
            *first.header_hash(),
            &key,
        );

        let calls = Arc::new(Mutex::new(0usize));
        let calls_in_callback = calls.clone();
        let pending = PendingBlock::new(
            block.header().clone(),
            MinerId::from(&key.public()),
            move |_| {
                *calls_in_callback.lock() += 1;
            },
        );

        (key, pending, first, block, calls)
    }

    #[test]
    fn test_pending_block_full_protocol() {
        let (_, pending, first, block, calls) = sample_blocks();

        assert_eq!(pending.status(), Status::MissingBody);
        assert_eq!(pending.body_hash(), block.body_hash());

        // invalid body
        assert_eq!(
            pending.add_body(first.body().clone()),
            AddResult::InvalidData
        );
        assert_eq!(*calls.lock(), 0);

        // valid body
        assert_eq!(pending.add_body(block.body().clone()), AddResult::Correct);
        assert_eq!(*calls.lock(), 1);

        // duplicated body
        assert_eq!(
            pending.add_body(block.body().clone()),
            AddResult::Duplicated
        );
        assert_eq!(*calls.lock(), 1);
        assert_eq!(pending.status(), Status::MissingTransactionIds);

        // missing chunk hashes point at the block's only chunk
        let missing = pending.missing_chunk_hashes(0);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].0, 0);
        assert_eq!(&missing[0].1, block.chunks()[0].hash());

        // foreign chunk
        assert_eq!(
            pending.add_chunks(&[first.chunks()[0].clone()]),
            AddResult::InvalidData
        );
        assert_eq!(*calls.lock(), 1);

        // valid chunk
        assert_eq!(
            pending.add_chunks(&[block.chunks()[0].clone()]),
            AddResult::Correct
        );
        assert_eq!(*calls.lock(), 2);
        assert_eq!(pending.status(), Status::MissingTransactions);
        assert_eq!(pending.missing_chunk_hashes(0).len(), 0);

        // duplicated chunk
        assert_eq!(
            pending.add_chunks(&[block.chunks()[0].clone()]),
            AddResult::Duplicated
        );
        assert_eq!(*calls.lock(), 2);

        // feed all but one transaction
        let ids: Vec<_> = (0..block.transactions_count())
            .map(|i| *block.transaction_id(i))
            .collect();
        let first_two: Vec<_> = ids[..2]
            .iter()
            .map(|id| block.transaction(id).unwrap())
            .collect();
        assert_eq!(pending.add_transactions(&first_two, true), AddResult::Correct);
        assert_eq!(*calls.lock(), 3);
        assert_eq!(pending.status(), Status::MissingTransactions);
        assert_eq!(pending.missing_transaction_ids(0, 0).len(), 1);

        // duplicates only
        assert_eq!(
            pending.add_transactions(&first_two, true),
            AddResult::Duplicated
        );
        assert_eq!(*calls.lock(), 3);

        // the last transaction completes the block
        let last = block.transaction(&ids[2]).unwrap();
        assert_eq!(pending.add_transaction(&last), AddResult::Correct);
        assert_eq!(*calls.lock(), 4);
        assert_eq!(pending.status(), Status::Complete);

        let created = pending.create_block().unwrap();
        assert_eq!(created.header_hash(), block.header_hash());
    }

    #[test]
    fn test_invalid_dominates() {
        let (_, pending, _, block, _) = sample_blocks();
        pending.set_invalid();
        pending.set_expired();
        pending.set_finished();
        assert_eq!(pending.status(), Status::Invalid);
        assert_eq!(
            pending.add_body(block.body().clone()),
            AddResult::InvalidBlock
        );
        assert!(pending.create_block().is_none());
    }

    #[test]
    fn test_missing_transaction_ids_limits() {
        let (_, pending, _, block, _) = sample_blocks();
        pending.add_body(block.body().clone());
        pending.add_chunks(&[block.chunks()[0].clone()]);

        assert_eq!(pending.missing_transaction_ids(2, 0).len(), 2);
        let any_size = block.transaction_id(0).transaction_size();
        assert_eq!(pending.missing_transaction_ids(0, any_size).len(), 1);
    }
}
