//! In-memory reference implementation of the store contract. The confirmed
//! state is a deque of full snapshots, one per committed block, bounded by
//! the rollbackable depth; the unconfirmed facade works on a detached copy
//! of the newest snapshot.

use chain::{
    BlockBody, BlockHeader, BlockRef, ChunkRef, MinersQueue, TransactionId, TransactionRef,
};
use crypto::{MinerId, UserId};
use network::{DATABASE_ROLLBACKABLE_BLOCKS, MINERS_QUEUE_SIZE};
use parking_lot::RwLock;
use primitives::bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use storage::{
    BlockProvider, Miner, MinerProvider, SideStore, StateProvider, Store, StoreWriter, TopMiners,
    TransactionProvider, User, UserProvider, DEFAULT_PRICING,
};

#[derive(Clone)]
struct Tables {
    blocks: BTreeMap<u32, BlockRef>,
    transactions: BTreeMap<TransactionId, (TransactionRef, u32)>,
    users: HashMap<UserId, User>,
    miners: HashMap<MinerId, Miner>,
    storage_entries: HashMap<Bytes, (Bytes, TransactionId)>,
    miners_queue: MinersQueue,
    pricing: u64,
    new_transactions_count: u32,
    new_transactions_size: u32,
}

impl Default for Tables {
    fn default() -> Self {
        Tables {
            blocks: BTreeMap::new(),
            transactions: BTreeMap::new(),
            users: HashMap::new(),
            miners: HashMap::new(),
            storage_entries: HashMap::new(),
            miners_queue: MinersQueue::new(),
            pricing: DEFAULT_PRICING,
            new_transactions_count: 0,
            new_transactions_size: 0,
        }
    }
}

impl Tables {
    fn latest_block_id(&self) -> u32 {
        self.blocks.keys().next_back().cloned().unwrap_or(0)
    }
}

struct Inner {
    /// Snapshot per committed block, newest last.
    committed: VecDeque<Tables>,
    /// Unconfirmed working state.
    working: Tables,
}

impl Inner {
    fn confirmed(&self) -> &Tables {
        self.committed.back().expect("at least one snapshot; qed")
    }
}

/// Shared in-memory database.
pub struct MemoryDatabase {
    confirmed_side: ConfirmedSide,
    unconfirmed_side: UnconfirmedSide,
    inner: Arc<RwLock<Inner>>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        let mut committed = VecDeque::new();
        committed.push_back(Tables::default());
        let inner = Arc::new(RwLock::new(Inner {
            committed: committed,
            working: Tables::default(),
        }));
        MemoryDatabase {
            confirmed_side: ConfirmedSide {
                inner: inner.clone(),
            },
            unconfirmed_side: UnconfirmedSide {
                inner: inner.clone(),
            },
            inner: inner,
        }
    }
}

impl MemoryDatabase {
    pub fn new() -> MemoryDatabase {
        MemoryDatabase::default()
    }
}

impl Store for MemoryDatabase {
    fn confirmed(&self) -> &dyn SideStore {
        &self.confirmed_side
    }

    fn unconfirmed(&self) -> &dyn StoreWriter {
        &self.unconfirmed_side
    }

    fn commit(&self, block_id: u32) {
        let mut inner = self.inner.write();
        assert_eq!(
            inner.working.latest_block_id(),
            block_id,
            "commit must install the block that was just executed"
        );

        let mut snapshot = inner.working.clone();
        snapshot.new_transactions_count = 0;
        snapshot.new_transactions_size = 0;

        inner.committed.push_back(snapshot.clone());
        if inner.committed.len() > DATABASE_ROLLBACKABLE_BLOCKS + 1 {
            inner.committed.pop_front();
        }
        inner.working = snapshot;
        trace!(target: "db", "committed block {}", block_id);
    }

    fn rollback(&self, n: usize) -> bool {
        let mut inner = self.inner.write();
        if n == 0 {
            return true;
        }
        if n >= inner.committed.len() {
            return false;
        }
        for _ in 0..n {
            inner.committed.pop_back();
        }
        let restored = inner.confirmed().clone();
        inner.working = restored;
        debug!(target: "db", "rolled back {} blocks, now at {}", n, inner.working.latest_block_id());
        true
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        let restored = inner.confirmed().clone();
        inner.working = restored;
    }

    fn preload(&self, _block_id: u32) {}

    fn max_rollback_depth(&self) -> usize {
        self.inner.read().committed.len() - 1
    }
}

struct ConfirmedSide {
    inner: Arc<RwLock<Inner>>,
}

struct UnconfirmedSide {
    inner: Arc<RwLock<Inner>>,
}

macro_rules! impl_providers {
    ($side: ident, $tables: ident) => {
        impl BlockProvider for $side {
            fn block(&self, id: u32) -> Option<BlockRef> {
                self.inner.read().$tables().blocks.get(&id).cloned()
            }

            fn block_header(&self, id: u32) -> Option<BlockHeader> {
                self.inner
                    .read()
                    .$tables()
                    .blocks
                    .get(&id)
                    .map(|block| block.header().clone())
            }

            fn block_body(&self, id: u32) -> Option<BlockBody> {
                self.inner
                    .read()
                    .$tables()
                    .blocks
                    .get(&id)
                    .map(|block| block.body().clone())
            }

            fn block_transaction_ids(&self, id: u32, chunk_index: u32) -> Option<ChunkRef> {
                self.inner
                    .read()
                    .$tables()
                    .blocks
                    .get(&id)
                    .and_then(|block| block.chunks().get(chunk_index as usize).cloned())
            }

            fn next_block_header(&self, id: u32) -> Option<BlockHeader> {
                let inner = self.inner.read();
                inner
                    .$tables()
                    .blocks
                    .range(id + 1..)
                    .next()
                    .map(|(_, block)| block.header().clone())
            }

            fn latest_block_header(&self) -> Option<BlockHeader> {
                let inner = self.inner.read();
                inner
                    .$tables()
                    .blocks
                    .values()
                    .next_back()
                    .map(|block| block.header().clone())
            }

            fn latest_blocks(&self) -> BTreeMap<u32, (BlockHeader, BlockBody)> {
                let inner = self.inner.read();
                inner
                    .$tables()
                    .blocks
                    .iter()
                    .rev()
                    .take(DATABASE_ROLLBACKABLE_BLOCKS + 1)
                    .map(|(id, block)| (*id, (block.header().clone(), block.body().clone())))
                    .collect()
            }

            fn latest_block_id(&self) -> u32 {
                self.inner.read().$tables().latest_block_id()
            }

            fn miners_queue(&self) -> MinersQueue {
                self.inner.read().$tables().miners_queue.clone()
            }
        }

        impl TransactionProvider for $side {
            fn transaction(&self, id: &TransactionId) -> Option<TransactionRef> {
                self.inner
                    .read()
                    .$tables()
                    .transactions
                    .get(id)
                    .map(|entry| entry.0.clone())
            }

            fn transaction_with_block_id(
                &self,
                id: &TransactionId,
            ) -> Option<(TransactionRef, u32)> {
                self.inner.read().$tables().transactions.get(id).cloned()
            }

            fn new_transactions_count(&self) -> u32 {
                self.inner.read().$tables().new_transactions_count
            }

            fn new_transactions_size(&self) -> u32 {
                self.inner.read().$tables().new_transactions_size
            }
        }

        impl MinerProvider for $side {
            fn miner(&self, id: &MinerId) -> Option<Miner> {
                self.inner.read().$tables().miners.get(id).cloned()
            }

            fn top_miners(&self) -> TopMiners {
                let inner = self.inner.read();
                TopMiners::new(inner.$tables().miners.values().cloned().collect())
            }

            fn staked_tokens(&self) -> u64 {
                let inner = self.inner.read();
                inner.$tables().miners.values().map(|miner| miner.stake).sum()
            }

            fn miner_endpoints(&self) -> Vec<(MinerId, String)> {
                let inner = self.inner.read();
                inner
                    .$tables()
                    .miners
                    .values()
                    .filter_map(|miner| {
                        miner
                            .endpoint
                            .as_ref()
                            .map(|endpoint| (miner.id, endpoint.clone()))
                    })
                    .collect()
            }
        }

        impl UserProvider for $side {
            fn user(&self, id: &UserId) -> Option<User> {
                self.inner.read().$tables().users.get(id).cloned()
            }

            fn preload_user(&self, _id: &UserId) {}

            fn users_count(&self) -> u64 {
                self.inner.read().$tables().users.len() as u64
            }

            fn tokens(&self) -> u64 {
                let inner = self.inner.read();
                inner.$tables().users.values().map(|user| user.balance).sum()
            }
        }

        impl StateProvider for $side {
            fn pricing(&self) -> u64 {
                self.inner.read().$tables().pricing
            }

            fn storage_entry(&self, key: &Bytes) -> Option<(Bytes, TransactionId)> {
                self.inner.read().$tables().storage_entries.get(key).cloned()
            }
        }

        impl SideStore for $side {}
    };
}

impl Inner {
    fn working_tables(&self) -> &Tables {
        &self.working
    }

    fn confirmed_tables(&self) -> &Tables {
        self.confirmed()
    }
}

impl_providers!(ConfirmedSide, confirmed_tables);
impl_providers!(UnconfirmedSide, working_tables);

impl StoreWriter for UnconfirmedSide {
    fn add_block(&self, block: BlockRef) {
        let mut inner = self.inner.write();
        let working = &mut inner.working;
        assert!(
            working.blocks.keys().next_back().map_or(true, |id| *id < block.id()),
            "blocks must be added in order"
        );

        for transaction in block.ordered_transactions() {
            working
                .transactions
                .insert(transaction.id(), (transaction.clone(), block.id()));
            working.new_transactions_count += 1;
            working.new_transactions_size += transaction.size() as u32;
        }

        for miner in block.next_miners() {
            working.miners_queue.push_back(*miner);
        }
        while working.miners_queue.len() > MINERS_QUEUE_SIZE {
            working.miners_queue.pop_front();
        }

        working.blocks.insert(block.id(), block);
    }

    fn set_user(&self, user: User) {
        let mut inner = self.inner.write();
        inner.working.users.insert(user.id, user);
    }

    fn set_miner(&self, miner: Miner) {
        let mut inner = self.inner.write();
        inner.working.miners.insert(miner.id, miner);
    }

    fn set_storage_entry(&self, key: Bytes, value: Bytes, transaction_id: TransactionId) {
        let mut inner = self.inner.write();
        inner
            .working
            .storage_entries
            .insert(key, (value, transaction_id));
    }

    fn set_pricing(&self, pricing: u64) {
        let mut inner = self.inner.write();
        inner.working.pricing = pricing;
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryDatabase;
    use storage::{Store, StoreWriter, User};
    use test_data::ChainBuilder;

    #[test]
    fn test_commit_and_rollback() {
        let db = MemoryDatabase::default();
        let mut builder = ChainBuilder::new();
        let b1 = builder.genesis();
        let b2 = builder.next_block(vec![]);

        db.unconfirmed().add_block(b1.clone());
        db.commit(1);
        assert_eq!(db.confirmed().latest_block_id(), 1);

        db.unconfirmed().add_block(b2.clone());
        assert_eq!(db.unconfirmed().latest_block_id(), 2);
        // not yet committed
        assert_eq!(db.confirmed().latest_block_id(), 1);

        db.commit(2);
        assert_eq!(db.confirmed().latest_block_id(), 2);

        assert!(db.rollback(1));
        assert_eq!(db.confirmed().latest_block_id(), 1);
        assert_eq!(db.unconfirmed().latest_block_id(), 1);
        // cannot roll back past the first snapshot
        assert!(!db.rollback(5));
    }

    #[test]
    fn test_clear_drops_tentative_changes() {
        let db = MemoryDatabase::default();
        let builder = ChainBuilder::new();
        let user = User::new(
            builder.user_id(),
            builder.key().public(),
            1000,
        );
        db.unconfirmed().set_user(user.clone());
        assert!(db.unconfirmed().user(&user.id).is_some());
        assert!(db.confirmed().user(&user.id).is_none());

        db.clear();
        assert!(db.unconfirmed().user(&user.id).is_none());
    }

    #[test]
    fn test_new_transaction_counters() {
        let db = MemoryDatabase::default();
        let mut builder = ChainBuilder::new();
        let b1 = builder.genesis();

        db.unconfirmed().add_block(b1.clone());
        assert_eq!(
            db.unconfirmed().new_transactions_count() as usize,
            b1.transactions_count()
        );
        assert_eq!(
            db.unconfirmed().new_transactions_size() as usize,
            b1.transactions_size()
        );

        db.commit(1);
        assert_eq!(db.unconfirmed().new_transactions_count(), 0);
    }

    #[test]
    fn test_miners_queue_follows_blocks() {
        let db = MemoryDatabase::default();
        let mut builder = ChainBuilder::new();
        let b1 = builder.genesis();
        db.unconfirmed().add_block(b1.clone());
        db.commit(1);

        let queue = db.confirmed().miners_queue();
        assert_eq!(queue.len(), b1.next_miners().len());
        assert_eq!(queue.front(), b1.next_miners().first());
    }
}
