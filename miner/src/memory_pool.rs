//! The pending-transaction pool. Tracks transactions that were received but
//! not yet tentatively executed (*pending*) and transactions already executed
//! against the unconfirmed store (*executed*), and feeds pending blocks that
//! wait for transaction bodies. All operations are thread-safe; callbacks
//! into pending blocks always run outside the internal lock.

use chain::{PendingBlockRef, TransactionId, TransactionRef};
use crypto::MinerId;
use network::{BLOCK_MAX_TRANSACTIONS, BLOCK_MAX_TRANSACTIONS_SIZE};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

#[derive(Clone)]
struct Entry {
    transaction: TransactionRef,
    /// Execution order, meaningful for executed entries only.
    index: u32,
    reporter: Option<MinerId>,
    crypto_verified: bool,
}

#[derive(Default)]
struct Inner {
    pending: BTreeMap<TransactionId, Entry>,
    executed: BTreeMap<TransactionId, Entry>,
    /// Pending transactions in insertion order; key set always equals
    /// `pending`'s.
    queue: VecDeque<TransactionRef>,
    /// Pending blocks waiting for a transaction body.
    requested: BTreeMap<TransactionId, Vec<PendingBlockRef>>,
    transactions_size: u32,
    executed_size: u32,
}

impl Inner {
    fn take_requested(&mut self, id: &TransactionId, out: &mut Vec<PendingBlockRef>) {
        if let Some(blocks) = self.requested.remove(id) {
            for block in blocks {
                if !out.iter().any(|existing| Arc::ptr_eq(existing, &block)) {
                    out.push(block);
                }
            }
        }
    }
}

/// Counters exposed for logging and debug endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Information {
    pub pending_count: usize,
    pub pending_size: u32,
    pub executed_count: usize,
    pub executed_size: u32,
    pub requested_count: usize,
}

#[derive(Default)]
pub struct MemoryPool {
    inner: RwLock<Inner>,
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool::default()
    }

    /// The pool accepts a transaction when some pending block requested it,
    /// or when both the count and size limits leave room for it.
    pub fn can_add(&self, id: &TransactionId) -> bool {
        let inner = self.inner.read();
        if inner.requested.contains_key(id) {
            return true;
        }
        if inner.pending.len() + inner.executed.len() >= MemoryPool::max_pending_count() {
            return false;
        }
        if id.transaction_size() as u32 + inner.transactions_size
            > MemoryPool::max_pending_size()
        {
            return false;
        }
        true
    }

    /// Inserts transactions into *pending*; ids waited on by pending blocks
    /// are delivered to them. Returns the number of genuinely new entries.
    pub fn add(&self, transactions: &[TransactionRef], reporter: Option<MinerId>) -> usize {
        let mut pending_blocks = Vec::new();
        let added = {
            let mut inner = self.inner.write();
            let mut added = 0usize;
            for transaction in transactions {
                let id = transaction.id();
                inner.take_requested(&id, &mut pending_blocks);

                if inner.executed.contains_key(&id) || inner.pending.contains_key(&id) {
                    continue;
                }

                inner.pending.insert(
                    id,
                    Entry {
                        transaction: transaction.clone(),
                        index: 0,
                        reporter: reporter,
                        crypto_verified: false,
                    },
                );
                inner.queue.push_back(transaction.clone());
                inner.transactions_size += transaction.size() as u32;
                added += 1;
            }
            added
        };

        for pending_block in pending_blocks {
            pending_block.add_transactions(transactions, true);
        }
        added
    }

    /// Inserts transactions straight into *executed*, assigning monotonic
    /// execution indices. Used when re-feeding transactions of rolled-back
    /// blocks, which are already crypto-verified.
    pub fn add_executed(&self, transactions: &[TransactionRef]) -> usize {
        let mut pending_blocks = Vec::new();
        let added = {
            let mut inner = self.inner.write();
            let mut added = 0usize;
            for transaction in transactions {
                let id = transaction.id();
                inner.take_requested(&id, &mut pending_blocks);

                if inner.executed.contains_key(&id) {
                    continue;
                }

                if inner.pending.remove(&id).is_some() {
                    let position = inner
                        .queue
                        .iter()
                        .position(|entry| entry.id() == id)
                        .expect("queue key set equals pending key set; qed");
                    inner.queue.remove(position);
                } else {
                    inner.transactions_size += transaction.size() as u32;
                }

                let index = inner.executed.len() as u32;
                inner.executed.insert(
                    id,
                    Entry {
                        transaction: transaction.clone(),
                        index: index,
                        reporter: None,
                        crypto_verified: true,
                    },
                );
                inner.executed_size += transaction.size() as u32;
                added += 1;
            }
            added
        };

        for pending_block in pending_blocks {
            pending_block.add_transactions(transactions, true);
        }
        added
    }

    /// Delivers the transaction to pending blocks that requested it. When
    /// `only_block` is false the transaction also joins *pending*.
    pub fn add_if_requested(&self, transaction: &TransactionRef, only_block: bool) -> bool {
        let id = transaction.id();
        let pending_blocks = {
            let mut inner = self.inner.write();
            match inner.requested.remove(&id) {
                Some(blocks) => blocks,
                None => return false,
            }
        };

        for pending_block in &pending_blocks {
            pending_block.add_transaction(transaction);
        }

        if only_block {
            return true;
        }

        let mut inner = self.inner.write();
        if inner.executed.contains_key(&id) || inner.pending.contains_key(&id) {
            return false;
        }
        inner.pending.insert(
            id,
            Entry {
                transaction: transaction.clone(),
                index: 0,
                reporter: None,
                crypto_verified: false,
            },
        );
        inner.queue.push_back(transaction.clone());
        inner.transactions_size += transaction.size() as u32;
        true
    }

    pub fn transaction(&self, id: &TransactionId) -> Option<TransactionRef> {
        let inner = self.inner.read();
        inner
            .pending
            .get(id)
            .or_else(|| inner.executed.get(id))
            .map(|entry| entry.transaction.clone())
    }

    pub fn transactions(
        &self,
        ids: &BTreeSet<TransactionId>,
    ) -> BTreeMap<TransactionId, TransactionRef> {
        let inner = self.inner.read();
        let mut result = BTreeMap::new();
        for id in ids {
            if let Some(entry) = inner.pending.get(id).or_else(|| inner.executed.get(id)) {
                result.insert(*id, entry.transaction.clone());
            }
        }
        result
    }

    pub fn has_executed(&self, id: &TransactionId) -> bool {
        self.inner.read().executed.contains_key(id)
    }

    /// Subset of `ids` known to the pool, pending or executed.
    pub fn has_any(&self, ids: &BTreeSet<TransactionId>) -> BTreeSet<TransactionId> {
        let inner = self.inner.read();
        ids.iter()
            .filter(|id| inner.pending.contains_key(id) || inner.executed.contains_key(id))
            .cloned()
            .collect()
    }

    pub fn is_crypto_verified(&self, id: &TransactionId) -> bool {
        let inner = self.inner.read();
        inner
            .executed
            .get(id)
            .or_else(|| inner.pending.get(id))
            .map_or(false, |entry| entry.crypto_verified)
    }

    pub fn mark_crypto_verified(&self, id: &TransactionId) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.executed.get_mut(id) {
            entry.crypto_verified = true;
            return;
        }
        if let Some(entry) = inner.pending.get_mut(id) {
            entry.crypto_verified = true;
        }
    }

    /// Snapshots the pending block's missing ids; everything the pool
    /// already holds is delivered immediately, the rest is recorded in the
    /// requested index.
    pub fn add_pending_block(&self, pending_block: &PendingBlockRef) {
        let missing = pending_block.missing_transaction_ids(0, 0);
        let existing: Vec<TransactionRef> = {
            let mut inner = self.inner.write();
            let mut existing = Vec::new();
            for id in &missing {
                if let Some(entry) = inner.pending.get(id).or_else(|| inner.executed.get(id)) {
                    existing.push(entry.transaction.clone());
                    continue;
                }
                let waiting = inner.requested.entry(*id).or_insert_with(Vec::new);
                if !waiting
                    .iter()
                    .any(|block| Arc::ptr_eq(block, pending_block))
                {
                    waiting.push(pending_block.clone());
                }
            }
            existing
        };

        if !existing.is_empty() {
            pending_block.add_transactions(&existing, false);
        }
    }

    /// Unregisters the pending block from every id it was waiting on.
    pub fn remove_pending_block(&self, pending_block: &PendingBlockRef) {
        let missing = pending_block.missing_transaction_ids(0, 0);
        let mut inner = self.inner.write();
        for id in &missing {
            let drop_entry = match inner.requested.get_mut(id) {
                Some(waiting) => {
                    waiting.retain(|block| !Arc::ptr_eq(block, pending_block));
                    waiting.is_empty()
                }
                None => false,
            };
            if drop_entry {
                inner.requested.remove(id);
            }
        }
    }

    /// First `limit` pending transactions in insertion order.
    pub fn pending(&self, limit: usize) -> Vec<TransactionRef> {
        let inner = self.inner.read();
        inner.queue.iter().take(limit).cloned().collect()
    }

    /// Executed transactions in execution order.
    pub fn executed(&self, limit: usize) -> Vec<TransactionRef> {
        let inner = self.inner.read();
        let limit = limit.min(inner.executed.len());
        let mut result: Vec<Option<TransactionRef>> = vec![None; limit];
        for entry in inner.executed.values() {
            if (entry.index as usize) < limit {
                debug_assert!(result[entry.index as usize].is_none());
                result[entry.index as usize] = Some(entry.transaction.clone());
            }
        }
        result
            .into_iter()
            .map(|entry| entry.expect("executed indices form 0..len exactly; qed"))
            .collect()
    }

    /// Applies execution outcomes reported by the control loop: successful
    /// transactions move from *pending* to *executed*, failed ones are
    /// dropped.
    pub fn update_transactions(&self, outcomes: &[(TransactionId, bool)]) {
        let mut inner = self.inner.write();
        for &(id, is_correct) in outcomes {
            let position = inner
                .queue
                .iter()
                .position(|entry| entry.id() == id)
                .expect("updated transactions are pending; qed");
            let transaction = inner
                .queue
                .remove(position)
                .expect("position was just found; qed");

            let entry = inner
                .pending
                .remove(&id)
                .expect("queue key set equals pending key set; qed");
            if is_correct {
                debug_assert!(!inner.executed.contains_key(&id));
                let index = inner.executed.len() as u32;
                inner.executed.insert(
                    id,
                    Entry {
                        transaction: transaction,
                        index: index,
                        reporter: entry.reporter,
                        crypto_verified: true,
                    },
                );
                inner.executed_size += id.transaction_size() as u32;
            } else {
                inner.transactions_size -= id.transaction_size() as u32;
            }
        }
    }

    /// Drops transactions from *pending* only.
    pub fn remove(&self, ids: &BTreeSet<TransactionId>) {
        let mut inner = self.inner.write();
        for id in ids {
            if inner.pending.remove(id).is_some() {
                inner.transactions_size -= id.transaction_size() as u32;
            }
        }
        inner.queue.retain(|entry| !ids.contains(&entry.id()));
    }

    /// Moves every executed transaction back to the front of the pending
    /// queue, preserving execution order. The central rebuild primitive:
    /// called before every mine and before rollback.
    pub fn clear_executed(&self) {
        let mut inner = self.inner.write();
        let mut ordered: Vec<Option<Entry>> = vec![None; inner.executed.len()];
        for (_, entry) in ::std::mem::replace(&mut inner.executed, BTreeMap::new()) {
            let index = entry.index as usize;
            debug_assert!(ordered[index].is_none());
            ordered[index] = Some(entry);
        }

        for entry in ordered.into_iter().rev() {
            let mut entry = entry.expect("executed indices form 0..len exactly; qed");
            entry.index = 0;
            let transaction = entry.transaction.clone();
            debug_assert!(!inner.pending.contains_key(&transaction.id()));
            inner.pending.insert(transaction.id(), entry);
            inner.queue.push_front(transaction);
        }
        inner.executed_size = 0;
    }

    pub fn transactions_count(&self) -> usize {
        let inner = self.inner.read();
        inner.pending.len() + inner.executed.len()
    }

    pub fn transactions_size(&self) -> u32 {
        self.inner.read().transactions_size
    }

    pub fn pending_count(&self) -> usize {
        self.inner.read().pending.len()
    }

    pub fn pending_size(&self) -> u32 {
        let inner = self.inner.read();
        inner.transactions_size - inner.executed_size
    }

    pub fn executed_count(&self) -> usize {
        self.inner.read().executed.len()
    }

    pub fn executed_size(&self) -> u32 {
        self.inner.read().executed_size
    }

    pub fn requested_count(&self) -> usize {
        self.inner.read().requested.len()
    }

    pub fn information(&self) -> Information {
        let inner = self.inner.read();
        Information {
            pending_count: inner.pending.len(),
            pending_size: inner.transactions_size - inner.executed_size,
            executed_count: inner.executed.len(),
            executed_size: inner.executed_size,
            requested_count: inner.requested.len(),
        }
    }

    /// Can be exceeded when a pending block requests a transaction.
    pub fn max_pending_count() -> usize {
        BLOCK_MAX_TRANSACTIONS * 2
    }

    pub fn max_pending_size() -> u32 {
        (BLOCK_MAX_TRANSACTIONS_SIZE * 8) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryPool;
    use chain::{PendingBlock, Status};
    use crypto::MinerId;
    use std::collections::BTreeSet;
    use test_data::ChainBuilder;

    #[test]
    fn test_add_and_order() {
        let pool = MemoryPool::new();
        let builder = ChainBuilder::new();
        let t1 = builder.transfer(2, 1);
        let t2 = builder.transfer(2, 2);
        let t3 = builder.transfer(2, 3);

        assert_eq!(pool.add(&[t1.clone(), t2.clone()], None), 2);
        // duplicates are not re-added
        assert_eq!(pool.add(&[t2.clone(), t3.clone()], None), 1);
        assert_eq!(pool.pending_count(), 3);

        let pending = pool.pending(10);
        let ids: Vec<_> = pending.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![t1.id(), t2.id(), t3.id()]);
    }

    #[test]
    fn test_update_and_clear_executed() {
        let pool = MemoryPool::new();
        let builder = ChainBuilder::new();
        let t1 = builder.transfer(2, 1);
        let t2 = builder.transfer(2, 2);
        let t3 = builder.transfer(2, 3);
        pool.add(&[t1.clone(), t2.clone(), t3.clone()], None);

        // t1 executes, t2 fails, t3 stays pending
        pool.update_transactions(&[(t1.id(), true), (t2.id(), false)]);
        assert_eq!(pool.executed_count(), 1);
        assert_eq!(pool.pending_count(), 1);
        assert!(pool.has_executed(&t1.id()));
        assert!(pool.transaction(&t2.id()).is_none());

        // executed transactions return to the front of the queue
        pool.clear_executed();
        assert_eq!(pool.executed_count(), 0);
        assert_eq!(pool.pending_count(), 2);
        let pending = pool.pending(10);
        assert_eq!(pending[0].id(), t1.id());
        assert_eq!(pending[1].id(), t3.id());
        // moved transactions keep their crypto-verified mark
        assert!(pool.is_crypto_verified(&t1.id()));
    }

    #[test]
    fn test_executed_order_preserved_by_clear() {
        let pool = MemoryPool::new();
        let builder = ChainBuilder::new();
        let transactions: Vec<_> = (0..5).map(|i| builder.transfer(2, i)).collect();
        pool.add_executed(&transactions);

        let executed = pool.executed(10);
        let expected: Vec<_> = transactions.iter().map(|t| t.id()).collect();
        let actual: Vec<_> = executed.iter().map(|t| t.id()).collect();
        assert_eq!(actual, expected);

        pool.clear_executed();
        let actual: Vec<_> = pool.pending(10).iter().map(|t| t.id()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_pending_and_executed_are_disjoint() {
        let pool = MemoryPool::new();
        let builder = ChainBuilder::new();
        let t1 = builder.transfer(2, 1);
        pool.add(&[t1.clone()], None);
        pool.add_executed(&[t1.clone()]);

        assert_eq!(pool.pending_count(), 0);
        assert_eq!(pool.executed_count(), 1);

        let mut ids = BTreeSet::new();
        ids.insert(t1.id());
        assert_eq!(pool.has_any(&ids).len(), 1);
    }

    #[test]
    fn test_pending_block_delivery() {
        let pool = MemoryPool::new();
        let mut builder = ChainBuilder::new();
        builder.genesis();
        let transactions: Vec<_> = (0..3).map(|i| builder.transfer(2, i)).collect();
        let block = builder.next_block(transactions.clone());

        // the pool already holds one of the block's transactions
        pool.add(&[transactions[0].clone()], None);

        let pending_block = PendingBlock::new(block.header().clone(), builder.miner_id(), |_| {});
        pending_block.add_body(block.body().clone());
        pending_block.add_chunks(&[block.chunks()[0].clone()]);
        assert_eq!(pending_block.status(), Status::MissingTransactions);

        pool.add_pending_block(&pending_block);
        // the known transaction was delivered, two are now requested
        assert_eq!(pending_block.missing_transaction_ids(0, 0).len(), 2);
        assert_eq!(pool.requested_count(), 2);

        // a requested id is always acceptable
        assert!(pool.can_add(&transactions[1].id()));

        // gossip delivers the remaining transactions
        pool.add(&transactions[1..].to_vec(), Some(MinerId::default()));
        assert_eq!(pending_block.status(), Status::Complete);
        assert_eq!(pool.requested_count(), 0);
    }

    #[test]
    fn test_remove_pending_block_drops_requests() {
        let pool = MemoryPool::new();
        let mut builder = ChainBuilder::new();
        builder.genesis();
        let transactions: Vec<_> = (0..2).map(|i| builder.transfer(2, i)).collect();
        let block = builder.next_block(transactions.clone());

        let pending_block = PendingBlock::new(block.header().clone(), builder.miner_id(), |_| {});
        pending_block.add_body(block.body().clone());
        pending_block.add_chunks(&[block.chunks()[0].clone()]);
        pool.add_pending_block(&pending_block);
        assert_eq!(pool.requested_count(), 2);

        pool.remove_pending_block(&pending_block);
        assert_eq!(pool.requested_count(), 0);
    }

    #[test]
    fn test_add_if_requested() {
        let pool = MemoryPool::new();
        let mut builder = ChainBuilder::new();
        builder.genesis();
        let transactions: Vec<_> = (0..2).map(|i| builder.transfer(2, i)).collect();
        let block = builder.next_block(transactions.clone());

        let pending_block = PendingBlock::new(block.header().clone(), builder.miner_id(), |_| {});
        pending_block.add_body(block.body().clone());
        pending_block.add_chunks(&[block.chunks()[0].clone()]);
        pool.add_pending_block(&pending_block);

        // not requested -> false
        let other = builder.transfer(2, 99);
        assert!(!pool.add_if_requested(&other, false));

        // requested, delivered to the block and added to pending
        assert!(pool.add_if_requested(&transactions[0], false));
        assert!(pending_block.has_transaction(&transactions[0].id()));
        assert_eq!(pool.pending_count(), 1);

        // requested, delivered to the block only
        assert!(pool.add_if_requested(&transactions[1], true));
        assert_eq!(pool.pending_count(), 1);
    }
}
