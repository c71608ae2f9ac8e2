//! The persistent-store contract consumed by the core. A store exposes two
//! facades over the same data: *confirmed* reflects the last committed
//! block, *unconfirmed* additionally sees tentative changes made while
//! executing transactions. The unconfirmed facade is exclusively driven by
//! the blockchain control thread.

use chain::{BlockBody, BlockHeader, BlockRef, ChunkRef, MinersQueue, TransactionId, TransactionRef};
use crypto::{MinerId, UserId};
use miner::{Miner, TopMiners};
use primitives::bytes::Bytes;
use std::collections::BTreeMap;
use user::User;

/// Block-level reads.
pub trait BlockProvider: Send + Sync {
    fn block(&self, id: u32) -> Option<BlockRef>;
    fn block_header(&self, id: u32) -> Option<BlockHeader>;
    fn block_body(&self, id: u32) -> Option<BlockBody>;
    fn block_transaction_ids(&self, id: u32, chunk_index: u32) -> Option<ChunkRef>;
    /// First block with an id greater than the given one.
    fn next_block_header(&self, id: u32) -> Option<BlockHeader>;
    fn latest_block_header(&self) -> Option<BlockHeader>;
    /// Headers and bodies of the most recent rollbackable blocks.
    fn latest_blocks(&self) -> BTreeMap<u32, (BlockHeader, BlockBody)>;
    fn latest_block_id(&self) -> u32;
    /// Mining queue as of the latest block.
    fn miners_queue(&self) -> MinersQueue;
}

/// Transaction-level reads.
pub trait TransactionProvider: Send + Sync {
    fn transaction(&self, id: &TransactionId) -> Option<TransactionRef>;
    fn transaction_with_block_id(&self, id: &TransactionId) -> Option<(TransactionRef, u32)>;
    /// Count of transactions recorded since the last commit.
    fn new_transactions_count(&self) -> u32;
    /// Size of transactions recorded since the last commit.
    fn new_transactions_size(&self) -> u32;
}

/// Miner-level reads.
pub trait MinerProvider: Send + Sync {
    fn miner(&self, id: &MinerId) -> Option<Miner>;
    fn top_miners(&self) -> TopMiners;
    fn staked_tokens(&self) -> u64;
    fn miner_endpoints(&self) -> Vec<(MinerId, String)>;
}

/// User-level reads.
pub trait UserProvider: Send + Sync {
    fn user(&self, id: &UserId) -> Option<User>;
    /// IO prefetch hint, called off the control thread before execution.
    fn preload_user(&self, id: &UserId);
    fn users_count(&self) -> u64;
    /// Sum of user balances.
    fn tokens(&self) -> u64;
}

/// Global chain state reads.
pub trait StateProvider: Send + Sync {
    fn pricing(&self) -> u64;
    fn storage_entry(&self, key: &Bytes) -> Option<(Bytes, TransactionId)>;
}

/// One facade of the store.
pub trait SideStore:
    BlockProvider + TransactionProvider + MinerProvider + UserProvider + StateProvider
{
}

/// Mutation surface of the unconfirmed facade, used by transaction
/// execution and block application.
pub trait StoreWriter: SideStore {
    fn add_block(&self, block: BlockRef);
    fn set_user(&self, user: User);
    fn set_miner(&self, miner: Miner);
    fn set_storage_entry(&self, key: Bytes, value: Bytes, transaction_id: TransactionId);
    fn set_pricing(&self, pricing: u64);
}

/// The store root.
pub trait Store: Send + Sync {
    fn confirmed(&self) -> &dyn SideStore;
    fn unconfirmed(&self) -> &dyn StoreWriter;
    /// Atomically installs the unconfirmed changes as the new confirmed
    /// state of the given block.
    fn commit(&self, block_id: u32);
    /// Removes the last `n` confirmed blocks. Returns false when the store
    /// cannot roll back that far; the caller must treat that as fatal.
    fn rollback(&self, n: usize) -> bool;
    /// Drops tentative (unconfirmed) changes.
    fn clear(&self);
    /// IO prefetch hint for the given block.
    fn preload(&self, block_id: u32);
    fn max_rollback_depth(&self) -> usize;
}
