use chain::{Block, BlockRef, Detail, Transaction, TransactionRef};
use crypto::{MinerId, SecretKey, UserId};
use network::MINERS_QUEUE_SIZE;
use primitives::bytes::Bytes;
use primitives::hash::H256;
use std::time::{SystemTime, UNIX_EPOCH};

/// Builds valid single-miner chains for tests. Block 1 carries the init
/// transaction; every later block schedules the same miner again.
pub struct ChainBuilder {
    key: SecretKey,
    block_interval: u32,
    initialization_time: u64,
    blocks: Vec<BlockRef>,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is past the epoch; qed")
        .as_secs()
}

impl ChainBuilder {
    pub fn new() -> ChainBuilder {
        ChainBuilder::with_interval(15)
    }

    pub fn with_interval(block_interval: u32) -> ChainBuilder {
        ChainBuilder {
            key: SecretKey::from_seed(b"chain-builder"),
            block_interval: block_interval,
            initialization_time: ((now() - 60) / 60) * 60,
            blocks: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: SecretKey) -> ChainBuilder {
        assert!(self.blocks.is_empty());
        self.key = key;
        self
    }

    /// Moves the declared initialization time back so that `count` blocks
    /// are already due. Call before `genesis`.
    pub fn backdated(mut self, count: u32) -> ChainBuilder {
        assert!(self.blocks.is_empty());
        let offset = (count as u64 + 1) * self.block_interval as u64;
        self.initialization_time = ((now() - 60 - offset) / 60) * 60;
        self
    }

    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    pub fn miner_id(&self) -> MinerId {
        MinerId::from(&self.key.public())
    }

    pub fn user_id(&self) -> UserId {
        UserId::from(&self.key.public())
    }

    pub fn initialization_time(&self) -> u64 {
        self.initialization_time
    }

    pub fn blocks(&self) -> &[BlockRef] {
        &self.blocks
    }

    pub fn tip(&self) -> BlockRef {
        self.blocks.last().expect("genesis was built; qed").clone()
    }

    /// The init transaction of this chain.
    pub fn init_transaction(&self) -> TransactionRef {
        Transaction::signed(
            1,
            Detail::Init {
                initialization_time: self.initialization_time,
                block_interval: self.block_interval,
            },
            &self.key,
        )
    }

    /// Builds block 1. The whole mining queue is filled with this builder's
    /// miner.
    pub fn genesis(&mut self) -> BlockRef {
        assert!(self.blocks.is_empty());
        let block = Block::create(
            1,
            1,
            vec![self.miner_id(); MINERS_QUEUE_SIZE],
            vec![self.init_transaction()],
            H256::default(),
            &self.key,
        );
        self.blocks.push(block.clone());
        block
    }

    /// Builds the next block with no skipped slots.
    pub fn next_block(&mut self, transactions: Vec<TransactionRef>) -> BlockRef {
        self.next_block_skipping(0, transactions)
    }

    /// Builds the next block after `skipped` empty slots.
    pub fn next_block_skipping(
        &mut self,
        skipped: usize,
        transactions: Vec<TransactionRef>,
    ) -> BlockRef {
        let parent = self.tip();
        let block = Block::create(
            parent.id() + skipped as u32 + 1,
            parent.depth() + 1,
            vec![self.miner_id(); skipped + 1],
            transactions,
            *parent.header_hash(),
            &self.key,
        );
        self.blocks.push(block.clone());
        block
    }

    /// A builder continuing this chain from the block at `index`, used to
    /// grow competing branches.
    pub fn fork_at(&self, index: usize) -> ChainBuilder {
        ChainBuilder {
            key: self.key.clone(),
            block_interval: self.block_interval,
            initialization_time: self.initialization_time,
            blocks: self.blocks[..=index].to_vec(),
        }
    }

    /// A transfer back to the builder's own user.
    pub fn transfer(&self, block_id: u32, amount: u64) -> TransactionRef {
        Transaction::signed(
            block_id,
            Detail::Transfer {
                to: self.user_id(),
                amount: amount,
            },
            &self.key,
        )
    }

    /// A storage entry with a payload of the given size.
    pub fn storage_entry(&self, block_id: u32, key: &[u8], value_size: usize) -> TransactionRef {
        Transaction::signed(
            block_id,
            Detail::StorageEntry {
                key: Bytes::from(key),
                value: Bytes::from(vec![0x5au8; value_size]),
            },
            &self.key,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ChainBuilder;

    #[test]
    fn test_builder_produces_linked_blocks() {
        let mut builder = ChainBuilder::new();
        let b1 = builder.genesis();
        let tx = builder.transfer(2, 100);
        let b2 = builder.next_block(vec![tx]);

        assert_eq!(b2.id(), 2);
        assert_eq!(b2.depth(), 2);
        assert_eq!(b2.prev_header_hash(), b1.header_hash());
        assert!(b2.validate(&builder.miner_id(), b1.header_hash()));
    }

    #[test]
    fn test_builder_skipped_blocks() {
        let mut builder = ChainBuilder::new();
        builder.genesis();
        let b2 = builder.next_block_skipping(2, vec![]);
        assert_eq!(b2.id(), 4);
        assert_eq!(b2.depth(), 2);
        assert_eq!(b2.skipped_blocks(), 2);
    }
}
