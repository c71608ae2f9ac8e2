//! In-memory DAG of competing blocks above the last confirmed block: a
//! fixed ring of levels, one ordered map of nodes per level. Level 0 holds
//! exactly one confirmed root; the last level holds headers still awaiting
//! their parts. The tree owns its nodes; a pending block is shared with the
//! mempool only while `has_locked_transactions` is set.

use chain::{BlockRef, MinersQueue, PendingBlock, PendingBlockRef};
use crypto::MinerId;
use network::{DATABASE_ROLLBACKABLE_BLOCKS, MINERS_QUEUE_SIZE};
use parking_lot::Mutex;
use primitives::hash::H256;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use {chain, types};

/// Number of levels kept in the tree.
pub const TREE_DEPTH: usize = DATABASE_ROLLBACKABLE_BLOCKS + 2 + 8;

/// A slot in the tree: either a materialized block or a pending one,
/// never both.
#[derive(Clone)]
pub struct BlockTreeNode {
    pub block: Option<BlockRef>,
    pub pending: Option<PendingBlockRef>,
    /// Node sits on the active branch.
    pub executed: bool,
    /// Peer that first offered this block; `None` for locally mined ones.
    pub reporter: Option<MinerId>,
    /// Miner expected to have produced this block.
    pub miner: MinerId,
    /// Pending block is registered with the mempool.
    pub has_locked_transactions: bool,
}

impl BlockTreeNode {
    fn with_block(block: BlockRef, executed: bool, reporter: Option<MinerId>, miner: MinerId) -> Self {
        BlockTreeNode {
            block: Some(block),
            pending: None,
            executed: executed,
            reporter: reporter,
            miner: miner,
            has_locked_transactions: false,
        }
    }

    fn with_pending(pending: PendingBlockRef, reporter: Option<MinerId>, miner: MinerId) -> Self {
        BlockTreeNode {
            block: None,
            pending: Some(pending),
            executed: false,
            reporter: reporter,
            miner: miner,
            has_locked_transactions: false,
        }
    }

    pub fn id(&self) -> u32 {
        match self.block {
            Some(ref block) => block.id(),
            None => self.pending.as_ref().expect("block or pending; qed").id(),
        }
    }

    pub fn depth(&self) -> u32 {
        match self.block {
            Some(ref block) => block.depth(),
            None => self.pending.as_ref().expect("block or pending; qed").depth(),
        }
    }

    pub fn skipped_blocks(&self) -> u8 {
        match self.block {
            Some(ref block) => block.skipped_blocks(),
            None => self
                .pending
                .as_ref()
                .expect("block or pending; qed")
                .skipped_blocks(),
        }
    }

    pub fn next_miners(&self) -> Vec<MinerId> {
        match self.block {
            Some(ref block) => block.next_miners().to_vec(),
            None => self
                .pending
                .as_ref()
                .expect("block or pending; qed")
                .next_miners()
                .to_vec(),
        }
    }

    pub fn header_hash(&self) -> H256 {
        match self.block {
            Some(ref block) => *block.header_hash(),
            None => *self
                .pending
                .as_ref()
                .expect("block or pending; qed")
                .header_hash(),
        }
    }

    pub fn prev_header_hash(&self) -> H256 {
        match self.block {
            Some(ref block) => *block.prev_header_hash(),
            None => *self
                .pending
                .as_ref()
                .expect("block or pending; qed")
                .prev_header_hash(),
        }
    }

    pub fn miner_id(&self) -> MinerId {
        match self.block {
            Some(ref block) => block.miner_id(),
            None => self.pending.as_ref().expect("block or pending; qed").header().miner_id(),
        }
    }
}

type Level = BTreeMap<H256, BlockTreeNode>;

struct TreeState {
    /// Level 0 is the confirmed root, the last level holds pending headers.
    levels: VecDeque<Level>,
    mining_queue: MinersQueue,
    banned_blocks: HashSet<H256>,
    banned_reporters: HashSet<MinerId>,
}

pub struct BlockTree {
    mempool: types::MemoryPoolRef,
    state: Mutex<TreeState>,
}

impl BlockTree {
    pub fn new(mempool: types::MemoryPoolRef) -> Arc<BlockTree> {
        let mut levels = VecDeque::with_capacity(TREE_DEPTH);
        for _ in 0..TREE_DEPTH {
            levels.push_back(Level::new());
        }
        Arc::new(BlockTree {
            mempool: mempool,
            state: Mutex::new(TreeState {
                levels: levels,
                mining_queue: MinersQueue::new(),
                banned_blocks: HashSet::new(),
                banned_reporters: HashSet::new(),
            }),
        })
    }

    /// One-time load of the active branch: up to the last rollbackable
    /// confirmed blocks, oldest first. `mining_queue` is the queue as of
    /// `blocks[0]`; the next miners of every later block are folded in.
    pub fn load(&self, blocks: &[BlockRef], mining_queue: MinersQueue) {
        let mut state = self.state.lock();
        assert!(!blocks.is_empty());
        assert!(state.levels[0].is_empty() && state.mining_queue.is_empty());
        assert_eq!(mining_queue.len(), MINERS_QUEUE_SIZE);
        debug!(target: "sync", "loading block tree with {} blocks, tip {:?}", blocks.len(), blocks.last().map(|b| b.id()));

        let mut first_blocks = 0;
        if blocks.len() >= state.levels.len() {
            first_blocks = blocks.len() - (state.levels.len() - 1);
        }

        state.mining_queue = mining_queue;
        for block in &blocks[..first_blocks] {
            for miner in block.next_miners() {
                state.mining_queue.push_back(*miner);
            }
        }
        while state.mining_queue.len() > MINERS_QUEUE_SIZE {
            state.mining_queue.pop_front();
        }

        for (level, block) in blocks[first_blocks..].iter().enumerate() {
            let miner = block.miner_id();
            state.levels[level].insert(
                *block.header_hash(),
                BlockTreeNode::with_block(block.clone(), true, None, miner),
            );
        }
    }

    /// Validates and inserts a block header. Returns the new (or already
    /// existing) pending block plus a flag telling whether this header was
    /// already known.
    pub fn add_header(
        tree: &Arc<BlockTree>,
        header: chain::BlockHeader,
        reporter: Option<MinerId>,
    ) -> (Option<PendingBlockRef>, bool) {
        let mut state = tree.state.lock();
        debug!(target: "sync", "add_header {:?}, reporter: {:?}", header, reporter);

        if state.is_banned(header.hash(), reporter.as_ref()) {
            debug!(target: "sync", "block header is banned");
            return (None, false);
        }

        let parent_level = match state
            .levels
            .iter()
            .position(|level| level.contains_key(header.prev_header_hash()))
        {
            Some(parent_level) => parent_level,
            None => {
                debug!(target: "sync", "block header parent doesn't exist");
                return (None, false);
            }
        };
        if parent_level + 1 >= state.levels.len() {
            debug!(target: "sync", "block header parent is in last level");
            return (None, false);
        }

        if let Some(node) = state.levels[parent_level + 1].get(header.hash()) {
            if let Some(ref pending) = node.pending {
                debug!(target: "sync", "pending block already exists");
                return (Some(pending.clone()), true);
            }
            debug!(target: "sync", "block already exists");
            return (None, true);
        }

        // only one unexecuted reported block per reporter per level
        if let Some(reporter) = reporter {
            let duplicate_reporter = state.levels[parent_level + 1]
                .values()
                .any(|node| node.reporter == Some(reporter) && !node.executed);
            if duplicate_reporter {
                debug!(target: "sync", "reporter already has a block at this level");
                return (None, false);
            }
        }

        {
            let parent = &state.levels[parent_level][header.prev_header_hash()];
            if parent.id() + header.skipped_blocks() as u32 + 1 != header.id() {
                debug!(target: "sync", "block header id is invalid");
                return (None, false);
            }
            if parent.depth() + 1 != header.depth() {
                debug!(target: "sync", "block header depth is invalid");
                return (None, false);
            }
        }

        let expected_miner = match state.expected_miner(
            header.prev_header_hash(),
            header.skipped_blocks() as usize,
        ) {
            Some(miner) => miner,
            None => {
                debug!(target: "sync", "cannot derive the expected miner");
                return (None, false);
            }
        };
        if !header.validate(&expected_miner) {
            debug!(target: "sync", "block header validation failed");
            return (None, false);
        }

        let weak_tree = Arc::downgrade(tree);
        let header_hash = *header.hash();
        let pending = PendingBlock::new(header, expected_miner, move |pending| {
            if let Some(tree) = weak_tree.upgrade() {
                tree.on_pending_updated(pending);
            }
        });
        debug!(target: "sync", "created new pending block {:?}", pending.header());

        state.levels[parent_level + 1].insert(
            header_hash,
            BlockTreeNode::with_pending(pending.clone(), reporter, expected_miner),
        );
        (Some(pending), false)
    }

    /// Validates and inserts a full block, replacing an equal pending block
    /// if one exists.
    pub fn add_block(&self, block: BlockRef, reporter: Option<MinerId>) -> bool {
        let mut state = self.state.lock();
        debug!(target: "sync", "add_block {:?}, reporter: {:?}", block.header(), reporter);
        assert!(!state.levels[0].is_empty());

        if state.is_banned(block.header_hash(), reporter.as_ref()) {
            debug!(target: "sync", "block is banned");
            return false;
        }

        let parent_level = match state
            .levels
            .iter()
            .position(|level| level.contains_key(block.prev_header_hash()))
        {
            Some(parent_level) => parent_level,
            None => {
                debug!(target: "sync", "block parent is missing");
                return false;
            }
        };
        if parent_level + 1 >= state.levels.len() {
            debug!(target: "sync", "block parent is in last level");
            return false;
        }

        if state.levels[parent_level + 1].contains_key(block.header_hash()) {
            let node = state.levels[parent_level + 1]
                .get_mut(block.header_hash())
                .expect("key was just found; qed");
            if node.block.is_none() {
                debug!(target: "sync", "pending block already exists, replacing with ready block");
                let has_locked = node.has_locked_transactions;
                if let Some(pending) = node.pending.take() {
                    pending.set_expired();
                    if has_locked {
                        self.mempool.remove_pending_block(&pending);
                    }
                }
                node.has_locked_transactions = false;
                node.block = Some(block);
            } else {
                debug!(target: "sync", "block already exists, ignoring");
            }
            return true;
        }

        if let Some(reporter) = reporter {
            let duplicate_reporter = state.levels[parent_level + 1]
                .values()
                .any(|node| node.reporter == Some(reporter) && !node.executed);
            if duplicate_reporter {
                debug!(target: "sync", "reporter already has a block at this level");
                return false;
            }
        }

        {
            let parent = &state.levels[parent_level][block.prev_header_hash()];
            if parent.id() + block.skipped_blocks() as u32 + 1 != block.id() {
                debug!(target: "sync", "block id is invalid");
                return false;
            }
            if parent.depth() + 1 != block.depth() {
                debug!(target: "sync", "block depth is invalid");
                return false;
            }
        }

        let expected_miner = match state.expected_miner(
            block.prev_header_hash(),
            block.skipped_blocks() as usize,
        ) {
            Some(miner) => miner,
            None => {
                debug!(target: "sync", "cannot derive the expected miner");
                return false;
            }
        };
        if block.miner_id() != expected_miner {
            debug!(target: "sync", "block has invalid miner id");
            return false;
        }
        let prev_header_hash = *block.prev_header_hash();
        if !block.validate(&expected_miner, &prev_header_hash) {
            debug!(target: "sync", "validation error");
            let header_hash = *block.header_hash();
            self.ban_block_locked(&mut state, &header_hash, "block validation failed");
            return false;
        }

        state.levels[parent_level + 1].insert(
            *block.header_hash(),
            BlockTreeNode::with_block(block, false, reporter, expected_miner),
        );
        true
    }

    pub fn pending_block(&self, hash: &H256) -> Option<PendingBlockRef> {
        let state = self.state.lock();
        state
            .levels
            .iter()
            .find_map(|level| level.get(hash))
            .and_then(|node| node.pending.clone())
    }

    /// The sequence of executed blocks from the root upward.
    pub fn active_branch(&self) -> Vec<BlockTreeNode> {
        let state = self.state.lock();
        let mut branch = Vec::new();
        for level in &state.levels {
            match level.values().find(|node| node.executed) {
                Some(node) => branch.push(node.clone()),
                None => break,
            }
        }
        branch
    }

    /// The deepest chain of materialized blocks reachable from the root:
    /// the active branch, possibly extended by one candidate level.
    pub fn longest_branch(&self) -> Vec<BlockTreeNode> {
        let state = self.state.lock();
        for level_index in (0..state.levels.len()).rev() {
            let executed = match state.levels[level_index]
                .values()
                .find(|node| node.executed)
            {
                Some(node) => node,
                None => continue,
            };

            if level_index + 1 < state.levels.len() {
                for node in state.levels[level_index + 1].values() {
                    if node.block.is_none() {
                        continue;
                    }
                    let chain = state.parents(&node.header_hash(), true, true, true);
                    if !chain.is_empty() {
                        return chain;
                    }
                }
            }

            return state.parents(&executed.header_hash(), true, true, true);
        }
        Vec::new()
    }

    /// Declarative branch replacement: marks the new branch executed,
    /// rotates full levels out of the ring and folds their next-miners into
    /// the mining queue, then drops orphans.
    pub fn update_active_branch(&self, new_branch: &[BlockTreeNode]) {
        let mut state = self.state.lock();
        assert_eq!(state.levels[0].len(), 1);
        assert!(!new_branch.is_empty());
        assert!(new_branch.len() <= state.levels.len());
        {
            let root = state.levels[0].values().next().expect("one root; qed");
            assert_eq!(root.header_hash(), new_branch[0].header_hash());
        }
        debug!(
            target: "sync",
            "update_active_branch to {:?}",
            new_branch.last().expect("branch is not empty; qed").header_hash()
        );

        for level in state.levels.iter_mut() {
            for node in level.values_mut() {
                node.executed = false;
            }
        }

        state.levels[0]
            .values_mut()
            .next()
            .expect("one root; qed")
            .executed = true;
        for (index, replacement) in new_branch.iter().enumerate().skip(1) {
            assert!(new_branch[index - 1].id() < replacement.id());
            debug_assert!(replacement.block.is_some());
            let hash = replacement.header_hash();
            let level = &mut state.levels[index];
            let node = level
                .entry(hash)
                .or_insert_with(|| replacement.clone());
            if let Some(pending) = node.pending.take() {
                pending.set_expired();
                if node.has_locked_transactions {
                    self.mempool.remove_pending_block(&pending);
                    node.has_locked_transactions = false;
                }
            }
            node.block = replacement.block.clone();
            node.executed = true;
        }

        if new_branch.len() > DATABASE_ROLLBACKABLE_BLOCKS + 1 {
            let levels_to_remove = new_branch.len() - (DATABASE_ROLLBACKABLE_BLOCKS + 1);
            for _ in 0..levels_to_remove {
                assert_eq!(state.levels.front().map(|level| level.len()), Some(1));
                state.levels.pop_front();

                // the new root level keeps only the executed node
                let dropped = {
                    let front = state.levels.front_mut().expect("ring is never empty; qed");
                    let dropped: Vec<BlockTreeNode> = front
                        .values()
                        .filter(|node| !node.executed)
                        .cloned()
                        .collect();
                    front.retain(|_, node| node.executed);
                    dropped
                };
                for node in dropped {
                    self.clear_detached_pending(node);
                }

                let next_miners = {
                    let front = state.levels.front().expect("ring is never empty; qed");
                    front
                        .values()
                        .next()
                        .expect("executed root remains; qed")
                        .next_miners()
                };
                for miner in next_miners {
                    state.mining_queue.push_back(miner);
                }
                while state.mining_queue.len() > MINERS_QUEUE_SIZE {
                    state.mining_queue.pop_front();
                }
                assert_eq!(state.mining_queue.len(), MINERS_QUEUE_SIZE);
                state.levels.push_back(Level::new());
            }
            self.cleanup(&mut state);
        }
    }

    /// (block id, header hash) pairs from the deepest level down, executed
    /// nodes first per level, skipping the topmost level. Used to seed the
    /// GET_BLOCK_HEADER locator exchange.
    pub fn block_ids_and_hashes(&self, limit: usize, max_block_depth: u32) -> Vec<(u32, H256)> {
        assert!(limit > 0 && limit < 10000);
        let state = self.state.lock();
        let mut result = Vec::new();

        for level in state.levels.iter().rev().skip(1) {
            if let Some(node) = level.values().find(|node| node.executed) {
                if max_block_depth == 0 || node.depth() <= max_block_depth {
                    result.push((node.id(), node.header_hash()));
                    if result.len() >= limit {
                        return result;
                    }
                }
            }

            for node in level.values() {
                if node.block.is_none() || node.executed {
                    continue;
                }
                if max_block_depth != 0 && node.depth() > max_block_depth {
                    continue;
                }
                result.push((node.id(), node.header_hash()));
                if result.len() >= limit {
                    return result;
                }
            }
        }
        result
    }

    pub fn has_block(&self, hash: &H256) -> bool {
        let state = self.state.lock();
        state
            .levels
            .iter()
            .any(|level| level.get(hash).map_or(false, |node| node.block.is_some()))
    }

    pub fn is_in_last_level(&self, hash: &H256) -> bool {
        let state = self.state.lock();
        state
            .levels
            .back()
            .and_then(|level| level.get(hash))
            .map_or(false, |node| node.block.is_some())
    }

    /// Records the hash in the banned set, bans the reporter if one is
    /// known, removes the node and cleans up orphans.
    pub fn ban_block(&self, hash: &H256, reason: &str) {
        let mut state = self.state.lock();
        self.ban_block_locked(&mut state, hash, reason);
    }

    pub fn is_banned(&self, hash: &H256, reporter: Option<&MinerId>) -> bool {
        self.state.lock().is_banned(hash, reporter)
    }

    /// Depth of the confirmed root.
    pub fn base_depth(&self) -> u32 {
        let state = self.state.lock();
        state.levels[0]
            .values()
            .next()
            .map_or(0, |node| node.depth())
    }

    pub fn mining_queue(&self) -> MinersQueue {
        self.state.lock().mining_queue.clone()
    }

    fn ban_block_locked(&self, state: &mut TreeState, hash: &H256, reason: &str) {
        info!(target: "sync", "banning block {:?}, reason: {}", hash, reason);
        state.banned_blocks.insert(*hash);

        let level_index = match state
            .levels
            .iter()
            .position(|level| level.contains_key(hash))
        {
            Some(level_index) => level_index,
            None => return,
        };

        let node = state.levels[level_index]
            .remove(hash)
            .expect("key was just found; qed");
        debug_assert!(!node.executed);
        if let Some(reporter) = node.reporter {
            info!(target: "sync", "banning reporter {}", reporter);
            state.banned_reporters.insert(reporter);
        }
        self.clear_detached_pending(node);

        self.cleanup(state);
    }

    /// Expires a node's pending block and detaches it from the mempool.
    fn clear_detached_pending(&self, mut node: BlockTreeNode) {
        if let Some(pending) = node.pending.take() {
            pending.set_expired();
            if node.has_locked_transactions {
                self.mempool.remove_pending_block(&pending);
            }
        }
    }

    /// Removes nodes whose parent disappeared.
    fn cleanup(&self, state: &mut TreeState) {
        for level_index in 1..state.levels.len() {
            let parents: HashSet<H256> =
                state.levels[level_index - 1].keys().cloned().collect();

            let orphans: Vec<BlockTreeNode> = state.levels[level_index]
                .values()
                .filter(|node| !parents.contains(&node.prev_header_hash()))
                .cloned()
                .collect();
            if orphans.is_empty() {
                continue;
            }
            state.levels[level_index]
                .retain(|_, node| parents.contains(&node.prev_header_hash()));
            for orphan in orphans {
                self.clear_detached_pending(orphan);
            }
        }
    }

    /// Pending block state changed: register it with the mempool when its
    /// transactions become known, finish it when complete, ban it when
    /// invalid.
    fn on_pending_updated(&self, pending: &PendingBlock) {
        let mut state = self.state.lock();
        trace!(target: "sync", "on_pending_updated {:?}", pending.header());

        if pending.is_expired() {
            return;
        }

        let hash = *pending.header_hash();
        let level_index = match state
            .levels
            .iter()
            .position(|level| level.contains_key(&hash))
        {
            Some(level_index) => level_index,
            None => {
                warn!(target: "sync", "pending block {:?} not found in tree", pending.header());
                return;
            }
        };

        let node_pending = {
            let node = &state.levels[level_index][&hash];
            match node.pending {
                Some(ref node_pending) => node_pending.clone(),
                None => {
                    warn!(target: "sync", "tree node for {:?} holds no pending block", pending.header());
                    return;
                }
            }
        };
        if !::std::ptr::eq::<PendingBlock>(&*node_pending, pending) {
            warn!(target: "sync", "pending block {:?} is duplicated in tree", pending.header());
            return;
        }

        if pending.is_invalid() {
            self.ban_block_locked(&mut state, &hash, "pending block is invalid");
            return;
        }

        if pending.status() == chain::Status::MissingTransactions {
            let node = state.levels[level_index]
                .get_mut(&hash)
                .expect("key was just found; qed");
            if !node.has_locked_transactions {
                node.has_locked_transactions = true;
                // delivery of already-known transactions may advance the
                // status, so it is re-checked below
                self.mempool.add_pending_block(&node_pending);
            }
        }

        if pending.status() == chain::Status::Complete {
            trace!(target: "sync", "pending block is complete");
            if !self.finish_pending_block(&mut state, level_index, &hash) {
                pending.set_invalid();
            }
        }
    }

    /// Swaps a complete pending block for its materialized form.
    fn finish_pending_block(&self, state: &mut TreeState, level_index: usize, hash: &H256) -> bool {
        let (pending, has_locked, miner) = {
            let node = &state.levels[level_index][hash];
            (
                node.pending.clone().expect("caller checked pending; qed"),
                node.has_locked_transactions,
                node.miner,
            )
        };
        debug!(target: "sync", "finishing pending block {:?}", pending.header());

        let block = pending.create_block();
        pending.set_expired();
        if has_locked {
            self.mempool.remove_pending_block(&pending);
        }
        {
            let node = state.levels[level_index]
                .get_mut(hash)
                .expect("caller checked node; qed");
            node.pending = None;
            node.has_locked_transactions = false;
        }

        let block = match block {
            Some(block) => Arc::new(block),
            None => {
                self.ban_block_locked(state, hash, "creation of completed block failed");
                return false;
            }
        };

        let prev_header_hash = *block.prev_header_hash();
        if !block.validate(&miner, &prev_header_hash) {
            warn!(target: "sync", "completed block {:?} is invalid", block.header());
            pending.set_invalid();
            self.ban_block_locked(state, hash, "validation of created block failed");
            return false;
        }

        if let Some(node) = state.levels[level_index].get_mut(hash) {
            node.block = Some(block);
        }
        pending.set_finished();
        true
    }
}

impl TreeState {
    fn is_banned(&self, hash: &H256, reporter: Option<&MinerId>) -> bool {
        if let Some(reporter) = reporter {
            if self.banned_reporters.contains(reporter) {
                return true;
            }
        }
        self.banned_blocks.contains(hash)
    }

    /// Chain of nodes ending at `hash`, root first. Empty when the chain
    /// does not reach level 0 or contains pending-only nodes while
    /// `without_pending` is set.
    fn parents(
        &self,
        hash: &H256,
        without_pending: bool,
        include_itself: bool,
        include_first_level: bool,
    ) -> Vec<BlockTreeNode> {
        let start = match self
            .levels
            .iter()
            .rposition(|level| level.contains_key(hash))
        {
            Some(start) => start,
            None => return Vec::new(),
        };

        let mut chain = VecDeque::new();
        let mut next_hash = *hash;
        for level_index in (0..=start).rev() {
            let node = match self.levels[level_index].get(&next_hash) {
                Some(node) => node,
                None => return Vec::new(),
            };
            if without_pending && node.block.is_none() {
                return Vec::new();
            }
            next_hash = node.prev_header_hash();
            chain.push_front(node.clone());
        }

        if !include_itself {
            chain.pop_back();
        }
        if !include_first_level && !chain.is_empty() {
            chain.pop_front();
        }
        chain.into_iter().collect()
    }

    /// Deterministic, local derivation of the miner scheduled for the slot
    /// `skipped_blocks` past the given parent.
    fn expected_miner(&self, parent_hash: &H256, skipped_blocks: usize) -> Option<MinerId> {
        let parents = self.parents(parent_hash, false, true, false);

        let mut miner_index = parents.len() + skipped_blocks;
        for parent in &parents {
            miner_index += parent.skipped_blocks() as usize;
        }

        if miner_index < self.mining_queue.len() {
            return self.mining_queue.get(miner_index).cloned();
        }

        miner_index -= self.mining_queue.len();
        for parent in &parents {
            let next_miners = parent.next_miners();
            if miner_index < next_miners.len() {
                return Some(next_miners[miner_index]);
            }
            miner_index -= next_miners.len();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockTree, TREE_DEPTH};
    use chain::Status;
    use miner::MemoryPool;
    use network::MINERS_QUEUE_SIZE;
    use std::sync::Arc;
    use test_data::ChainBuilder;
    use types::{BlockTreeRef, MemoryPoolRef};

    fn loaded_tree(builder: &mut ChainBuilder) -> (BlockTreeRef, MemoryPoolRef) {
        let mempool = Arc::new(MemoryPool::new());
        let tree = BlockTree::new(mempool.clone());
        let genesis = builder.genesis();
        let queue = genesis.next_miners_queue();
        tree.load(&[genesis], queue);
        (tree, mempool)
    }

    #[test]
    fn test_load_sets_root_and_queue() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);

        assert_eq!(tree.mining_queue().len(), MINERS_QUEUE_SIZE);
        let active = tree.active_branch();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id(), 1);
        assert!(active[0].executed);
    }

    #[test]
    fn test_add_block_validations() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);
        let b2 = builder.next_block(vec![]);

        assert!(tree.add_block(b2.clone(), None));
        // duplicates are accepted but not re-inserted
        assert!(tree.add_block(b2.clone(), None));

        // a block with an unknown parent is refused
        let mut other = ChainBuilder::new().with_key(::crypto::SecretKey::from_seed(b"other"));
        other.genesis();
        let foreign = other.next_block(vec![]);
        assert!(!tree.add_block(foreign, None));
    }

    #[test]
    fn test_add_block_rejects_wrong_miner() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);

        // a block signed by a miner that is not scheduled
        let intruder = ::crypto::SecretKey::from_seed(b"intruder");
        let parent = builder.tip();
        let bad = ::chain::Block::create(
            2,
            2,
            vec![::crypto::MinerId::from(&intruder.public())],
            vec![],
            *parent.header_hash(),
            &intruder,
        );
        assert!(!tree.add_block(bad, None));
    }

    #[test]
    fn test_add_header_creates_pending_block() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);
        let b2 = builder.next_block(vec![builder.transfer(2, 5)]);

        let (pending, existed) = BlockTree::add_header(&tree, b2.header().clone(), None);
        let pending = pending.unwrap();
        assert!(!existed);
        assert_eq!(pending.status(), Status::MissingBody);

        // the same header again returns the existing pending block
        let (duplicate, existed) = BlockTree::add_header(&tree, b2.header().clone(), None);
        assert!(existed);
        assert!(Arc::ptr_eq(&duplicate.unwrap(), &pending));
    }

    #[test]
    fn test_reporter_is_limited_to_one_block_per_level() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);
        let reporter = builder.miner_id();

        let b2 = builder.next_block(vec![]);
        let (pending, _) = BlockTree::add_header(&tree, b2.header().clone(), Some(reporter));
        assert!(pending.is_some());

        // a sibling block reported by the same peer at the same level
        let b2b = ::chain::Block::create(
            3,
            2,
            vec![builder.miner_id(); 2],
            vec![],
            *builder.blocks()[0].header_hash(),
            builder.key(),
        );
        let (pending, existed) =
            BlockTree::add_header(&tree, b2b.header().clone(), Some(reporter));
        assert!(pending.is_none());
        assert!(!existed);
    }

    #[test]
    fn test_completed_pending_block_becomes_block() {
        let mut builder = ChainBuilder::new();
        let (tree, mempool) = loaded_tree(&mut builder);
        let transactions: Vec<_> = (0..3).map(|i| builder.transfer(2, i)).collect();
        let b2 = builder.next_block(transactions.clone());

        let (pending, _) = BlockTree::add_header(&tree, b2.header().clone(), None);
        let pending = pending.unwrap();

        assert_eq!(pending.add_body(b2.body().clone()), ::chain::AddResult::Correct);
        assert_eq!(
            pending.add_chunks(&[b2.chunks()[0].clone()]),
            ::chain::AddResult::Correct
        );
        // the tree registered the block with the mempool
        assert_eq!(mempool.requested_count(), 3);

        // gossip delivers the transactions and completes the block
        mempool.add(&transactions, None);
        assert!(pending.is_finished());
        assert!(tree.has_block(b2.header_hash()));
        assert_eq!(mempool.requested_count(), 0);

        // the finished block extends the longest branch
        let longest = tree.longest_branch();
        assert_eq!(longest.len(), 2);
        assert_eq!(longest[1].header_hash(), *b2.header_hash());
    }

    #[test]
    fn test_active_and_longest_branch_invariants() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);
        for _ in 0..3 {
            let block = builder.next_block(vec![]);
            assert!(tree.add_block(block, None));
        }

        let active = tree.active_branch();
        let longest = tree.longest_branch();
        assert!(active.len() <= longest.len());
        // branches share a prefix
        for (a, b) in active.iter().zip(longest.iter()) {
            if a.header_hash() != b.header_hash() {
                break;
            }
        }
        // id arithmetic holds along the longest branch
        for pair in longest.windows(2) {
            assert_eq!(
                pair[0].id() + pair[1].skipped_blocks() as u32 + 1,
                pair[1].id()
            );
            assert_eq!(pair[0].depth() + 1, pair[1].depth());
        }
    }

    #[test]
    fn test_update_active_branch_advances_one_level() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);
        let b2 = builder.next_block(vec![]);
        assert!(tree.add_block(b2.clone(), None));

        let longest = tree.longest_branch();
        assert_eq!(longest.len(), 2);
        tree.update_active_branch(&longest);

        let active = tree.active_branch();
        assert_eq!(active.len(), 2);
        assert_eq!(active[1].header_hash(), *b2.header_hash());
        assert!(active[1].executed);
    }

    #[test]
    fn test_ban_block_removes_node_and_bans_reporter() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);
        let reporter = ::crypto::MinerId::from(&::crypto::SecretKey::from_seed(b"rep").public());
        let b2 = builder.next_block(vec![]);
        assert!(tree.add_block(b2.clone(), Some(reporter)));
        let b3 = builder.next_block(vec![]);
        assert!(tree.add_block(b3.clone(), None));

        tree.ban_block(b2.header_hash(), "test");
        assert!(tree.is_banned(b2.header_hash(), None));
        assert!(tree.is_banned(&Default::default(), Some(&reporter)));
        assert!(!tree.has_block(b2.header_hash()));
        // the child became an orphan and was removed too
        assert!(!tree.has_block(b3.header_hash()));

        // banned blocks cannot come back
        assert!(!tree.add_block(b2, None));
    }

    #[test]
    fn test_tampered_block_is_banned() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);

        // a correctly signed header whose transactions do not match the
        // body's chunk hashes
        let fork = builder.fork_at(0);
        let mut fork = fork;
        let good = builder.next_block(vec![builder.transfer(2, 1)]);
        let other = fork.next_block(vec![fork.transfer(2, 2)]);
        let tampered = Arc::new(::chain::Block::from_parts(
            good.header().clone(),
            good.body().clone(),
            other.chunks().to_vec(),
            other
                .ordered_transactions()
                .map(|transaction| (transaction.id(), transaction.clone()))
                .collect(),
        ));

        assert!(!tree.add_block(tampered.clone(), None));
        assert!(tree.is_banned(tampered.header_hash(), None));
        // the banned block stays rejected
        assert!(!tree.add_block(tampered, None));
    }

    #[test]
    fn test_block_ids_and_hashes_order() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);
        let mut blocks = vec![builder.blocks()[0].clone()];
        for _ in 0..3 {
            let block = builder.next_block(vec![]);
            assert!(tree.add_block(block.clone(), None));
            let longest = tree.longest_branch();
            tree.update_active_branch(&longest);
            blocks.push(block);
        }

        let ids = tree.block_ids_and_hashes(100, 0);
        // deepest first
        assert_eq!(ids[0].0, 4);
        assert_eq!(ids.last().unwrap().0, 1);
        assert_eq!(ids.len(), 4);

        // depth cap excludes the tip
        let capped = tree.block_ids_and_hashes(100, 3);
        assert_eq!(capped[0].0, 3);
    }

    #[test]
    fn test_level_rotation_keeps_queue_full() {
        let mut builder = ChainBuilder::new();
        let (tree, _) = loaded_tree(&mut builder);

        // grow the active branch beyond the rollbackable depth
        for _ in 0..(TREE_DEPTH + 4) {
            let block = builder.next_block(vec![]);
            assert!(tree.add_block(block, None));
            let longest = tree.longest_branch();
            tree.update_active_branch(&longest);
            assert_eq!(tree.mining_queue().len(), MINERS_QUEUE_SIZE);
        }

        // the ring rotated: the root moved up
        let active = tree.active_branch();
        assert!(active[0].id() > 1);
        assert_eq!(
            active.len(),
            ::network::DATABASE_ROLLBACKABLE_BLOCKS + 1
        );
    }
}
