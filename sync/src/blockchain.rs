//! The blockchain control loop: a single dedicated thread that mines,
//! validates, executes, rolls back and re-executes blocks, and feeds the
//! events fan-out. Everything that mutates the unconfirmed store happens on
//! this thread; the public surface is thread-safe and either reads through
//! thread-safe collaborators or posts commands onto the loop.

use block_tree::{BlockTree, BlockTreeNode};
use chain::{Block, BlockRef, Detail, Transaction, TransactionId, TransactionRef};
use crypto::{MinerId, SecretKey};
use crypto_verifier::CryptoVerifier;
use events::{Events, EventsListener, EventsListenerCallbacks};
use miner::MemoryPool;
use miners_queue::next_miners;
use network::{
    ConsensusParams, BLOCK_MAX_TRANSACTIONS, BLOCK_MAX_TRANSACTIONS_SIZE, MINERS_QUEUE_SIZE,
    TRANSACTION_MAX_BLOCK_ID_DIFFERENCE,
};
use parking_lot::Mutex;
use post_transaction::{PostTransactionCallback, PostTransactionResult, PostTransactionStatus};
use primitives::hash::H256;
use ser::deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use transactions::{execute_transaction, validate_transaction};
use types::{BlockTreeRef, BlockchainRef, EventsRef, MemoryPoolRef, StorageRef, VerifierRef};
use Error;

/// How often the control loop wakes up.
const TICK: Duration = Duration::from_millis(100);

/// Deadline for executing pending transactions on an idle tick.
const IDLE_EXECUTION_DEADLINE: Duration = Duration::from_secs(1);

/// Deadline for collecting transactions while mining.
const MINING_DEADLINE: Duration = Duration::from_secs(2);

pub struct BlockchainOptions {
    /// Key this node signs blocks with.
    pub miner_key: SecretKey,
    /// Mine block 1 when the store is empty.
    pub initialize: bool,
    /// Known first blocks used instead of mining block 1.
    pub first_blocks: BTreeMap<u32, BlockRef>,
    /// Disabled in tests that drive the chain manually.
    pub block_production: bool,
}

impl BlockchainOptions {
    pub fn new(miner_key: SecretKey) -> BlockchainOptions {
        BlockchainOptions {
            miner_key: miner_key,
            initialize: true,
            first_blocks: BTreeMap::new(),
            block_production: true,
        }
    }
}

struct ControlState {
    last_mined_block_id: u32,
    last_mining_time: Instant,
    last_update: Instant,
}

enum Command {
    Post {
        transaction: TransactionRef,
        callback: PostTransactionCallback,
    },
    ExecuteVerified {
        transaction: TransactionRef,
        callback: PostTransactionCallback,
    },
    Stop,
}

pub struct Blockchain {
    params: ConsensusParams,
    miner_key: SecretKey,
    block_production: bool,
    store: StorageRef,
    verifier: VerifierRef,
    mempool: MemoryPoolRef,
    tree: BlockTreeRef,
    events: EventsRef,
    initialization_time: AtomicU64,
    control: Mutex<ControlState>,
    sender: Mutex<Option<Sender<Command>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is past the epoch; qed")
        .as_secs()
}

impl Blockchain {
    /// Builds the components, initializes and loads the chain, then starts
    /// the control thread.
    pub fn new(
        params: ConsensusParams,
        options: BlockchainOptions,
        store: StorageRef,
    ) -> Result<BlockchainRef, Error> {
        let verifier = Arc::new(CryptoVerifier::new(params.verifier_threads));
        let mempool = Arc::new(MemoryPool::new());
        let tree = BlockTree::new(mempool.clone());
        let events = Arc::new(Events::new());

        let blockchain = Arc::new(Blockchain {
            params: params,
            miner_key: options.miner_key.clone(),
            block_production: options.block_production,
            store: store,
            verifier: verifier,
            mempool: mempool,
            tree: tree,
            events: events,
            initialization_time: AtomicU64::new(0),
            control: Mutex::new(ControlState {
                last_mined_block_id: 0,
                last_mining_time: Instant::now(),
                last_update: Instant::now(),
            }),
            sender: Mutex::new(None),
            thread: Mutex::new(None),
        });

        if blockchain.store.confirmed().latest_block_header().is_none() {
            blockchain.init(&options)?;
        }
        blockchain.load()?;

        let (sender, receiver) = channel();
        *blockchain.sender.lock() = Some(sender);
        let loop_blockchain = blockchain.clone();
        let thread = thread::Builder::new()
            .name("blockchain".to_owned())
            .spawn(move || loop_blockchain.run(receiver))
            .expect("spawning blockchain thread");
        *blockchain.thread.lock() = Some(thread);

        info!(target: "sync", "blockchain started at block {}", blockchain.latest_block_id());
        Ok(blockchain)
    }

    pub fn shutdown(&self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Command::Stop);
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        self.verifier.stop();
        self.events.stop();
    }

    pub fn block_tree(&self) -> &BlockTreeRef {
        &self.tree
    }

    pub fn pending_transactions(&self) -> &MemoryPoolRef {
        &self.mempool
    }

    pub fn store(&self) -> &StorageRef {
        &self.store
    }

    pub fn miner_id(&self) -> MinerId {
        MinerId::from(&self.miner_key.public())
    }

    pub fn initialization_time(&self) -> u64 {
        self.initialization_time.load(Ordering::SeqCst)
    }

    pub fn block_interval(&self) -> u32 {
        self.params.block_interval
    }

    pub fn latest_block_id(&self) -> u32 {
        self.store.confirmed().latest_block_id()
    }

    /// Block id that should exist by now according to wall time.
    pub fn expected_block_id(&self) -> u32 {
        let initialization_time = self.initialization_time();
        debug_assert!(initialization_time != 0);
        ((unix_time().saturating_sub(initialization_time)) / self.block_interval() as u64) as u32
    }

    /// Block id new transactions are validated against. Widened while the
    /// node is desynchronized so gossip stays acceptable.
    pub fn pending_execution_block_id(&self) -> u32 {
        if self.is_desynchronized() {
            return self.latest_block_id() + (MINERS_QUEUE_SIZE / 2) as u32;
        }
        self.expected_block_id().max(self.latest_block_id() + 1)
    }

    pub fn is_desynchronized(&self) -> bool {
        (self.latest_block_id() + (MINERS_QUEUE_SIZE / 2) as u32) < self.expected_block_id()
    }

    pub fn register_events_listener(&self, callbacks: EventsListenerCallbacks) -> EventsListener {
        self.events.register(callbacks)
    }

    /// Adds gossiped transactions to the mempool; they are executed later
    /// by the control loop.
    pub fn add_transactions(
        &self,
        transactions: &[TransactionRef],
        reporter: Option<MinerId>,
    ) -> usize {
        self.mempool.add(transactions, reporter)
    }

    /// Finds a transaction in the block tree, the store or the mempool.
    /// The returned block id is zero for unconfirmed transactions.
    pub fn transaction(&self, id: &TransactionId) -> Option<(TransactionRef, u32)> {
        for node in self.tree.active_branch() {
            if let Some(ref block) = node.block {
                if let Some(transaction) = block.transaction(id) {
                    return Some((transaction, node.id()));
                }
            }
        }

        if let Some(found) = self.store.unconfirmed().transaction_with_block_id(id) {
            return Some(found);
        }

        self.mempool.transaction(id).map(|transaction| (transaction, 0))
    }

    /// Index-aligned lookup of many transactions.
    pub fn transactions(&self, ids: &[TransactionId]) -> Vec<Option<TransactionRef>> {
        let active_branch = self.tree.active_branch();
        ids.iter()
            .map(|id| {
                if let Some(transaction) = self.mempool.transaction(id) {
                    return Some(transaction);
                }
                for node in &active_branch {
                    if let Some(ref block) = node.block {
                        if let Some(transaction) = block.transaction(id) {
                            return Some(transaction);
                        }
                    }
                }
                self.store.unconfirmed().transaction(id)
            })
            .collect()
    }

    /// Posts a raw serialized transaction.
    pub fn post_raw_transaction(&self, data: &[u8], callback: PostTransactionCallback) {
        match deserialize::<_, Transaction>(data) {
            Ok(transaction) => self.post_transaction(Arc::new(transaction), callback),
            Err(err) => callback(PostTransactionResult {
                transaction_id: None,
                status: PostTransactionStatus::SerializerError,
                details: format!("{}", err),
            }),
        }
    }

    /// Posts a transaction: a quick check on the control thread, signature
    /// verification on a worker, then execution back on the control thread.
    pub fn post_transaction(&self, transaction: TransactionRef, callback: PostTransactionCallback) {
        let command = Command::Post {
            transaction: transaction,
            callback: callback,
        };
        let failed = match *self.sender.lock() {
            Some(ref sender) => sender.send(command).err(),
            None => Some(::std::sync::mpsc::SendError(command)),
        };
        if let Some(::std::sync::mpsc::SendError(command)) = failed {
            if let Command::Post {
                transaction,
                callback,
            } = command
            {
                callback(PostTransactionResult::new(
                    transaction.id(),
                    PostTransactionStatus::Timeout,
                ));
            }
        }
    }

    // -- control thread --

    fn run(&self, receiver: Receiver<Command>) {
        let mut next_check = Instant::now() + TICK;
        loop {
            let now = Instant::now();
            if now >= next_check {
                self.check();
                next_check = Instant::now() + TICK;
                continue;
            }

            match receiver.recv_timeout(next_check - now) {
                Ok(Command::Stop) => break,
                Ok(Command::Post {
                    transaction,
                    callback,
                }) => self.handle_post(transaction, callback),
                Ok(Command::ExecuteVerified {
                    transaction,
                    callback,
                }) => self.handle_execute_verified(transaction, callback),
                Err(RecvTimeoutError::Timeout) => {
                    self.check();
                    next_check = Instant::now() + TICK;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// One tick: branch update, else mining, else transaction execution.
    fn check(&self) {
        if self.update_branch() {
            return;
        }
        if self.check_mining() {
            return;
        }
        self.check_transactions();
    }

    fn handle_post(&self, transaction: TransactionRef, callback: PostTransactionCallback) {
        let transaction_id = transaction.id();
        trace!(target: "sync", "posting transaction {:?}", transaction_id);

        if self.is_desynchronized() {
            return callback(PostTransactionResult::new(
                transaction_id,
                PostTransactionStatus::Desynchronized,
            ));
        }

        // a transaction racing its own verification lands here once the
        // first instance executed; it is reported, never re-executed
        if self.mempool.has_executed(&transaction_id) {
            return callback(PostTransactionResult::new(
                transaction_id,
                PostTransactionStatus::Duplicated,
            ));
        }

        self.mempool.add_if_requested(&transaction, false);

        if !self.mempool.can_add(&transaction_id) {
            return callback(PostTransactionResult::new(
                transaction_id,
                PostTransactionStatus::ReachedPendingLimit,
            ));
        }

        let quick_check =
            self.can_execute_transaction(&transaction, self.pending_execution_block_id());
        if !quick_check.is_success() {
            return callback(quick_check);
        }

        let sender = self.sender.lock().clone();
        let verified_transaction = transaction.clone();
        self.verifier.verify_async(
            transaction,
            Box::new(move |result| {
                let transaction = verified_transaction;
                match result {
                    None => callback(PostTransactionResult::new(
                        transaction.id(),
                        PostTransactionStatus::Timeout,
                    )),
                    Some(false) => callback(PostTransactionResult::new(
                        transaction.id(),
                        PostTransactionStatus::SignatureError,
                    )),
                    Some(true) => {
                        let transaction_id = transaction.id();
                        let command = Command::ExecuteVerified {
                            transaction: transaction,
                            callback: callback,
                        };
                        let failed = match sender {
                            Some(ref sender) => sender.send(command).err(),
                            None => Some(::std::sync::mpsc::SendError(command)),
                        };
                        if let Some(::std::sync::mpsc::SendError(command)) = failed {
                            if let Command::ExecuteVerified { callback, .. } = command {
                                callback(PostTransactionResult::new(
                                    transaction_id,
                                    PostTransactionStatus::Timeout,
                                ));
                            }
                        }
                    }
                }
            }),
        );
    }

    fn handle_execute_verified(
        &self,
        transaction: TransactionRef,
        callback: PostTransactionCallback,
    ) {
        if !self.mempool.can_add(&transaction.id()) {
            return callback(PostTransactionResult::new(
                transaction.id(),
                PostTransactionStatus::ReachedPendingLimit,
            ));
        }
        let result =
            self.execute_one(&transaction, self.pending_execution_block_id(), true);
        callback(result);
    }

    /// Compares the active and the longest branch; rolls back and
    /// re-executes when they diverge. Returns true when anything changed.
    fn update_branch(&self) -> bool {
        let active = self.tree.active_branch();
        let longest = self.tree.longest_branch();

        let active_tip = active.last().expect("active branch holds the root; qed");
        let longest_tip = match longest.last() {
            Some(longest_tip) => longest_tip,
            None => return false,
        };
        if active.len() == longest.len() && active_tip.header_hash() == longest_tip.header_hash()
        {
            return false;
        }

        assert!(longest.len() >= active.len());
        assert_eq!(longest[0].header_hash(), active[0].header_hash());
        assert_eq!(active_tip.id(), self.store.confirmed().latest_block_id());

        // deepest shared node
        let mut common_parent = 0;
        for index in 0..active.len() {
            if active[index].header_hash() != longest[index].header_hash() {
                break;
            }
            common_parent = index;
        }

        let blocks_to_rollback = active.len() - (common_parent + 1);
        if blocks_to_rollback > 0 {
            if !self.store.rollback(blocks_to_rollback) {
                error!(
                    target: "sync",
                    "store cannot roll back {} blocks to the common parent",
                    blocks_to_rollback
                );
                panic!("store rollback failed, store and tree have diverged");
            }
            assert_eq!(
                self.store.confirmed().latest_block_id(),
                active[common_parent].id()
            );
        } else {
            self.store.clear();
        }

        self.mempool.clear_executed();

        // execute the new branch one block at a time
        let mut success = true;
        let mut executed_blocks = 0;
        for node in &longest[common_parent + 1..] {
            let block = node
                .block
                .clone()
                .expect("longest branch contains only materialized blocks; qed");
            if !self.add_block(block, false) {
                info!(target: "sync", "invalid block {:?}", node.header_hash());
                success = false;
                break;
            }
            executed_blocks += 1;
        }

        if !success {
            // restore the previous branch and ban the offender
            if executed_blocks > 0 && !self.store.rollback(executed_blocks) {
                error!(target: "sync", "store cannot roll back while restoring the old branch");
                panic!("store rollback failed, store and tree have diverged");
            }
            for node in &active[common_parent + 1..] {
                let block = node
                    .block
                    .clone()
                    .expect("active branch contains only materialized blocks; qed");
                if !self.add_block(block, false) {
                    panic!("cannot restore the old branch");
                }
            }
            let banned = longest[common_parent + executed_blocks + 1].header_hash();
            self.tree.ban_block(&banned, "execution error");
        } else {
            assert_eq!(
                self.store.confirmed().latest_block_id(),
                longest_tip.id()
            );
            self.tree.update_active_branch(&longest);
            self.control.lock().last_update = Instant::now();

            let new_blocks: Vec<BlockRef> = longest[common_parent + 1..]
                .iter()
                .map(|node| node.block.clone().expect("materialized; qed"))
                .collect();
            self.events.on_blocks(new_blocks, blocks_to_rollback > 0);

            // transactions of abandoned blocks go back to the front of the
            // pending queue
            let blocks_to_recover: Vec<BlockRef> = active[common_parent + 1..]
                .iter()
                .map(|node| node.block.clone().expect("materialized; qed"))
                .collect();
            if !blocks_to_recover.is_empty() {
                self.recover_transactions(&blocks_to_recover);
            }
        }

        info!(
            target: "sync",
            "{} pending transactions, {} KB",
            self.mempool.pending_count(),
            self.mempool.pending_size() / 1024
        );
        true
    }

    /// Re-feeds non-management transactions of rolled-back blocks. They are
    /// added as executed (they are crypto-verified already) and immediately
    /// cleared, which puts them at the front of the pending queue.
    fn recover_transactions(&self, blocks: &[BlockRef]) {
        debug_assert_eq!(self.mempool.executed_count(), 0);
        for block in blocks {
            debug!(
                target: "sync",
                "recovering {} transactions from block {}",
                block.transactions_count(),
                block.id()
            );
            let transactions: Vec<TransactionRef> = block
                .ordered_transactions()
                .filter(|transaction| !transaction.is_management())
                .cloned()
                .collect();
            self.mempool.add_executed(&transactions);
        }
        self.mempool.clear_executed();
    }

    /// Mines when it is this miner's turn. Returns true when a block was
    /// produced.
    fn check_mining(&self) -> bool {
        if !self.block_production {
            return false;
        }

        let latest_block_id = self.latest_block_id();
        let expected_block_id = self.expected_block_id();
        if latest_block_id >= expected_block_id {
            return false;
        }
        {
            let control = self.control.lock();
            if control.last_mined_block_id >= expected_block_id {
                // never mine the same block twice
                return false;
            }
            if control.last_mining_time.elapsed()
                < Duration::from_secs(self.block_interval() as u64 / 2)
            {
                return false;
            }
        }

        let miner_id = self.miner_id();
        let active_branch = self.tree.active_branch();
        let mining_queue = self.store.confirmed().miners_queue();

        let mut last_different_miner_index = 0;
        for (index, node) in active_branch.iter().enumerate() {
            if node.miner_id() != miner_id {
                last_different_miner_index = index;
            }
        }

        // over-quorum evidence that this node lost the network: suppress
        // mining so it does not grow a lonely branch
        let rollbackable = ::network::DATABASE_ROLLBACKABLE_BLOCKS;
        let other_miners_in_queue = mining_queue
            .iter()
            .filter(|miner| **miner != miner_id)
            .count();
        let probably_desynchronized = last_different_miner_index < rollbackable / 2
            && (active_branch[0].id() + (rollbackable / 2) as u32) < expected_block_id
            && other_miners_in_queue >= mining_queue.len() * 8 / 10;
        if probably_desynchronized && mining_queue.front() != Some(&miner_id) {
            warn!(
                target: "sync",
                "skipping block production, too many blocks from other nodes are missing; \
                 check the connection to the network"
            );
            self.control.lock().last_mining_time = Instant::now();
            return false;
        }

        let mut mining_queue_index = (expected_block_id - latest_block_id - 1) as usize;
        if mining_queue_index >= mining_queue.len() {
            // past the queue: mine only from one of the last 16 slots, and
            // only when the chain has been quiet for a full interval
            if self.control.lock().last_update.elapsed()
                < Duration::from_secs(self.block_interval() as u64)
            {
                return false;
            }

            let mut our_mining_turn = 0;
            for index in mining_queue.len().saturating_sub(16)..mining_queue.len() {
                if mining_queue[index] == miner_id {
                    our_mining_turn = index;
                }
            }
            if our_mining_turn == 0 {
                return false;
            }
            mining_queue_index = our_mining_turn;
        } else if mining_queue[mining_queue_index] != miner_id {
            return false;
        }

        let new_block_id = latest_block_id + mining_queue_index as u32 + 1;
        {
            let mut control = self.control.lock();
            control.last_mining_time = Instant::now();
            control.last_mined_block_id = new_block_id;
        }

        let block = self.mine_block(new_block_id, Instant::now() + MINING_DEADLINE);
        self.tree.add_block(block, None);
        self.update_branch()
    }

    /// Executes pending transactions against the unconfirmed store for up
    /// to a second.
    fn check_transactions(&self) {
        self.process_pending_transactions(
            self.pending_execution_block_id(),
            Instant::now() + IDLE_EXECUTION_DEADLINE,
            0,
            0,
        );
    }

    /// Validates, crypto-verifies and tentatively executes pending
    /// transactions in batches until the deadline or the given limits are
    /// reached. Zero limits mean no limit.
    fn process_pending_transactions(
        &self,
        block_id: u32,
        deadline: Instant,
        max_transactions: usize,
        max_transactions_size: usize,
    ) {
        while Instant::now() < deadline {
            let pending = self.mempool.pending(128);
            if pending.is_empty() {
                break;
            }

            let mut invalid: BTreeSet<TransactionId> = BTreeSet::new();
            let mut prevalidated = Vec::new();
            for transaction in pending {
                if !self
                    .can_execute_transaction(&transaction, block_id)
                    .is_success()
                {
                    invalid.insert(transaction.id());
                    continue;
                }
                prevalidated.push(transaction);
            }

            let to_verify: Vec<TransactionRef> = prevalidated
                .iter()
                .filter(|transaction| !self.mempool.is_crypto_verified(&transaction.id()))
                .cloned()
                .collect();
            let results = self.verifier.verify_batch(&to_verify);
            for (transaction, is_valid) in to_verify.iter().zip(results) {
                if is_valid {
                    self.mempool.mark_crypto_verified(&transaction.id());
                } else {
                    warn!(
                        target: "sync",
                        "transaction {:?} has invalid signatures",
                        transaction.id()
                    );
                    invalid.insert(transaction.id());
                }
            }

            trace!(
                target: "sync",
                "executing {} pending transactions for block {}",
                prevalidated.len(),
                block_id
            );
            let mut finished = false;
            for transaction in &prevalidated {
                if invalid.contains(&transaction.id()) {
                    continue;
                }
                if max_transactions != 0
                    && self.mempool.executed_count() + 1 > max_transactions
                {
                    finished = true;
                    break;
                }
                if max_transactions_size != 0
                    && self.mempool.executed_size() as usize + transaction.size()
                        > max_transactions_size
                {
                    finished = true;
                    break;
                }
                if !self.execute_one(transaction, block_id, false).is_success() {
                    invalid.insert(transaction.id());
                }
            }

            if !invalid.is_empty() {
                self.mempool.remove(&invalid);
            }
            if finished {
                return;
            }
        }
    }

    /// Checks the window and the kind; no store access.
    fn can_execute_transaction(
        &self,
        transaction: &TransactionRef,
        block_id: u32,
    ) -> PostTransactionResult {
        if transaction.is_management() {
            return PostTransactionResult::with_details(
                transaction.id(),
                PostTransactionStatus::ValidationError,
                "this type of transaction can not be posted",
            );
        }

        if block_id >= transaction.block_id() + TRANSACTION_MAX_BLOCK_ID_DIFFERENCE
            || transaction.block_id() > block_id
        {
            return PostTransactionResult::new(
                transaction.id(),
                PostTransactionStatus::Outdated,
            );
        }

        PostTransactionResult::new(transaction.id(), PostTransactionStatus::Success)
    }

    /// Validates and tentatively executes one transaction against the
    /// unconfirmed store.
    fn execute_one(
        &self,
        transaction: &TransactionRef,
        block_id: u32,
        is_crypto_verified: bool,
    ) -> PostTransactionResult {
        let result = self.can_execute_transaction(transaction, block_id);
        if !result.is_success() {
            return result;
        }

        if self
            .store
            .unconfirmed()
            .transaction(&transaction.id())
            .is_some()
        {
            return PostTransactionResult::new(
                transaction.id(),
                PostTransactionStatus::Duplicated,
            );
        }

        if !is_crypto_verified
            && !self.mempool.is_crypto_verified(&transaction.id())
            && !transaction.validate_signatures()
        {
            return PostTransactionResult::new(
                transaction.id(),
                PostTransactionStatus::SignatureError,
            );
        }

        if let Err(err) = validate_transaction(&**transaction, block_id, self.store.unconfirmed())
        {
            debug!(
                target: "sync",
                "transaction validation error ({:?}): {}",
                transaction.id(),
                err
            );
            return PostTransactionResult::with_details(
                transaction.id(),
                PostTransactionStatus::ValidationError,
                format!("{}", err),
            );
        }

        execute_transaction(&**transaction, block_id, self.store.unconfirmed());

        let is_new = self.mempool.add_executed(&[transaction.clone()]) == 1;
        if is_new {
            self.events.on_new_transactions(vec![transaction.clone()]);
        }

        PostTransactionResult::new(transaction.id(), PostTransactionStatus::Success)
    }

    /// Block 1: the init transaction, mined once per network.
    fn mine_first_block(&self) -> BlockRef {
        let initialization_time = ((unix_time() - 60) / 60) * 60;
        let init = Transaction::signed(
            1,
            Detail::Init {
                initialization_time: initialization_time,
                block_interval: self.block_interval(),
            },
            &self.miner_key,
        );
        self.create_block(1, vec![init])
    }

    /// Collects executed transactions, appends the reward and signs a new
    /// block.
    fn mine_block(&self, block_id: u32, deadline: Instant) -> BlockRef {
        debug_assert!(block_id != 1);
        info!(target: "sync", "mining block {}", block_id);

        self.store.clear();
        self.mempool.clear_executed();

        self.process_pending_transactions(
            block_id,
            deadline,
            BLOCK_MAX_TRANSACTIONS - 1,
            BLOCK_MAX_TRANSACTIONS_SIZE - 1024,
        );
        let mut transactions = self.mempool.executed(BLOCK_MAX_TRANSACTIONS);

        let miner_id = self.miner_id();
        let miner_key = self.miner_key.public();
        let unconfirmed = self.store.unconfirmed();
        match unconfirmed.miner(&miner_id) {
            None => {
                warn!(target: "sync", "cannot create the reward transaction, miner does not exist");
            }
            Some(miner) => {
                let owner = unconfirmed.user(&miner.owner);
                if owner.map_or(false, |owner| owner.has_key(&miner_key)) {
                    let reward = Transaction::signed(
                        block_id,
                        Detail::Commit {
                            miner: miner_id,
                            pricing: unconfirmed.pricing(),
                            transactions: transactions.len() as u32,
                            users: unconfirmed.users_count(),
                            tokens: unconfirmed.tokens(),
                            staked_tokens: unconfirmed.staked_tokens(),
                        },
                        &self.miner_key,
                    );
                    transactions.push(reward);
                } else {
                    warn!(
                        target: "sync",
                        "cannot create the reward transaction, the miner key is not an owner key"
                    );
                }
            }
        }

        self.create_block(block_id, transactions)
    }

    fn create_block(&self, block_id: u32, transactions: Vec<TransactionRef>) -> BlockRef {
        assert!(transactions.len() <= BLOCK_MAX_TRANSACTIONS);
        let transactions_size: usize = transactions
            .iter()
            .map(|transaction| transaction.size())
            .sum();
        assert!(transactions_size <= BLOCK_MAX_TRANSACTIONS_SIZE);
        info!(target: "sync", "creating block {}", block_id);

        let last_header = self.store.confirmed().latest_block_header();
        debug_assert_eq!(last_header.is_some(), block_id != 1);

        let (depth, prev_header_hash) = match last_header {
            Some(ref last) => (last.depth() + 1, *last.hash()),
            None => (1, H256::default()),
        };

        let next_miners: Vec<MinerId> = match last_header {
            None => vec![self.miner_id(); MINERS_QUEUE_SIZE],
            Some(ref last) => next_miners(
                &self.store.confirmed().miners_queue(),
                &self.store.confirmed().top_miners(),
                block_id - last.id(),
                block_id,
            )
            .into_iter()
            .collect(),
        };

        Block::create(
            block_id,
            depth,
            next_miners,
            transactions,
            prev_header_hash,
            &self.miner_key,
        )
    }

    /// Validates a block against the confirmed tip, executes every
    /// transaction, installs and commits it. Control thread only.
    fn add_block(&self, block: BlockRef, ignore_time: bool) -> bool {
        info!(
            target: "sync",
            "adding block {:?} with {} transactions ({} KB)",
            block.header(),
            block.transactions_count(),
            block.transactions_size() / 1024
        );

        let last_header = self.store.confirmed().latest_block_header();
        let mining_queue = self.store.confirmed().miners_queue();
        let block_next_miners = block.next_miners().to_vec();

        if block.id() == 1 {
            if last_header.is_some() || !mining_queue.is_empty() {
                return false;
            }
            if block_next_miners.len() != MINERS_QUEUE_SIZE {
                return false;
            }
            if block.depth() != 1 {
                return false;
            }
            if block.transactions_count() != 1 {
                return false;
            }
            let first_transaction = match block.transaction(block.transaction_id(0)) {
                Some(first_transaction) => first_transaction,
                None => return false,
            };
            match *first_transaction.detail() {
                Detail::Init { .. } => {}
                _ => return false,
            }
            // the whole first queue belongs to the initializing miner
            let expected_miner = MinerId::from(first_transaction.public_key());
            if block_next_miners
                .iter()
                .any(|miner| *miner != expected_miner)
            {
                return false;
            }
            if !block.validate(&block_next_miners[0], &H256::default()) {
                return false;
            }
        } else {
            let last_header = match last_header {
                Some(last_header) => last_header,
                None => return false,
            };
            if !ignore_time && block.id() > self.expected_block_id() {
                warn!(
                    target: "sync",
                    "adding block failed, block {:?} is ahead of the expected block id",
                    block.header()
                );
                return false;
            }
            if block.depth() != last_header.depth() + 1 {
                warn!(target: "sync", "adding block failed, invalid depth");
                return false;
            }
            if last_header.id() + block_next_miners.len() as u32 != block.id() {
                warn!(target: "sync", "adding block failed, invalid number of skipped blocks");
                return false;
            }
            let expected_miner = match mining_queue.get(block.skipped_blocks() as usize) {
                Some(expected_miner) => *expected_miner,
                None => return false,
            };
            if !block.validate(&expected_miner, last_header.hash()) {
                warn!(target: "sync", "adding block failed, block is invalid");
                return false;
            }
            let correct_next_miners = next_miners(
                &mining_queue,
                &self.store.confirmed().top_miners(),
                block.skipped_blocks() as u32 + 1,
                block.id(),
            );
            if block_next_miners.len() != correct_next_miners.len()
                || !block_next_miners
                    .iter()
                    .zip(correct_next_miners.iter())
                    .all(|(a, b)| a == b)
            {
                warn!(target: "sync", "adding block failed, next miners are invalid");
                return false;
            }
        }

        // drop tentative state before executing the block
        self.mempool.clear_executed();
        self.store.clear();

        // IO prefetch of every user row the block touches
        let preload_store = self.store.clone();
        let preload_block = block.clone();
        let preload = thread::Builder::new()
            .name("preload".to_owned())
            .spawn(move || {
                let start = Instant::now();
                for transaction in preload_block.ordered_transactions() {
                    preload_store
                        .unconfirmed()
                        .preload_user(&transaction.user_id());
                }
                preload_store.preload(preload_block.id());
                debug!(
                    target: "sync",
                    "preloaded the store in {} ms",
                    start.elapsed().as_millis()
                );
            })
            .expect("spawning preload thread");

        // crypto-verify transactions not seen before
        let to_verify: Vec<TransactionRef> = block
            .ordered_transactions()
            .filter(|transaction| !self.mempool.is_crypto_verified(&transaction.id()))
            .cloned()
            .collect();
        if !to_verify.is_empty() {
            let start = Instant::now();
            let results = self.verifier.verify_batch(&to_verify);
            if results.iter().any(|is_valid| !is_valid) {
                let mut invalid = BTreeSet::new();
                for (transaction, is_valid) in to_verify.iter().zip(results) {
                    if is_valid {
                        self.mempool.mark_crypto_verified(&transaction.id());
                    } else {
                        warn!(
                            target: "sync",
                            "transaction {:?} has invalid signatures",
                            transaction.id()
                        );
                        invalid.insert(transaction.id());
                    }
                }
                self.mempool.remove(&invalid);
                warn!(target: "sync", "block transactions crypto verification failed");
                let _ = preload.join();
                return false;
            }
            for transaction in &to_verify {
                self.mempool.mark_crypto_verified(&transaction.id());
            }
            debug!(
                target: "sync",
                "verified {} transactions in {} ms",
                to_verify.len(),
                start.elapsed().as_millis()
            );
        }

        let _ = preload.join();

        // execute strictly in the recorded order
        let executing_start = Instant::now();
        let mut executed_ids = BTreeSet::new();
        for transaction in block.ordered_transactions() {
            if let Err(err) =
                validate_transaction(&**transaction, block.id(), self.store.unconfirmed())
            {
                warn!(
                    target: "sync",
                    "adding block failed, transaction validation error ({:?}: {})",
                    transaction.id(),
                    err
                );
                self.store.clear();
                return false;
            }
            execute_transaction(&**transaction, block.id(), self.store.unconfirmed());
            executed_ids.insert(transaction.id());
        }

        self.store.unconfirmed().add_block(block.clone());
        assert_eq!(
            self.store.unconfirmed().new_transactions_count() as usize,
            block.transactions_count()
        );
        assert_eq!(
            self.store.unconfirmed().new_transactions_size() as usize,
            block.transactions_size()
        );
        debug!(
            target: "sync",
            "executed block in {} ms",
            executing_start.elapsed().as_millis()
        );

        let commit_start = Instant::now();
        self.store.commit(block.id());
        debug!(
            target: "sync",
            "committed block in {} ms",
            commit_start.elapsed().as_millis()
        );

        self.mempool.remove(&executed_ids);
        true
    }

    /// Initializes an empty store: either from the provided first blocks or
    /// by mining block 1.
    fn init(&self, options: &BlockchainOptions) -> Result<(), Error> {
        info!(target: "sync", "initializing blockchain");

        if !options.first_blocks.is_empty() {
            for (block_id, block) in &options.first_blocks {
                if !self.add_block(block.clone(), true) {
                    return Err(Error::InvalidFirstBlock(*block_id));
                }
            }
            return Ok(());
        }

        if !options.initialize {
            return Err(Error::NotInitialized);
        }

        let first_block = self.mine_first_block();
        if !self.add_block(first_block, true) {
            return Err(Error::InvalidFirstBlock(1));
        }
        Ok(())
    }

    /// Loads the rollbackable tail of the confirmed chain into the tree and
    /// checks the init transaction.
    fn load(&self) -> Result<(), Error> {
        info!(target: "sync", "loading blockchain");

        let latest_blocks = self.store.confirmed().latest_blocks();
        if latest_blocks.is_empty() {
            return Err(Error::NotInitialized);
        }

        let first_block = self
            .store
            .confirmed()
            .block(1)
            .ok_or(Error::NotInitialized)?;
        if first_block.transactions_count() != 1 {
            return Err(Error::InvalidInitTransaction);
        }
        let init = first_block
            .transaction(first_block.transaction_id(0))
            .ok_or(Error::InvalidInitTransaction)?;
        match *init.detail() {
            Detail::Init {
                initialization_time,
                block_interval,
            } => {
                if block_interval != self.block_interval() {
                    return Err(Error::BlockIntervalMismatch {
                        declared: block_interval,
                        configured: self.block_interval(),
                    });
                }
                self.initialization_time
                    .store(initialization_time, Ordering::SeqCst);
            }
            _ => return Err(Error::InvalidInitTransaction),
        }

        let max_blocks = (::network::DATABASE_ROLLBACKABLE_BLOCKS + 1)
            .min(self.store.max_rollback_depth() + 1);
        let mut blocks: Vec<BlockRef> = Vec::new();
        for block_id in latest_blocks.keys().rev() {
            debug!(target: "sync", "loading block {}", block_id);
            let block = self
                .store
                .confirmed()
                .block(*block_id)
                .ok_or(Error::NotInitialized)?;
            blocks.insert(0, block);
            if blocks.len() == max_blocks {
                break;
            }
        }

        let mut mining_queue = ::chain::MinersQueue::new();
        for (block_id, &(ref header, _)) in &latest_blocks {
            for miner in header.next_miners() {
                mining_queue.push_back(*miner);
            }
            if *block_id == blocks[0].id() {
                break;
            }
        }
        while mining_queue.len() > MINERS_QUEUE_SIZE {
            mining_queue.pop_front();
        }

        self.tree.load(&blocks, mining_queue);
        debug_assert_eq!(
            self.tree
                .active_branch()
                .last()
                .map(BlockTreeNode::id),
            Some(self.store.confirmed().latest_block_id())
        );

        // don't mine right after start, the node is probably catching up
        let mut control = self.control.lock();
        control.last_update = Instant::now();
        control.last_mining_time = Instant::now();
        Ok(())
    }
}

impl Drop for Blockchain {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Command::Stop);
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Blockchain, BlockchainOptions};
    use chain::Detail;
    use db::MemoryDatabase;
    use network::ConsensusParams;
    use parking_lot::Mutex;
    use post_transaction::PostTransactionStatus;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use storage::SharedStore;
    use test_data::ChainBuilder;
    use types::BlockchainRef;

    fn wait_until<F: Fn() -> bool>(timeout: Duration, predicate: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            ::std::thread::sleep(Duration::from_millis(20));
        }
        predicate()
    }

    fn node_params() -> ConsensusParams {
        let mut params = ConsensusParams::unitest();
        params.block_interval = 15;
        params
    }

    fn manual_node(builder: &ChainBuilder, params: ConsensusParams) -> BlockchainRef {
        let store: SharedStore = Arc::new(MemoryDatabase::default());
        let mut options = BlockchainOptions::new(builder.key().clone());
        options.block_production = false;
        options.initialize = false;
        let mut first_blocks = BTreeMap::new();
        first_blocks.insert(1, builder.blocks()[0].clone());
        options.first_blocks = first_blocks;
        Blockchain::new(params, options, store).unwrap()
    }

    #[test]
    fn test_initialize_mines_first_block() {
        let params = ConsensusParams::unitest();
        let store: SharedStore = Arc::new(MemoryDatabase::default());
        let key = ::crypto::SecretKey::from_seed(b"initializer");
        let options = BlockchainOptions::new(key.clone());

        let blockchain = Blockchain::new(params, options, store).unwrap();
        assert!(blockchain.latest_block_id() >= 1);
        assert!(blockchain.initialization_time() != 0);
        assert_eq!(
            blockchain.miner_id(),
            ::crypto::MinerId::from(&key.public())
        );
        blockchain.shutdown();
    }

    #[test]
    fn test_mines_when_scheduled() {
        let params = ConsensusParams::unitest();
        let store: SharedStore = Arc::new(MemoryDatabase::default());
        let key = ::crypto::SecretKey::from_seed(b"scheduled-miner");
        let blockchain =
            Blockchain::new(params, BlockchainOptions::new(key), store.clone()).unwrap();

        assert!(wait_until(Duration::from_secs(10), || {
            blockchain.latest_block_id() >= 2
        }));

        // the mined block ends with the reward transaction
        let latest = blockchain.latest_block_id();
        let block = store.confirmed().block(latest).unwrap();
        let last = block
            .transaction(block.transaction_id(block.transactions_count() - 1))
            .unwrap();
        match *last.detail() {
            Detail::Commit { .. } => {}
            ref other => panic!("expected a commit transaction, got {:?}", other),
        }
        blockchain.shutdown();
    }

    #[test]
    fn test_catch_up_executes_fed_blocks() {
        let mut builder = ChainBuilder::new().backdated(40);
        builder.genesis();
        let mut expected_transactions = Vec::new();
        for index in 0..20u32 {
            let transaction = builder.transfer(index + 2, (index + 1) as u64);
            expected_transactions.push(transaction.id());
            builder.next_block(vec![transaction]);
        }

        let blockchain = manual_node(&builder, node_params());
        for block in &builder.blocks()[1..] {
            assert!(blockchain.block_tree().add_block(block.clone(), None));
        }

        let tip = builder.tip().id();
        assert!(wait_until(Duration::from_secs(30), || {
            blockchain.latest_block_id() == tip
        }));

        // every transaction landed in the confirmed store
        for transaction_id in &expected_transactions {
            assert!(blockchain
                .store()
                .confirmed()
                .transaction(transaction_id)
                .is_some());
        }
        blockchain.shutdown();
    }

    #[test]
    fn test_branch_switch_rolls_back_and_recovers_transactions() {
        let mut branch_a = ChainBuilder::new().backdated(40);
        branch_a.genesis();
        let branch_b = branch_a.fork_at(0);
        let mut branch_b = branch_b;

        // branch A: blocks 2..4 carrying its own transactions
        let own_transaction = branch_a.transfer(2, 777);
        branch_a.next_block(vec![own_transaction.clone()]);
        branch_a.next_block(vec![branch_a.transfer(3, 778)]);
        branch_a.next_block(vec![branch_a.transfer(4, 779)]);

        // branch B: one block longer, different content
        for index in 0..4u32 {
            let transaction = branch_b.transfer(index + 2, (index + 1) as u64 * 1000);
            branch_b.next_block(vec![transaction]);
        }

        let blockchain = manual_node(&branch_a, node_params());
        for block in &branch_a.blocks()[1..] {
            assert!(blockchain.block_tree().add_block(block.clone(), None));
        }
        assert!(wait_until(Duration::from_secs(10), || {
            blockchain.latest_block_id() == 4
        }));

        for block in &branch_b.blocks()[1..] {
            assert!(blockchain.block_tree().add_block(block.clone(), None));
        }
        assert!(wait_until(Duration::from_secs(10), || {
            blockchain.latest_block_id() == 5
        }));

        // the active branch now ends at branch B's tip
        let active = blockchain.block_tree().active_branch();
        assert_eq!(
            active.last().unwrap().header_hash(),
            *branch_b.tip().header_hash()
        );

        // branch A's transactions returned to the mempool
        assert!(wait_until(Duration::from_secs(5), || {
            blockchain
                .pending_transactions()
                .transaction(&own_transaction.id())
                .is_some()
        }));
        blockchain.shutdown();
    }

    #[test]
    fn test_post_transaction_executes_and_deduplicates() {
        let mut builder = ChainBuilder::new();
        builder.genesis();
        let blockchain = manual_node(&builder, node_params());

        let transaction = builder.transfer(2, 123);
        let (sender, receiver) = ::std::sync::mpsc::channel();
        blockchain.post_transaction(
            transaction.clone(),
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        );
        let result = receiver
            .recv_timeout(Duration::from_secs(10))
            .expect("post result");
        assert!(result.is_success(), "unexpected result: {}", result);
        assert!(blockchain
            .pending_transactions()
            .has_executed(&transaction.id()));

        // posting the executed transaction again reports a duplicate
        let (sender, receiver) = ::std::sync::mpsc::channel();
        blockchain.post_transaction(
            transaction.clone(),
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        );
        let result = receiver
            .recv_timeout(Duration::from_secs(10))
            .expect("post result");
        assert_eq!(result.status, PostTransactionStatus::Duplicated);
        blockchain.shutdown();
    }

    #[test]
    fn test_post_rejects_management_and_bad_signatures() {
        let mut builder = ChainBuilder::new();
        builder.genesis();
        let blockchain = manual_node(&builder, node_params());

        // management transactions cannot be posted
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        blockchain.post_transaction(
            builder.init_transaction(),
            Box::new(move |result| sink.lock().push(result)),
        );
        assert!(wait_until(Duration::from_secs(10), || {
            !results.lock().is_empty()
        }));
        assert_eq!(
            results.lock()[0].status,
            PostTransactionStatus::ValidationError
        );
        blockchain.shutdown();
    }

    #[test]
    fn test_events_fire_after_commit() {
        let mut builder = ChainBuilder::new().backdated(10);
        builder.genesis();
        let blockchain = manual_node(&builder, node_params());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _listener =
            blockchain.register_events_listener(::events::EventsListenerCallbacks {
                on_blocks: Some(Box::new(move |blocks, did_change_branch| {
                    for block in blocks {
                        sink.lock().push((block.id(), did_change_branch));
                    }
                })),
                on_new_transactions: None,
            });

        let block = builder.next_block(vec![]);
        assert!(blockchain.block_tree().add_block(block, None));
        assert!(wait_until(Duration::from_secs(10), || {
            !seen.lock().is_empty()
        }));
        assert_eq!(seen.lock()[0], (2, false));
        // the event arrived after the commit
        assert_eq!(blockchain.latest_block_id(), 2);
        blockchain.shutdown();
    }
}
