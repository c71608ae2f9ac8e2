//! Per-peer session: drives the catch-up walk (header, body, chunks,
//! transactions), serves the peer's requests from the tree and the store,
//! and gossips transaction ids in bounded batches. Packet handlers run on
//! the connection's event-loop thread; everything they touch is behind
//! thread-safe collaborators.

use block_tree::BlockTree;
use chain::{BlockHeader, PendingBlockRef, Status, TransactionId, TransactionRef};
use crypto::MinerId;
use message::types::{
    BlockPart, BlockPartPayload, First, GetBlock, GetBlockHeader, GetBlockResponse,
    GetNewTransactions, NewBlocks, NewTransactions,
};
use message::{Request, Response};
use network::TRANSACTION_MAX_SIZE;
use p2p::{InboundConnection, OutboundConnectionRef, SessionError};
use parking_lot::Mutex;
use primitives::hash::H256;
use shared_transaction_ids::SharedTransactionIds;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use types::{BlockchainRef, StorageRef};
use {chain, local_node};

struct SessionData {
    /// The peer has not sent its FIRST packet yet.
    first_packet_pending: bool,
    /// Our chain tip as last advertised to the peer.
    latest_header: Option<BlockHeader>,
    /// The peer's advertised chain tip.
    remote_header: Option<BlockHeader>,
    remote_header_time: Instant,
    /// A GET_BLOCK_HEADER or GET_BLOCK round is in flight.
    requesting_block: bool,
    /// The pending block currently being downloaded.
    downloading: Option<PendingBlockRef>,
    requesting_transactions: bool,
    /// First executed-transactions gossip was sent.
    shared_pending_transactions: bool,
    /// The last received block sits in the tree's top level; wait for the
    /// chain to advance instead of re-requesting.
    waiting_for_new_block: bool,
    last_received_block_hash: H256,
    /// Gossip ids buffered towards the peer.
    new_transaction_ids: BTreeSet<TransactionId>,
    /// Gossip ids received from the peer, not fetched yet.
    received_new_transaction_ids: BTreeSet<TransactionId>,
}

pub struct Session {
    peer: MinerId,
    blockchain: BlockchainRef,
    store: StorageRef,
    outbound: OutboundConnectionRef,
    sessions: Weak<local_node::Sessions>,
    data: Mutex<SessionData>,
    shared_ids: Mutex<SharedTransactionIds>,
}

impl Session {
    pub fn new(
        peer: MinerId,
        blockchain: BlockchainRef,
        store: StorageRef,
        outbound: OutboundConnectionRef,
        sessions: Weak<local_node::Sessions>,
    ) -> Arc<Session> {
        let latest_header = store.confirmed().latest_block_header();
        let session = Arc::new(Session {
            peer: peer,
            blockchain: blockchain,
            store: store,
            outbound: outbound,
            sessions: sessions,
            data: Mutex::new(SessionData {
                first_packet_pending: true,
                latest_header: latest_header.clone(),
                remote_header: None,
                remote_header_time: Instant::now(),
                requesting_block: false,
                downloading: None,
                requesting_transactions: false,
                shared_pending_transactions: false,
                waiting_for_new_block: false,
                last_received_block_hash: H256::default(),
                new_transaction_ids: BTreeSet::new(),
                received_new_transaction_ids: BTreeSet::new(),
            }),
            shared_ids: Mutex::new(SharedTransactionIds::default()),
        });

        // both sides start by presenting their chain tip
        if let Some(latest_header) = latest_header {
            session.outbound.send_request(Request::First(First {
                latest_header: latest_header,
            }));
        }
        session
    }

    pub fn peer(&self) -> &MinerId {
        &self.peer
    }

    /// Chain advanced: push the new tip and resume whatever was parked on
    /// it.
    pub fn on_blocks(&self, blocks: &[chain::BlockRef], _did_change_branch: bool) {
        let latest_header = match blocks.last() {
            Some(block) => block.header().clone(),
            None => return,
        };
        trace!(target: "sync", "{}: on_blocks, tip {:?}", self.peer, latest_header);

        let mut data = self.data.lock();
        data.latest_header = Some(latest_header.clone());
        self.outbound.send_request(Request::NewBlocks(NewBlocks {
            latest_header: latest_header,
        }));

        if data.remote_header.is_none() {
            return;
        }

        if data.waiting_for_new_block {
            if self
                .blockchain
                .block_tree()
                .is_in_last_level(&data.last_received_block_hash)
            {
                return;
            }
            data.waiting_for_new_block = false;
            if !data.requesting_block {
                self.request_block_header(&mut data);
            }
        }

        if !data.shared_pending_transactions && self.depths_match(&data) {
            self.send_first_pending_transactions(&mut data);
        }

        if !data.requesting_transactions && !data.received_new_transaction_ids.is_empty() {
            self.request_new_transactions(&mut data);
        }
    }

    /// New tentatively-executed transactions: buffer their ids, flush full
    /// batches.
    pub fn on_new_transactions(&self, transactions: &[TransactionRef]) {
        let mut data = self.data.lock();
        if !data.shared_pending_transactions {
            return;
        }

        let mut shared_ids = self.shared_ids.lock();
        for transaction in transactions {
            if !shared_ids.insert(transaction.id()) {
                continue;
            }
            data.new_transaction_ids.insert(transaction.id());
            if data.new_transaction_ids.len() == NewTransactions::MAX_TRANSACTION_IDS {
                let batch = ::std::mem::replace(&mut data.new_transaction_ids, BTreeSet::new());
                self.send_new_transaction_ids(batch);
            }
        }
    }

    fn depths_match(&self, data: &SessionData) -> bool {
        match (&data.latest_header, &data.remote_header) {
            (&Some(ref ours), &Some(ref theirs)) => ours.depth() == theirs.depth(),
            _ => false,
        }
    }

    fn our_depth(&self, data: &SessionData) -> u32 {
        data.latest_header.as_ref().map_or(0, BlockHeader::depth)
    }

    fn remote_depth(&self, data: &SessionData) -> u32 {
        data.remote_header.as_ref().map_or(0, BlockHeader::depth)
    }

    // -- incoming packets --

    fn on_first(&self, packet: First) -> Result<(), SessionError> {
        trace!(target: "sync", "{}: first packet {:?}", self.peer, packet.latest_header);
        let mut data = self.data.lock();
        data.remote_header = Some(packet.latest_header);
        data.remote_header_time = Instant::now();

        if self.depths_match(&data) {
            self.send_first_pending_transactions(&mut data);
        }
        if self.our_depth(&data) >= self.remote_depth(&data) {
            return Ok(());
        }
        self.request_block_header(&mut data);
        Ok(())
    }

    fn on_new_blocks(&self, packet: NewBlocks) -> Result<(), SessionError> {
        debug!(target: "sync", "{}: new blocks {:?}", self.peer, packet.latest_header);
        let mut data = self.data.lock();

        if packet.latest_header.depth() <= self.remote_depth(&data) {
            return Err(SessionError::new("wrong number of blocks"));
        }
        data.remote_header = Some(packet.latest_header);
        data.remote_header_time = Instant::now();

        if !data.shared_pending_transactions && self.depths_match(&data) {
            self.send_first_pending_transactions(&mut data);
        }
        if self.our_depth(&data) >= self.remote_depth(&data) {
            return Ok(());
        }
        if data.requesting_block {
            return Ok(());
        }
        if self
            .blockchain
            .block_tree()
            .is_in_last_level(&data.last_received_block_hash)
        {
            return Ok(());
        }
        self.request_block_header(&mut data);
        Ok(())
    }

    fn on_new_transaction_ids(&self, packet: NewTransactions) -> Result<(), SessionError> {
        trace!(target: "sync", "{}: {} new transaction ids", self.peer, packet.transaction_ids.len());
        let mut data = self.data.lock();
        data.received_new_transaction_ids
            .extend(packet.transaction_ids);
        if !data.requesting_transactions && !data.received_new_transaction_ids.is_empty() {
            self.request_new_transactions(&mut data);
        }
        Ok(())
    }

    // -- serving requests --

    fn serve_block_header(&self, id: u32, packet: GetBlockHeader) -> Result<(), SessionError> {
        let unique_hashes: BTreeSet<H256> = packet
            .block_ids_and_hashes
            .iter()
            .map(|&(_, hash)| hash)
            .collect();

        let active_branch = self.blockchain.block_tree().active_branch();
        let mut found = None;
        for &(block_id, ref hash) in &packet.block_ids_and_hashes {
            // the continuation may still be unconfirmed, try the active
            // branch first
            if let Some(node) = active_branch
                .iter()
                .find(|node| node.prev_header_hash() == *hash)
            {
                if !unique_hashes.contains(&node.header_hash()) {
                    found = node
                        .block
                        .as_ref()
                        .map(|block| block.header().clone());
                    if found.is_some() {
                        break;
                    }
                }
            }

            let header = match self.store.confirmed().next_block_header(block_id) {
                Some(header) => header,
                None => continue,
            };
            if header.prev_header_hash() != hash {
                continue;
            }
            if block_id + header.skipped_blocks() as u32 + 1 != header.id() {
                continue;
            }
            if unique_hashes.contains(header.hash()) {
                break;
            }
            found = Some(header);
            break;
        }

        let request = Request::GetBlockHeader(packet);
        self.outbound
            .send_response(id, &request, Response::BlockHeader(found));
        Ok(())
    }

    fn serve_block(&self, id: u32, packet: GetBlock) -> Result<(), SessionError> {
        let active_branch = self.blockchain.block_tree().active_branch();
        let from_branch = active_branch
            .iter()
            .find(|node| node.header_hash() == packet.header_hash)
            .and_then(|node| node.block.clone());

        let response = if let Some(block) = from_branch {
            match packet.part {
                BlockPart::Body { .. } => GetBlockResponse {
                    expired: false,
                    payload: BlockPartPayload::Body(Some(block.body().clone())),
                },
                BlockPart::ChunkHashes { ref hashes } => {
                    let mut chunks = Vec::new();
                    for &(index, _) in hashes {
                        match block.chunks().get(index as usize) {
                            Some(chunk) => chunks.push(chunk.clone()),
                            None => {
                                return Err(SessionError::new(
                                    "requested invalid transaction ids",
                                ))
                            }
                        }
                    }
                    GetBlockResponse {
                        expired: false,
                        payload: BlockPartPayload::Chunks(chunks),
                    }
                }
                BlockPart::TransactionIds { ref ids } => {
                    let mut transactions = Vec::new();
                    for transaction_id in ids {
                        match block.transaction(transaction_id) {
                            Some(transaction) => transactions.push(transaction),
                            None => {
                                return Err(SessionError::new("requested invalid transaction"))
                            }
                        }
                    }
                    GetBlockResponse {
                        expired: false,
                        payload: BlockPartPayload::Transactions(transactions),
                    }
                }
            }
        } else {
            self.serve_block_from_store(&packet)
        };

        let request = Request::GetBlock(packet);
        self.outbound
            .send_response(id, &request, Response::Block(response));
        Ok(())
    }

    fn serve_block_from_store(&self, packet: &GetBlock) -> GetBlockResponse {
        match packet.part {
            BlockPart::Body { ref hash } => {
                match self.store.confirmed().block_body(packet.block_id) {
                    Some(ref body) if body.hash() == hash => GetBlockResponse {
                        expired: false,
                        payload: BlockPartPayload::Body(Some(body.clone())),
                    },
                    _ => GetBlockResponse::expired(&packet.part),
                }
            }
            BlockPart::ChunkHashes { ref hashes } => {
                let mut chunks = Vec::new();
                for &(index, ref hash) in hashes {
                    match self
                        .store
                        .confirmed()
                        .block_transaction_ids(packet.block_id, index)
                    {
                        Some(ref chunk) if chunk.hash() == hash => chunks.push(chunk.clone()),
                        _ => return GetBlockResponse::expired(&packet.part),
                    }
                }
                GetBlockResponse {
                    expired: false,
                    payload: BlockPartPayload::Chunks(chunks),
                }
            }
            BlockPart::TransactionIds { ref ids } => {
                let mut transactions = Vec::new();
                for transaction_id in ids {
                    match self.blockchain.transaction(transaction_id) {
                        Some((transaction, _)) => transactions.push(transaction),
                        None => return GetBlockResponse::expired(&packet.part),
                    }
                }
                GetBlockResponse {
                    expired: false,
                    payload: BlockPartPayload::Transactions(transactions),
                }
            }
        }
    }

    fn serve_new_transactions(
        &self,
        id: u32,
        packet: GetNewTransactions,
    ) -> Result<(), SessionError> {
        let found: Vec<TransactionRef> = self
            .blockchain
            .transactions(&packet.transaction_ids)
            .into_iter()
            .filter_map(|transaction| transaction)
            .collect();
        let request = Request::GetNewTransactions(packet);
        self.outbound
            .send_response(id, &request, Response::NewTransactions(found));
        Ok(())
    }

    // -- responses to our requests --

    fn on_block_header(&self, header: Option<BlockHeader>) -> Result<(), SessionError> {
        let mut data = self.data.lock();
        data.requesting_block = false;

        let header = match header {
            Some(header) => header,
            None => return Err(SessionError::new("missing block header")),
        };
        debug!(target: "sync", "{}: block header {:?}", self.peer, header);

        if header.id() > self.blockchain.expected_block_id() {
            warn!(
                target: "sync",
                "{}: received block header {:?} ahead of the expected block id",
                self.peer,
                header
            );
            return Err(SessionError::new("invalid block header (ahead of time)"));
        }

        let header_hash = *header.hash();
        let (pending, already_known) =
            BlockTree::add_header(self.blockchain.block_tree(), header, Some(self.peer));
        if let Some(pending) = pending {
            self.request_block(&mut data, pending);
            return Ok(());
        }

        if already_known {
            // the pending block has already been converted to a block
            debug!(target: "sync", "{}: duplicated block header", self.peer);
            if self.blockchain.block_tree().is_in_last_level(&header_hash) {
                debug!(target: "sync", "{}: waiting for a new block", self.peer);
                data.waiting_for_new_block = true;
                data.last_received_block_hash = header_hash;
                return Ok(());
            }
            self.request_block_header(&mut data);
            return Ok(());
        }

        warn!(target: "sync", "{}: invalid block header", self.peer);
        Err(SessionError::new("invalid block header"))
    }

    fn on_block_part(
        &self,
        request: &GetBlock,
        response: GetBlockResponse,
    ) -> Result<(), SessionError> {
        let mut data = self.data.lock();
        data.requesting_block = false;
        let pending = match data.downloading.take() {
            Some(pending) => pending,
            None => return Err(SessionError::new("unexpected block part")),
        };

        if response.expired {
            warn!(target: "sync", "{}: expired block {:?}", self.peer, pending.header());
            return Err(SessionError::new("expired block"));
        }

        match pending.status() {
            Status::Invalid => return Err(SessionError::new("invalid block")),
            Status::Expired => {
                // expired locally, move on to the next candidate
                self.request_block_header(&mut data);
                return Ok(());
            }
            Status::Complete | Status::Finished => {
                self.on_completed_block(&mut data, &pending);
                return Ok(());
            }
            _ => {}
        }

        let valid_data = match (&request.part, response.payload) {
            (&BlockPart::Body { .. }, BlockPartPayload::Body(Some(body))) => {
                match pending.add_body(body) {
                    chain::AddResult::Correct | chain::AddResult::Duplicated => true,
                    _ => false,
                }
            }
            (&BlockPart::ChunkHashes { .. }, BlockPartPayload::Chunks(ref chunks)) => {
                match pending.add_chunks(chunks) {
                    chain::AddResult::Correct | chain::AddResult::Duplicated => true,
                    _ => false,
                }
            }
            (&BlockPart::TransactionIds { .. }, BlockPartPayload::Transactions(transactions)) => {
                // the mempool routes them into the pending block
                self.blockchain.add_transactions(&transactions, Some(self.peer));
                true
            }
            _ => false,
        };

        match pending.status() {
            _ if !valid_data => Err(SessionError::new("invalid block")),
            Status::Invalid => Err(SessionError::new("invalid block")),
            Status::Expired => {
                self.request_block_header(&mut data);
                Ok(())
            }
            Status::Complete | Status::Finished => {
                self.on_completed_block(&mut data, &pending);
                Ok(())
            }
            _ => {
                // not complete yet, fetch the next missing part
                self.request_block(&mut data, pending);
                Ok(())
            }
        }
    }

    fn on_transactions(&self, transactions: Vec<TransactionRef>) -> Result<(), SessionError> {
        let mut data = self.data.lock();
        trace!(target: "sync", "{}: {} transactions", self.peer, transactions.len());
        data.requesting_transactions = false;
        self.blockchain
            .add_transactions(&transactions, Some(self.peer));

        if !data.received_new_transaction_ids.is_empty() {
            self.request_new_transactions(&mut data);
        }
        Ok(())
    }

    fn on_completed_block(&self, data: &mut SessionData, pending: &PendingBlockRef) {
        trace!(target: "sync", "{}: completed block {:?}", self.peer, pending.header());
        data.requesting_block = false;

        if data
            .remote_header
            .as_ref()
            .map_or(true, |remote| pending.id() >= remote.id())
        {
            debug!(target: "sync", "{}: there is no newer block", self.peer);
            return;
        }

        if self
            .blockchain
            .block_tree()
            .is_in_last_level(pending.header_hash())
        {
            debug!(target: "sync", "{}: waiting for a new block", self.peer);
            data.waiting_for_new_block = true;
            data.last_received_block_hash = *pending.header_hash();
            return;
        }

        self.request_block_header(data);
    }

    // -- outgoing requests --

    fn request_block_header(&self, data: &mut SessionData) {
        debug_assert!(!data.requesting_block);

        let remote_header = match data.remote_header {
            Some(ref remote_header) => remote_header.clone(),
            None => return,
        };
        if self.our_depth(data) >= remote_header.depth()
            || self.blockchain.block_tree().has_block(remote_header.hash())
        {
            debug!(target: "sync", "{}: there is no newer block header", self.peer);
            return;
        }

        let block_ids_and_hashes = self
            .blockchain
            .block_tree()
            .block_ids_and_hashes(GetBlockHeader::MAX_BLOCKS, remote_header.depth() - 1);
        if block_ids_and_hashes.is_empty() {
            return;
        }

        debug!(
            target: "sync",
            "{}: requesting block header (has {}, wants {})",
            self.peer,
            self.our_depth(data),
            remote_header.depth()
        );
        data.requesting_block = true;
        self.outbound
            .send_request(Request::GetBlockHeader(GetBlockHeader {
                block_ids_and_hashes: block_ids_and_hashes,
            }));
    }

    fn request_block(&self, data: &mut SessionData, pending: PendingBlockRef) {
        debug_assert!(!data.requesting_block);
        debug!(target: "sync", "{}: requesting block {:?}", self.peer, pending.header());

        let part = match pending.status() {
            Status::MissingBody => BlockPart::Body {
                hash: *pending.body_hash(),
            },
            Status::MissingTransactionIds => BlockPart::ChunkHashes {
                hashes: pending.missing_chunk_hashes(GetBlock::MAX_CHUNK_HASHES),
            },
            Status::MissingTransactions => BlockPart::TransactionIds {
                ids: pending
                    .missing_transaction_ids(
                        GetBlock::MAX_TRANSACTIONS,
                        GetBlock::MAX_TRANSACTIONS_SIZE,
                    )
                    .into_iter()
                    .collect(),
            },
            status => {
                debug!(target: "sync", "{}: block needs no parts ({:?})", self.peer, status);
                if self
                    .blockchain
                    .block_tree()
                    .is_in_last_level(pending.header_hash())
                {
                    data.waiting_for_new_block = true;
                    data.last_received_block_hash = *pending.header_hash();
                } else {
                    self.request_block_header(data);
                }
                return;
            }
        };

        let request = GetBlock {
            block_id: pending.id(),
            header_hash: *pending.header_hash(),
            part: part,
        };
        data.requesting_block = true;
        data.downloading = Some(pending);
        self.outbound.send_request(Request::GetBlock(request));
    }

    fn send_first_pending_transactions(&self, data: &mut SessionData) {
        debug_assert!(!data.shared_pending_transactions);
        trace!(target: "sync", "{}: sending first pending transactions", self.peer);
        data.shared_pending_transactions = true;

        let limit = NewTransactions::MAX_TRANSACTION_IDS * 4;
        let executed = self.blockchain.pending_transactions().executed(limit);
        let mut shared_ids = self.shared_ids.lock();
        let mut transaction_ids = BTreeSet::new();
        for transaction in executed {
            if !shared_ids.insert(transaction.id()) {
                continue;
            }
            transaction_ids.insert(transaction.id());
            if transaction_ids.len() == NewTransactions::MAX_TRANSACTION_IDS {
                self.send_new_transaction_ids(::std::mem::replace(
                    &mut transaction_ids,
                    BTreeSet::new(),
                ));
            }
        }

        if !transaction_ids.is_empty() {
            self.send_new_transaction_ids(transaction_ids);
        }
    }

    fn send_new_transaction_ids(&self, transaction_ids: BTreeSet<TransactionId>) {
        debug_assert!(
            !transaction_ids.is_empty()
                && transaction_ids.len() <= NewTransactions::MAX_TRANSACTION_IDS
        );
        trace!(target: "sync", "{}: sending {} new transaction ids", self.peer, transaction_ids.len());
        self.outbound
            .send_request(Request::NewTransactions(NewTransactions {
                transaction_ids: transaction_ids.into_iter().collect(),
            }));
    }

    fn request_new_transactions(&self, data: &mut SessionData) {
        debug_assert!(!data.requesting_transactions);
        debug_assert!(!data.received_new_transaction_ids.is_empty());

        if self.remote_depth(data) > self.our_depth(data) {
            debug!(target: "sync", "{}: waiting for new blocks before fetching transactions", self.peer);
            return;
        }

        let mut transactions_size = 0usize;
        let mut transaction_ids = Vec::new();
        let mut processed = Vec::new();
        for transaction_id in &data.received_new_transaction_ids {
            if transactions_size + transaction_id.transaction_size() > TRANSACTION_MAX_SIZE {
                break;
            }
            processed.push(*transaction_id);
            if self.blockchain.transaction(transaction_id).is_none() {
                transactions_size += transaction_id.transaction_size();
                transaction_ids.push(*transaction_id);
            }
        }
        for transaction_id in processed {
            data.received_new_transaction_ids.remove(&transaction_id);
        }

        if transaction_ids.is_empty() {
            return;
        }

        debug!(
            target: "sync",
            "{}: requesting {} transactions ({} bytes)",
            self.peer,
            transaction_ids.len(),
            transactions_size
        );
        data.requesting_transactions = true;
        self.outbound
            .send_request(Request::GetNewTransactions(GetNewTransactions {
                transaction_ids: transaction_ids,
            }));
    }
}

impl InboundConnection for Session {
    fn on_request(&self, id: u32, request: Request) -> Result<(), SessionError> {
        {
            let mut data = self.data.lock();
            let is_first = match request {
                Request::First(_) => true,
                _ => false,
            };
            if data.first_packet_pending != is_first {
                return Err(SessionError::new("invalid first packet"));
            }
            if is_first {
                data.first_packet_pending = false;
            }
        }

        match request {
            Request::First(packet) => self.on_first(packet),
            Request::NewBlocks(packet) => self.on_new_blocks(packet),
            Request::NewTransactions(packet) => self.on_new_transaction_ids(packet),
            Request::GetBlockHeader(packet) => self.serve_block_header(id, packet),
            Request::GetBlock(packet) => self.serve_block(id, packet),
            Request::GetNewTransactions(packet) => self.serve_new_transactions(id, packet),
        }
    }

    fn on_response(&self, request: &Request, response: Response) -> Result<(), SessionError> {
        match (request, response) {
            (&Request::GetBlockHeader(_), Response::BlockHeader(header)) => {
                self.on_block_header(header)
            }
            (&Request::GetBlock(ref get_block), Response::Block(block_response)) => {
                self.on_block_part(get_block, block_response)
            }
            (&Request::GetNewTransactions(_), Response::NewTransactions(transactions)) => {
                self.on_transactions(transactions)
            }
            _ => Err(SessionError::new("mismatched response")),
        }
    }

    /// Periodic tick: liveness timeout on caught-up peers and a flush of
    /// partial gossip batches.
    fn maintain(&self) {
        let mut data = self.data.lock();
        if data.first_packet_pending || data.remote_header.is_none() {
            return;
        }

        if self.our_depth(&data) >= self.remote_depth(&data) {
            let timeout =
                Duration::from_secs(self.blockchain.block_interval() as u64 * 4);
            if data.remote_header_time.elapsed() > timeout {
                // a caught-up peer that goes silent is rotated out, not
                // banned
                debug!(target: "sync", "{}: timeout for new block header", self.peer);
                self.outbound.close();
                return;
            }
        }

        if data.requesting_block {
            return;
        }
        if !data.shared_pending_transactions {
            return;
        }
        if !data.new_transaction_ids.is_empty() {
            let batch = ::std::mem::replace(&mut data.new_transaction_ids, BTreeSet::new());
            self.send_new_transaction_ids(batch);
        }
    }

    fn on_close(&self) {
        debug!(target: "sync", "{}: session closed", self.peer);
        if let Some(sessions) = self.sessions.upgrade() {
            sessions.remove(&self.peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use blockchain::{Blockchain, BlockchainOptions};
    use db::MemoryDatabase;
    use local_node::LocalNode;
    use message::{Request, Response};
    use network::ConsensusParams;
    use p2p::{
        InboundConnection, LocalSyncNode, OutboundConnection, PeerInfo, SessionError,
    };
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use storage::SharedStore;
    use test_data::ChainBuilder;
    use types::BlockchainRef;

    enum Sent {
        Request { id: u32, request: Request },
        Response { in_reply_to: u32, response: Response },
    }

    /// Captures everything a session sends so a test can hand it to the
    /// other side.
    #[derive(Default)]
    struct MockConnection {
        sent: Mutex<VecDeque<Sent>>,
        next_packet_id: AtomicUsize,
        closed: AtomicBool,
    }

    impl MockConnection {
        fn drain(&self) -> Vec<Sent> {
            self.sent.lock().drain(..).collect()
        }
    }

    impl OutboundConnection for MockConnection {
        fn send_request(&self, request: Request) {
            let id = self.next_packet_id.fetch_add(1, Ordering::SeqCst) as u32;
            self.sent.lock().push_back(Sent::Request {
                id: id,
                request: request,
            });
        }

        fn send_response(&self, in_reply_to: u32, _request: &Request, response: Response) {
            self.sent.lock().push_back(Sent::Response {
                in_reply_to: in_reply_to,
                response: response,
            });
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct TestNode {
        blockchain: BlockchainRef,
        node: Arc<LocalNode>,
        outbound: Arc<MockConnection>,
        session: Arc<dyn InboundConnection>,
        /// Requests this node sent and still expects a response to.
        waiting: Mutex<HashMap<u32, Request>>,
    }

    fn node_params() -> ConsensusParams {
        let mut params = ConsensusParams::unitest();
        params.block_interval = 15;
        params
    }

    fn test_node(builder: &ChainBuilder, fed_blocks: usize) -> TestNode {
        let store: SharedStore = Arc::new(MemoryDatabase::default());
        let mut options = BlockchainOptions::new(builder.key().clone());
        options.block_production = false;
        options.initialize = false;
        options
            .first_blocks
            .insert(1, builder.blocks()[0].clone());
        let blockchain = Blockchain::new(node_params(), options, store.clone()).unwrap();
        for block in &builder.blocks()[1..=fed_blocks] {
            assert!(blockchain.block_tree().add_block(block.clone(), None));
        }
        if fed_blocks > 0 {
            assert!(wait_until(Duration::from_secs(30), || {
                blockchain.latest_block_id() == builder.blocks()[fed_blocks].id()
            }));
        }

        let node = LocalNode::new(blockchain.clone(), store);
        let outbound = Arc::new(MockConnection::default());
        let session = node.create_session(
            PeerInfo {
                id: builder.miner_id(),
                address: "127.0.0.1:0".parse().unwrap(),
                outgoing: true,
            },
            outbound.clone(),
        );
        TestNode {
            blockchain: blockchain,
            node: node,
            outbound: outbound,
            session: session,
            waiting: Mutex::new(HashMap::new()),
        }
    }

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

    /// Delivers everything `from` sent to `to`. Responses are matched to
    /// the requests recorded on the sending side.
    fn deliver(from: &TestNode, to: &TestNode) -> Result<bool, SessionError> {
        let mut progressed = false;
        for message in from.outbound.drain() {
            progressed = true;
            match message {
                Sent::Request { id, request } => {
                    if request.expects_response() {
                        from.waiting.lock().insert(id, request.clone());
                    }
                    to.session.on_request(id, request)?;
                }
                Sent::Response {
                    in_reply_to,
                    response,
                } => {
                    let request = to
                        .waiting
                        .lock()
                        .remove(&in_reply_to)
                        .expect("response to an unknown request");
                    to.session.on_response(&request, response)?;
                }
            }
        }
        Ok(progressed)
    }

    fn pump(a: &TestNode, b: &TestNode) {
        loop {
            let delivered_a = deliver(a, b).expect("session failure");
            let delivered_b = deliver(b, a).expect("session failure");
            if !delivered_a && !delivered_b {
                break;
            }
        }
    }

    #[test]
    fn test_two_node_catch_up() {
        let mut builder = ChainBuilder::new().backdated(30);
        builder.genesis();
        let mut expected_transactions = Vec::new();
        for index in 0..12u32 {
            let transaction = builder.transfer(index + 2, (index + 1) as u64);
            expected_transactions.push(transaction.id());
            builder.next_block(vec![transaction]);
        }

        // node A holds the whole chain, node B only block 1
        let node_a = test_node(&builder, 12);
        let node_b = test_node(&builder, 0);

        let tip = builder.tip().id();
        let deadline = Instant::now() + Duration::from_secs(30);
        while node_b.blockchain.latest_block_id() != tip {
            assert!(Instant::now() < deadline, "catch-up timed out");
            pump(&node_a, &node_b);
            ::std::thread::sleep(Duration::from_millis(20));
        }

        // every transaction of A's chain is confirmed on B
        for transaction_id in &expected_transactions {
            assert!(node_b
                .blockchain
                .store()
                .confirmed()
                .transaction(transaction_id)
                .is_some());
        }

        node_a.blockchain.shutdown();
        node_b.blockchain.shutdown();
    }

    #[test]
    fn test_transaction_gossip_between_equal_nodes() {
        let mut builder = ChainBuilder::new();
        builder.genesis();

        let node_a = test_node(&builder, 0);
        let node_b = test_node(&builder, 0);

        // exchange FIRST packets; equal heights unlock gossip
        pump(&node_a, &node_b);

        // post a batch of storage entries on A
        let mut posted = Vec::new();
        for index in 0..16u32 {
            let transaction =
                builder.storage_entry(2, format!("entry-{}", index).as_bytes(), 16 * 1024);
            posted.push(transaction.id());
            node_a
                .blockchain
                .post_transaction(transaction, Box::new(|_| {}));
        }
        assert!(wait_until(Duration::from_secs(10), || {
            node_a.blockchain.pending_transactions().executed_count() == 16
        }));

        // flush gossip batches and route the download
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            node_a.session.maintain();
            node_b.session.maintain();
            pump(&node_a, &node_b);
            let known = posted
                .iter()
                .filter(|id| {
                    node_b
                        .blockchain
                        .pending_transactions()
                        .transaction(id)
                        .is_some()
                })
                .count();
            if known == posted.len() {
                break;
            }
            assert!(Instant::now() < deadline, "gossip timed out");
            ::std::thread::sleep(Duration::from_millis(20));
        }

        node_a.blockchain.shutdown();
        node_b.blockchain.shutdown();
    }

    #[test]
    fn test_session_closes_on_shrinking_peer() {
        let mut builder = ChainBuilder::new().backdated(10);
        builder.genesis();
        builder.next_block(vec![]);

        let node_a = test_node(&builder, 1);
        let node_b = test_node(&builder, 0);
        pump(&node_a, &node_b);

        // a NEW_BLOCKS packet that does not advance the peer's chain is a
        // protocol violation
        let stale = Request::NewBlocks(::message::types::NewBlocks {
            latest_header: builder.blocks()[1].header().clone(),
        });
        node_a.outbound.send_request(stale);
        let result = deliver(&node_a, &node_b);
        assert!(result.is_err());

        node_a.blockchain.shutdown();
        node_b.blockchain.shutdown();
    }
}
