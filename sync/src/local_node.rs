//! Glue between the p2p layer and the blockchain: creates a session per
//! connection and fans blockchain events out to every live session.

use crypto::MinerId;
use events::{EventsListener, EventsListenerCallbacks};
use p2p::{
    InboundConnectionRef, LocalSyncNode, OutboundConnectionRef, PeerInfo, PeerPriority,
};
use parking_lot::RwLock;
use session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use types::{BlockchainRef, StorageRef};

/// Live sessions, indexed by peer miner id.
#[derive(Default)]
pub struct Sessions {
    sessions: RwLock<HashMap<MinerId, Arc<Session>>>,
}

impl Sessions {
    pub fn insert(&self, peer: MinerId, session: Arc<Session>) {
        self.sessions.write().insert(peer, session);
    }

    pub fn remove(&self, peer: &MinerId) {
        self.sessions.write().remove(peer);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }
}

pub struct LocalNode {
    blockchain: BlockchainRef,
    store: StorageRef,
    sessions: Arc<Sessions>,
    _listener: EventsListener,
}

impl LocalNode {
    pub fn new(blockchain: BlockchainRef, store: StorageRef) -> Arc<LocalNode> {
        let sessions = Arc::new(Sessions::default());

        let blocks_sessions = sessions.clone();
        let transactions_sessions = sessions.clone();
        let listener = blockchain.register_events_listener(EventsListenerCallbacks {
            on_blocks: Some(Box::new(move |blocks, did_change_branch| {
                for session in blocks_sessions.snapshot() {
                    session.on_blocks(blocks, did_change_branch);
                }
            })),
            on_new_transactions: Some(Box::new(move |transactions| {
                for session in transactions_sessions.snapshot() {
                    session.on_new_transactions(transactions);
                }
            })),
        });

        Arc::new(LocalNode {
            blockchain: blockchain,
            store: store,
            sessions: sessions,
            _listener: listener,
        })
    }

    pub fn sessions(&self) -> &Arc<Sessions> {
        &self.sessions
    }

    pub fn blockchain(&self) -> &BlockchainRef {
        &self.blockchain
    }
}

impl LocalSyncNode for LocalNode {
    fn create_session(
        &self,
        peer: PeerInfo,
        outbound: OutboundConnectionRef,
    ) -> InboundConnectionRef {
        trace!(target: "sync", "starting session with {}", peer.id);
        let session = Session::new(
            peer.id,
            self.blockchain.clone(),
            self.store.clone(),
            outbound,
            Arc::downgrade(&self.sessions),
        );
        self.sessions.insert(peer.id, session.clone());
        session
    }

    /// Miners scheduled soon get the high tier, staked miners the medium
    /// one.
    fn peer_priority(&self, id: &MinerId) -> PeerPriority {
        let queue = self.store.confirmed().miners_queue();
        if queue.iter().take(10).any(|miner| miner == id) {
            return PeerPriority::High;
        }
        if self
            .store
            .confirmed()
            .top_miners()
            .iter()
            .any(|miner| miner.id == *id)
        {
            return PeerPriority::Medium;
        }
        PeerPriority::Low
    }
}
