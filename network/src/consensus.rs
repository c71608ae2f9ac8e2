use network::Network;
use {
    BLOCK_MAX_TRANSACTIONS, BLOCK_MAX_TRANSACTIONS_SIZE, BLOCK_TRANSACTIONS_PER_CHUNK,
    DATABASE_ROLLBACKABLE_BLOCKS, MINERS_QUEUE_SIZE, NETWORK_MAX_PACKET_SIZE,
    TRANSACTION_MAX_BLOCK_ID_DIFFERENCE, TRANSACTION_MAX_SIZE,
};

/// Incoming/outgoing connection caps per peer priority tier.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConnectionLimits {
    /// Miners scheduled to mine the next blocks.
    pub high_priority: usize,
    /// Top miners by stake, outgoing.
    pub medium_priority_outgoing: usize,
    /// Top miners by stake, incoming.
    pub medium_priority_incoming: usize,
    /// Everyone else, outgoing.
    pub low_priority_outgoing: usize,
    /// Everyone else, incoming.
    pub low_priority_incoming: usize,
}

impl Default for PeerConnectionLimits {
    fn default() -> Self {
        PeerConnectionLimits {
            high_priority: 10,
            medium_priority_outgoing: 5,
            medium_priority_incoming: 5,
            low_priority_outgoing: 5,
            low_priority_incoming: 5,
        }
    }
}

/// All protocol constants in a single record. Passed to constructors,
/// never read from process-wide statics.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusParams {
    /// Network this node operates on.
    pub network: Network,
    /// Seconds between scheduled blocks.
    pub block_interval: u32,
    /// Entries in the mining queue.
    pub miners_queue_size: usize,
    /// How many confirmed blocks can be rolled back.
    pub rollbackable_blocks: usize,
    /// Maximum transactions per block.
    pub block_max_transactions: usize,
    /// Maximum total transactions size per block.
    pub block_max_transactions_size: usize,
    /// Transaction ids per block chunk.
    pub transactions_per_chunk: usize,
    /// Maximum serialized transaction size.
    pub transaction_max_size: usize,
    /// Transaction staleness window, in block ids.
    pub transaction_max_block_id_difference: u32,
    /// Maximum wire frame size.
    pub max_packet_size: usize,
    /// Read / write / reply timeout, in seconds.
    pub connection_timeout: u64,
    /// Handshakes allowed to be in flight at once.
    pub max_pending_connections: usize,
    /// Per-tier connection caps.
    pub peer_limits: PeerConnectionLimits,
    /// Signature verification worker threads.
    pub verifier_threads: usize,
}

impl ConsensusParams {
    pub fn new(network: Network) -> Self {
        ConsensusParams {
            network: network,
            block_interval: 15,
            miners_queue_size: MINERS_QUEUE_SIZE,
            rollbackable_blocks: DATABASE_ROLLBACKABLE_BLOCKS,
            block_max_transactions: BLOCK_MAX_TRANSACTIONS,
            block_max_transactions_size: BLOCK_MAX_TRANSACTIONS_SIZE,
            transactions_per_chunk: BLOCK_TRANSACTIONS_PER_CHUNK,
            transaction_max_size: TRANSACTION_MAX_SIZE,
            transaction_max_block_id_difference: TRANSACTION_MAX_BLOCK_ID_DIFFERENCE,
            max_packet_size: NETWORK_MAX_PACKET_SIZE,
            connection_timeout: 15,
            max_pending_connections: 10,
            peer_limits: PeerConnectionLimits::default(),
            verifier_threads: 8,
        }
    }

    /// Parameters for in-process tests: a short block interval and a small
    /// verifier pool.
    pub fn unitest() -> Self {
        let mut params = ConsensusParams::new(Network::Unitest);
        params.block_interval = 1;
        params.verifier_threads = 2;
        params
    }
}

#[cfg(test)]
mod tests {
    use super::ConsensusParams;
    use network::Network;

    #[test]
    fn test_mainnet_params() {
        let params = ConsensusParams::new(Network::Mainnet);
        assert_eq!(params.block_interval, 15);
        assert_eq!(params.miners_queue_size, 240);
        assert_eq!(params.rollbackable_blocks, 32);
        assert_eq!(params.max_packet_size, 4 * 1024 * 1024);
    }
}
