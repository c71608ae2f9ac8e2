use crypto::MinerId;
use network::ConsensusParams;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    /// Protocol constants.
    pub params: ConsensusParams,
    /// Miner id this node presents in handshakes.
    pub local_id: MinerId,
    /// Address to accept connections on.
    pub listen_address: SocketAddr,
    /// Known peers to keep outgoing connections to.
    pub peers: Vec<(MinerId, SocketAddr)>,
}
