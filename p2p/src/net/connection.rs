use crypto::MinerId;
use std::net::SocketAddr;
use tokio_core::net::TcpStream;

/// A connection that finished its handshake and is ready for a session.
pub struct Connection {
    pub stream: TcpStream,
    pub remote_id: MinerId,
    pub address: SocketAddr,
    pub outgoing: bool,
}
