//! The seam between the generic connection plumbing and the sync layer.
//! The sync crate implements `LocalSyncNode` and `InboundConnection`; the
//! p2p crate hands every session an `OutboundConnection` to talk through.

use crypto::MinerId;
use message::{Request, Response};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

pub type LocalSyncNodeRef = Arc<dyn LocalSyncNode>;
pub type InboundConnectionRef = Arc<dyn InboundConnection>;
pub type OutboundConnectionRef = Arc<dyn OutboundConnection>;

/// A protocol violation. Closes the connection and blocks the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionError(pub String);

impl SessionError {
    pub fn new<T: Into<String>>(reason: T) -> SessionError {
        SessionError(reason.into())
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection priority tier, used for per-tier connection caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPriority {
    /// Scheduled to mine one of the next blocks, or explicitly trusted.
    High,
    /// In the top miners by stake.
    Medium,
    /// Everyone else.
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerInfo {
    pub id: MinerId,
    pub address: SocketAddr,
    pub outgoing: bool,
}

/// Session side of a connection, implemented by the sync layer. All calls
/// happen on the connection's event-loop thread.
pub trait InboundConnection: Send + Sync {
    /// Handles an incoming request; `id` is needed to address the response.
    fn on_request(&self, id: u32, request: Request) -> Result<(), SessionError>;

    /// Handles the response to a previously sent request.
    fn on_response(&self, request: &Request, response: Response) -> Result<(), SessionError>;

    /// Periodic maintenance tick.
    fn maintain(&self);

    /// The connection is gone.
    fn on_close(&self);
}

/// Transmit side of a connection, implemented by the p2p layer.
pub trait OutboundConnection: Send + Sync {
    fn send_request(&self, request: Request);

    fn send_response(&self, in_reply_to: u32, request: &Request, response: Response);

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Factory for sessions, implemented by the sync layer.
pub trait LocalSyncNode: Send + Sync {
    fn create_session(
        &self,
        peer: PeerInfo,
        outbound: OutboundConnectionRef,
    ) -> InboundConnectionRef;

    fn peer_priority(&self, id: &MinerId) -> PeerPriority;
}
