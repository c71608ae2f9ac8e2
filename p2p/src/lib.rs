#[macro_use]
extern crate futures;
#[macro_use]
extern crate log;
extern crate byteorder;
extern crate parking_lot;
extern crate tokio_core;
extern crate tokio_io;

extern crate rondo_crypto as crypto;
extern crate rondo_message as message;
extern crate rondo_network as network;
extern crate rondo_primitives as primitives;

mod config;
pub mod io;
mod net;
mod p2p;
mod protocol;
mod util;

pub use primitives::bytes;

pub use config::Config;
pub use net::Connection;
pub use p2p::{Context, P2P};
pub use protocol::{
    InboundConnection, InboundConnectionRef, LocalSyncNode, LocalSyncNodeRef, OutboundConnection,
    OutboundConnectionRef, PeerInfo, PeerPriority, SessionError,
};
pub use util::BlockedPeers;
