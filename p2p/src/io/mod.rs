mod handshake;
mod read_frame;
mod write_frame;

pub use self::handshake::{accept_handshake, handshake, Handshake, HandshakeResult};
pub use self::read_frame::{read_frame, ReadFrame};
pub use self::write_frame::{write_frame, WriteFrame};
