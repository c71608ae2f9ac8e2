extern crate byteorder;

extern crate rondo_chain as chain;
extern crate rondo_network as network;
extern crate rondo_primitives as primitives;
extern crate rondo_serialization as ser;

#[cfg(test)]
extern crate rondo_test_data as test_data;

mod error;
mod frame;
mod message;
pub mod types;

pub use primitives::{bytes, hash};

pub use error::{Error, MessageResult};
pub use frame::{frame, is_keep_alive, FRAME_HEADER_SIZE, KEEP_ALIVE_FRAME};
pub use message::{to_raw_request, to_raw_response, RawMessage, Request, Response, RESPONSE_MARKER};
