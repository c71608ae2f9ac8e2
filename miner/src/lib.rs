#[macro_use]
extern crate log;
extern crate parking_lot;

extern crate rondo_chain as chain;
extern crate rondo_crypto as crypto;
extern crate rondo_network as network;

#[cfg(test)]
extern crate rondo_test_data as test_data;

mod memory_pool;

pub use memory_pool::{Information as MemoryPoolInformation, MemoryPool};
