#[macro_use]
extern crate log;
extern crate parking_lot;

extern crate rondo_chain as chain;
extern crate rondo_crypto as crypto;
extern crate rondo_network as network;
extern crate rondo_primitives as primitives;
extern crate rondo_storage as storage;

#[cfg(test)]
extern crate rondo_test_data as test_data;

mod memory_db;

pub use memory_db::MemoryDatabase;
