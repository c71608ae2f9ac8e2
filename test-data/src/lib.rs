//! Deterministic keys, transactions and block chains for tests.

extern crate rondo_chain as chain;
extern crate rondo_crypto as crypto;
extern crate rondo_network as network;
extern crate rondo_primitives as primitives;

mod chain_builder;

pub use chain_builder::ChainBuilder;
