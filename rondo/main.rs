#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate env_logger;

extern crate rondo_crypto as crypto;
extern crate rondo_db as db;
extern crate rondo_network as network;
extern crate rondo_p2p as p2p;
extern crate rondo_primitives as primitives;
extern crate rondo_storage as storage;
extern crate rondo_sync as sync;

mod config;

use std::sync::mpsc::channel;

pub const USER_AGENT: &'static str = "rondo";
pub const LOG_INFO: &'static str = "info,sync=debug";

fn main() {
    // Always print backtrace on panic.
    ::std::env::set_var("RUST_BACKTRACE", "1");

    if let Err(err) = run() {
        println!("{}", err);
        ::std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let yaml = load_yaml!("cli.yml");
    let matches = clap::App::from_yaml(yaml).get_matches();
    let cfg = config::parse(&matches)?;

    if !cfg.quiet {
        env_logger::Builder::new()
            .parse(&::std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_INFO.to_owned()))
            .init();
    } else {
        env_logger::init();
    }

    start(cfg)
}

fn start(cfg: config::Config) -> Result<(), String> {
    let store: storage::SharedStore = ::std::sync::Arc::new(db::MemoryDatabase::default());

    let mut options = sync::BlockchainOptions::new(cfg.miner_key.clone());
    options.initialize = cfg.initialize;
    options.block_production = cfg.block_production;

    let blockchain = sync::Blockchain::new(cfg.params.clone(), options, store.clone())
        .map_err(|err| format!("cannot start the blockchain: {}", err))?;
    let local_node = sync::create_local_sync_node(blockchain.clone(), store);

    let p2p_config = p2p::Config {
        params: cfg.params,
        local_id: blockchain.miner_id(),
        listen_address: cfg.listen_address,
        peers: cfg.peers,
    };
    let p2p = p2p::P2P::new(p2p_config, local_node)
        .map_err(|err| format!("cannot start p2p: {}", err))?;

    info!(
        "node is up: miner {}, block {}",
        blockchain.miner_id(),
        blockchain.latest_block_id()
    );

    // the node runs on its own threads; park until the process is killed
    let (_sender, receiver) = channel::<()>();
    let _ = receiver.recv();

    p2p.shutdown();
    blockchain.shutdown();
    Ok(())
}
