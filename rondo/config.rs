use clap;
use crypto::{MinerId, SecretKey};
use network::{ConsensusParams, Network};
use primitives::hash::H160;
use std::net::SocketAddr;

pub struct Config {
    pub params: ConsensusParams,
    pub miner_key: SecretKey,
    pub listen_address: SocketAddr,
    pub peers: Vec<(MinerId, SocketAddr)>,
    pub initialize: bool,
    pub block_production: bool,
    pub quiet: bool,
}

pub fn parse(matches: &clap::ArgMatches) -> Result<Config, String> {
    let network = if matches.is_present("testnet") {
        Network::Testnet
    } else {
        Network::Mainnet
    };
    let params = ConsensusParams::new(network);

    let host = matches.value_of("listen").unwrap_or("0.0.0.0");
    let port = match matches.value_of("port") {
        Some(port) => port
            .parse()
            .map_err(|_| "invalid port".to_owned())?,
        None => network.port(),
    };
    let listen_address = format!("{}:{}", host, port)
        .parse()
        .map_err(|_| "invalid listen address".to_owned())?;

    let miner_seed = matches
        .value_of("miner-seed")
        .ok_or_else(|| "--miner-seed is required".to_owned())?;
    let miner_key = SecretKey::from_seed(miner_seed.as_bytes());

    let mut peers = Vec::new();
    if let Some(values) = matches.values_of("connect") {
        for value in values {
            peers.push(parse_peer(value)?);
        }
    }

    Ok(Config {
        params: params,
        miner_key: miner_key,
        listen_address: listen_address,
        peers: peers,
        initialize: !matches.is_present("no-init"),
        block_production: !matches.is_present("no-mining"),
        quiet: matches.is_present("quiet"),
    })
}

/// Peers are given as `<hex miner id>@<address>`.
fn parse_peer(value: &str) -> Result<(MinerId, SocketAddr), String> {
    let mut parts = value.splitn(2, '@');
    let id = parts
        .next()
        .ok_or_else(|| format!("invalid peer: {}", value))?;
    let address = parts
        .next()
        .ok_or_else(|| format!("invalid peer: {}", value))?;

    let id = id
        .parse::<H160>()
        .map(MinerId::from)
        .map_err(|_| format!("invalid peer miner id: {}", value))?;
    let address = address
        .parse()
        .map_err(|_| format!("invalid peer address: {}", value))?;
    Ok((id, address))
}
