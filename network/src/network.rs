//! Deployment flavors of the node.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// The production network.
    Mainnet,
    /// Public test network.
    Testnet,
    /// Private network used in unit and integration tests.
    Unitest,
}

impl Network {
    /// Default p2p port.
    pub fn port(&self) -> u16 {
        match *self {
            Network::Mainnet => 7310,
            Network::Testnet => 17310,
            Network::Unitest => 27310,
        }
    }
}
