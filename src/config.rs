//! Session configuration and network selection.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::wire::constants::{
    MAIN_NET_MAGIC, PROTOCOL_VERSION, REGTEST_MAGIC, SIGNET_MAGIC, TEST_NET3_MAGIC,
};
use crate::wire::message::Services;

/// Supplies the magic word the process is configured for.
///
/// A [`Session`](crate::session::Session) checks every inbound `version`
/// against this value, so a settings object that changes at runtime aborts
/// a connection that no longer matches.
pub trait NetworkSettings: Send + Sync {
    fn magic_word(&self) -> u32;
}

/// Bitcoin networks and their magic words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet3,
    Regtest,
    Signet,
}

impl Network {
    pub const fn magic(self) -> u32 {
        match self {
            Network::Mainnet => MAIN_NET_MAGIC,
            Network::Testnet3 => TEST_NET3_MAGIC,
            Network::Regtest => REGTEST_MAGIC,
            Network::Signet => SIGNET_MAGIC,
        }
    }

    pub const fn default_port(self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet3 => 18333,
            Network::Regtest => 18444,
            Network::Signet => 38333,
        }
    }

    /// Maps a magic word back to its network, if it is one we know.
    pub fn from_magic(magic: u32) -> Option<Self> {
        [
            Network::Mainnet,
            Network::Testnet3,
            Network::Regtest,
            Network::Signet,
        ]
        .into_iter()
        .find(|n| n.magic() == magic)
    }
}

impl NetworkSettings for Network {
    fn magic_word(&self) -> u32 {
        self.magic()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet3 => "testnet3",
            Network::Regtest => "regtest",
            Network::Signet => "signet",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("unknown network `{0}` (expected mainnet, testnet3, regtest or signet)")]
pub struct UnknownNetwork(String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "testnet3" | "test" => Ok(Network::Testnet3),
            "regtest" => Ok(Network::Regtest),
            "signet" => Ok(Network::Signet),
            _ => Err(UnknownNetwork(s.to_string())),
        }
    }
}

/// Parameters for one peer session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Network whose magic word frames every outbound message.
    pub network: Network,
    pub protocol_version: i32,
    /// Services we advertise in our `version`.
    pub services: Services,
    pub user_agent: String,
    /// Best height we advertise; -1 means "not tracking the chain".
    pub start_height: i32,
    /// Added to the reconnect delay after every failed attempt.
    pub reconnect_increment: Duration,
    /// Upper bound of the reconnect delay.
    pub max_reconnect_delay: Duration,
    /// How long to wait for the peer's `verack` after sending `version`.
    pub handshake_timeout: Duration,
    /// Delay before a block announcement is handed to the block queue
    /// consumer, giving the announcing node time to finish writing it.
    pub block_inventory_delay: Duration,
    /// Watchers do not keep a block-inventory queue.
    pub watcher: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            protocol_version: PROTOCOL_VERSION,
            services: Services::NODE_WITNESS,
            user_agent: format!("/btc-p2p:{}/", env!("CARGO_PKG_VERSION")),
            start_height: -1,
            reconnect_increment: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(30),
            block_inventory_delay: Duration::from_secs(1),
            watcher: false,
        }
    }
}

impl SessionConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }
}
