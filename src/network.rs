//! Stacks network identity.
//!
//! The gateway serves exactly one network per process, selected by
//! configuration. Externally the network is expressed as a CAIP-2 chain id
//! (`stacks:1` for mainnet, `stacks:2147483648` for testnet) so clients and
//! the settlement relay agree on chain identity without parsing node URLs.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Supported Stacks networks.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StacksNetwork {
    #[serde(rename = "mainnet")]
    Mainnet,
    #[serde(rename = "testnet")]
    Testnet,
}

impl StacksNetwork {
    /// CAIP-2 chain identifier for this network.
    pub fn chain_id(&self) -> &'static str {
        match self {
            StacksNetwork::Mainnet => "stacks:1",
            StacksNetwork::Testnet => "stacks:2147483648",
        }
    }

    /// Default node API root for this network.
    pub fn default_api_url(&self) -> &'static str {
        match self {
            StacksNetwork::Mainnet => "https://api.hiro.so",
            StacksNetwork::Testnet => "https://api.testnet.hiro.so",
        }
    }

    /// Resolves a network from its CAIP-2 chain identifier.
    pub fn from_chain_id(chain_id: &str) -> Option<Self> {
        match chain_id {
            "stacks:1" => Some(StacksNetwork::Mainnet),
            "stacks:2147483648" => Some(StacksNetwork::Testnet),
            _ => None,
        }
    }
}

impl Display for StacksNetwork {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StacksNetwork::Mainnet => write!(f, "mainnet"),
            StacksNetwork::Testnet => write!(f, "testnet"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown Stacks network: {0}")]
pub struct UnknownNetwork(String);

impl FromStr for StacksNetwork {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(StacksNetwork::Mainnet),
            "testnet" => Ok(StacksNetwork::Testnet),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}
