//! Network personalities of the reference implementation
//!
//! Each personality fixes a default RPC port, the chain name reported by
//! `getblockchaininfo`, the daemon flag selecting it, and the consensus
//! parameters the candidate validator needs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network personality (production, test, integration/regtest, signet-like)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network
    Mainnet,
    /// Public test network (testnet3 and testnet4 both classify here)
    Testnet,
    /// Integration network with operator-controlled block production
    Regtest,
    /// Signet-like network with signed block production
    Signet,
}

/// Consensus parameters relevant to structural block checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusParams {
    /// Height from which the coinbase must commit to the block height
    pub bip34_height: u64,
    /// Height from which block version >= 3 is required
    pub bip66_height: u64,
    /// Height from which block version >= 4 is required
    pub bip65_height: u64,
    /// Blocks between subsidy halvings
    pub subsidy_halving_interval: u64,
    /// Compact encoding of the proof-of-work limit
    pub pow_limit_bits: u32,
}

impl Network {
    /// All personalities in conventional scan order
    pub const ALL: [Network; 4] = [
        Network::Mainnet,
        Network::Testnet,
        Network::Regtest,
        Network::Signet,
    ];

    /// Default JSON-RPC port of the reference implementation
    pub fn default_rpc_port(&self) -> u16 {
        match self {
            Network::Mainnet => 8332,
            Network::Testnet => 18332,
            Network::Regtest => 18443,
            Network::Signet => 38332,
        }
    }

    /// Chain name as reported in `getblockchaininfo.chain`
    pub fn chain_name(&self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
            Network::Signet => "signet",
        }
    }

    /// Classify a chain name returned by the chain-identity call
    pub fn from_chain_name(chain: &str) -> Option<Self> {
        match chain.trim() {
            "main" => Some(Network::Mainnet),
            "test" | "testnet" | "testnet3" | "testnet4" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            "signet" => Some(Network::Signet),
            _ => None,
        }
    }

    /// Command-line flag selecting this network, if any
    pub fn daemon_flag(&self) -> Option<&'static str> {
        match self {
            Network::Mainnet => None,
            Network::Testnet => Some("-testnet"),
            Network::Regtest => Some("-regtest"),
            Network::Signet => Some("-signet"),
        }
    }

    /// Sub-directory of the reference data directory used by this network
    pub fn data_subdir(&self) -> Option<&'static str> {
        match self {
            Network::Mainnet => None,
            Network::Testnet => Some("testnet3"),
            Network::Regtest => Some("regtest"),
            Network::Signet => Some("signet"),
        }
    }

    pub fn consensus_params(&self) -> ConsensusParams {
        match self {
            Network::Mainnet => ConsensusParams {
                bip34_height: 227_931,
                bip66_height: 363_725,
                bip65_height: 388_381,
                subsidy_halving_interval: 210_000,
                pow_limit_bits: 0x1d00ffff,
            },
            Network::Testnet => ConsensusParams {
                bip34_height: 21_111,
                bip66_height: 330_776,
                bip65_height: 581_885,
                subsidy_halving_interval: 210_000,
                pow_limit_bits: 0x1d00ffff,
            },
            Network::Regtest => ConsensusParams {
                bip34_height: 1,
                bip66_height: 1,
                bip65_height: 1,
                subsidy_halving_interval: 150,
                pow_limit_bits: 0x207fffff,
            },
            Network::Signet => ConsensusParams {
                bip34_height: 1,
                bip66_height: 1,
                bip65_height: 1,
                subsidy_halving_interval: 210_000,
                pow_limit_bits: 0x1e0377ae,
            },
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.chain_name())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "main" | "mainnet" | "bitcoin" | "production" => Ok(Network::Mainnet),
            "test" | "testnet" | "testnet3" | "testnet4" => Ok(Network::Testnet),
            "regtest" | "integration" => Ok(Network::Regtest),
            "signet" => Ok(Network::Signet),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}
