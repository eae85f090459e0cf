//! RPC types
//!
//! Endpoint/credential values and the typed subset of reference node
//! responses the engine reads.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::primitives::{Hash256, Network};

/// RPC endpoint address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// RPC basic-auth credentials; the password is wiped from memory on drop
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.as_str()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user && self.password() == other.password()
    }
}

impl Eq for Credentials {}

/// `getblockchaininfo` (fields the engine reads)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(default)]
    pub headers: u64,
    pub bestblockhash: String,
    #[serde(default)]
    pub mediantime: u64,
    #[serde(default)]
    pub initialblockdownload: bool,
}

impl ChainInfo {
    /// Network personality reported by the node
    pub fn network(&self) -> Option<Network> {
        Network::from_chain_name(&self.chain)
    }
}

/// `getblockheader <hash> true`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockHeaderInfo {
    pub hash: Hash256,
    pub height: u64,
    pub version: i32,
    pub merkleroot: Hash256,
    pub time: u32,
    pub mediantime: u32,
    /// Compact target as hex (e.g. "207fffff")
    pub bits: String,
    #[serde(default)]
    pub previousblockhash: Option<Hash256>,
}

impl BlockHeaderInfo {
    pub fn bits_value(&self) -> Option<u32> {
        u32::from_str_radix(self.bits.trim_start_matches("0x"), 16).ok()
    }
}

/// Result of `submitblock`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SubmitBlockOutcome {
    /// `null` reply
    Accepted,
    /// Reject reason string (e.g. "bad-txnmrklroot", "duplicate", "inconclusive")
    Rejected(String),
}

impl From<Option<String>> for SubmitBlockOutcome {
    fn from(reply: Option<String>) -> Self {
        match reply {
            None => SubmitBlockOutcome::Accepted,
            Some(reason) => SubmitBlockOutcome::Rejected(reason),
        }
    }
}

/// One entry of a `testmempoolaccept` reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MempoolAcceptResult {
    pub txid: String,
    pub allowed: bool,
    #[serde(rename = "reject-reason", default)]
    pub reject_reason: Option<String>,
    #[serde(default)]
    pub vsize: Option<u64>,
}
