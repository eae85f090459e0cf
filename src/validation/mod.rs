//! Candidate validation interface
//!
//! The engine calls the candidate implementation in-process through
//! [`CandidateValidator`]. Verdicts carry the candidate's own rejection
//! vocabulary; translation into shared reason classes happens in the
//! differential layer, per scenario.

pub mod structural;

use serde::Serialize;
use std::fmt;

use crate::primitives::{Block, Hash256, Network, Transaction};

pub use structural::StructuralValidator;

/// Maximum block weight
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;
/// Witness scale factor
pub const WITNESS_SCALE_FACTOR: usize = 4;
/// Maximum distance a block timestamp may run ahead of adjusted time
pub const MAX_FUTURE_BLOCK_TIME: u32 = 2 * 60 * 60;

/// Artifact under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Block(Block),
    Transaction(Transaction),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Block(_) => "block",
            Artifact::Transaction(_) => "transaction",
        }
    }

    /// Consensus serialization as hex, as submitted to the reference
    pub fn to_hex(&self) -> String {
        match self {
            Artifact::Block(block) => block.to_hex(),
            Artifact::Transaction(tx) => tx.to_hex(),
        }
    }

    /// Block hash or txid
    pub fn id(&self) -> Hash256 {
        match self {
            Artifact::Block(block) => block.hash(),
            Artifact::Transaction(tx) => tx.txid(),
        }
    }
}

/// Chain context the artifact is validated against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationContext {
    pub network: Network,
    /// Height a block would have (tip height + 1)
    pub height: u64,
    /// Hash of the current tip
    pub prev_block_hash: Hash256,
    pub median_time_past: u32,
    /// Current (adjusted) time in seconds
    pub now: u32,
    /// Difficulty the next block must carry, when known
    pub expected_bits: Option<u32>,
}

/// A candidate rejection in the candidate's own words
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable explanation
    pub message: String,
}

impl Rejection {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Result of a candidate validation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CandidateVerdict {
    Accepted,
    Rejected(Rejection),
    /// The candidate failed internally and produced no verdict
    Error(String),
}

impl CandidateVerdict {
    pub fn reject(code: impl Into<String>, message: impl Into<String>) -> Self {
        CandidateVerdict::Rejected(Rejection::new(code, message))
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, CandidateVerdict::Accepted)
    }
}

/// In-process validation entry point of a candidate implementation
pub trait CandidateValidator: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    fn validate(&self, artifact: &Artifact, context: &ValidationContext) -> CandidateVerdict;
}
