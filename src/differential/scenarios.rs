//! Scenario catalogue
//!
//! Each scenario builds one artifact breaking (at most) one rule on top of
//! the reference's current tip, and ships its own candidate and reference
//! reason maps plus the expected suite-level verdict.

use serde::Serialize;
use tracing::debug;

use super::{CaseStatus, ComparisonResult, Outcome, ReasonClass, ReasonMap};
use crate::primitives::pow::check_proof_of_work;
use crate::primitives::script::{coinbase_height_prefix, OP_0, OP_TRUE};
use crate::primitives::{
    block_subsidy, double_sha256, Block, BlockHeader, Hash256, Network, OutPoint, Transaction,
    TxIn, TxOut,
};
use crate::rpc::{codes, RpcClient, RpcClientError};
use crate::validation::structural::codes as candidate;
use crate::validation::{Artifact, ValidationContext};

/// Regtest genesis block hash
pub const REGTEST_GENESIS_HASH: &str =
    "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206";
/// Regtest genesis timestamp
pub const REGTEST_GENESIS_TIME: u32 = 1_296_688_602;

const BLOCK_VERSION: i32 = 0x2000_0000;
const GRIND_LIMIT: u64 = 1 << 24;

/// Chain tip scenarios build on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainTip {
    pub hash: Hash256,
    pub height: u64,
    pub time: u32,
    pub median_time_past: u32,
    pub bits: u32,
}

impl ChainTip {
    /// Tip of a fresh regtest chain
    pub fn regtest_genesis() -> Self {
        Self {
            hash: Hash256::from_rpc_hex(REGTEST_GENESIS_HASH).unwrap_or_default(),
            height: 0,
            time: REGTEST_GENESIS_TIME,
            median_time_past: REGTEST_GENESIS_TIME,
            bits: Network::Regtest.consensus_params().pow_limit_bits,
        }
    }

    /// Query the reference for its best block
    pub fn fetch(client: &RpcClient) -> Result<Self, RpcClientError> {
        let hash = client.getbestblockhash()?;
        let header = client.getblockheader(&hash)?;
        let bits = header.bits_value().ok_or_else(|| {
            RpcClientError::malformed(format!("unparseable bits {:?}", header.bits))
        })?;
        Ok(Self {
            hash,
            height: header.height,
            time: header.time,
            median_time_past: header.mediantime,
            bits,
        })
    }

    /// Context for an artifact on top of this tip
    pub fn context(&self, network: Network, now: u32) -> ValidationContext {
        ValidationContext {
            network,
            height: self.height + 1,
            prev_block_hash: self.hash,
            median_time_past: self.median_time_past,
            now,
            // Regtest never retargets
            expected_bits: (network == Network::Regtest).then_some(self.bits),
        }
    }
}

/// What the suite should conclude from a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expectation {
    /// Both accept
    Accept,
    /// Both reject with this class
    Reject(ReasonClass),
    /// Implementations are known to disagree (e.g. candidate has no UTXO view)
    KnownDivergence(&'static str),
}

impl Expectation {
    pub fn judge(&self, result: &ComparisonResult) -> CaseStatus {
        if result.reference_outcome.is_unavailable() {
            return CaseStatus::Skipped;
        }
        match self {
            Expectation::Accept if result.matches && result.candidate_outcome.is_valid() => {
                CaseStatus::Passed
            }
            Expectation::Reject(class)
                if result.matches && result.candidate_outcome == Outcome::Invalid(*class) =>
            {
                CaseStatus::Passed
            }
            Expectation::KnownDivergence(_) if result.matches => CaseStatus::Passed,
            Expectation::KnownDivergence(_) => CaseStatus::ExpectedDivergence,
            _ => CaseStatus::Failed,
        }
    }
}

/// A built, ready-to-compare scenario instance
#[derive(Debug, Clone)]
pub struct ScenarioCase {
    pub name: String,
    pub artifact: Artifact,
    pub context: ValidationContext,
    pub candidate_map: ReasonMap,
    pub reference_map: ReasonMap,
    pub expectation: Expectation,
}

impl ScenarioCase {
    pub fn judge(&self, result: &ComparisonResult) -> CaseStatus {
        self.expectation.judge(result)
    }
}

/// Scenario definition
#[derive(Clone, Copy)]
pub struct ScenarioDef {
    pub name: &'static str,
    pub description: &'static str,
    pub expectation: Expectation,
    build: fn(&ValidationContext) -> Artifact,
    candidate_map: fn() -> ReasonMap,
    reference_map: fn() -> ReasonMap,
}

impl std::fmt::Debug for ScenarioDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioDef")
            .field("name", &self.name)
            .field("expectation", &self.expectation)
            .finish()
    }
}

impl ScenarioDef {
    /// Build the artifact against `tip`
    pub fn build(&self, tip: &ChainTip, network: Network, now: u32) -> ScenarioCase {
        let context = tip.context(network, now);
        let artifact = (self.build)(&context);
        debug!(scenario = self.name, id = %artifact.id(), height = context.height, "Built scenario");
        ScenarioCase {
            name: self.name.to_string(),
            artifact,
            context,
            candidate_map: (self.candidate_map)(),
            reference_map: (self.reference_map)(),
            expectation: self.expectation,
        }
    }
}

/// Every built-in scenario, blocks first
pub fn catalogue() -> Vec<ScenarioDef> {
    vec![
        ScenarioDef {
            name: "valid-block",
            description: "well-formed block extending the tip",
            expectation: Expectation::Accept,
            build: build_valid_block,
            candidate_map: || {
                ReasonMap::new().exact(candidate::POW_ABOVE_TARGET, ReasonClass::ProofOfWork)
            },
            reference_map: || ReasonMap::new().exact("high-hash", ReasonClass::ProofOfWork),
        },
        ScenarioDef {
            name: "duplicate-coinbase",
            description: "block whose transaction list repeats the coinbase",
            expectation: Expectation::Reject(ReasonClass::DuplicateCoinbase),
            build: build_duplicate_coinbase,
            candidate_map: || {
                ReasonMap::new()
                    .exact(candidate::MERKLE_MUTATED, ReasonClass::DuplicateCoinbase)
                    .exact(candidate::COINBASE_DUPLICATE, ReasonClass::DuplicateCoinbase)
            },
            reference_map: || {
                ReasonMap::new()
                    .exact("bad-txns-duplicate", ReasonClass::DuplicateCoinbase)
                    .exact("bad-cb-multiple", ReasonClass::DuplicateCoinbase)
            },
        },
        ScenarioDef {
            name: "missing-height",
            description: "coinbase without the BIP34 height commitment",
            expectation: Expectation::Reject(ReasonClass::BadCoinbaseHeight),
            build: build_missing_height,
            candidate_map: || {
                ReasonMap::new()
                    .exact(candidate::COINBASE_HEIGHT_MISMATCH, ReasonClass::BadCoinbaseHeight)
            },
            reference_map: || ReasonMap::new().exact("bad-cb-height", ReasonClass::BadCoinbaseHeight),
        },
        ScenarioDef {
            name: "bad-version",
            description: "version 1 block after BIP34/66/65 activation",
            expectation: Expectation::Reject(ReasonClass::ObsoleteVersion),
            build: build_bad_version,
            candidate_map: || {
                ReasonMap::new().exact(candidate::VERSION_OBSOLETE, ReasonClass::ObsoleteVersion)
            },
            reference_map: || ReasonMap::new().prefix("bad-version(", ReasonClass::ObsoleteVersion),
        },
        ScenarioDef {
            name: "bad-merkle-root",
            description: "header merkle root that does not commit to the transactions",
            expectation: Expectation::Reject(ReasonClass::MerkleMismatch),
            build: build_bad_merkle_root,
            candidate_map: || {
                ReasonMap::new().exact(candidate::MERKLE_MISMATCH, ReasonClass::MerkleMismatch)
            },
            reference_map: || ReasonMap::new().exact("bad-txnmrklroot", ReasonClass::MerkleMismatch),
        },
        ScenarioDef {
            name: "tx-no-inputs",
            description: "transaction with an empty input list",
            expectation: Expectation::Reject(ReasonClass::MalformedStructure),
            build: build_tx_no_inputs,
            candidate_map: || {
                ReasonMap::new().exact(candidate::TX_NO_INPUTS, ReasonClass::MalformedStructure)
            },
            // Zero inputs reads as a witness marker, so the reference usually fails to decode
            reference_map: || {
                ReasonMap::new()
                    .rpc_code(codes::DESERIALIZATION_ERROR, ReasonClass::MalformedStructure)
                    .exact("bad-txns-vin-empty", ReasonClass::MalformedStructure)
            },
        },
        ScenarioDef {
            name: "tx-duplicate-inputs",
            description: "transaction spending the same outpoint twice",
            expectation: Expectation::Reject(ReasonClass::DuplicateInputs),
            build: build_tx_duplicate_inputs,
            candidate_map: || {
                ReasonMap::new().exact(candidate::TX_DUPLICATE_INPUT, ReasonClass::DuplicateInputs)
            },
            reference_map: || {
                ReasonMap::new().exact("bad-txns-inputs-duplicate", ReasonClass::DuplicateInputs)
            },
        },
        ScenarioDef {
            name: "tx-coinbase-standalone",
            description: "coinbase transaction submitted outside a block",
            expectation: Expectation::Reject(ReasonClass::CoinbaseMisplaced),
            build: build_tx_coinbase_standalone,
            candidate_map: || {
                ReasonMap::new()
                    .exact(candidate::TX_COINBASE_STANDALONE, ReasonClass::CoinbaseMisplaced)
            },
            reference_map: || ReasonMap::new().exact("coinbase", ReasonClass::CoinbaseMisplaced),
        },
        ScenarioDef {
            name: "tx-missing-inputs",
            description: "transaction spending an outpoint that does not exist",
            expectation: Expectation::KnownDivergence("candidate has no UTXO view"),
            build: build_tx_missing_inputs,
            candidate_map: ReasonMap::new,
            reference_map: || {
                ReasonMap::new()
                    .exact("missing-inputs", ReasonClass::MissingInputs)
                    .exact("bad-txns-inputs-missingorspent", ReasonClass::MissingInputs)
            },
        },
    ]
}

/// Look up a scenario by name
pub fn find(name: &str) -> Option<ScenarioDef> {
    catalogue().into_iter().find(|s| s.name == name)
}

fn coinbase(ctx: &ValidationContext) -> Transaction {
    let mut script_sig = coinbase_height_prefix(ctx.height);
    script_sig.push(OP_0);
    let params = ctx.network.consensus_params();
    Transaction {
        version: 2,
        inputs: vec![TxIn::new(OutPoint::NULL, script_sig)],
        outputs: vec![TxOut {
            value: block_subsidy(ctx.height, params.subsidy_halving_interval),
            script_pubkey: vec![OP_TRUE],
        }],
        lock_time: 0,
    }
}

fn block_template(ctx: &ValidationContext, transactions: Vec<Transaction>) -> Block {
    let mut block = Block {
        header: BlockHeader {
            version: BLOCK_VERSION,
            prev_block_hash: ctx.prev_block_hash,
            merkle_root: Hash256::ZERO,
            time: ctx.now.max(ctx.median_time_past + 1),
            bits: ctx
                .expected_bits
                .unwrap_or(ctx.network.consensus_params().pow_limit_bits),
            nonce: 0,
        },
        transactions,
    };
    block.update_merkle_root();
    block
}

/// Grind the nonce (bumping time on wrap) until the header meets its own bits
fn mine(mut block: Block) -> Block {
    for _ in 0..GRIND_LIMIT {
        if check_proof_of_work(&block.hash(), block.header.bits, block.header.bits) {
            return block;
        }
        block.header.nonce = block.header.nonce.wrapping_add(1);
        if block.header.nonce == 0 {
            block.header.time += 1;
        }
    }
    block
}

fn build_valid_block(ctx: &ValidationContext) -> Artifact {
    Artifact::Block(mine(block_template(ctx, vec![coinbase(ctx)])))
}

fn build_duplicate_coinbase(ctx: &ValidationContext) -> Artifact {
    let cb = coinbase(ctx);
    Artifact::Block(mine(block_template(ctx, vec![cb.clone(), cb])))
}

fn build_missing_height(ctx: &ValidationContext) -> Artifact {
    let mut cb = coinbase(ctx);
    cb.inputs[0].script_sig = vec![OP_0, OP_0];
    Artifact::Block(mine(block_template(ctx, vec![cb])))
}

fn build_bad_version(ctx: &ValidationContext) -> Artifact {
    let mut block = block_template(ctx, vec![coinbase(ctx)]);
    block.header.version = 1;
    Artifact::Block(mine(block))
}

fn build_bad_merkle_root(ctx: &ValidationContext) -> Artifact {
    let mut block = block_template(ctx, vec![coinbase(ctx)]);
    block.header.merkle_root = Hash256::ZERO;
    Artifact::Block(mine(block))
}

/// Outpoint that exists nowhere
fn phantom_outpoint(ctx: &ValidationContext, tag: &str) -> OutPoint {
    let seed = format!("{}:{}:{}", tag, ctx.prev_block_hash, ctx.now);
    OutPoint {
        txid: double_sha256(seed.as_bytes()),
        vout: 0,
    }
}

/// Spend with a push-only scriptSig large enough to clear the minimum size rule
fn spend(inputs: Vec<OutPoint>) -> Transaction {
    let mut script_sig = vec![0x08];
    script_sig.extend_from_slice(&[0u8; 8]);
    Transaction {
        version: 2,
        inputs: inputs
            .into_iter()
            .map(|prevout| TxIn::new(prevout, script_sig.clone()))
            .collect(),
        outputs: vec![TxOut {
            value: 10_000,
            script_pubkey: vec![OP_TRUE],
        }],
        lock_time: 0,
    }
}

fn build_tx_no_inputs(_ctx: &ValidationContext) -> Artifact {
    Artifact::Transaction(spend(Vec::new()))
}

fn build_tx_duplicate_inputs(ctx: &ValidationContext) -> Artifact {
    let outpoint = phantom_outpoint(ctx, "duplicate-inputs");
    Artifact::Transaction(spend(vec![outpoint, outpoint]))
}

fn build_tx_coinbase_standalone(ctx: &ValidationContext) -> Artifact {
    Artifact::Transaction(coinbase(ctx))
}

fn build_tx_missing_inputs(ctx: &ValidationContext) -> Artifact {
    Artifact::Transaction(spend(vec![phantom_outpoint(ctx, "missing-inputs")]))
}
