//! Built-in structural candidate
//!
//! Context-free block and transaction checks plus the header-contextual
//! rules that need no UTXO view. Rule order follows the usual
//! header, structure, transactions, then contextual sequence so that an
//! artifact breaking one rule is reported under that rule.

use std::collections::HashSet;

use super::{
    Artifact, CandidateValidator, CandidateVerdict, ValidationContext, MAX_BLOCK_WEIGHT,
    MAX_FUTURE_BLOCK_TIME, WITNESS_SCALE_FACTOR,
};
use crate::primitives::pow::check_proof_of_work;
use crate::primitives::script::coinbase_height_prefix;
use crate::primitives::{block_subsidy, Block, Transaction, MAX_MONEY};

/// Rejection codes emitted by [`StructuralValidator`]
pub mod codes {
    pub const BLOCK_EMPTY: &str = "block-empty";
    pub const BLOCK_OVERSIZE: &str = "block-oversize";
    pub const POW_ABOVE_TARGET: &str = "pow-above-target";
    pub const BITS_MISMATCH: &str = "bits-mismatch";
    pub const PREV_BLOCK_MISMATCH: &str = "prev-block-mismatch";
    pub const MERKLE_MISMATCH: &str = "merkle-mismatch";
    pub const MERKLE_MUTATED: &str = "merkle-mutated";
    pub const COINBASE_MISSING: &str = "coinbase-missing";
    pub const COINBASE_DUPLICATE: &str = "coinbase-duplicate";
    pub const COINBASE_SCRIPT_SIZE: &str = "coinbase-script-size";
    pub const COINBASE_HEIGHT_MISMATCH: &str = "coinbase-height-mismatch";
    pub const COINBASE_OVERPAYS: &str = "coinbase-overpays";
    pub const VERSION_OBSOLETE: &str = "version-obsolete";
    pub const TIMESTAMP_NOT_AFTER_MTP: &str = "timestamp-not-after-mtp";
    pub const TIMESTAMP_TOO_FAR: &str = "timestamp-too-far";
    pub const TX_NO_INPUTS: &str = "tx-no-inputs";
    pub const TX_NO_OUTPUTS: &str = "tx-no-outputs";
    pub const TX_OVERSIZE: &str = "tx-oversize";
    pub const TX_OUTPUT_VALUE: &str = "tx-output-value";
    pub const TX_DUPLICATE_INPUT: &str = "tx-duplicate-input";
    pub const TX_NULL_PREVOUT: &str = "tx-null-prevout";
    pub const TX_COINBASE_STANDALONE: &str = "tx-coinbase-standalone";
}

type Check = Result<(), CandidateVerdict>;

/// Structural candidate validator
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    pub fn new() -> Self {
        Self
    }

    fn check_block(&self, block: &Block, ctx: &ValidationContext) -> Check {
        let params = ctx.network.consensus_params();
        let header = &block.header;

        if !check_proof_of_work(&block.hash(), header.bits, params.pow_limit_bits) {
            return Err(CandidateVerdict::reject(
                codes::POW_ABOVE_TARGET,
                format!("block hash {} does not meet bits {:#010x}", block.hash(), header.bits),
            ));
        }

        let (root, mutated) = block.compute_merkle_root();
        if root != header.merkle_root {
            return Err(CandidateVerdict::reject(
                codes::MERKLE_MISMATCH,
                format!("header commits to {}, transactions hash to {}", header.merkle_root, root),
            ));
        }
        if mutated {
            return Err(CandidateVerdict::reject(
                codes::MERKLE_MUTATED,
                "transaction list contains a duplicated subtree",
            ));
        }

        if block.transactions.is_empty() {
            return Err(CandidateVerdict::reject(codes::BLOCK_EMPTY, "block has no transactions"));
        }
        if block.stripped_size() * WITNESS_SCALE_FACTOR > MAX_BLOCK_WEIGHT {
            return Err(CandidateVerdict::reject(
                codes::BLOCK_OVERSIZE,
                format!("stripped size {} too large", block.stripped_size()),
            ));
        }

        if !block.transactions[0].is_coinbase() {
            return Err(CandidateVerdict::reject(
                codes::COINBASE_MISSING,
                "first transaction is not a coinbase",
            ));
        }
        if let Some(index) = block.transactions.iter().skip(1).position(Transaction::is_coinbase) {
            return Err(CandidateVerdict::reject(
                codes::COINBASE_DUPLICATE,
                format!("transaction {} is a second coinbase", index + 1),
            ));
        }

        for tx in &block.transactions {
            check_transaction(tx)?;
        }

        // Contextual header rules
        if header.prev_block_hash != ctx.prev_block_hash {
            return Err(CandidateVerdict::reject(
                codes::PREV_BLOCK_MISMATCH,
                format!("builds on {}, tip is {}", header.prev_block_hash, ctx.prev_block_hash),
            ));
        }
        if let Some(expected) = ctx.expected_bits {
            if header.bits != expected {
                return Err(CandidateVerdict::reject(
                    codes::BITS_MISMATCH,
                    format!("bits {:#010x}, expected {:#010x}", header.bits, expected),
                ));
            }
        }
        if header.time <= ctx.median_time_past {
            return Err(CandidateVerdict::reject(
                codes::TIMESTAMP_NOT_AFTER_MTP,
                format!("time {} <= median time past {}", header.time, ctx.median_time_past),
            ));
        }
        if header.time > ctx.now.saturating_add(MAX_FUTURE_BLOCK_TIME) {
            return Err(CandidateVerdict::reject(
                codes::TIMESTAMP_TOO_FAR,
                format!("time {} too far ahead of {}", header.time, ctx.now),
            ));
        }

        let min_version = [
            (params.bip34_height, 2),
            (params.bip66_height, 3),
            (params.bip65_height, 4),
        ]
        .iter()
        .filter(|(activation, _)| ctx.height >= *activation)
        .map(|(_, version)| *version)
        .max()
        .unwrap_or(1);
        if header.version < min_version {
            return Err(CandidateVerdict::reject(
                codes::VERSION_OBSOLETE,
                format!("version {} below minimum {}", header.version, min_version),
            ));
        }

        // Contextual block rules
        let coinbase = &block.transactions[0];
        if ctx.height >= params.bip34_height {
            let prefix = coinbase_height_prefix(ctx.height);
            if !coinbase.inputs[0].script_sig.starts_with(&prefix) {
                return Err(CandidateVerdict::reject(
                    codes::COINBASE_HEIGHT_MISMATCH,
                    format!("coinbase does not commit to height {}", ctx.height),
                ));
            }
        }

        // Fees are unknown without a UTXO view, so the subsidy bound only
        // applies to coinbase-only blocks.
        if block.transactions.len() == 1 {
            let paid: i64 = coinbase.outputs.iter().map(|o| o.value).sum();
            let subsidy = block_subsidy(ctx.height, params.subsidy_halving_interval);
            if paid > subsidy {
                return Err(CandidateVerdict::reject(
                    codes::COINBASE_OVERPAYS,
                    format!("coinbase pays {} > subsidy {}", paid, subsidy),
                ));
            }
        }

        Ok(())
    }

    fn check_standalone_transaction(&self, tx: &Transaction) -> Check {
        check_transaction(tx)?;
        if tx.is_coinbase() {
            return Err(CandidateVerdict::reject(
                codes::TX_COINBASE_STANDALONE,
                "coinbase transaction outside a block",
            ));
        }
        Ok(())
    }
}

/// Context-free transaction checks
fn check_transaction(tx: &Transaction) -> Check {
    if tx.inputs.is_empty() {
        return Err(CandidateVerdict::reject(codes::TX_NO_INPUTS, "transaction has no inputs"));
    }
    if tx.outputs.is_empty() {
        return Err(CandidateVerdict::reject(codes::TX_NO_OUTPUTS, "transaction has no outputs"));
    }
    if tx.stripped_size() * WITNESS_SCALE_FACTOR > MAX_BLOCK_WEIGHT {
        return Err(CandidateVerdict::reject(
            codes::TX_OVERSIZE,
            format!("stripped size {} too large", tx.stripped_size()),
        ));
    }

    let mut total: i64 = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        if !(0..=MAX_MONEY).contains(&output.value) {
            return Err(CandidateVerdict::reject(
                codes::TX_OUTPUT_VALUE,
                format!("output {} value {} out of range", index, output.value),
            ));
        }
        total += output.value;
        if total > MAX_MONEY {
            return Err(CandidateVerdict::reject(
                codes::TX_OUTPUT_VALUE,
                format!("output total {} out of range", total),
            ));
        }
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Err(CandidateVerdict::reject(
                codes::TX_DUPLICATE_INPUT,
                format!("outpoint {}:{} spent twice", input.prevout.txid, input.prevout.vout),
            ));
        }
    }

    if tx.is_coinbase() {
        let len = tx.inputs[0].script_sig.len();
        if !(2..=100).contains(&len) {
            return Err(CandidateVerdict::reject(
                codes::COINBASE_SCRIPT_SIZE,
                format!("coinbase scriptSig length {}", len),
            ));
        }
    } else if tx.inputs.iter().any(|i| i.prevout.is_null()) {
        return Err(CandidateVerdict::reject(
            codes::TX_NULL_PREVOUT,
            "non-coinbase input spends the null outpoint",
        ));
    }
    Ok(())
}

impl CandidateValidator for StructuralValidator {
    fn name(&self) -> &str {
        "structural"
    }

    fn validate(&self, artifact: &Artifact, context: &ValidationContext) -> CandidateVerdict {
        let result = match artifact {
            Artifact::Block(block) => self.check_block(block, context),
            Artifact::Transaction(tx) => self.check_standalone_transaction(tx),
        };
        match result {
            Ok(()) => CandidateVerdict::Accepted,
            Err(verdict) => verdict,
        }
    }
}
