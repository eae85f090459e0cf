//! Differential comparison of candidate and reference outcomes
//!
//! Both sides are reduced to [`Outcome`] at the boundary using explicit,
//! per-scenario [`ReasonMap`]s. Nothing past that point looks at
//! implementation-specific rejection text.

pub mod comparator;
pub mod scenarios;
pub mod suite;

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

pub use comparator::DifferentialComparator;
pub use scenarios::{catalogue, find, ChainTip, Expectation, ScenarioCase, ScenarioDef};
pub use suite::{run_suite, CaseReport, ReferenceSource, SuiteSummary};

/// Coarse rejection classes shared by both implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonClass {
    DuplicateCoinbase,
    MalformedStructure,
    MerkleMismatch,
    ProofOfWork,
    BadDifficulty,
    BadCoinbaseHeight,
    BadCoinbase,
    CoinbaseValue,
    ObsoleteVersion,
    BadTimestamp,
    DuplicateInputs,
    CoinbaseMisplaced,
    MissingInputs,
    OutputValue,
    Oversize,
    PolicyViolation,
    PreviousBlockUnknown,
    /// No rule in the scenario's map matched; never equal to anything
    Unclassified,
}

impl ReasonClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonClass::DuplicateCoinbase => "duplicate-coinbase",
            ReasonClass::MalformedStructure => "malformed-structure",
            ReasonClass::MerkleMismatch => "merkle-mismatch",
            ReasonClass::ProofOfWork => "proof-of-work",
            ReasonClass::BadDifficulty => "bad-difficulty",
            ReasonClass::BadCoinbaseHeight => "bad-coinbase-height",
            ReasonClass::BadCoinbase => "bad-coinbase",
            ReasonClass::CoinbaseValue => "coinbase-value",
            ReasonClass::ObsoleteVersion => "obsolete-version",
            ReasonClass::BadTimestamp => "bad-timestamp",
            ReasonClass::DuplicateInputs => "duplicate-inputs",
            ReasonClass::CoinbaseMisplaced => "coinbase-misplaced",
            ReasonClass::MissingInputs => "missing-inputs",
            ReasonClass::OutputValue => "output-value",
            ReasonClass::Oversize => "oversize",
            ReasonClass::PolicyViolation => "policy-violation",
            ReasonClass::PreviousBlockUnknown => "previous-block-unknown",
            ReasonClass::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ReasonClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why no verdict was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// No reference node could be obtained
    Unavailable,
    /// The reference did not answer (network, timeout, HTTP, malformed reply)
    Transport,
    /// The reference answered with an RPC error no rule classifies
    RpcFailure,
    /// The reference could not decide (e.g. block on a side branch)
    Inconclusive,
    /// The candidate failed internally
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Unavailable => "unavailable",
            ErrorClass::Transport => "transport",
            ErrorClass::RpcFailure => "rpc-failure",
            ErrorClass::Inconclusive => "inconclusive",
            ErrorClass::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized outcome of one validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "outcome", content = "class", rename_all = "lowercase")]
pub enum Outcome {
    Valid,
    Invalid(ReasonClass),
    Error(ErrorClass),
}

impl Outcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Outcome::Valid)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Outcome::Error(ErrorClass::Unavailable))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Valid => f.write_str("valid"),
            Outcome::Invalid(class) => write!(f, "invalid({})", class),
            Outcome::Error(class) => write!(f, "error({})", class),
        }
    }
}

/// Equivalence policy between two outcomes
///
/// Same tag is required; `Invalid` also needs the same class (and an
/// unclassified rejection matches nothing). An unavailable side never matches.
pub fn outcomes_match(candidate: &Outcome, reference: &Outcome) -> bool {
    match (candidate, reference) {
        (Outcome::Valid, Outcome::Valid) => true,
        (Outcome::Invalid(a), Outcome::Invalid(b)) => a == b && *a != ReasonClass::Unclassified,
        (Outcome::Error(a), Outcome::Error(b)) => {
            *a != ErrorClass::Unavailable && *b != ErrorClass::Unavailable
        }
        _ => false,
    }
}

/// How a rule recognises an implementation's rejection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonRule {
    /// Reject token equals the string
    Exact(String),
    /// Reject token starts with the string (e.g. "bad-version(" followed by a hex version)
    Prefix(String),
    /// Application-level RPC error code
    RpcCode(i32),
}

/// Explicit translation table from one implementation's vocabulary to classes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasonMap {
    rules: Vec<(ReasonRule, ReasonClass)>,
}

impl ReasonMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: ReasonRule, class: ReasonClass) -> Self {
        self.rules.push((rule, class));
        self
    }

    pub fn exact(self, token: &str, class: ReasonClass) -> Self {
        self.rule(ReasonRule::Exact(token.to_string()), class)
    }

    pub fn prefix(self, token: &str, class: ReasonClass) -> Self {
        self.rule(ReasonRule::Prefix(token.to_string()), class)
    }

    pub fn rpc_code(self, code: i32, class: ReasonClass) -> Self {
        self.rule(ReasonRule::RpcCode(code), class)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Class of a reject token; first matching rule wins
    pub fn classify_reason(&self, reason: &str) -> ReasonClass {
        let reason = reason.trim();
        self.rules
            .iter()
            .find_map(|(rule, class)| match rule {
                ReasonRule::Exact(token) if reason == token => Some(*class),
                ReasonRule::Prefix(token) if reason.starts_with(token.as_str()) => Some(*class),
                _ => None,
            })
            .unwrap_or(ReasonClass::Unclassified)
    }

    /// Class of an RPC error, by code first and then by message token
    pub fn classify_rpc_error(&self, code: i32, message: &str) -> Option<ReasonClass> {
        let by_code = self.rules.iter().find_map(|(rule, class)| match rule {
            ReasonRule::RpcCode(c) if *c == code => Some(*class),
            _ => None,
        });
        by_code.or_else(|| match self.classify_reason(message) {
            ReasonClass::Unclassified => None,
            class => Some(class),
        })
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// One comparison record
///
/// Built only through [`ComparisonResult::new`], which derives `matches`
/// from the two outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub scenario_name: String,
    pub candidate_outcome: Outcome,
    pub reference_outcome: Outcome,
    pub matches: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Candidate's raw rejection, for humans only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_detail: Option<String>,
    /// Reference's raw rejection, for humans only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_detail: Option<String>,
}

impl ComparisonResult {
    pub fn new(
        scenario_name: impl Into<String>,
        candidate_outcome: Outcome,
        reference_outcome: Outcome,
        duration: Duration,
    ) -> Self {
        Self {
            scenario_name: scenario_name.into(),
            candidate_outcome,
            reference_outcome,
            matches: outcomes_match(&candidate_outcome, &reference_outcome),
            duration,
            candidate_detail: None,
            reference_detail: None,
        }
    }

    pub fn with_details(mut self, candidate: Option<String>, reference: Option<String>) -> Self {
        self.candidate_detail = candidate;
        self.reference_detail = reference;
        self
    }
}

/// Suite-level status of one case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaseStatus {
    Passed,
    Failed,
    /// Reference unavailable; not a failure
    Skipped,
    /// Divergence the scenario declares as known
    ExpectedDivergence,
}

/// Human-readable summary of a comparison
pub fn format_comparison_result(result: &ComparisonResult) -> String {
    let millis = result.duration.as_millis();
    if result.matches {
        return format!(
            "MATCH {}: both {} ({} ms)",
            result.scenario_name, result.candidate_outcome, millis
        );
    }
    if result.reference_outcome.is_unavailable() {
        return format!(
            "SKIP {}: reference unavailable, candidate {} ({} ms)",
            result.scenario_name, result.candidate_outcome, millis
        );
    }

    let mut msg = format!("DIVERGENCE {} ({} ms)\n", result.scenario_name, millis);
    msg.push_str(&format!("  candidate: {}", result.candidate_outcome));
    if let Some(detail) = &result.candidate_detail {
        msg.push_str(&format!(" [{}]", detail));
    }
    msg.push_str(&format!("\n  reference: {}", result.reference_outcome));
    if let Some(detail) = &result.reference_detail {
        msg.push_str(&format!(" [{}]", detail));
    }
    msg
}
