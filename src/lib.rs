//! BLLVM Differential - consensus differential validation engine
//!
//! Runs Bitcoin blocks and transactions through a candidate validator and
//! through a reference node (Bitcoin Core over JSON-RPC), then compares the
//! two verdicts under a shared vocabulary of rejection classes.
//!
//! ## Layers
//!
//! 1. `primitives` - wire encoding, hashing and proof-of-work of the artifacts
//! 2. `validation` - the in-process candidate interface and a structural validator
//! 3. `rpc` - blocking JSON-RPC client for the reference node
//! 4. `node` - port arbitration, binary location, discovery and owned regtest nodes
//! 5. `differential` - outcome mapping, comparison, scenarios and the suite runner
//!
//! The engine itself is synchronous. Each suite worker owns at most one
//! reference node and always stops it before returning.

pub mod config;
pub mod differential;
pub mod node;
pub mod primitives;
pub mod rpc;
pub mod utils;
pub mod validation;

pub use config::{ConfigError, DifferentialConfig};
pub use differential::{
    format_comparison_result, outcomes_match, run_suite, ComparisonResult, DifferentialComparator,
    ErrorClass, Outcome, ReasonClass, ReasonMap, ReferenceSource, SuiteSummary,
};
pub use node::{NodeRegistry, PortManager, RegtestNode};
pub use rpc::{RpcClient, RpcClientError};
pub use validation::{Artifact, CandidateValidator, CandidateVerdict, StructuralValidator};
