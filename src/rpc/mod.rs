//! JSON-RPC client for the reference node
//!
//! The engine only ever speaks to the reference implementation as a client:
//! discovery probes, readiness polling and scenario submission all go through
//! [`RpcClient`].

pub mod client;
pub mod errors;
pub mod types;

pub use client::RpcClient;
pub use errors::{codes, RpcClientError, TransportError};
pub use types::{
    BlockHeaderInfo, ChainInfo, Credentials, Endpoint, MempoolAcceptResult, SubmitBlockOutcome,
};
