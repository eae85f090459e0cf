//! RPC client error types
//!
//! Transport failures (the request never produced a JSON-RPC reply) are kept
//! apart from application-level RPC errors (the node answered with an error
//! object). Only the former are ever retried.

use thiserror::Error;

use crate::utils::IsRetryable;

/// Well-known JSON-RPC error codes returned by the reference node
pub mod codes {
    /// Generic application error (`RPC_MISC_ERROR`)
    pub const MISC_ERROR: i32 = -1;
    /// Object not found (`RPC_INVALID_ADDRESS_OR_KEY`)
    pub const INVALID_ADDRESS_OR_KEY: i32 = -5;
    /// Invalid, missing or duplicate parameter
    pub const INVALID_PARAMETER: i32 = -8;
    /// Error parsing or validating a structure in raw format
    pub const DESERIALIZATION_ERROR: i32 = -22;
    /// Transaction or block rejected by network rules
    pub const VERIFY_REJECTED: i32 = -26;
    /// Transaction already in the chain
    pub const VERIFY_ALREADY_IN_CHAIN: i32 = -27;
    /// Node still warming up (loading block index, verifying blocks)
    pub const IN_WARMUP: i32 = -28;
    /// Unknown method
    pub const METHOD_NOT_FOUND: i32 = -32601;
}

/// Why a request failed to produce a JSON-RPC reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection refused")]
    ConnectionRefused,

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Http(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

/// RPC client errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },
}

impl RpcClientError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcClientError::Transport(_))
    }

    /// Application-level error code, if the node answered
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            RpcClientError::Rpc { code, .. } => Some(*code),
            RpcClientError::Transport(_) => None,
        }
    }

    /// The node is up but still loading
    pub fn is_warmup(&self) -> bool {
        self.rpc_code() == Some(codes::IN_WARMUP)
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        RpcClientError::Transport(TransportError::Malformed(detail.into()))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::ConnectionRefused
        } else if let Some(status) = e.status() {
            TransportError::Http(status.as_u16())
        } else if e.is_decode() {
            TransportError::Malformed(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

impl IsRetryable for RpcClientError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcClientError::Transport(TransportError::ConnectionRefused)
        )
    }
}
