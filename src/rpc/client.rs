//! Blocking JSON-RPC client for the reference node
//!
//! HTTP POST with basic auth, one shared timeout, and a short retry window for
//! connection-refused errors only.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use super::errors::{RpcClientError, TransportError};
use super::types::{
    BlockHeaderInfo, ChainInfo, Credentials, Endpoint, MempoolAcceptResult, SubmitBlockOutcome,
};
use crate::primitives::{Block, Hash256, Transaction};
use crate::utils::{retry_if_retryable, RetryConfig};

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// Synchronous RPC client bound to one endpoint
pub struct RpcClient {
    endpoint: Endpoint,
    credentials: Credentials,
    http: reqwest::blocking::Client,
    retry: RetryConfig,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl RpcClient {
    /// Create a client; every call is bounded by `timeout`
    pub fn new(
        endpoint: Endpoint,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, RpcClientError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| RpcClientError::Transport(TransportError::Other(e.to_string())))?;
        Ok(Self {
            endpoint,
            credentials,
            http,
            retry: RetryConfig::transient(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Replace the transient retry policy (`RetryConfig::new(1, ..)` disables retries)
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Call `method` with positional `params`, retrying connection-refused errors
    pub fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcClientError> {
        let result = retry_if_retryable(&self.retry, || self.call_once(method, &params, None))
            .map_err(|e| e.into_inner())?;
        decode_result(method, result)
    }

    /// Single attempt bounded by `timeout` instead of the client-wide one
    pub fn call_within<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<T, RpcClientError> {
        let result = self.call_once(method, &params, Some(timeout))?;
        decode_result(method, result)
    }

    fn call_once(
        &self,
        method: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> Result<Value, RpcClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(endpoint = %self.endpoint, method, id, "RPC request");

        let mut request = self
            .http
            .post(self.endpoint.url())
            .basic_auth(&self.credentials.user, Some(self.credentials.password()))
            .json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().map_err(TransportError::from)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(TransportError::Http(status.as_u16()).into());
        }

        // The reference node reports RPC errors with non-2xx statuses, so the
        // body is parsed before the status is considered.
        let text = response.text().map_err(TransportError::from)?;
        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(TransportError::Http(status.as_u16()).into())
            }
            Err(e) => return Err(RpcClientError::malformed(e.to_string())),
        };

        if let Some(error) = envelope.error {
            debug!(method, code = error.code, message = %error.message, "RPC error");
            return Err(RpcClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(envelope.result)
    }

    pub fn getblockchaininfo(&self) -> Result<ChainInfo, RpcClientError> {
        self.call("getblockchaininfo", vec![])
    }

    pub fn getblockcount(&self) -> Result<u64, RpcClientError> {
        self.call("getblockcount", vec![])
    }

    pub fn getbestblockhash(&self) -> Result<Hash256, RpcClientError> {
        self.call("getbestblockhash", vec![])
    }

    pub fn getblockheader(&self, hash: &Hash256) -> Result<BlockHeaderInfo, RpcClientError> {
        self.call("getblockheader", vec![json!(hash.to_string()), json!(true)])
    }

    /// Raw block (verbosity 0), decoded
    pub fn getblock(&self, hash: &Hash256) -> Result<Block, RpcClientError> {
        let hex: String = self.call("getblock", vec![json!(hash.to_string()), json!(0)])?;
        Block::from_hex(&hex).map_err(|e| RpcClientError::malformed(e.to_string()))
    }

    pub fn submitblock(&self, block_hex: &str) -> Result<SubmitBlockOutcome, RpcClientError> {
        let reply: Option<String> = self.call("submitblock", vec![json!(block_hex)])?;
        Ok(reply.into())
    }

    pub fn testmempoolaccept(
        &self,
        tx_hexes: &[String],
    ) -> Result<Vec<MempoolAcceptResult>, RpcClientError> {
        self.call("testmempoolaccept", vec![json!(tx_hexes)])
    }

    pub fn sendrawtransaction(&self, tx_hex: &str) -> Result<Hash256, RpcClientError> {
        self.call("sendrawtransaction", vec![json!(tx_hex)])
    }

    /// Raw transaction (non-verbose), decoded
    pub fn getrawtransaction(&self, txid: &Hash256) -> Result<Transaction, RpcClientError> {
        let hex: String = self.call("getrawtransaction", vec![json!(txid.to_string())])?;
        Transaction::from_hex(&hex).map_err(|e| RpcClientError::malformed(e.to_string()))
    }

    pub fn generatetoaddress(
        &self,
        blocks: u64,
        address: &str,
    ) -> Result<Vec<Hash256>, RpcClientError> {
        self.call("generatetoaddress", vec![json!(blocks), json!(address)])
    }

    pub fn generatetodescriptor(
        &self,
        blocks: u64,
        descriptor: &str,
    ) -> Result<Vec<Hash256>, RpcClientError> {
        self.call("generatetodescriptor", vec![json!(blocks), json!(descriptor)])
    }

    /// Ask the node to shut down
    pub fn stop(&self) -> Result<String, RpcClientError> {
        self.call("stop", vec![])
    }
}

fn decode_result<T: DeserializeOwned>(method: &str, result: Value) -> Result<T, RpcClientError> {
    serde_json::from_value(result)
        .map_err(|e| RpcClientError::malformed(format!("unexpected result for {}: {}", method, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_connection_refused_surfaces_after_retries() {
        let client = RpcClient::new(
            Endpoint::localhost(closed_port()),
            Credentials::new("u", "p"),
            Duration::from_secs(2),
        )
        .unwrap()
        .with_retry(RetryConfig::new(2, Duration::from_millis(10)));

        let err = client.getblockcount().unwrap_err();
        assert_eq!(
            err,
            RpcClientError::Transport(TransportError::ConnectionRefused)
        );
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        let client = RpcClient::new(
            Endpoint::localhost(18443),
            Credentials::new("u", "topsecret"),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!format!("{:?}", client).contains("topsecret"));
    }
}
