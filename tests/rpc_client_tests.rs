//! Lookup and node-control RPC wrappers against a mock reference node

mod common;

use bllvm_differential::differential::{find, ChainTip};
use bllvm_differential::primitives::{Block, Hash256, Network, Transaction};
use bllvm_differential::rpc::{Credentials, Endpoint, RpcClient, RpcClientError, TransportError};
use bllvm_differential::validation::Artifact;
use common::{MockNode, MockReply};
use serde_json::json;
use std::time::{Duration, Instant};

const NOW: u32 = 1_296_688_602 + 600;

fn client_for(mock: &MockNode) -> RpcClient {
    RpcClient::new(
        Endpoint::localhost(mock.port),
        Credentials::new("user", "pass"),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn sample_block() -> Block {
    match find("valid-block")
        .unwrap()
        .build(&ChainTip::regtest_genesis(), Network::Regtest, NOW)
        .artifact
    {
        Artifact::Block(block) => block,
        other => panic!("expected a block, got {}", other.kind()),
    }
}

fn sample_transaction() -> Transaction {
    match find("tx-duplicate-inputs")
        .unwrap()
        .build(&ChainTip::regtest_genesis(), Network::Regtest, NOW)
        .artifact
    {
        Artifact::Transaction(tx) => tx,
        other => panic!("expected a transaction, got {}", other.kind()),
    }
}

#[test]
fn test_getblock_decodes_raw_block() {
    let block = sample_block();
    let hex = block.to_hex();
    let mock = MockNode::start(move |method, _| match method {
        "getblock" => MockReply::Result(json!(hex)),
        _ => MockReply::Error(-32601, "Method not found".to_string()),
    });

    let fetched = client_for(&mock).getblock(&block.hash()).unwrap();
    assert_eq!(fetched, block);

    let calls = mock.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].params, vec![json!(block.hash().to_string()), json!(0)]);
    assert!(calls[0].authorized);
}

#[test]
fn test_getrawtransaction_decodes_raw_transaction() {
    let tx = sample_transaction();
    let hex = tx.to_hex();
    let mock = MockNode::start(move |method, _| match method {
        "getrawtransaction" => MockReply::Result(json!(hex)),
        _ => MockReply::Error(-32601, "Method not found".to_string()),
    });

    let fetched = client_for(&mock).getrawtransaction(&tx.txid()).unwrap();
    assert_eq!(fetched, tx);
    assert_eq!(mock.calls()[0].params, vec![json!(tx.txid().to_string())]);
}

#[test]
fn test_undecodable_lookup_reply_is_malformed() {
    let mock = MockNode::start(|method, _| match method {
        "getblock" => MockReply::Result(json!("00ff")),
        "getrawtransaction" => MockReply::Result(json!("not hex")),
        _ => MockReply::Result(json!(42)),
    });
    let client = client_for(&mock);

    let err = client.getblock(&Hash256::default()).unwrap_err();
    assert!(matches!(err, RpcClientError::Transport(TransportError::Malformed(_))), "{err}");

    let err = client.getrawtransaction(&Hash256::default()).unwrap_err();
    assert!(matches!(err, RpcClientError::Transport(TransportError::Malformed(_))), "{err}");

    // A number where a hash is expected
    let err = client.getbestblockhash().unwrap_err();
    assert!(matches!(err, RpcClientError::Transport(TransportError::Malformed(_))), "{err}");
}

#[test]
fn test_lookup_of_unknown_hash_surfaces_rpc_error() {
    let mock = MockNode::start(|_, _| MockReply::Error(-5, "Block not found".to_string()));
    let err = client_for(&mock).getblock(&Hash256::default()).unwrap_err();
    assert_eq!(
        err,
        RpcClientError::Rpc {
            code: -5,
            message: "Block not found".to_string()
        }
    );
    // Application errors are answers, not retried
    assert_eq!(mock.calls().len(), 1);
}

#[test]
fn test_sendrawtransaction_returns_txid() {
    let tx = sample_transaction();
    let txid = tx.txid();
    let mock = MockNode::start(move |method, _| match method {
        "sendrawtransaction" => MockReply::Result(json!(txid.to_string())),
        _ => MockReply::Error(-32601, "Method not found".to_string()),
    });

    let returned = client_for(&mock).sendrawtransaction(&tx.to_hex()).unwrap();
    assert_eq!(returned, txid);
    assert_eq!(mock.calls()[0].params, vec![json!(tx.to_hex())]);
}

#[test]
fn test_generate_calls_return_block_hashes() {
    let hash = sample_block().hash();
    let mock = MockNode::start(move |method, params| match method {
        "generatetoaddress" | "generatetodescriptor" => {
            let count = params[0].as_u64().unwrap_or(0) as usize;
            MockReply::Result(json!(vec![hash.to_string(); count]))
        }
        _ => MockReply::Error(-32601, "Method not found".to_string()),
    });
    let client = client_for(&mock);

    let hashes = client.generatetoaddress(2, "bcrt1qxyz").unwrap();
    assert_eq!(hashes, vec![hash, hash]);

    let hashes = client.generatetodescriptor(1, "raw(51)").unwrap();
    assert_eq!(hashes, vec![hash]);

    let calls = mock.calls();
    assert_eq!(calls[0].params, vec![json!(2), json!("bcrt1qxyz")]);
    assert_eq!(calls[1].params, vec![json!(1), json!("raw(51)")]);
}

#[test]
fn test_stop_returns_node_message() {
    let mock = MockNode::start(|method, _| match method {
        "stop" => MockReply::Result(json!("Bitcoin Core stopping")),
        _ => MockReply::Error(-32601, "Method not found".to_string()),
    });
    assert_eq!(client_for(&mock).stop().unwrap(), "Bitcoin Core stopping");
    assert_eq!(mock.methods(), vec!["stop".to_string()]);
}

#[test]
fn test_call_within_overrides_client_timeout() {
    // Accepts connections but never answers
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let client = RpcClient::new(
        Endpoint::localhost(listener.local_addr().unwrap().port()),
        Credentials::new("user", "pass"),
        Duration::from_secs(30),
    )
    .unwrap();

    let started = Instant::now();
    let err = client
        .call_within::<serde_json::Value>("getblockchaininfo", vec![], Duration::from_millis(300))
        .unwrap_err();
    assert_eq!(err, RpcClientError::Transport(TransportError::Timeout));
    assert!(started.elapsed() < Duration::from_secs(5));
}
