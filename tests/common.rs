//! Shared fixtures for integration tests
//!
//! - fake reference binaries (shell scripts) in a temp dir
//! - a mock JSON-RPC reference node on its own thread and runtime
//! - helpers that hold ports open to simulate occupied ranges

#![allow(dead_code)]

use bllvm_differential::node::{BinaryPaths, LocationSource};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tempfile::TempDir;

/// Reply the mock node gives for one call
#[derive(Debug, Clone)]
pub enum MockReply {
    Result(Value),
    Error(i32, String),
    /// Bare HTTP status with an empty body (e.g. 401)
    Status(u16),
}

pub type Handler = Arc<dyn Fn(&str, &[Value]) -> MockReply + Send + Sync>;

/// One recorded request
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub params: Vec<Value>,
    pub authorized: bool,
}

/// Minimal JSON-RPC server answering like a reference node
pub struct MockNode {
    pub port: u16,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MockNode {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> MockReply + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = tokio::sync::oneshot::channel::<()>();

        let thread_calls = calls.clone();
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                loop {
                    tokio::select! {
                        _ = &mut rx => break,
                        accepted = listener.accept() => {
                            let Ok((stream, _)) = accepted else { continue };
                            let handler = handler.clone();
                            let calls = thread_calls.clone();
                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    respond(req, handler.clone(), calls.clone())
                                });
                                let _ = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await;
                            });
                        }
                    }
                }
            });
        });

        Self {
            port,
            calls,
            shutdown: Some(tx),
            thread: Some(thread),
        }
    }

    /// Mock answering `getblockchaininfo` for `chain` and nothing else
    pub fn with_chain(chain: &'static str) -> Self {
        Self::start(move |method, _| match method {
            "getblockchaininfo" => MockReply::Result(chain_info(chain)),
            _ => MockReply::Error(-32601, "Method not found".to_string()),
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.method).collect()
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn respond(
    req: Request<Incoming>,
    handler: Handler,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let authorized = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .map(|v| v.as_bytes().starts_with(b"Basic "))
        .unwrap_or(false);
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request["params"].as_array().cloned().unwrap_or_default();
    let id = request["id"].clone();

    calls.lock().unwrap().push(RecordedCall {
        method: method.clone(),
        params: params.clone(),
        authorized,
    });

    let (status, payload) = match handler(&method, &params) {
        MockReply::Result(result) => (200, json!({ "result": result, "error": null, "id": id })),
        MockReply::Error(code, message) => (
            500,
            json!({ "result": null, "error": { "code": code, "message": message }, "id": id }),
        ),
        MockReply::Status(status) => {
            return Ok(Response::builder()
                .status(status)
                .body(Full::new(Bytes::new()))
                .unwrap())
        }
    };
    Ok(Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(payload.to_string())))
        .unwrap())
}

/// `getblockchaininfo` reply for `chain`
pub fn chain_info(chain: &str) -> Value {
    json!({
        "chain": chain,
        "blocks": 0,
        "headers": 0,
        "bestblockhash": "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
        "mediantime": 1296688602u64,
        "initialblockdownload": true,
    })
}

/// `getblockheader` reply for the regtest genesis block
pub fn genesis_header() -> Value {
    json!({
        "hash": "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
        "height": 0,
        "version": 1,
        "merkleroot": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
        "time": 1296688602u32,
        "mediantime": 1296688602u32,
        "bits": "207fffff",
    })
}

/// Fake reference install: `bitcoind` runs `daemon_body`, `bitcoin-cli` does nothing
pub struct FakeInstall {
    pub dir: TempDir,
}

impl FakeInstall {
    pub fn new(daemon_body: &str) -> Self {
        let dir = TempDir::new().unwrap();
        write_script(&dir.path().join("bitcoind"), daemon_body);
        write_script(&dir.path().join("bitcoin-cli"), "exit 0");
        Self { dir }
    }

    /// Daemon that never opens its RPC port
    pub fn silent() -> Self {
        Self::new("exec sleep 300")
    }

    /// Daemon that exits immediately
    pub fn crashing() -> Self {
        Self::new("exit 3")
    }

    /// Daemon that serves a regtest JSON-RPC endpoint on `-rpcport` and
    /// appends the port to `started.log`; `None` without python3
    pub fn rpc_answering() -> Option<Self> {
        Self::python(RPC_DAEMON)
    }

    /// Daemon that listens on `-rpcport` but never reads a request
    pub fn mute_listener() -> Option<Self> {
        Self::python(MUTE_DAEMON)
    }

    fn python(program: &str) -> Option<Self> {
        if which::which("python3").is_err() {
            eprintln!("python3 not found, skipping");
            return None;
        }
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("started.log");
        let body = format!(
            "for a in \"$@\"; do case \"$a\" in -rpcport=*) echo \"${{a#-rpcport=}}\" >> '{}';; esac; done\n\
             exec python3 - \"$@\" <<'PYEOF'\n{}\nPYEOF",
            log.display(),
            program
        );
        write_script(&dir.path().join("bitcoind"), &body);
        write_script(&dir.path().join("bitcoin-cli"), "exit 0");
        Some(Self { dir })
    }

    /// Ports passed to every daemon started from this install
    pub fn started_ports(&self) -> Vec<u16> {
        std::fs::read_to_string(self.dir.path().join("started.log"))
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    pub fn binaries(&self) -> BinaryPaths {
        BinaryPaths {
            daemon: self.dir.path().join("bitcoind"),
            cli: self.dir.path().join("bitcoin-cli"),
            version: None,
            source: LocationSource::Override,
        }
    }
}

const RPC_DAEMON: &str = r#"
import json, sys
from http.server import BaseHTTPRequestHandler, HTTPServer

GENESIS = "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"
port = int([a.split("=", 1)[1] for a in sys.argv[1:] if a.startswith("-rpcport=")][0])

class Handler(BaseHTTPRequestHandler):
    def do_POST(self):
        length = int(self.headers.get("Content-Length", 0))
        request = json.loads(self.rfile.read(length) or b"{}")
        method = request.get("method")
        if method == "getblockchaininfo":
            result = {"chain": "regtest", "blocks": 0, "headers": 0,
                      "bestblockhash": GENESIS, "mediantime": 1296688602,
                      "initialblockdownload": True}
        elif method == "getbestblockhash":
            result = GENESIS
        elif method == "getblockheader":
            result = {"hash": GENESIS, "height": 0, "version": 1,
                      "merkleroot": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
                      "time": 1296688602, "mediantime": 1296688602, "bits": "207fffff"}
        elif method == "testmempoolaccept":
            result = [{"txid": GENESIS, "allowed": False, "reject-reason": "missing-inputs"}]
        else:
            result = None
        body = json.dumps({"result": result, "error": None, "id": request.get("id")}).encode()
        self.send_response(200)
        self.send_header("Content-Type", "application/json")
        self.send_header("Content-Length", str(len(body)))
        self.end_headers()
        self.wfile.write(body)

    def log_message(self, *args):
        pass

HTTPServer(("127.0.0.1", port), Handler).serve_forever()
"#;

const MUTE_DAEMON: &str = r#"
import socket, sys, time

port = int([a.split("=", 1)[1] for a in sys.argv[1:] if a.startswith("-rpcport=")][0])
sock = socket.socket(socket.AF_INET, socket.SOCK_STREAM)
sock.setsockopt(socket.SOL_SOCKET, socket.SO_REUSEADDR, 1)
sock.bind(("127.0.0.1", port))
sock.listen(16)
time.sleep(300)
"#;

/// Write an executable `/bin/sh` script
pub fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Bind every port in `[base, base + count)` that is still free
pub fn occupy_ports(base: u16, count: u16) -> Vec<TcpListener> {
    (base..base.saturating_add(count))
        .filter_map(|port| TcpListener::bind(("127.0.0.1", port)).ok())
        .collect()
}

/// A base port whose `count`-wide window is currently free
pub fn free_window(count: u16) -> u16 {
    for base in (20_000u16..60_000).step_by(count as usize + 7) {
        let held = occupy_ports(base, count);
        if held.len() == count as usize {
            return base;
        }
    }
    panic!("no free window of {} ports", count);
}

/// Entries directly under `dir` whose name starts with `prefix`
pub fn entries_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(prefix))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Mock that answers like a regtest reference node sitting at genesis,
/// rejecting artifacts with the reasons the real node would give
pub fn core_like_node() -> MockNode {
    use bllvm_differential::primitives::{Block, Transaction};
    use std::collections::HashSet;

    MockNode::start(|method, params| match method {
        "getblockchaininfo" => MockReply::Result(chain_info("regtest")),
        "getbestblockhash" => MockReply::Result(json!(
            "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"
        )),
        "getblockheader" => MockReply::Result(genesis_header()),
        "submitblock" => {
            let hex = params.first().and_then(Value::as_str).unwrap_or_default();
            let Ok(block) = Block::from_hex(hex) else {
                return MockReply::Error(-22, "Block decode failed".to_string());
            };
            let reason = if block.transactions.len() > 1 {
                Some("bad-txns-duplicate")
            } else if block.header.version < 2 {
                Some("bad-version(0x00000001)")
            } else if block.header.merkle_root.is_zero() {
                Some("bad-txnmrklroot")
            } else if block.transactions[0].inputs[0].script_sig.first() == Some(&0x00) {
                Some("bad-cb-height")
            } else {
                None
            };
            MockReply::Result(json!(reason))
        }
        "testmempoolaccept" => {
            let hex = params
                .first()
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(Value::as_str)
                .unwrap_or_default();
            let Ok(tx) = Transaction::from_hex(hex) else {
                return MockReply::Error(-22, "TX decode failed".to_string());
            };
            let mut seen = HashSet::new();
            let reason = if tx.inputs.is_empty() {
                "bad-txns-vin-empty"
            } else if tx.is_coinbase() {
                "coinbase"
            } else if !tx.inputs.iter().all(|i| seen.insert(i.prevout)) {
                "bad-txns-inputs-duplicate"
            } else {
                "missing-inputs"
            };
            MockReply::Result(json!([{
                "txid": tx.txid().to_string(),
                "allowed": false,
                "reject-reason": reason,
            }]))
        }
        _ => MockReply::Error(-32601, "Method not found".to_string()),
    })
}
