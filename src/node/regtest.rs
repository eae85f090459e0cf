//! Reference node lifecycle
//!
//! A [`RegtestNode`] either owns a daemon process it spawned or wraps a
//! discovered node it must never touch. The distinction is carried by
//! [`NodeHandle`]: only the `Owned` variant holds a process, so `stop()` has
//! nothing to signal for a reused node.
//!
//! ```text
//! Unstarted -> Starting -> Ready -> Stopped
//! Unstarted -> Discovered ---------> Stopped
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::discovery::DiscoveredNodeRecord;
use super::locator::{BinaryPaths, LocatorError};
use super::ports::{PortError, PortLease, PortManager};
use super::process::{shutdown_child, NodeRegistry, OsSupervisor, ProcessSupervisor};
use crate::config::{DifferentialConfig, NodeLifecycleConfig};
use crate::primitives::Network;
use crate::rpc::{ChainInfo, Credentials, Endpoint, RpcClient, RpcClientError, TransportError};
use crate::utils::{retry_when, RetryConfig, RetryError};

/// RPC user for owned nodes
pub const OWNED_RPC_USER: &str = "bllvm";

/// Node lifecycle errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    PortExhausted(#[from] PortError),

    #[error(transparent)]
    BinaryNotFound(#[from] LocatorError),

    #[error("node on port {port} not ready after {waited:?}")]
    NodeStartTimeout { port: u16, waited: Duration },

    #[error("node on port {port} exited during start-up ({status})")]
    NodeExited { port: u16, status: String },

    #[error("data directory {path:?}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Rpc(#[from] RpcClientError),

    #[error("discovered node on port {0} is not reusable")]
    NotReusable(u16),

    #[error("node registry closed, run is shutting down")]
    ShuttingDown,

    #[error("operation not valid in state {0:?}")]
    InvalidState(NodeState),
}

impl NodeError {
    /// Start-up failures worth retrying on a fresh port
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeError::NodeStartTimeout { .. } | NodeError::NodeExited { .. }
        )
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unstarted,
    Starting,
    Ready,
    /// Reused node found by discovery (ready, never owned)
    Discovered,
    Stopped,
}

/// Tunables for owned nodes
#[derive(Clone)]
pub struct NodeOptions {
    pub startup_timeout: Duration,
    pub stop_timeout: Duration,
    pub rpc_timeout: Duration,
    pub keep_data: bool,
    /// Parent of the per-node data directory (`/dev/shm` or the temp dir when unset)
    pub data_root: Option<PathBuf>,
    /// Extra daemon arguments appended after the fixed set
    pub extra_args: Vec<String>,
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub registry: Option<NodeRegistry>,
}

impl std::fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeOptions")
            .field("startup_timeout", &self.startup_timeout)
            .field("stop_timeout", &self.stop_timeout)
            .field("keep_data", &self.keep_data)
            .field("data_root", &self.data_root)
            .finish_non_exhaustive()
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self::from_config(&NodeLifecycleConfig::default(), Duration::from_secs(30))
    }
}

impl NodeOptions {
    pub fn from_config(config: &NodeLifecycleConfig, rpc_timeout: Duration) -> Self {
        Self {
            startup_timeout: config.startup_timeout(),
            stop_timeout: config.stop_timeout(),
            rpc_timeout,
            keep_data: config.keep_data,
            data_root: config.data_root.clone(),
            extra_args: Vec::new(),
            supervisor: Arc::new(OsSupervisor),
            registry: None,
        }
    }

    pub fn with_supervisor(mut self, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

/// A spawned daemon and the resources tied to it
#[derive(Debug)]
pub struct OwnedProcess {
    child: Option<Child>,
    pid: u32,
    data_dir: PathBuf,
    lease: Option<PortLease>,
    endpoint: Endpoint,
}

/// Owned process or reused endpoint
#[derive(Debug)]
pub enum NodeHandle {
    Owned(OwnedProcess),
    Reused(Endpoint),
}

impl NodeHandle {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            NodeHandle::Owned(process) => &process.endpoint,
            NodeHandle::Reused(endpoint) => endpoint,
        }
    }
}

/// One reference node, owned or reused
pub struct RegtestNode {
    state: NodeState,
    handle: Option<NodeHandle>,
    credentials: Credentials,
    network: Network,
    options: NodeOptions,
    client: Option<RpcClient>,
}

impl std::fmt::Debug for RegtestNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegtestNode")
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl RegtestNode {
    /// Unstarted node with fresh random credentials
    pub fn new(options: NodeOptions) -> Self {
        Self {
            state: NodeState::Unstarted,
            handle: None,
            credentials: Credentials::new(OWNED_RPC_USER, generate_password()),
            network: Network::Regtest,
            options,
            client: None,
        }
    }

    /// Wrap a discovered node; it is never signalled or modified
    pub fn from_discovered(
        record: &DiscoveredNodeRecord,
        options: NodeOptions,
    ) -> Result<Self, NodeError> {
        let (true, Some(network), Some(credentials)) =
            (record.reachable, record.network, record.credentials.clone())
        else {
            return Err(NodeError::NotReusable(record.port));
        };
        let endpoint = record.endpoint();
        let client = RpcClient::new(endpoint.clone(), credentials.clone(), options.rpc_timeout)?;
        info!(port = record.port, %network, "Reusing discovered reference node");
        Ok(Self {
            state: NodeState::Discovered,
            handle: Some(NodeHandle::Reused(endpoint)),
            credentials,
            network,
            options,
            client: Some(client),
        })
    }

    /// Spawn the daemon on the leased port with a private data directory
    pub fn start(&mut self, binaries: &BinaryPaths, lease: PortLease) -> Result<(), NodeError> {
        if self.state != NodeState::Unstarted {
            return Err(NodeError::InvalidState(self.state));
        }
        binaries.verify()?;

        let port = lease.port();
        let data_dir = create_data_dir(self.options.data_root.as_deref())?;
        if let Err(source) = write_node_conf(&data_dir, &self.credentials) {
            remove_data_dir(&data_dir);
            return Err(NodeError::DataDir {
                path: data_dir,
                source,
            });
        }

        let mut command = Command::new(&binaries.daemon);
        command
            .args(daemon_args(&data_dir, port))
            .args(&self.options.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        debug!("Spawning reference daemon: {:?}", command);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                remove_data_dir(&data_dir);
                return Err(NodeError::Spawn {
                    path: binaries.daemon.clone(),
                    source,
                });
            }
        };
        let pid = child.id();
        if let Some(registry) = &self.options.registry {
            if !registry.register(pid, data_dir.clone(), self.options.keep_data) {
                warn!(pid, "Run is shutting down, stopping freshly spawned node");
                let mut child = child;
                if let Err(e) = self.options.supervisor.kill(&mut child) {
                    warn!(pid, "Failed to kill reference node: {}", e);
                }
                let _ = child.wait();
                remove_data_dir(&data_dir);
                return Err(NodeError::ShuttingDown);
            }
        }
        info!(port, pid, "Started reference node in {:?}", data_dir);

        let endpoint = Endpoint::localhost(port);
        self.handle = Some(NodeHandle::Owned(OwnedProcess {
            child: Some(child),
            pid,
            data_dir,
            lease: Some(lease),
            endpoint: endpoint.clone(),
        }));
        self.state = NodeState::Starting;

        // Readiness polling does its own retrying
        let client = RpcClient::new(endpoint, self.credentials.clone(), self.options.rpc_timeout)?
            .with_retry(RetryConfig::new(1, Duration::ZERO));
        self.client = Some(client);
        Ok(())
    }

    /// Poll until RPC answers; on failure the process is killed before returning
    pub fn wait_ready(&mut self) -> Result<ChainInfo, NodeError> {
        if self.state != NodeState::Starting {
            return Err(NodeError::InvalidState(self.state));
        }
        let (Some(NodeHandle::Owned(process)), Some(client)) = (&mut self.handle, &self.client)
        else {
            return Err(NodeError::InvalidState(self.state));
        };
        let port = process.endpoint.port;
        let started = Instant::now();
        let startup_timeout = self.options.startup_timeout;
        let rpc_timeout = self.options.rpc_timeout;
        let retry = RetryConfig::readiness(startup_timeout);

        let outcome = retry_when(
            &retry,
            |e: &ReadinessError| matches!(e, ReadinessError::NotYet(_)),
            || {
                if let Some(child) = process.child.as_mut() {
                    if let Ok(Some(status)) = child.try_wait() {
                        return Err(ReadinessError::Exited(status.to_string()));
                    }
                }
                // A daemon that accepts but never answers must not outlive the deadline
                let remaining = startup_timeout.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(ReadinessError::NotYet(TransportError::Timeout.into()));
                }
                let budget = remaining.min(rpc_timeout);
                match client.call_within::<ChainInfo>("getblockchaininfo", vec![], budget) {
                    Ok(info) => Ok(info),
                    Err(e) if e.is_transport() || e.is_warmup() => {
                        Err(ReadinessError::NotYet(e))
                    }
                    Err(e) => Err(ReadinessError::Failed(e)),
                }
            },
        );

        match outcome {
            Ok(info) => {
                info!(port, elapsed = ?started.elapsed(), "Reference node ready");
                self.state = NodeState::Ready;
                // Regular calls get the transient retry window back
                self.client = self
                    .client
                    .take()
                    .map(|client| client.with_retry(RetryConfig::transient()));
                Ok(info)
            }
            Err(RetryError::Exhausted { .. }) => {
                warn!(port, "Reference node not ready in {:?}", self.options.startup_timeout);
                self.stop();
                Err(NodeError::NodeStartTimeout {
                    port,
                    waited: started.elapsed(),
                })
            }
            Err(RetryError::Permanent(ReadinessError::Exited(status))) => {
                warn!(port, "Reference node exited during start-up: {}", status);
                self.stop();
                Err(NodeError::NodeExited { port, status })
            }
            Err(RetryError::Permanent(ReadinessError::NotYet(e)))
            | Err(RetryError::Permanent(ReadinessError::Failed(e))) => {
                self.stop();
                Err(NodeError::Rpc(e))
            }
        }
    }

    /// Start and wait for readiness
    pub fn launch(
        options: NodeOptions,
        binaries: &BinaryPaths,
        lease: PortLease,
    ) -> Result<Self, NodeError> {
        let mut node = Self::new(options);
        node.start(binaries, lease)?;
        node.wait_ready()?;
        Ok(node)
    }

    /// Reuse a discovered regtest node if allowed, otherwise start one,
    /// retrying retryable start-up failures with a fresh port lease
    pub fn acquire(
        config: &DifferentialConfig,
        ports: &PortManager,
        binaries: Option<&BinaryPaths>,
        discovered: &[DiscoveredNodeRecord],
        options: NodeOptions,
    ) -> Result<Self, NodeError> {
        if config.node.reuse_discovered {
            // Blocks must be mined at regtest difficulty, so only regtest nodes qualify
            if let Some(record) = discovered
                .iter()
                .find(|r| r.reachable && r.network == Some(Network::Regtest))
            {
                match Self::from_discovered(record, options.clone()) {
                    Ok(node) => return Ok(node),
                    Err(e) => debug!("Discovered node not reusable: {}", e),
                }
            }
        }

        let binaries = binaries.ok_or_else(|| LocatorError::BinaryNotFound {
            searched: Vec::new(),
        })?;
        let attempts = config.node.start_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let lease = ports.allocate(config.ports.base_port, config.ports.range_size)?;
            match Self::launch(options.clone(), binaries, lease) {
                Ok(node) => return Ok(node),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!("Start attempt {}/{} failed: {}; retrying", attempt, attempts, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Terminate an owned node and clean up; a no-op for reused nodes
    ///
    /// Idempotent: later calls find nothing left to stop.
    pub fn stop(&mut self) {
        match &mut self.handle {
            None => {}
            Some(NodeHandle::Reused(endpoint)) => {
                if self.state != NodeState::Stopped {
                    debug!(%endpoint, "Leaving reused node running");
                }
            }
            Some(NodeHandle::Owned(process)) => {
                if let Some(mut child) = process.child.take() {
                    let grace = self.options.stop_timeout;
                    if let Err(e) = shutdown_child(self.options.supervisor.as_ref(), &mut child, grace)
                    {
                        warn!(pid = process.pid, "Failed to stop reference node: {}", e);
                    }
                    if let Some(registry) = &self.options.registry {
                        registry.unregister(process.pid);
                    }
                    if self.options.keep_data {
                        info!("Keeping node data in {:?}", process.data_dir);
                    } else {
                        remove_data_dir(&process.data_dir);
                    }
                    info!(pid = process.pid, port = process.endpoint.port, "Stopped reference node");
                }
                process.lease.take();
            }
        }
        self.client = None;
        self.state = NodeState::Stopped;
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn handle(&self) -> Option<&NodeHandle> {
        self.handle.as_ref()
    }

    /// Whether this node's process was spawned here
    pub fn is_owned(&self) -> bool {
        matches!(self.handle, Some(NodeHandle::Owned(_)))
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.handle.as_ref().map(NodeHandle::endpoint)
    }

    /// Process id of an owned daemon
    pub fn pid(&self) -> Option<u32> {
        match &self.handle {
            Some(NodeHandle::Owned(process)) => Some(process.pid),
            _ => None,
        }
    }

    /// Data directory of an owned daemon
    pub fn data_dir(&self) -> Option<&Path> {
        match &self.handle {
            Some(NodeHandle::Owned(process)) => Some(&process.data_dir),
            _ => None,
        }
    }

    /// RPC client, available once the node is ready or discovered
    pub fn rpc(&self) -> Option<&RpcClient> {
        match self.state {
            NodeState::Ready | NodeState::Discovered => self.client.as_ref(),
            _ => None,
        }
    }
}

impl Drop for RegtestNode {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug)]
enum ReadinessError {
    NotYet(RpcClientError),
    Exited(String),
    Failed(RpcClientError),
}

impl std::fmt::Display for ReadinessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessError::NotYet(e) => write!(f, "not ready: {}", e),
            ReadinessError::Exited(status) => write!(f, "exited: {}", status),
            ReadinessError::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Fixed daemon argument set (credentials live in the data directory's bitcoin.conf)
pub fn daemon_args(data_dir: &Path, rpc_port: u16) -> Vec<String> {
    vec![
        "-regtest".to_string(),
        "-server".to_string(),
        "-listen=0".to_string(),
        format!("-datadir={}", data_dir.display()),
        format!("-rpcport={}", rpc_port),
        "-rpcbind=127.0.0.1".to_string(),
        "-rpcallowip=127.0.0.1".to_string(),
        "-fallbackfee=0.00001".to_string(),
        "-txindex=0".to_string(),
        "-printtoconsole=0".to_string(),
    ]
}

fn write_node_conf(data_dir: &Path, credentials: &Credentials) -> io::Result<()> {
    let conf = format!(
        "[regtest]\nrpcuser={}\nrpcpassword={}\n",
        credentials.user,
        credentials.password()
    );
    fs::write(data_dir.join("bitcoin.conf"), conf)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(data_dir.join("bitcoin.conf"), fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Parent directory for owned node data
pub fn default_data_root() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Create `<root>/bllvm-regtest-<pid>-<uuid>`
fn create_data_dir(root: Option<&Path>) -> Result<PathBuf, NodeError> {
    let root = root.map(Path::to_path_buf).unwrap_or_else(default_data_root);
    let name = format!(
        "bllvm-regtest-{}-{}",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    let path = root.join(name);
    fs::create_dir_all(&path).map_err(|source| NodeError::DataDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn remove_data_dir(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}

/// 32 hex characters from the thread RNG
fn generate_password() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_shape() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_daemon_args_fixed_set() {
        let args = daemon_args(Path::new("/tmp/node"), 18550);
        assert!(args.contains(&"-regtest".to_string()));
        assert!(args.contains(&"-listen=0".to_string()));
        assert!(args.contains(&"-rpcport=18550".to_string()));
        assert!(args.contains(&"-datadir=/tmp/node".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-rpcpassword")));
    }

    #[test]
    fn test_data_dirs_are_unique() {
        let root = tempfile::TempDir::new().unwrap();
        let a = create_data_dir(Some(root.path())).unwrap();
        let b = create_data_dir(Some(root.path())).unwrap();
        assert_ne!(a, b);
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("bllvm-regtest-"));
    }

    #[test]
    fn test_unstarted_node_stop_is_noop() {
        let mut node = RegtestNode::new(NodeOptions::default());
        node.stop();
        node.stop();
        assert_eq!(node.state(), NodeState::Stopped);
        assert!(!node.is_owned());
    }

    #[test]
    fn test_unreachable_record_not_reusable() {
        let record = DiscoveredNodeRecord {
            host: "127.0.0.1".into(),
            port: 18443,
            network: None,
            reachable: false,
            credentials: None,
        };
        assert!(matches!(
            RegtestNode::from_discovered(&record, NodeOptions::default()),
            Err(NodeError::NotReusable(18443))
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(NodeError::NodeStartTimeout {
            port: 1,
            waited: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(NodeError::NodeExited {
            port: 1,
            status: "exit status: 1".into()
        }
        .is_retryable());
        assert!(!NodeError::PortExhausted(PortError::PortExhausted { base: 1, range: 1 })
            .is_retryable());
    }
}
