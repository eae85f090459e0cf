//! Discovery of already-running reference nodes
//!
//! Probes the conventional RPC port of each network personality (plus an
//! optional custom port) with `getblockchaininfo`. Classification comes from
//! the reported chain name, not from the port. Anything that does not answer
//! with a well-formed identity reply is treated as absent.

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::credentials::{default_data_dir, resolve_credentials};
use crate::config::{DifferentialConfig, RpcSettings};
use crate::primitives::Network;
use crate::rpc::{Credentials, Endpoint, RpcClient, RpcClientError, TransportError};
use crate::utils::RetryConfig;

/// One probed port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNodeRecord {
    pub host: String,
    pub port: u16,
    /// Network reported by the node (`None` when unreachable)
    pub network: Option<Network>,
    pub reachable: bool,
    /// Credentials the probe succeeded with
    pub credentials: Option<Credentials>,
}

impl DiscoveredNodeRecord {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    fn absent(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            network: None,
            reachable: false,
            credentials: None,
        }
    }
}

/// Scanner for running reference nodes
#[derive(Debug, Clone)]
pub struct NodeDiscovery {
    settings: RpcSettings,
    data_dir: Option<PathBuf>,
    ports: Vec<(u16, Option<Network>)>,
}

impl NodeDiscovery {
    pub fn new(config: &DifferentialConfig) -> Self {
        let mut ports: Vec<(u16, Option<Network>)> = Vec::new();
        if let Some(custom) = config.rpc.port {
            ports.push((custom, config.network));
        }
        for network in Network::ALL {
            let port = network.default_rpc_port();
            if !ports.iter().any(|(p, _)| *p == port) {
                ports.push((port, Some(network)));
            }
        }
        Self {
            settings: config.rpc.clone(),
            data_dir: default_data_dir(),
            ports,
        }
    }

    /// Override the data directory searched for cookies and bitcoin.conf
    pub fn with_data_dir(mut self, data_dir: Option<PathBuf>) -> Self {
        self.data_dir = data_dir;
        self
    }

    /// Replace the probed ports (each with an optional network hint for credentials)
    pub fn with_ports(mut self, ports: Vec<(u16, Option<Network>)>) -> Self {
        self.ports = ports;
        self
    }

    /// Ports in scan order
    pub fn ports(&self) -> Vec<u16> {
        self.ports.iter().map(|(p, _)| *p).collect()
    }

    /// Probe every port, reachable or not
    pub fn probe_all(&self) -> Vec<DiscoveredNodeRecord> {
        self.ports
            .iter()
            .map(|(port, hint)| self.probe(*port, *hint))
            .collect()
    }

    /// Reachable nodes; those of `preferred` first, otherwise scan order
    pub fn scan(&self, preferred: Option<Network>) -> Vec<DiscoveredNodeRecord> {
        let reachable: Vec<DiscoveredNodeRecord> = self
            .probe_all()
            .into_iter()
            .filter(|r| r.reachable)
            .collect();

        let Some(preferred) = preferred else {
            return reachable;
        };
        let (mut first, rest): (Vec<_>, Vec<_>) = reachable
            .into_iter()
            .partition(|r| r.network == Some(preferred));
        first.extend(rest);
        first
    }

    /// Probe one port with each candidate credential until one is accepted
    pub fn probe(&self, port: u16, hint: Option<Network>) -> DiscoveredNodeRecord {
        let host = self.settings.host.as_str();
        let candidates = self.candidate_credentials(hint);
        if candidates.is_empty() {
            debug!(port, "No credentials available for probe");
        }

        for credentials in candidates {
            let client = match RpcClient::new(
                Endpoint::new(host, port),
                credentials.clone(),
                self.settings.probe_timeout(),
            ) {
                Ok(client) => client.with_retry(RetryConfig::new(1, Duration::ZERO)),
                Err(e) => {
                    debug!(port, "Failed to build probe client: {}", e);
                    return DiscoveredNodeRecord::absent(host, port);
                }
            };

            match client.getblockchaininfo() {
                Ok(info) => match info.network() {
                    Some(network) => {
                        info!(port, %network, blocks = info.blocks, "Discovered reference node");
                        return DiscoveredNodeRecord {
                            host: host.to_string(),
                            port,
                            network: Some(network),
                            reachable: true,
                            credentials: Some(credentials),
                        };
                    }
                    None => {
                        debug!(port, chain = %info.chain, "Unrecognised chain name");
                        return DiscoveredNodeRecord::absent(host, port);
                    }
                },
                Err(RpcClientError::Transport(TransportError::Http(401 | 403))) => {
                    debug!(port, user = %credentials.user, "Credentials rejected");
                    continue;
                }
                Err(e) => {
                    debug!(port, "Probe failed: {}", e);
                    return DiscoveredNodeRecord::absent(host, port);
                }
            }
        }
        DiscoveredNodeRecord::absent(host, port)
    }

    /// Explicit credentials, then those of the hinted network, then every other network
    fn candidate_credentials(&self, hint: Option<Network>) -> Vec<Credentials> {
        let mut order: Vec<Network> = hint.into_iter().collect();
        order.extend(Network::ALL.iter().copied().filter(|n| Some(*n) != hint));

        let mut candidates: Vec<Credentials> = Vec::new();
        for network in order {
            if let Some(creds) =
                resolve_credentials(&self.settings, self.data_dir.as_deref(), network)
            {
                if !candidates.contains(&creds) {
                    candidates.push(creds);
                }
            }
        }
        candidates
    }
}
