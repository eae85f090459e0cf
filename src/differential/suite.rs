//! Suite runner
//!
//! Scenarios are pulled from a shared index by a small pool of scoped
//! worker threads. Each worker lazily obtains at most one reference node
//! and stops it (if owned) when the worker finishes.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, info, warn};

use super::comparator::DifferentialComparator;
use super::scenarios::{ChainTip, ScenarioDef};
use super::{CaseStatus, ComparisonResult};
use crate::config::DifferentialConfig;
use crate::node::{
    BinaryPaths, DiscoveredNodeRecord, NodeDiscovery, NodeLocator, NodeOptions, NodeRegistry,
    PortManager, RegtestNode,
};
use crate::primitives::Network;
use crate::utils::current_timestamp;
use crate::validation::CandidateValidator;

/// Everything needed to obtain a reference node on demand
pub struct ReferenceSource {
    config: DifferentialConfig,
    ports: PortManager,
    binaries: Option<BinaryPaths>,
    discovered: Vec<DiscoveredNodeRecord>,
    options: NodeOptions,
}

impl ReferenceSource {
    /// Locate binaries and, when reuse is enabled, scan for running nodes
    pub fn prepare(config: &DifferentialConfig, registry: NodeRegistry) -> Self {
        let binaries = match NodeLocator::new(&config.locator).locate() {
            Ok(paths) => {
                info!("Using {} ({:?})", paths.daemon.display(), paths.source);
                Some(paths)
            }
            Err(e) => {
                warn!("No reference binaries: {}", e);
                None
            }
        };
        let discovered = if config.node.reuse_discovered {
            NodeDiscovery::new(config).scan(Some(Network::Regtest))
        } else {
            Vec::new()
        };
        let options = NodeOptions::from_config(&config.node, config.rpc.timeout())
            .with_registry(registry);
        Self {
            config: config.clone(),
            ports: PortManager::new(),
            binaries,
            discovered,
            options,
        }
    }

    /// A source that never yields a node
    pub fn unavailable(config: &DifferentialConfig) -> Self {
        Self {
            config: config.clone(),
            ports: PortManager::new(),
            binaries: None,
            discovered: Vec::new(),
            options: NodeOptions::from_config(&config.node, config.rpc.timeout()),
        }
    }

    pub fn with_binaries(mut self, binaries: BinaryPaths) -> Self {
        self.binaries = Some(binaries);
        self
    }

    pub fn with_discovered(mut self, discovered: Vec<DiscoveredNodeRecord>) -> Self {
        self.discovered = discovered;
        self
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_ports(mut self, ports: PortManager) -> Self {
        self.ports = ports;
        self
    }

    /// Whether `acquire` has anything to try
    pub fn is_available(&self) -> bool {
        self.binaries.is_some()
            || (self.config.node.reuse_discovered
                && self
                    .discovered
                    .iter()
                    .any(|r| r.reachable && r.network == Some(Network::Regtest)))
    }

    /// Reuse or start a node; `None` when neither works
    pub fn acquire(&self) -> Option<RegtestNode> {
        if !self.is_available() {
            return None;
        }
        match RegtestNode::acquire(
            &self.config,
            &self.ports,
            self.binaries.as_ref(),
            &self.discovered,
            self.options.clone(),
        ) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!("Reference node unavailable: {}", e);
                None
            }
        }
    }
}

/// One executed case
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    #[serde(flatten)]
    pub result: ComparisonResult,
    pub status: CaseStatus,
}

/// Aggregate of a suite run, in catalogue order
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteSummary {
    pub tested: usize,
    pub matched: usize,
    pub diverged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<CaseReport>,
}

impl SuiteSummary {
    fn from_reports(results: Vec<CaseReport>) -> Self {
        let count = |f: &dyn Fn(&CaseReport) -> bool| results.iter().filter(|r| f(r)).count();
        Self {
            tested: results.len(),
            matched: count(&|r| r.result.matches),
            diverged: count(&|r| {
                !r.result.matches && !r.result.reference_outcome.is_unavailable()
            }),
            skipped: count(&|r| r.status == CaseStatus::Skipped),
            failed: count(&|r| r.status == CaseStatus::Failed),
            results,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for SuiteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tested, {} matched, {} diverged, {} skipped, {} failed",
            self.tested, self.matched, self.diverged, self.skipped, self.failed
        )
    }
}

/// Run `scenarios` with up to `workers` threads
pub fn run_suite(
    source: &ReferenceSource,
    scenarios: &[ScenarioDef],
    candidate: &dyn CandidateValidator,
    workers: usize,
) -> SuiteSummary {
    let workers = workers.clamp(1, scenarios.len().max(1));
    let next = AtomicUsize::new(0);
    let reports: Mutex<Vec<(usize, CaseReport)>> = Mutex::new(Vec::with_capacity(scenarios.len()));

    info!(
        scenarios = scenarios.len(),
        workers,
        candidate = candidate.name(),
        "Running differential suite"
    );

    thread::scope(|scope| {
        for worker in 0..workers {
            let next = &next;
            let reports = &reports;
            scope.spawn(move || {
                let mut node: Option<Option<RegtestNode>> = None;
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(def) = scenarios.get(index) else {
                        break;
                    };
                    let reference = node.get_or_insert_with(|| source.acquire());
                    debug!(worker, scenario = def.name, "Running case");
                    let report = run_case(def, reference.as_ref(), candidate);
                    reports
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push((index, report));
                }
            });
        }
    });

    let mut reports = reports.into_inner().unwrap_or_else(|e| e.into_inner());
    reports.sort_by_key(|(index, _)| *index);
    let summary = SuiteSummary::from_reports(reports.into_iter().map(|(_, r)| r).collect());
    info!("Suite finished: {}", summary);
    summary
}

fn run_case(
    def: &ScenarioDef,
    node: Option<&RegtestNode>,
    candidate: &dyn CandidateValidator,
) -> CaseReport {
    let client = node.and_then(RegtestNode::rpc);
    let network = node.map(RegtestNode::network).unwrap_or(Network::Regtest);
    let tip = match client {
        Some(client) => ChainTip::fetch(client).unwrap_or_else(|e| {
            warn!("Could not read reference tip, building on genesis: {}", e);
            ChainTip::regtest_genesis()
        }),
        None => ChainTip::regtest_genesis(),
    };
    let now = u32::try_from(current_timestamp()).unwrap_or(u32::MAX);

    let case = def.build(&tip, network, now);
    let result = DifferentialComparator::new(candidate, client).compare(&case);
    let status = case.judge(&result);
    CaseReport { result, status }
}
