//! End-to-end runs against a real reference daemon
//!
//! Skipped (logged and returned) when no binaries are found, mirroring the
//! engine's own degrade-to-skipped policy.

#![cfg(unix)]

use bllvm_differential::config::DifferentialConfig;
use bllvm_differential::differential::{catalogue, run_suite, CaseStatus, ReferenceSource};
use bllvm_differential::node::process::is_process_alive;
use bllvm_differential::node::{BinaryPaths, NodeLocator, NodeOptions, NodeState, PortManager, RegtestNode};
use bllvm_differential::primitives::Network;
use bllvm_differential::validation::StructuralValidator;
use serial_test::serial;

fn binaries(config: &DifferentialConfig) -> Option<BinaryPaths> {
    match NodeLocator::new(&config.locator).locate() {
        Ok(paths) => Some(paths),
        Err(e) => {
            eprintln!("skipping: {}", e);
            None
        }
    }
}

#[test]
#[serial]
fn test_owned_node_lifecycle() {
    let config = DifferentialConfig::from_env().unwrap();
    let Some(binaries) = binaries(&config) else {
        return;
    };
    let ports = PortManager::new();
    let options = NodeOptions::from_config(&config.node, config.rpc.timeout());

    let mut node = RegtestNode::acquire(&config, &ports, Some(&binaries), &[], options).unwrap();
    assert_eq!(node.state(), NodeState::Ready);
    assert_eq!(node.network(), Network::Regtest);
    let info = node.rpc().unwrap().getblockchaininfo().unwrap();
    assert_eq!(info.network(), Some(Network::Regtest));

    let pid = node.pid().unwrap();
    let data_dir = node.data_dir().unwrap().to_path_buf();
    node.stop();

    assert!(!is_process_alive(pid));
    assert!(!data_dir.exists());
    assert_eq!(ports.leased_count(), 0);
}

#[test]
#[serial]
fn test_catalogue_against_reference() {
    let mut config = DifferentialConfig::from_env().unwrap();
    config.node.reuse_discovered = false;
    let Some(binaries) = binaries(&config) else {
        return;
    };
    let source = ReferenceSource::unavailable(&config)
        .with_binaries(binaries)
        .with_options(NodeOptions::from_config(&config.node, config.rpc.timeout()));

    let summary = run_suite(&source, &catalogue(), &StructuralValidator::new(), 1);

    assert_eq!(summary.skipped, 0);
    assert!(!summary.has_failures(), "{:#?}", summary.results);
    assert_eq!(summary.results[0].status, CaseStatus::Passed);
}
