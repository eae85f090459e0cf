//! Reference node management
//!
//! Port arbitration, binary location, discovery of running nodes, and the
//! lifecycle of owned regtest daemons.

pub mod credentials;
pub mod discovery;
pub mod locator;
pub mod ports;
pub mod process;
pub mod regtest;

pub use discovery::{DiscoveredNodeRecord, NodeDiscovery};
pub use locator::{BinaryPaths, LocationSource, LocatorError, NodeLocator};
pub use ports::{PortError, PortLease, PortManager};
pub use process::{NodeRegistry, OsSupervisor, ProcessSupervisor};
pub use regtest::{NodeError, NodeHandle, NodeOptions, NodeState, RegtestNode};
