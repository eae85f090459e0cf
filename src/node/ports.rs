//! RPC port allocation for owned nodes
//!
//! Ports are found by a bind-and-release probe over a configured window.
//! Nothing is reserved at the OS level between the probe and the daemon
//! binding the socket, so callers must treat a bind failure at start-up as
//! retryable. Within one process, leased ports are tracked so two workers
//! never receive the same port while both leases are alive.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

/// Port allocation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("no free port among {range} ports starting at {base}")]
    PortExhausted { base: u16, range: u16 },
}

type LeaseSet = Arc<Mutex<HashSet<u16>>>;

fn lock(set: &LeaseSet) -> MutexGuard<'_, HashSet<u16>> {
    // A panicking holder cannot leave the set half-updated
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A port confirmed bindable at allocation time
///
/// Dropping the lease returns the port to the in-process pool.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    bound_at: SystemTime,
    leased: LeaseSet,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// When the probe bind succeeded
    pub fn bound_at(&self) -> SystemTime {
        self.bound_at
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        lock(&self.leased).remove(&self.port);
        debug!(port = self.port, "Released port lease");
    }
}

/// Allocates ports for owned node RPC endpoints
#[derive(Debug, Clone, Default)]
pub struct PortManager {
    leased: LeaseSet,
}

impl PortManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease the first bindable port in `[base_port, base_port + range_size)`
    ///
    /// Ports are probed in ascending order. Ports already leased by this
    /// manager are skipped without probing.
    pub fn allocate(&self, base_port: u16, range_size: u16) -> Result<PortLease, PortError> {
        let end = (base_port as u32 + range_size as u32).min(u16::MAX as u32 + 1);
        let mut leased = lock(&self.leased);

        for candidate in base_port as u32..end {
            let port = candidate as u16;
            if port == 0 || leased.contains(&port) {
                continue;
            }
            if probe_bind(port) {
                leased.insert(port);
                debug!(port, "Allocated port");
                return Ok(PortLease {
                    port,
                    bound_at: SystemTime::now(),
                    leased: Arc::clone(&self.leased),
                });
            }
        }

        warn!(base_port, range_size, "Port range exhausted");
        Err(PortError::PortExhausted {
            base: base_port,
            range: range_size,
        })
    }

    /// Return a lease to the pool (equivalent to dropping it)
    pub fn release(&self, lease: PortLease) {
        drop(lease);
    }

    /// Number of live leases issued by this manager
    pub fn leased_count(&self) -> usize {
        lock(&self.leased).len()
    }
}

/// Bind and immediately release `port` on the loopback interface
fn probe_bind(port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_ok()
}
