//! Process supervision for owned reference nodes
//!
//! Signals go through a [`ProcessSupervisor`] so tests can observe exactly
//! which processes would be terminated. [`NodeRegistry`] keeps track of every
//! live owned process so an interrupted run can tear them all down.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sends termination signals to owned processes
pub trait ProcessSupervisor: Send + Sync {
    /// Ask the process to exit gracefully
    fn terminate(&self, child: &mut Child) -> io::Result<()>;

    /// Force the process to exit
    fn kill(&self, child: &mut Child) -> io::Result<()>;
}

/// Supervisor backed by real OS signals (SIGTERM, then SIGKILL)
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSupervisor;

impl ProcessSupervisor for OsSupervisor {
    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        #[cfg(unix)]
        {
            send_sigterm(child.id())
        }
        #[cfg(not(unix))]
        {
            child.kill()
        }
    }

    fn kill(&self, child: &mut Child) -> io::Result<()> {
        match child.kill() {
            // Already exited
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(unix)]
fn send_sigkill(pid: u32) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Whether a process with `pid` exists (zombies included)
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Wait up to `timeout` for `child` to exit, reaping it if it does
pub fn wait_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Terminate `child`: graceful signal, bounded wait, then force
pub fn shutdown_child(
    supervisor: &dyn ProcessSupervisor,
    child: &mut Child,
    grace: Duration,
) -> io::Result<()> {
    let pid = child.id();
    if child.try_wait()?.is_some() {
        debug!(pid, "Process already exited");
        return Ok(());
    }

    if let Err(e) = supervisor.terminate(child) {
        warn!(pid, "Graceful termination failed: {}", e);
    }
    if wait_timeout(child, grace)?.is_some() {
        debug!(pid, "Process exited after SIGTERM");
        return Ok(());
    }

    warn!(pid, "Process still alive after {:?}, killing", grace);
    supervisor.kill(child)?;
    child.wait()?;
    Ok(())
}

#[derive(Debug, Clone)]
struct RegisteredNode {
    data_dir: PathBuf,
    keep_data: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    nodes: HashMap<u32, RegisteredNode>,
    /// Set by `terminate_all`; later registrations are refused
    closed: bool,
}

/// Live owned processes, keyed by pid
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track an owned process; `false` once the registry has been closed,
    /// in which case the caller must shut the process down itself
    pub fn register(&self, pid: u32, data_dir: PathBuf, keep_data: bool) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.nodes.insert(
            pid,
            RegisteredNode {
                data_dir,
                keep_data,
            },
        );
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn unregister(&self, pid: u32) {
        self.lock().nodes.remove(&pid);
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.lock().nodes.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }

    /// Close the registry, then signal every registered process and remove
    /// its data directory
    ///
    /// Used on interrupt, when the owning `RegtestNode`s will not get to run
    /// their own cleanup. Nodes spawned after this call are refused by
    /// `register`.
    #[cfg(unix)]
    pub fn terminate_all(&self, grace: Duration) {
        let nodes: Vec<(u32, RegisteredNode)> = {
            let mut state = self.lock();
            state.closed = true;
            state.nodes.drain().collect()
        };
        if nodes.is_empty() {
            return;
        }
        info!("Terminating {} owned reference node(s)", nodes.len());

        for (pid, _) in &nodes {
            if let Err(e) = send_sigterm(*pid) {
                warn!(pid, "SIGTERM failed: {}", e);
            }
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && nodes.iter().any(|(pid, _)| is_process_alive(*pid)) {
            std::thread::sleep(POLL_INTERVAL);
        }

        for (pid, node) in nodes {
            if is_process_alive(pid) {
                if let Err(e) = send_sigkill(pid) {
                    warn!(pid, "SIGKILL failed: {}", e);
                }
            }
            if !node.keep_data {
                if let Err(e) = std::fs::remove_dir_all(&node.data_dir) {
                    debug!("Failed to remove {:?}: {}", node.data_dir, e);
                }
            }
        }
    }
}
