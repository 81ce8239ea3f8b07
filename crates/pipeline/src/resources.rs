//! Pre-flight gate over resources the toolchain claims externally.
//!
//! The prover binds a block of TCP ports and creates shared-memory segments;
//! a crashed or still-winding-down prior run can leave both claimed. The
//! gate polls until every resource in the set is observed free, then lets
//! the run proceed. No single poll is trusted: a transient false-free is
//! acceptable because the toolchain's own first action re-checks before
//! claiming.

use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::GateTimeout;

/// The fixed set of externally-claimed resource identifiers for one
/// deployment, derived from the configured base port.
#[derive(Debug, Clone)]
pub struct ResourceSet {
    pub ports: Vec<u16>,
    pub shm_segments: Vec<PathBuf>,
}

impl ResourceSet {
    /// Derive the port block and shared-memory segment paths from config.
    pub fn derive(config: &PipelineConfig) -> Self {
        let ports: Vec<u16> = (0..config.port_count)
            .map(|i| config.base_port + i)
            .collect();
        let shm_segments = ports
            .iter()
            .map(|port| config.shm_dir.join(format!("{}_{}", config.shm_prefix, port)))
            .collect();
        Self {
            ports,
            shm_segments,
        }
    }

    /// Names of the resources currently observed busy. Empty means ready.
    fn busy(&self) -> Vec<String> {
        let mut busy = Vec::new();
        for &port in &self.ports {
            if !port_free(port) {
                busy.push(format!("port {port}"));
            }
        }
        for segment in &self.shm_segments {
            if segment.exists() {
                busy.push(format!("shm {}", segment.display()));
            }
        }
        busy
    }
}

/// Polls a [`ResourceSet`] until every resource is free or the wait budget
/// runs out.
#[derive(Debug, Clone)]
pub struct ResourceGate {
    max_wait: Duration,
    poll_interval: Duration,
}

impl ResourceGate {
    pub fn new(max_wait: Duration, poll_interval: Duration) -> Self {
        Self {
            max_wait,
            poll_interval,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.resource_wait, config.resource_poll)
    }

    /// Wait until every resource in `set` is observed free in a single poll.
    ///
    /// On timeout the error names the resources still claimed, so operators
    /// can tell a stuck prior run from a port squatted by something else.
    pub async fn await_free(&self, set: &ResourceSet) -> Result<(), GateTimeout> {
        let started = Instant::now();
        let deadline = started + self.max_wait;

        loop {
            let busy = set.busy();
            if busy.is_empty() {
                info!(
                    ports = set.ports.len(),
                    segments = set.shm_segments.len(),
                    "all toolchain resources free"
                );
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(GateTimeout {
                    busy,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            debug!(busy = ?busy, "toolchain resources still claimed, waiting");
            sleep(self.poll_interval).await;
        }
    }
}

fn port_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}
