//! Reachability probes for hosting-device management addresses.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use routerhost_core::{ConfigError, ProbeKind, RouterHostConfig};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

/// Port tried by [`TcpProbe`] when built from configuration (SSH).
pub const DEFAULT_TCP_PORT: u16 = 22;

#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("failed to run probe: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("probe of {0} timed out")]
    Timeout(String),
}

/// Network-level check of one address.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, address: &str) -> bool;
}

/// Runs the system `ping` command: five echo requests, 200ms apart.
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn ping(&self, address: &str) -> Result<bool, LivenessError> {
        let program = if address.contains(':') { "ping6" } else { "ping" };
        let mut child = Command::new(program)
            .args(["-c", "5", "-W", "1", "-i", "0.2", address])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => Ok(status?.success()),
            Err(_) => Err(LivenessError::Timeout(address.to_string())),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn is_reachable(&self, address: &str) -> bool {
        match self.ping(address).await {
            Ok(reachable) => {
                debug!(address, reachable, "ping probe");
                reachable
            }
            Err(e) => {
                debug!(address, error = %e, "ping probe failed");
                false
            }
        }
    }
}

/// Considers an address reachable when a TCP connection to `port` opens.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self, address: &str) -> bool {
        let connect = TcpStream::connect((address, self.port));
        let reachable = matches!(tokio::time::timeout(self.timeout, connect).await, Ok(Ok(_)));
        debug!(address, port = self.port, reachable, "tcp probe");
        reachable
    }
}

/// Build the probe selected in the liveness configuration.
pub fn probe_from_config(config: &RouterHostConfig) -> Result<Arc<dyn ReachabilityProbe>, ConfigError> {
    let timeout = config.device_connection_timeout()?;
    let probe: Arc<dyn ReachabilityProbe> = match config.liveness.probe {
        ProbeKind::Ping => Arc::new(PingProbe::new(timeout)),
        ProbeKind::Tcp => Arc::new(TcpProbe::new(DEFAULT_TCP_PORT, timeout)),
    };
    Ok(probe)
}
