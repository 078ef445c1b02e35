//! Isolated per-run Docker networks.
//!
//! Every topology gets exactly one uniquely named network so its containers
//! can address each other by internal IP without exposing ports to the host.

use std::process::Command;

use tracing::debug;

use crate::{
    error::{Error, Result},
    utils::unique_name,
};

const NETWORK_PREFIX: &str = "ln-devnet";

/// The isolated virtual network joining one topology's containers.
///
/// Created once per run and shared read-only by every node; removed (or left
/// for the runtime to garbage-collect) at run end.
#[derive(Debug, Clone)]
pub struct Fabric {
    name: String,
}

impl Fabric {
    /// Creates a uniquely named Docker network.
    ///
    /// Single attempt, no retries; callers may retry at a higher level. The
    /// network resource exists until [`Fabric::remove`] or runtime cleanup.
    pub fn create() -> Result<Self> {
        let name = unique_name(NETWORK_PREFIX);
        let output = Command::new("docker")
            .args(["network", "create", &name])
            .output()
            .map_err(|e| Error::infra("network", format!("failed to invoke docker: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::infra(
                "network",
                format!("docker network create {name} failed: {}", stderr.trim()),
            ));
        }

        debug!(network = %name, "created docker network");
        Ok(Self { name })
    }

    /// Returns the network name containers attach to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes the network. Fails while containers are still attached, and on
    /// a second removal of the same network; both are surfaced, not swallowed.
    pub fn remove(&self) -> Result<()> {
        let output = Command::new("docker")
            .args(["network", "rm", &self.name])
            .output()
            .map_err(|e| Error::teardown("network", format!("failed to invoke docker: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::teardown(
                "network",
                format!("docker network rm {} failed: {}", self.name, stderr.trim()),
            ));
        }

        debug!(network = %self.name, "removed docker network");
        Ok(())
    }
}
