//! One-call orchestration of a full regtest topology.
//!
//! Each node walks the same sequence — descriptor built, launching, probing,
//! ready, credential bootstrap, client attached — with any failed step
//! short-circuiting the rest of that node via `?`. Nodes start sequentially
//! because every Lightning descriptor embeds the bitcoind node's resolved
//! internal address and credentials; there is no parallel batch to schedule.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    bitcoind::{BitcoindConfig, BitcoindNode},
    cln::{ClnConfig, ClnNode},
    error::{Error, Result},
    launch::{FailurePolicy, ProvisionGuard},
    lnd::{LndConfig, LndNode},
    network::Fabric,
    utils::create_run_dir,
};

/// Builds a [`Stack`]: one fabric, one bitcoind node, and any number of
/// dependent Lightning nodes.
#[derive(Debug, Clone, Default)]
pub struct StackBuilder {
    lnd_nodes: usize,
    cln_nodes: usize,
    teardown_on_failure: bool,
    bitcoind: Option<BitcoindConfig>,
    lnd: Option<LndConfig>,
    cln: Option<ClnConfig>,
}

impl StackBuilder {
    /// A builder for a bitcoind-only topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` LND nodes, each wired to the bitcoind node.
    pub const fn with_lnd_nodes(mut self, count: usize) -> Self {
        self.lnd_nodes = count;
        self
    }

    /// Adds `count` Core Lightning nodes, each wired to the bitcoind node.
    pub const fn with_cln_nodes(mut self, count: usize) -> Self {
        self.cln_nodes = count;
        self
    }

    /// Chooses what happens to already-started nodes when a later node fails.
    ///
    /// Default `false`: everything that came up stays running (and the
    /// handles are released) so the failure can be inspected; cleanup is
    /// manual. `true`: the partial topology is torn down best-effort before
    /// the original error is returned.
    pub const fn teardown_on_failure(mut self, teardown: bool) -> Self {
        self.teardown_on_failure = teardown;
        self
    }

    /// Overrides the bitcoind node configuration.
    pub fn with_bitcoind_config(mut self, config: BitcoindConfig) -> Self {
        self.bitcoind = Some(config);
        self
    }

    /// Overrides the configuration of every LND node.
    pub fn with_lnd_config(mut self, config: LndConfig) -> Self {
        self.lnd = Some(config);
        self
    }

    /// Overrides the configuration of every Core Lightning node.
    pub fn with_cln_config(mut self, config: ClnConfig) -> Self {
        self.cln = Some(config);
        self
    }

    /// Provisions the topology: fabric, then bitcoind, then each Lightning
    /// node in turn. Construction aborts on the first node failure.
    pub async fn build(self) -> Result<Stack> {
        let policy = if self.teardown_on_failure {
            FailurePolicy::Remove
        } else {
            FailurePolicy::LeaveRunning
        };

        let mut bitcoind_config = self.bitcoind.clone().unwrap_or_default();
        bitcoind_config.on_failure = policy;
        let mut lnd_config = self.lnd.clone().unwrap_or_default();
        lnd_config.on_failure = policy;
        let mut cln_config = self.cln.clone().unwrap_or_default();
        cln_config.on_failure = policy;

        let fabric = Fabric::create()?;
        let base_dir = create_run_dir("ln-devnet")?;

        let bitcoind =
            match BitcoindNode::start(&fabric, &base_dir, Some(bitcoind_config)).await {
                Ok(node) => node,
                Err(error) => {
                    if self.teardown_on_failure {
                        let _ = std::fs::remove_dir_all(&base_dir);
                        let _ = fabric.remove();
                    }
                    return Err(error);
                }
            };

        // The guard keeps a partially built stack from being dropped (and its
        // containers removed) if the caller drops this future mid-build.
        let stack = Stack { fabric, base_dir, bitcoind, lnd: Vec::new(), cln: Vec::new() };
        let mut guard = ProvisionGuard::new(stack, "stack", policy);

        for _ in 0..self.lnd_nodes {
            match LndNode::start(guard.get().bitcoind(), Some(lnd_config.clone())).await {
                Ok(node) => guard.get_mut().lnd.push(node),
                Err(error) => {
                    return Self::abort(self.teardown_on_failure, guard.complete(), error).await
                }
            }
        }
        for _ in 0..self.cln_nodes {
            match ClnNode::start(guard.get().bitcoind(), Some(cln_config.clone())).await {
                Ok(node) => guard.get_mut().cln.push(node),
                Err(error) => {
                    return Self::abort(self.teardown_on_failure, guard.complete(), error).await
                }
            }
        }

        let stack = guard.complete();
        info!(
            network = %stack.fabric.name(),
            lnd = stack.lnd.len(),
            cln = stack.cln.len(),
            "topology ready"
        );
        Ok(stack)
    }

    async fn abort(teardown: bool, mut stack: Stack, error: Error) -> Result<Stack> {
        if teardown {
            // Best-effort; the original provisioning error wins.
            let _ = stack.terminate().await;
        } else {
            // Leave everything running for inspection. The handles are
            // intentionally released without dropping so the containers
            // survive this scope.
            std::mem::forget(stack);
        }
        Err(error)
    }
}

/// A provisioned topology: the fabric, the bitcoind node, and the Lightning
/// nodes depending on it.
#[derive(Debug)]
pub struct Stack {
    fabric: Fabric,
    base_dir: PathBuf,
    bitcoind: BitcoindNode,
    lnd: Vec<LndNode>,
    cln: Vec<ClnNode>,
}

impl Stack {
    /// Returns the bitcoind node.
    pub fn bitcoind(&self) -> &BitcoindNode {
        &self.bitcoind
    }

    /// Returns the LND nodes, in start order.
    pub fn lnd(&self) -> &[LndNode] {
        &self.lnd
    }

    /// Returns the Core Lightning nodes, in start order.
    pub fn cln(&self) -> &[ClnNode] {
        &self.cln
    }

    /// Returns the fabric joining the topology.
    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    /// Returns the per-run base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Tears the whole topology down in dependency-safe order: Lightning
    /// nodes, then bitcoind, then the fabric and the base directory.
    ///
    /// Best-effort: every step is attempted; all failures are reported
    /// together and none masks another. A second call reports the already-
    /// removed state instead of panicking.
    pub async fn terminate(&mut self) -> Result<()> {
        let mut failures = Vec::new();

        for node in &mut self.cln {
            if let Err(e) = node.terminate().await {
                failures.push(e.to_string());
            }
        }
        for node in &mut self.lnd {
            if let Err(e) = node.terminate().await {
                failures.push(e.to_string());
            }
        }
        if let Err(e) = self.bitcoind.terminate().await {
            failures.push(e.to_string());
        }
        if let Err(e) = self.fabric.remove() {
            failures.push(e.to_string());
        }
        if self.base_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.base_dir) {
                failures.push(format!("remove base dir {}: {e}", self.base_dir.display()));
            }
        }

        if failures.is_empty() {
            info!(network = %self.fabric.name(), "topology terminated");
            Ok(())
        } else {
            Err(Error::teardown("stack", failures.join("; ")))
        }
    }
}
