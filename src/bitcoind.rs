//! Regtest bitcoind container.

use std::{path::PathBuf, time::Duration};

use bitcoincore_rpc::{Auth, Client};
use tracing::info;
use url::Url;

use crate::{
    descriptor::NodeDescriptor,
    error::{Error, Result},
    launch::{self, FailurePolicy, NodeHandle},
    network::Fabric,
    utils::unique_name,
};

/// RPC port inside the container.
pub const RPC_PORT: u16 = 18443;
/// ZMQ raw-block publisher port inside the container.
pub const ZMQ_RAW_BLOCK_PORT: u16 = 28334;
/// ZMQ raw-tx publisher port inside the container.
pub const ZMQ_RAW_TX_PORT: u16 = 28335;

const IMAGE: &str = "polarlightning/bitcoind";
const TAG: &str = "28.0";
const DEFAULT_RPC_USER: &str = "testuser";
const DEFAULT_RPC_PASSWORD: &str = "testpassword";

/// Configuration for a regtest bitcoind node.
#[derive(Debug, Clone)]
pub struct BitcoindConfig {
    /// Static RPC username (basic auth).
    pub rpc_user: String,
    /// Static RPC password (basic auth).
    pub rpc_password: String,
    /// Budget for all port-readiness probes.
    pub ready_timeout: Duration,
    /// What to do with the container if provisioning fails partway.
    pub on_failure: FailurePolicy,
}

impl Default for BitcoindConfig {
    fn default() -> Self {
        Self {
            rpc_user: DEFAULT_RPC_USER.to_string(),
            rpc_password: DEFAULT_RPC_PASSWORD.to_string(),
            ready_timeout: Duration::from_secs(120),
            on_failure: FailurePolicy::default(),
        }
    }
}

/// A running regtest bitcoind node with an authenticated JSON-RPC client.
pub struct BitcoindNode {
    handle: NodeHandle,
    client: Client,
    rpc_user: String,
    rpc_password: String,
}

impl BitcoindNode {
    /// Starts a bitcoind container on `fabric` and blocks until its RPC and
    /// both ZMQ ports accept connections.
    ///
    /// `workdir` is the per-run base directory; dependent Lightning nodes
    /// place their own working directories underneath it.
    pub async fn start(
        fabric: &Fabric,
        workdir: impl Into<PathBuf>,
        config: Option<BitcoindConfig>,
    ) -> Result<Self> {
        let config = config.unwrap_or_default();
        let name = unique_name("bitcoind");

        let descriptor = NodeDescriptor::new(IMAGE, TAG, &name, fabric.name(), workdir)
            .with_exposed_port(RPC_PORT)
            .with_exposed_port(ZMQ_RAW_BLOCK_PORT)
            .with_exposed_port(ZMQ_RAW_TX_PORT)
            .with_cmd(bitcoind_args(&config.rpc_user, &config.rpc_password));

        let handle = launch::launch(descriptor, config.ready_timeout, config.on_failure).await?;
        let guard = launch::ProvisionGuard::new(handle, &name, config.on_failure);

        let rpc_url = format!("http://{}:{}", guard.get().host(), guard.get().host_port(RPC_PORT)?);
        let auth = Auth::UserPass(config.rpc_user.clone(), config.rpc_password.clone());
        let client = Client::new(&rpc_url, auth).map_err(|e| Error::client_setup(&name, e))?;

        let handle = guard.complete();
        info!(node = %name, %rpc_url, "bitcoind ready");
        Ok(Self {
            handle,
            client,
            rpc_user: config.rpc_user,
            rpc_password: config.rpc_password,
        })
    }

    /// Returns the authenticated JSON-RPC client (HTTP basic auth, no TLS).
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Returns the underlying node handle.
    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    /// Returns the static RPC username.
    pub fn rpc_user(&self) -> &str {
        &self.rpc_user
    }

    /// Returns the static RPC password.
    pub fn rpc_password(&self) -> &str {
        &self.rpc_password
    }

    /// Returns the host-reachable RPC URL.
    pub fn rpc_url(&self) -> Result<Url> {
        let url = format!("http://{}:{}", self.handle.host(), self.handle.host_port(RPC_PORT)?);
        Url::parse(&url).map_err(|e| Error::infra(self.handle.name(), e))
    }

    /// Returns `ip:port` of the RPC listener on the fabric, for dependent
    /// node arguments.
    pub fn internal_rpc_addr(&self) -> String {
        format!("{}:{}", self.handle.internal_ip(), RPC_PORT)
    }

    /// Returns the fabric-internal ZMQ raw-block endpoint.
    pub fn internal_zmq_raw_block(&self) -> String {
        format!("tcp://{}:{}", self.handle.internal_ip(), ZMQ_RAW_BLOCK_PORT)
    }

    /// Returns the fabric-internal ZMQ raw-tx endpoint.
    pub fn internal_zmq_raw_tx(&self) -> String {
        format!("tcp://{}:{}", self.handle.internal_ip(), ZMQ_RAW_TX_PORT)
    }

    /// Tears the node down; see [`NodeHandle::terminate`].
    ///
    /// The working directory removal also sweeps dependent Lightning node
    /// directories nested under it, so terminate those nodes first.
    pub async fn terminate(&mut self) -> Result<()> {
        self.handle.terminate().await
    }
}

impl std::fmt::Debug for BitcoindNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitcoindNode")
            .field("handle", &self.handle)
            .field("rpc_user", &self.rpc_user)
            .finish_non_exhaustive()
    }
}

fn bitcoind_args(rpc_user: &str, rpc_password: &str) -> Vec<String> {
    vec![
        "bitcoind".to_string(),
        "-server=1".to_string(),
        "-regtest=1".to_string(),
        "-debug=1".to_string(),
        format!("-zmqpubrawblock=tcp://0.0.0.0:{ZMQ_RAW_BLOCK_PORT}"),
        format!("-zmqpubrawtx=tcp://0.0.0.0:{ZMQ_RAW_TX_PORT}"),
        "-rpcbind=0.0.0.0".to_string(),
        "-rpcallowip=0.0.0.0/0".to_string(),
        format!("-rpcport={RPC_PORT}"),
        format!("-rpcuser={rpc_user}"),
        format!("-rpcpassword={rpc_password}"),
        "-txindex=1".to_string(),
        "-upnp=0".to_string(),
        "-dnsseed=0".to_string(),
        "-rest".to_string(),
        "-listen=1".to_string(),
        "-listenonion=0".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_are_deterministic() {
        let a = bitcoind_args("user", "pass");
        let b = bitcoind_args("user", "pass");
        assert_eq!(a, b);
    }

    #[test]
    fn args_carry_credentials_and_ports() {
        let args = bitcoind_args("alice", "hunter2");
        assert!(args.contains(&"-rpcuser=alice".to_string()));
        assert!(args.contains(&"-rpcpassword=hunter2".to_string()));
        assert!(args.contains(&"-rpcport=18443".to_string()));
        assert!(args.contains(&"-zmqpubrawblock=tcp://0.0.0.0:28334".to_string()));
    }
}
