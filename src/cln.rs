//! Core Lightning container: REST (clnrest) with rune authentication.
//!
//! The rune is not written to disk; it is minted on demand by running
//! `lightning-cli createrune` inside the container and scraping the JSON
//! object out of the command output.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tokio::time::timeout;
use tracing::info;
use url::Url;

use crate::{
    bitcoind::{self, BitcoindNode},
    bootstrap,
    descriptor::NodeDescriptor,
    error::{Error, Result},
    launch::{self, FailurePolicy, NodeHandle},
    utils::unique_name,
};

/// REST (clnrest) port inside the container.
pub const REST_PORT: u16 = 8080;
/// P2P port inside the container.
pub const P2P_PORT: u16 = 9735;

const IMAGE: &str = "polarlightning/clightning";
const TAG: &str = "24.11.1";
const LIGHTNING_DIR: &str = "/home/clightning/.lightning";
const RPC_FILE: &str = "/home/clightning/.lightning/regtest/lightning-rpc";

/// Configuration for a Core Lightning node.
#[derive(Debug, Clone)]
pub struct ClnConfig {
    /// Budget for all port-readiness probes.
    pub ready_timeout: Duration,
    /// Budget for minting the rune after readiness.
    pub credential_timeout: Duration,
    /// What to do with the container if provisioning fails partway.
    pub on_failure: FailurePolicy,
}

impl Default for ClnConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(120),
            credential_timeout: Duration::from_secs(30),
            on_failure: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateRuneResponse {
    rune: String,
}

/// A running Core Lightning node with a minted rune and a REST client.
#[derive(Debug)]
pub struct ClnNode {
    handle: NodeHandle,
    client: ClnRestClient,
    rune: String,
}

impl ClnNode {
    /// Starts a Core Lightning container wired to `bitcoind`.
    ///
    /// Same dependency shape as LND: the descriptor embeds the upstream
    /// node's fabric-internal address and static credentials, and the working
    /// directory nests under the bitcoind node's directory.
    pub async fn start(bitcoind: &BitcoindNode, config: Option<ClnConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();
        let name = unique_name("cln");
        let workdir = bitcoind.handle().workdir().join(&name);

        let descriptor =
            NodeDescriptor::new(IMAGE, TAG, &name, bitcoind.handle().network(), &workdir)
                .with_exposed_port(REST_PORT)
                .with_exposed_port(P2P_PORT)
                .with_bind_mount(&workdir, LIGHTNING_DIR)
                .with_cmd(cln_args(
                    bitcoind.rpc_user(),
                    bitcoind.rpc_password(),
                    &bitcoind.handle().internal_ip().to_string(),
                ));

        let handle = launch::launch(descriptor, config.ready_timeout, config.on_failure).await?;
        let guard = launch::ProvisionGuard::new(handle, &name, config.on_failure);

        let (rune, client) = Self::bootstrap(guard.get(), &config).await?;

        let handle = guard.complete();
        info!(node = %name, "cln ready");
        Ok(Self { handle, client, rune })
    }

    /// Mints the rune and builds the REST client, strictly after readiness.
    async fn bootstrap(handle: &NodeHandle, config: &ClnConfig) -> Result<(String, ClnRestClient)> {
        let cmd = ["lightning-cli", "--rpc-file", RPC_FILE, "--regtest", "createrune"];
        let response: CreateRuneResponse =
            timeout(config.credential_timeout, bootstrap::exec_json(handle, &cmd))
                .await
                .map_err(|_| {
                    Error::credential_read(
                        handle.name(),
                        format!("createrune timed out after {:?}", config.credential_timeout),
                    )
                })??;

        let client = ClnRestClient::new(
            handle.name(),
            handle.host(),
            handle.host_port(REST_PORT)?,
            &response.rune,
        )?;
        Ok((response.rune, client))
    }

    /// Returns the rune-authenticated REST client.
    pub fn client(&self) -> &ClnRestClient {
        &self.client
    }

    /// Returns the underlying node handle.
    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    /// Returns the capability token minted at bootstrap.
    pub fn rune(&self) -> &str {
        &self.rune
    }

    /// Returns `ip:port` of the P2P listener on the fabric, for peering.
    pub fn internal_p2p_addr(&self) -> String {
        format!("{}:{}", self.handle.internal_ip(), P2P_PORT)
    }

    /// Tears the node down; see [`NodeHandle::terminate`].
    pub async fn terminate(&mut self) -> Result<()> {
        self.handle.terminate().await
    }
}

fn cln_args(rpc_user: &str, rpc_password: &str, bitcoind_ip: &str) -> Vec<String> {
    vec![
        "lightningd".to_string(),
        format!("--addr=0.0.0.0:{P2P_PORT}"),
        "--network=regtest".to_string(),
        format!("--bitcoin-rpcuser={rpc_user}"),
        format!("--bitcoin-rpcpassword={rpc_password}"),
        format!("--bitcoin-rpcconnect={bitcoind_ip}"),
        format!("--bitcoin-rpcport={}", bitcoind::RPC_PORT),
        "--log-level=debug".to_string(),
        "--dev-bitcoind-poll=2".to_string(),
        "--dev-fast-gossip".to_string(),
        "--grpc-port=11001".to_string(),
        "--log-file=-".to_string(),
        "--log-file=/home/clightning/.lightning/debug.log".to_string(),
        format!("--clnrest-port={REST_PORT}"),
        "--clnrest-protocol=http".to_string(),
        "--clnrest-host=0.0.0.0".to_string(),
        "--developer".to_string(),
    ]
}

/// REST client for clnrest; every request carries the rune in a `Rune`
/// header.
#[derive(Debug, Clone)]
pub struct ClnRestClient {
    node: String,
    http: reqwest::Client,
    base_url: Url,
}

impl ClnRestClient {
    fn new(node: &str, host: &str, port: u16, rune: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let value =
            HeaderValue::from_str(rune).map_err(|e| Error::client_setup(node, e))?;
        headers.insert("Rune", value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::client_setup(node, e))?;
        let base_url = Url::parse(&format!("http://{host}:{port}"))
            .map_err(|e| Error::client_setup(node, e))?;

        Ok(Self { node: node.to_string(), http, base_url })
    }

    /// Calls an RPC method via `POST /v1/<method>` and returns the JSON
    /// response. Failures are [`Error::Rpc`]; the client itself stays usable.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = self
            .base_url
            .join(&format!("v1/{method}"))
            .map_err(|e| Error::rpc(&self.node, e))?;
        let response = self
            .http
            .post(url)
            .json(&params)
            .send()
            .await
            .map_err(|e| Error::rpc(&self.node, format!("{method} request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::rpc(&self.node, format!("{method} returned {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::rpc(&self.node, format!("{method} response decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_are_deterministic_for_a_fixed_upstream() {
        let a = cln_args("user", "pass", "10.0.0.2");
        let b = cln_args("user", "pass", "10.0.0.2");
        assert_eq!(a, b);
    }

    #[test]
    fn args_embed_upstream_address_and_credentials() {
        let args = cln_args("user", "pass", "10.0.0.2");
        assert!(args.contains(&"--bitcoin-rpcconnect=10.0.0.2".to_string()));
        assert!(args.contains(&"--bitcoin-rpcport=18443".to_string()));
        assert!(args.contains(&"--bitcoin-rpcuser=user".to_string()));
    }

    #[tokio::test]
    async fn failed_rest_call_is_an_rpc_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\n\r\noops")
                .await;
        });

        let client = ClnRestClient::new("cln", "127.0.0.1", port, "rune").unwrap();
        let err = client.call("getinfo", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Rpc { .. }), "unexpected error: {err}");
    }

    #[test]
    fn rune_response_parses_from_noisy_exec_output() {
        let output = "warning: something\n{\"rune\": \"xyz\", \"unique_id\": 1}\n";
        let parsed: CreateRuneResponse =
            crate::bootstrap::parse_embedded_json("cln", output).unwrap();
        assert_eq!(parsed.rune, "xyz");
    }
}
