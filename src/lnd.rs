//! LND container: gRPC over TLS with macaroon authentication.
//!
//! The node writes its tls cert and admin macaroon into the bind-mounted
//! working directory after its own initialization; both are polled out of
//! there once the ports are up, then used to build an authenticated channel.

use std::time::Duration;

use tonic::{
    metadata::{Ascii, MetadataValue},
    service::{interceptor::InterceptedService, Interceptor},
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint},
    Request, Status,
};
use tracing::info;

use crate::{
    bitcoind::BitcoindNode,
    bootstrap,
    descriptor::NodeDescriptor,
    error::{Error, Result},
    launch::{self, FailurePolicy, NodeHandle},
    utils::unique_name,
};

/// gRPC port inside the container.
pub const GRPC_PORT: u16 = 10009;
/// REST port inside the container.
pub const REST_PORT: u16 = 8080;
/// P2P port inside the container.
pub const P2P_PORT: u16 = 9735;

const IMAGE: &str = "polarlightning/lnd";
const TAG: &str = "0.18.4-beta";
const LND_DIR: &str = "/home/lnd/.lnd";
const MACAROON_PATH: &str = "data/chain/bitcoin/regtest/admin.macaroon";
const TLS_CERT_PATH: &str = "tls.cert";

/// Configuration for an LND node.
#[derive(Debug, Clone)]
pub struct LndConfig {
    /// Budget for all port-readiness probes.
    pub ready_timeout: Duration,
    /// Budget for each generated secret to appear after readiness.
    pub credential_timeout: Duration,
    /// What to do with the container if provisioning fails partway.
    pub on_failure: FailurePolicy,
}

impl Default for LndConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(120),
            credential_timeout: Duration::from_secs(30),
            on_failure: FailurePolicy::default(),
        }
    }
}

/// A running LND node with its admin macaroon and an authenticated channel.
#[derive(Debug)]
pub struct LndNode {
    handle: NodeHandle,
    client: LndGrpc,
    macaroon: Vec<u8>,
}

impl LndNode {
    /// Starts an LND container wired to `bitcoind`.
    ///
    /// The descriptor embeds the bitcoind node's fabric-internal RPC address,
    /// static credentials and ZMQ endpoints, so the upstream node must be
    /// running first. The working directory is a fresh subdirectory of the
    /// bitcoind node's directory, bind-mounted at the node's data dir.
    pub async fn start(bitcoind: &BitcoindNode, config: Option<LndConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();
        let name = unique_name("lnd");
        let workdir = bitcoind.handle().workdir().join(&name);

        let descriptor =
            NodeDescriptor::new(IMAGE, TAG, &name, bitcoind.handle().network(), &workdir)
                .with_exposed_port(REST_PORT)
                .with_exposed_port(P2P_PORT)
                .with_exposed_port(GRPC_PORT)
                .with_bind_mount(&workdir, LND_DIR)
                .with_cmd(lnd_args(
                    &bitcoind.internal_rpc_addr(),
                    bitcoind.rpc_user(),
                    bitcoind.rpc_password(),
                    &bitcoind.internal_zmq_raw_block(),
                    &bitcoind.internal_zmq_raw_tx(),
                ));

        let handle = launch::launch(descriptor, config.ready_timeout, config.on_failure).await?;
        let guard = launch::ProvisionGuard::new(handle, &name, config.on_failure);

        let (macaroon, client) = Self::bootstrap(guard.get(), &config).await?;

        let handle = guard.complete();
        info!(node = %name, "lnd ready");
        Ok(Self { handle, client, macaroon })
    }

    /// Credential bootstrap and client construction, strictly after readiness.
    async fn bootstrap(handle: &NodeHandle, config: &LndConfig) -> Result<(Vec<u8>, LndGrpc)> {
        let macaroon = bootstrap::wait_for_file(
            handle.name(),
            &handle.workdir().join(MACAROON_PATH),
            config.credential_timeout,
        )
        .await?;
        let tls_cert = bootstrap::wait_for_file(
            handle.name(),
            &handle.workdir().join(TLS_CERT_PATH),
            config.credential_timeout,
        )
        .await?;

        let client = LndGrpc::connect(
            handle.name(),
            handle.host(),
            handle.host_port(GRPC_PORT)?,
            &tls_cert,
            &macaroon,
        )
        .await?;
        Ok((macaroon, client))
    }

    /// Returns the authenticated gRPC client.
    pub fn client(&self) -> &LndGrpc {
        &self.client
    }

    /// Returns the underlying node handle.
    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    /// Returns the raw admin macaroon bytes.
    pub fn macaroon(&self) -> &[u8] {
        &self.macaroon
    }

    /// Returns the admin macaroon hex-encoded, as gRPC metadata carries it.
    pub fn macaroon_hex(&self) -> String {
        hex::encode(&self.macaroon)
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

fn lnd_args(
    bitcoind_rpc_addr: &str,
    rpc_user: &str,
    rpc_password: &str,
    zmq_raw_block: &str,
    zmq_raw_tx: &str,
) -> Vec<String> {
    vec![
        "lnd".to_string(),
        "--noseedbackup".to_string(),
        "--debuglevel=debug".to_string(),
        format!("--listen=0.0.0.0:{P2P_PORT}"),
        format!("--rpclisten=0.0.0.0:{GRPC_PORT}"),
        format!("--restlisten=0.0.0.0:{REST_PORT}"),
        "--protocol.wumbo-channels".to_string(),
        "--bitcoin.active".to_string(),
        "--bitcoin.regtest".to_string(),
        "--bitcoin.node=bitcoind".to_string(),
        format!("--bitcoind.rpchost={bitcoind_rpc_addr}"),
        format!("--bitcoind.rpcuser={rpc_user}"),
        format!("--bitcoind.rpcpass={rpc_password}"),
        format!("--bitcoind.zmqpubrawblock={zmq_raw_block}"),
        format!("--bitcoind.zmqpubrawtx={zmq_raw_tx}"),
    ]
}

/// An authenticated gRPC channel to an LND node.
///
/// The crate does not vendor lnrpc stubs; generated service clients attach to
/// [`LndGrpc::authenticated_channel`].
#[derive(Debug, Clone)]
pub struct LndGrpc {
    channel: Channel,
    macaroon: MetadataValue<Ascii>,
}

impl LndGrpc {
    /// Builds the TLS channel (trust anchor = the node's own tls cert) and
    /// performs the initial handshake. No RPC is issued beyond that.
    async fn connect(
        node: &str,
        host: &str,
        port: u16,
        tls_cert_pem: &[u8],
        macaroon: &[u8],
    ) -> Result<Self> {
        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(tls_cert_pem))
            .domain_name("localhost");

        let endpoint = Endpoint::from_shared(format!("https://{host}:{port}"))
            .map_err(|e| Error::client_setup(node, e))?
            .tls_config(tls)
            .map_err(|e| Error::client_setup(node, e))?;

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::client_setup(node, format!("grpc handshake failed: {e}")))?;

        let macaroon = hex::encode(macaroon)
            .parse::<MetadataValue<Ascii>>()
            .map_err(|e| Error::client_setup(node, e))?;

        Ok(Self { channel, macaroon })
    }

    /// Returns the bare channel, without per-RPC credentials.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Returns the channel wrapped with the macaroon interceptor; every RPC
    /// sent through it carries the admin macaroon.
    pub fn authenticated_channel(&self) -> InterceptedService<Channel, MacaroonInterceptor> {
        InterceptedService::new(
            self.channel.clone(),
            MacaroonInterceptor { macaroon: self.macaroon.clone() },
        )
    }
}

/// Injects the admin macaroon into every request's metadata.
#[derive(Debug, Clone)]
pub struct MacaroonInterceptor {
    macaroon: MetadataValue<Ascii>,
}

impl Interceptor for MacaroonInterceptor {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        request.metadata_mut().insert("macaroon", self.macaroon.clone());
        Ok(request)
    }
}
