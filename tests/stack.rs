//! End-to-end topology tests. These provision real containers and therefore
//! need a local Docker daemon; run with `cargo test -- --ignored`.

use bitcoincore_rpc::RpcApi;
use ln_devnet::{BitcoindNode, ClnNode, Fabric, LndNode, StackBuilder};

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn bitcoind_comes_up_reachable_and_tears_down() {
    let fabric = Fabric::create().expect("network created");
    let base_dir = std::env::temp_dir().join(ln_devnet::unique_name("bitcoind-test"));

    let mut bitcoind =
        BitcoindNode::start(&fabric, &base_dir, None).await.expect("bitcoind started");

    // Trivial no-op call proves the authenticated JSON-RPC client works.
    let info = bitcoind.client().get_blockchain_info().expect("rpc reachable");
    assert_eq!(info.chain.to_string(), "regtest");

    // Every declared exposed port has a resolved external mapping.
    let ports = bitcoind.handle().ports();
    assert_eq!(ports.len(), 3);
    for (&container_port, &host_port) in ports {
        assert!(host_port > 0, "port {container_port} has no mapping");
    }

    bitcoind.terminate().await.expect("teardown");
    assert!(!base_dir.exists(), "workdir must be removed");

    // Second terminate reports the already-removed state, it does not panic.
    assert!(bitcoind.terminate().await.is_err());
    fabric.remove().expect("network removed");
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn full_topology_provisions_credentials_and_tears_down() {
    let mut stack = StackBuilder::new()
        .with_lnd_nodes(1)
        .with_cln_nodes(1)
        .teardown_on_failure(true)
        .build()
        .await
        .expect("topology provisioned");

    let height = stack.bitcoind().client().get_block_count().expect("rpc reachable");
    assert_eq!(height, 0);

    // Dependent descriptors were built from the bitcoind node's fabric
    // address; spot-check the derived argument inputs.
    let rpc_addr = stack.bitcoind().internal_rpc_addr();
    assert!(rpc_addr.ends_with(":18443"));
    assert!(!rpc_addr.starts_with(":"), "internal address must be resolved");

    let lnd = &stack.lnd()[0];
    assert!(!lnd.macaroon().is_empty(), "bootstrapped macaroon must be non-empty");
    assert_eq!(lnd.macaroon_hex(), hex::encode(lnd.macaroon()));

    let cln = &stack.cln()[0];
    assert!(!cln.rune().is_empty(), "bootstrapped rune must be non-empty");
    let info = cln.client().call("getinfo", serde_json::json!({})).await.expect("cln getinfo");
    assert_eq!(info["network"], "regtest");

    let lnd_dir = lnd.handle().workdir().to_path_buf();
    let cln_dir = cln.handle().workdir().to_path_buf();
    let base_dir = stack.base_dir().to_path_buf();

    stack.terminate().await.expect("teardown");
    assert!(!lnd_dir.exists());
    assert!(!cln_dir.exists());
    assert!(!base_dir.exists());

    // Idempotence: the second call surfaces the already-removed state.
    assert!(stack.terminate().await.is_err());
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn lightning_nodes_can_be_started_individually() {
    let fabric = Fabric::create().expect("network created");
    let base_dir = std::env::temp_dir().join(ln_devnet::unique_name("nodes-test"));

    let mut bitcoind =
        BitcoindNode::start(&fabric, &base_dir, None).await.expect("bitcoind started");
    let mut lnd = LndNode::start(&bitcoind, None).await.expect("lnd started");
    let mut cln = ClnNode::start(&bitcoind, None).await.expect("cln started");

    assert!(lnd.handle().workdir().starts_with(bitcoind.handle().workdir()));
    assert!(!lnd.macaroon().is_empty());
    assert!(!cln.rune().is_empty());

    cln.terminate().await.expect("cln teardown");
    lnd.terminate().await.expect("lnd teardown");
    bitcoind.terminate().await.expect("bitcoind teardown");
    fabric.remove().expect("network removed");
}
