//! TCP readiness probes for mapped container ports.
//!
//! A node is ready only when every declared port accepts a connection; there
//! is no partial readiness. A successful probe proves the network listener is
//! up and nothing more — node-internal state (generated secrets in
//! particular) is the [`bootstrap`](crate::bootstrap) module's concern.

use std::time::Duration;

use futures_util::future::try_join_all;
use tokio::{
    net::TcpStream,
    time::{sleep, timeout},
};
use tracing::debug;

use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_millis(800);

/// Waits until every `(container_port, host_port)` pair accepts a TCP
/// connection on `host`.
///
/// Probes run concurrently and are independent; all must succeed within the
/// shared `budget`. On timeout the error names the container port that never
/// opened. Dropping the returned future aborts the wait and leaves the
/// container untouched.
pub async fn wait_for_listeners(
    node: &str,
    host: &str,
    ports: &[(u16, u16)],
    budget: Duration,
) -> Result<()> {
    let probes = ports
        .iter()
        .map(|&(container_port, host_port)| probe_port(node, host, container_port, host_port, budget));
    try_join_all(probes).await?;
    Ok(())
}

async fn probe_port(
    node: &str,
    host: &str,
    container_port: u16,
    host_port: u16,
    budget: Duration,
) -> Result<()> {
    let addr = format!("{host}:{host_port}");
    let mut backoff = INITIAL_BACKOFF;

    let wait = async {
        loop {
            if let Ok(Ok(_)) = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
                debug!(node, port = container_port, %addr, "listener up");
                return;
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    };

    timeout(budget, wait).await.map_err(|_| Error::ReadinessTimeout {
        node: node.to_string(),
        port: container_port,
        timeout: budget,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn open_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn closed_port() -> u16 {
        // Bind and immediately drop so the port is very likely free.
        let (listener, port) = open_port().await;
        drop(listener);
        port
    }

    #[tokio::test]
    async fn succeeds_when_all_listeners_up() {
        let (_a, port_a) = open_port().await;
        let (_b, port_b) = open_port().await;

        let ports = [(1111, port_a), (2222, port_b)];
        wait_for_listeners("node", "127.0.0.1", &ports, Duration::from_secs(5))
            .await
            .expect("both listeners are up");
    }

    #[tokio::test]
    async fn one_closed_port_times_out_and_never_reports_partial_success() {
        let (_open, open) = open_port().await;
        let closed = closed_port().await;

        let ports = [(1111, open), (2222, closed)];
        let err = wait_for_listeners("node", "127.0.0.1", &ports, Duration::from_millis(600))
            .await
            .expect_err("the closed probe must fail the aggregate");

        match err {
            Error::ReadinessTimeout { port, .. } => assert_eq!(port, 2222),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn listener_opening_late_is_picked_up() {
        let closed = closed_port().await;

        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            TcpListener::bind(("127.0.0.1", closed)).await
        });

        wait_for_listeners("node", "127.0.0.1", &[(1111, closed)], Duration::from_secs(5))
            .await
            .expect("probe retries until the listener appears");
        handle.await.unwrap().unwrap();
    }
}
