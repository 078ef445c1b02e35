//! Container launching and the resulting node handles.

use std::{
    collections::BTreeMap,
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use testcontainers::{
    core::{ExecCommand, IntoContainerPort, Mount},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tracing::{info, warn};

use crate::{
    descriptor::NodeDescriptor,
    error::{Error, Result},
    probe,
    utils::create_dir_with_mode,
};

/// What to do with a container whose provisioning fails partway through.
///
/// Rust drop semantics would otherwise remove the container together with its
/// handle, so the choice has to be explicit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Leave the container running for inspection; the handle is released
    /// without stopping it. Cleanup becomes a manual `docker rm` job.
    #[default]
    LeaveRunning,
    /// Remove the container along with the failed handle.
    Remove,
}

/// Starts exactly one container from `descriptor` and blocks until every
/// declared port accepts connections or `ready_timeout` lapses.
///
/// The working directory is created (with the descriptor's mode) before the
/// container starts so bind mounts land on the host filesystem. On success
/// the handle carries the fabric-internal address and one resolved external
/// mapping per exposed port. On readiness timeout the error is surfaced and
/// the container is handled per `on_failure`; the same policy applies when
/// the caller drops this future mid-provisioning.
pub async fn launch(
    descriptor: NodeDescriptor,
    ready_timeout: Duration,
    on_failure: FailurePolicy,
) -> Result<NodeHandle> {
    let name = descriptor.name.clone();
    create_dir_with_mode(&descriptor.workdir, descriptor.workdir_mode)?;

    let mut image = GenericImage::new(descriptor.image.clone(), descriptor.tag.clone());
    for &port in &descriptor.exposed_ports {
        image = image.with_exposed_port(port.tcp());
    }

    let mut request = image
        .with_container_name(&name)
        .with_network(&descriptor.network)
        .with_cmd(descriptor.cmd.clone());
    for (key, value) in &descriptor.env {
        request = request.with_env_var(key, value);
    }
    for (host_path, container_path) in &descriptor.bind_mounts {
        request = request
            .with_mount(Mount::bind_mount(host_path.to_string_lossy(), container_path.clone()));
    }

    let container = request
        .start()
        .await
        .map_err(|e| Error::infra(&name, format!("failed to start container: {e}")))?;
    let guard = ProvisionGuard::new(container, &name, on_failure);

    let host = guard
        .get()
        .get_host()
        .await
        .map_err(|e| Error::infra(&name, format!("failed to resolve host: {e}")))?
        .to_string();
    let internal_ip = guard
        .get()
        .get_bridge_ip_address()
        .await
        .map_err(|e| Error::infra(&name, format!("failed to resolve internal address: {e}")))?;

    let mut ports = BTreeMap::new();
    for &port in &descriptor.exposed_ports {
        let mapped = guard
            .get()
            .get_host_port_ipv4(port)
            .await
            .map_err(|e| Error::infra(&name, format!("failed to resolve mapping for {port}: {e}")))?;
        ports.insert(port, mapped);
    }

    let handle = NodeHandle {
        container: Some(guard.complete()),
        name: name.clone(),
        host,
        internal_ip,
        ports,
        network: descriptor.network,
        workdir: descriptor.workdir,
    };
    let guard = ProvisionGuard::new(handle, &name, on_failure);

    let probes: Vec<(u16, u16)> = guard.get().ports.iter().map(|(&c, &h)| (c, h)).collect();
    probe::wait_for_listeners(&name, guard.get().host(), &probes, ready_timeout).await?;

    let handle = guard.complete();
    info!(node = %name, host = %handle.host, internal_ip = %handle.internal_ip, "container ready");
    Ok(handle)
}

/// Holds a provisioning resource across await points until provisioning
/// completes, so that both error returns and a caller dropping the future
/// mid-provisioning honor the [`FailurePolicy`] instead of tripping the
/// remove-on-drop semantics of the underlying container handle.
pub(crate) struct ProvisionGuard<T> {
    inner: Option<T>,
    name: String,
    policy: FailurePolicy,
}

impl<T> ProvisionGuard<T> {
    pub(crate) fn new(inner: T, name: impl Into<String>, policy: FailurePolicy) -> Self {
        Self { inner: Some(inner), name: name.into(), policy }
    }

    pub(crate) fn get(&self) -> &T {
        self.inner.as_ref().expect("guard holds its resource until completed")
    }

    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("guard holds its resource until completed")
    }

    /// Marks provisioning as finished and hands the resource back; the guard
    /// no longer applies the policy.
    pub(crate) fn complete(mut self) -> T {
        self.inner.take().expect("guard holds its resource until completed")
    }
}

impl<T> Drop for ProvisionGuard<T> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else { return };
        match self.policy {
            FailurePolicy::LeaveRunning => {
                warn!(
                    node = %self.name,
                    "provisioning did not complete; containers left running for inspection"
                );
                std::mem::forget(inner);
            }
            FailurePolicy::Remove => drop(inner),
        }
    }
}

/// A live launched container: runtime reference, addressing info and the
/// host-side working directory.
///
/// Dropping the handle removes the container (testcontainers semantics);
/// [`NodeHandle::terminate`] does the same explicitly and also removes the
/// working directory, reporting partial failures.
#[derive(Debug)]
pub struct NodeHandle {
    container: Option<ContainerAsync<GenericImage>>,
    name: String,
    host: String,
    internal_ip: IpAddr,
    ports: BTreeMap<u16, u16>,
    network: String,
    workdir: PathBuf,
}

impl NodeHandle {
    /// Returns the container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the host address external mappings are reachable on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the fabric-internal IP other containers reach this node on.
    pub fn internal_ip(&self) -> IpAddr {
        self.internal_ip
    }

    /// Returns the name of the fabric this node is attached to.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Returns the external host port mapped to `container_port`.
    pub fn host_port(&self, container_port: u16) -> Result<u16> {
        self.ports.get(&container_port).copied().ok_or_else(|| {
            Error::infra(&self.name, format!("no external mapping for port {container_port}"))
        })
    }

    /// Returns the full container-port to host-port table.
    pub fn ports(&self) -> &BTreeMap<u16, u16> {
        &self.ports
    }

    /// Returns the bind-mountable host working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Executes a command inside the container and returns its stdout.
    pub async fn exec(&self, cmd: &[&str]) -> Result<Vec<u8>> {
        let container = self
            .container
            .as_ref()
            .ok_or_else(|| Error::infra(&self.name, "container already terminated"))?;
        let command = ExecCommand::new(cmd.iter().map(ToString::to_string));
        let mut result = container
            .exec(command)
            .await
            .map_err(|e| Error::infra(&self.name, format!("exec failed: {e}")))?;
        result
            .stdout_to_vec()
            .await
            .map_err(|e| Error::infra(&self.name, format!("failed to read exec output: {e}")))
    }

    /// Stops and removes the container, then removes the working directory.
    ///
    /// Best-effort and non-retried: every step is attempted and every failure
    /// is reported together. A second call reports the handle as already
    /// terminated instead of panicking.
    pub async fn terminate(&mut self) -> Result<()> {
        let Some(container) = self.container.take() else {
            return Err(Error::teardown(&self.name, "already terminated"));
        };

        let mut failures = Vec::new();
        if let Err(e) = container.stop().await {
            failures.push(format!("stop: {e}"));
        }
        if let Err(e) = container.rm().await {
            failures.push(format!("remove: {e}"));
        }
        if self.workdir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.workdir) {
                failures.push(format!("remove workdir {}: {e}", self.workdir.display()));
            }
        }

        if failures.is_empty() {
            info!(node = %self.name, "node terminated");
            Ok(())
        } else {
            Err(Error::teardown(&self.name, failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn abandoned_leave_running_guard_releases_without_dropping() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard =
            ProvisionGuard::new(DropFlag(dropped.clone()), "node", FailurePolicy::LeaveRunning);
        drop(guard);
        assert!(!dropped.load(Ordering::SeqCst), "resource must survive the guard");
    }

    #[test]
    fn abandoned_remove_guard_drops_the_resource() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = ProvisionGuard::new(DropFlag(dropped.clone()), "node", FailurePolicy::Remove);
        drop(guard);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn completed_guard_hands_the_resource_back_untouched() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = ProvisionGuard::new(DropFlag(dropped.clone()), "node", FailurePolicy::Remove);
        let resource = guard.complete();
        assert!(!dropped.load(Ordering::SeqCst), "completion must not apply the policy");
        drop(resource);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancelled_provisioning_future_honors_leave_running() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());

        let task = tokio::spawn(async move {
            let _guard = ProvisionGuard::new(flag, "node", FailurePolicy::LeaveRunning);
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        let _ = task.await;

        assert!(!dropped.load(Ordering::SeqCst), "cancellation must not remove the resource");
    }
}
