//! Declarative node descriptors consumed by the launcher.

use std::path::PathBuf;

/// Everything needed to launch one container: image, arguments, exposed
/// ports, environment, bind mounts and network membership.
///
/// Immutable once built; consumed exactly once by
/// [`launch`](crate::launch::launch).
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub(crate) image: String,
    pub(crate) tag: String,
    pub(crate) name: String,
    pub(crate) network: String,
    pub(crate) cmd: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) exposed_ports: Vec<u16>,
    pub(crate) bind_mounts: Vec<(PathBuf, String)>,
    pub(crate) workdir: PathBuf,
    pub(crate) workdir_mode: u32,
}

impl NodeDescriptor {
    /// Creates a descriptor for `image:tag`, attached to `network`, with a
    /// host working directory created before launch (default mode `0o777` so
    /// the container user can write generated state into bind mounts).
    pub fn new(
        image: impl Into<String>,
        tag: impl Into<String>,
        name: impl Into<String>,
        network: impl Into<String>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
            name: name.into(),
            network: network.into(),
            cmd: Vec::new(),
            env: Vec::new(),
            exposed_ports: Vec::new(),
            bind_mounts: Vec::new(),
            workdir: workdir.into(),
            workdir_mode: 0o777,
        }
    }

    /// Sets the container command line.
    pub fn with_cmd(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Declares a TCP port the node listens on. Every declared port gets an
    /// external host mapping resolved at launch.
    pub fn with_exposed_port(mut self, port: u16) -> Self {
        self.exposed_ports.push(port);
        self
    }

    /// Bind-mounts a host path into the container.
    pub fn with_bind_mount(
        mut self,
        host_path: impl Into<PathBuf>,
        container_path: impl Into<String>,
    ) -> Self {
        self.bind_mounts.push((host_path.into(), container_path.into()));
        self
    }

    /// Overrides the working directory's unix mode.
    pub const fn with_workdir_mode(mut self, mode: u32) -> Self {
        self.workdir_mode = mode;
        self
    }

    /// Returns the container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared exposed ports.
    pub fn exposed_ports(&self) -> &[u16] {
        &self.exposed_ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_fields() {
        let descriptor = NodeDescriptor::new("img", "1.0", "node-a", "net", "/tmp/wd")
            .with_exposed_port(8080)
            .with_exposed_port(9735)
            .with_env("KEY", "value")
            .with_cmd(["daemon", "--flag"])
            .with_bind_mount("/tmp/wd", "/data");

        assert_eq!(descriptor.exposed_ports(), &[8080, 9735]);
        assert_eq!(descriptor.cmd, vec!["daemon", "--flag"]);
        assert_eq!(descriptor.env, vec![("KEY".to_string(), "value".to_string())]);
        assert_eq!(descriptor.name(), "node-a");
        assert_eq!(descriptor.workdir_mode, 0o777);
    }
}
