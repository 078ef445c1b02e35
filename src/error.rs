//! Error types for fixture provisioning.
//!
//! Every provisioning step returns its error immediately with context (which
//! node, which step); no step continues past a failure. Failed containers are
//! never torn down implicitly — cleanup is the caller's job.

use std::time::Duration;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while provisioning or tearing down a node topology.
#[derive(Debug, Error)]
pub enum Error {
    /// Container runtime or network failure. Fatal to the affected node; not
    /// retried here — callers may retry at a higher level.
    #[error("{node}: infrastructure failure: {message}")]
    Infrastructure {
        /// Node (or component) the failure belongs to.
        node: String,
        /// Underlying runtime error.
        message: String,
    },
    /// A readiness probe did not accept connections within its budget. The
    /// container is left in whatever state it reached.
    #[error("{node}: port {port} did not accept connections within {timeout:?}")]
    ReadinessTimeout {
        /// Node being probed.
        node: String,
        /// Container port that never opened.
        port: u16,
        /// The budget that lapsed.
        timeout: Duration,
    },
    /// A generated secret could not be read out of the node.
    #[error("{node}: failed to read credential: {message}")]
    CredentialRead {
        /// Node the credential belongs to.
        node: String,
        /// What went wrong.
        message: String,
    },
    /// A secret was read but could not be decoded.
    #[error("{node}: failed to parse credential: {message}")]
    CredentialParse {
        /// Node the credential belongs to.
        node: String,
        /// Decoder error.
        message: String,
    },
    /// Building the authenticated protocol client failed.
    #[error("{node}: failed to build client: {message}")]
    ClientSetup {
        /// Node the client targets.
        node: String,
        /// Transport or credential error.
        message: String,
    },
    /// An RPC issued through an already-constructed client failed.
    #[error("{node}: rpc failed: {message}")]
    Rpc {
        /// Node the request targeted.
        node: String,
        /// Transport, status or decode error.
        message: String,
    },
    /// Teardown completed only partially. Every attempted-and-failed step is
    /// listed; none masks another.
    #[error("{node}: teardown incomplete: {message}")]
    Teardown {
        /// Node (or component) being torn down.
        node: String,
        /// All collected failures.
        message: String,
    },
}

impl Error {
    pub(crate) fn infra(node: impl Into<String>, message: impl ToString) -> Self {
        Self::Infrastructure { node: node.into(), message: message.to_string() }
    }

    pub(crate) fn credential_read(node: impl Into<String>, message: impl ToString) -> Self {
        Self::CredentialRead { node: node.into(), message: message.to_string() }
    }

    pub(crate) fn credential_parse(node: impl Into<String>, message: impl ToString) -> Self {
        Self::CredentialParse { node: node.into(), message: message.to_string() }
    }

    pub(crate) fn client_setup(node: impl Into<String>, message: impl ToString) -> Self {
        Self::ClientSetup { node: node.into(), message: message.to_string() }
    }

    pub(crate) fn rpc(node: impl Into<String>, message: impl ToString) -> Self {
        Self::Rpc { node: node.into(), message: message.to_string() }
    }

    pub(crate) fn teardown(node: impl Into<String>, message: impl ToString) -> Self {
        Self::Teardown { node: node.into(), message: message.to_string() }
    }
}
