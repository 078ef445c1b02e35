//! Credential extraction from running nodes.
//!
//! Port readiness does not guarantee a node has written its secrets yet; the
//! listener and the secret-file write are unordered events on the node side.
//! Both extraction paths therefore run strictly after readiness and the
//! file path polls with a bounded budget. Extraction is idempotent and has
//! no side effects beyond the read.

use std::{path::Path, time::Duration};

use serde::de::DeserializeOwned;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::{
    error::{Error, Result},
    launch::NodeHandle,
};

const INITIAL_POLL: Duration = Duration::from_millis(100);
const MAX_POLL: Duration = Duration::from_millis(800);

/// Polls with backoff until `path` exists and is non-empty, then returns its
/// contents.
///
/// Used for secrets a node writes into its bind-mounted working directory
/// (the LND admin macaroon and tls cert). Fails with
/// [`Error::CredentialRead`] when `budget` lapses first.
pub async fn wait_for_file(node: &str, path: &Path, budget: Duration) -> Result<Vec<u8>> {
    let read = async {
        let mut backoff = INITIAL_POLL;
        loop {
            if let Ok(bytes) = tokio::fs::read(path).await {
                if !bytes.is_empty() {
                    return bytes;
                }
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_POLL);
        }
    };

    let bytes = timeout(budget, read).await.map_err(|_| {
        Error::credential_read(node, format!("{} not written within {budget:?}", path.display()))
    })?;
    debug!(node, path = %path.display(), bytes = bytes.len(), "credential file read");
    Ok(bytes)
}

/// Runs `cmd` inside the container and decodes the first JSON object found in
/// its output.
///
/// Used for tokens a node only hands out through an in-container command (the
/// CLN `createrune`). The command is free to print non-JSON text around the
/// object.
pub async fn exec_json<T: DeserializeOwned>(handle: &NodeHandle, cmd: &[&str]) -> Result<T> {
    let stdout = handle
        .exec(cmd)
        .await
        .map_err(|e| Error::credential_read(handle.name(), format!("exec failed: {e}")))?;
    let text = String::from_utf8_lossy(&stdout);
    parse_embedded_json(handle.name(), &text)
}

/// Decodes one JSON object embedded in arbitrary surrounding text.
///
/// Contract: locate the first `{`, decode a single value from there, ignore
/// anything after it. Fails with [`Error::CredentialParse`] when no object is
/// present or required fields are missing.
pub fn parse_embedded_json<T: DeserializeOwned>(node: &str, text: &str) -> Result<T> {
    let start = text
        .find('{')
        .ok_or_else(|| Error::credential_parse(node, "no JSON object in output"))?;
    let mut deserializer = serde_json::Deserializer::from_str(&text[start..]);
    T::deserialize(&mut deserializer).map_err(|e| Error::credential_parse(node, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TokenResponse {
        rune: String,
    }

    #[test]
    fn parses_object_surrounded_by_noise() {
        let output = "WARNING: deprecated flag\n{\"rune\": \"abc123\", \"unique_id\": 0}\ntrailing noise";
        let parsed: TokenResponse = parse_embedded_json("node", output).unwrap();
        assert_eq!(parsed.rune, "abc123");
    }

    #[test]
    fn missing_object_is_a_parse_error() {
        let err = parse_embedded_json::<TokenResponse>("node", "no json here").unwrap_err();
        assert!(matches!(err, Error::CredentialParse { .. }));
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        let err = parse_embedded_json::<TokenResponse>("node", "{\"other\": 1}").unwrap_err();
        assert!(matches!(err, Error::CredentialParse { .. }));
    }

    #[tokio::test]
    async fn file_written_after_readiness_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin.macaroon");

        let write_path = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            tokio::fs::write(&write_path, b"secret").await.unwrap();
        });

        let bytes = wait_for_file("node", &path, Duration::from_secs(5)).await.unwrap();
        assert_eq!(bytes, b"secret");
    }

    #[tokio::test]
    async fn empty_file_does_not_count_as_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tls.cert");
        tokio::fs::write(&path, b"").await.unwrap();

        let write_path = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            tokio::fs::write(&write_path, b"pem").await.unwrap();
        });

        let bytes = wait_for_file("node", &path, Duration::from_secs(5)).await.unwrap();
        assert_eq!(bytes, b"pem");
    }

    #[tokio::test]
    async fn file_written_after_several_poll_rounds_is_still_found() {
        // Long enough that the poll interval has doubled up to its cap.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin.macaroon");

        let write_path = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(900)).await;
            tokio::fs::write(&write_path, b"secret").await.unwrap();
        });

        let bytes = wait_for_file("node", &path, Duration::from_secs(5)).await.unwrap();
        assert_eq!(bytes, b"secret");
    }

    #[tokio::test]
    async fn absent_file_times_out_with_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written");

        let err = wait_for_file("node", &path, Duration::from_millis(250)).await.unwrap_err();
        assert!(matches!(err, Error::CredentialRead { .. }));
    }
}
