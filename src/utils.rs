//! Naming and per-run directory helpers.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const ALPHANUMERIC: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Generates a unique container/directory name with the given prefix.
pub fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, nanoid::nanoid!(8, ALPHANUMERIC))
}

/// Creates a fresh per-run base directory under the system temp dir.
///
/// Node containers run as their own users and write generated state (secrets
/// included) into bind-mounted subdirectories, so the tree is world-writable.
pub fn create_run_dir(prefix: &str) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(unique_name(prefix));
    create_dir_with_mode(&dir, 0o777)?;
    Ok(dir)
}

pub(crate) fn create_dir_with_mode(path: &Path, mode: u32) -> Result<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| Error::infra("workdir", format!("failed to create {}: {e}", path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            Error::infra("workdir", format!("failed to chmod {}: {e}", path.display()))
        })?;
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_do_not_collide() {
        let a = unique_name("node");
        let b = unique_name("node");
        assert!(a.starts_with("node-"));
        assert_ne!(a, b);
    }

    #[test]
    fn run_dir_is_created() {
        let dir = create_run_dir("ln-devnet-test").unwrap();
        assert!(dir.is_dir());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
