//! File permission enforcement
//!
//! State, credentials and WireGuard configs hold secrets and are written
//! owner-only. The daemon socket is opened up so unprivileged clients can
//! reach it.

use crate::error::FleetError;
use std::path::Path;
use tracing::debug;

/// File mode classes used by the fleet services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureFileMode {
    /// Secret material: state, tunnel credentials, wg configs (0600)
    Secret,
    /// Base directory (0711)
    BaseDirectory,
    /// Directory holding secrets (0700)
    SecretDirectory,
    /// Local control socket (0666)
    Socket,
}

impl SecureFileMode {
    /// Permission bits for this class
    pub fn mode(&self) -> u32 {
        match self {
            Self::Secret => 0o600,
            Self::BaseDirectory => 0o711,
            Self::SecretDirectory => 0o700,
            Self::Socket => 0o666,
        }
    }
}

/// Set permissions on an existing path
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: SecureFileMode) -> Result<(), FleetError> {
    use std::os::unix::fs::PermissionsExt;

    let perms = std::fs::Permissions::from_mode(mode.mode());
    std::fs::set_permissions(path, perms).map_err(|e| {
        FleetError::Security(format!("Failed to set permissions on {:?}: {}", path, e))
    })?;

    debug!("Set permissions on {:?}: {:o}", path, mode.mode());
    Ok(())
}

/// Set permissions (non-Unix stub)
#[cfg(not(unix))]
pub fn set_permissions(path: &Path, _mode: SecureFileMode) -> Result<(), FleetError> {
    debug!("Permission setting not implemented for this platform: {:?}", path);
    Ok(())
}

/// Write `contents` to `path` readable by the owner only, replacing any previous file
pub async fn write_secret(path: &Path, contents: &[u8]) -> Result<(), FleetError> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(SecureFileMode::Secret.mode());

    let mut file = options.open(path).await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, contents).await?;
    tokio::io::AsyncWriteExt::flush(&mut file).await?;

    // `mode` only applies on creation
    set_permissions(path, SecureFileMode::Secret)
}

/// Create `path` (and parents) if missing, then apply `mode`
pub fn ensure_dir(path: &Path, mode: SecureFileMode) -> Result<(), FleetError> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        set_permissions(path, mode)?;
        debug!("Created directory {:?}", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_modes() {
        assert_eq!(SecureFileMode::Secret.mode(), 0o600);
        assert_eq!(SecureFileMode::Socket.mode(), 0o666);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_secret_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "old contents that are longer").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_secret(&path, b"{}").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_dir_creates_nested() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("conf-raw");
        ensure_dir(&nested, SecureFileMode::SecretDirectory).unwrap();

        let mode = std::fs::metadata(&nested).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }
}
