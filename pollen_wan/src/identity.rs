use anyhow::{Context, Result};
use iroh::SecretKey;
use std::path::{Path, PathBuf};
use tokio::fs;

const KEY_FILE_NAME: &str = "node_secret.key";

/// Persists the endpoint's secret key so the endpoint id survives restarts
pub struct IdentityManager {
    config_dir: PathBuf,
}

impl IdentityManager {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Load existing SecretKey or generate and store a new one
    pub async fn load_or_generate(&self) -> Result<SecretKey> {
        let key_path = self.key_path();

        if fs::try_exists(&key_path).await.unwrap_or(false) {
            tracing::info!("Loading existing identity from {:?}", key_path);
            let key_bytes = fs::read(&key_path)
                .await
                .context("Failed to read secret key file")?;
            return parse_key(key_bytes);
        }

        let secret_key = SecretKey::generate(&mut rand::rng());
        fs::create_dir_all(&self.config_dir)
            .await
            .context("Failed to create config directory")?;
        write_private(&key_path, &secret_key.to_bytes()).await?;
        tracing::info!("Generated new identity at {:?}", key_path);

        Ok(secret_key)
    }

    pub fn key_path(&self) -> PathBuf {
        self.config_dir.join(KEY_FILE_NAME)
    }
}

fn parse_key(bytes: Vec<u8>) -> Result<SecretKey> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Invalid secret key length in file"))?;
    Ok(SecretKey::from_bytes(&bytes))
}

async fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes)
        .await
        .context("Failed to save secret key")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)
            .await
            .context("Failed to get metadata")?
            .permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)
            .await
            .context("Failed to set permissions")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identity_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IdentityManager::new(dir.path());

        let first = manager.load_or_generate().await.unwrap();
        let second = manager.load_or_generate().await.unwrap();
        assert_eq!(first.public(), second.public());
        assert!(manager.key_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let manager = IdentityManager::new(dir.path().join("nested"));
        manager.load_or_generate().await.unwrap();

        let mode = std::fs::metadata(manager.key_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IdentityManager::new(dir.path());
        std::fs::write(manager.key_path(), b"short").unwrap();

        let err = manager.load_or_generate().await.unwrap_err();
        assert!(err.to_string().contains("Invalid secret key length"));
    }
}
