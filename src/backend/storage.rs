use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context};
use tokio::{fs, io::AsyncWriteExt};

use super::GatewayError;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Filesystem object bucket. The bucket directory itself must already exist;
/// object paths are relative to it and may contain sub-directories.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl PhotoStore {
    pub fn new(root: PathBuf, public_base_url: Option<String>) -> Self {
        Self {
            root,
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, object_path: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(object_path);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if object_path.is_empty() || escapes {
            return Err(anyhow!("invalid object path '{object_path}'"));
        }
        Ok(self.root.join(relative))
    }

    pub async fn upload(&self, object_path: &str, bytes: &[u8]) -> Result<(), GatewayError> {
        if !fs::metadata(&self.root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(GatewayError::DestinationMissing(
                self.root.display().to_string(),
            ));
        }

        let target = self.resolve(object_path).map_err(GatewayError::Upload)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))
                .map_err(GatewayError::Upload)?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .with_context(|| format!("failed to create object {}", target.display()))
            .map_err(GatewayError::Upload)?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        };
        written
            .await
            .with_context(|| format!("failed to write object {}", target.display()))
            .map_err(GatewayError::Upload)?;

        log_info!("Stored {} bytes at {}", bytes.len(), target.display());
        Ok(())
    }

    pub fn public_url(&self, object_path: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), object_path),
            None => {
                let absolute = std::path::absolute(self.root.join(object_path))
                    .unwrap_or_else(|_| self.root.join(object_path));
                format!("file://{}", absolute.display())
            }
        }
    }

    pub async fn delete(&self, object_path: &str) -> Result<(), GatewayError> {
        let target = self.resolve(object_path).map_err(GatewayError::Storage)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log_warn!("Object {} already gone", target.display());
                Ok(())
            }
            Err(err) => Err(GatewayError::Storage(
                anyhow::Error::new(err).context(format!("failed to delete {}", target.display())),
            )),
        }
    }

    pub async fn exists(&self, object_path: &str) -> bool {
        match self.resolve(object_path) {
            Ok(target) => fs::metadata(target).await.is_ok(),
            Err(_) => false,
        }
    }
}
