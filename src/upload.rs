//! Out-of-band storage for attachments too large to send through the protocol.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use log::debug;
use rand::RngCore;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub url: String,
    pub stored_name: String,
}

#[async_trait]
pub trait MediaVault: Send + Sync {
    async fn store(&self, path: &Path, file_name: &str) -> anyhow::Result<StoredMedia>;
}

/// Copies files into a directory served under `public_base_url`.
pub struct LocalMediaVault {
    dir: PathBuf,
    public_base_url: String,
}

impl LocalMediaVault {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: &str) -> anyhow::Result<Self> {
        let public_base_url = public_base_url.trim_end_matches('/');
        if public_base_url.is_empty() {
            return Err(anyhow!("public base URL for media must not be empty"));
        }
        Ok(Self {
            dir: dir.into(),
            public_base_url: public_base_url.to_string(),
        })
    }

    fn stored_name(file_name: &str) -> String {
        let mut tag = [0u8; 6];
        rand::rng().fill_bytes(&mut tag);
        let clean: String = file_name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!(
            "{}-{}-{clean}",
            chrono::Utc::now().timestamp_millis(),
            hex::encode(tag)
        )
    }
}

#[async_trait]
impl MediaVault for LocalMediaVault {
    async fn store(&self, path: &Path, file_name: &str) -> anyhow::Result<StoredMedia> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating media directory {}", self.dir.display()))?;

        let stored_name = Self::stored_name(file_name);
        let target = self.dir.join(&stored_name);
        tokio::fs::copy(path, &target)
            .await
            .with_context(|| format!("copying {} to {}", path.display(), target.display()))?;
        debug!(target: "Upload", "Stored {} as {}", path.display(), target.display());

        Ok(StoredMedia {
            url: format!(
                "{}/{}",
                self.public_base_url,
                urlencoding::encode(&stored_name)
            ),
            stored_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn stores_a_copy_and_builds_its_url() {
        let src = TempDir::new().unwrap();
        let public = TempDir::new().unwrap();
        let file = src.path().join("my video.mp4");
        tokio::fs::write(&file, b"bytes").await.unwrap();

        let vault = LocalMediaVault::new(public.path(), "https://cdn.example.com/public/").unwrap();
        let stored = vault.store(&file, "my video.mp4").await.unwrap();

        assert!(stored.url.starts_with("https://cdn.example.com/public/"));
        assert!(stored.url.ends_with("my%20video.mp4"));
        let copied = tokio::fs::read(public.path().join(&stored.stored_name))
            .await
            .unwrap();
        assert_eq!(copied, b"bytes");
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(LocalMediaVault::new("/tmp", "").is_err());
        assert!(LocalMediaVault::new("/tmp", "/").is_err());
    }
}
