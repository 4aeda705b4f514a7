use anyhow::Result;
use async_trait::async_trait;

/// Filesystem boundary for everything the core persists. Kept behind a trait
/// so tests can run against a temp directory and collaborators stay unaware
/// of the project layout.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    /// Write-to-temp-then-rename. Used for every state document so a crash
    /// mid-write never leaves a half-written file behind.
    async fn write_atomic(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn size(&self, path: &str) -> Result<u64>;
    /// File names (not full paths) under a directory, sorted.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;
    async fn copy(&self, from: &str, to: &str) -> Result<()>;
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

async fn ensure_parent(path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        ensure_parent(path).await?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn write_atomic(&self, path: &str, content: &[u8]) -> Result<()> {
        ensure_parent(path).await?;
        let tmp = format!("{path}.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if tokio::fs::try_exists(path).await? {
            if std::path::Path::new(path).is_dir() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn size(&self, path: &str) -> Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let path = std::path::Path::new(dir);
        let mut entries = Vec::new();

        if path.is_dir() {
            let mut read = tokio::fs::read_dir(path).await?;
            while let Some(entry) = read.next_entry().await? {
                entries.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        // Directory iteration order is not stable across filesystems.
        entries.sort();
        Ok(entries)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        ensure_parent(to).await?;
        tokio::fs::copy(from, to).await?;
        Ok(())
    }
}
