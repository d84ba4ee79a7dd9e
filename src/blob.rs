use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

/// Append-only object storage. Objects are created on first append and
/// never deleted.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn append(&self, path: &str, data: &[u8]) -> Result<()>;
}

/// Blob store backed by a directory tree. Each append is a single
/// `O_APPEND` write, so concurrent appenders never interleave records.
/// If an earlier append was cut short, the torn tail is terminated with a
/// newline first, so the new records start on a line of their own.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Refusing blob path outside archive root: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn append(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Error creating blob dir {:?}", parent))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&target)
            .await
            .with_context(|| format!("Error opening blob {:?}", target))?;

        let mut chunk = Vec::with_capacity(data.len() + 1);
        if ends_mid_line(&mut file).await? {
            warn!("Blob {:?} ends mid-line, terminating torn record", target);
            chunk.push(b'\n');
        }
        chunk.extend_from_slice(data);

        file.write_all(&chunk)
            .await
            .with_context(|| format!("Error appending to blob {:?}", target))?;
        file.sync_data().await?;
        Ok(())
    }
}

async fn ends_mid_line(file: &mut tokio::fs::File) -> Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}
