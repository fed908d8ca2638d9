//! Re-readable upload sources
//!
//! The uploader keeps the source open for the whole job so a chunk that fails
//! verification can be sliced again from the original bytes.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::ClientError;

#[async_trait]
pub trait UploadSource: Send + Sync {
    /// Total size in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `offset`
    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes, ClientError>;

    /// Read the whole source into memory
    async fn read_all(&self) -> Result<Bytes, ClientError> {
        self.read_range(0, self.len() as usize).await
    }
}

/// Source backed by an in-memory buffer
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl UploadSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes, ClientError> {
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                ClientError::Source(format!(
                    "range {}+{} beyond source of {} bytes",
                    offset,
                    len,
                    self.data.len()
                ))
            })?;
        Ok(self.data.slice(start..end))
    }
}

/// Source backed by a file on disk, reopened for every read
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ClientError::Source(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes, ClientError> {
        let io_err = |e: std::io::Error| ClientError::Source(format!("{}: {}", self.path.display(), e));

        let mut file = tokio::fs::File::open(&self.path).await.map_err(io_err)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await.map_err(io_err)?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_source_ranges() {
        let source = MemorySource::new(&b"0123456789"[..]);
        assert_eq!(source.len(), 10);
        assert_eq!(&source.read_range(3, 4).await.unwrap()[..], b"3456");
        assert!(source.read_range(8, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_file_source_ranges() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.mp4");
        tokio::fs::write(&path, b"abcdefghij").await.unwrap();

        let source = FileSource::open(&path).await.unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(&source.read_range(6, 4).await.unwrap()[..], b"ghij");
        assert_eq!(&source.read_all().await.unwrap()[..], b"abcdefghij");
    }
}
