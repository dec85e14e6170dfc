use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::protocol::TransferMeta;

/// A file that can be streamed to a peer
#[async_trait]
pub trait FileSource: Send {
    fn meta(&self) -> &TransferMeta;

    /// Read up to `len` bytes starting at `offset`. An empty result means the
    /// source has nothing more at that offset.
    async fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Bytes>;
}

/// File held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryFile {
    meta: TransferMeta,
    data: Bytes,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            meta: TransferMeta::new(name, data.len() as u64, mime),
            data,
        }
    }
}

#[async_trait]
impl FileSource for MemoryFile {
    fn meta(&self) -> &TransferMeta {
        &self.meta
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data.slice(start..end))
    }
}

/// File read from disk slice by slice
pub struct DiskFile {
    meta: TransferMeta,
    file: File,
}

impl DiskFile {
    /// Open `path`; the announced name is its final component and the MIME
    /// type is guessed from the extension
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid file name")
            })?
            .to_string();
        let mime = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();

        Ok(Self {
            meta: TransferMeta::new(name, size, mime),
            file,
        })
    }
}

#[async_trait]
impl FileSource for DiskFile {
    fn meta(&self) -> &TransferMeta {
        &self.meta
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        self.file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.file.read(&mut buffer[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_memory_file_slices() {
        let mut file = MemoryFile::new("hello.txt", "text/plain", &b"hello"[..]);
        assert_eq!(file.meta().size, 5);
        assert_eq!(&file.read_at(0, 3).await.unwrap()[..], b"hel");
        assert_eq!(&file.read_at(3, 3).await.unwrap()[..], b"lo");
        assert!(file.read_at(5, 3).await.unwrap().is_empty());
        assert!(file.read_at(100, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disk_file_meta_and_reads() {
        let mut temp = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        temp.write_all(b"0123456789").unwrap();
        temp.flush().unwrap();

        let mut file = DiskFile::open(temp.path()).await.unwrap();
        assert_eq!(file.meta().size, 10);
        assert_eq!(file.meta().mime, "text/plain");
        assert!(file.meta().name.ends_with(".txt"));

        assert_eq!(&file.read_at(4, 4).await.unwrap()[..], b"4567");
        assert_eq!(&file.read_at(8, 4).await.unwrap()[..], b"89");
    }

    #[tokio::test]
    async fn test_disk_file_unknown_extension_has_empty_mime() {
        let temp = tempfile::Builder::new()
            .suffix(".pollenunknown")
            .tempfile()
            .unwrap();
        let file = DiskFile::open(temp.path()).await.unwrap();
        assert_eq!(file.meta().mime, "");
        assert_eq!(file.meta().size, 0);
    }

    #[tokio::test]
    async fn test_disk_file_missing() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();
        drop(temp);
        assert!(DiskFile::open(&path).await.is_err());
    }
}
