use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::RangeReader;
use crate::error::IoError;

/// Local-file implementation of [`RangeReader`].
///
/// The file is opened once and its size captured up front. Reads seek and fill
/// under a mutex, so a single handle can be shared by every lazy array that
/// points into the same slide.
pub struct LocalFileReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl LocalFileReader {
    /// Open `path` for range reads.
    ///
    /// A missing file yields [`IoError::NotFound`]; any other failure (permissions,
    /// a directory instead of a file) yields [`IoError::Open`].
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let identifier = path.display().to_string();

        let file = File::open(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => IoError::NotFound(identifier.clone()),
            _ => IoError::Open {
                path: identifier.clone(),
                message: e.to_string(),
            },
        })?;

        let metadata = file.metadata().await.map_err(|e| IoError::Open {
            path: identifier.clone(),
            message: e.to_string(),
        })?;
        if !metadata.is_file() {
            return Err(IoError::Open {
                path: identifier,
                message: "not a regular file".to_string(),
            });
        }

        Ok(Self {
            file: Mutex::new(file),
            size: metadata.len(),
            identifier,
        })
    }
}

#[async_trait]
impl RangeReader for LocalFileReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.size => {}
            _ => {
                return Err(IoError::RangeOutOfBounds {
                    offset,
                    requested: len as u64,
                    size: self.size,
                })
            }
        }

        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::Read(format!("{}: seek to {}: {}", self.identifier, offset, e)))?;
        file.read_exact(&mut buf).await.map_err(|e| {
            IoError::Read(format!(
                "{}: read {} bytes at {}: {}",
                self.identifier, len, offset, e
            ))
        })?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
