//! Physical file storage.
//!
//! The persistence core only needs three operations from a blob store:
//! write a stream (learning its hash and size), open a stored blob for
//! reading, and delete it. [`LocalFileStore`] implements them on the local
//! filesystem.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::{Result, SciError};

/// Hash and size of a written blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Lowercase hex SHA-256 of the content.
    pub hash: String,
    pub size: u64,
}

/// Blob store used for uploaded file content.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Write everything `reader` yields to `path`, replacing any earlier blob.
    async fn write(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<StoredFile>;

    /// Open the blob at `path`.
    async fn open_read(&self, path: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// Delete the blob at `path`. Returns `false` if there was none.
    async fn delete(&self, path: &str) -> Result<bool>;
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem store.
///
/// Blobs are sharded by the first 2 characters of their name:
/// ```text
/// {base_path}/
/// ├── 01/
/// │   └── 0190f3c2-8b4e-7d21-9a4f-3c2b1d0e9f87
/// └── ...
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    base_path: PathBuf,
}

impl LocalFileStore {
    /// Create a store rooted at `base_path`, creating the directory.
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Full path of the blob named `name`.
    pub fn file_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let shard: String = name.chars().take(2).collect();
        Ok(self.base_path.join(shard).join(name))
    }
}

/// Blob names are single path components.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains("..")
    {
        return Err(SciError::Validation(format!("invalid storage path: {name}")));
    }
    Ok(())
}

/// Temporary path `target` is written to before it is moved into place.
fn partial_path(target: &Path) -> PathBuf {
    let mut partial = target.as_os_str().to_owned();
    partial.push(".part");
    PathBuf::from(partial)
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn write(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<StoredFile> {
        let target = self.file_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(&target);

        let result = async {
            let mut file = fs::File::create(&partial).await?;
            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut size = 0u64;
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n]).await?;
                size += n as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(StoredFile {
                hash: format!("{:x}", hasher.finalize()),
                size,
            })
        }
        .await;

        match result {
            Ok(stored) => {
                fs::rename(&partial, &target).await?;
                debug!(path, size = stored.size, "stored file");
                Ok(stored)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    warn!(error = %cleanup, "Failed to remove partial file");
                }
                Err(e.into())
            }
        }
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let target = self.file_path(path)?;
        match fs::File::open(&target).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SciError::NotFound(format!("File: {path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let target = self.file_path(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
