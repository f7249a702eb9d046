//! Blob directory holding staged uploads and stored photos.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image_processor::{Format, ImageError};

const STAGING_PREFIX: &str = "upload-";

/// Errors raised by a [`BlobDirectory`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on blob directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot transform image: {0}")]
    Image(#[from] ImageError),

    #[error("image transform task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Target size of a cover-fit resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

/// Filesystem-like surface the registration workflow writes into.
///
/// Stored photos live flat under a root directory and are addressed by file
/// name. Uploads are staged somewhere else until they are transformed.
#[async_trait]
pub trait BlobDirectory: Send + Sync {
    /// Create the root directory when absent. Idempotent.
    async fn ensure_root(&self) -> Result<(), StorageError>;

    /// Names of every entry in the root directory.
    ///
    /// A missing root has no entries.
    async fn list_entries(&self) -> Result<Vec<String>, StorageError>;

    /// Write an uploaded payload to a temporary file and return its path.
    async fn stage_upload(&self, bytes: &[u8]) -> Result<PathBuf, StorageError>;

    /// Remove a file. Removing a missing file is not an error.
    async fn delete_file(&self, path: &Path) -> Result<(), StorageError>;

    /// Cover-fit `source` to `size` and write it as `file_name` under the
    /// root. Returns the path of the written file.
    async fn write_resized_image(
        &self,
        source: &Path,
        file_name: &str,
        size: Resize,
    ) -> Result<PathBuf, StorageError>;

    /// Read a stored photo.
    async fn read(&self, file_name: &str) -> Result<Vec<u8>, StorageError>;
}

/// [`BlobDirectory`] on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
    staging: PathBuf,
}

impl LocalDirectory {
    /// Create a new [`LocalDirectory`]. Nothing is touched on disk yet.
    pub fn new(root: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging: staging.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobDirectory for LocalDirectory {
    async fn ensure_root(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn list_entries(&self) -> Result<Vec<String>, StorageError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(Vec::new());
            },
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            // Non UTF-8 names can't follow the naming scheme anyway.
            if let Ok(name) = entry.file_name().into_string() {
                entries.push(name);
            }
        }

        Ok(entries)
    }

    async fn stage_upload(&self, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(&self.staging).await?;

        let path = self.staging.join(format!(
            "{STAGING_PREFIX}{}",
            hex::encode(rand::random::<[u8; 16]>())
        ));
        write_or_remove(&path, bytes).await?;

        Ok(path)
    }

    async fn delete_file(&self, path: &Path) -> Result<(), StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_resized_image(
        &self,
        source: &Path,
        file_name: &str,
        size: Resize,
    ) -> Result<PathBuf, StorageError> {
        let format = Format::try_from(extension(file_name))?;
        let buffer = tokio::fs::read(source).await?;

        let resized = tokio::task::spawn_blocking(move || {
            image_processor::cover(&buffer, size.width, size.height, format)
        })
        .await??;

        let destination = self.root.join(file_name);
        write_or_remove(&destination, &resized).await?;

        Ok(destination)
    }

    async fn read(&self, file_name: &str) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(self.root.join(file_name)).await?)
    }
}

/// Write a whole file. A file left half written is removed.
async fn write_or_remove(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let Err(err) = tokio::fs::write(path, bytes).await else {
        return Ok(());
    };

    match tokio::fs::remove_file(path).await {
        Ok(()) => {},
        Err(remove) if remove.kind() == ErrorKind::NotFound => {},
        Err(remove) => tracing::warn!(
            path = %path.display(),
            error = %remove,
            "cannot remove partial file"
        ),
    }

    Err(err)
}

fn extension(file_name: &str) -> &str {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
}
