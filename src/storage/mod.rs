use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Allowed receipt extensions
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "pdf"];

/// Object store for receipt images and attachments.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under a fresh name derived from `filename` inside `folder`
    /// and return a retrievable URL.
    async fn upload(&self, folder: &str, filename: &str, bytes: &[u8]) -> Result<String>;
    async fn delete(&self, url: &str) -> Result<()>;
}

pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
    max_bytes: usize,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    fn extension_of(filename: &str) -> Result<String> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .ok_or_else(|| AppError::Validation("Invalid filename".to_string()))?;

        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::Validation(format!(
                "Invalid file type. Allowed: {}",
                ALLOWED_EXTENSIONS.join(", ")
            )));
        }

        Ok(extension)
    }

    /// Writes `bytes` to an already created file. A partial file is removed.
    async fn write_or_discard(mut file: fs::File, path: &Path, bytes: &[u8]) -> Result<()> {
        let written = match file.write_all(bytes).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(path).await {
                tracing::warn!("Left partial upload {}: {}", path.display(), cleanup);
            }
            return Err(AppError::UploadFailed(format!("Failed to write file: {}", e)));
        }

        Ok(())
    }

    fn sanitize_folder(folder: &str) -> String {
        folder
            .split('/')
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, folder: &str, filename: &str, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(AppError::Validation("Empty file".to_string()));
        }

        if bytes.len() > self.max_bytes {
            return Err(AppError::Validation(format!(
                "File too large (max {} bytes)",
                self.max_bytes
            )));
        }

        let extension = Self::extension_of(filename)?;
        let folder = Self::sanitize_folder(folder);

        let dir = self.root.join(&folder);
        fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::UploadFailed(format!("Failed to create uploads directory: {}", e))
        })?;

        let new_filename = format!("{}.{}", Uuid::new_v4(), extension);
        let file_path = dir.join(&new_filename);

        let file = fs::File::create(&file_path).await.map_err(|e| {
            AppError::UploadFailed(format!("Failed to create file: {}", e))
        })?;

        Self::write_or_discard(file, &file_path, bytes).await?;

        let relative = if folder.is_empty() {
            new_filename
        } else {
            format!("{}/{}", folder, new_filename)
        };

        tracing::debug!("Stored upload {} ({} bytes)", relative, bytes.len());

        Ok(format!("{}/uploads/{}", self.public_base_url, relative))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let prefix = format!("{}/uploads/", self.public_base_url);
        // Only local uploads can be removed
        let Some(relative) = url.strip_prefix(&prefix) else {
            return Ok(());
        };

        if relative.split('/').any(|part| part == "..") {
            return Err(AppError::Validation("Invalid upload path".to_string()));
        }

        let path = self.root.join(relative);
        if fs::try_exists(&path).await.unwrap_or(false) {
            fs::remove_file(&path).await.map_err(|e| {
                AppError::Internal(format!("Failed to delete file: {}", e))
            })?;
        }

        Ok(())
    }
}
