use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use parley_shared::constants::UPLOADS_URL_PREFIX;

use crate::error::{Result, StoreError};
use crate::paths::child_file;
use crate::reports::generate_id;

/// Chat attachments stored as-is under a single directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    base_path: PathBuf,
    max_size: usize,
}

impl UploadStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self> {
        fs::create_dir_all(&base_path).await?;
        info!(path = %base_path.display(), "Upload store initialized");
        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Store an attachment and return its generated file name. The
    /// extension of `original_name` is kept when it is plain alphanumeric.
    pub async fn store(&self, original_name: Option<&str>, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Err(StoreError::EmptyUpload);
        }
        if data.len() > self.max_size {
            return Err(StoreError::UploadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let name = format!("{}{}", generate_id(), extension_of(original_name));
        let path = child_file(&self.base_path, &name)?;
        fs::write(&path, data).await?;

        debug!(name = %name, size = data.len(), "Stored upload");
        Ok(name)
    }

    /// Delete a stored file, e.g. one whose message could not be logged.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let path = child_file(&self.base_path, name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(name = %name, "Removed upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Public URL for a stored file name.
    pub fn url_for(name: &str) -> String {
        format!("{UPLOADS_URL_PREFIX}/{name}")
    }
}

fn extension_of(original_name: Option<&str>) -> String {
    original_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.bytes().all(|b| b.is_ascii_alphanumeric()))
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}
