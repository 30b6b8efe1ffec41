// ============================================================================
// UPLOAD SERVICE SEAM
// ============================================================================

use std::path::{Path, PathBuf};

use crate::ops::segmentation::ServiceError;

/// Stores an exported PNG somewhere and returns a URL for it.
#[allow(async_fn_in_trait)]
pub trait UploadService {
    async fn upload(&self, png: &[u8], file_name: &str) -> Result<String, ServiceError>;
}

/// Uploads into a local directory and hands back `file://` URLs.
pub struct DirectoryUpload {
    dir: PathBuf,
}

impl DirectoryUpload {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl UploadService for DirectoryUpload {
    async fn upload(&self, png: &[u8], file_name: &str) -> Result<String, ServiceError> {
        let fail = |e: std::io::Error| ServiceError(format!("{}: {}", self.dir.display(), e));
        std::fs::create_dir_all(&self.dir).map_err(fail)?;
        let path = self.dir.join(file_name);
        std::fs::write(&path, png).map_err(fail)?;
        let absolute = path.canonicalize().unwrap_or(path);
        Ok(format!("file://{}", absolute.display()))
    }
}
