// ============================================================================
// SEGMENTATION SERVICE SEAM
// ============================================================================
//
// The engine never calls a model itself. A service receives the source image
// encoded as PNG and answers with a colour-coded classification image (or
// nothing). Requests are tracked with tickets so a late answer for an older
// image or an older request can be told apart and dropped.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error reported by an external service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ServiceError(pub String);

/// Remote garment segmentation.
#[allow(async_fn_in_trait)]
pub trait SegmentationService {
    /// Segment a PNG-encoded image. `Ok(None)` means the service answered
    /// without a result.
    async fn segment(&self, source_png: &[u8]) -> Result<Option<Vec<u8>>, ServiceError>;
}

/// Lifecycle of the segmentation request for the current source image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SegmentationStatus {
    #[default]
    Idle,
    Pending {
        request: u64,
    },
    Ready,
    Failed {
        reason: String,
    },
}

impl SegmentationStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, SegmentationStatus::Pending { .. })
    }
}

/// Identifies one in-flight request. `generation` changes whenever the
/// source image is replaced or the session is reset.
#[derive(Clone, Debug)]
pub struct SegmentationTicket {
    pub generation: u64,
    pub request: u64,
    pub source_png: Vec<u8>,
}

/// Serves a pre-computed classification image from disk.
pub struct FileSegmentation {
    path: PathBuf,
}

impl FileSegmentation {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SegmentationService for FileSegmentation {
    async fn segment(&self, _source_png: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
        std::fs::read(&self.path)
            .map(Some)
            .map_err(|e| ServiceError(format!("{}: {}", self.path.display(), e)))
    }
}

/// Serves a classification image held in memory.
pub struct StaticSegmentation {
    response: Option<Vec<u8>>,
}

impl StaticSegmentation {
    pub fn new(response: Option<Vec<u8>>) -> Self {
        Self { response }
    }
}

impl SegmentationService for StaticSegmentation {
    async fn segment(&self, _source_png: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_segmentation_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.png");
        std::fs::write(&path, b"not really a png").unwrap();
        let service = FileSegmentation::new(&path);
        let bytes = pollster::block_on(service.segment(&[])).unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"not really a png"[..]));
    }

    #[test]
    fn test_file_segmentation_missing_file() {
        let service = FileSegmentation::new("/nonexistent/classes.png");
        let err = pollster::block_on(service.segment(&[])).unwrap_err();
        assert!(err.0.contains("classes.png"));
    }

    #[test]
    fn test_static_segmentation_empty_answer() {
        let service = StaticSegmentation::new(None);
        assert_eq!(pollster::block_on(service.segment(&[1, 2, 3])), Ok(None));
    }
}
