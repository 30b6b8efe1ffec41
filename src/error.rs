use thiserror::Error;

use crate::components::tools::{DrawMode, StrokeRole};

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, MattingError>;

/// Everything that can go wrong while building masks and extractions.
#[derive(Error, Debug)]
pub enum MattingError {
    #[error("invalid resolution {width}x{height}: both dimensions must be non-zero")]
    InvalidResolution { width: u32, height: u32 },

    #[error("image placement unavailable: {reason}")]
    PlacementUnavailable { reason: String },

    #[error("no garment class at ({x:.1}, {y:.1}); click on a clothing area")]
    NoClassAtPoint { x: f32, y: f32 },

    #[error("already at the start of the drawing history")]
    AtHistoryStart,

    #[error("no earlier image state to restore")]
    NoHistory,

    #[error("segmentation unavailable: {reason}")]
    SegmentationUnavailable { reason: String },

    #[error(
        "resolution mismatch: {from_width}x{from_height} cannot be mapped onto {to_width}x{to_height}"
    )]
    ResolutionMismatch {
        from_width: u32,
        from_height: u32,
        to_width: u32,
        to_height: u32,
    },

    #[error("no source image loaded")]
    NoSourceImage,

    #[error("no {role} strokes to apply")]
    NoStrokes { role: StrokeRole },

    #[error("no extracted image")]
    NoExtraction,

    #[error("segmentation is still running")]
    SegmentationPending,

    #[error("result belongs to an earlier request and was discarded")]
    StaleResult,

    #[error("operation not available in {mode} mode")]
    WrongMode { mode: DrawMode },

    #[error("upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("stroke file error: {0}")]
    StrokeFormat(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),
}

impl From<serde_json::Error> for MattingError {
    fn from(e: serde_json::Error) -> Self {
        MattingError::StrokeFormat(e.to_string())
    }
}

impl MattingError {
    /// Recoverable errors leave the session usable and only need to be
    /// reported to the user; the rest indicate a broken input or environment.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MattingError::PlacementUnavailable { .. }
                | MattingError::NoClassAtPoint { .. }
                | MattingError::AtHistoryStart
                | MattingError::NoHistory
                | MattingError::NoStrokes { .. }
                | MattingError::NoExtraction
                | MattingError::SegmentationPending
                | MattingError::SegmentationUnavailable { .. }
                | MattingError::StaleResult
                | MattingError::WrongMode { .. }
                | MattingError::UploadFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_messages() {
        let e = MattingError::NoClassAtPoint { x: 12.0, y: 7.5 };
        assert_eq!(
            e.to_string(),
            "no garment class at (12.0, 7.5); click on a clothing area"
        );
        let e = MattingError::NoStrokes {
            role: StrokeRole::TransparentErase,
        };
        assert_eq!(e.to_string(), "no transparent-erase strokes to apply");
    }

    #[test]
    fn test_recoverable_split() {
        assert!(MattingError::NoHistory.is_recoverable());
        assert!(MattingError::StaleResult.is_recoverable());
        assert!(!MattingError::InvalidResolution { width: 0, height: 4 }.is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!MattingError::from(io).is_recoverable());
    }
}
