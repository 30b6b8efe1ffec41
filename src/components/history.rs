use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::canvas::{DerivedImage, ImagePlacement};
use crate::components::tools::StrokePath;
use crate::error::{MattingError, Result};

// ============================================================================
// SURFACE SNAPSHOTS
// ============================================================================

/// Everything needed to restore the drawing surface: committed strokes plus
/// the placement of the background image they were drawn over.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceState {
    pub strokes: Vec<StrokePath>,
    pub background: Option<ImagePlacement>,
}

/// Serialized [`SurfaceState`], immutable once captured.
#[derive(Clone, Debug)]
pub struct ObjectSnapshot {
    description: String,
    bytes: Vec<u8>,
}

impl ObjectSnapshot {
    pub fn capture(description: impl Into<String>, state: &SurfaceState) -> Result<Self> {
        Ok(Self {
            description: description.into(),
            bytes: bincode::serialize(state)?,
        })
    }

    pub fn restore(&self) -> Result<SurfaceState> {
        Ok(bincode::deserialize(&self.bytes)?)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn memory_size(&self) -> usize {
        self.bytes.len() + self.description.len()
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

/// Two independent undo stacks.
///
/// * Object history is a linear list of surface snapshots with a cursor.
///   Committing after an undo drops everything past the cursor.
/// * Image history is a LIFO of previously current derived images, pushed
///   each time an operation replaces the current result.
///
/// Neither stack ever touches the other.
pub struct HistoryManager {
    snapshots: VecDeque<ObjectSnapshot>,
    cursor: Option<usize>,
    max_snapshots: usize,
    images: VecDeque<DerivedImage>,
    /// Optional memory cap in bytes for the image stack. Unbounded unless set.
    max_image_bytes: Option<usize>,
    image_bytes: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50, None)
    }
}

impl HistoryManager {
    pub fn new(max_snapshots: usize, max_image_bytes: Option<usize>) -> Self {
        Self {
            snapshots: VecDeque::new(),
            cursor: None,
            max_snapshots: max_snapshots.max(1),
            images: VecDeque::new(),
            max_image_bytes,
            image_bytes: 0,
        }
    }

    // -- object history --------------------------------------------------

    pub fn commit_object_state(&mut self, snapshot: ObjectSnapshot) {
        if let Some(cursor) = self.cursor {
            self.snapshots.truncate(cursor + 1);
        }
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.max_snapshots {
            self.snapshots.pop_front();
        }
        self.cursor = Some(self.snapshots.len() - 1);
    }

    /// Step back one snapshot and return it.
    pub fn undo_object(&mut self) -> Result<&ObjectSnapshot> {
        match self.cursor {
            Some(cursor) if cursor > 0 => {
                self.cursor = Some(cursor - 1);
                Ok(&self.snapshots[cursor - 1])
            }
            _ => Err(MattingError::AtHistoryStart),
        }
    }

    /// Step forward one snapshot, if any were undone.
    pub fn redo_object(&mut self) -> Option<&ObjectSnapshot> {
        let next = self.cursor? + 1;
        if next < self.snapshots.len() {
            self.cursor = Some(next);
            self.snapshots.get(next)
        } else {
            None
        }
    }

    pub fn current_object(&self) -> Option<&ObjectSnapshot> {
        self.snapshots.get(self.cursor?)
    }

    pub fn can_undo_object(&self) -> bool {
        self.cursor.is_some_and(|c| c > 0)
    }

    pub fn can_redo_object(&self) -> bool {
        self.cursor.is_some_and(|c| c + 1 < self.snapshots.len())
    }

    pub fn object_cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn object_len(&self) -> usize {
        self.snapshots.len()
    }

    /// Snapshot descriptions up to the cursor (most recent first).
    pub fn object_history(&self) -> Vec<String> {
        let end = self.cursor.map_or(0, |c| c + 1);
        self.snapshots
            .iter()
            .take(end)
            .rev()
            .map(|s| s.description().to_string())
            .collect()
    }

    pub fn clear_objects(&mut self) {
        self.snapshots.clear();
        self.cursor = None;
    }

    // -- image history ---------------------------------------------------

    pub fn push_image_state(&mut self, image: DerivedImage) {
        self.image_bytes += image.memory_bytes();
        self.images.push_back(image);
        self.prune_images();
    }

    /// Pop the most recently pushed image.
    pub fn pop_image_state(&mut self) -> Result<DerivedImage> {
        let image = self.images.pop_back().ok_or(MattingError::NoHistory)?;
        self.image_bytes = self.image_bytes.saturating_sub(image.memory_bytes());
        Ok(image)
    }

    pub fn peek_image_state(&self) -> Option<&DerivedImage> {
        self.images.back()
    }

    pub fn image_depth(&self) -> usize {
        self.images.len()
    }

    pub fn clear_images(&mut self) {
        self.images.clear();
        self.image_bytes = 0;
    }

    /// Memory held by both stacks, in bytes.
    pub fn memory_usage(&self) -> usize {
        self.image_bytes + self.snapshots.iter().map(ObjectSnapshot::memory_size).sum::<usize>()
    }

    pub fn clear(&mut self) {
        self.clear_objects();
        self.clear_images();
    }

    /// Drop the oldest images while over the memory cap, always keeping the
    /// newest one.
    fn prune_images(&mut self) {
        let Some(max_bytes) = self.max_image_bytes else { return };
        while self.image_bytes > max_bytes && self.images.len() > 1 {
            if let Some(removed) = self.images.pop_front() {
                self.image_bytes = self.image_bytes.saturating_sub(removed.memory_bytes());
                log::debug!("image history over budget; dropped {}", removed.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Point, Resolution};
    use crate::components::tools::{PathCommand, StrokeRole};
    use image::RgbaImage;

    fn state_with(stamps: &[u64]) -> SurfaceState {
        SurfaceState {
            strokes: stamps
                .iter()
                .map(|&stamp| {
                    let mut s = StrokePath::new(
                        vec![
                            PathCommand::MoveTo(Point::new(stamp as f32, 0.0)),
                            PathCommand::LineTo(Point::new(0.0, stamp as f32)),
                        ],
                        10.0,
                        StrokeRole::BrushAdd,
                    );
                    s.stamp = stamp;
                    s
                })
                .collect(),
            background: Some(ImagePlacement::new(1.0, 2.0, 0.5, 0.5, Resolution::new(8, 8))),
        }
    }

    fn commit(h: &mut HistoryManager, label: &str, stamps: &[u64]) {
        h.commit_object_state(ObjectSnapshot::capture(label, &state_with(stamps)).unwrap());
    }

    fn image(tag: u8) -> DerivedImage {
        DerivedImage::from_source(RgbaImage::from_pixel(4, 4, image::Rgba([tag, 0, 0, 255]))).unwrap()
    }

    #[test]
    fn test_snapshot_round_trip() {
        let state = state_with(&[1, 2, 3]);
        let snap = ObjectSnapshot::capture("three strokes", &state).unwrap();
        assert_eq!(snap.restore().unwrap(), state);
        assert_eq!(snap.description(), "three strokes");
    }

    #[test]
    fn test_commit_after_undo_discards_branch() {
        let mut h = HistoryManager::default();
        commit(&mut h, "A", &[1]);
        commit(&mut h, "B", &[1, 2]);
        assert_eq!(h.undo_object().unwrap().description(), "A");
        commit(&mut h, "C", &[1, 3]);
        assert_eq!(h.object_len(), 2);
        assert_eq!(h.undo_object().unwrap().description(), "A");
        assert!(h.redo_object().is_some_and(|s| s.description() == "C"));
        assert!(h.redo_object().is_none());
    }

    #[test]
    fn test_undo_at_start() {
        let mut h = HistoryManager::default();
        assert!(matches!(h.undo_object(), Err(MattingError::AtHistoryStart)));
        commit(&mut h, "only", &[]);
        assert!(!h.can_undo_object());
        assert!(matches!(h.undo_object(), Err(MattingError::AtHistoryStart)));
        assert_eq!(h.object_cursor(), Some(0));
    }

    #[test]
    fn test_snapshot_count_is_bounded() {
        let mut h = HistoryManager::new(3, None);
        for i in 0..5u64 {
            commit(&mut h, &format!("s{}", i), &[i]);
        }
        assert_eq!(h.object_len(), 3);
        assert_eq!(h.object_history(), vec!["s4", "s3", "s2"]);
    }

    #[test]
    fn test_image_history_is_lifo() {
        let mut h = HistoryManager::default();
        let (a, b, c) = (image(1), image(2), image(3));
        h.push_image_state(a.clone());
        h.push_image_state(b.clone());
        h.push_image_state(c.clone());
        assert_eq!(h.pop_image_state().unwrap().id(), c.id());
        assert_eq!(h.pop_image_state().unwrap().id(), b.id());
        assert_eq!(h.pop_image_state().unwrap().id(), a.id());
        assert!(matches!(h.pop_image_state(), Err(MattingError::NoHistory)));
    }

    #[test]
    fn test_stacks_are_independent() {
        let mut h = HistoryManager::default();
        commit(&mut h, "A", &[1]);
        h.push_image_state(image(1));
        commit(&mut h, "B", &[1, 2]);
        h.undo_object().unwrap();
        assert_eq!(h.image_depth(), 1);
        h.pop_image_state().unwrap();
        assert_eq!(h.object_len(), 2);
        assert_eq!(h.current_object().map(|s| s.description()), Some("A"));
    }

    #[test]
    fn test_default_image_history_is_unbounded() {
        // 64 MiB per push as far as the accounting goes; five pushes is well
        // past any fixed budget of a few hundred MiB
        let big = DerivedImage::from_source(RgbaImage::new(4096, 4096)).unwrap();
        let mut h = HistoryManager::default();
        let mut pushed = Vec::new();
        for tag in 0..5u8 {
            h.push_image_state(big.clone());
            let small = image(tag);
            pushed.push(small.id());
            h.push_image_state(small);
        }
        assert_eq!(h.image_depth(), 10);
        for id in pushed.iter().rev() {
            assert_eq!(h.pop_image_state().unwrap().id(), *id);
            assert_eq!(h.pop_image_state().unwrap().id(), big.id());
        }
        assert!(matches!(h.pop_image_state(), Err(MattingError::NoHistory)));
    }

    #[test]
    fn test_image_memory_cap_keeps_newest() {
        // each 4x4 image is 64 bytes
        let mut h = HistoryManager::new(50, Some(100));
        h.push_image_state(image(1));
        let newest = image(2);
        h.push_image_state(newest.clone());
        assert_eq!(h.image_depth(), 1);
        assert_eq!(h.peek_image_state().map(|i| i.id()), Some(newest.id()));
        assert_eq!(h.memory_usage(), 64);
    }
}
