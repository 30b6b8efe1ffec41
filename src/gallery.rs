use uuid::Uuid;

use crate::canvas::{DerivedImage, ImageId};

/// One saved extraction.
#[derive(Clone, Debug)]
pub struct Segment {
    pub id: Uuid,
    pub label: String,
    pub image: DerivedImage,
}

/// Session-scoped list of extraction results, oldest first.
#[derive(Clone, Debug, Default)]
pub struct SegmentGallery {
    segments: Vec<Segment>,
}

impl SegmentGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save `image` under `label`. Returns `None` when the same derived image
    /// is already in the gallery.
    pub fn add(&mut self, label: impl Into<String>, image: DerivedImage) -> Option<Uuid> {
        if self.contains_image(image.id()) {
            return None;
        }
        let id = Uuid::new_v4();
        self.segments.push(Segment {
            id,
            label: label.into(),
            image,
        });
        Some(id)
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Segment> {
        let index = self.segments.iter().position(|s| s.id == id)?;
        Some(self.segments.remove(index))
    }

    pub fn get(&self, id: Uuid) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn contains_image(&self, image: ImageId) -> bool {
        self.segments.iter().any(|s| s.image.id() == image)
    }

    pub fn latest(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn image() -> DerivedImage {
        DerivedImage::from_source(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]))).unwrap()
    }

    #[test]
    fn test_add_dedupes_by_image() {
        let mut gallery = SegmentGallery::new();
        let img = image();
        assert!(gallery.add("first", img.clone()).is_some());
        assert!(gallery.add("again", img).is_none());
        assert!(gallery.add("other", image()).is_some());
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.latest().map(|s| s.label.as_str()), Some("other"));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut gallery = SegmentGallery::new();
        let id = gallery.add("a", image()).unwrap();
        gallery.add("b", image());
        assert_eq!(gallery.remove(id).map(|s| s.label), Some("a".to_string()));
        assert!(gallery.get(id).is_none());
        assert!(gallery.remove(id).is_none());
        gallery.clear();
        assert!(gallery.is_empty());
    }
}
