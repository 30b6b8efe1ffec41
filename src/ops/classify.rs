// ============================================================================
// CLASSIFICATION SELECTOR: garment class maps -> masks
// ============================================================================
//
// A segmentation service returns a colour-coded image: blue for upper-body
// garments, green for lower-body garments, red for full-body dresses and
// black for background. Two lookups run on it:
//
//   * identification (`classify_point`): a tolerant 5x5 average around a
//     click decides which class the user meant;
//   * membership (`select_by_class`): a strict per-pixel colour test decides
//     which pixels belong to that class.

use std::fmt;
use std::sync::Arc;

use image::{GrayImage, Luma, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{ImagePlacement, MARKED, Mask, Point, Resolution, UNMARKED};
use crate::error::{MattingError, Result};

const SAMPLE_RADIUS: i64 = 2;
const SAMPLE_DOMINANT_MIN: f32 = 150.0;
const SAMPLE_OTHER_MAX: f32 = 100.0;
const PIXEL_DOMINANT_MIN: u8 = 200;
const PIXEL_OTHER_MAX: u8 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GarmentClass {
    Background,
    UpperBody,
    LowerBody,
    FullBodyDress,
}

impl GarmentClass {
    pub fn all() -> &'static [GarmentClass] {
        &[
            GarmentClass::Background,
            GarmentClass::UpperBody,
            GarmentClass::LowerBody,
            GarmentClass::FullBodyDress,
        ]
    }

    pub fn index(&self) -> u8 {
        match self {
            GarmentClass::Background => 0,
            GarmentClass::UpperBody => 1,
            GarmentClass::LowerBody => 2,
            GarmentClass::FullBodyDress => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.index() == index)
    }

    pub fn name(&self) -> &'static str {
        match self {
            GarmentClass::Background => "background",
            GarmentClass::UpperBody => "upper-body",
            GarmentClass::LowerBody => "lower-body",
            GarmentClass::FullBodyDress => "dress",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        if let Ok(index) = s.parse::<u8>() {
            return Self::from_index(index);
        }
        match s.as_str() {
            "background" => Some(GarmentClass::Background),
            "upper-body" | "upper" | "top" => Some(GarmentClass::UpperBody),
            "lower-body" | "lower" | "pants" => Some(GarmentClass::LowerBody),
            "dress" | "full-body" | "full-body-dress" => Some(GarmentClass::FullBodyDress),
            _ => None,
        }
    }

    /// Colour the segmentation service paints this class with.
    pub fn reference_color(&self) -> [u8; 3] {
        match self {
            GarmentClass::Background => [0, 0, 0],
            GarmentClass::UpperBody => [0, 0, 255],
            GarmentClass::LowerBody => [0, 255, 0],
            GarmentClass::FullBodyDress => [255, 0, 0],
        }
    }

    fn dominant_channel(&self) -> Option<usize> {
        match self {
            GarmentClass::Background => None,
            GarmentClass::UpperBody => Some(2),
            GarmentClass::LowerBody => Some(1),
            GarmentClass::FullBodyDress => Some(0),
        }
    }

    /// Strict membership test for a single map pixel.
    fn matches(&self, rgb: [u8; 3]) -> bool {
        match self.dominant_channel() {
            Some(dominant) => (0..3).all(|c| {
                if c == dominant {
                    rgb[c] > PIXEL_DOMINANT_MIN
                } else {
                    rgb[c] < PIXEL_OTHER_MAX
                }
            }),
            None => rgb.iter().all(|&v| v < PIXEL_OTHER_MAX),
        }
    }

    /// Tolerant test for an averaged neighbourhood. Background is never
    /// identified this way.
    fn identify(avg: [f32; 3]) -> Option<Self> {
        [
            GarmentClass::FullBodyDress,
            GarmentClass::LowerBody,
            GarmentClass::UpperBody,
        ]
        .into_iter()
        .find(|class| {
            let Some(dominant) = class.dominant_channel() else { return false };
            (0..3).all(|c| {
                if c == dominant {
                    avg[c] > SAMPLE_DOMINANT_MIN
                } else {
                    avg[c] < SAMPLE_OTHER_MAX
                }
            })
        })
    }
}

impl fmt::Display for GarmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel counts per class under the strict membership test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassHistogram {
    pub background: usize,
    pub upper_body: usize,
    pub lower_body: usize,
    pub full_body_dress: usize,
    pub unclassified: usize,
}

impl ClassHistogram {
    pub fn count(&self, class: GarmentClass) -> usize {
        match class {
            GarmentClass::Background => self.background,
            GarmentClass::UpperBody => self.upper_body,
            GarmentClass::LowerBody => self.lower_body,
            GarmentClass::FullBodyDress => self.full_body_dress,
        }
    }

    pub fn total(&self) -> usize {
        self.background + self.upper_body + self.lower_body + self.full_body_dress + self.unclassified
    }

    fn record(&mut self, class: Option<GarmentClass>) {
        match class {
            Some(GarmentClass::Background) => self.background += 1,
            Some(GarmentClass::UpperBody) => self.upper_body += 1,
            Some(GarmentClass::LowerBody) => self.lower_body += 1,
            Some(GarmentClass::FullBodyDress) => self.full_body_dress += 1,
            None => self.unclassified += 1,
        }
    }

    fn merge(mut self, other: ClassHistogram) -> Self {
        self.background += other.background;
        self.upper_body += other.upper_body;
        self.lower_body += other.lower_body;
        self.full_body_dress += other.full_body_dress;
        self.unclassified += other.unclassified;
        self
    }
}

/// Colour-coded segmentation result, held read-only.
#[derive(Clone, Debug)]
pub struct ClassificationMap {
    pixels: Arc<RgbaImage>,
}

impl ClassificationMap {
    pub fn new(pixels: RgbaImage) -> Result<Self> {
        Resolution::of(&pixels).validate()?;
        Ok(Self {
            pixels: Arc::new(pixels),
        })
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::of(&self.pixels)
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let p = self.pixels.get_pixel(x, y).0;
        [p[0], p[1], p[2]]
    }

    pub fn pixel_class(&self, x: u32, y: u32) -> Option<GarmentClass> {
        let rgb = self.rgb(x, y);
        GarmentClass::all().iter().copied().find(|c| c.matches(rgb))
    }

    pub fn histogram(&self) -> ClassHistogram {
        let w = self.pixels.width();
        (0..self.pixels.height())
            .into_par_iter()
            .map(|y| {
                let mut row = ClassHistogram::default();
                for x in 0..w {
                    row.record(self.pixel_class(x, y));
                }
                row
            })
            .reduce(ClassHistogram::default, ClassHistogram::merge)
    }

    /// Average colour of the 5x5 neighbourhood around (`x`, `y`), with
    /// coordinates clamped to the map edges.
    pub fn sample(&self, x: u32, y: u32) -> [f32; 3] {
        let max_x = self.pixels.width() as i64 - 1;
        let max_y = self.pixels.height() as i64 - 1;
        let mut sum = [0u32; 3];
        let mut count = 0u32;
        for dy in -SAMPLE_RADIUS..=SAMPLE_RADIUS {
            for dx in -SAMPLE_RADIUS..=SAMPLE_RADIUS {
                let px = (x as i64 + dx).clamp(0, max_x) as u32;
                let py = (y as i64 + dy).clamp(0, max_y) as u32;
                let rgb = self.rgb(px, py);
                for c in 0..3 {
                    sum[c] += rgb[c] as u32;
                }
                count += 1;
            }
        }
        sum.map(|s| s as f32 / count as f32)
    }
}

/// Identify the garment class under a surface click.
///
/// The click is normalised against the displayed image (clamped to its
/// edges) and scaled onto the map.
pub fn classify_point(
    map: &ClassificationMap,
    display_point: Point,
    placement: &ImagePlacement,
) -> Result<GarmentClass> {
    let transform = placement.transform();
    let image_point = transform.to_image_space(display_point);
    let map_res = map.resolution();
    let source = match (transform.is_degraded(), placement.source_size) {
        (false, Some(size)) => size,
        _ => map_res,
    };

    let nx = (image_point.x / source.width as f32).clamp(0.0, 1.0);
    let ny = (image_point.y / source.height as f32).clamp(0.0, 1.0);
    let mx = ((nx * map_res.width as f32) as u32).min(map_res.width - 1);
    let my = ((ny * map_res.height as f32) as u32).min(map_res.height - 1);

    let avg = map.sample(mx, my);
    let class = GarmentClass::identify(avg).ok_or(MattingError::NoClassAtPoint {
        x: display_point.x,
        y: display_point.y,
    })?;
    log::debug!(
        "click ({:.1}, {:.1}) -> map ({}, {}) avg {:?} -> {}",
        display_point.x,
        display_point.y,
        mx,
        my,
        avg,
        class
    );
    Ok(class)
}

/// Identify the class under a click and select all of its pixels at the
/// map's own resolution. The mask is flagged degraded when the click had to
/// be read through the identity fallback.
pub fn select_by_point(
    map: &ClassificationMap,
    display_point: Point,
    placement: &ImagePlacement,
) -> Result<(GarmentClass, Mask)> {
    let class = classify_point(map, display_point, placement)?;
    let mask = select_by_class(map, class, None)?.with_degraded(placement.transform().is_degraded());
    Ok((class, mask))
}

/// Mark every pixel of `class`.
///
/// With a `base` image the mask is built at the base's resolution (map
/// pixels picked by nearest neighbour, axes scaled independently) and only
/// pixels the base already shows (alpha > 0) may be marked.
pub fn select_by_class(
    map: &ClassificationMap,
    class: GarmentClass,
    base: Option<&RgbaImage>,
) -> Result<Mask> {
    let map_res = map.resolution();
    let target = base.map(Resolution::of).unwrap_or(map_res).validate()?;
    let scale_x = target.width as f32 / map_res.width as f32;
    let scale_y = target.height as f32 / map_res.height as f32;

    let mut pixels = GrayImage::new(target.width, target.height);
    let width = target.width as usize;
    pixels
        .as_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let my = ((y as f32 / scale_y) as u32).min(map_res.height - 1);
            for (x, out) in row.iter_mut().enumerate() {
                let mx = ((x as f32 / scale_x) as u32).min(map_res.width - 1);
                let visible = base.is_none_or(|b| b.get_pixel(x as u32, y as u32).0[3] > 0);
                *out = if visible && class.matches(map.rgb(mx, my)) {
                    MARKED
                } else {
                    UNMARKED
                };
            }
        });

    let mask = Mask::from_gray(pixels)?;
    log::debug!(
        "selected {} pixel(s) of {} at {}",
        mask.marked_count(),
        class,
        target
    );
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// 200x200 black map with a blue 100x100 square at (50, 50).
    fn blue_square_map() -> ClassificationMap {
        let pixels = RgbaImage::from_fn(200, 200, |x, y| {
            if (50..150).contains(&x) && (50..150).contains(&y) {
                Rgba([0, 0, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        ClassificationMap::new(pixels).unwrap()
    }

    fn identity(size: u32) -> ImagePlacement {
        ImagePlacement::new(0.0, 0.0, 1.0, 1.0, Resolution::new(size, size))
    }

    #[test]
    fn test_select_by_class_marks_exact_region() {
        let map = blue_square_map();
        let mask = select_by_class(&map, GarmentClass::UpperBody, None).unwrap();
        assert_eq!(mask.marked_count(), 10_000);
        assert!(mask.is_marked(50, 50));
        assert!(mask.is_marked(149, 149));
        assert!(!mask.is_marked(150, 100));
        let lower = select_by_class(&map, GarmentClass::LowerBody, None).unwrap();
        assert_eq!(lower.marked_count(), 0);
    }

    #[test]
    fn test_select_by_class_nearest_upscale_is_crisp() {
        let map = blue_square_map();
        let base = RgbaImage::from_pixel(400, 400, Rgba([9, 9, 9, 255]));
        let mask = select_by_class(&map, GarmentClass::UpperBody, Some(&base)).unwrap();
        assert_eq!(mask.resolution(), Resolution::new(400, 400));
        assert_eq!(mask.marked_count(), 40_000);
        assert!(mask.as_raw().iter().all(|&v| v == MARKED || v == UNMARKED));
    }

    #[test]
    fn test_select_by_class_respects_prior_transparency() {
        let map = blue_square_map();
        let base = RgbaImage::from_fn(200, 200, |x, _| {
            Rgba([1, 1, 1, if x < 100 { 255 } else { 0 }])
        });
        let mask = select_by_class(&map, GarmentClass::UpperBody, Some(&base)).unwrap();
        assert_eq!(mask.marked_count(), 50 * 100);
        assert!(!mask.is_marked(120, 100));
    }

    #[test]
    fn test_strict_membership_rejects_impure_colours() {
        let pixels = RgbaImage::from_fn(3, 1, |x, _| match x {
            0 => Rgba([0, 0, 201, 255]),
            1 => Rgba([0, 0, 200, 255]),
            _ => Rgba([50, 0, 255, 255]),
        });
        let map = ClassificationMap::new(pixels).unwrap();
        assert_eq!(map.pixel_class(0, 0), Some(GarmentClass::UpperBody));
        assert_eq!(map.pixel_class(1, 0), None);
        assert_eq!(map.pixel_class(2, 0), None);
    }

    #[test]
    fn test_click_identifies_class() {
        let map = blue_square_map();
        let (class, mask) = select_by_point(&map, Point::new(100.0, 100.0), &identity(200)).unwrap();
        assert_eq!(class, GarmentClass::UpperBody);
        assert_eq!(mask.marked_count(), 10_000);
    }

    #[test]
    fn test_click_through_placement() {
        let map = blue_square_map();
        // source 400x400 shown at quarter scale: 100x100 at (10, 10)
        let placement = ImagePlacement::new(10.0, 10.0, 0.25, 0.25, Resolution::new(400, 400));
        let class = classify_point(&map, Point::new(60.0, 60.0), &placement).unwrap();
        assert_eq!(class, GarmentClass::UpperBody);
        let err = classify_point(&map, Point::new(15.0, 15.0), &placement).unwrap_err();
        assert!(matches!(err, MattingError::NoClassAtPoint { .. }));
    }

    #[test]
    fn test_click_without_source_size_is_flagged() {
        let map = blue_square_map();
        let unsized_placement = ImagePlacement {
            left: 0.0,
            top: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            source_size: None,
        };
        let (class, mask) = select_by_point(&map, Point::new(100.0, 100.0), &unsized_placement).unwrap();
        assert_eq!(class, GarmentClass::UpperBody);
        assert!(mask.is_degraded());

        let (_, sound) = select_by_point(&map, Point::new(100.0, 100.0), &identity(200)).unwrap();
        assert!(!sound.is_degraded());
    }

    #[test]
    fn test_click_on_background_fails() {
        let map = blue_square_map();
        let err = select_by_point(&map, Point::new(10.0, 10.0), &identity(200)).unwrap_err();
        assert!(matches!(err, MattingError::NoClassAtPoint { .. }));
    }

    #[test]
    fn test_click_average_tolerates_edges() {
        let map = blue_square_map();
        // 5x5 window straddling the square's corner: 9 of 25 samples are blue
        let avg = map.sample(50, 50);
        assert!(avg[2] < SAMPLE_DOMINANT_MIN);
        // one pixel further in, 16 of 25 are blue
        let avg = map.sample(51, 51);
        assert!(avg[2] > SAMPLE_DOMINANT_MIN);
    }

    #[test]
    fn test_histogram() {
        let hist = blue_square_map().histogram();
        assert_eq!(hist.upper_body, 10_000);
        assert_eq!(hist.background, 30_000);
        assert_eq!(hist.count(GarmentClass::FullBodyDress), 0);
        assert_eq!(hist.total(), 40_000);
    }

    #[test]
    fn test_parse_class_names() {
        assert_eq!(GarmentClass::parse("upper-body"), Some(GarmentClass::UpperBody));
        assert_eq!(GarmentClass::parse("3"), Some(GarmentClass::FullBodyDress));
        assert_eq!(GarmentClass::parse("hat"), None);
        assert_eq!(GarmentClass::from_index(2).map(|c| c.reference_color()), Some([0, 255, 0]));
    }
}
