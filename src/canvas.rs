use std::fmt;
use std::sync::Arc;

use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MattingError, Result};

// ============================================================================
// MASK CONSTANTS
// ============================================================================

/// Mask value written for marked pixels.
pub const MARKED: u8 = 255;
/// Mask value written for unmarked pixels.
pub const UNMARKED: u8 = 0;
/// A mask pixel counts as marked at or above this value.
pub const MARK_THRESHOLD: u8 = 200;
/// Largest relative difference between horizontal and vertical scale that a
/// mask may be stretched by when it is mapped onto another resolution.
pub const MAX_SCALE_SKEW: f32 = 0.05;

// ============================================================================
// POINTS AND RESOLUTIONS
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Width and height of a raster, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &RgbaImage) -> Self {
        Self::new(image.width(), image.height())
    }

    pub fn validate(self) -> Result<Self> {
        if self.width == 0 || self.height == 0 {
            return Err(MattingError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }
        Ok(self)
    }

    /// Component-wise maximum of two resolutions.
    pub fn max(self, other: Resolution) -> Self {
        Self::new(self.width.max(other.width), self.height.max(other.height))
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ============================================================================
// IMAGE PLACEMENT AND COORDINATE TRANSFORMS
// ============================================================================

/// How an image sits on the drawing surface: its top-left corner in surface
/// coordinates plus independent horizontal/vertical scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImagePlacement {
    pub left: f32,
    pub top: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Native size of the placed image; `None` when it is not known yet.
    pub source_size: Option<Resolution>,
}

impl ImagePlacement {
    pub fn new(left: f32, top: f32, scale_x: f32, scale_y: f32, source_size: Resolution) -> Self {
        Self {
            left,
            top,
            scale_x,
            scale_y,
            source_size: Some(source_size),
        }
    }

    /// Uniformly scale `source` to fit inside `surface` and centre it.
    pub fn fit(source: Resolution, surface: Resolution) -> Self {
        let scale = if source.width == 0 || source.height == 0 {
            1.0
        } else {
            (surface.width as f32 / source.width as f32)
                .min(surface.height as f32 / source.height as f32)
        };
        let width = source.width as f32 * scale;
        let height = source.height as f32 * scale;
        Self::new(
            (surface.width as f32 - width) / 2.0,
            (surface.height as f32 - height) / 2.0,
            scale,
            scale,
            source,
        )
    }

    /// Displayed size of the image on the surface.
    pub fn display_size(&self) -> Result<(f32, f32)> {
        let size = self.source_size.ok_or_else(|| MattingError::PlacementUnavailable {
            reason: "source size unknown".into(),
        })?;
        if size.width == 0 || size.height == 0 {
            return Err(MattingError::PlacementUnavailable {
                reason: format!("source size {} is empty", size),
            });
        }
        let valid = |s: f32| s.is_finite() && s > 0.0;
        if !valid(self.scale_x) || !valid(self.scale_y) {
            return Err(MattingError::PlacementUnavailable {
                reason: format!("scale {}x{} is not positive", self.scale_x, self.scale_y),
            });
        }
        Ok((
            size.width as f32 * self.scale_x,
            size.height as f32 * self.scale_y,
        ))
    }

    /// Display-space pixel size, rounded up. This is the resolution a mask
    /// drawn over the displayed image is rasterized at.
    pub fn display_resolution(&self) -> Result<Resolution> {
        let (w, h) = self.display_size()?;
        Resolution::new(w.ceil() as u32, h.ceil() as u32).validate()
    }

    pub fn transform(&self) -> ImageTransform {
        ImageTransform::for_placement(self)
    }
}

/// Affine mapping between surface (display) space and the placed image's
/// native pixel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageTransform {
    left: f32,
    top: f32,
    scale_x: f32,
    scale_y: f32,
    degraded: bool,
}

impl ImageTransform {
    pub const IDENTITY: ImageTransform = ImageTransform {
        left: 0.0,
        top: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
        degraded: false,
    };

    /// Falls back to a 1:1 mapping (flagged as degraded) when the placement
    /// cannot describe the image.
    pub fn for_placement(placement: &ImagePlacement) -> Self {
        match placement.display_size() {
            Ok(_) => Self {
                left: placement.left,
                top: placement.top,
                scale_x: placement.scale_x,
                scale_y: placement.scale_y,
                degraded: false,
            },
            Err(e) => {
                log::warn!("{}; using 1:1 coordinates", e);
                Self {
                    degraded: true,
                    ..Self::IDENTITY
                }
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn to_image_space(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.left) / self.scale_x,
            (p.y - self.top) / self.scale_y,
        )
    }

    pub fn to_display_space(&self, p: Point) -> Point {
        Point::new(
            p.x * self.scale_x + self.left,
            p.y * self.scale_y + self.top,
        )
    }
}

/// Map a surface point into the placed image's native pixel space.
pub fn to_image_space(point: Point, placement: &ImagePlacement) -> Point {
    placement.transform().to_image_space(point)
}

/// Map a native image point back onto the surface.
pub fn to_display_space(point: Point, placement: &ImagePlacement) -> Point {
    placement.transform().to_display_space(point)
}

/// Ratio between a target raster and the displayed image, per axis.
///
/// Fails with `PlacementUnavailable` when the placement cannot describe the
/// image; callers that want to carry on use `(1.0, 1.0)`, as
/// [`RasterMapping`] does.
pub fn scale_factor(placement: &ImagePlacement, target: Resolution) -> Result<(f32, f32)> {
    let (w, h) = placement.display_size()?;
    Ok((target.width as f32 / w, target.height as f32 / h))
}

/// Maps surface coordinates into an arbitrary target raster laid over the
/// placed image (the image's native raster, a display-resolution mask, ...).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterMapping {
    left: f32,
    top: f32,
    scale_x: f32,
    scale_y: f32,
    degraded: bool,
}

impl RasterMapping {
    pub fn new(placement: &ImagePlacement, target: Resolution) -> Self {
        match placement.display_size() {
            Ok((w, h)) => Self {
                left: placement.left,
                top: placement.top,
                scale_x: target.width as f32 / w,
                scale_y: target.height as f32 / h,
                degraded: false,
            },
            Err(e) => {
                log::warn!("{}; rasterizing with 1:1 coordinates", e);
                Self {
                    left: 0.0,
                    top: 0.0,
                    scale_x: 1.0,
                    scale_y: 1.0,
                    degraded: true,
                }
            }
        }
    }

    pub fn map_point(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.left) * self.scale_x,
            (p.y - self.top) * self.scale_y,
        )
    }

    /// Stroke widths follow the horizontal factor.
    pub fn map_width(&self, width: f32) -> f32 {
        width * self.scale_x
    }

    pub fn scale(&self) -> (f32, f32) {
        (self.scale_x, self.scale_y)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

// ============================================================================
// VIEWPORT (zoom + pan of the drawing surface)
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    zoom: f32,
    pan: Point,
    zoom_min: f32,
    zoom_max: f32,
    wheel_base: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.5, 10.0, 0.999)
    }
}

impl Viewport {
    /// Unusable bounds fall back to the defaults; inverted ones are swapped.
    pub fn new(zoom_min: f32, zoom_max: f32, wheel_base: f32) -> Self {
        let positive = |v: f32, fallback: f32| if v.is_finite() && v > 0.0 { v } else { fallback };
        let a = positive(zoom_min, 0.5);
        let b = positive(zoom_max, 10.0);
        Self {
            zoom: 1.0,
            pan: Point::default(),
            zoom_min: a.min(b),
            zoom_max: a.max(b),
            wheel_base: positive(wheel_base, 0.999),
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn pan(&self) -> Point {
        self.pan
    }

    pub fn screen_to_surface(&self, p: Point) -> Point {
        Point::new((p.x - self.pan.x) / self.zoom, (p.y - self.pan.y) / self.zoom)
    }

    /// Zoom by a wheel delta, keeping the surface point under `anchor` fixed.
    pub fn zoom_by_wheel(&mut self, delta_y: f32, anchor: Point) -> f32 {
        let target = self.zoom * self.wheel_base.powf(delta_y);
        self.zoom_to_point(target, anchor)
    }

    pub fn zoom_to_point(&mut self, zoom: f32, anchor: Point) -> f32 {
        if zoom.is_nan() {
            return self.zoom;
        }
        let fixed = self.screen_to_surface(anchor);
        self.zoom = zoom.clamp(self.zoom_min, self.zoom_max);
        self.pan = Point::new(
            anchor.x - fixed.x * self.zoom,
            anchor.y - fixed.y * self.zoom,
        );
        self.zoom
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.pan.x += dx;
        self.pan.y += dy;
    }

    pub fn reset(&mut self) {
        self.zoom = 1.0;
        self.pan = Point::default();
    }
}

// ============================================================================
// MASK
// ============================================================================

/// Single-channel coverage raster. Produced whole by the rasterizer or the
/// classification selector and never edited afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    pixels: GrayImage,
    /// Stamps of the strokes that produced this mask, if any.
    strokes: Vec<u64>,
    /// Set when some geometry was mapped with the 1:1 fallback because its
    /// placement could not describe the image.
    degraded: bool,
}

impl Mask {
    pub fn new(resolution: Resolution) -> Result<Self> {
        let r = resolution.validate()?;
        Ok(Self {
            pixels: GrayImage::new(r.width, r.height),
            strokes: Vec::new(),
            degraded: false,
        })
    }

    pub fn from_gray(pixels: GrayImage) -> Result<Self> {
        Resolution::new(pixels.width(), pixels.height()).validate()?;
        Ok(Self {
            pixels,
            strokes: Vec::new(),
            degraded: false,
        })
    }

    pub(crate) fn with_strokes(mut self, strokes: Vec<u64>) -> Self {
        self.strokes = strokes;
        self
    }

    pub(crate) fn with_degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }

    /// `true` when the mask was built with identity coordinates because a
    /// placement was unusable; its marks may not line up with the image.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.pixels.width(), self.pixels.height())
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn strokes(&self) -> &[u64] {
        &self.strokes
    }

    pub fn value(&self, x: u32, y: u32) -> u8 {
        self.pixels.get_pixel(x, y).0[0]
    }

    pub fn is_marked(&self, x: u32, y: u32) -> bool {
        self.value(x, y) >= MARK_THRESHOLD
    }

    pub fn marked_count(&self) -> usize {
        self.pixels.as_raw().iter().filter(|&&v| v >= MARK_THRESHOLD).count()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// Nearest-neighbour resample onto `target`. Fails when the two rasters
    /// disagree on aspect ratio by more than [`MAX_SCALE_SKEW`].
    pub fn remap_to(&self, target: Resolution) -> Result<Mask> {
        let target = target.validate()?;
        let here = self.resolution();
        if here == target {
            return Ok(self.clone());
        }
        let sx = target.width as f32 / here.width as f32;
        let sy = target.height as f32 / here.height as f32;
        if (sx - sy).abs() / sx.max(sy) > MAX_SCALE_SKEW {
            return Err(MattingError::ResolutionMismatch {
                from_width: here.width,
                from_height: here.height,
                to_width: target.width,
                to_height: target.height,
            });
        }

        let (w, h) = (here.width as u64, here.height as u64);
        let (tw, th) = (target.width as u64, target.height as u64);
        let remapped = GrayImage::from_fn(target.width, target.height, |x, y| {
            let mx = ((x as u64 * w) / tw).min(w - 1) as u32;
            let my = ((y as u64 * h) / th).min(h - 1) as u32;
            *self.pixels.get_pixel(mx, my)
        });
        Ok(Mask {
            pixels: remapped,
            strokes: self.strokes.clone(),
            degraded: self.degraded,
        })
    }
}

// ============================================================================
// DERIVED IMAGES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageId(Uuid);

impl ImageId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation that produced a derived image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Source,
    Filter,
    Preserve,
    Erase,
    Overlay,
    ClassSelect(u8),
    Flatten,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Source => "source",
            Operation::Filter => "filter",
            Operation::Preserve => "preserve",
            Operation::Erase => "erase",
            Operation::Overlay => "overlay",
            Operation::ClassSelect(_) => "class select",
            Operation::Flatten => "flatten",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provenance {
    pub operation: Operation,
    /// Stamps of the strokes whose mask fed the operation.
    pub strokes: Vec<u64>,
    pub parents: Vec<ImageId>,
}

/// An immutable RGBA result. Every operation yields a fresh one; pixels are
/// shared behind an `Arc` so history and gallery entries stay cheap.
#[derive(Clone, Debug)]
pub struct DerivedImage {
    id: ImageId,
    pixels: Arc<RgbaImage>,
    provenance: Provenance,
}

impl DerivedImage {
    pub fn from_source(pixels: RgbaImage) -> Result<Self> {
        Resolution::of(&pixels).validate()?;
        Ok(Self {
            id: ImageId::new(),
            pixels: Arc::new(pixels),
            provenance: Provenance {
                operation: Operation::Source,
                strokes: Vec::new(),
                parents: Vec::new(),
            },
        })
    }

    pub(crate) fn derive(
        pixels: RgbaImage,
        operation: Operation,
        strokes: Vec<u64>,
        parents: &[&DerivedImage],
    ) -> Self {
        Self {
            id: ImageId::new(),
            pixels: Arc::new(pixels),
            provenance: Provenance {
                operation,
                strokes,
                parents: parents.iter().map(|p| p.id).collect(),
            },
        }
    }

    pub(crate) fn relabel(mut self, operation: Operation) -> Self {
        self.provenance.operation = operation;
        self
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::of(&self.pixels)
    }

    pub fn alpha_at(&self, x: u32, y: u32) -> u8 {
        self.pixels.get_pixel(x, y).0[3]
    }

    pub fn opaque_count(&self) -> usize {
        self.pixels.as_raw().chunks_exact(4).filter(|p| p[3] > 0).count()
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.as_raw().len()
    }
}
