// ============================================================================
// PATH RASTERIZER: stroke geometry -> coverage mask
// ============================================================================

use image::{GrayImage, Luma};

use crate::canvas::{ImagePlacement, MARKED, Mask, Point, RasterMapping, Resolution, UNMARKED};
use crate::components::tools::{PathCommand, Polyline, StrokePath, flatten};
use crate::error::Result;

/// Render `paths` into a fresh mask at `resolution`.
///
/// Surface coordinates are mapped through each path's captured placement
/// (or `placement` when the path has none), so the same strokes can be
/// rasterized at display or native resolution. Strokes are round-capped and
/// round-joined; widths scale with the horizontal factor. All additive
/// strokes are painted before any `Erase` stroke, so erasing wins regardless
/// of commit order.
pub fn rasterize(
    paths: &[StrokePath],
    placement: &ImagePlacement,
    resolution: Resolution,
    width_override: Option<f32>,
) -> Result<Mask> {
    let resolution = resolution.validate()?;
    let mut pixels = GrayImage::new(resolution.width, resolution.height);

    let (additive, subtractive): (Vec<&StrokePath>, Vec<&StrokePath>) =
        paths.iter().partition(|p| p.role.is_additive());

    let mut degraded = false;
    for path in &additive {
        degraded |= stroke_path(&mut pixels, path, placement, resolution, width_override, MARKED);
    }
    for path in &subtractive {
        degraded |= stroke_path(&mut pixels, path, placement, resolution, width_override, UNMARKED);
    }

    log::debug!(
        "rasterized {} stroke(s) ({} erasing) at {}",
        paths.len(),
        subtractive.len(),
        resolution
    );

    let stamps = paths.iter().map(|p| p.stamp).collect();
    Ok(Mask::from_gray(pixels)?
        .with_strokes(stamps)
        .with_degraded(degraded))
}

/// Returns whether the path had to be mapped with identity coordinates.
fn stroke_path(
    pixels: &mut GrayImage,
    path: &StrokePath,
    placement: &ImagePlacement,
    resolution: Resolution,
    width_override: Option<f32>,
    value: u8,
) -> bool {
    let mapping = RasterMapping::new(path.placement.as_ref().unwrap_or(placement), resolution);
    let radius = mapping.map_width(width_override.unwrap_or(path.width)).abs() / 2.0;
    if !radius.is_finite() || radius <= 0.0 {
        log::debug!("skipping stroke {} with unusable width {}", path.stamp, path.width);
        return mapping.is_degraded();
    }

    let mapped: Vec<PathCommand> = path
        .commands
        .iter()
        .map(|c| c.map_points(|p| mapping.map_point(p)))
        .collect();

    for line in flatten(&mapped) {
        stroke_polyline(pixels, &line, radius, value);
    }
    mapping.is_degraded()
}

fn stroke_polyline(pixels: &mut GrayImage, line: &Polyline, radius: f32, value: u8) {
    match line.points.as_slice() {
        [] => {}
        [only] => fill_capsule(pixels, *only, *only, radius, value),
        points => {
            for pair in points.windows(2) {
                fill_capsule(pixels, pair[0], pair[1], radius, value);
            }
        }
    }
}

/// Set every pixel whose centre lies within `radius` of segment `a`-`b`.
/// Consecutive capsules overlap at their shared endpoint, which gives round
/// joins for free.
fn fill_capsule(pixels: &mut GrayImage, a: Point, b: Point, radius: f32, value: u8) {
    let max_x = pixels.width() as i64 - 1;
    let max_y = pixels.height() as i64 - 1;

    let x0 = ((a.x.min(b.x) - radius).floor() as i64).max(0);
    let x1 = ((a.x.max(b.x) + radius).ceil() as i64).min(max_x);
    let y0 = ((a.y.min(b.y) - radius).floor() as i64).max(0);
    let y1 = ((a.y.max(b.y) + radius).ceil() as i64).min(max_y);
    if x0 > x1 || y0 > y1 {
        return;
    }

    let r2 = radius * radius;
    for y in y0..=y1 {
        let cy = y as f32 + 0.5;
        for x in x0..=x1 {
            let centre = Point::new(x as f32 + 0.5, cy);
            if distance_sq_to_segment(centre, a, b) <= r2 {
                pixels.put_pixel(x as u32, y as u32, Luma([value]));
            }
        }
    }
}

fn distance_sq_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 <= f32::EPSILON {
        return p.distance_sq(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    p.distance_sq(Point::new(a.x + t * dx, a.y + t * dy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tools::StrokeRole;
    use crate::error::MattingError;

    fn identity(size: u32) -> ImagePlacement {
        ImagePlacement::new(0.0, 0.0, 1.0, 1.0, Resolution::new(size, size))
    }

    fn line(x0: f32, y0: f32, x1: f32, y1: f32, width: f32, role: StrokeRole) -> StrokePath {
        StrokePath::new(
            vec![
                PathCommand::MoveTo(Point::new(x0, y0)),
                PathCommand::LineTo(Point::new(x1, y1)),
            ],
            width,
            role,
        )
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let err = rasterize(&[], &identity(10), Resolution::new(10, 0), None).unwrap_err();
        assert!(matches!(err, MattingError::InvalidResolution { width: 10, height: 0 }));
    }

    #[test]
    fn test_round_capped_line_coverage() {
        let path = line(20.0, 50.0, 80.0, 50.0, 10.0, StrokeRole::BrushAdd);
        let mask = rasterize(&[path], &identity(100), Resolution::new(100, 100), None).unwrap();
        assert!(mask.is_marked(50, 50));
        assert!(mask.is_marked(50, 45));
        assert!(!mask.is_marked(50, 44));
        // round cap reaches past the endpoint along the axis...
        assert!(mask.is_marked(15, 50));
        // ...but not into the corner a square cap would fill
        assert!(!mask.is_marked(15, 45));
        assert!(!mask.is_marked(90, 50));
    }

    #[test]
    fn test_erase_wins_regardless_of_order() {
        let mut erase = line(0.0, 10.0, 40.0, 10.0, 6.0, StrokeRole::Erase);
        erase.stamp = 1;
        let mut add = line(0.0, 10.0, 40.0, 10.0, 4.0, StrokeRole::BrushAdd);
        add.stamp = 2;
        let mask = rasterize(&[erase, add], &identity(40), Resolution::new(40, 40), None).unwrap();
        assert_eq!(mask.marked_count(), 0);
        assert_eq!(mask.strokes(), &[1, 2]);
    }

    #[test]
    fn test_placement_maps_to_native_resolution() {
        // 200x200 image shown at half size with its corner at (100, 50)
        let placement = ImagePlacement::new(100.0, 50.0, 0.5, 0.5, Resolution::new(200, 200));
        let dot = line(150.0, 100.0, 150.0, 100.0, 4.0, StrokeRole::BrushAdd);
        let mask = rasterize(&[dot.clone()], &placement, Resolution::new(200, 200), None).unwrap();
        assert!(mask.is_marked(100, 100));
        assert!(mask.is_marked(100, 97));
        assert!(!mask.is_marked(100, 95));

        let wide = rasterize(&[dot], &placement, Resolution::new(200, 200), Some(20.0)).unwrap();
        assert!(wide.is_marked(100, 85));
    }

    #[test]
    fn test_captured_placement_takes_precedence() {
        let mut dot = line(10.0, 10.0, 10.0, 10.0, 2.0, StrokeRole::BrushAdd);
        dot.placement = Some(ImagePlacement::new(5.0, 5.0, 1.0, 1.0, Resolution::new(50, 50)));
        let mask = rasterize(&[dot], &identity(50), Resolution::new(50, 50), None).unwrap();
        assert!(mask.is_marked(5, 5));
        assert!(!mask.is_marked(10, 10));
    }

    #[test]
    fn test_unknown_source_size_flags_mask() {
        let unsized_placement = ImagePlacement {
            left: 30.0,
            top: 30.0,
            scale_x: 0.5,
            scale_y: 0.5,
            source_size: None,
        };
        let dot = line(10.0, 10.0, 10.0, 10.0, 4.0, StrokeRole::BrushAdd);
        let mask =
            rasterize(&[dot.clone()], &unsized_placement, Resolution::new(50, 50), None).unwrap();
        assert!(mask.is_degraded());
        // 1:1 fallback: the dot stays at its surface position
        assert!(mask.is_marked(10, 10));
        assert!(mask.remap_to(Resolution::new(100, 100)).unwrap().is_degraded());

        let sound = rasterize(&[dot], &identity(50), Resolution::new(50, 50), None).unwrap();
        assert!(!sound.is_degraded());
    }

    #[test]
    fn test_lone_move_leaves_mask_empty() {
        let path = StrokePath::new(
            vec![PathCommand::MoveTo(Point::new(4.0, 4.0))],
            8.0,
            StrokeRole::BrushAdd,
        );
        let mask = rasterize(&[path], &identity(10), Resolution::new(10, 10), None).unwrap();
        assert_eq!(mask.marked_count(), 0);
    }

    #[test]
    fn test_deterministic() {
        let paths = vec![
            StrokePath::new(
                vec![
                    PathCommand::MoveTo(Point::new(3.0, 7.0)),
                    PathCommand::QuadTo {
                        ctrl: Point::new(40.0, 60.0),
                        to: Point::new(70.0, 12.0),
                    },
                ],
                7.5,
                StrokeRole::BrushAdd,
            ),
            line(0.0, 30.0, 80.0, 30.0, 3.0, StrokeRole::Erase),
        ];
        let a = rasterize(&paths, &identity(80), Resolution::new(80, 80), None).unwrap();
        let b = rasterize(&paths, &identity(80), Resolution::new(80, 80), None).unwrap();
        assert_eq!(a, b);
        assert!(a.marked_count() > 0);
    }
}
