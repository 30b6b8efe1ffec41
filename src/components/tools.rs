use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canvas::{ImagePlacement, Point};

/// Target distance between samples when flattening curves, in raster pixels.
const FLATTEN_SPACING: f32 = 2.0;
const MAX_CURVE_STEPS: usize = 5000;

// ============================================================================
// DRAW MODES
// ============================================================================

/// What a pointer gesture on the drawing surface does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DrawMode {
    #[default]
    BrushAdd,
    Erase,
    TransparentErase,
    ClassificationClick,
    Select,
    Move,
}

impl DrawMode {
    pub fn name(&self) -> &'static str {
        match self {
            DrawMode::BrushAdd => "brush",
            DrawMode::Erase => "erase",
            DrawMode::TransparentErase => "transparent-erase",
            DrawMode::ClassificationClick => "classification-click",
            DrawMode::Select => "select",
            DrawMode::Move => "move",
        }
    }

    /// Role of strokes drawn in this mode; `None` for non-drawing modes.
    pub fn stroke_role(&self) -> Option<StrokeRole> {
        match self {
            DrawMode::BrushAdd => Some(StrokeRole::BrushAdd),
            DrawMode::Erase => Some(StrokeRole::Erase),
            DrawMode::TransparentErase => Some(StrokeRole::TransparentErase),
            DrawMode::ClassificationClick | DrawMode::Select | DrawMode::Move => None,
        }
    }
}

impl fmt::Display for DrawMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// STROKES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrokeRole {
    /// Marks pixels to keep.
    BrushAdd,
    /// Unmarks pixels, applied after every additive stroke.
    Erase,
    /// Marks pixels of an existing extraction to make transparent.
    TransparentErase,
}

impl StrokeRole {
    pub fn name(&self) -> &'static str {
        match self {
            StrokeRole::BrushAdd => "brush-add",
            StrokeRole::Erase => "erase",
            StrokeRole::TransparentErase => "transparent-erase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brush-add" | "brush" | "add" => Some(StrokeRole::BrushAdd),
            "erase" | "eraser" => Some(StrokeRole::Erase),
            "transparent-erase" | "transparent" => Some(StrokeRole::TransparentErase),
            _ => None,
        }
    }

    /// Colour the drawing surface paints strokes of this role with.
    pub fn color_tag(&self) -> &'static str {
        match self {
            StrokeRole::BrushAdd => "rgba(255, 0, 0, 0.5)",
            StrokeRole::Erase => "rgba(255, 255, 255, 0.7)",
            StrokeRole::TransparentErase => "rgba(0, 255, 255, 0.3)",
        }
    }

    /// Identify a role from a surface colour tag (`rgb(..)` or `rgba(..)`).
    /// Only the colour channels matter; opacity is ignored.
    pub fn from_color_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        let inner = tag
            .strip_prefix("rgba(")
            .or_else(|| tag.strip_prefix("rgb("))?
            .strip_suffix(')')?;
        let channels: Vec<u8> = inner
            .split(',')
            .take(3)
            .map(|c| c.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .ok()?;
        match channels.as_slice() {
            [255, 0, 0] => Some(StrokeRole::BrushAdd),
            [255, 255, 255] => Some(StrokeRole::Erase),
            [0, 255, 255] => Some(StrokeRole::TransparentErase),
            _ => None,
        }
    }

    /// Whether strokes of this role set mask pixels (as opposed to clearing them).
    pub fn is_additive(&self) -> bool {
        !matches!(self, StrokeRole::Erase)
    }
}

impl fmt::Display for StrokeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One drawing command in surface coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PathCommand {
    MoveTo(Point),
    LineTo(Point),
    QuadTo { ctrl: Point, to: Point },
    CubicTo { ctrl1: Point, ctrl2: Point, to: Point },
    Close,
}

impl PathCommand {
    pub fn map_points(&self, f: impl Fn(Point) -> Point) -> Self {
        match *self {
            PathCommand::MoveTo(p) => PathCommand::MoveTo(f(p)),
            PathCommand::LineTo(p) => PathCommand::LineTo(f(p)),
            PathCommand::QuadTo { ctrl, to } => PathCommand::QuadTo {
                ctrl: f(ctrl),
                to: f(to),
            },
            PathCommand::CubicTo { ctrl1, ctrl2, to } => PathCommand::CubicTo {
                ctrl1: f(ctrl1),
                ctrl2: f(ctrl2),
                to: f(to),
            },
            PathCommand::Close => PathCommand::Close,
        }
    }
}

/// A committed stroke. Once committed the geometry is never edited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokePath {
    pub commands: Vec<PathCommand>,
    /// Width in surface pixels.
    pub width: f32,
    pub role: StrokeRole,
    /// Monotonically increasing per session; newer strokes have larger stamps.
    pub stamp: u64,
    /// Placement of the background image when the stroke was committed.
    pub placement: Option<ImagePlacement>,
}

impl StrokePath {
    pub fn new(commands: Vec<PathCommand>, width: f32, role: StrokeRole) -> Self {
        Self {
            commands,
            width,
            role,
            stamp: 0,
            placement: None,
        }
    }
}

/// Completed stroke geometry as emitted by the drawing surface. Width and
/// role fall back to the session's brush size and draw mode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrokeEvent {
    pub commands: Vec<PathCommand>,
    pub width: Option<f32>,
    pub role: Option<StrokeRole>,
}

impl StrokeEvent {
    pub fn new(commands: Vec<PathCommand>) -> Self {
        Self {
            commands,
            ..Default::default()
        }
    }
}

// ============================================================================
// FLATTENING
// ============================================================================

/// Straight-line approximation of one subpath.
#[derive(Clone, Debug, PartialEq)]
pub struct Polyline {
    pub points: Vec<Point>,
    pub closed: bool,
}

fn quad_point(p0: Point, p1: Point, p2: Point, t: f32) -> Point {
    let mt = 1.0 - t;
    Point::new(
        mt * mt * p0.x + 2.0 * mt * t * p1.x + t * t * p2.x,
        mt * mt * p0.y + 2.0 * mt * t * p1.y + t * t * p2.y,
    )
}

fn cubic_point(p0: Point, p1: Point, p2: Point, p3: Point, t: f32) -> Point {
    let t2 = t * t;
    let t3 = t2 * t;
    let mt = 1.0 - t;
    let mt2 = mt * mt;
    let mt3 = mt2 * mt;

    Point::new(
        mt3 * p0.x + 3.0 * mt2 * t * p1.x + 3.0 * mt * t2 * p2.x + t3 * p3.x,
        mt3 * p0.y + 3.0 * mt2 * t * p1.y + 3.0 * mt * t2 * p2.y + t3 * p3.y,
    )
}

/// Sample count from the control-net length.
fn curve_steps(control: &[Point]) -> usize {
    let net: f32 = control
        .windows(2)
        .map(|w| w[0].distance_sq(w[1]).sqrt())
        .sum();
    ((net / FLATTEN_SPACING).ceil() as usize).clamp(1, MAX_CURVE_STEPS)
}

#[derive(Default)]
struct Flattener {
    out: Vec<Polyline>,
    points: Vec<Point>,
    start: Option<Point>,
    drawn: bool,
}

impl Flattener {
    fn cursor(&self) -> Option<Point> {
        self.points.last().copied()
    }

    fn move_to(&mut self, p: Point) {
        self.finish(false);
        self.points.push(p);
        self.start = Some(p);
    }

    /// Curves and lines without a current point start a subpath first.
    fn ensure_subpath(&mut self, p: Point) -> Point {
        match self.cursor() {
            Some(c) => c,
            None => {
                self.move_to(p);
                p
            }
        }
    }

    fn line_to(&mut self, p: Point) {
        self.ensure_subpath(p);
        self.points.push(p);
        self.drawn = true;
    }

    fn quad_to(&mut self, ctrl: Point, to: Point) {
        let from = self.ensure_subpath(ctrl);
        let steps = curve_steps(&[from, ctrl, to]);
        for i in 1..=steps {
            self.points.push(quad_point(from, ctrl, to, i as f32 / steps as f32));
        }
        self.drawn = true;
    }

    fn cubic_to(&mut self, ctrl1: Point, ctrl2: Point, to: Point) {
        let from = self.ensure_subpath(ctrl1);
        let steps = curve_steps(&[from, ctrl1, ctrl2, to]);
        for i in 1..=steps {
            self.points.push(cubic_point(from, ctrl1, ctrl2, to, i as f32 / steps as f32));
        }
        self.drawn = true;
    }

    fn close(&mut self) {
        let Some(start) = self.start else { return };
        if self.drawn {
            self.points.push(start);
        }
        self.finish(true);
        // a new subpath begins where the closed one started
        self.points.push(start);
        self.start = Some(start);
    }

    fn finish(&mut self, closed: bool) {
        let points = std::mem::take(&mut self.points);
        if self.drawn {
            self.out.push(Polyline { points, closed });
        }
        self.drawn = false;
        self.start = None;
    }
}

/// Flatten commands into polylines. Subpaths that never draw (a lone
/// `MoveTo`) produce nothing; a zero-length segment yields a two-point
/// polyline so round caps still leave a dot.
pub fn flatten(commands: &[PathCommand]) -> Vec<Polyline> {
    let mut f = Flattener::default();
    for cmd in commands {
        match *cmd {
            PathCommand::MoveTo(p) => f.move_to(p),
            PathCommand::LineTo(p) => f.line_to(p),
            PathCommand::QuadTo { ctrl, to } => f.quad_to(ctrl, to),
            PathCommand::CubicTo { ctrl1, ctrl2, to } => f.cubic_to(ctrl1, ctrl2, to),
            PathCommand::Close => f.close(),
        }
    }
    f.finish(false);
    f.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn p(x: f32, y: f32) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_lone_move_draws_nothing() {
        assert!(flatten(&[PathCommand::MoveTo(p(3.0, 4.0))]).is_empty());
        assert!(flatten(&[PathCommand::MoveTo(p(3.0, 4.0)), PathCommand::Close]).is_empty());
    }

    #[test]
    fn test_zero_length_segment_is_kept() {
        let lines = flatten(&[PathCommand::MoveTo(p(5.0, 5.0)), PathCommand::LineTo(p(5.0, 5.0))]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].points, vec![p(5.0, 5.0), p(5.0, 5.0)]);
    }

    #[test]
    fn test_close_returns_to_start() {
        let lines = flatten(&[
            PathCommand::MoveTo(p(0.0, 0.0)),
            PathCommand::LineTo(p(10.0, 0.0)),
            PathCommand::LineTo(p(10.0, 10.0)),
            PathCommand::Close,
        ]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].closed);
        assert_eq!(lines[0].points.last(), Some(&p(0.0, 0.0)));
    }

    #[test]
    fn test_curves_end_on_their_endpoint() {
        let lines = flatten(&[
            PathCommand::MoveTo(p(0.0, 0.0)),
            PathCommand::QuadTo { ctrl: p(20.0, 40.0), to: p(40.0, 0.0) },
            PathCommand::CubicTo { ctrl1: p(50.0, -30.0), ctrl2: p(70.0, 30.0), to: p(80.0, 0.0) },
        ]);
        assert_eq!(lines.len(), 1);
        let pts = &lines[0].points;
        assert!(pts.len() > 10);
        let last = pts[pts.len() - 1];
        assert_abs_diff_eq!(last.x, 80.0, epsilon = 1e-4);
        assert_abs_diff_eq!(last.y, 0.0, epsilon = 1e-4);
        // quad apex at t = 0.5 is (20, 20)
        let apex = quad_point(p(0.0, 0.0), p(20.0, 40.0), p(40.0, 0.0), 0.5);
        assert_abs_diff_eq!(apex.y, 20.0, epsilon = 1e-4);
    }

    #[test]
    fn test_line_without_move_starts_subpath() {
        let lines = flatten(&[PathCommand::LineTo(p(1.0, 1.0)), PathCommand::LineTo(p(4.0, 1.0))]);
        assert_eq!(lines[0].points, vec![p(1.0, 1.0), p(1.0, 1.0), p(4.0, 1.0)]);
    }

    #[test]
    fn test_role_color_tags() {
        for role in [StrokeRole::BrushAdd, StrokeRole::Erase, StrokeRole::TransparentErase] {
            assert_eq!(StrokeRole::from_color_tag(role.color_tag()), Some(role));
            assert_eq!(StrokeRole::parse(role.name()), Some(role));
        }
        assert_eq!(StrokeRole::from_color_tag("rgb(255,0,0)"), Some(StrokeRole::BrushAdd));
        assert_eq!(StrokeRole::from_color_tag("rgba(1, 2, 3, 1)"), None);
        assert_eq!(StrokeRole::from_color_tag("red"), None);
    }

    #[test]
    fn test_mode_roles() {
        assert_eq!(DrawMode::Erase.stroke_role(), Some(StrokeRole::Erase));
        assert_eq!(DrawMode::Move.stroke_role(), None);
    }
}
