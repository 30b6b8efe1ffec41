use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage};
use serde::Deserialize;
use serde_json::Value;

use crate::canvas::{Point, Resolution};
use crate::components::tools::{PathCommand, StrokeEvent, StrokeRole};
use crate::error::{MattingError, Result};

/// Largest width or height accepted for decoded images.
pub const MAX_IMAGE_DIM: u32 = 16384;

// ============================================================================
// OUTPUT MODES
// ============================================================================

/// How exported images treat transparency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Keep the alpha channel.
    #[default]
    Transparent,
    /// Flatten onto an opaque white background.
    WhiteBackground,
}

impl OutputMode {
    pub fn name(&self) -> &'static str {
        match self {
            OutputMode::Transparent => "transparent",
            OutputMode::WhiteBackground => "white",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transparent" => Some(OutputMode::Transparent),
            "white" | "white-background" => Some(OutputMode::WhiteBackground),
            _ => None,
        }
    }
}

// ============================================================================
// IMAGE DECODE / ENCODE
// ============================================================================

fn check_dimensions(image: &RgbaImage) -> Result<()> {
    let res = Resolution::of(image).validate()?;
    if res.width > MAX_IMAGE_DIM || res.height > MAX_IMAGE_DIM {
        return Err(MattingError::InvalidResolution {
            width: res.width,
            height: res.height,
        });
    }
    Ok(())
}

/// Decode any format the `image` crate understands into straight RGBA.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage> {
    let image = image::load_from_memory(bytes)?.to_rgba8();
    check_dimensions(&image)?;
    Ok(image)
}

pub fn load_rgba(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path)?.to_rgba8();
    check_dimensions(&image)?;
    Ok(image)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(bytes)
}

pub fn write_png(image: &RgbaImage, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    PngEncoder::new(&mut writer).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    writer.flush()?;
    Ok(())
}

// ============================================================================
// STROKE FILES
// ============================================================================
//
// {"strokes": [{"role": "brush-add", "width": 12,
//               "path": [["M", 10, 10], ["Q", 20, 30, 40, 10], ["Z"]]}]}
//
// `role` may be replaced by the surface colour tag under `stroke`; both are
// optional and fall back to the session's draw mode.

#[derive(Deserialize)]
struct StrokeFile {
    strokes: Vec<StrokeRecord>,
}

#[derive(Deserialize)]
struct StrokeRecord {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    stroke: Option<String>,
    #[serde(default)]
    width: Option<f32>,
    path: Vec<Vec<Value>>,
}

pub fn parse_strokes(json: &str) -> Result<Vec<StrokeEvent>> {
    let file: StrokeFile = serde_json::from_str(json)?;
    file.strokes
        .iter()
        .enumerate()
        .map(|(i, record)| parse_record(i, record))
        .collect()
}

pub fn load_strokes(path: &Path) -> Result<Vec<StrokeEvent>> {
    let json = std::fs::read_to_string(path)?;
    parse_strokes(&json)
}

fn parse_record(index: usize, record: &StrokeRecord) -> Result<StrokeEvent> {
    let role = match (&record.role, &record.stroke) {
        (Some(name), _) => Some(StrokeRole::parse(name).ok_or_else(|| {
            MattingError::StrokeFormat(format!("stroke {}: unknown role '{}'", index, name))
        })?),
        (None, Some(tag)) => StrokeRole::from_color_tag(tag),
        (None, None) => None,
    };
    let commands = record
        .path
        .iter()
        .map(|raw| parse_command(index, raw))
        .collect::<Result<Vec<_>>>()?;
    Ok(StrokeEvent {
        commands,
        width: record.width,
        role,
    })
}

fn parse_command(index: usize, raw: &[Value]) -> Result<PathCommand> {
    let bad = |what: String| MattingError::StrokeFormat(format!("stroke {}: {}", index, what));

    let (verb, args) = raw.split_first().ok_or_else(|| bad("empty path command".into()))?;
    let verb = verb
        .as_str()
        .ok_or_else(|| bad(format!("command name {} is not a string", verb)))?;
    let nums = args
        .iter()
        .map(|v| v.as_f64().map(|n| n as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| bad(format!("non-numeric argument in '{}'", verb)))?;
    let pt = |i: usize| Point::new(nums[i], nums[i + 1]);

    match (verb, nums.len()) {
        ("M", 2) => Ok(PathCommand::MoveTo(pt(0))),
        ("L", 2) => Ok(PathCommand::LineTo(pt(0))),
        ("Q", 4) => Ok(PathCommand::QuadTo {
            ctrl: pt(0),
            to: pt(2),
        }),
        ("C", 6) => Ok(PathCommand::CubicTo {
            ctrl1: pt(0),
            ctrl2: pt(2),
            to: pt(4),
        }),
        ("Z", 0) => Ok(PathCommand::Close),
        (verb, n) => Err(bad(format!(
            "unsupported command '{}' with {} argument(s)",
            verb, n
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_png_keeps_alpha() {
        let mut img = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        img.put_pixel(1, 1, Rgba([10, 20, 30, 0]));
        let decoded = decode_rgba(&encode_png(&img).unwrap()).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_write_png_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 4]));
        write_png(&img, &path).unwrap();
        assert_eq!(load_rgba(&path).unwrap(), img);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode_rgba(b"nope"), Err(MattingError::Image(_))));
    }

    #[test]
    fn test_parse_stroke_file() {
        let json = r#"{"strokes": [
            {"role": "brush-add", "width": 12,
             "path": [["M", 10, 10], ["L", 20, 10.5], ["Q", 25, 30, 40, 10],
                      ["C", 1, 2, 3, 4, 5, 6], ["Z"]]},
            {"stroke": "rgba(255, 255, 255, 0.7)", "path": [["M", 0, 0], ["L", 1, 1]]},
            {"path": [["M", 0, 0]]}
        ]}"#;
        let events = parse_strokes(json).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].role, Some(StrokeRole::BrushAdd));
        assert_eq!(events[0].width, Some(12.0));
        assert_eq!(events[0].commands.len(), 5);
        assert_eq!(
            events[0].commands[2],
            PathCommand::QuadTo {
                ctrl: Point::new(25.0, 30.0),
                to: Point::new(40.0, 10.0)
            }
        );
        assert_eq!(events[0].commands[4], PathCommand::Close);
        assert_eq!(events[1].role, Some(StrokeRole::Erase));
        assert_eq!(events[2].role, None);
        assert_eq!(events[2].width, None);
    }

    #[test]
    fn test_parse_stroke_errors() {
        let wrong_arity = r#"{"strokes": [{"path": [["L", 1]]}]}"#;
        assert!(matches!(parse_strokes(wrong_arity), Err(MattingError::StrokeFormat(_))));
        let bad_role = r#"{"strokes": [{"role": "paint", "path": []}]}"#;
        assert!(matches!(parse_strokes(bad_role), Err(MattingError::StrokeFormat(_))));
        assert!(matches!(parse_strokes("{"), Err(MattingError::StrokeFormat(_))));
    }

    #[test]
    fn test_output_mode_names() {
        assert_eq!(OutputMode::parse("white"), Some(OutputMode::WhiteBackground));
        assert_eq!(OutputMode::parse(OutputMode::Transparent.name()), Some(OutputMode::Transparent));
        assert_eq!(OutputMode::parse("sepia"), None);
    }
}
