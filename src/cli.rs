// ============================================================================
// Matting CLI: headless extraction via command-line arguments
// ============================================================================
//
// Usage examples:
//   matting -i photo.png --strokes marks.json -o cutout.png
//   matting -i photo.png --strokes marks.json --policy preserve -o rest.png
//   matting -i photo.png --classes map.png --click 410,220 --white -o top.png
//   matting -i photo.png --classes map.png --class dress --erase-strokes fix.json
//   matting -i "shots/*.jpg" --strokes marks.json --output-dir out/
//
// Every input gets its own session. Stroke coordinates are surface
// coordinates of the input fitted into the configured drawing surface.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::app::MattingSession;
use crate::canvas::Point;
use crate::components::tools::{DrawMode, StrokeEvent, StrokeRole};
use crate::error::Result;
use crate::io::{self, OutputMode};
use crate::ops::classify::GarmentClass;
use crate::ops::composite::MaskPolicy;
use crate::ops::segmentation::FileSegmentation;
use crate::ops::upload::DirectoryUpload;
use crate::settings::EngineSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Matting headless extractor.
///
/// Cut regions out of photos using brush strokes or a garment classification map.
#[derive(Parser, Debug)]
#[command(
    name = "matting",
    about = "Mask-based image extraction",
    long_about = "Extract regions of a photo into a transparent PNG, either from\n\
                  brush strokes (JSON stroke files) or from a colour-coded garment\n\
                  classification map.\n\n\
                  Example:\n  \
                  matting --input photo.png --strokes marks.json --output cutout.png\n  \
                  matting -i photo.png --classes map.png --class upper-body --white"
)]
pub struct CliArgs {
    /// Input image(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Brush stroke file (JSON) marking the region to extract.
    #[arg(long, value_name = "FILE.json")]
    pub strokes: Option<PathBuf>,

    /// Transparent-eraser stroke file applied to the result.
    #[arg(long, value_name = "FILE.json")]
    pub erase_strokes: Option<PathBuf>,

    /// How brush strokes gate the image: filter (keep marked) or preserve
    /// (keep unmarked).
    #[arg(long, default_value = "filter", value_name = "POLICY")]
    pub policy: String,

    /// Garment classification map for the input (same framing, any size).
    #[arg(long, value_name = "MAP.png")]
    pub classes: Option<PathBuf>,

    /// Select the garment under this surface point, as "X,Y".
    #[arg(long, value_name = "X,Y", conflicts_with = "class")]
    pub click: Option<String>,

    /// Select a garment class by name: upper-body, lower-body, dress.
    #[arg(long, value_name = "NAME")]
    pub class: Option<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Flatten the result onto white instead of keeping transparency.
    #[arg(long)]
    pub white: bool,

    /// Publish each result into this directory and print its URL.
    #[arg(long, value_name = "DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Settings file to use instead of the per-user one.
    #[arg(long, value_name = "FILE.cfg")]
    pub settings: Option<PathBuf>,

    /// Write the effective settings back to the settings file (repaired
    /// values and newly added keys included).
    #[arg(long)]
    pub save_settings: bool,

    /// Echo the log to stderr and print per-file timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    pub fn load_settings(&self) -> EngineSettings {
        match &self.settings {
            Some(path) => EngineSettings::load_from(path),
            None => EngineSettings::load(),
        }
    }

    /// Persist `settings` where [`load_settings`](Self::load_settings) reads them.
    pub fn store_settings(&self, settings: &EngineSettings) {
        match &self.settings {
            Some(path) => {
                if let Err(e) = settings.save_to(path) {
                    log::warn!("could not save settings to {}: {}", path.display(), e);
                }
            }
            None => settings.save(),
        }
    }
}

/// How a classification map is turned into a selection.
#[derive(Clone, Copy, Debug, PartialEq)]
enum ClassTarget {
    Click(Point),
    Class(GarmentClass),
}

/// Everything parsed once and applied to every input.
struct Job {
    strokes: Option<Vec<StrokeEvent>>,
    erase_strokes: Option<Vec<StrokeEvent>>,
    policy: MaskPolicy,
    classes: Option<(PathBuf, ClassTarget)>,
    output_mode: OutputMode,
    upload_dir: Option<PathBuf>,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs, settings: EngineSettings) -> ExitCode {
    if args.save_settings {
        args.store_settings(&settings);
    }

    let job = match build_job(&args, &settings) {
        Ok(job) => job,
        Err(msg) => {
            eprintln!("error: {}", msg);
            return ExitCode::FAILURE;
        }
    };

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    for dir in [args.output_dir.as_ref(), job.upload_dir.as_ref()].into_iter().flatten() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("error: could not create directory '{}': {}", dir.display(), e);
            return ExitCode::FAILURE;
        }
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let file_start = Instant::now();

        let Some(output_path) =
            build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref())
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, &job, &settings) {
            Ok(url) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
                if let Some(url) = url {
                    println!("  uploaded {}", url);
                }
            }
            Err(e) => {
                log::error!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn build_job(args: &CliArgs, settings: &EngineSettings) -> std::result::Result<Job, String> {
    let policy = MaskPolicy::parse(&args.policy)
        .ok_or_else(|| format!("unknown policy '{}' (expected filter or preserve)", args.policy))?;

    let read_strokes = |path: &PathBuf| {
        io::load_strokes(path).map_err(|e| format!("could not read '{}': {}", path.display(), e))
    };
    let strokes = args.strokes.as_ref().map(read_strokes).transpose()?;
    let erase_strokes = args.erase_strokes.as_ref().map(read_strokes).transpose()?;

    let target = match (&args.click, &args.class) {
        (Some(click), _) => Some(ClassTarget::Click(parse_point(click)?)),
        (None, Some(name)) => Some(ClassTarget::Class(
            GarmentClass::parse(name).ok_or_else(|| format!("unknown garment class '{}'", name))?,
        )),
        (None, None) => None,
    };
    let classes = match (&args.classes, target) {
        (Some(map), Some(target)) => Some((map.clone(), target)),
        (Some(_), None) => return Err("--classes needs --click X,Y or --class NAME".into()),
        (None, Some(_)) => return Err("--click and --class need a --classes map".into()),
        (None, None) => None,
    };

    if strokes.is_none() && classes.is_none() {
        return Err("nothing to extract: give --strokes or --classes".into());
    }

    let output_mode = if args.white {
        OutputMode::WhiteBackground
    } else {
        settings.output_mode
    };
    let upload_dir = args.upload_dir.clone().or_else(|| {
        (!settings.upload_dir.is_empty()).then(|| PathBuf::from(&settings.upload_dir))
    });

    Ok(Job {
        strokes,
        erase_strokes,
        policy,
        classes,
        output_mode,
        upload_dir,
    })
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

/// Returns the upload URL when an upload directory is configured.
fn run_one(
    input: &Path,
    output: &Path,
    job: &Job,
    settings: &EngineSettings,
) -> Result<Option<String>> {
    // -- Step 1: Load ----------------------------------------------------
    let mut session = MattingSession::new(settings.clone());
    session.load_source(io::load_rgba(input)?)?;

    // -- Step 2: Classification selection (optional) ---------------------
    if let Some((map_path, target)) = &job.classes {
        let service = FileSegmentation::new(map_path);
        pollster::block_on(session.run_segmentation(&service))?;
        if let Some(histogram) = session.class_histogram() {
            log::debug!("class histogram: {:?}", histogram);
        }
        match *target {
            ClassTarget::Click(point) => {
                session.set_mode(DrawMode::ClassificationClick)?;
                let class = session.click_select(point)?;
                log::info!("clicked {} at ({}, {})", class, point.x, point.y);
            }
            ClassTarget::Class(class) => {
                session.select_class(class)?;
            }
        }
    }

    // -- Step 3: Brush strokes (optional) --------------------------------
    if let Some(strokes) = &job.strokes {
        session.set_mode(DrawMode::BrushAdd)?;
        for event in strokes {
            session.commit_stroke(event.clone())?;
        }
        match job.policy {
            MaskPolicy::Filter => session.extract()?,
            MaskPolicy::Preserve => session.apply_mask(MaskPolicy::Preserve)?,
        };
    }

    // -- Step 4: Transparent eraser (optional) ---------------------------
    if let Some(strokes) = &job.erase_strokes {
        session.set_mode(DrawMode::TransparentErase)?;
        for event in strokes {
            session.commit_stroke(StrokeEvent {
                role: Some(StrokeRole::TransparentErase),
                ..event.clone()
            })?;
        }
        session.apply_transparent_erase()?;
    }

    log::debug!("surface history: {:?}", session.history().object_history());

    // -- Step 5: Save / publish ------------------------------------------
    let image = session.export_image(job.output_mode)?;
    io::write_png(image.pixels(), output)?;

    match &job.upload_dir {
        Some(dir) => {
            let uploader = DirectoryUpload::new(dir);
            Ok(Some(pollster::block_on(session.upload_current(&uploader))?))
        }
        None => Ok(None),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse "X,Y" into a surface point.
fn parse_point(s: &str) -> std::result::Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got '{}'", s))?;
    let coord = |v: &str| {
        v.trim()
            .parse::<f32>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| format!("'{}' is not a coordinate", v.trim()))
    };
    Ok(Point::new(coord(x)?, coord(y)?))
}

/// Every input path, in first-seen order and without repeats.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    patterns
        .iter()
        .flat_map(|pattern| expand_pattern(pattern))
        .fold(Vec::new(), |mut seen, path| {
            if !seen.contains(&path) {
                seen.push(path);
            }
            seen
        })
}

/// An existing file is taken literally; anything else is a glob.
fn expand_pattern(pattern: &str) -> Vec<PathBuf> {
    let literal = PathBuf::from(pattern);
    if literal.exists() {
        return vec![literal];
    }
    let matches: Vec<PathBuf> = match glob::glob(pattern) {
        Ok(paths) => paths
            .filter_map(|entry| {
                entry
                    .map_err(|e| log::warn!("skipping unreadable match: {}", e))
                    .ok()
            })
            .collect(),
        Err(e) => {
            log::warn!("invalid glob '{}': {}", pattern, e);
            return Vec::new();
        }
    };
    if matches.is_empty() {
        log::warn!("pattern '{}' matched no files", pattern);
    }
    matches
}

/// Compute the PNG output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: next to the input as `<stem>_cutout.png`
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.png", stem)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    Some(parent.join(format!("{}_cutout.png", stem)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["matting", "-i", "photo.png"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("10, 20.5").unwrap(), Point::new(10.0, 20.5));
        assert!(parse_point("10").is_err());
        assert!(parse_point("a,b").is_err());
        assert!(parse_point("inf,1").is_err());
    }

    #[test]
    fn test_output_path_priority() {
        let input = Path::new("shots/photo.jpg");
        assert_eq!(
            build_output_path(input, Some(Path::new("x.png")), Some(Path::new("out"))),
            Some(PathBuf::from("x.png"))
        );
        assert_eq!(
            build_output_path(input, None, Some(Path::new("out"))),
            Some(PathBuf::from("out/photo.png"))
        );
        assert_eq!(
            build_output_path(input, None, None),
            Some(PathBuf::from("shots/photo_cutout.png"))
        );
    }

    #[test]
    fn test_job_requires_work() {
        let settings = EngineSettings::default();
        assert!(build_job(&args(&[]), &settings).is_err());
        assert!(build_job(&args(&["--classes", "map.png"]), &settings).is_err());
        assert!(build_job(&args(&["--class", "dress"]), &settings).is_err());
        assert!(build_job(&args(&["--classes", "m.png", "--class", "cape"]), &settings).is_err());

        let job = build_job(
            &args(&["--classes", "m.png", "--click", "3,4", "--white"]),
            &settings,
        )
        .unwrap();
        assert_eq!(
            job.classes.map(|(_, t)| t),
            Some(ClassTarget::Click(Point::new(3.0, 4.0)))
        );
        assert_eq!(job.output_mode, OutputMode::WhiteBackground);
        assert!(job.upload_dir.is_none());
    }

    #[test]
    fn test_job_reads_stroke_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marks.json");
        std::fs::write(&path, r#"{"strokes": [{"path": [["M", 1, 1], ["L", 5, 5]]}]}"#).unwrap();
        let settings = EngineSettings {
            upload_dir: "uploads".into(),
            ..Default::default()
        };
        let job = build_job(
            &args(&["--strokes", path.to_str().unwrap(), "--policy", "preserve"]),
            &settings,
        )
        .unwrap();
        assert_eq!(job.strokes.map(|s| s.len()), Some(1));
        assert_eq!(job.policy, MaskPolicy::Preserve);
        assert_eq!(job.upload_dir, Some(PathBuf::from("uploads")));

        let missing = dir.path().join("absent.json");
        assert!(build_job(&args(&["--strokes", missing.to_str().unwrap()]), &settings).is_err());
    }

    #[test]
    fn test_resolve_inputs_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        std::fs::write(&a, b"x").unwrap();
        let literal = a.to_string_lossy().into_owned();
        let pattern = dir.path().join("*.png").to_string_lossy().into_owned();
        let found = resolve_inputs(&[literal.clone(), literal, pattern]);
        assert_eq!(found, vec![a]);
    }

    #[test]
    fn test_unmatched_and_invalid_patterns_yield_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.jpg");
        std::fs::write(&b, b"x").unwrap();
        let nothing = dir.path().join("*.tiff").to_string_lossy().into_owned();
        assert!(expand_pattern(&nothing).is_empty());
        assert!(expand_pattern("[unclosed").is_empty());

        let jpgs = dir.path().join("*.jpg").to_string_lossy().into_owned();
        assert_eq!(resolve_inputs(&[nothing, jpgs]), vec![b]);
    }

    #[test]
    fn test_save_settings_writes_the_chosen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.cfg");
        let cli = args(&["--settings", path.to_str().unwrap(), "--save-settings"]);
        assert!(cli.save_settings);

        let settings = EngineSettings {
            brush_size: 33.0,
            ..cli.load_settings()
        };
        cli.store_settings(&settings);
        assert!(path.exists());
        assert_eq!(cli.load_settings().brush_size, 33.0);
    }
}
