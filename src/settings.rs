use std::path::{Path, PathBuf};

use crate::io::OutputMode;

/// Engine configuration, persisted as a `key=value` file.
///
/// Unknown keys are ignored and unparsable values fall back to their
/// defaults, so an old or hand-edited file never prevents start-up.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Drawing surface size new images are fitted into.
    pub surface_width: u32,
    pub surface_height: u32,
    /// Default brush width in surface pixels, and the range it is clamped to.
    pub brush_size: f32,
    pub brush_min: f32,
    pub brush_max: f32,
    pub zoom_min: f32,
    pub zoom_max: f32,
    /// Wheel zoom multiplies by `wheel_zoom_base ^ delta_y`.
    pub wheel_zoom_base: f32,
    pub max_undo_steps: usize,
    /// Memory budget for the image undo stack; 0 keeps every state.
    pub max_image_history_mb: usize,
    pub output_mode: OutputMode,
    /// Directory used by the local upload service; empty disables uploads.
    pub upload_dir: String,
    pub log_level: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            surface_width: 800,
            surface_height: 600,
            brush_size: 10.0,
            brush_min: 1.0,
            brush_max: 50.0,
            zoom_min: 0.5,
            zoom_max: 10.0,
            wheel_zoom_base: 0.999,
            max_undo_steps: 50,
            max_image_history_mb: 0,
            output_mode: OutputMode::Transparent,
            upload_dir: String::new(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/matting/matting_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Matting\matting_settings.cfg
    /// On macOS:   ~/Library/Application Support/Matting/matting_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("matting");
            return Some(config_dir.join("matting_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("Matting").join("matting_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("Matting")
                    .join("matting_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("matting_settings.cfg")))
        }
    }

    pub fn max_image_history_bytes(&self) -> Option<usize> {
        (self.max_image_history_mb > 0).then(|| self.max_image_history_mb.saturating_mul(1024 * 1024))
    }

    /// Clamp to `[brush_min, brush_max]`. Uses `max`/`min` so unusual
    /// bounds never panic.
    pub fn clamp_brush(&self, size: f32) -> f32 {
        size.max(self.brush_min).min(self.brush_max.max(self.brush_min))
    }

    /// Replace unusable numbers with defaults and order min/max pairs.
    pub fn normalized(mut self) -> Self {
        let d = Self::default();
        let positive = |v: f32, fallback: f32| if v.is_finite() && v > 0.0 { v } else { fallback };

        self.surface_width = if self.surface_width > 0 { self.surface_width } else { d.surface_width };
        self.surface_height = if self.surface_height > 0 { self.surface_height } else { d.surface_height };
        self.brush_min = positive(self.brush_min, d.brush_min);
        self.brush_max = positive(self.brush_max, d.brush_max);
        if self.brush_min > self.brush_max {
            std::mem::swap(&mut self.brush_min, &mut self.brush_max);
        }
        self.brush_size = positive(self.brush_size, d.brush_size);
        self.zoom_min = positive(self.zoom_min, d.zoom_min);
        self.zoom_max = positive(self.zoom_max, d.zoom_max);
        if self.zoom_min > self.zoom_max {
            std::mem::swap(&mut self.zoom_min, &mut self.zoom_max);
        }
        self.wheel_zoom_base = positive(self.wheel_zoom_base, d.wheel_zoom_base);
        self
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "surface_width={}\n\
             surface_height={}\n\
             brush_size={}\n\
             brush_min={}\n\
             brush_max={}\n\
             zoom_min={}\n\
             zoom_max={}\n\
             wheel_zoom_base={}\n\
             max_undo_steps={}\n\
             max_image_history_mb={}\n\
             output_mode={}\n\
             upload_dir={}\n\
             log_level={}\n",
            self.surface_width,
            self.surface_height,
            self.brush_size,
            self.brush_min,
            self.brush_max,
            self.zoom_min,
            self.zoom_max,
            self.wheel_zoom_base,
            self.max_undo_steps,
            self.max_image_history_mb,
            self.output_mode.name(),
            self.upload_dir,
            self.log_level,
        )
    }

    pub fn from_config_str(content: &str) -> Self {
        let d = Self::default();
        let float = |val: &str, fallback: f32| {
            val.parse::<f32>().ok().filter(|v| v.is_finite()).unwrap_or(fallback)
        };
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "surface_width" => {
                    s.surface_width = val.parse().ok().filter(|&v| v > 0).unwrap_or(d.surface_width);
                }
                "surface_height" => {
                    s.surface_height = val.parse().ok().filter(|&v| v > 0).unwrap_or(d.surface_height);
                }
                "brush_size" => s.brush_size = float(val, d.brush_size),
                "brush_min" => s.brush_min = float(val, d.brush_min),
                "brush_max" => s.brush_max = float(val, d.brush_max),
                "zoom_min" => s.zoom_min = float(val, d.zoom_min),
                "zoom_max" => s.zoom_max = float(val, d.zoom_max),
                "wheel_zoom_base" => s.wheel_zoom_base = float(val, d.wheel_zoom_base),
                "max_undo_steps" => s.max_undo_steps = val.parse().unwrap_or(d.max_undo_steps),
                "max_image_history_mb" => {
                    s.max_image_history_mb = val.parse().unwrap_or(d.max_image_history_mb);
                }
                "output_mode" => {
                    s.output_mode = OutputMode::parse(val).unwrap_or(d.output_mode);
                }
                "upload_dir" => s.upload_dir = val.to_string(),
                "log_level" => s.log_level = val.to_string(),
                _ => {}
            }
        }
        s.normalized()
    }

    /// Load settings from `path` (returns defaults if missing or unreadable).
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_config_str(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from the per-user location.
    pub fn load() -> Self {
        Self::settings_path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
    }

    /// Save settings to the per-user location.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            log::warn!("could not save settings to {}: {}", path.display(), e);
        }
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("matting_settings.cfg");
        let settings = EngineSettings {
            brush_size: 24.0,
            output_mode: OutputMode::WhiteBackground,
            upload_dir: "/tmp/uploads".into(),
            max_undo_steps: 12,
            ..Default::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(EngineSettings::load_from(&path), settings);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = EngineSettings::load_from(&dir.path().join("absent.cfg"));
        assert_eq!(loaded, EngineSettings::default());
    }

    #[test]
    fn test_corrupt_values_fall_back() {
        let s = EngineSettings::from_config_str(
            "# comment\nbrush_size=wide\nsurface_width=0\nzoom_max=4\nunknown=1\nno equals sign\n",
        );
        assert_eq!(s.brush_size, 10.0);
        assert_eq!(s.surface_width, 800);
        assert_eq!(s.zoom_max, 4.0);
    }

    #[test]
    fn test_inverted_and_non_finite_bounds_are_repaired() {
        let s = EngineSettings::from_config_str(
            "zoom_min=5\nzoom_max=2\nbrush_min=NaN\nbrush_max=-3\nwheel_zoom_base=inf\n",
        );
        assert_eq!((s.zoom_min, s.zoom_max), (2.0, 5.0));
        assert_eq!((s.brush_min, s.brush_max), (1.0, 50.0));
        assert_eq!(s.wheel_zoom_base, 0.999);

        let hand_built = EngineSettings {
            brush_min: 40.0,
            brush_max: 4.0,
            brush_size: f32::NAN,
            ..Default::default()
        }
        .normalized();
        assert_eq!((hand_built.brush_min, hand_built.brush_max), (4.0, 40.0));
        assert_eq!(hand_built.brush_size, 10.0);
    }

    #[test]
    fn test_image_history_budget_is_opt_in() {
        assert_eq!(EngineSettings::default().max_image_history_bytes(), None);
        let capped = EngineSettings::from_config_str("max_image_history_mb=2\n");
        assert_eq!(capped.max_image_history_bytes(), Some(2 * 1024 * 1024));
    }

    #[test]
    fn test_brush_clamp_and_log_level() {
        let s = EngineSettings {
            log_level: "debug".into(),
            ..Default::default()
        };
        assert_eq!(s.clamp_brush(0.2), 1.0);
        assert_eq!(s.clamp_brush(80.0), 50.0);
        assert_eq!(s.log_level_filter(), log::LevelFilter::Debug);
        let bad = EngineSettings {
            log_level: "chatty".into(),
            ..Default::default()
        };
        assert_eq!(bad.log_level_filter(), log::LevelFilter::Info);
    }
}
