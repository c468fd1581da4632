use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::layout::DisplayMode;
use crate::prefetch::MAX_PREFETCH_RADIUS;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "foliocanvas";

/// Tunables for the viewer. The numeric defaults are empirical and may need
/// re-tuning for a page provider with a different latency profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerSettings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub default_mode: DisplayMode,

    // Cache
    #[serde(default = "default_page_cache_size")]
    pub page_cache_size: usize,
    /// A cached image satisfies a request when `cached >= target * tolerance`
    #[serde(default = "default_quality_tolerance")]
    pub quality_tolerance: f64,
    #[serde(default = "default_min_fetch_scale")]
    pub min_fetch_scale: f64,
    #[serde(default = "default_max_fetch_scale")]
    pub max_fetch_scale: f64,
    #[serde(default = "default_one")]
    pub device_pixel_ratio: f64,

    // Rendering
    #[serde(default = "default_batch_size")]
    pub render_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub prefetch_batch_size: usize,
    /// Prefetch rings around the current page. Capped at
    /// [`MAX_PREFETCH_RADIUS`], the last ring with its own priority.
    #[serde(default = "default_prefetch_radius")]
    pub prefetch_radius: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_true")]
    pub load_text_layer: bool,

    // Virtualization, canvas units at 100% zoom
    #[serde(default = "default_create_buffer")]
    pub create_buffer: f64,
    #[serde(default = "default_keep_buffer")]
    pub keep_buffer: f64,

    // Layout
    #[serde(default = "default_base_page_width")]
    pub base_page_width: f64,
    #[serde(default = "default_base_page_height")]
    pub base_page_height: f64,
    #[serde(default = "default_page_gap")]
    pub page_gap: f64,
    /// Screen pixels kept free around fitted content
    #[serde(default = "default_viewport_padding")]
    pub viewport_padding: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_pages_per_row: Option<usize>,

    // Zoom
    #[serde(default = "default_min_zoom")]
    pub min_zoom: f64,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: f64,
    #[serde(default = "default_zoom_step")]
    pub zoom_step: f64,
    #[serde(default = "default_wheel_zoom_sensitivity")]
    pub wheel_zoom_sensitivity: f64,

    // Gestures
    #[serde(default = "default_inertia_decay")]
    pub inertia_decay: f64,
    /// px/ms
    #[serde(default = "default_fling_threshold")]
    pub fling_threshold: f64,
    /// px/ms
    #[serde(default = "default_min_inertia_velocity")]
    pub min_inertia_velocity: f64,
    #[serde(default = "default_wheel_idle_ms")]
    pub wheel_idle_ms: u64,
    #[serde(default = "default_focus_animation_ms")]
    pub focus_animation_ms: u64,
    #[serde(default = "default_keyboard_pan_step")]
    pub keyboard_pan_step: f64,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_page_cache_size() -> usize {
    120
}

fn default_quality_tolerance() -> f64 {
    0.8
}

fn default_min_fetch_scale() -> f64 {
    1.5
}

fn default_max_fetch_scale() -> f64 {
    4.0
}

fn default_batch_size() -> usize {
    4
}

fn default_prefetch_radius() -> usize {
    2
}

fn default_workers() -> usize {
    2
}

fn default_create_buffer() -> f64 {
    200.0
}

fn default_keep_buffer() -> f64 {
    500.0
}

fn default_base_page_width() -> f64 {
    400.0
}

fn default_base_page_height() -> f64 {
    518.0
}

fn default_page_gap() -> f64 {
    20.0
}

fn default_viewport_padding() -> f64 {
    24.0
}

fn default_min_zoom() -> f64 {
    0.1
}

fn default_max_zoom() -> f64 {
    5.0
}

fn default_zoom_step() -> f64 {
    1.2
}

fn default_wheel_zoom_sensitivity() -> f64 {
    0.01
}

fn default_inertia_decay() -> f64 {
    0.92
}

fn default_fling_threshold() -> f64 {
    0.3
}

fn default_min_inertia_velocity() -> f64 {
    0.02
}

fn default_wheel_idle_ms() -> u64 {
    60
}

fn default_focus_animation_ms() -> u64 {
    300
}

fn default_keyboard_pan_step() -> f64 {
    60.0
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            default_mode: DisplayMode::default(),
            page_cache_size: default_page_cache_size(),
            quality_tolerance: default_quality_tolerance(),
            min_fetch_scale: default_min_fetch_scale(),
            max_fetch_scale: default_max_fetch_scale(),
            device_pixel_ratio: default_one(),
            render_batch_size: default_batch_size(),
            prefetch_batch_size: default_batch_size(),
            prefetch_radius: default_prefetch_radius(),
            workers: default_workers(),
            load_text_layer: true,
            create_buffer: default_create_buffer(),
            keep_buffer: default_keep_buffer(),
            base_page_width: default_base_page_width(),
            base_page_height: default_base_page_height(),
            page_gap: default_page_gap(),
            viewport_padding: default_viewport_padding(),
            canvas_pages_per_row: None,
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            zoom_step: default_zoom_step(),
            wheel_zoom_sensitivity: default_wheel_zoom_sensitivity(),
            inertia_decay: default_inertia_decay(),
            fling_threshold: default_fling_threshold(),
            min_inertia_velocity: default_min_inertia_velocity(),
            wheel_idle_ms: default_wheel_idle_ms(),
            focus_animation_ms: default_focus_animation_ms(),
            keyboard_pan_step: default_keyboard_pan_step(),
        }
    }
}

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from `path`, or from the default config location when
/// `path` is `None`. Falls back to defaults on any failure.
pub fn load_settings(path: Option<&Path>) -> ViewerSettings {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match preferred_config_path() {
            Some(p) => p,
            None => {
                warn!("Could not determine config directory, using default settings");
                return ViewerSettings::default();
            }
        },
    };

    if !path.exists() {
        info!("Settings file not found at {path:?}, using defaults");
        return ViewerSettings::default();
    }

    load_settings_from_path(&path).unwrap_or_default()
}

fn load_settings_from_path(path: &Path) -> Option<ViewerSettings> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<ViewerSettings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }
                Some(settings.sanitized())
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                None
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
            None
        }
    }
}

fn migrate_settings(settings: &mut ViewerSettings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &ViewerSettings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let body = match serde_yaml::to_string(settings) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to serialize settings: {e}");
            return;
        }
    };
    let content = format!("{SETTINGS_HEADER}{body}");

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# foliocanvas settings
# ============================================================================
# Buffers and page sizes are canvas units at 100% zoom.
# Velocities are screen pixels per millisecond.

"#;

impl ViewerSettings {
    /// Repair values that would break the camera or cache invariants
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = ViewerSettings::default();
        if !(self.min_zoom > 0.0) {
            warn!("min_zoom {} is not positive, using default", self.min_zoom);
            self.min_zoom = defaults.min_zoom;
        }
        if !(self.max_zoom >= self.min_zoom) {
            warn!(
                "max_zoom {} is below min_zoom {}, using min_zoom",
                self.max_zoom, self.min_zoom
            );
            self.max_zoom = self.min_zoom;
        }
        if !(self.zoom_step > 1.0) {
            self.zoom_step = defaults.zoom_step;
        }
        if !(self.base_page_width > 0.0) || !(self.base_page_height > 0.0) {
            self.base_page_width = defaults.base_page_width;
            self.base_page_height = defaults.base_page_height;
        }
        if self.keep_buffer < self.create_buffer {
            self.keep_buffer = self.create_buffer;
        }
        if !(0.0..1.0).contains(&self.inertia_decay) {
            self.inertia_decay = defaults.inertia_decay;
        }
        self.page_cache_size = self.page_cache_size.max(1);
        self.render_batch_size = self.render_batch_size.max(1);
        self.workers = self.workers.max(1);
        if self.prefetch_radius > MAX_PREFETCH_RADIUS {
            warn!(
                "prefetch_radius {} above {MAX_PREFETCH_RADIUS}, capping",
                self.prefetch_radius
            );
            self.prefetch_radius = MAX_PREFETCH_RADIUS;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(Some(&dir.path().join("nope.yaml")));
        assert_eq!(settings, ViewerSettings::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "version: 1\ndefault_mode: auto-grid\npage_cache_size: 10\n",
        )
        .unwrap();

        let settings = load_settings(Some(&path));
        assert_eq!(settings.default_mode, DisplayMode::AutoGrid);
        assert_eq!(settings.page_cache_size, 10);
        assert_eq!(settings.quality_tolerance, 0.8);
    }

    #[test]
    fn broken_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "page_cache_size: [oops").unwrap();
        assert_eq!(load_settings(Some(&path)), ViewerSettings::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let settings = ViewerSettings {
            default_mode: DisplayMode::Canvas,
            canvas_pages_per_row: Some(7),
            ..ViewerSettings::default()
        };
        save_settings_to_file(&settings, &path);
        assert_eq!(load_settings(Some(&path)), settings);
    }

    #[test]
    fn old_version_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 0\n").unwrap();
        let settings = load_settings(Some(&path));
        assert_eq!(settings.version, CURRENT_VERSION);
        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.contains("version: 1"));
    }

    #[test]
    fn sanitize_repairs_zoom_range() {
        let settings = ViewerSettings {
            min_zoom: -1.0,
            max_zoom: 0.01,
            keep_buffer: 10.0,
            ..ViewerSettings::default()
        }
        .sanitized();
        assert_eq!(settings.min_zoom, 0.1);
        assert_eq!(settings.max_zoom, 0.1);
        assert_eq!(settings.keep_buffer, settings.create_buffer);
    }

    #[test]
    fn prefetch_radius_is_capped() {
        let settings = ViewerSettings {
            prefetch_radius: 9,
            ..ViewerSettings::default()
        }
        .sanitized();
        assert_eq!(settings.prefetch_radius, MAX_PREFETCH_RADIUS);
    }
}
