use anyhow::{Context, Result};
use common::ZoneId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::surface::Rect;
use crate::validate_enum;

/// System-wide configuration file, checked before the per-user one
const SYSTEM_CONFIG_PATH: &str = "/etc/nctv-player/config.toml";

/// Resolution the built-in zone layout is designed for
const REFERENCE_WIDTH: u32 = 1920;
const REFERENCE_HEIGHT: u32 = 1080;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub display: DisplaySettings,

    #[serde(default)]
    pub optimization: OptimizationSettings,

    #[serde(default)]
    pub zone: Vec<ZoneConfig>,
}

/// General player settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub kiosk: bool,

    #[serde(default = "default_image_duration")]
    pub image_duration_ms: u64,

    #[serde(default)]
    pub audio_enabled: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            kiosk: true,
            image_duration_ms: default_image_duration(),
            audio_enabled: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_image_duration() -> u64 {
    10_000
}

/// Filesystem locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathSettings {
    #[serde(default = "default_playlist_root")]
    pub playlist_root: String,

    /// Defaults to `<runtime dir>/nctv-player.pid`
    #[serde(default)]
    pub pid_file: Option<String>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            playlist_root: default_playlist_root(),
            pid_file: None,
        }
    }
}

fn default_playlist_root() -> String {
    "/var/lib/nctv-player/playlist".to_string()
}

/// Screen settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplaySettings {
    #[serde(default = "default_target_width")]
    pub target_width: u32,

    #[serde(default = "default_target_height")]
    pub target_height: u32,

    /// Videos at least this wide are shown in overlay mode
    #[serde(default = "default_high_res_threshold")]
    pub high_res_threshold: u32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            target_width: default_target_width(),
            target_height: default_target_height(),
            high_res_threshold: default_high_res_threshold(),
        }
    }
}

fn default_target_width() -> u32 {
    REFERENCE_WIDTH
}
fn default_target_height() -> u32 {
    REFERENCE_HEIGHT
}
fn default_high_res_threshold() -> u32 {
    3800
}

/// Background transcoding settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_suffix")]
    pub suffix: String,

    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_encoder")]
    pub encoder: String,

    #[serde(default = "default_quality")]
    pub quality: u32,

    #[serde(default = "default_encoder_preset")]
    pub encoder_preset: String,

    /// Explicit transcoder executable, searched for when unset
    #[serde(default)]
    pub transcoder_path: Option<String>,

    #[serde(default = "default_cancel_timeout")]
    pub cancel_timeout_ms: u64,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            suffix: default_suffix(),
            preset: default_preset(),
            encoder: default_encoder(),
            quality: default_quality(),
            encoder_preset: default_encoder_preset(),
            transcoder_path: None,
            cancel_timeout_ms: default_cancel_timeout(),
        }
    }
}

fn default_suffix() -> String {
    "_optimized".to_string()
}
fn default_preset() -> String {
    "H.265 MKV 1080p30".to_string()
}
fn default_encoder() -> String {
    "x265".to_string()
}
fn default_quality() -> u32 {
    22
}
fn default_encoder_preset() -> String {
    "medium".to_string()
}
fn default_cancel_timeout() -> u64 {
    5000
}

/// Per-zone overrides of the built-in layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZoneConfig {
    pub name: String,

    #[serde(default)]
    pub x: Option<i32>,

    #[serde(default)]
    pub y: Option<i32>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub z_order: Option<i32>,

    #[serde(default)]
    pub image_duration_ms: Option<u64>,
}

/// Resolved placement and timing of one zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneLayout {
    pub rect: Rect,
    pub z_order: i32,
    pub image_duration: Duration,
}

impl Config {
    /// Find the configuration file to use.
    ///
    /// An explicit path always wins. Otherwise the system-wide file is used
    /// when present, then the per-user one.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref()));
        }

        let system = PathBuf::from(SYSTEM_CONFIG_PATH);
        if system.exists() {
            return Ok(system);
        }

        Self::default_config_path()
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the per-user config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("nctv-player");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;

        if self.general.image_duration_ms == 0 {
            anyhow::bail!("general.image_duration_ms must be greater than zero");
        }

        if self.optimization.suffix.is_empty() {
            anyhow::bail!("optimization.suffix must not be empty");
        }

        if self.display.target_width == 0 || self.display.target_height == 0 {
            anyhow::bail!(
                "Invalid target resolution: {}x{}",
                self.display.target_width,
                self.display.target_height
            );
        }

        for zone in &self.zone {
            if ZoneId::from_name(&zone.name).is_none() {
                anyhow::bail!(
                    "Unknown zone: {} (expected one of: background, main, horizontal, vertical)",
                    zone.name
                );
            }
            if zone.width == Some(0) || zone.height == Some(0) {
                anyhow::bail!("Zone {} has zero-sized geometry", zone.name);
            }
            if zone.image_duration_ms == Some(0) {
                anyhow::bail!("Zone {} has a zero image duration", zone.name);
            }
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    /// Playlist root with `~` expanded
    pub fn playlist_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.paths.playlist_root).as_ref())
    }

    pub fn pid_file(&self) -> PathBuf {
        match &self.paths.pid_file {
            Some(path) => PathBuf::from(shellexpand::tilde(path).as_ref()),
            None => dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("nctv-player.pid"),
        }
    }

    pub fn transcoder_path(&self) -> Option<PathBuf> {
        self.optimization
            .transcoder_path
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }

    fn zone_override(&self, zone: ZoneId) -> Option<&ZoneConfig> {
        self.zone
            .iter()
            .find(|z| ZoneId::from_name(&z.name) == Some(zone))
    }

    /// Geometry, z-order and image duration for a zone.
    ///
    /// The built-in layout is scaled from 1920x1080 to the target resolution,
    /// then any `[[zone]]` override is applied field by field.
    pub fn zone_layout(&self, zone: ZoneId) -> ZoneLayout {
        let (x, y, width, height, z_order) = match zone {
            ZoneId::Background => (0, 0, 1920, 1080, 0),
            ZoneId::Main => (0, 21, 1472, 828, 1),
            ZoneId::Horizontal => (0, 870, 1920, 189, 1),
            ZoneId::Vertical => (1472, 21, 448, 849, 1),
        };

        let sx = |v: u32| scale(v, self.display.target_width, REFERENCE_WIDTH);
        let sy = |v: u32| scale(v, self.display.target_height, REFERENCE_HEIGHT);

        let mut layout = ZoneLayout {
            rect: Rect {
                x: sx(x) as i32,
                y: sy(y) as i32,
                width: sx(width),
                height: sy(height),
            },
            z_order,
            image_duration: Duration::from_millis(self.general.image_duration_ms),
        };

        if let Some(over) = self.zone_override(zone) {
            if let Some(x) = over.x {
                layout.rect.x = x;
            }
            if let Some(y) = over.y {
                layout.rect.y = y;
            }
            if let Some(width) = over.width {
                layout.rect.width = width;
            }
            if let Some(height) = over.height {
                layout.rect.height = height;
            }
            if let Some(z) = over.z_order {
                layout.z_order = z;
            }
            if let Some(ms) = over.image_duration_ms {
                layout.image_duration = Duration::from_millis(ms);
            }
        }

        layout
    }
}

fn scale(value: u32, target: u32, reference: u32) -> u32 {
    (u64::from(value) * u64::from(target) / u64::from(reference)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert!(config.general.kiosk);
        assert!(!config.general.audio_enabled);
        assert_eq!(config.general.image_duration_ms, 10_000);
        assert_eq!(config.optimization.suffix, "_optimized");
        assert_eq!(config.optimization.preset, "H.265 MKV 1080p30");
        assert_eq!(config.display.high_res_threshold, 3800);
        assert_eq!(
            config.playlist_root(),
            PathBuf::from("/var/lib/nctv-player/playlist")
        );
    }

    #[test]
    fn test_default_layout() {
        let config = Config::default();

        let main = config.zone_layout(ZoneId::Main);
        assert_eq!(
            main.rect,
            Rect {
                x: 0,
                y: 21,
                width: 1472,
                height: 828
            }
        );
        assert_eq!(main.z_order, 1);

        let background = config.zone_layout(ZoneId::Background);
        assert_eq!(background.z_order, 0);
        assert_eq!(background.rect.width, 1920);
    }

    #[test]
    fn test_layout_scales_to_target() {
        let mut config = Config::default();
        config.display.target_width = 3840;
        config.display.target_height = 2160;

        let vertical = config.zone_layout(ZoneId::Vertical);
        assert_eq!(
            vertical.rect,
            Rect {
                x: 2944,
                y: 42,
                width: 896,
                height: 1698
            }
        );
    }

    #[test]
    fn test_zone_overrides() {
        let toml = r#"
[general]
image_duration_ms = 4000

[[zone]]
name = "horizontal"
height = 200
z_order = 2

[[zone]]
name = "main"
image_duration_ms = 2500
"#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        let horizontal = config.zone_layout(ZoneId::Horizontal);
        assert_eq!(horizontal.rect.height, 200);
        assert_eq!(horizontal.rect.y, 870);
        assert_eq!(horizontal.z_order, 2);
        assert_eq!(horizontal.image_duration, Duration::from_millis(4000));

        let main = config.zone_layout(ZoneId::Main);
        assert_eq!(main.image_duration, Duration::from_millis(2500));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad = [
            "[general]\nlog_level = \"loud\"",
            "[general]\nimage_duration_ms = 0",
            "[optimization]\nsuffix = \"\"",
            "[[zone]]\nname = \"sidebar\"",
            "[[zone]]\nname = \"main\"\nwidth = 0",
        ];

        for contents in bad {
            let config: Config = toml::from_str(contents).unwrap();
            assert!(config.validate().is_err(), "accepted: {contents}");
        }
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.general.image_duration_ms, 10_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[paths]\nplaylist_root = \"/srv/signage\"\n\n[optimization]\nenabled = false\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.playlist_root(), PathBuf::from("/srv/signage"));
        assert!(!config.optimization.enabled);
        assert_eq!(config.optimization.quality, 22);
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Config::locate(Some(Path::new("/tmp/custom.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom.toml"));
    }
}
