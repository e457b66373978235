//! Application Configuration
//!
//! Scan tunables, recognition engine and display layout settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::capture::Resolution;
use crate::error::ScanError;
use crate::overlay::{DisplayRect, ViewportLayout};
use crate::vision::RoiFilter;

/// Lowest accepted confidence threshold
pub const MIN_CONFIDENCE_THRESHOLD: u8 = 1;
/// Highest accepted confidence threshold
pub const MAX_CONFIDENCE_THRESHOLD: u8 = 100;

/// Worker cap on phones and tablets
const MOBILE_WORKER_CAP: usize = 1;
/// Worker cap everywhere else
const DESKTOP_WORKER_CAP: usize = 3;
/// Assumed core count when the platform cannot tell
const FALLBACK_CORES: usize = 2;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scan tunables
    pub scan: ScanSettings,
    /// Recognition engine settings
    pub engine: EngineSettings,
    /// Display layout settings
    pub display: DisplaySettings,
}

/// Scan tunables owned by the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Requested capture resolution, or the device default
    pub resolution: Option<Resolution>,
    /// Capture device identifier, or the default device
    pub camera_id: Option<String>,
    /// Visual filter applied before cropping
    pub filter: RoiFilter,
    /// Process every Nth display frame (>= 1)
    pub frame_skip: u32,
    /// Upper bound on recognition passes per second (> 0)
    pub frequency_hz: f64,
    /// Minimum averaged confidence to accept text (1-100)
    pub confidence_threshold: u8,
    /// Number of recognition workers (>= 1)
    pub worker_count: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            resolution: None,
            camera_id: None,
            filter: RoiFilter::None,
            frame_skip: 1,
            frequency_hz: 1.0,
            confidence_threshold: 60,
            worker_count: detect_worker_cap(),
        }
    }
}

impl ScanSettings {
    /// Set the frame skip; zero is rejected and the prior value kept
    pub fn set_frame_skip(&mut self, frame_skip: u32) -> Result<(), ScanError> {
        if frame_skip == 0 {
            return Err(ScanError::config("frame skip must be at least 1"));
        }
        self.frame_skip = frame_skip;
        Ok(())
    }

    /// Set the recognition frequency; non-positive or non-finite values are rejected
    pub fn set_frequency_hz(&mut self, frequency_hz: f64) -> Result<(), ScanError> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(ScanError::config(format!(
                "frequency must be a positive number of Hz, got {}",
                frequency_hz
            )));
        }
        self.frequency_hz = frequency_hz;
        Ok(())
    }

    /// Set the confidence threshold, clamping out-of-range input. Returns the stored value.
    pub fn set_confidence_threshold(&mut self, threshold: i64) -> u8 {
        let clamped = threshold.clamp(
            MIN_CONFIDENCE_THRESHOLD as i64,
            MAX_CONFIDENCE_THRESHOLD as i64,
        ) as u8;
        if clamped as i64 != threshold {
            warn!(
                "Confidence threshold {} out of range, clamped to {}",
                threshold, clamped
            );
        }
        self.confidence_threshold = clamped;
        clamped
    }

    /// Set the worker count; must lie in `1..=cap`
    pub fn set_worker_count(&mut self, worker_count: usize, cap: usize) -> Result<(), ScanError> {
        if worker_count == 0 || worker_count > cap {
            return Err(ScanError::config(format!(
                "worker count must be between 1 and {}, got {}",
                cap, worker_count
            )));
        }
        self.worker_count = worker_count;
        Ok(())
    }

    /// Check every field, clamping the confidence threshold and rejecting anything else out of range
    pub fn validated(mut self, worker_cap: usize) -> Result<Self, ScanError> {
        let threshold = self.confidence_threshold as i64;
        self.set_confidence_threshold(threshold);
        let frame_skip = self.frame_skip;
        self.set_frame_skip(frame_skip)?;
        let frequency_hz = self.frequency_hz;
        self.set_frequency_hz(frequency_hz)?;
        let worker_count = self.worker_count;
        self.set_worker_count(worker_count, worker_cap)?;
        Ok(self)
    }

    /// Recognition passes per second actually achievable at the given display rate
    pub fn effective_frequency_hz(&self, display_rate_hz: f64) -> f64 {
        let frame_based = display_rate_hz / self.frame_skip.max(1) as f64;
        frame_based.min(self.frequency_hz)
    }
}

/// Recognition engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Recognition language passed to every engine instance
    pub language: String,
    /// Path to the tesseract executable
    pub tesseract_path: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            tesseract_path: PathBuf::from("tesseract"),
        }
    }
}

/// Display layout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Refresh rate driving the scan scheduler
    pub refresh_rate_hz: f64,
    /// Where the video is drawn, in display coordinates
    pub video: DisplayRect,
    /// Where the ROI overlay is drawn, in display coordinates
    pub overlay: DisplayRect,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 60.0,
            video: DisplayRect::new(0.0, 0.0, 1280.0, 720.0),
            overlay: DisplayRect::new(440.0, 310.0, 400.0, 100.0),
        }
    }
}

impl DisplaySettings {
    pub fn layout(&self) -> ViewportLayout {
        ViewportLayout {
            overlay: self.overlay,
            video: self.video,
        }
    }
}

/// Class of device the scanner runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Desktop,
}

impl DeviceClass {
    /// Device class of the current build target
    pub fn current() -> Self {
        if cfg!(any(target_os = "android", target_os = "ios")) {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }
}

/// Maximum worker count for a device class with the given number of cores
pub fn hardware_worker_cap(class: DeviceClass, cores: usize) -> usize {
    let cap = match class {
        DeviceClass::Mobile => MOBILE_WORKER_CAP,
        DeviceClass::Desktop => DESKTOP_WORKER_CAP,
    };
    cores.clamp(1, cap)
}

/// Maximum worker count on this machine
pub fn detect_worker_cap() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_CORES);
    hardware_worker_cap(DeviceClass::current(), cores)
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    info!("Saved configuration to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        // Check scan defaults
        assert!(config.scan.resolution.is_none());
        assert!(config.scan.camera_id.is_none());
        assert_eq!(config.scan.filter, RoiFilter::None);
        assert_eq!(config.scan.frame_skip, 1);
        assert!((config.scan.frequency_hz - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.scan.confidence_threshold, 60);
        assert!(config.scan.worker_count >= 1 && config.scan.worker_count <= 3);

        // Check engine defaults
        assert_eq!(config.engine.language, "eng");

        // Check display defaults
        assert!((config.display.refresh_rate_hz - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.scan.resolution = Some(Resolution::new(1280, 720));
        config.scan.camera_id = Some("rear".to_string());
        config.scan.filter = RoiFilter::Contrast;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.scan, parsed.scan);
        assert_eq!(config.engine.language, parsed.engine.language);
        assert_eq!(config.display.overlay, parsed.display.overlay);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[scan]\nframe_skip = 4\nfilter = \"grayscale\"\n").unwrap();

        assert_eq!(parsed.scan.frame_skip, 4);
        assert_eq!(parsed.scan.filter, RoiFilter::Grayscale);
        assert_eq!(parsed.scan.confidence_threshold, 60);
        assert_eq!(parsed.engine.language, "eng");
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.scan, loaded.scan);
    }

    #[test]
    fn test_save_config_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh").join("config.toml");

        save_config(&AppConfig::default(), &path).unwrap();

        assert!(path.exists());
        assert_eq!(load_config(&path).unwrap().scan, AppConfig::default().scan);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_confidence_threshold_is_clamped() {
        let mut settings = ScanSettings::default();

        assert_eq!(settings.set_confidence_threshold(0), 1);
        assert_eq!(settings.confidence_threshold, 1);
        assert_eq!(settings.set_confidence_threshold(250), 100);
        assert_eq!(settings.set_confidence_threshold(-7), 1);
        assert_eq!(settings.set_confidence_threshold(75), 75);
    }

    #[test]
    fn test_invalid_updates_keep_prior_value() {
        let mut settings = ScanSettings::default();
        settings.set_frame_skip(3).unwrap();
        settings.set_frequency_hz(2.0).unwrap();
        settings.set_worker_count(2, 3).unwrap();

        assert!(settings.set_frame_skip(0).is_err());
        assert!(settings.set_frequency_hz(0.0).is_err());
        assert!(settings.set_frequency_hz(-1.0).is_err());
        assert!(settings.set_frequency_hz(f64::NAN).is_err());
        assert!(settings.set_worker_count(0, 3).is_err());
        assert!(settings.set_worker_count(4, 3).is_err());

        assert_eq!(settings.frame_skip, 3);
        assert!((settings.frequency_hz - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.worker_count, 2);
    }

    #[test]
    fn test_validated_clamps_threshold_and_rejects_rest() {
        let settings = ScanSettings {
            confidence_threshold: 200,
            worker_count: 1,
            ..ScanSettings::default()
        };
        let settings = settings.validated(3).unwrap();
        assert_eq!(settings.confidence_threshold, 100);

        let bad = ScanSettings {
            frame_skip: 0,
            worker_count: 1,
            ..ScanSettings::default()
        };
        assert!(bad.validated(3).is_err());
    }

    #[test]
    fn test_effective_frequency() {
        let mut settings = ScanSettings::default();
        settings.set_frame_skip(30).unwrap();
        settings.set_frequency_hz(5.0).unwrap();
        // 60 / 30 = 2 Hz is the binding limit
        assert!((settings.effective_frequency_hz(60.0) - 2.0).abs() < 1e-9);

        settings.set_frame_skip(1).unwrap();
        settings.set_frequency_hz(0.5).unwrap();
        assert!((settings.effective_frequency_hz(60.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_hardware_worker_cap() {
        assert_eq!(hardware_worker_cap(DeviceClass::Mobile, 8), 1);
        assert_eq!(hardware_worker_cap(DeviceClass::Desktop, 8), 3);
        assert_eq!(hardware_worker_cap(DeviceClass::Desktop, 2), 2);
        assert_eq!(hardware_worker_cap(DeviceClass::Desktop, 0), 1);
    }
}
