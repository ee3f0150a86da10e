use anyhow::{Context, Result};
use framewise_pipeline::PipelineConfig;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where device roll comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientationSource {
    /// IIO accelerometer if one is present, otherwise none.
    #[default]
    Auto,
    None,
    Synthetic,
}

impl FromStr for OrientationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" | "off" => Ok(Self::None),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(format!("unknown orientation source: {other}")),
        }
    }
}

impl fmt::Display for OrientationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::None => "none",
            Self::Synthetic => "synthetic",
        })
    }
}

/// Daemon configuration: optional TOML file overlaid by environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `synthetic` or a V4L2 device path (default: synthetic).
    pub camera_device: String,
    pub target_fps: u32,
    /// Detection runs on every Nth captured frame.
    pub detection_stride: u32,
    pub orientation_hz: u32,
    pub orientation_source: OrientationSource,
    /// Roll assumed while no orientation sample exists.
    pub default_roll: f64,
    /// ONNX composition model; heuristic scoring only when unset.
    pub model_path: Option<PathBuf>,
    /// SCRFD face detection model; saliency only when unset.
    pub face_model_path: Option<PathBuf>,
    /// Confidence below which learned scores are discarded.
    pub model_acceptance: f64,
    /// Seconds between statistics log lines.
    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "synthetic".to_string(),
            target_fps: 60,
            detection_stride: 2,
            orientation_hz: 60,
            orientation_source: OrientationSource::Auto,
            default_roll: 0.0,
            model_path: None,
            face_model_path: None,
            model_acceptance: 0.6,
            stats_interval_secs: 30,
        }
    }
}

/// On-disk form; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    camera_device: Option<String>,
    target_fps: Option<u32>,
    detection_stride: Option<u32>,
    orientation_hz: Option<u32>,
    orientation_source: Option<OrientationSource>,
    default_roll: Option<f64>,
    model_path: Option<PathBuf>,
    face_model_path: Option<PathBuf>,
    model_acceptance: Option<f64>,
    stats_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}

impl Config {
    /// Load from `FRAMEWISE_CONFIG` (if set) and `FRAMEWISE_*` variables.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("FRAMEWISE_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let path = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        let model_path = path("FRAMEWISE_MODEL_PATH").or(file.model_path);
        let face_model_path = path("FRAMEWISE_FACE_MODEL_PATH").or(file.face_model_path);

        Self {
            camera_device: env("FRAMEWISE_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or(defaults.camera_device),
            target_fps: env_u32(&env, "FRAMEWISE_TARGET_FPS")
                .or(file.target_fps)
                .unwrap_or(defaults.target_fps)
                .max(1),
            detection_stride: env_u32(&env, "FRAMEWISE_DETECTION_STRIDE")
                .or(file.detection_stride)
                .unwrap_or(defaults.detection_stride)
                .max(1),
            orientation_hz: env_u32(&env, "FRAMEWISE_ORIENTATION_HZ")
                .or(file.orientation_hz)
                .unwrap_or(defaults.orientation_hz)
                .max(1),
            orientation_source: env("FRAMEWISE_ORIENTATION_SOURCE")
                .and_then(|v| v.parse().ok())
                .or(file.orientation_source)
                .unwrap_or(defaults.orientation_source),
            default_roll: env_f64(&env, "FRAMEWISE_DEFAULT_ROLL")
                .or(file.default_roll)
                .filter(|v| v.is_finite())
                .unwrap_or(defaults.default_roll),
            model_path,
            face_model_path,
            model_acceptance: env_f64(&env, "FRAMEWISE_MODEL_ACCEPTANCE")
                .or(file.model_acceptance)
                .unwrap_or(defaults.model_acceptance),
            stats_interval_secs: env_u64(&env, "FRAMEWISE_STATS_INTERVAL_SECS")
                .or(file.stats_interval_secs)
                .unwrap_or(defaults.stats_interval_secs)
                .max(1),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            target_fps: self.target_fps,
            detection_stride: self.detection_stride,
            orientation_hz: self.orientation_hz,
            default_roll: self.default_roll,
        }
    }

    pub fn uses_synthetic_camera(&self) -> bool {
        self.camera_device.eq_ignore_ascii_case("synthetic")
    }
}

fn env_u32(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u32> {
    env(key).and_then(|v| v.trim().parse().ok())
}

fn env_u64(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    env(key).and_then(|v| v.trim().parse().ok())
}

fn env_f64(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<f64> {
    env(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = Config::resolve(FileConfig::default(), lookup(&[]));
        assert_eq!(config, Config::default());
        assert!(config.uses_synthetic_camera());
        assert_eq!(config.pipeline(), PipelineConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::resolve(
            FileConfig::default(),
            lookup(&[
                ("FRAMEWISE_CAMERA_DEVICE", "/dev/video0"),
                ("FRAMEWISE_TARGET_FPS", "30"),
                ("FRAMEWISE_DETECTION_STRIDE", "3"),
                ("FRAMEWISE_ORIENTATION_SOURCE", "synthetic"),
                ("FRAMEWISE_DEFAULT_ROLL", "0.1"),
                ("FRAMEWISE_MODEL_PATH", "/opt/model.onnx"),
                ("FRAMEWISE_FACE_MODEL_PATH", "/opt/scrfd.onnx"),
            ]),
        );
        assert_eq!(config.camera_device, "/dev/video0");
        assert!(!config.uses_synthetic_camera());
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.detection_stride, 3);
        assert_eq!(config.orientation_source, OrientationSource::Synthetic);
        assert_eq!(config.default_roll, 0.1);
        assert_eq!(config.model_path, Some(PathBuf::from("/opt/model.onnx")));
        assert_eq!(config.face_model_path, Some(PathBuf::from("/opt/scrfd.onnx")));
    }

    #[test]
    fn test_invalid_values_fall_back_or_clamp() {
        let config = Config::resolve(
            FileConfig::default(),
            lookup(&[
                ("FRAMEWISE_TARGET_FPS", "fast"),
                ("FRAMEWISE_DETECTION_STRIDE", "0"),
                ("FRAMEWISE_ORIENTATION_SOURCE", "gyro"),
                ("FRAMEWISE_DEFAULT_ROLL", "NaN"),
                ("FRAMEWISE_MODEL_PATH", ""),
            ]),
        );
        assert_eq!(config.target_fps, 60);
        assert_eq!(config.detection_stride, 1);
        assert_eq!(config.orientation_source, OrientationSource::Auto);
        assert_eq!(config.default_roll, 0.0);
        assert_eq!(config.model_path, None);
    }

    #[test]
    fn test_file_values_under_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "camera_device = \"/dev/video4\"\n\
             target_fps = 120\n\
             orientation_source = \"none\"\n\
             face_model_path = \"/opt/scrfd.onnx\"\n\
             model_acceptance = 0.8"
        )
        .unwrap();

        let parsed = FileConfig::read(file.path()).unwrap();
        let config = Config::resolve(parsed, lookup(&[("FRAMEWISE_TARGET_FPS", "90")]));
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.target_fps, 90);
        assert_eq!(config.orientation_source, OrientationSource::None);
        assert_eq!(config.face_model_path, Some(PathBuf::from("/opt/scrfd.onnx")));
        assert_eq!(config.model_acceptance, 0.8);
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "camera = \"/dev/video0\"").unwrap();
        assert!(FileConfig::read(file.path()).is_err());
    }

    #[test]
    fn test_orientation_source_parse() {
        assert_eq!("AUTO".parse::<OrientationSource>(), Ok(OrientationSource::Auto));
        assert_eq!("off".parse::<OrientationSource>(), Ok(OrientationSource::None));
        assert!("gyro".parse::<OrientationSource>().is_err());
        assert_eq!(OrientationSource::Synthetic.to_string(), "synthetic");
    }
}
