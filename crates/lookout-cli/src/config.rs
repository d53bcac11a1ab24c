use anyhow::{Context, Result};
use lookout_core::provision::{self, ModelAsset};
use lookout_core::{DistanceMetric, DispatchPolicy, IdentityConfig, LoopSettings, RecognitionModel};
use lookout_hw::CaptureBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when `--config` is not given. Optional.
pub const DEFAULT_CONFIG_PATH: &str = "lookout.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub sampling: SamplingConfig,
    pub matcher: MatcherConfig,
    pub display: DisplayConfig,
    /// Identity → ordered reference image paths.
    pub gallery: Vec<IdentityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture device index (`/dev/video{index}`).
    pub device_index: u32,
    pub backend: CaptureBackend,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            backend: CaptureBackend::V4l2,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Captured frames between verification attempts.
    pub period: u64,
    pub dispatch: DispatchPolicy,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            period: 30,
            dispatch: DispatchPolicy::Coalesce,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub model: RecognitionModel,
    pub distance_metric: DistanceMetric,
    /// Overrides the model's verification threshold.
    pub threshold: Option<f32>,
    /// Directory holding model files (default: `~/.lookout/weights`).
    pub model_dir: Option<PathBuf>,
    pub assets: Vec<ModelAsset>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            model: RecognitionModel::VggFace,
            distance_metric: DistanceMetric::Cosine,
            threshold: None,
            model_dir: None,
            assets: provision::default_assets(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub window: String,
    pub quit_key: char,
    /// Overlay text origin (x, y) in pixels.
    pub overlay_position: [u32; 2],
    /// Write the annotated frame here every `snapshot_every` shown frames.
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window: "video".to_string(),
            quit_key: 'q',
            overlay_position: [20, 450],
            snapshot_path: None,
            snapshot_every: 30,
        }
    }
}

impl Config {
    /// Load from `path`, or from `lookout.toml` if present, then apply
    /// `LOOKOUT_*` environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override selected values from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("LOOKOUT_CAMERA_INDEX") {
            self.camera.device_index = v
                .parse()
                .with_context(|| format!("LOOKOUT_CAMERA_INDEX={v:?} is not a device index"))?;
        }
        if let Some(v) = lookup("LOOKOUT_SAMPLING_PERIOD") {
            self.sampling.period = v
                .parse()
                .with_context(|| format!("LOOKOUT_SAMPLING_PERIOD={v:?} is not a frame count"))?;
        }
        if let Some(v) = lookup("LOOKOUT_MODEL_DIR") {
            self.matcher.model_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sampling.period == 0 {
            anyhow::bail!("sampling.period must be at least 1");
        }
        if self.display.snapshot_path.is_some() && self.display.snapshot_every == 0 {
            anyhow::bail!("display.snapshot_every must be at least 1");
        }
        if let Some(t) = self.matcher.threshold {
            if !t.is_finite() || t < 0.0 {
                anyhow::bail!("matcher.threshold must be a non-negative number, got {t}");
            }
        }
        Ok(())
    }

    /// Resolved model directory.
    pub fn model_dir(&self) -> PathBuf {
        self.matcher
            .model_dir
            .clone()
            .or_else(|| provision::default_model_dir().ok())
            .unwrap_or_else(|| PathBuf::from("weights"))
    }

    /// Path of the configured recognition model file.
    pub fn model_path(&self) -> PathBuf {
        provision::asset_path(
            &self.model_dir(),
            &self.matcher.assets,
            self.matcher.model.name(),
        )
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            window: self.display.window.clone(),
            quit_key: self.display.quit_key,
            overlay_position: (self.display.overlay_position[0], self.display.overlay_position[1]),
            key_poll: Duration::from_millis(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[camera]
device_index = 2
width = 1280
height = 720

[sampling]
period = 15
dispatch = "queue"

[matcher]
model = "Facenet"
distance_metric = "euclidean_l2"
model_dir = "/opt/lookout/weights"

[[matcher.assets]]
name = "Facenet"
file = "facenet512.onnx"
url = "https://example.com/facenet512.onnx"

[display]
quit_key = "x"

[[gallery]]
identity = "Alen"
images = ["faces/alen1.jpg", "faces/alen2.jpg"]

[[gallery]]
identity = "Emil"
images = ["faces/emil1.jpg"]
"#;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.camera.device_index, 0);
        assert_eq!(cfg.camera.backend, CaptureBackend::V4l2);
        assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
        assert_eq!(cfg.sampling.period, 30);
        assert_eq!(cfg.sampling.dispatch, DispatchPolicy::Coalesce);
        assert_eq!(cfg.matcher.model, RecognitionModel::VggFace);
        assert_eq!(cfg.matcher.distance_metric, DistanceMetric::Cosine);
        assert_eq!(cfg.display.quit_key, 'q');
        assert_eq!(cfg.display.window, "video");
        assert!(cfg.gallery.is_empty());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_parse_full_config() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.camera.device_index, 2);
        assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
        assert_eq!(cfg.sampling.period, 15);
        assert_eq!(cfg.sampling.dispatch, DispatchPolicy::Queue);
        assert_eq!(cfg.matcher.model, RecognitionModel::Facenet);
        assert_eq!(cfg.matcher.distance_metric, DistanceMetric::EuclideanL2);
        assert_eq!(cfg.display.quit_key, 'x');
        assert_eq!(cfg.display.overlay_position, [20, 450]);

        let names: Vec<&str> = cfg.gallery.iter().map(|g| g.identity.as_str()).collect();
        assert_eq!(names, vec!["Alen", "Emil"]);
        assert_eq!(cfg.gallery[0].images.len(), 2);

        assert_eq!(
            cfg.model_path(),
            PathBuf::from("/opt/lookout/weights/facenet512.onnx")
        );
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: Config = toml::from_str("[sampling]\nperiod = 5\n").unwrap();
        assert_eq!(cfg.sampling.period, 5);
        assert_eq!(cfg.sampling.dispatch, DispatchPolicy::Coalesce);
        assert_eq!(cfg.camera.width, 640);
        assert_eq!(cfg.matcher.assets.len(), 3);
    }

    #[test]
    fn test_zero_period_rejected() {
        let cfg: Config = toml::from_str("[sampling]\nperiod = 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_multi_char_quit_key_rejected() {
        let result: Result<Config, _> = toml::from_str("[display]\nquit_key = \"quit\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_env(|key| match key {
            "LOOKOUT_CAMERA_INDEX" => Some("3".into()),
            "LOOKOUT_SAMPLING_PERIOD" => Some("10".into()),
            "LOOKOUT_MODEL_DIR" => Some("/tmp/models".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.camera.device_index, 3);
        assert_eq!(cfg.sampling.period, 10);
        assert_eq!(cfg.model_path(), PathBuf::from("/tmp/models/vgg_face.onnx"));
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut cfg = Config::default();
        let result = cfg.apply_env(|key| (key == "LOOKOUT_SAMPLING_PERIOD").then(|| "often".into()));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/lookout.toml"))).is_err());
    }
}
