use anyhow::{bail, ensure};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::labels::StateClass;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_path: String,
    pub device: String,
    /// Model input `[width, height]`.
    pub input_size: [i32; 2],
    /// Detector floor applied before NMS.
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// Rounded confidence must be strictly above this to count.
    pub min_confidence: f32,
    pub retained_classes: Vec<StateClass>,
    /// Video frames are resized to `[width, height]` before analysis.
    pub video_frame_size: [i32; 2],
    pub inference_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: "Drowsiness_detector.pt".to_string(),
            device: "cpu".to_string(),
            input_size: [640, 640],
            conf_threshold: 0.25,
            nms_threshold: 0.7,
            min_confidence: 0.30,
            retained_classes: vec![StateClass::Car, StateClass::Sleeping],
            video_frame_size: [640, 480],
            inference_timeout_ms: None,
        }
    }
}

impl Config {
    /// Load from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let cfg: Config = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("conf_threshold", self.conf_threshold),
            ("nms_threshold", self.nms_threshold),
            ("min_confidence", self.min_confidence),
        ] {
            ensure!((0.0..=1.0).contains(&value), "{} must lie in [0, 1], got {}", name, value);
        }
        for (name, [w, h]) in [
            ("input_size", self.input_size),
            ("video_frame_size", self.video_frame_size),
        ] {
            ensure!(w > 0 && h > 0, "{} must be positive, got {}x{}", name, w, h);
        }
        if self.retained_classes.is_empty() {
            bail!("retained_classes must name at least one class");
        }
        if self.device != "cpu" && self.device != "cuda" {
            bail!("device must be \"cpu\" or \"cuda\", got {:?}", self.device);
        }
        Ok(())
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.model_path, "Drowsiness_detector.pt");
        assert_eq!(cfg.video_frame_size, [640, 480]);
        assert_eq!(cfg.retained_classes, vec![StateClass::Car, StateClass::Sleeping]);
        assert!(cfg.inference_timeout().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(r#"{ "device": "cuda", "inference_timeout_ms": 1500 }"#);
        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.device, "cuda");
        assert_eq!(cfg.inference_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(cfg.input_size, [640, 640]);
        assert!((cfg.min_confidence - 0.30).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let file = write_config(r#"{ "min_confidence": 1.5 }"#);
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("min_confidence"));
    }

    #[test]
    fn test_rejects_unknown_class_name() {
        let file = write_config(r#"{ "retained_classes": ["car", "truck"] }"#);
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_rejects_empty_retained_set() {
        let cfg = Config {
            retained_classes: Vec::new(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_frame_size() {
        let cfg = Config {
            video_frame_size: [0, 480],
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
