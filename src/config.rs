use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::ConfigSnapshot;

pub static CONFIG_PATH: Lazy<&'static Path> =
    Lazy::new(|| Path::new(option_env!("FACESEEK_CONFIG_PATH").unwrap_or("faceseek.toml")));

pub const SUPPORTED_VIDEO_FORMATS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv"];
pub const SUPPORTED_IMAGE_FORMATS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Faces narrower or shorter than this many pixels are discarded.
    pub min_face_size: u32,
    /// Every n-th frame is analyzed; the rest are skipped for throughput.
    pub frame_interval: u64,
    /// Capture-time dedup distance: descriptors within this Euclidean
    /// distance of an accepted face are treated as the same person.
    pub uniqueness_tolerance: f32,
    /// Query-time match distance, looser than dedup by design.
    pub comparison_tolerance: f32,
    /// Sampled frames wider than this are downscaled before detection.
    pub max_frame_width: u32,
    /// Directory for cropped face captures.
    pub output_folder: PathBuf,
    /// Encoding store location.
    pub encodings_file: PathBuf,
    /// Directory holding the detector/encoder ONNX models.
    pub model_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_face_size: 150,
            frame_interval: 10,
            uniqueness_tolerance: 0.5,
            comparison_tolerance: 0.6,
            max_frame_width: 1280,
            output_folder: PathBuf::from("face_captures"),
            encodings_file: PathBuf::from("face_encodings.json"),
            model_dir: PathBuf::from("models"),
        }
    }
}

impl Config {
    /// The capture-time parameters recorded in the store metadata.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            min_face_size: self.min_face_size,
            frame_interval: self.frame_interval,
            uniqueness_tolerance: self.uniqueness_tolerance,
        }
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_folder)?;
        if let Some(parent) = self.encodings_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn has_extension(path: &Path, formats: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| formats.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_supported_video(path: &Path) -> bool {
    has_extension(path, SUPPORTED_VIDEO_FORMATS)
}

pub fn is_supported_image(path: &Path) -> bool {
    has_extension(path, SUPPORTED_IMAGE_FORMATS)
}

/// Load configuration from `path`, falling back to ./faceseek.toml, then
/// the per-user config directory, then built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let candidate = match path {
        Some(p) => p.to_path_buf(),
        None => {
            if CONFIG_PATH.exists() {
                CONFIG_PATH.to_path_buf()
            } else {
                user_config_path().unwrap_or_else(|| CONFIG_PATH.to_path_buf())
            }
        }
    };
    if !candidate.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&candidate)
        .with_context(|| format!("reading config at {}", candidate.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", candidate.display()))
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "faceseek")
        .map(|dirs| dirs.config_dir().join("faceseek.toml"))
        .filter(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.frame_interval, 10);
        assert!(cfg.uniqueness_tolerance < cfg.comparison_tolerance);
    }

    #[test]
    fn test_supported_formats() {
        assert!(is_supported_video(Path::new("clip.MP4")));
        assert!(!is_supported_video(Path::new("clip.gif")));
        assert!(is_supported_image(Path::new("face.jpeg")));
        assert!(!is_supported_image(Path::new("face")));
    }

    #[test]
    fn test_partial_config_parses() {
        let cfg: Config = toml::from_str("frame_interval = 5").unwrap();
        assert_eq!(cfg.frame_interval, 5);
        assert_eq!(cfg.min_face_size, 150);
    }
}
