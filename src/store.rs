//! Durable representation of accepted faces.
//!
//! The store is always written in the versioned wrapped form
//! `{"metadata": {...}, "faces": [...]}`; on read, a legacy flat array of
//! face records is accepted as well and normalized to the same in-memory
//! sequence.

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "2.0";

/// Face rectangle in analyzed-frame pixel coordinates, stored on disk as
/// the 4-array `[top, right, bottom, left]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    /// Build from the detector's `[x, y, w, h]` box, clamped to the frame.
    pub fn from_xywh(bbox: [f32; 4], frame_width: u32, frame_height: u32) -> Self {
        let left = bbox[0].max(0.0) as i32;
        let top = bbox[1].max(0.0) as i32;
        let right = ((bbox[0] + bbox[2]) as i32).min(frame_width as i32);
        let bottom = ((bbox[1] + bbox[3]) as i32).min(frame_height as i32);
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> i64 {
        self.width().max(0) as i64 * self.height().max(0) as i64
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(v: [i32; 4]) -> Self {
        Self {
            top: v[0],
            right: v[1],
            bottom: v[2],
            left: v[3],
        }
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.top, b.right, b.bottom, b.left]
    }
}

/// Contrast/sharpness measured at capture time. Diagnostic only after
/// acceptance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaceQuality {
    pub contrast: f64,
    pub sharpness: f64,
}

impl FaceQuality {
    pub fn score(&self) -> f64 {
        self.contrast + self.sharpness
    }
}

/// One unique face captured from the video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedFace {
    pub id: u32,
    /// 1-indexed source frame where the face was first seen.
    pub frame: u64,
    pub timestamp: f64,
    pub location: BoundingBox,
    pub size: (u32, u32),
    pub quality: FaceQuality,
    pub capture_path: String,
    pub encoding: Vec<f32>,
}

/// Capture-time parameters recorded for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub min_face_size: u32,
    pub frame_interval: u64,
    pub uniqueness_tolerance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub total_faces: usize,
    pub version: String,
    pub config: ConfigSnapshot,
}

#[derive(Serialize)]
struct StoreFile<'a> {
    metadata: StoreMetadata,
    faces: &'a [AcceptedFace],
}

/// The two on-disk shapes: the versioned wrapper is recognized by its
/// top-level `faces` key, anything else must be the legacy flat array.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoreDocument {
    Versioned {
        #[serde(default)]
        metadata: Option<StoreMetadata>,
        faces: Vec<AcceptedFace>,
    },
    Legacy(Vec<AcceptedFace>),
}

#[derive(Debug)]
pub struct LoadedStore {
    pub faces: Vec<AcceptedFace>,
    pub metadata: Option<StoreMetadata>,
}

pub fn save(path: &Path, faces: &[AcceptedFace], config: ConfigSnapshot) -> Result<()> {
    let document = StoreFile {
        metadata: StoreMetadata {
            total_faces: faces.len(),
            version: SCHEMA_VERSION.to_string(),
            config,
        },
        faces,
    };
    let data = serde_json::to_string_pretty(&document)?;
    std::fs::write(path, data)?;
    info!("saved {} encodings to {}", faces.len(), path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<LoadedStore> {
    if !path.exists() {
        return Err(Error::StoreNotFound(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)?;
    let document: StoreDocument =
        serde_json::from_str(&raw).map_err(|e| Error::CorruptStore {
            path: path.to_path_buf(),
            source: e,
        })?;

    let loaded = match document {
        StoreDocument::Versioned { metadata, faces } => {
            info!(
                "loaded {} encodings from {} (versioned format)",
                faces.len(),
                path.display()
            );
            LoadedStore { faces, metadata }
        }
        StoreDocument::Legacy(faces) => {
            info!(
                "loaded {} encodings from {} (legacy flat format)",
                faces.len(),
                path.display()
            );
            LoadedStore {
                faces,
                metadata: None,
            }
        }
    };
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_face(id: u32, encoding: Vec<f32>) -> AcceptedFace {
        AcceptedFace {
            id,
            frame: id as u64 * 10,
            timestamp: id as f64 * 0.4,
            location: BoundingBox {
                top: 10,
                right: 200,
                bottom: 190,
                left: 20,
            },
            size: (180, 180),
            quality: FaceQuality {
                contrast: 45.0,
                sharpness: 120.0,
            },
            capture_path: format!("face_captures/face_{id}.jpg"),
            encoding,
        }
    }

    fn snapshot() -> ConfigSnapshot {
        ConfigSnapshot {
            min_face_size: 150,
            frame_interval: 10,
            uniqueness_tolerance: 0.5,
        }
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.json");

        let faces = vec![
            sample_face(1, vec![0.25; 128]),
            sample_face(2, vec![-0.125; 128]),
        ];
        save(&path, &faces, snapshot()).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.faces.len(), 2);
        let meta = loaded.metadata.unwrap();
        assert_eq!(meta.total_faces, 2);
        assert_eq!(meta.version, SCHEMA_VERSION);
        assert_eq!(meta.config.frame_interval, 10);

        for (before, after) in faces.iter().zip(loaded.faces.iter()) {
            assert_eq!(before.id, after.id);
            assert_eq!(before.location, after.location);
            assert_eq!(before.encoding.len(), after.encoding.len());
            for (a, b) in before.encoding.iter().zip(after.encoding.iter()) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_legacy_and_versioned_load_identically() {
        let dir = tempfile::tempdir().unwrap();
        let faces = vec![sample_face(1, vec![0.5; 4]), sample_face(2, vec![0.1; 4])];

        let legacy_path = dir.path().join("legacy.json");
        std::fs::write(&legacy_path, serde_json::to_string(&faces).unwrap()).unwrap();

        let versioned_path = dir.path().join("versioned.json");
        save(&versioned_path, &faces, snapshot()).unwrap();

        let legacy = load(&legacy_path).unwrap();
        let versioned = load(&versioned_path).unwrap();

        assert!(legacy.metadata.is_none());
        assert_eq!(legacy.faces.len(), versioned.faces.len());
        for (a, b) in legacy.faces.iter().zip(versioned.faces.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.frame, b.frame);
            assert_eq!(a.encoding, b.encoding);
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        match load(&dir.path().join("absent.json")) {
            Err(Error::StoreNotFound(_)) => {}
            other => panic!("expected StoreNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"faces\": 42}").unwrap();
        match load(&path) {
            Err(Error::CorruptStore { .. }) => {}
            other => panic!("expected CorruptStore, got {other:?}"),
        }
    }

    #[test]
    fn test_bounding_box_clamps_to_frame() {
        let b = BoundingBox::from_xywh([-5.0, -3.0, 700.0, 500.0], 640, 480);
        assert_eq!(b.left, 0);
        assert_eq!(b.top, 0);
        assert_eq!(b.right, 640);
        assert_eq!(b.bottom, 480);
        assert_eq!(b.area(), 640 * 480);
    }
}
