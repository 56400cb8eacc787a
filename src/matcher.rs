//! Ranks stored faces against a query descriptor by Euclidean distance.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use anyhow::Result;
use image::DynamicImage;
use log::{info, warn};
use serde::Serialize;

use faceseek_vision::face::embedding_distance;
use faceseek_vision::Detection;

use crate::config::{self, Config};
use crate::error::Error;
use crate::scan::FaceEngine;
use crate::store::{self, AcceptedFace, BoundingBox, FaceQuality};

#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Maximum descriptor distance for a stored face to qualify at all.
    pub tolerance: f32,
    pub max_results: usize,
    pub min_confidence: f32,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            max_results: 10,
            min_confidence: 0.3,
        }
    }
}

impl MatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tolerance: config.comparison_tolerance,
            ..Default::default()
        }
    }
}

/// One stored face that matched a query. Reported, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub face_id: u32,
    pub frame: u64,
    pub timestamp: f64,
    pub confidence: f32,
    pub location: BoundingBox,
    pub quality: FaceQuality,
    pub capture_path: String,
}

/// Distance-to-confidence transform: 1 at distance 0, 0 at the tolerance,
/// linear in between. A per-call tolerance rescales the confidence with it.
fn confidence(distance: f32, tolerance: f32) -> f32 {
    (1.0 - distance / tolerance).max(0.0)
}

/// Holds the loaded face sequence and answers queries against it.
pub struct MatchEngine {
    store_path: PathBuf,
    faces: Vec<AcceptedFace>,
}

impl MatchEngine {
    pub fn new(store_path: PathBuf) -> Self {
        Self {
            store_path,
            faces: Vec::new(),
        }
    }

    /// Build directly from an in-memory sequence.
    pub fn with_faces(faces: Vec<AcceptedFace>) -> Self {
        Self {
            store_path: PathBuf::new(),
            faces,
        }
    }

    pub fn faces(&self) -> &[AcceptedFace] {
        &self.faces
    }

    /// Lazily pull the store from disk the first time it is needed.
    fn ensure_loaded(&mut self) -> Result<(), Error> {
        if !self.faces.is_empty() {
            return Ok(());
        }
        match store::load(&self.store_path) {
            Ok(loaded) => {
                self.faces = loaded.faces;
                Ok(())
            }
            Err(e) => {
                warn!("loading encodings failed: {e}");
                Err(Error::NotLoaded)
            }
        }
    }

    /// Score every stored face against the query: qualify at distance <=
    /// tolerance, convert to confidence, drop below min_confidence, rank
    /// by confidence descending (ties keep store order), truncate.
    pub fn find_matches(
        &mut self,
        query: &[f32],
        options: &MatchOptions,
    ) -> Result<Vec<MatchResult>, Error> {
        self.ensure_loaded()?;
        info!("searching {} stored faces, tolerance {}", self.faces.len(), options.tolerance);

        let mut results: Vec<MatchResult> = self
            .faces
            .iter()
            .filter_map(|face| {
                let distance = embedding_distance(query, &face.encoding);
                if distance > options.tolerance {
                    return None;
                }
                let confidence = confidence(distance, options.tolerance);
                if confidence < options.min_confidence {
                    return None;
                }
                Some(MatchResult {
                    face_id: face.id,
                    frame: face.frame,
                    timestamp: face.timestamp,
                    confidence,
                    location: face.location,
                    quality: face.quality,
                    capture_path: face.capture_path.clone(),
                })
            })
            .collect();

        // stable: equal confidences stay in store order
        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        results.truncate(options.max_results);

        info!("found {} matches", results.len());
        Ok(results)
    }

    pub fn find_best_match(
        &mut self,
        query: &[f32],
        options: &MatchOptions,
    ) -> Result<Option<MatchResult>, Error> {
        let single = MatchOptions {
            max_results: 1,
            ..options.clone()
        };
        Ok(self.find_matches(query, &single)?.into_iter().next())
    }

    /// Run `find_matches` independently for each query image. A query that
    /// fails (unreadable image, no detectable face) records an empty result
    /// list; it never aborts the batch.
    pub fn batch_compare(
        &mut self,
        engine: &mut dyn FaceEngine,
        images: &[PathBuf],
        options: &MatchOptions,
    ) -> Result<Vec<(String, Vec<MatchResult>)>, Error> {
        self.ensure_loaded()?;

        let mut results = Vec::with_capacity(images.len());
        for path in images {
            info!("processing query image {}", path.display());
            let matches = match self.query_image(engine, path, options) {
                Ok(matches) => matches,
                Err(e) => {
                    warn!("query {} failed: {e:#}", path.display());
                    Vec::new()
                }
            };
            results.push((path.to_string_lossy().into_owned(), matches));
        }
        Ok(results)
    }

    fn query_image(
        &mut self,
        engine: &mut dyn FaceEngine,
        path: &Path,
        options: &MatchOptions,
    ) -> Result<Vec<MatchResult>> {
        let img = load_query_image(path)?;
        match extract_query_descriptor(engine, &img)? {
            Some(descriptor) => Ok(self.find_matches(&descriptor, options)?),
            None => {
                warn!("no face detected in {}", path.display());
                Ok(Vec::new())
            }
        }
    }
}

/// Validate and decode a query image.
pub fn load_query_image(path: &Path) -> Result<DynamicImage, Error> {
    if !path.exists() {
        return Err(Error::InvalidInput(format!(
            "image file not found: {}",
            path.display()
        )));
    }
    if !config::is_supported_image(path) {
        return Err(Error::InvalidInput(format!(
            "unsupported image format: {}",
            path.display()
        )));
    }
    image::open(path)
        .map_err(|e| Error::InvalidInput(format!("cannot decode {}: {e}", path.display())))
}

/// Extract the query descriptor from an image. With several faces in the
/// frame the largest bounding box wins, deterministically; `None` when no
/// face is found.
pub fn extract_query_descriptor(
    engine: &mut dyn FaceEngine,
    img: &DynamicImage,
) -> Result<Option<Vec<f32>>> {
    let detections = engine.detect(img)?;
    let Some(best) = largest_face(&detections) else {
        return Ok(None);
    };
    if detections.len() > 1 {
        warn!(
            "{} faces detected in query image, using the largest",
            detections.len()
        );
    }
    let embedding = engine.encode(img, best)?;
    Ok(Some(embedding.to_vec()))
}

/// First detection with the strictly largest area, so equal-area ties keep
/// detector order.
fn largest_face(detections: &[Detection]) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for det in detections {
        match best {
            Some(b) if det.area() <= b.area() => {}
            _ => best = Some(det),
        }
    }
    best
}
