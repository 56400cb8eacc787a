use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding};

/// Default YuNet score threshold.
pub const SCORE_THRESHOLD: f32 = 0.6;
/// Default IoU threshold for non-maximum suppression.
pub const NMS_THRESHOLD: f32 = 0.3;

/// Detector and encoder sessions bundled as one detect -> align -> encode
/// pipeline.
pub struct Pipeline {
    detector: Session,
    encoder: Session,
}

impl Pipeline {
    /// Load both ONNX models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(model_dir)?,
            encoder: crate::model::encoder_session(model_dir)?,
        })
    }

    /// All faces found in the image, NMS applied, best score first.
    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        face::detect_faces(&mut self.detector, img, SCORE_THRESHOLD, NMS_THRESHOLD)
            .context("detecting faces")
    }

    /// Align the detected face and encode it into a descriptor.
    pub fn embed(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding> {
        let aligned = face::align_face(img, detection, 112).context("aligning face")?;
        face::encode_face(&mut self.encoder, &aligned).context("encoding face")
    }
}
