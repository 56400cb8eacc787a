use std::path::Path;

use anyhow::{Context, Result};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

/// Model file names as shipped by OpenCV's model zoo. Both are looked up
/// inside the configured model directory.
pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const ENCODER_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        use ort::ep::{self, ExecutionProvider};
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        use ort::ep::{self, ExecutionProvider};
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn detector_session(model_dir: &Path) -> Result<Session> {
    let path = model_dir.join(DETECTOR_MODEL_FILE);
    session_builder()?
        .commit_from_file(&path)
        .with_context(|| format!("loading detector model {}", path.display()))
}

pub fn encoder_session(model_dir: &Path) -> Result<Session> {
    let path = model_dir.join(ENCODER_MODEL_FILE);
    session_builder()?
        .commit_from_file(&path)
        .with_context(|| format!("loading encoder model {}", path.display()))
}
