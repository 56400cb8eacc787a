use std::path::Path;

use anyhow::{Context, Result};
use image::{ImageBuffer, Rgb, RgbImage};
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT};

/// Sequential frame reader over a video file.
pub struct VideoFile {
    cap: VideoCapture,
    frame_count: u64,
    fps: f64,
}

impl VideoFile {
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy();
        let cap = VideoCapture::from_file(&path_str, CAP_ANY)
            .with_context(|| format!("opening video {}", path.display()))?;
        if !cap.is_opened().unwrap_or(false) {
            anyhow::bail!("cannot open video {}", path.display());
        }

        let frame_count = cap.get(CAP_PROP_FRAME_COUNT).unwrap_or(0.0).max(0.0) as u64;
        let fps = cap.get(CAP_PROP_FPS).unwrap_or(0.0);
        log::debug!(
            "opened {}: {} frames @ {:.2} fps",
            path.display(),
            frame_count,
            fps
        );

        Ok(Self {
            cap,
            frame_count,
            fps,
        })
    }

    /// Check that the file opens and yields at least one decodable frame.
    pub fn probe(path: &Path) -> Result<()> {
        let mut video = Self::open(path)?;
        match video.next_frame()? {
            Some(_) => Ok(()),
            None => anyhow::bail!("no decodable frames in {}", path.display()),
        }
    }

    /// Total frame count as reported by the container; 0 when unknown.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second as reported by the container; 0 when unknown.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Next frame in source order, converted to RGB. `None` at end of
    /// stream; `Err` when a frame exists but fails to decode.
    pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut frame = Mat::default();
        let got = self.cap.read(&mut frame).context("reading frame")?;
        if !got || frame.empty() {
            return Ok(None);
        }
        Ok(Some(mat_to_rgb(&frame)?))
    }
}

/// Convert an 8-bit BGR Mat into an `image` RGB buffer.
fn mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
    let width = mat.cols() as u32;
    let height = mat.rows() as u32;
    if width == 0 || height == 0 {
        anyhow::bail!("empty frame");
    }

    let data = mat.data_bytes().context("reading frame bytes")?;
    let expected = (width * height * 3) as usize;
    if data.len() < expected {
        anyhow::bail!(
            "frame buffer too small: got {}, expected {}",
            data.len(),
            expected
        );
    }

    let mut rgb = Vec::with_capacity(expected);
    for bgr in data[..expected].chunks_exact(3) {
        rgb.push(bgr[2]);
        rgb.push(bgr[1]);
        rgb.push(bgr[0]);
    }

    ImageBuffer::from_raw(width, height, rgb)
        .ok_or_else(|| anyhow::anyhow!("failed to build frame buffer"))
}
