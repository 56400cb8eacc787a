//! Drives frame sampling over a video, feeding detections through the
//! quality filter and uniqueness index and persisting the result.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use log::{debug, info, warn};

use faceseek_vision::{Detection, Embedding, Pipeline, VideoFile};

use crate::config::{self, Config};
use crate::error::Error;
use crate::index::UniquenessIndex;
use crate::quality::{self, FaceCandidate};
use crate::store::{self, BoundingBox};

/// Sequential frame reader over a video source.
pub trait FrameSource {
    /// Total frame count reported by the container; 0 when unknown.
    fn frame_count(&self) -> u64;
    fn fps(&self) -> f64;
    /// Next frame in source order; `None` at end of stream, `Err` when a
    /// frame exists but cannot be decoded.
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;
}

impl FrameSource for VideoFile {
    fn frame_count(&self) -> u64 {
        VideoFile::frame_count(self)
    }

    fn fps(&self) -> f64 {
        VideoFile::fps(self)
    }

    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        Ok(VideoFile::next_frame(self)?.map(DynamicImage::ImageRgb8))
    }
}

/// The opaque detect/encode capability the pipeline consumes.
pub trait FaceEngine {
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<Detection>>;
    fn encode(&mut self, frame: &DynamicImage, face: &Detection) -> Result<Embedding>;
}

impl FaceEngine for Pipeline {
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<Detection>> {
        Pipeline::detect(self, frame)
    }

    fn encode(&mut self, frame: &DynamicImage, face: &Detection) -> Result<Embedding> {
        Pipeline::embed(self, frame, face)
    }
}

/// Observer invoked after each sampled frame. Has no effect on pipeline
/// state; the scan behaves identically with `NullSink`.
pub trait ProgressSink {
    fn report(&mut self, progress: f64, stats: &ScanStats);
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&mut self, _progress: f64, _stats: &ScanStats) {}
}

/// Adapts a closure into a sink.
pub struct FnSink<F: FnMut(f64, &ScanStats)>(pub F);

impl<F: FnMut(f64, &ScanStats)> ProgressSink for FnSink<F> {
    fn report(&mut self, progress: f64, stats: &ScanStats) {
        (self.0)(progress, stats)
    }
}

/// Cooperative cancellation flag, checked once per sampled frame.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub total_frames: u64,
    pub sampled_frames: u64,
    pub faces_detected: u64,
    pub faces_passed_quality: u64,
    pub unique_faces: u64,
    pub captures_saved: u64,
    pub frame_failures: u64,
    pub processing_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Opening,
    Scanning,
    Finalizing,
    Done,
    Failed,
}

pub struct ScanOutcome {
    pub stats: ScanStats,
    pub faces: Vec<store::AcceptedFace>,
    pub cancelled: bool,
}

/// Check the file before committing to a full scan: it must exist, carry a
/// supported extension, and yield at least one decodable frame.
pub fn validate_video_file(path: &Path) -> Result<(), Error> {
    if !path.exists() {
        return Err(Error::InvalidInput(format!(
            "video file not found: {}",
            path.display()
        )));
    }
    if !config::is_supported_video(path) {
        return Err(Error::InvalidInput(format!(
            "unsupported video format: {}",
            path.display()
        )));
    }
    VideoFile::probe(path).map_err(|e| Error::VideoOpen(format!("{e:#}")))
}

/// One scan over one video. Owns the uniqueness index and statistics for
/// the session; the accepted sequence is returned in the outcome.
pub struct VideoScan<'a> {
    config: &'a Config,
    cancel: CancelToken,
    state: ScanState,
}

impl<'a> VideoScan<'a> {
    pub fn new(config: &'a Config, cancel: CancelToken) -> Self {
        Self {
            config,
            cancel,
            state: ScanState::Opening,
        }
    }

    fn transition(&mut self, next: ScanState) {
        debug!("scan state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run the scan to completion. `open` is called once in the `Opening`
    /// state; failure there is fatal and leaves the store untouched.
    /// Per-frame decode/detect/encode failures are logged and counted, not
    /// propagated. `Finalizing` persists the accepted sequence; a save
    /// failure is the scan's overall failure.
    pub fn run<S: FrameSource>(
        mut self,
        open: impl FnOnce() -> Result<S, Error>,
        engine: &mut dyn FaceEngine,
        sink: &mut dyn ProgressSink,
    ) -> Result<ScanOutcome, Error> {
        let mut source = match open() {
            Ok(source) => source,
            Err(e) => {
                self.transition(ScanState::Failed);
                return Err(e);
            }
        };

        let total_frames = source.frame_count();
        let fps = source.fps();
        info!("video opened: {total_frames} frames @ {fps:.2} fps");

        let mut index = UniquenessIndex::new(self.config.uniqueness_tolerance);
        let mut stats = ScanStats {
            total_frames,
            ..Default::default()
        };

        self.transition(ScanState::Scanning);
        let started = Instant::now();
        let interval = self.config.frame_interval.max(1);
        let mut frame_index: u64 = 0;
        let mut cancelled = false;

        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    frame_index += 1;
                    if frame_index % interval == 0 {
                        warn!("frame {frame_index} failed to decode: {e:#}");
                        stats.frame_failures += 1;
                    }
                    continue;
                }
            };
            frame_index += 1;

            // Frames are 1-indexed; only every `interval`-th is analyzed.
            if frame_index % interval != 0 {
                continue;
            }

            if self.cancel.is_cancelled() {
                info!("scan cancelled at frame {frame_index}");
                cancelled = true;
                break;
            }

            stats.sampled_frames += 1;
            let frame = downscale(frame, self.config.max_frame_width);

            if let Err(e) = self.process_frame(&frame, frame_index, fps, engine, &mut index, &mut stats)
            {
                warn!("frame {frame_index} failed: {e:#}");
                stats.frame_failures += 1;
            }

            let progress = if total_frames > 0 {
                frame_index as f64 / total_frames as f64
            } else {
                0.0
            };
            sink.report(progress, &stats);
        }

        self.transition(ScanState::Finalizing);
        stats.processing_secs = started.elapsed().as_secs_f64();

        if let Err(e) = store::save(
            &self.config.encodings_file,
            index.faces(),
            self.config.snapshot(),
        ) {
            self.transition(ScanState::Failed);
            return Err(e);
        }

        info!(
            "scan complete: {} unique faces in {:.2}s ({} sampled frames, {} failures)",
            stats.unique_faces, stats.processing_secs, stats.sampled_frames, stats.frame_failures
        );
        self.transition(ScanState::Done);

        Ok(ScanOutcome {
            stats,
            faces: index.into_faces(),
            cancelled,
        })
    }

    /// Detect and encode all faces on one sampled frame, then run each
    /// (box, descriptor) pair through quality and uniqueness.
    fn process_frame(
        &self,
        frame: &DynamicImage,
        frame_index: u64,
        fps: f64,
        engine: &mut dyn FaceEngine,
        index: &mut UniquenessIndex,
        stats: &mut ScanStats,
    ) -> Result<()> {
        let detections = engine.detect(frame)?;
        if detections.is_empty() {
            return Ok(());
        }
        stats.faces_detected += detections.len() as u64;

        for detection in &detections {
            let descriptor = match engine.encode(frame, detection) {
                Ok(embedding) => embedding.to_vec(),
                Err(e) => {
                    warn!("face on frame {frame_index} failed to encode: {e:#}");
                    stats.frame_failures += 1;
                    continue;
                }
            };

            let location =
                BoundingBox::from_xywh(detection.bbox, frame.width(), frame.height());
            let Some(candidate) =
                quality::evaluate(frame, location, self.config.min_face_size)
            else {
                continue;
            };
            stats.faces_passed_quality += 1;

            if !index.is_unique(&descriptor) {
                continue;
            }

            let capture_path = match save_capture(
                frame,
                &candidate,
                frame_index,
                &self.config.output_folder,
            ) {
                Ok(path) => path,
                Err(e) => {
                    warn!("saving capture for frame {frame_index} failed: {e:#}");
                    stats.frame_failures += 1;
                    continue;
                }
            };
            stats.captures_saved += 1;

            let timestamp = if fps > 0.0 {
                frame_index as f64 / fps
            } else {
                0.0
            };
            index.accept(
                candidate,
                frame_index,
                timestamp,
                capture_path.to_string_lossy().into_owned(),
                descriptor,
            );
            stats.unique_faces += 1;
        }

        Ok(())
    }
}

/// Shrink oversized frames before detection; purely a throughput
/// optimization, coordinates stay relative to the returned frame.
fn downscale(frame: DynamicImage, max_width: u32) -> DynamicImage {
    if frame.width() <= max_width {
        return frame;
    }
    frame.resize(max_width, frame.height(), image::imageops::FilterType::Triangle)
}

/// Write the cropped face region as a high-quality JPEG named after its
/// frame, quality score and size.
fn save_capture(
    frame: &DynamicImage,
    candidate: &FaceCandidate,
    frame_index: u64,
    output_folder: &Path,
) -> Result<PathBuf> {
    let b = &candidate.location;
    let (fw, fh) = (frame.width() as i32, frame.height() as i32);
    let x = b.left.clamp(0, fw) as u32;
    let y = b.top.clamp(0, fh) as u32;
    let w = (b.right.clamp(0, fw) as u32).saturating_sub(x);
    let h = (b.bottom.clamp(0, fh) as u32).saturating_sub(y);
    let crop = frame.crop_imm(x, y, w.max(1), h.max(1)).to_rgb8();

    let filename = format!(
        "face_f{:06}_q{}_s{}x{}.jpg",
        frame_index,
        candidate.quality.score() as i64,
        candidate.size.0,
        candidate.size.1,
    );
    let path = output_folder.join(filename);

    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    crop.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, 95))
        .with_context(|| format!("encoding {}", path.display()))?;
    Ok(path)
}
