//! End-to-end pipeline tests with scripted detector/encoder and synthetic
//! frames: scan -> store -> search, without any model or video backend.

use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::Result;
use image::{DynamicImage, RgbImage};

use faceseek::config::Config;
use faceseek::matcher::{MatchEngine, MatchOptions};
use faceseek::scan::{CancelToken, FaceEngine, FrameSource, NullSink, VideoScan};
use faceseek::store::{self, AcceptedFace, BoundingBox, FaceQuality};
use faceseek::{Detection, Embedding};

/// 1px checkerboard frames have maximal contrast and sharpness, so any
/// sufficiently large face region passes the quality gate.
fn checkerboard(w: u32, h: u32) -> DynamicImage {
    let img = RgbImage::from_fn(w, h, |x, y| {
        if (x + y) % 2 == 0 {
            image::Rgb([255; 3])
        } else {
            image::Rgb([0; 3])
        }
    });
    DynamicImage::ImageRgb8(img)
}

struct FakeSource {
    frames: VecDeque<DynamicImage>,
    total: u64,
    fps: f64,
}

impl FakeSource {
    fn new(count: usize, fps: f64) -> Self {
        Self {
            frames: (0..count).map(|_| checkerboard(320, 240)).collect(),
            total: count as u64,
            fps,
        }
    }
}

impl FrameSource for FakeSource {
    fn frame_count(&self) -> u64 {
        self.total
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        Ok(self.frames.pop_front())
    }
}

enum Step {
    Faces(Vec<(Detection, Vec<f32>)>),
    Fail,
}

/// Replays a fixed script: each `detect` call consumes the next step.
struct ScriptedEngine {
    script: VecDeque<Step>,
    current: Vec<(Detection, Vec<f32>)>,
}

impl ScriptedEngine {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            current: Vec::new(),
        }
    }
}

impl FaceEngine for ScriptedEngine {
    fn detect(&mut self, _frame: &DynamicImage) -> Result<Vec<Detection>> {
        match self.script.pop_front() {
            Some(Step::Faces(faces)) => {
                self.current = faces;
                Ok(self.current.iter().map(|(d, _)| d.clone()).collect())
            }
            Some(Step::Fail) => anyhow::bail!("scripted detector failure"),
            None => Ok(Vec::new()),
        }
    }

    fn encode(&mut self, _frame: &DynamicImage, face: &Detection) -> Result<Embedding> {
        let descriptor = self
            .current
            .iter()
            .find(|(d, _)| d.bbox == face.bbox)
            .map(|(_, desc)| desc.clone())
            .expect("encode called for unscripted face");
        Ok(Embedding::from_vec(descriptor))
    }
}

fn det(x: f32, y: f32, side: f32) -> Detection {
    Detection {
        bbox: [x, y, side, side],
        score: 0.9,
        landmarks: [0.0; 10],
    }
}

/// Descriptor at a chosen Euclidean distance from the all-zero vector.
fn at_distance(d: f32) -> Vec<f32> {
    let mut v = vec![0.0; 128];
    v[0] = d;
    v
}

fn test_config(dir: &std::path::Path) -> Config {
    let mut cfg = Config::default();
    cfg.min_face_size = 40;
    cfg.output_folder = dir.join("captures");
    cfg.encodings_file = dir.join("faces.json");
    std::fs::create_dir_all(&cfg.output_folder).unwrap();
    cfg
}

#[test]
fn scan_dedups_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());

    // Frames 10 and 20 are sampled at the default interval. The second
    // sampled frame repeats the first face (distance 0.3 <= 0.5) and adds
    // a genuinely new one.
    let engine_script = vec![
        Step::Faces(vec![(det(10.0, 10.0, 60.0), at_distance(0.0))]),
        Step::Faces(vec![
            (det(12.0, 12.0, 60.0), at_distance(0.3)),
            (det(120.0, 100.0, 80.0), at_distance(2.0)),
        ]),
    ];
    let mut engine = ScriptedEngine::new(engine_script);

    let outcome = VideoScan::new(&cfg, CancelToken::new())
        .run(
            || Ok(FakeSource::new(20, 10.0)),
            &mut engine,
            &mut NullSink,
        )
        .unwrap();

    assert!(!outcome.cancelled);
    assert_eq!(outcome.stats.sampled_frames, 2);
    assert_eq!(outcome.stats.faces_detected, 3);
    assert_eq!(outcome.stats.faces_passed_quality, 3);
    assert_eq!(outcome.stats.unique_faces, 2);
    assert_eq!(outcome.stats.captures_saved, 2);
    assert_eq!(outcome.stats.frame_failures, 0);

    let ids: Vec<u32> = outcome.faces.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(outcome.faces[0].frame, 10);
    assert_eq!(outcome.faces[1].frame, 20);
    assert!((outcome.faces[0].timestamp - 1.0).abs() < 1e-9);
    assert!((outcome.faces[1].timestamp - 2.0).abs() < 1e-9);

    for face in &outcome.faces {
        assert!(std::path::Path::new(&face.capture_path).exists());
    }

    // the persisted store reproduces the in-memory sequence
    let loaded = store::load(&cfg.encodings_file).unwrap();
    assert_eq!(loaded.faces.len(), 2);
    for (a, b) in outcome.faces.iter().zip(loaded.faces.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.location, b.location);
        for (x, y) in a.encoding.iter().zip(b.encoding.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }
    let meta = loaded.metadata.unwrap();
    assert_eq!(meta.total_faces, 2);
    assert_eq!(meta.config.frame_interval, cfg.frame_interval);
}

#[test]
fn adjacent_frames_dedup_only_by_descriptor_distance() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());

    // Same physical person in consecutive sampled frames, but descriptors
    // past the tolerance: both are kept as distinct. Dedup has no temporal
    // continuity.
    let mut engine = ScriptedEngine::new(vec![
        Step::Faces(vec![(det(10.0, 10.0, 60.0), at_distance(0.0))]),
        Step::Faces(vec![(det(10.0, 10.0, 60.0), at_distance(0.6))]),
    ]);

    let outcome = VideoScan::new(&cfg, CancelToken::new())
        .run(
            || Ok(FakeSource::new(20, 10.0)),
            &mut engine,
            &mut NullSink,
        )
        .unwrap();

    assert_eq!(outcome.stats.unique_faces, 2);
}

#[test]
fn undersized_faces_never_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());

    // 20px face in a sharp, high-contrast frame: rejected on size alone.
    let mut engine = ScriptedEngine::new(vec![Step::Faces(vec![(
        det(10.0, 10.0, 20.0),
        at_distance(0.0),
    )])]);

    let outcome = VideoScan::new(&cfg, CancelToken::new())
        .run(
            || Ok(FakeSource::new(10, 10.0)),
            &mut engine,
            &mut NullSink,
        )
        .unwrap();

    assert_eq!(outcome.stats.faces_detected, 1);
    assert_eq!(outcome.stats.faces_passed_quality, 0);
    assert_eq!(outcome.stats.unique_faces, 0);
}

#[test]
fn detector_failure_on_one_frame_does_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());

    let mut engine = ScriptedEngine::new(vec![
        Step::Fail,
        Step::Faces(vec![(det(10.0, 10.0, 60.0), at_distance(0.0))]),
    ]);

    let outcome = VideoScan::new(&cfg, CancelToken::new())
        .run(
            || Ok(FakeSource::new(20, 10.0)),
            &mut engine,
            &mut NullSink,
        )
        .unwrap();

    assert_eq!(outcome.stats.frame_failures, 1);
    assert_eq!(outcome.stats.unique_faces, 1);
    assert_eq!(outcome.faces[0].frame, 20);
}

#[test]
fn cancelled_scan_still_saves() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());

    let token = CancelToken::new();
    token.cancel();

    let mut engine = ScriptedEngine::new(vec![Step::Faces(vec![(
        det(10.0, 10.0, 60.0),
        at_distance(0.0),
    )])]);

    let outcome = VideoScan::new(&cfg, token)
        .run(
            || Ok(FakeSource::new(20, 10.0)),
            &mut engine,
            &mut NullSink,
        )
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.stats.sampled_frames, 0);
    // the store was still finalized, just empty
    let loaded = store::load(&cfg.encodings_file).unwrap();
    assert!(loaded.faces.is_empty());
}

fn stored_face(id: u32, encoding: Vec<f32>) -> AcceptedFace {
    AcceptedFace {
        id,
        frame: id as u64 * 10,
        timestamp: id as f64,
        location: BoundingBox {
            top: 0,
            right: 120,
            bottom: 120,
            left: 0,
        },
        size: (120, 120),
        quality: FaceQuality {
            contrast: 50.0,
            sharpness: 150.0,
        },
        capture_path: format!("face_{id}.jpg"),
        encoding,
    }
}

#[test]
fn search_ranks_by_confidence_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("faces.json");

    let faces = vec![
        stored_face(1, at_distance(0.1)),
        stored_face(2, at_distance(0.4)),
        stored_face(3, at_distance(0.65)),
    ];
    store::save(
        &path,
        &faces,
        Config::default().snapshot(),
    )
    .unwrap();

    let mut engine = MatchEngine::new(path);
    let matches = engine
        .find_matches(&vec![0.0; 128], &MatchOptions::default())
        .unwrap();

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].face_id, 1);
    assert_eq!(matches[1].face_id, 2);
    assert!((matches[0].confidence - 0.8333).abs() < 1e-3);
    assert!((matches[1].confidence - 0.3333).abs() < 1e-3);
}

#[test]
fn empty_store_yields_zero_matches_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("faces.json");
    store::save(&path, &[], Config::default().snapshot()).unwrap();

    let mut engine = MatchEngine::new(path);
    let matches = engine
        .find_matches(&vec![0.0; 128], &MatchOptions::default())
        .unwrap();
    assert!(matches.is_empty());
}

#[test]
fn batch_search_tolerates_faceless_queries() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("faces.json");
    store::save(
        &store_path,
        &[stored_face(1, at_distance(0.0))],
        Config::default().snapshot(),
    )
    .unwrap();

    // three real image files on disk; the scripted engine sees no face in
    // the second one
    let queries = dir.path().join("queries");
    std::fs::create_dir_all(&queries).unwrap();
    let mut images: Vec<PathBuf> = Vec::new();
    for name in ["a.png", "b.png", "c.png"] {
        let path = queries.join(name);
        checkerboard(64, 64).to_rgb8().save(&path).unwrap();
        images.push(path);
    }

    let mut vision = ScriptedEngine::new(vec![
        Step::Faces(vec![(det(0.0, 0.0, 48.0), at_distance(0.1))]),
        Step::Faces(vec![]),
        Step::Faces(vec![(det(0.0, 0.0, 48.0), at_distance(0.2))]),
    ]);

    let mut engine = MatchEngine::new(store_path);
    let results = engine
        .batch_compare(&mut vision, &images, &MatchOptions::default())
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].1.len(), 1);
    assert!(results[1].1.is_empty());
    assert_eq!(results[2].1.len(), 1);
}
