//! In-memory session index of accepted face descriptors.
//!
//! Uniqueness is a linear scan of every previously accepted descriptor.
//! That is fine for the hundreds-to-low-thousands of unique faces a single
//! video yields; a corpus beyond that would need a real ANN structure.

use faceseek_vision::face::embedding_distance;
use log::debug;

use crate::quality::FaceCandidate;
use crate::store::AcceptedFace;

/// Single-writer collection of the faces accepted so far in one scan.
/// Persistence is the store's job; this lives only for the session.
pub struct UniquenessIndex {
    tolerance: f32,
    faces: Vec<AcceptedFace>,
}

impl UniquenessIndex {
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance,
            faces: Vec::new(),
        }
    }

    /// True when no accepted descriptor lies within the dedup tolerance.
    /// An empty index accepts anything.
    pub fn is_unique(&self, descriptor: &[f32]) -> bool {
        self.faces
            .iter()
            .all(|face| embedding_distance(&face.encoding, descriptor) > self.tolerance)
    }

    /// Record a face that already passed quality and uniqueness checks.
    /// Ids are assigned contiguously from 1 in acceptance order; this call
    /// cannot fail.
    pub fn accept(
        &mut self,
        candidate: FaceCandidate,
        frame: u64,
        timestamp: f64,
        capture_path: String,
        encoding: Vec<f32>,
    ) -> &AcceptedFace {
        let id = self.faces.len() as u32 + 1;
        debug!("accepting face #{id} from frame {frame}");
        self.faces.push(AcceptedFace {
            id,
            frame,
            timestamp,
            location: candidate.location,
            size: candidate.size,
            quality: candidate.quality,
            capture_path,
            encoding,
        });
        self.faces.last().expect("just pushed")
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn faces(&self) -> &[AcceptedFace] {
        &self.faces
    }

    pub fn into_faces(self) -> Vec<AcceptedFace> {
        self.faces
    }
}
