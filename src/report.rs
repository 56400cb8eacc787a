//! Structured result documents written after searches, for downstream
//! consumption.

use std::collections::BTreeMap;
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::error::Result;
use crate::matcher::MatchResult;

fn percent(confidence: f32) -> f64 {
    (confidence as f64 * 100.0 * 100.0).round() / 100.0
}

#[derive(Debug, Serialize)]
pub struct BestMatch {
    pub face_id: u32,
    pub frame: u64,
    /// Confidence as a percentage, two decimals.
    pub confidence: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct MatchEntry {
    pub face_id: u32,
    pub frame: u64,
    pub confidence: f64,
    pub timestamp: String,
    pub quality_score: f64,
}

/// Per-search summary document.
#[derive(Debug, Serialize)]
pub struct MatchReport {
    pub target_image: String,
    pub total_matches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_match: Option<BestMatch>,
    pub average_confidence: f64,
    pub matches: Vec<MatchEntry>,
    pub summary: String,
}

impl MatchReport {
    pub fn build(target_image: &str, matches: &[MatchResult]) -> Self {
        if matches.is_empty() {
            return Self {
                target_image: target_image.to_string(),
                total_matches: 0,
                best_match: None,
                average_confidence: 0.0,
                matches: Vec::new(),
                summary: "No matches found".to_string(),
            };
        }

        let best = &matches[0];
        let avg =
            matches.iter().map(|m| m.confidence as f64).sum::<f64>() / matches.len() as f64;

        Self {
            target_image: target_image.to_string(),
            total_matches: matches.len(),
            best_match: Some(BestMatch {
                face_id: best.face_id,
                frame: best.frame,
                confidence: percent(best.confidence),
                timestamp: format!("{:.2}s", best.timestamp),
            }),
            average_confidence: (avg * 100.0 * 100.0).round() / 100.0,
            matches: matches
                .iter()
                .map(|m| MatchEntry {
                    face_id: m.face_id,
                    frame: m.frame,
                    confidence: percent(m.confidence),
                    timestamp: format!("{:.2}s", m.timestamp),
                    quality_score: m.quality.score(),
                })
                .collect(),
            summary: format!(
                "Found {} matches. Best match has {:.1}% confidence at frame {}.",
                matches.len(),
                best.confidence * 100.0,
                best.frame
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub images_processed: usize,
    pub total_matches: usize,
    pub tolerance_used: f32,
}

#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub face_id: u32,
    pub frame: u64,
    pub confidence: f64,
    pub timestamp: f64,
}

/// Per-batch-search summary document, keyed by query file name.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub results: BTreeMap<String, Vec<BatchEntry>>,
}

impl BatchReport {
    pub fn build(results: &[(String, Vec<MatchResult>)], tolerance: f32) -> Self {
        let total_matches = results.iter().map(|(_, m)| m.len()).sum();
        let mut by_image = BTreeMap::new();
        for (image, matches) in results {
            let name = Path::new(image)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| image.clone());
            let entries = matches
                .iter()
                .map(|m| BatchEntry {
                    face_id: m.face_id,
                    frame: m.frame,
                    confidence: percent(m.confidence),
                    timestamp: m.timestamp,
                })
                .collect();
            by_image.insert(name, entries);
        }

        Self {
            summary: BatchSummary {
                images_processed: results.len(),
                total_matches,
                tolerance_used: tolerance,
            },
            results: by_image,
        }
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)?;
    std::fs::write(path, data)?;
    info!("report written to {}", path.display());
    Ok(())
}

/// Seconds as MM:SS, or HH:MM:SS past the hour.
pub fn format_time(seconds: f64) -> String {
    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// Byte count in human units.
pub fn format_file_size(size_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if size_bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BoundingBox, FaceQuality};

    fn result(face_id: u32, confidence: f32) -> MatchResult {
        MatchResult {
            face_id,
            frame: face_id as u64 * 10,
            timestamp: face_id as f64 * 0.4,
            confidence,
            location: BoundingBox {
                top: 0,
                right: 100,
                bottom: 100,
                left: 0,
            },
            quality: FaceQuality {
                contrast: 30.0,
                sharpness: 70.0,
            },
            capture_path: format!("{face_id}.jpg"),
        }
    }

    #[test]
    fn test_match_report() {
        let matches = vec![result(3, 0.9), result(1, 0.5)];
        let report = MatchReport::build("person.jpg", &matches);

        assert_eq!(report.total_matches, 2);
        let best = report.best_match.unwrap();
        assert_eq!(best.face_id, 3);
        assert_eq!(best.confidence, 90.0);
        assert_eq!(report.average_confidence, 70.0);
        assert_eq!(report.matches[0].quality_score, 100.0);
    }

    #[test]
    fn test_empty_match_report() {
        let report = MatchReport::build("person.jpg", &[]);
        assert_eq!(report.total_matches, 0);
        assert!(report.best_match.is_none());
        assert_eq!(report.summary, "No matches found");
    }

    #[test]
    fn test_batch_report_keys_by_file_name() {
        let results = vec![
            ("queries/alice.jpg".to_string(), vec![result(1, 0.8)]),
            ("queries/bob.jpg".to_string(), Vec::new()),
        ];
        let report = BatchReport::build(&results, 0.6);
        assert_eq!(report.summary.images_processed, 2);
        assert_eq!(report.summary.total_matches, 1);
        assert_eq!(report.results["alice.jpg"].len(), 1);
        assert!(report.results["bob.jpg"].is_empty());
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(42.7), "00:42");
        assert_eq!(format_time(125.0), "02:05");
        assert_eq!(format_time(3725.0), "01:02:05");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512.0 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }
}
