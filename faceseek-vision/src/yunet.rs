//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: for each stride (8, 16, 32) it emits per-grid-cell
//! classification, objectness, bbox deltas and 5-point landmark deltas. A
//! cell's box decodes as
//!   cx = (grid_x + dx) * stride,  w = dw * stride
//! and likewise for cy/h, normalized by the input size. Output tensor order
//! is cls_8..32, obj_8..32, bbox_8..32, kps_8..32.

use anyhow::Result;
use ndarray::Array2;

const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h, normalized [0,1]
    pub score: f32,
    pub landmarks: [f32; 10], // normalized [0,1]
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Pull output tensor `idx` into a (rows, cols) array, checking its shape.
fn take_tensor(
    outputs: &[(&[i64], &[f32])],
    idx: usize,
    rows: usize,
    cols: usize,
    what: &str,
) -> Result<Array2<f32>> {
    let (shape, data) = outputs
        .get(idx)
        .ok_or_else(|| anyhow::anyhow!("missing {} output at index {}", what, idx))?;
    if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != rows || shape[2] as usize != cols {
        anyhow::bail!(
            "unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
            what,
            idx,
            shape,
            rows,
            cols
        );
    }
    Ok(Array2::from_shape_vec((rows, cols), data.to_vec())?)
}

/// Decode the 12 YuNet output tensors into raw detections above
/// `score_threshold`. Scores are sigmoid(cls) * sigmoid-combined objectness.
pub fn decode_outputs(
    outputs: &[(&[i64], &[f32])],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();

    for (scale_idx, &stride) in STRIDES.iter().enumerate() {
        let grid = input_size / stride;
        let cells = grid * grid;

        let cls = take_tensor(outputs, scale_idx, cells, 1, "cls")?;
        let obj = take_tensor(outputs, scale_idx + 3, cells, 1, "obj")?;
        let boxes = take_tensor(outputs, scale_idx + 6, cells, 4, "bbox")?;
        let kps = take_tensor(outputs, scale_idx + 9, cells, 10, "kps")?;

        for row in 0..grid {
            for col in 0..grid {
                let idx = row * grid + col;
                let score = sigmoid(cls[[idx, 0]] * obj[[idx, 0]]);
                if score < score_threshold {
                    continue;
                }

                // Grid cell plus delta gives the center in stride units.
                let cx = (col as f32 + boxes[[idx, 0]]) * stride as f32 / input_size as f32;
                let cy = (row as f32 + boxes[[idx, 1]]) * stride as f32 / input_size as f32;
                let w = boxes[[idx, 2]] * stride as f32 / input_size as f32;
                let h = boxes[[idx, 3]] * stride as f32 / input_size as f32;

                let mut landmarks = [0f32; 10];
                for k in 0..5 {
                    landmarks[k * 2] =
                        (col as f32 + kps[[idx, k * 2]]) * stride as f32 / input_size as f32;
                    landmarks[k * 2 + 1] =
                        (row as f32 + kps[[idx, k * 2 + 1]]) * stride as f32 / input_size as f32;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(detections)
}
