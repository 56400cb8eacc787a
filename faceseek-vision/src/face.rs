use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// A face found by the YuNet detector, in source-image pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,...,x5,y5
}

impl Detection {
    pub fn area(&self) -> f32 {
        self.bbox[2] * self.bbox[3]
    }
}

/// L2-normalized face descriptor (SFace output, 128 values).
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        self.vector.as_slice().expect("contiguous embedding")
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

const DETECT_INPUT: u32 = 640;
const ENCODE_INPUT: u32 = 112;

/// Letterbox placement of an image on a square canvas.
struct Letterbox {
    scale: f32,
    dx: f32,
    dy: f32,
}

/// Resize into a square canvas preserving aspect ratio, padding with black.
fn letterbox(img: &DynamicImage, side: u32) -> (DynamicImage, Letterbox) {
    let (w, h) = img.dimensions();
    let scale = side as f32 / w.max(h) as f32;
    let new_w = (w as f32 * scale) as u32;
    let new_h = (h as f32 * scale) as u32;
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);

    let mut canvas = DynamicImage::new_rgb8(side, side);
    let dx = (side - new_w) / 2;
    let dy = (side - new_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, dx as i64, dy as i64);

    (
        canvas,
        Letterbox {
            scale,
            dx: dx as f32,
            dy: dy as f32,
        },
    )
}

/// Pack an RGB image into a [1, 3, side, side] BGR channel-planar tensor
/// with values in [0, 255], the layout both ONNX models expect.
fn bgr_blob(img: &DynamicImage, side: u32) -> Result<Array4<f32>> {
    let rgb = img.to_rgb8();
    let pixels = rgb.as_raw();
    let plane = (side * side) as usize;
    let mut data = vec![0f32; 3 * plane];

    let (b_plane, rest) = data.split_at_mut(plane);
    let (g_plane, r_plane) = rest.split_at_mut(plane);
    for i in 0..plane {
        let p = i * 3;
        r_plane[i] = pixels[p] as f32;
        g_plane[i] = pixels[p + 1] as f32;
        b_plane[i] = pixels[p + 2] as f32;
    }

    Ok(Array4::from_shape_vec(
        (1, 3, side as usize, side as usize),
        data,
    )?)
}

/// Detect faces with YuNet. Coordinates of the returned detections are in
/// the original image's pixel space, letterbox padding removed.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (canvas, placement) = letterbox(img, DETECT_INPUT);
    let input = Value::from_array(bgr_blob(&canvas, DETECT_INPUT)?)?;
    let outputs = session.run(ort::inputs![input])?;

    let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        tensors.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let views: Vec<(&[i64], &[f32])> = tensors
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let raw = yunet::decode_outputs(&views, DETECT_INPUT as usize, score_threshold)?;

    let side = DETECT_INPUT as f32;
    let mut detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            // Normalized canvas coords -> canvas pixels -> source pixels.
            let x = (d.bbox[0] * side - placement.dx) / placement.scale;
            let y = (d.bbox[1] * side - placement.dy) / placement.scale;
            let w = d.bbox[2] * side / placement.scale;
            let h = d.bbox[3] * side / placement.scale;

            let mut landmarks = [0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (d.landmarks[k * 2] * side - placement.dx) / placement.scale;
                landmarks[k * 2 + 1] =
                    (d.landmarks[k * 2 + 1] * side - placement.dy) / placement.scale;
            }

            Detection {
                bbox: [x, y, w, h],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    }
    Ok(detections)
}

/// Greedy non-maximum suppression by descending score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

    let mut keep: Vec<Detection> = Vec::new();
    for det in sorted {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

// ArcFace reference eye positions for a 112x112 crop.
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

/// Rotate/scale/translate the face so the eyes land on the reference
/// positions, producing a `size`x`size` crop for the encoder.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);

    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let angle = eye_dy.atan2(eye_dx);

    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let eye_dist = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();
    if eye_dist <= f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eyes coincide");
    }
    let scale = (size as f32 / ENCODE_INPUT as f32) * (ref_dist / eye_dist);

    let eye_center = (
        (left_eye.0 + right_eye.0) / 2.0,
        (left_eye.1 + right_eye.1) / 2.0,
    );
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * size as f32 / ENCODE_INPUT as f32,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * size as f32 / ENCODE_INPUT as f32,
    );

    // Forward affine: rotate around the eye center, scale, then translate
    // the eye center onto the reference center.
    let (sin, cos) = angle.sin_cos();
    let m = [scale * cos, scale * sin, -scale * sin, scale * cos];
    let tx = ref_center.0 - (m[0] * eye_center.0 + m[1] * eye_center.1);
    let ty = ref_center.1 - (m[2] * eye_center.0 + m[3] * eye_center.1);

    let det = m[0] * m[3] - m[1] * m[2];
    let (img_w, img_h) = img.dimensions();
    let mut out = image::RgbImage::new(size, size);

    for oy in 0..size {
        for ox in 0..size {
            // Invert the affine to find the source sample point.
            let px = ox as f32 - tx;
            let py = oy as f32 - ty;
            let sx = (m[3] * px - m[1] * py) / det;
            let sy = (-m[2] * px + m[0] * py) / det;

            if sx < 0.0 || sy < 0.0 || sx >= img_w as f32 || sy >= img_h as f32 {
                continue; // outside source, stays black
            }

            let x0 = sx.floor() as u32;
            let y0 = sy.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let p00 = img.get_pixel(x0, y0);
            let p10 = img.get_pixel(x1, y0);
            let p01 = img.get_pixel(x0, y1);
            let p11 = img.get_pixel(x1, y1);

            let mut rgb = [0u8; 3];
            for c in 0..3 {
                let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
                let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
                rgb[c] = (top * (1.0 - fy) + bottom * fy) as u8;
            }
            out.put_pixel(ox, oy, image::Rgb(rgb));
        }
    }

    Ok(DynamicImage::ImageRgb8(out))
}

/// Encode an aligned face crop into an L2-normalized embedding.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let resized = face_img.resize_exact(
        ENCODE_INPUT,
        ENCODE_INPUT,
        image::imageops::FilterType::Triangle,
    );
    let input = Value::from_array(bgr_blob(&resized, ENCODE_INPUT)?)?;
    let outputs = session.run(ort::inputs![input])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let len = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let mut values: Vec<f32> = data[..len].to_vec();

    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }

    Ok(Embedding::from_vec(values))
}

/// Euclidean distance between two descriptors. Lower means more similar;
/// with L2-normalized vectors the range is [0, 2].
pub fn embedding_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
