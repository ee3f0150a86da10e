//! SCRFD face detector via ONNX Runtime.
//!
//! Frames are letterboxed into the square model input, decoded per stride
//! from the anchor-free score and distance outputs, filtered by NMS, and
//! reported as boxes normalized to the source frame.

use crate::detector::{DetectorError, FaceDetector, LumaFrame};
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f64 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

const DETECTOR_NAME: &str = "scrfd";

#[derive(Error, Debug)]
pub enum FaceModelError {
    #[error("face model not found: {0}")]
    ModelNotFound(String),
    #[error("face model has {0} outputs; need score and bbox tensors for 3 strides")]
    UnsupportedModel(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Mapping from letterboxed model input back to source pixels.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    frame_width: f32,
    frame_height: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, input: usize) -> Self {
        let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (input as f32 - new_w) / 2.0,
            pad_y: (input as f32 - new_h) / 2.0,
            frame_width: width as f32,
            frame_height: height as f32,
        }
    }

    /// Model-space corners to a box normalized to the source frame.
    fn to_frame(&self, x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> BoundingBox {
        let nx = |x: f32| (((x - self.pad_x) / self.scale) / self.frame_width).clamp(0.0, 1.0);
        let ny = |y: f32| (((y - self.pad_y) / self.scale) / self.frame_height).clamp(0.0, 1.0);
        let (left, top) = (nx(x1), ny(y1));
        let (right, bottom) = (nx(x2), ny(y2));
        BoundingBox {
            x: left as f64,
            y: top as f64,
            width: (right - left) as f64,
            height: (bottom - top) as f64,
            confidence,
        }
    }
}

/// Output tensor indices for one stride: (score, bbox).
type StrideOutputs = (usize, usize);

/// SCRFD-based [`FaceDetector`].
pub struct ScrfdFaceDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl ScrfdFaceDetector {
    /// Load the SCRFD ONNX model from `model_path`.
    pub fn load(model_path: &str) -> Result<Self, FaceModelError> {
        if !Path::new(model_path).exists() {
            return Err(FaceModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 6 {
            return Err(FaceModelError::UnsupportedModel(names.len()));
        }

        let stride_outputs = discover_outputs(&names);
        tracing::info!(
            path = model_path,
            outputs = ?names,
            ?stride_outputs,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    fn infer(&mut self, frame: &LumaFrame<'_>) -> Result<Vec<BoundingBox>, String> {
        let (input, letterbox) = preprocess(frame, SCRFD_INPUT_SIZE);
        let view = TensorRef::from_array_view(input.view()).map_err(|e| e.to_string())?;
        let outputs = self
            .session
            .run(ort::inputs![view])
            .map_err(|e| e.to_string())?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(&self.stride_outputs)
        {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| format!("scores stride {stride}: {e}"))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| format!("bboxes stride {stride}: {e}"))?;
            candidates.extend(decode_stride(
                scores,
                bboxes,
                stride,
                SCRFD_INPUT_SIZE,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

impl FaceDetector for ScrfdFaceDetector {
    fn detect_faces(&mut self, frame: &LumaFrame<'_>) -> Result<Vec<BoundingBox>, DetectorError> {
        frame.validate()?;
        if frame.pixel_count() == 0 {
            return Ok(Vec::new());
        }
        self.infer(frame).map_err(|reason| DetectorError::Backend {
            detector: DETECTOR_NAME,
            reason,
        })
    }
}

/// Map output names like `score_8` / `bbox_8` to stride slots, falling back
/// to the positional export order `[scores 8/16/32, bboxes 8/16/32, ...]`.
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => {
            tracing::debug!(
                ?names,
                "SCRFD output names not recognized; using positional mapping"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Letterbox a luma frame into a `1x3xNxN` tensor, replicating the single
/// channel. Padding uses the mean so it normalizes to zero.
fn preprocess(frame: &LumaFrame<'_>, input: usize) -> (Array4<f32>, Letterbox) {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let letterbox = Letterbox::fit(width, height, input);

    let new_w = ((width as f32 * letterbox.scale).round() as usize).min(input);
    let new_h = ((height as f32 * letterbox.scale).round() as usize).min(input);
    let pad_x = letterbox.pad_x.floor() as usize;
    let pad_y = letterbox.pad_y.floor() as usize;
    let inv_scale = 1.0 / letterbox.scale;

    let mut tensor = Array4::<f32>::zeros((1, 3, input, input));
    for y in 0..input {
        for x in 0..input {
            let inside =
                (pad_y..pad_y + new_h).contains(&y) && (pad_x..pad_x + new_w).contains(&x);
            let pixel = if inside {
                let (dx, dy) = ((x - pad_x) as f32, (y - pad_y) as f32);
                bilinear(frame.data, width, height, dx, dy, inv_scale)
            } else {
                SCRFD_MEAN
            };
            let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
            for channel in 0..3 {
                tensor[[0, channel, y, x]] = normalized;
            }
        }
    }

    (tensor, letterbox)
}

/// Sample the source at the position of destination pixel `(dx, dy)`.
fn bilinear(
    data: &[u8],
    width: usize,
    height: usize,
    dx: f32,
    dy: f32,
    inv_scale: f32,
) -> f32 {
    let src_x = (dx + 0.5) * inv_scale - 0.5;
    let src_y = (dy + 0.5) * inv_scale - 0.5;
    let x0 = (src_x.floor() as i64).clamp(0, width as i64 - 1) as usize;
    let y0 = (src_y.floor() as i64).clamp(0, height as i64 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
    let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

    let at = |x: usize, y: usize| data[y * width + x] as f32;
    at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x1, y0) * fx * (1.0 - fy)
        + at(x0, y1) * (1.0 - fx) * fy
        + at(x1, y1) * fx * fy
}

/// Decode one stride level into normalized boxes above `threshold`.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut boxes = Vec::new();
    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * step;
        let cy = (cell / grid) as f32 * step;
        boxes.push(letterbox.to_frame(
            cx - d[0] * step,
            cy - d[1] * step,
            cx + d[2] * step,
            cy + d[3] * step,
            score,
        ));
    }
    boxes
}

/// Keep the most confident box of each overlapping cluster, best first.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f64) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
