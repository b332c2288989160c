//! SSD res10 face detector via ONNX Runtime.
//!
//! The network consumes a 300×300 mean-subtracted BGR blob and emits a
//! `[1, 1, N, 7]` candidate tensor. Decoding gates each candidate on a minimum
//! confidence before denormalizing its box against the frame that will be
//! cropped, never against the 300×300 network input.

use crate::tensor::{DetectionTensor, ShapeMismatch};
use crate::types::{Detection, FrameSize, PixelBox};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const DETECTOR_INPUT_SIZE: u32 = 300;
/// Per-channel means in BGR order (res10 Caffe training convention, no
/// channel swap and no scaling).
const DETECTOR_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];

/// Default minimum confidence for a candidate to become a [`Detection`].
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector output: {0}")]
    Shape(#[from] ShapeMismatch),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Black-box detection inference: maps a network input blob to the raw
/// candidate tensor. `&mut self` because ONNX sessions are
/// stateful-but-reentrant-per-call; one in-flight call per engine.
pub trait DetectorEngine {
    fn infer(&mut self, blob: &Array4<f32>) -> Result<DetectionTensor, DetectorError>;
}

/// ONNX-backed SSD face detection engine.
pub struct OnnxDetector {
    session: Session,
}

impl OnnxDetector {
    /// Load the res10 SSD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded SSD face detection model"
        );

        Ok(Self { session })
    }
}

impl DetectorEngine for OnnxDetector {
    fn infer(&mut self, blob: &Array4<f32>) -> Result<DetectionTensor, DetectorError> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(blob.view())?])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detection tensor: {e}")))?;

        Ok(DetectionTensor::from_flat(data)?)
    }
}

/// Build the detector input blob: resize to 300×300 (aspect ratio is
/// deliberately not preserved; coordinates come back normalized) and subtract
/// the per-channel means in BGR channel order.
pub fn detection_blob(image: &RgbImage) -> Array4<f32> {
    let size = DETECTOR_INPUT_SIZE;
    let resized = if image.width() == size && image.height() == size {
        image.clone()
    } else {
        imageops::resize(image, size, size, FilterType::Triangle)
    };

    let mut blob = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        blob[[0, 0, y, x]] = b as f32 - DETECTOR_MEAN_BGR[0];
        blob[[0, 1, y, x]] = g as f32 - DETECTOR_MEAN_BGR[1];
        blob[[0, 2, y, x]] = r as f32 - DETECTOR_MEAN_BGR[2];
    }

    blob
}

/// Confidence-gated decoder from raw candidate tensors to pixel-space
/// detections. Owns the injected detection engine.
pub struct BoxDecoder<E> {
    engine: E,
    min_conf: f32,
}

impl<E: DetectorEngine> BoxDecoder<E> {
    pub fn new(engine: E, min_conf: f32) -> Self {
        Self { engine, min_conf }
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_conf
    }

    /// Run the detection network on an image, returning the raw candidate
    /// tensor. No gating happens here.
    pub fn detect_raw(&mut self, image: &RgbImage) -> Result<DetectionTensor, DetectorError> {
        let blob = detection_blob(image);
        self.engine.infer(&blob)
    }

    /// Decode a single candidate against `frame`.
    ///
    /// Returns `None` when the confidence does not exceed the minimum; the box
    /// is never computed for a rejected candidate. `frame` must be the
    /// dimensions of the image that will be cropped, which is why the
    /// resulting [`Detection`] records it.
    pub fn decode(
        &self,
        frame: FrameSize,
        tensor: &DetectionTensor,
        index: usize,
    ) -> Option<Detection> {
        let confidence = tensor.confidence(index);
        if confidence <= self.min_conf {
            return None;
        }

        let [nx0, ny0, nx1, ny1] = tensor.normalized_box(index);
        let (w, h) = (frame.width as f32, frame.height as f32);

        Some(Detection {
            bbox: PixelBox {
                x0: (nx0 * w) as i32,
                y0: (ny0 * h) as i32,
                x1: (nx1 * w) as i32,
                y1: (ny1 * h) as i32,
            },
            confidence,
            frame,
        })
    }

    /// Decode every candidate that passes the gate, in native tensor order.
    /// A zero-candidate tensor yields an empty vec.
    pub fn decode_all(&self, frame: FrameSize, tensor: &DetectionTensor) -> Vec<Detection> {
        (0..tensor.candidates())
            .filter_map(|i| self.decode(frame, tensor, i))
            .collect()
    }

    /// Detect and decode in one step against the given image.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let tensor = self.detect_raw(image)?;
        let detections = self.decode_all(FrameSize::of(image), &tensor);
        tracing::debug!(
            candidates = tensor.candidates(),
            kept = detections.len(),
            min_conf = self.min_conf,
            "decoded detection tensor"
        );
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Engine that replays a canned tensor, ignoring the blob.
    struct CannedEngine {
        rows: Vec<[f32; 7]>,
    }

    impl DetectorEngine for CannedEngine {
        fn infer(&mut self, _blob: &Array4<f32>) -> Result<DetectionTensor, DetectorError> {
            Ok(DetectionTensor::from_rows(&self.rows))
        }
    }

    fn row(conf: f32, corners: [f32; 4]) -> [f32; 7] {
        [
            0.0, 1.0, conf, corners[0], corners[1], corners[2], corners[3],
        ]
    }

    fn decoder(min_conf: f32) -> BoxDecoder<CannedEngine> {
        BoxDecoder::new(CannedEngine { rows: vec![] }, min_conf)
    }

    const FRAME: FrameSize = FrameSize {
        width: 600,
        height: 400,
    };

    #[test]
    fn test_decode_denormalizes_and_truncates() {
        let t = DetectionTensor::from_rows(&[row(0.9, [0.125, 0.25, 0.333, 0.75])]);
        let d = decoder(0.5).decode(FRAME, &t, 0).unwrap();
        // 0.333 * 600 = 199.8 -> 199; truncation, not rounding
        assert_eq!(
            d.bbox,
            PixelBox {
                x0: 75,
                y0: 100,
                x1: 199,
                y1: 300
            }
        );
        assert_eq!(d.frame, FRAME);
        assert!((d.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_at_or_below_threshold() {
        let t = DetectionTensor::from_rows(&[row(0.5, [0.1, 0.1, 0.9, 0.9])]);
        // Gate is strict: confidence must exceed min_conf
        assert!(decoder(0.5).decode(FRAME, &t, 0).is_none());
        assert!(decoder(0.49).decode(FRAME, &t, 0).is_some());
    }

    #[test]
    fn test_decode_all_keeps_native_order() {
        let t = DetectionTensor::from_rows(&[
            row(0.6, [0.0, 0.0, 0.1, 0.1]),
            row(0.9, [0.2, 0.2, 0.3, 0.3]),
            row(0.7, [0.4, 0.4, 0.5, 0.5]),
        ]);
        let dets = decoder(0.5).decode_all(FRAME, &t);
        let confs: Vec<f32> = dets.iter().map(|d| d.confidence).collect();
        // Tensor order, not confidence order
        assert_eq!(confs, vec![0.6, 0.9, 0.7]);
    }

    #[test]
    fn test_decode_all_threshold_monotonicity() {
        let t = DetectionTensor::from_rows(&[
            row(0.3, [0.0; 4]),
            row(0.55, [0.0; 4]),
            row(0.8, [0.0; 4]),
            row(0.95, [0.0; 4]),
        ]);
        let mut previous = usize::MAX;
        for t10 in 0..=10 {
            let kept = decoder(t10 as f32 / 10.0).decode_all(FRAME, &t).len();
            assert!(kept <= previous, "raising the threshold grew the result");
            previous = kept;
        }
    }

    #[test]
    fn test_decode_all_empty_tensor() {
        let t = DetectionTensor::from_rows(&[]);
        assert!(decoder(0.5).decode_all(FRAME, &t).is_empty());
    }

    #[test]
    fn test_decode_all_everything_below_threshold() {
        let t = DetectionTensor::from_rows(&[row(0.1, [0.0; 4]), row(0.2, [0.0; 4])]);
        assert!(decoder(0.5).decode_all(FRAME, &t).is_empty());
    }

    #[test]
    fn test_detection_blob_shape_and_bgr_means() {
        let img = RgbImage::from_pixel(300, 300, image::Rgb([10, 20, 30]));
        let blob = detection_blob(&img);
        assert_eq!(blob.shape(), &[1, 3, 300, 300]);
        // Channel 0 is blue minus 104.0, channel 2 is red minus 123.0
        assert!((blob[[0, 0, 150, 150]] - (30.0 - 104.0)).abs() < 1e-6);
        assert!((blob[[0, 1, 150, 150]] - (20.0 - 177.0)).abs() < 1e-6);
        assert!((blob[[0, 2, 150, 150]] - (10.0 - 123.0)).abs() < 1e-6);
    }

    #[test]
    fn test_detection_blob_resizes_any_input() {
        let img = RgbImage::from_pixel(640, 480, image::Rgb([128, 128, 128]));
        let blob = detection_blob(&img);
        assert_eq!(blob.shape(), &[1, 3, 300, 300]);
        // Uniform image stays uniform through the resize
        assert!((blob[[0, 1, 0, 0]] - (128.0 - 177.0)).abs() < 1e-3);
        assert!((blob[[0, 1, 299, 299]] - (128.0 - 177.0)).abs() < 1e-3);
    }

    #[test]
    fn test_detect_gates_through_engine() {
        let engine = CannedEngine {
            rows: vec![row(0.9, [0.1, 0.1, 0.5, 0.5]), row(0.2, [0.0; 4])],
        };
        let mut decoder = BoxDecoder::new(engine, 0.5);
        let img = RgbImage::from_pixel(200, 100, image::Rgb([0, 0, 0]));
        let dets = decoder.detect(&img).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(
            dets[0].frame,
            FrameSize {
                width: 200,
                height: 100
            }
        );
        assert_eq!(
            dets[0].bbox,
            PixelBox {
                x0: 20,
                y0: 10,
                x1: 100,
                y1: 50
            }
        );
    }
}
