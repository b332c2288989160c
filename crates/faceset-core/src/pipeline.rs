//! Frame-at-a-time face pipeline: resize, detect, embed.
//!
//! Composes the decoder and extractor around a canonical frame width and
//! exposes the plumbing toward the landmark/editing collaborators. The
//! pipeline is stateless across frames; engines are reused but never called
//! concurrently.

use crate::detector::{BoxDecoder, DetectorEngine, DetectorError};
use crate::embedder::{EmbedderError, EmbeddingEngine, EmbeddingExtractor};
use crate::frame;
use crate::tensor::DetectionTensor;
use crate::types::{Detection, Embedding, FrameSize, PixelBox};
use image::RgbImage;
use thiserror::Error;

/// Default canonical frame width before detection.
pub const DEFAULT_FRAME_WIDTH: u32 = 600;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Landmark estimation collaborator. Internals (model, landmark count) are
/// the collaborator's business; the pipeline only routes boxes in and
/// landmark sets out.
pub trait Landmarker {
    /// Facial landmarks for each box, index-aligned with `boxes`.
    fn landmarks(&mut self, image: &RgbImage, boxes: &[PixelBox]) -> Vec<Vec<(f32, f32)>>;

    /// Head roll angle in degrees derived from one landmark set.
    fn angle(&self, landmarks: &[(f32, f32)]) -> f32;
}

/// Rotation-aware face editing collaborator.
pub trait FaceEditor {
    /// Blur each face region, rotating the blur kernel by the face's angle.
    fn blur_faces(
        &mut self,
        image: &mut RgbImage,
        boxes: &[PixelBox],
        angles: &[f32],
        kernel_size: u32,
        padding: Option<u32>,
    );

    /// Replace each face region with the background image (or a fill when
    /// absent).
    fn remove_faces(
        &mut self,
        image: &mut RgbImage,
        boxes: &[PixelBox],
        background: Option<&RgbImage>,
        padding: Option<u32>,
    );
}

/// Detection + embedding over single frames, with injected engines.
pub struct FacePipeline<D, E> {
    decoder: BoxDecoder<D>,
    extractor: EmbeddingExtractor<E>,
    frame_width: u32,
}

impl<D: DetectorEngine, E: EmbeddingEngine> FacePipeline<D, E> {
    pub fn new(decoder: BoxDecoder<D>, extractor: EmbeddingExtractor<E>, frame_width: u32) -> Self {
        Self {
            decoder,
            extractor,
            frame_width,
        }
    }

    /// Normalize a frame to the canonical width. Every other pipeline method
    /// expects its image argument to have gone through this first; boxes are
    /// denormalized against the image they are decoded with.
    pub fn prepare(&self, image: RgbImage) -> RgbImage {
        frame::resize_to_width(image, self.frame_width)
    }

    /// Raw candidate tensor for a prepared frame.
    pub fn detect_raw(&mut self, image: &RgbImage) -> Result<DetectionTensor, DetectorError> {
        self.decoder.detect_raw(image)
    }

    /// All gated detections for a prepared frame, in native tensor order.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        self.decoder.detect(image)
    }

    /// Detections plus an extraction attempt per detection, index-aligned.
    /// `None` entries are crops below the minimum dimension.
    pub fn boxes_and_embeddings(
        &mut self,
        image: &RgbImage,
    ) -> Result<(Vec<Detection>, Vec<Option<Embedding>>), PipelineError> {
        let detections = self.detect(image)?;

        let mut embeddings = Vec::with_capacity(detections.len());
        for detection in &detections {
            embeddings.push(self.extractor.extract(image, detection)?);
        }

        Ok((detections, embeddings))
    }

    /// Best-guess detection for a single-face image: the candidate with the
    /// globally maximum confidence over all tensor rows, then the usual
    /// threshold-gated decode of that one index. A best candidate below the
    /// gate yields `None` rather than falling back to a weaker row.
    pub fn best_detection(&self, frame: FrameSize, tensor: &DetectionTensor) -> Option<Detection> {
        let best = tensor.argmax_confidence()?;
        self.decoder.decode(frame, tensor, best)
    }

    /// Embedding for the best-guess face of a prepared frame, or `None` when
    /// there is no usable face (no candidates, best below gate, crop too
    /// small).
    pub fn embed_best(&mut self, image: &RgbImage) -> Result<Option<Embedding>, PipelineError> {
        let tensor = self.detect_raw(image)?;
        let Some(detection) = self.best_detection(FrameSize::of(image), &tensor) else {
            return Ok(None);
        };
        Ok(self.extractor.extract(image, &detection)?)
    }

    /// Detect faces and hand their boxes and angles to the editing
    /// collaborator for blurring. Operates on the caller's image in place,
    /// without resizing.
    pub fn blur_faces(
        &mut self,
        image: &mut RgbImage,
        landmarker: &mut dyn Landmarker,
        editor: &mut dyn FaceEditor,
        kernel_size: u32,
        padding: Option<u32>,
    ) -> Result<(), PipelineError> {
        let boxes: Vec<PixelBox> = self.detect(image)?.iter().map(|d| d.bbox).collect();
        let angles: Vec<f32> = landmarker
            .landmarks(image, &boxes)
            .iter()
            .map(|set| landmarker.angle(set))
            .collect();

        editor.blur_faces(image, &boxes, &angles, kernel_size, padding);
        Ok(())
    }

    /// Detect faces and hand their boxes to the editing collaborator for
    /// removal. No angles are needed for removal.
    pub fn remove_faces(
        &mut self,
        image: &mut RgbImage,
        editor: &mut dyn FaceEditor,
        background: Option<&RgbImage>,
        padding: Option<u32>,
    ) -> Result<(), PipelineError> {
        let boxes: Vec<PixelBox> = self.detect(image)?.iter().map(|d| d.bbox).collect();
        editor.remove_faces(image, &boxes, background, padding);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DEFAULT_MIN_CONFIDENCE;
    use crate::embedder::DEFAULT_MIN_DIM;
    use ndarray::Array4;

    struct CannedDetector {
        rows: Vec<[f32; 7]>,
    }

    impl DetectorEngine for CannedDetector {
        fn infer(&mut self, _blob: &Array4<f32>) -> Result<DetectionTensor, DetectorError> {
            Ok(DetectionTensor::from_rows(&self.rows))
        }
    }

    struct CountingEmbedder {
        calls: usize,
    }

    impl EmbeddingEngine for CountingEmbedder {
        fn infer(&mut self, _blob: &Array4<f32>) -> Result<Embedding, EmbedderError> {
            self.calls += 1;
            Ok(Embedding {
                values: vec![self.calls as f32; Embedding::DIM],
            })
        }
    }

    fn row(conf: f32, corners: [f32; 4]) -> [f32; 7] {
        [
            0.0, 1.0, conf, corners[0], corners[1], corners[2], corners[3],
        ]
    }

    fn pipeline(rows: Vec<[f32; 7]>) -> FacePipeline<CannedDetector, CountingEmbedder> {
        FacePipeline::new(
            BoxDecoder::new(CannedDetector { rows }, DEFAULT_MIN_CONFIDENCE),
            EmbeddingExtractor::new(CountingEmbedder { calls: 0 }, DEFAULT_MIN_DIM),
            DEFAULT_FRAME_WIDTH,
        )
    }

    fn image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb([80, 80, 80]))
    }

    #[test]
    fn test_prepare_resizes_to_canonical_width() {
        let p = pipeline(vec![]);
        let prepared = p.prepare(image(1200, 900));
        assert_eq!(prepared.width(), DEFAULT_FRAME_WIDTH);
        assert_eq!(prepared.height(), 450);
    }

    #[test]
    fn test_boxes_and_embeddings_are_index_aligned() {
        // Second box is degenerate (sub-min_dim) so its slot must be None
        let p = &mut pipeline(vec![
            row(0.9, [0.1, 0.1, 0.6, 0.6]),
            row(0.8, [0.5, 0.5, 0.51, 0.51]),
        ]);
        let img = image(600, 400);
        let (detections, embeddings) = p.boxes_and_embeddings(&img).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(embeddings.len(), 2);
        assert!(embeddings[0].is_some());
        assert!(embeddings[1].is_none());
    }

    #[test]
    fn test_embed_best_uses_global_argmax() {
        // Highest-confidence row is the second; the embedder sees one call
        let p = &mut pipeline(vec![
            row(0.6, [0.0, 0.0, 0.2, 0.2]),
            row(0.95, [0.3, 0.3, 0.8, 0.8]),
        ]);
        let img = image(600, 400);
        let embedding = p.embed_best(&img).unwrap().unwrap();
        assert_eq!(embedding.values[0], 1.0);
    }

    #[test]
    fn test_embed_best_rejects_gated_argmax() {
        // Best candidate sits below the gate: no fallback to weaker rows
        let p = &mut pipeline(vec![row(0.4, [0.1, 0.1, 0.9, 0.9])]);
        let img = image(600, 400);
        assert!(p.embed_best(&img).unwrap().is_none());
    }

    #[test]
    fn test_embed_best_empty_tensor() {
        let p = &mut pipeline(vec![]);
        let img = image(600, 400);
        assert!(p.embed_best(&img).unwrap().is_none());
    }

    struct RecordingLandmarker;

    impl Landmarker for RecordingLandmarker {
        fn landmarks(&mut self, _image: &RgbImage, boxes: &[PixelBox]) -> Vec<Vec<(f32, f32)>> {
            boxes
                .iter()
                .map(|b| vec![(b.x0 as f32, b.y0 as f32)])
                .collect()
        }

        fn angle(&self, landmarks: &[(f32, f32)]) -> f32 {
            landmarks[0].0
        }
    }

    #[derive(Default)]
    struct RecordingEditor {
        blurred: Vec<(usize, usize, u32)>,
        removed: Vec<usize>,
    }

    impl FaceEditor for RecordingEditor {
        fn blur_faces(
            &mut self,
            _image: &mut RgbImage,
            boxes: &[PixelBox],
            angles: &[f32],
            kernel_size: u32,
            _padding: Option<u32>,
        ) {
            self.blurred.push((boxes.len(), angles.len(), kernel_size));
        }

        fn remove_faces(
            &mut self,
            _image: &mut RgbImage,
            boxes: &[PixelBox],
            _background: Option<&RgbImage>,
            _padding: Option<u32>,
        ) {
            self.removed.push(boxes.len());
        }
    }

    #[test]
    fn test_blur_faces_routes_boxes_and_angles() {
        let p = &mut pipeline(vec![
            row(0.9, [0.1, 0.1, 0.4, 0.4]),
            row(0.8, [0.5, 0.5, 0.9, 0.9]),
        ]);
        let mut img = image(600, 400);
        let mut landmarker = RecordingLandmarker;
        let mut editor = RecordingEditor::default();

        p.blur_faces(&mut img, &mut landmarker, &mut editor, 50, None)
            .unwrap();

        assert_eq!(editor.blurred, vec![(2, 2, 50)]);
    }

    #[test]
    fn test_remove_faces_routes_boxes() {
        let p = &mut pipeline(vec![row(0.9, [0.1, 0.1, 0.4, 0.4])]);
        let mut img = image(600, 400);
        let mut editor = RecordingEditor::default();

        p.remove_faces(&mut img, &mut editor, None, Some(5)).unwrap();

        assert_eq!(editor.removed, vec![1]);
    }
}
