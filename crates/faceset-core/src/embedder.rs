//! OpenFace face embedder via ONNX Runtime.
//!
//! Extracts 128-dimensional face embeddings from detected face crops using
//! the nn4.small2 model. Crops below a minimum dimension are rejected before
//! inference — a near-zero-area region produces a meaningless vector.

use crate::types::{Detection, Embedding, FrameSize};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from the detector!) ---
const EMBED_INPUT_SIZE: u32 = 96;
/// OpenFace scales pixels to [0, 1] with no mean subtraction, RGB channel
/// order (the original BGR pipeline swapped channels; ours are already RGB).
const EMBED_SCALE: f32 = 1.0 / 255.0;

/// Default minimum crop dimension in pixels.
pub const DEFAULT_MIN_DIM: u32 = 10;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected a {expected}-dim embedding, got {got}")]
    BadLength { expected: usize, got: usize },
    #[error("detection decoded against a {decoded_width}x{decoded_height} frame applied to a {given_width}x{given_height} image")]
    FrameMismatch {
        decoded_width: u32,
        decoded_height: u32,
        given_width: u32,
        given_height: u32,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Black-box embedding inference: maps a face blob to a fixed-length vector.
pub trait EmbeddingEngine {
    fn infer(&mut self, blob: &Array4<f32>) -> Result<Embedding, EmbedderError>;
}

/// ONNX-backed OpenFace embedding engine.
pub struct OnnxEmbedder {
    session: Session,
}

impl OnnxEmbedder {
    /// Load the OpenFace nn4.small2 ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded OpenFace embedding model"
        );

        Ok(Self { session })
    }
}

impl EmbeddingEngine for OnnxEmbedder {
    fn infer(&mut self, blob: &Array4<f32>) -> Result<Embedding, EmbedderError> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(blob.view())?])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        // Flatten whatever shape the export used down to one vector
        let values: Vec<f32> = data.to_vec();
        if values.len() != Embedding::DIM {
            return Err(EmbedderError::BadLength {
                expected: Embedding::DIM,
                got: values.len(),
            });
        }

        Ok(Embedding { values })
    }
}

/// Build the embedder input blob: resize the crop to 96×96 and scale to
/// [0, 1], RGB channel order, zero mean.
pub fn face_blob(face: &RgbImage) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE;
    let resized = if face.width() == size && face.height() == size {
        face.clone()
    } else {
        imageops::resize(face, size, size, FilterType::Triangle)
    };

    let mut blob = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        blob[[0, 0, y, x]] = r as f32 * EMBED_SCALE;
        blob[[0, 1, y, x]] = g as f32 * EMBED_SCALE;
        blob[[0, 2, y, x]] = b as f32 * EMBED_SCALE;
    }

    blob
}

/// Turns detections into embeddings. Owns the injected embedding engine.
pub struct EmbeddingExtractor<E> {
    engine: E,
    min_dim: u32,
}

impl<E: EmbeddingEngine> EmbeddingExtractor<E> {
    pub fn new(engine: E, min_dim: u32) -> Self {
        Self { engine, min_dim }
    }

    pub fn min_dim(&self) -> u32 {
        self.min_dim
    }

    /// Crop the detected region and run it through the embedding engine.
    ///
    /// Returns `Ok(None)` when the crop (after clamping to the frame) is
    /// smaller than the minimum dimension on either axis. Passing an image
    /// whose dimensions differ from the frame the detection was decoded
    /// against is a caller bug and fails with
    /// [`EmbedderError::FrameMismatch`].
    pub fn extract(
        &mut self,
        image: &RgbImage,
        detection: &Detection,
    ) -> Result<Option<Embedding>, EmbedderError> {
        let given = FrameSize::of(image);
        if given != detection.frame {
            return Err(EmbedderError::FrameMismatch {
                decoded_width: detection.frame.width,
                decoded_height: detection.frame.height,
                given_width: given.width,
                given_height: given.height,
            });
        }

        let Some((x, y, width, height)) = detection.bbox.clamped(detection.frame) else {
            return Ok(None);
        };
        if width < self.min_dim || height < self.min_dim {
            tracing::debug!(width, height, min_dim = self.min_dim, "face crop too small");
            return Ok(None);
        }

        let face = imageops::crop_imm(image, x, y, width, height).to_image();
        let blob = face_blob(&face);
        self.engine.infer(&blob).map(Some)
    }
}
