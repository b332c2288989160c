//! Raw detection tensor produced by the SSD face detector.
//!
//! The network emits a fixed-shape `[1, 1, N, 7]` float tensor: one row per
//! candidate, with confidence at field 2 and the normalized box corners
//! `(x0, y0, x1, y1)` at fields 3..7.

use ndarray::Array4;
use thiserror::Error;

/// Fields per candidate row in the SSD output.
const ROW_FIELDS: usize = 7;
/// Field index of the candidate confidence.
const CONFIDENCE_FIELD: usize = 2;
/// First field of the normalized box corners.
const BOX_FIELD: usize = 3;

/// Detector output whose element count is not a whole number of candidate rows.
#[derive(Error, Debug)]
#[error("expected a [1, 1, N, 7] detection tensor, got {len} elements")]
pub struct ShapeMismatch {
    pub len: usize,
}

/// Immutable `[1, 1, N, 7]` detection tensor, owned for the duration of one
/// decode pass.
#[derive(Debug, Clone)]
pub struct DetectionTensor {
    data: Array4<f32>,
}

impl DetectionTensor {
    /// Wrap a flat engine output, inferring `N` from the element count.
    pub fn from_flat(data: &[f32]) -> Result<Self, ShapeMismatch> {
        if data.len() % ROW_FIELDS != 0 {
            return Err(ShapeMismatch { len: data.len() });
        }
        let candidates = data.len() / ROW_FIELDS;

        let mut tensor = Array4::zeros((1, 1, candidates, ROW_FIELDS));
        for (i, value) in data.iter().enumerate() {
            tensor[[0, 0, i / ROW_FIELDS, i % ROW_FIELDS]] = *value;
        }

        Ok(Self { data: tensor })
    }

    /// Build a tensor from per-candidate rows. Mainly useful for fake engines
    /// and tests; inference paths go through [`from_flat`](Self::from_flat).
    pub fn from_rows(rows: &[[f32; ROW_FIELDS]]) -> Self {
        let mut tensor = Array4::zeros((1, 1, rows.len(), ROW_FIELDS));
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                tensor[[0, 0, i, j]] = *value;
            }
        }
        Self { data: tensor }
    }

    /// Number of candidate rows (`N`). Zero is valid.
    pub fn candidates(&self) -> usize {
        self.data.shape()[2]
    }

    /// Confidence of candidate `index`.
    pub fn confidence(&self, index: usize) -> f32 {
        self.data[[0, 0, index, CONFIDENCE_FIELD]]
    }

    /// Normalized `(x0, y0, x1, y1)` corners of candidate `index`, each in [0, 1].
    pub fn normalized_box(&self, index: usize) -> [f32; 4] {
        [
            self.data[[0, 0, index, BOX_FIELD]],
            self.data[[0, 0, index, BOX_FIELD + 1]],
            self.data[[0, 0, index, BOX_FIELD + 2]],
            self.data[[0, 0, index, BOX_FIELD + 3]],
        ]
    }

    /// Index of the candidate with the globally maximum confidence, ignoring
    /// any gating threshold. `None` only when the tensor has zero rows.
    pub fn argmax_confidence(&self) -> Option<usize> {
        (0..self.candidates()).fold(None, |best, i| match best {
            Some(b) if self.confidence(b) >= self.confidence(i) => Some(b),
            _ => Some(i),
        })
    }
}
