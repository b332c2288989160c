use serde::{Deserialize, Serialize};

/// Pixel dimensions of the image a detection was decoded against.
///
/// Boxes are denormalized against a specific image; carrying the frame size on
/// every [`Detection`] lets downstream consumers reject a box applied to a
/// differently-sized image instead of silently cropping the wrong region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    /// Frame size of an in-memory RGB image.
    pub fn of(image: &image::RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }
}

/// Axis-aligned face box in pixel coordinates, `x0 < x1` and `y0 < y1`.
///
/// Coordinates are truncated from denormalized floats and may extend slightly
/// outside the frame for faces at the image border.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl PixelBox {
    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    /// Intersect the box with the frame, returning `(x, y, width, height)` of
    /// the crop region, or `None` when the intersection is empty.
    pub fn clamped(&self, frame: FrameSize) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x0.clamp(0, frame.width as i32);
        let y0 = self.y0.clamp(0, frame.height as i32);
        let x1 = self.x1.clamp(0, frame.width as i32);
        let y1 = self.y1.clamp(0, frame.height as i32);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// A confidence-gated face detection, valid only against the image whose
/// dimensions match `frame`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: PixelBox,
    /// Detector confidence in [0, 1]; always above the decoder's minimum.
    pub confidence: f32,
    /// Dimensions of the image the box was denormalized against.
    pub frame: FrameSize,
}

/// 128-d face descriptor produced by the embedding engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Dimensionality of the OpenFace nn4.small2 embedding.
    pub const DIM: usize = 128;

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
