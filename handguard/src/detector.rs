// THEORY:
// The detector is an oracle: given a frame it returns labelled boxes. The engine
// never looks inside it, never serializes calls to it, and treats every failure as
// "this frame is lost". If a concrete model needs exclusive access to a GPU, that
// locking lives inside the adapter.

use crate::error::DetectionError;
use crate::source::Frame;
use serde::{Deserialize, Serialize};

/// An axis-aligned box in frame pixel coordinates, `(xmin, ymin)` to `(xmax, ymax)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }
}

/// A single labelled detection, produced fresh for every processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    #[serde(flatten)]
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

impl DetectionBox {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }
}

/// The object-detection capability consumed by every stream worker.
pub trait Detector: Send + Sync {
    /// Runs inference on one frame. Boxes below `confidence` are dropped; when
    /// `class_filter` is set, only boxes with that label are returned.
    fn infer(
        &self,
        frame: &Frame,
        confidence: f32,
        class_filter: Option<&str>,
    ) -> Result<Vec<DetectionBox>, DetectionError>;
}

/// Applies the confidence floor and class filter to raw model output.
///
/// Adapters whose backends cannot filter natively can route their results through this.
pub fn retain_matching(
    boxes: Vec<DetectionBox>,
    confidence: f32,
    class_filter: Option<&str>,
) -> Vec<DetectionBox> {
    boxes
        .into_iter()
        .filter(|b| b.confidence >= confidence)
        .filter(|b| class_filter.is_none_or(|class| b.label == class))
        .collect()
}
