// THEORY:
// The runner has no model of its own. It replays detections recorded
// elsewhere, one JSON object per line:
//
//   {"source": 1, "frame": 30, "boxes": [{"xmin": 10, ..., "label": "bare", "confidence": 0.91}]}
//
// Frames absent from the recording simply have no detections. The confidence
// floor and class filter are applied at lookup time, like a live model would.

use anyhow::{Context, Result};
use handguard::detector::{DetectionBox, Detector, retain_matching};
use handguard::error::DetectionError;
use handguard::source::{Frame, SourceId};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ReplayLine {
    source: SourceId,
    frame: u64,
    #[serde(default)]
    boxes: Vec<DetectionBox>,
}

/// Serves pre-recorded detections keyed by `(source, frame index)`.
#[derive(Debug, Default)]
pub struct ReplayDetector {
    frames: HashMap<(SourceId, u64), Vec<DetectionBox>>,
}

impl ReplayDetector {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening detections file {}", path.display()))?;
        Self::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("reading detections file {}", path.display()))
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut frames: HashMap<(SourceId, u64), Vec<DetectionBox>> = HashMap::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ReplayLine = serde_json::from_str(&line)
                .with_context(|| format!("line {}", number + 1))?;
            frames
                .entry((entry.source, entry.frame))
                .or_default()
                .extend(entry.boxes);
        }
        Ok(Self { frames })
    }

    /// Number of frames that carry detections.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detector for ReplayDetector {
    fn infer(
        &self,
        frame: &Frame,
        confidence: f32,
        class_filter: Option<&str>,
    ) -> Result<Vec<DetectionBox>, DetectionError> {
        let boxes = self
            .frames
            .get(&(frame.source_id, frame.index))
            .cloned()
            .unwrap_or_default();
        Ok(retain_matching(boxes, confidence, class_filter))
    }
}
