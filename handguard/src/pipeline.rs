// THEORY:
// The `pipeline` module is the per-frame API of the monitoring engine. A stream
// worker hands it every *sampled* frame and gets back a `Report` describing what
// happened, plus the annotated frame to publish.
//
// One `FramePipeline` belongs to one worker and owns that worker's private state:
// the per-resolution region cache and the alert debounce engine. Nothing in it is
// shared, so it needs no locks. Restarting a worker builds a new pipeline, which
// is how alert state is discarded on reconnect.
//
// Stages for a sampled frame:
// 1.  Resolve the zones for this frame's resolution (rescale once per size).
// 2.  Run the detector.
// 3.  Judge the detections, unless an alert is active, in which case the engine
//     only watches its hold-down clock.
// 4.  Feed the verdict into the debounce engine.
// 5.  Render the annotated frame.

use crate::core_modules::alert::{AlertConfig, AlertEngine, AlertTransition};
use crate::core_modules::annotate::{AlertStatus, annotate};
use crate::core_modules::danger::{self, Assessment};
use crate::core_modules::region::{RegionCache, RegionSet};
use crate::detector::Detector;
use crate::error::DetectionError;
use crate::source::Frame;
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-stream tunables for the detection path.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Detector label that denotes the unsafe condition.
    pub hazard_class: String,
    /// Detections below this confidence are discarded by the detector.
    pub confidence: f32,
    pub alert: AlertConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hazard_class: "bare".to_string(),
            confidence: 0.8,
            alert: AlertConfig::default(),
        }
    }
}

/// The outcome of one sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// No hazard inside any zone.
    Clear,
    /// A hazard is inside a zone; the alert has not fired yet.
    Danger { consecutive: u32 },
    AlertStarted,
    /// An alert is holding; detections were not judged.
    AlertActive { elapsed: Duration },
    AlertEnded,
}

/// Everything the worker needs to act on a processed frame.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub report: Report,
    pub assessment: Assessment,
    pub annotated: RgbImage,
    /// Whether this frame's resolution was seen for the first time.
    pub regions_rescaled: bool,
}

pub struct FramePipeline {
    config: PipelineConfig,
    detector: Arc<dyn Detector>,
    regions: RegionCache,
    alert: AlertEngine,
}

impl FramePipeline {
    pub fn new(config: PipelineConfig, detector: Arc<dyn Detector>, regions: Arc<RegionSet>) -> Self {
        Self {
            alert: AlertEngine::new(config.alert),
            regions: RegionCache::new(regions),
            config,
            detector,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_alert_active(&self) -> bool {
        self.alert.is_active()
    }

    pub fn alert_status(&self, now: Instant) -> AlertStatus {
        AlertStatus {
            active: self.alert.is_active(),
            active_for: self.alert.active_for(now),
        }
    }

    /// Distinct resolutions the zones have been projected onto.
    pub fn rescale_count(&self) -> usize {
        self.regions.rescale_count()
    }

    /// Runs one sampled frame through the detection path.
    ///
    /// A detector failure loses this frame only; the alert state is untouched.
    pub fn process(&mut self, frame: &Frame, now: Instant) -> Result<FrameAnalysis, DetectionError> {
        let (width, height) = frame.image.dimensions();

        // --- 1. Zones for this resolution ---
        let regions_rescaled = !self.regions.is_cached(width, height);
        let zones = self.regions.resolve(width, height);

        // --- 2. Detection ---
        let detections = self.detector.infer(
            frame,
            self.config.confidence,
            Some(self.config.hazard_class.as_str()),
        )?;

        // --- 3 & 4. Judgement and debounce ---
        let (assessment, report) = if self.alert.is_active() {
            let assessment = Assessment::unevaluated(&detections, &self.config.hazard_class);
            let report = match self.alert.tick(now) {
                Some(AlertTransition::AlertEnd) => Report::AlertEnded,
                _ => Report::AlertActive {
                    elapsed: self.alert.active_for(now).unwrap_or_default(),
                },
            };
            (assessment, report)
        } else {
            let assessment = danger::evaluate(&detections, zones, &self.config.hazard_class);
            let report = match self.alert.observe(assessment.is_dangerous, now) {
                Some(AlertTransition::AlertStart) => Report::AlertStarted,
                Some(AlertTransition::AlertEnd) => Report::AlertEnded,
                None if assessment.is_dangerous => Report::Danger {
                    consecutive: self.alert.consecutive(),
                },
                None => Report::Clear,
            };
            (assessment, report)
        };

        // --- 5. Overlay ---
        let status = AlertStatus {
            active: self.alert.is_active(),
            active_for: self.alert.active_for(now),
        };
        let annotated = annotate(&frame.image, zones, &assessment, status);

        Ok(FrameAnalysis {
            report,
            assessment,
            annotated,
            regions_rescaled,
        })
    }

    /// Advances the hold-down clock for a frame that was not sampled.
    pub fn tick(&mut self, now: Instant) -> Option<AlertTransition> {
        self.alert.tick(now)
    }
}
