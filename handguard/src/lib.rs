// THEORY:
// This file is the entry point of the `handguard` library crate: a concurrent
// safety monitor that watches many video streams at once and raises debounced
// alerts when an ungloved hand is fully inside a danger zone.
//
// The public API is layered:
// - `Supervisor` is the high-level interface: start, pause, resume and stop
//   sources, and receive their events.
// - `StreamWorker` and `FramePipeline` are the per-stream machinery.
// - `core_modules` holds the pure building blocks (zones, the danger rule, the
//   alert state machine, view lookup, frame annotation).
// - `source`, `detector` and `notify` are the seams where real cameras, models
//   and transports plug in.

pub mod config;
pub mod core_modules;
pub mod detector;
pub mod error;
pub mod events;
pub mod notify;
pub mod pipeline;
pub mod source;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::MonitorConfig;
pub use core_modules::alert::{AlertConfig, AlertEngine, AlertPhase, AlertTransition};
pub use core_modules::danger::{Assessment, evaluate};
pub use core_modules::region::{Region, RegionSet};
pub use core_modules::view::{ViewId, ViewMap, ViewSpec};
pub use detector::{BoundingBox, DetectionBox, Detector};
pub use error::{Error, Result};
pub use events::{EventSink, FrameBus, FramePacket, StreamEvent};
pub use notify::{AlertNotice, NotificationDispatcher, Notifier};
pub use pipeline::{FramePipeline, PipelineConfig, Report};
pub use source::{Frame, FrameSource, InMemoryCatalog, Source, SourceCatalog, SourceId, SourceKind, SourceOpener};
pub use supervisor::{Collaborators, StartReport, Supervisor};
pub use worker::{StreamWorker, WorkerId, WorkerSettings, WorkerState, WorkerStatus};
