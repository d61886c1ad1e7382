//! In-memory collaborators for the worker, supervisor and pipeline tests.

use crate::detector::{BoundingBox, DetectionBox, Detector, retain_matching};
use crate::error::{ConnectError, DetectionError, NotifyError, ReadError};
use crate::notify::{AlertNotice, Notifier};
use crate::source::{Frame, FrameSource, Source, SourceId, SourceOpener};
use image::RgbImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A hazard box at the given pixel rectangle.
pub fn hand(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> DetectionBox {
    DetectionBox::new(BoundingBox::new(xmin, ymin, xmax, ymax), "bare", 0.95)
}

/// Returns the same boxes for every frame until told otherwise.
#[derive(Default)]
pub struct StaticDetector {
    boxes: Mutex<Vec<DetectionBox>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    seen: Mutex<Vec<(SourceId, u64)>>,
}

impl StaticDetector {
    pub fn new(boxes: Vec<DetectionBox>) -> Self {
        Self {
            boxes: Mutex::new(boxes),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(source, frame index)` of every inference call, in call order.
    pub fn seen(&self) -> Vec<(SourceId, u64)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Detector for StaticDetector {
    fn infer(
        &self,
        frame: &Frame,
        confidence: f32,
        class_filter: Option<&str>,
    ) -> Result<Vec<DetectionBox>, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((frame.source_id, frame.index));
        if self.failing.load(Ordering::SeqCst) {
            return Err(DetectionError("model crashed".into()));
        }
        let boxes = self.boxes.lock().unwrap().clone();
        Ok(retain_matching(boxes, confidence, class_filter))
    }
}

/// How a scripted source behaves once opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// `open` always fails.
    Unreachable,
    /// Yields frames forever.
    Endless { width: u32, height: u32 },
    /// Yields `frames` frames, then reports end of stream.
    Finite { frames: u64, width: u32, height: u32 },
    /// Yields `frames` frames, then fails every read.
    FailAfter { frames: u64, width: u32, height: u32 },
    /// `open` blocks for `delay`, then frames come forever.
    SlowOpen { delay: Duration, width: u32, height: u32 },
}

/// Opens [`Script`]ed handles and counts opens and releases.
pub struct ScriptedOpener {
    default: Script,
    overrides: Mutex<HashMap<SourceId, Script>>,
    attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl ScriptedOpener {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            overrides: Mutex::new(HashMap::new()),
            attempts: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_script(self, id: u64, script: Script) -> Self {
        self.overrides.lock().unwrap().insert(SourceId(id), script);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handles opened but not yet released.
    pub fn live_handles(&self) -> usize {
        self.opened() - self.closed()
    }
}

impl SourceOpener for ScriptedOpener {
    fn open(&self, source: &Source) -> Result<Box<dyn FrameSource>, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let script = self
            .overrides
            .lock()
            .unwrap()
            .get(&source.id)
            .copied()
            .unwrap_or(self.default);
        if script == Script::Unreachable {
            return Err(ConnectError::Unreachable {
                uri: source.uri.clone(),
                reason: "connection refused".into(),
            });
        }
        if let Script::SlowOpen { delay, .. } = script {
            std::thread::sleep(delay);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            script,
            read: 0,
            closed: false,
            released: Arc::clone(&self.closed),
        }))
    }
}

struct ScriptedSource {
    script: Script,
    read: u64,
    closed: bool,
    released: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<RgbImage, ReadError> {
        let image = match self.script {
            Script::Unreachable => return Err(ReadError::Failed("not connected".into())),
            Script::Endless { width, height } | Script::SlowOpen { width, height, .. } => {
                RgbImage::new(width, height)
            }
            Script::Finite { frames, width, height } => {
                if self.read >= frames {
                    return Err(ReadError::EndOfStream);
                }
                RgbImage::new(width, height)
            }
            Script::FailAfter { frames, width, height } => {
                if self.read >= frames {
                    return Err(ReadError::Failed("socket reset".into()));
                }
                RgbImage::new(width, height)
            }
        };
        self.read += 1;
        Ok(image)
    }

    fn is_open(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Keeps every notice it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<AlertNotice>>,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn notices(&self) -> Vec<AlertNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.notices.lock().unwrap().len()
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn send_alert(&self, notice: &AlertNotice) -> Result<(), NotifyError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.notices.lock().unwrap().push(notice.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("smtp unreachable".into()));
        }
        Ok(())
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Blocking flavour of [`eventually`] for plain `#[test]`s.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
