// THEORY:
// A `StreamWorker` owns one source end to end: its acquisition handle, its
// sampling counter, its region cache and its alert state. It runs on a dedicated
// OS thread because every call it makes (open, read, infer) may block, and a
// blocked worker must never hold up another.
//
// The only thing shared with the outside is `WorkerControl`: a mutex-guarded
// set of flags (stop requested, paused, lifecycle state) plus a condition
// variable. Every sleep in the loop (pause wait, backoff, idle delay) waits on
// that condition variable, so `stop()` and `resume()` take effect immediately
// instead of after the current sleep.
//
// Loop, one iteration per frame:
// 1.  Wait while paused.
// 2.  Connect if needed. Network sources get a settle period to confirm the
//     connection. Failure: `Disconnected`, connect backoff, retry.
// 3.  Read. End of a finite file ends the worker. Any other failure releases the
//     handle, emits `Disconnected`, waits the read backoff and reconnects.
// 4.  Count the frame; only every Nth goes further.
// 5.  Run the frame pipeline (zones, detector, danger, debounce).
// 6.  On alert start, snapshot the annotated frame and enqueue a notice.
// 7.  Publish the annotated frame on the frame bus.
// 8.  Idle delay, then loop.

use crate::core_modules::region::RegionSet;
use crate::core_modules::view::ViewId;
use crate::detector::Detector;
use crate::error::{ConnectError, ReadError};
use crate::events::{EventSink, FrameBus, FramePacket, StreamEvent};
use crate::notify::{AlertNotice, NotificationDispatcher};
use crate::pipeline::{FrameAnalysis, FramePipeline, PipelineConfig, Report};
use crate::source::{Frame, FrameSource, Source, SourceId, SourceKind, SourceOpener};
use image::RgbImage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, info_span, warn};

/// Lifecycle of a worker. `Paused` is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Streaming,
    Stopping,
    Stopped,
}

/// Identity of one worker incarnation. A restart bumps the generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pub source_id: SourceId,
    pub generation: u64,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_id, self.generation)
    }
}

/// Timing and cadence of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Only every Nth frame is run through the detector.
    pub sample_interval: u64,
    pub connect_backoff: Duration,
    pub read_backoff: Duration,
    /// How long a network source gets to confirm a fresh connection.
    pub settle: Duration,
    pub idle_delay: Duration,
    /// Upper bound on a single paused wait before flags are re-read.
    pub pause_poll: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            sample_interval: 3,
            connect_backoff: Duration::from_secs(3),
            read_backoff: Duration::from_secs(2),
            settle: Duration::from_secs(1),
            idle_delay: Duration::from_millis(10),
            pause_poll: Duration::from_millis(100),
        }
    }
}

/// A point-in-time view of a worker, for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub state: WorkerState,
    pub paused: bool,
    pub frames_read: u64,
}

#[derive(Debug)]
struct ControlState {
    stop_requested: bool,
    paused: bool,
    state: WorkerState,
}

/// Flags shared between a worker thread and its owner.
#[derive(Debug)]
struct WorkerControl {
    state: Mutex<ControlState>,
    wake: Condvar,
}

impl WorkerControl {
    fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                stop_requested: false,
                paused: false,
                state: WorkerState::Disconnected,
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_stop(&self) {
        let mut state = self.lock();
        state.stop_requested = true;
        if state.state != WorkerState::Stopped {
            state.state = WorkerState::Stopping;
        }
        self.wake.notify_all();
    }

    fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
        self.wake.notify_all();
    }

    fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn is_stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    fn state(&self) -> WorkerState {
        self.lock().state
    }

    /// Records a lifecycle change. `Stopping` sticks until the loop exits.
    fn set_state(&self, next: WorkerState) {
        let mut state = self.lock();
        if state.state == WorkerState::Stopping && next != WorkerState::Stopped {
            return;
        }
        state.state = next;
    }

    /// Sleeps up to `duration`. Returns `false` if a stop was requested.
    fn sleep(&self, duration: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, duration, |s| !s.stop_requested)
            .unwrap_or_else(PoisonError::into_inner);
        !guard.stop_requested
    }

    /// Blocks while paused. Returns `false` if a stop was requested.
    fn wait_while_paused(&self, poll: Duration) -> bool {
        let mut guard = self.lock();
        while guard.paused && !guard.stop_requested {
            guard = self
                .wake
                .wait_timeout(guard, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        !guard.stop_requested
    }
}

/// The collaborators every worker is wired to. Cheap to clone.
#[derive(Clone)]
pub struct WorkerContext {
    pub opener: Arc<dyn SourceOpener>,
    pub detector: Arc<dyn Detector>,
    pub dispatcher: NotificationDispatcher,
    pub events: EventSink,
    pub frames: FrameBus,
}

/// Everything that defines one worker incarnation.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub id: WorkerId,
    pub source: Source,
    pub view: ViewId,
    pub view_name: String,
    pub regions: Arc<RegionSet>,
    pub pipeline: PipelineConfig,
    pub settings: WorkerSettings,
}

/// Owner's handle to a running worker thread.
pub struct StreamWorker {
    id: WorkerId,
    source: Source,
    view: ViewId,
    sample_interval: u64,
    control: Arc<WorkerControl>,
    frames_read: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl StreamWorker {
    /// Starts the worker thread. Fails only if the OS refuses a new thread.
    pub fn spawn(spec: WorkerSpec, ctx: WorkerContext) -> std::io::Result<Self> {
        let control = Arc::new(WorkerControl::new());
        let frames_read = Arc::new(AtomicU64::new(0));
        let sample_interval = spec.settings.sample_interval.max(1);

        let worker = WorkerLoop {
            pipeline: FramePipeline::new(
                spec.pipeline.clone(),
                Arc::clone(&ctx.detector),
                Arc::clone(&spec.regions),
            ),
            id: spec.id,
            source: spec.source.clone(),
            view_name: spec.view_name,
            settings: WorkerSettings {
                sample_interval,
                ..spec.settings
            },
            ctx,
            control: Arc::clone(&control),
            frames_read: Arc::clone(&frames_read),
            handle: None,
        };

        let thread = std::thread::Builder::new()
            .name(format!("hg-worker-{}", spec.id.source_id))
            .spawn(move || worker.run())?;

        Ok(Self {
            id: spec.id,
            source: spec.source,
            view: spec.view,
            sample_interval,
            control,
            frames_read,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn view(&self) -> ViewId {
        self.view
    }

    pub fn sample_interval(&self) -> u64 {
        self.sample_interval
    }

    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    pub fn resume(&self) {
        self.control.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn state(&self) -> WorkerState {
        self.control.state()
    }

    /// Whether the loop has exited (stopped or source exhausted).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id,
            state: self.state(),
            paused: self.is_paused(),
            frames_read: self.frames_read(),
        }
    }

    /// Asks the loop to exit without waiting for it.
    pub fn request_stop(&self) {
        self.control.request_stop();
    }

    /// Requests termination and waits until the thread has exited and released
    /// its acquisition handle.
    pub fn stop(&mut self) {
        self.control.request_stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = %self.id, "worker thread panicked");
            }
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Exit {
    Stopped,
    Completed,
}

/// State owned by the worker thread.
struct WorkerLoop {
    id: WorkerId,
    source: Source,
    view_name: String,
    settings: WorkerSettings,
    pipeline: FramePipeline,
    ctx: WorkerContext,
    control: Arc<WorkerControl>,
    frames_read: Arc<AtomicU64>,
    handle: Option<Box<dyn FrameSource>>,
}

impl WorkerLoop {
    fn run(mut self) {
        let span = info_span!(
            "stream_worker",
            source_id = %self.id.source_id,
            generation = self.id.generation
        );
        let _entered = span.enter();

        info!(
            source = %self.source.name,
            kind = self.source.kind.label(),
            view = %self.view_name,
            interval = self.settings.sample_interval,
            "worker started"
        );
        self.ctx.events.log(
            self.id.source_id,
            format!("{}: monitoring started ({})", self.source.name, self.view_name),
        );

        let exit = self.run_loop();
        self.release();
        self.control.set_state(WorkerState::Stopped);

        match exit {
            Exit::Completed => {
                info!(frames = self.frames_read.load(Ordering::Relaxed), "source exhausted");
                self.ctx.events.log(
                    self.id.source_id,
                    format!("{}: finished reading source", self.source.name),
                );
                self.ctx.events.emit(StreamEvent::Completed(self.id.source_id));
            }
            Exit::Stopped => {
                info!("worker stopped");
            }
        }
    }

    fn run_loop(&mut self) -> Exit {
        let mut frame_count: u64 = 0;

        loop {
            // --- 1. Pause ---
            if !self.control.wait_while_paused(self.settings.pause_poll) {
                return Exit::Stopped;
            }

            // --- 2. Connect ---
            if self.handle.is_none() {
                self.control.set_state(WorkerState::Connecting);
                info!(uri = %self.source.uri, "connecting");
                match self.connect() {
                    Ok(handle) => {
                        self.handle = Some(handle);
                        self.control.set_state(WorkerState::Streaming);
                        self.ctx
                            .events
                            .log(self.id.source_id, format!("{}: connected", self.source.name));
                    }
                    Err(e) => {
                        warn!(error = %e, backoff_ms = self.settings.connect_backoff.as_millis() as u64, "connect failed");
                        self.report_disconnect(format!(
                            "{}: connection failed, retrying in {}s",
                            self.source.name,
                            self.settings.connect_backoff.as_secs_f32()
                        ));
                        if !self.control.sleep(self.settings.connect_backoff) {
                            return Exit::Stopped;
                        }
                        continue;
                    }
                }
            }
            if self.control.is_stop_requested() {
                return Exit::Stopped;
            }

            // --- 3. Read ---
            let Some(handle) = self.handle.as_mut() else {
                continue;
            };
            let image = match handle.read() {
                Ok(image) => image,
                Err(ReadError::EndOfStream) if self.source.kind.is_finite() => {
                    return Exit::Completed;
                }
                Err(e) => {
                    self.release();
                    warn!(error = %e, backoff_ms = self.settings.read_backoff.as_millis() as u64, "read failed");
                    self.report_disconnect(format!(
                        "{}: frame read failed ({e}), reconnecting",
                        self.source.name
                    ));
                    if !self.control.sleep(self.settings.read_backoff) {
                        return Exit::Stopped;
                    }
                    continue;
                }
            };

            // --- 4. Sampling ---
            frame_count += 1;
            self.frames_read.store(frame_count, Ordering::Relaxed);
            let now = Instant::now();

            if frame_count % self.settings.sample_interval == 0 {
                let frame = Frame {
                    source_id: self.id.source_id,
                    index: frame_count,
                    image,
                };
                self.process(frame, now);
            } else if self.pipeline.tick(now).is_some() {
                self.on_alert_end();
            }

            // --- 8. Idle ---
            if !self.control.sleep(self.settings.idle_delay) {
                return Exit::Stopped;
            }
        }
    }

    /// Opens the source and, for network streams, waits for it to settle.
    fn connect(&self) -> Result<Box<dyn FrameSource>, ConnectError> {
        let mut handle = self.ctx.opener.open(&self.source)?;
        if self.source.kind == SourceKind::NetworkStream {
            self.control.sleep(self.settings.settle);
            if !handle.is_open() {
                handle.close();
                return Err(ConnectError::NotConfirmed {
                    uri: self.source.uri.clone(),
                });
            }
        }
        Ok(handle)
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
            debug!("acquisition handle released");
        }
    }

    fn report_disconnect(&self, text: String) {
        self.control.set_state(WorkerState::Disconnected);
        self.ctx.events.log(self.id.source_id, text);
        self.ctx.events.emit(StreamEvent::Disconnected {
            source_id: self.id.source_id,
            worker: self.id,
        });
    }

    // --- 5-7. Sampled frame ---
    fn process(&mut self, frame: Frame, now: Instant) {
        let analysis = match self.pipeline.process(&frame, now) {
            Ok(analysis) => analysis,
            Err(e) => {
                error!(frame = frame.index, error = %e, "detection failed, skipping frame");
                self.ctx.events.log(
                    self.id.source_id,
                    format!("{}: detection failed on frame {}: {e}", self.source.name, frame.index),
                );
                return;
            }
        };

        if analysis.regions_rescaled {
            debug!(
                width = frame.width(),
                height = frame.height(),
                "danger zones rescaled for frame size"
            );
        }

        let FrameAnalysis {
            report,
            assessment,
            annotated,
            ..
        } = analysis;
        let annotated = Arc::new(annotated);

        match report {
            Report::AlertStarted => self.raise_alert(&annotated, assessment.implicated_regions.len()),
            Report::AlertEnded => self.on_alert_end(),
            Report::Danger { consecutive } => {
                debug!(frame = frame.index, consecutive, "hazard inside danger zone");
            }
            Report::Clear | Report::AlertActive { .. } => {}
        }

        self.ctx.frames.publish(FramePacket {
            source_id: self.id.source_id,
            frame_index: frame.index,
            image: annotated,
        });
    }

    fn raise_alert(&self, snapshot: &Arc<RgbImage>, zones: usize) {
        let message = format!(
            "Bare-hand operation detected in {} ({} zone{})",
            self.view_name,
            zones,
            if zones == 1 { "" } else { "s" }
        );
        warn!(source = %self.source.name, zones, "alert raised");

        let notice = AlertNotice {
            source_id: self.id.source_id,
            source_name: self.source.name.clone(),
            message: message.clone(),
            frame: Arc::clone(snapshot),
            recipients: self.ctx.dispatcher.resolve_recipients(&self.source.recipients),
            raised_at: SystemTime::now(),
        };
        self.ctx.dispatcher.dispatch(notice);

        self.ctx.events.log(
            self.id.source_id,
            format!("[ALERT] {}: {message}", self.source.name),
        );
        self.ctx.events.emit(StreamEvent::Alert {
            source_id: self.id.source_id,
            source_name: self.source.name.clone(),
            text: message,
        });
    }

    fn on_alert_end(&self) {
        info!("alert cleared");
        self.ctx
            .events
            .log(self.id.source_id, format!("{}: alert state reset", self.source.name));
    }
}
