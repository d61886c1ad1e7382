// THEORY:
// The `Supervisor` is the control plane. It owns the map from source id to the
// (at most one) live `StreamWorker`, plus the last-known snapshot of every
// source it has started. All mutations of that map happen under one mutex.
// Joining a worker thread never happens under it: the worker is detached from
// the map first, so a worker stuck in `open` or `read` cannot stall control
// operations on other sources.
//
// Control operations are synchronous and cheap except for stopping a worker,
// which joins its thread. Callers on an async runtime should invoke them from
// `spawn_blocking`.
//
// Disconnections flow back as events. A relay task forwards every worker event
// to the consumer and, for `Disconnected`, schedules a restart:
// 1.  One restart per source may be pending; further reports are coalesced.
// 2.  After the restart delay, the restart runs only if the reporting worker is
//     still the current one (a stopped or already-replaced worker is stale).
// 3.  The source must still be enabled and reconnect-eligible.
// 4.  The old worker is stopped and a fresh one (fresh alert state, fresh region
//     cache) is built from the cached snapshot, or from the catalog when no
//     snapshot exists.
// 5.  `stop_one` and `stop_all` cancel pending restarts, including one whose
//     old worker is being joined at that moment.

use crate::config::MonitorConfig;
use crate::core_modules::region::RegionSet;
use crate::core_modules::view::{ViewId, ViewMap};
use crate::detector::Detector;
use crate::error::{Error, RegionError, Result};
use crate::events::{EventSink, FrameBus, FramePacket, StreamEvent};
use crate::notify::{NotificationDispatcher, Notifier};
use crate::source::{Source, SourceCatalog, SourceId, SourceOpener};
use crate::worker::{StreamWorker, WorkerContext, WorkerId, WorkerSpec, WorkerStatus};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// The external capabilities a supervisor wires into its workers.
#[derive(Clone)]
pub struct Collaborators {
    pub opener: Arc<dyn SourceOpener>,
    pub detector: Arc<dyn Detector>,
    pub notifier: Arc<dyn Notifier>,
    /// Consulted on restart when no snapshot is cached, and for the enabled flag.
    pub catalog: Option<Arc<dyn SourceCatalog>>,
}

/// What `start_all` did with each source.
#[derive(Debug, Default)]
pub struct StartReport {
    pub started: Vec<SourceId>,
    pub resumed: Vec<SourceId>,
    /// Already running and not paused.
    pub unchanged: Vec<SourceId>,
    /// Disabled in the catalog.
    pub skipped: Vec<SourceId>,
    pub failed: Vec<(SourceId, Error)>,
}

#[derive(Default)]
struct Registry {
    workers: HashMap<SourceId, StreamWorker>,
    snapshots: HashMap<SourceId, Source>,
    sample_interval: Option<u64>,
    next_generation: u64,
}

pub struct Supervisor {
    config: MonitorConfig,
    views: ViewMap,
    opener: Arc<dyn SourceOpener>,
    detector: Arc<dyn Detector>,
    catalog: Option<Arc<dyn SourceCatalog>>,
    dispatcher: NotificationDispatcher,
    events: EventSink,
    frames: FrameBus,
    runtime: Handle,
    registry: Mutex<Registry>,
    pending_restarts: Mutex<HashSet<SourceId>>,
}

impl Supervisor {
    /// Builds a supervisor on the current tokio runtime and returns the
    /// consumer end of its event channel.
    pub fn new(
        config: MonitorConfig,
        collaborators: Collaborators,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<StreamEvent>)> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        config.validate()?;

        let (dispatcher, _delivery) = NotificationDispatcher::spawn(
            &runtime,
            collaborators.notifier,
            config.notify.queue_capacity,
            config.notify.default_recipients.clone(),
        );
        let (events, worker_events) = EventSink::channel();
        let (consumer, consumer_events) = EventSink::channel();

        let supervisor = Arc::new(Self {
            views: config.view_map(),
            frames: FrameBus::new(config.frames.bus_capacity),
            config,
            opener: collaborators.opener,
            detector: collaborators.detector,
            catalog: collaborators.catalog,
            dispatcher,
            events,
            runtime: runtime.clone(),
            registry: Mutex::new(Registry::default()),
            pending_restarts: Mutex::new(HashSet::new()),
        });

        runtime.spawn(relay(Arc::downgrade(&supervisor), worker_events, consumer));
        info!(views = supervisor.views.len(), "supervisor ready");
        Ok((supervisor, consumer_events))
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<SourceId>> {
        self.pending_restarts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// A new subscription to the annotated frames of every worker.
    pub fn frames(&self) -> broadcast::Receiver<FramePacket> {
        self.frames.subscribe()
    }

    /// Starts every enabled source that has no live worker, and resumes paused ones.
    ///
    /// Idempotent: a source with a live, unpaused worker is left alone.
    pub fn start_all(&self, sources: &[Source]) -> StartReport {
        let mut report = StartReport::default();
        let mut registry = self.registry();

        let enabled = sources.iter().filter(|s| s.enabled).count();
        let interval = self.config.sample_interval_for(enabled);
        registry.sample_interval = Some(interval);
        info!(sources = sources.len(), enabled, interval, "starting sources");

        for source in sources {
            if !source.enabled {
                report.skipped.push(source.id);
                continue;
            }

            if let Some(worker) = registry.workers.get(&source.id) {
                if worker.is_finished() {
                    debug!(source_id = %source.id, "replacing finished worker");
                    registry.workers.remove(&source.id);
                } else if worker.is_paused() {
                    worker.resume();
                    self.events.log(source.id, format!("{}: resumed", source.name));
                    report.resumed.push(source.id);
                    continue;
                } else {
                    report.unchanged.push(source.id);
                    continue;
                }
            }

            match self.spawn_worker(&mut registry, source.clone(), interval) {
                Ok(()) => report.started.push(source.id),
                Err(e) => {
                    error!(source_id = %source.id, error = %e, "failed to start source");
                    self.events
                        .log(source.id, format!("{}: failed to start: {e}", source.name));
                    report.failed.push((source.id, e));
                }
            }
        }
        report
    }

    /// Stops and forgets one source's worker. Returns whether one existed.
    pub fn stop_one(&self, id: SourceId) -> bool {
        self.pending().remove(&id);
        let worker = {
            let mut registry = self.registry();
            registry.snapshots.remove(&id);
            registry.workers.remove(&id)
        };
        let Some(mut worker) = worker else {
            return false;
        };
        worker.stop();
        info!(source_id = %id, "source stopped");
        self.events
            .log(id, format!("{}: stopped", worker.source().name));
        self.events.emit(StreamEvent::Removed(id));
        true
    }

    /// Stops every worker, signalling all of them before waiting for any.
    pub fn stop_all(&self) {
        self.pending().clear();
        let mut workers: Vec<StreamWorker> = {
            let mut registry = self.registry();
            registry.snapshots.clear();
            registry.workers.drain().map(|(_, w)| w).collect()
        };
        for worker in &workers {
            worker.request_stop();
        }
        for worker in &mut workers {
            worker.stop();
            self.events.emit(StreamEvent::Removed(worker.id().source_id));
        }
        info!(stopped = workers.len(), "all sources stopped");
    }

    /// Pauses every live worker. Returns how many were paused.
    pub fn pause_all(&self) -> usize {
        let registry = self.registry();
        let mut paused = 0;
        for (id, worker) in &registry.workers {
            if !worker.is_finished() && !worker.is_paused() {
                worker.pause();
                self.events
                    .log(*id, format!("{}: paused", worker.source().name));
                paused += 1;
            }
        }
        paused
    }

    /// Resumes one paused worker. Returns whether it was paused.
    pub fn resume_one(&self, id: SourceId) -> bool {
        let registry = self.registry();
        match registry.workers.get(&id) {
            Some(worker) if worker.is_paused() => {
                worker.resume();
                self.events
                    .log(id, format!("{}: resumed", worker.source().name));
                true
            }
            _ => false,
        }
    }

    /// Schedules a rebuild of a source's worker after the restart delay.
    ///
    /// Returns `false` when a restart for this source is already pending.
    pub fn handle_disconnect(self: &Arc<Self>, id: SourceId) -> bool {
        self.schedule_restart(id, None)
    }

    fn schedule_restart(self: &Arc<Self>, id: SourceId, reporter: Option<WorkerId>) -> bool {
        if !self.pending().insert(id) {
            debug!(source_id = %id, "restart already pending");
            return false;
        }

        let delay = self.config.restart_delay();
        info!(source_id = %id, delay_ms = delay.as_millis() as u64, "restart scheduled");
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let outcome =
                tokio::task::spawn_blocking(move || this.run_scheduled_restart(id, reporter)).await;
            if let Err(e) = outcome {
                error!(source_id = %id, error = %e, "restart task failed");
            }
        });
        true
    }

    /// Runs a restart scheduled by `schedule_restart`, unless a stop cancelled it.
    fn run_scheduled_restart(&self, id: SourceId, reporter: Option<WorkerId>) -> bool {
        if !self.pending().remove(&id) {
            debug!(source_id = %id, "scheduled restart was cancelled");
            return false;
        }
        self.rebuild(id, reporter)
    }

    /// Rebuilds a source's worker now. Returns whether a new worker was started.
    ///
    /// With `reporter` set, the restart only proceeds if that worker is still
    /// the current one for the source.
    pub fn restart(&self, id: SourceId, reporter: Option<WorkerId>) -> bool {
        self.pending().remove(&id);
        self.rebuild(id, reporter)
    }

    fn rebuild(&self, id: SourceId, reporter: Option<WorkerId>) -> bool {
        // --- 1. Pick the source and detach the old worker ---
        let (source, old) = {
            let mut registry = self.registry();
            if let Some(reporter) = reporter {
                let current = registry.workers.get(&id).map(StreamWorker::id);
                if current != Some(reporter) {
                    debug!(source_id = %id, worker = %reporter, "ignoring stale disconnect");
                    return false;
                }
            }
            let Some(source) = self.restart_candidate(&registry, id) else {
                return false;
            };
            // `stop_one` and `stop_all` clear this while the old worker is joined.
            registry.snapshots.insert(id, source.clone());
            (source, registry.workers.remove(&id))
        };

        // --- 2. Join the old worker without holding the registry ---
        if let Some(mut old) = old {
            old.stop();
            self.events.emit(StreamEvent::Removed(id));
        }

        // --- 3. Spawn, unless the source was stopped or started meanwhile ---
        let mut registry = self.registry();
        if !registry.snapshots.contains_key(&id) {
            info!(source_id = %id, "source stopped during restart, not respawning");
            return false;
        }
        if registry.workers.contains_key(&id) {
            debug!(source_id = %id, "source already restarted elsewhere");
            return false;
        }

        let interval = registry
            .sample_interval
            .unwrap_or_else(|| self.config.sample_interval_for(1));
        let name = source.name.clone();
        match self.spawn_worker(&mut registry, source, interval) {
            Ok(()) => {
                info!(source_id = %id, "worker restarted");
                self.events.log(id, format!("{name}: reconnected with a fresh worker"));
                true
            }
            Err(e) => {
                error!(source_id = %id, error = %e, "restart failed");
                self.events.log(id, format!("{name}: restart failed: {e}"));
                false
            }
        }
    }

    /// The source to rebuild, if it is still enabled and reconnect-eligible.
    fn restart_candidate(&self, registry: &Registry, id: SourceId) -> Option<Source> {
        let current = self.catalog.as_ref().and_then(|c| c.lookup(id));
        let Some(source) = registry.snapshots.get(&id).cloned().or_else(|| current.clone()) else {
            warn!(source_id = %id, "no snapshot or catalog entry, not restarting");
            return None;
        };

        // The catalog owns the enabled flag; the snapshot is used when there is no catalog.
        let enabled = match (&self.catalog, &current) {
            (Some(_), Some(current)) => current.enabled,
            (Some(_), None) => false,
            (None, _) => source.enabled,
        };
        if !enabled {
            info!(source_id = %id, "source disabled, not restarting");
            return None;
        }
        if !source.kind.is_reconnect_eligible() {
            debug!(source_id = %id, kind = source.kind.label(), "source kind is not restarted");
            return None;
        }
        Some(source)
    }

    fn spawn_worker(&self, registry: &mut Registry, source: Source, interval: u64) -> Result<()> {
        if source.uri.trim().is_empty() {
            return Err(Error::InvalidSource {
                id: source.id,
                reason: "empty URI".into(),
            });
        }

        let view = self.views.view_for(&source.uri);
        let view_name = self.views.view_name(view).to_string();
        let regions = self.load_regions(&source, view);

        registry.next_generation += 1;
        let id = WorkerId {
            source_id: source.id,
            generation: registry.next_generation,
        };
        let spec = WorkerSpec {
            id,
            source: source.clone(),
            view,
            view_name: view_name.clone(),
            regions,
            pipeline: self.config.pipeline_config(),
            settings: self.config.worker_settings(interval),
        };
        let worker = StreamWorker::spawn(spec, self.worker_context()).map_err(|e| Error::Spawn {
            id: source.id,
            source: e,
        })?;

        info!(source_id = %source.id, worker = %id, view = %view_name, "worker spawned");
        registry.workers.insert(source.id, worker);
        registry.snapshots.insert(source.id, source.clone());
        self.events.emit(StreamEvent::Added {
            source_id: source.id,
            name: source.name,
        });
        Ok(())
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            opener: Arc::clone(&self.opener),
            detector: Arc::clone(&self.detector),
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
            frames: self.frames.clone(),
        }
    }

    /// Loads a view's zones. Problems degrade to an empty set.
    fn load_regions(&self, source: &Source, view: ViewId) -> Arc<RegionSet> {
        let Some(path) = self.config.annotation_path(view) else {
            debug!(view = %view, "no annotation configured for view");
            return Arc::new(RegionSet::empty(view));
        };

        let regions = match RegionSet::load(view, &path, &self.config.regions.zone_class) {
            Ok(regions) => {
                info!(view = %view, zones = regions.len(), path = %path.display(), "danger zones loaded");
                self.events.log(
                    source.id,
                    format!("{}: loaded {} danger zone(s) for {}", source.name, regions.len(), self.views.view_name(view)),
                );
                regions
            }
            Err(e @ RegionError::Missing(_)) => {
                warn!(view = %view, error = %e, "annotation missing, no danger zones");
                self.events.log(source.id, format!("{}: {e}", source.name));
                RegionSet::empty(view)
            }
            Err(e) => {
                error!(view = %view, error = %e, "annotation unusable, no danger zones");
                self.events.log(source.id, format!("{}: {e}", source.name));
                RegionSet::empty(view)
            }
        };
        Arc::new(regions)
    }

    pub fn status(&self, id: SourceId) -> Option<WorkerStatus> {
        self.registry().workers.get(&id).map(StreamWorker::status)
    }

    /// Status of every worker, ordered by source id.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> =
            self.registry().workers.values().map(StreamWorker::status).collect();
        statuses.sort_by_key(|s| s.id.source_id);
        statuses
    }

    /// Workers whose loop is still running.
    pub fn live_count(&self) -> usize {
        self.registry()
            .workers
            .values()
            .filter(|w| !w.is_finished())
            .count()
    }

    fn on_worker_disconnected(self: &Arc<Self>, worker: WorkerId) {
        if self.config.reconnect.restart_on_disconnect {
            self.schedule_restart(worker.source_id, Some(worker));
        }
    }
}

/// Forwards worker events to the consumer and reacts to disconnections.
async fn relay(
    supervisor: Weak<Supervisor>,
    mut worker_events: mpsc::UnboundedReceiver<StreamEvent>,
    consumer: EventSink,
) {
    while let Some(event) = worker_events.recv().await {
        if let StreamEvent::Disconnected { worker, .. } = &event {
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.on_worker_disconnected(*worker);
            }
        }
        consumer.emit(event);
    }
    debug!("event relay finished");
}
