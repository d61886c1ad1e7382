// THEORY:
// Alert delivery (email, SMS, a snapshot on disk) is slow and unreliable, and
// the frame loop must never feel it. Workers therefore only *enqueue* an
// `AlertNotice`; a single dispatcher task owned by the supervisor drains the
// queue and delivers notices concurrently on the blocking pool.
//
// Guarantees:
// - Enqueueing never blocks. When the queue is full the notice is dropped and
//   a warning is logged.
// - Delivery failures are logged and forgotten. Nothing is retried and nothing
//   reaches the worker.
// - The queue outlives any one worker, so a notice raised just before a worker
//   restart is still delivered.

use crate::error::NotifyError;
use crate::source::SourceId;
use futures::StreamExt;
use image::RgbImage;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One alert, ready to be delivered.
#[derive(Debug, Clone)]
pub struct AlertNotice {
    pub source_id: SourceId,
    pub source_name: String,
    pub message: String,
    /// The annotated frame that raised the alert.
    pub frame: Arc<RgbImage>,
    /// Already resolved: never empty unless no default recipients are configured.
    pub recipients: Vec<String>,
    pub raised_at: SystemTime,
}

/// An outbound transport for alerts. Implementations may block.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn send_alert(&self, notice: &AlertNotice) -> Result<(), NotifyError>;
}

/// A transport that only logs. Used when nothing else is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn send_alert(&self, notice: &AlertNotice) -> Result<(), NotifyError> {
        info!(
            source_id = %notice.source_id,
            source = %notice.source_name,
            recipients = ?notice.recipients,
            "{}",
            notice.message
        );
        Ok(())
    }
}

/// The enqueueing side of the notification queue. Cheap to clone.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<AlertNotice>,
    default_recipients: Arc<[String]>,
}

impl NotificationDispatcher {
    /// Starts the delivery task on `runtime`.
    ///
    /// The task ends once every clone of the dispatcher is dropped and the
    /// queued notices have been delivered.
    pub fn spawn(
        runtime: &Handle,
        notifier: Arc<dyn Notifier>,
        capacity: usize,
        default_recipients: Vec<String>,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, rx) = Self::unstarted(capacity, default_recipients);
        let concurrency = num_cpus::get().max(1);
        let task = runtime.spawn(deliver_all(rx, notifier, concurrency));
        (dispatcher, task)
    }

    fn unstarted(capacity: usize, default_recipients: Vec<String>) -> (Self, mpsc::Receiver<AlertNotice>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dispatcher = Self {
            tx,
            default_recipients: default_recipients.into(),
        };
        (dispatcher, rx)
    }

    /// A source's own recipients, or the defaults when it has none.
    pub fn resolve_recipients(&self, source_recipients: &[String]) -> Vec<String> {
        if source_recipients.is_empty() {
            self.default_recipients.to_vec()
        } else {
            source_recipients.to_vec()
        }
    }

    /// Queues a notice without waiting. Returns whether it was accepted.
    pub fn dispatch(&self, notice: AlertNotice) -> bool {
        match self.tx.try_send(notice) {
            Ok(()) => true,
            Err(TrySendError::Full(notice)) => {
                warn!(
                    source_id = %notice.source_id,
                    source = %notice.source_name,
                    "notification queue full, dropping alert notice"
                );
                false
            }
            Err(TrySendError::Closed(notice)) => {
                warn!(
                    source_id = %notice.source_id,
                    "notification dispatcher stopped, dropping alert notice"
                );
                false
            }
        }
    }
}

async fn deliver_all(rx: mpsc::Receiver<AlertNotice>, notifier: Arc<dyn Notifier>, concurrency: usize) {
    let notices = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|notice| (notice, rx))
    });

    notices
        .for_each_concurrent(concurrency, |notice| {
            let notifier = Arc::clone(&notifier);
            async move {
                let source_id = notice.source_id;
                let outcome = tokio::task::spawn_blocking(move || {
                    let result = notifier.send_alert(&notice);
                    (notifier.name().to_string(), result)
                })
                .await;

                match outcome {
                    Ok((channel, Ok(()))) => {
                        debug!(channel = %channel, source_id = %source_id, "alert notice delivered");
                    }
                    Ok((channel, Err(e))) => {
                        error!(
                            channel = %channel,
                            source_id = %source_id,
                            error = %e,
                            "failed to deliver alert notice"
                        );
                    }
                    Err(e) => {
                        error!(source_id = %source_id, error = %e, "alert delivery task panicked");
                    }
                }
            }
        })
        .await;

    debug!("notification dispatcher drained");
}
