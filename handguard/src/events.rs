// THEORY:
// Workers talk to the outside world over two fan-in channels with different
// delivery promises:
//
// - `StreamEvent`s (logs, alerts, lifecycle) travel over an unbounded mpsc
//   channel. Every event emitted is delivered, in per-worker order.
// - Annotated frames travel over the `FrameBus`, a small broadcast channel.
//   Frames are "latest wins": a slow subscriber lags and skips ahead rather
//   than holding back a worker.
//
// Any number of workers may emit at any time. The consumer drains at its own
// pace and no worker ever waits on it.

use crate::source::SourceId;
use crate::worker::WorkerId;
use image::RgbImage;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Everything that must reach the consumer, one by one.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A human-readable lifecycle or error line.
    Log {
        source_id: Option<SourceId>,
        text: String,
    },
    /// An alert was raised on a stream.
    Alert {
        source_id: SourceId,
        source_name: String,
        text: String,
    },
    /// A worker lost (or could not establish) its connection.
    Disconnected { source_id: SourceId, worker: WorkerId },
    /// A finite source was read to the end; its worker has exited.
    Completed(SourceId),
    Added { source_id: SourceId, name: String },
    Removed(SourceId),
}

impl StreamEvent {
    pub fn source_id(&self) -> Option<SourceId> {
        match self {
            StreamEvent::Log { source_id, .. } => *source_id,
            StreamEvent::Alert { source_id, .. }
            | StreamEvent::Disconnected { source_id, .. }
            | StreamEvent::Added { source_id, .. } => Some(*source_id),
            StreamEvent::Completed(id) | StreamEvent::Removed(id) => Some(*id),
        }
    }
}

/// The sending half handed to every worker.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Sends an event. A consumer that has gone away is not an error for the sender.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, source_id: SourceId, text: impl Into<String>) {
        self.emit(StreamEvent::Log {
            source_id: Some(source_id),
            text: text.into(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One annotated frame, ready for display.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub source_id: SourceId,
    pub frame_index: u64,
    pub image: Arc<RgbImage>,
}

/// Latest-wins fan-in of annotated frames from every worker.
#[derive(Clone)]
pub struct FrameBus {
    frames_tx: broadcast::Sender<FramePacket>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<FramePacket>(capacity.max(1));
        Self { frames_tx }
    }

    /// Publishes a frame, returning how many subscribers will see it.
    pub fn publish(&self, packet: FramePacket) -> usize {
        self.frames_tx.send(packet).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FramePacket> {
        self.frames_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.frames_tx.receiver_count()
    }
}
