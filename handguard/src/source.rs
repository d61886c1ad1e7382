// THEORY:
// The `source` module describes *where frames come from* without knowing *how*
// they are decoded. A `Source` is a read-only snapshot of one catalog entry; the
// engine never writes back to the catalog. Acquisition is split into two traits:
// a `SourceOpener` that turns a `Source` into a live `FrameSource` handle, and the
// handle itself, which is exclusively owned by one `StreamWorker` for as long as
// the connection lives. Decoders (OpenCV, image sequences, test scripts) plug in
// behind these traits.

use crate::error::{ConnectError, ReadError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Opaque identity of a catalog source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The physical nature of a source, which decides its failure semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A finite recording. Running out of frames ends the worker.
    File,
    /// A network camera (RTSP and friends). Failures trigger reconnects.
    #[serde(alias = "rtsp")]
    NetworkStream,
    /// A locally attached capture device.
    Device,
}

impl SourceKind {
    /// Guesses the kind from a URI: network schemes, bare device indices, else a file.
    pub fn infer(uri: &str) -> Self {
        let lower = uri.trim().to_ascii_lowercase();
        if ["rtsp://", "rtsps://", "rtmp://", "http://", "https://", "udp://"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
        {
            SourceKind::NetworkStream
        } else if !lower.is_empty() && lower.chars().all(|c| c.is_ascii_digit()) {
            SourceKind::Device
        } else {
            SourceKind::File
        }
    }

    /// Whether running out of frames is normal completion rather than a failure.
    pub fn is_finite(self) -> bool {
        matches!(self, SourceKind::File)
    }

    /// Whether the Supervisor rebuilds the worker when it reports a disconnection.
    pub fn is_reconnect_eligible(self) -> bool {
        matches!(self, SourceKind::NetworkStream)
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::NetworkStream => "network stream",
            SourceKind::Device => "device",
        }
    }
}

fn default_true() -> bool {
    true
}

/// A read-only snapshot of one configured video origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub uri: String,
    pub kind: SourceKind,
    /// Only enabled sources are started or restarted.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Alert recipients. Empty means "all default recipients".
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Whether the catalog last saw this source as reachable.
    #[serde(default = "default_true")]
    pub last_known_valid: bool,
}

impl Source {
    /// Builds an enabled source, inferring its kind from the URI.
    pub fn new(id: u64, name: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            id: SourceId(id),
            name: name.into(),
            kind: SourceKind::infer(&uri),
            uri,
            enabled: true,
            recipients: Vec::new(),
            last_known_valid: true,
        }
    }

    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// One decoded frame, tagged with where and when in the stream it was read.
#[derive(Debug, Clone)]
pub struct Frame {
    pub source_id: SourceId,
    /// 1-based position in the worker's read order.
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A live acquisition handle. Owned by exactly one worker; reads block only that worker.
pub trait FrameSource: Send {
    /// Reads the next frame in stream order.
    fn read(&mut self) -> Result<RgbImage, ReadError>;

    /// Whether the handle still considers itself connected.
    fn is_open(&self) -> bool {
        true
    }

    /// Releases the underlying device or connection. Called exactly once per handle.
    fn close(&mut self) {}
}

/// Opens live handles for sources.
pub trait SourceOpener: Send + Sync {
    fn open(&self, source: &Source) -> Result<Box<dyn FrameSource>, ConnectError>;
}

/// Read access to the external source catalog, used when no snapshot is cached.
pub trait SourceCatalog: Send + Sync {
    fn lookup(&self, id: SourceId) -> Option<Source>;
}

/// A catalog held in memory, e.g. loaded once from a sources file.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    sources: RwLock<HashMap<SourceId, Source>>,
}

impl InMemoryCatalog {
    pub fn new(sources: impl IntoIterator<Item = Source>) -> Self {
        Self {
            sources: RwLock::new(sources.into_iter().map(|s| (s.id, s)).collect()),
        }
    }

    /// Inserts or replaces a source. Running workers keep their old snapshot.
    pub fn upsert(&self, source: Source) {
        let mut sources = self
            .sources
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sources.insert(source.id, source);
    }

    pub fn remove(&self, id: SourceId) -> Option<Source> {
        let mut sources = self
            .sources
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sources.remove(&id)
    }

    /// All enabled sources, ordered by id.
    pub fn enabled(&self) -> Vec<Source> {
        let sources = self
            .sources
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut enabled: Vec<Source> = sources.values().filter(|s| s.enabled).cloned().collect();
        enabled.sort_by_key(|s| s.id);
        enabled
    }
}

impl SourceCatalog for InMemoryCatalog {
    fn lookup(&self, id: SourceId) -> Option<Source> {
        let sources = self
            .sources
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sources.get(&id).cloned()
    }
}
