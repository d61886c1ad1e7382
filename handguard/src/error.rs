// THEORY:
// Every failure the monitoring engine can meet is named here. The taxonomy is
// deliberately split by *who recovers*: connection and read failures are
// recovered by the owning `StreamWorker`, detector failures cost a single frame,
// notification failures are swallowed by the dispatcher, and region file problems
// degrade to an empty zone set. Only `Error` itself ever crosses the Supervisor
// boundary, and only for structural problems (a worker that cannot be started).

use crate::source::SourceId;
use thiserror::Error;

/// Crate-wide result alias for structural operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A source could not be opened.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("source {uri} could not be opened: {reason}")]
    Unreachable { uri: String, reason: String },

    #[error("source {uri} did not confirm the connection within the settle time")]
    NotConfirmed { uri: String },

    #[error("no frame source backend can open {uri}")]
    Unsupported { uri: String },
}

/// Reading the next frame failed.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The source has no more frames. Terminal for files, a reconnect cue for streams.
    #[error("end of stream")]
    EndOfStream,

    #[error("frame read failed: {0}")]
    Failed(String),
}

/// The detector adapter failed on a frame.
#[derive(Debug, Error)]
#[error("detector failed: {0}")]
pub struct DetectionError(pub String);

/// Delivering an alert notification failed.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// A region annotation file could not be used.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("region annotation file {} does not exist", .0.display())]
    Missing(std::path::PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed region annotation: {0}")]
    Malformed(String),
}

/// The monitor configuration is unreadable or invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Structural failures surfaced by the Supervisor.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("source {id} is misconfigured: {reason}")]
    InvalidSource { id: SourceId, reason: String },

    #[error("failed to spawn worker for source {id}: {source}")]
    Spawn {
        id: SourceId,
        #[source]
        source: std::io::Error,
    },

    #[error("a tokio runtime is required: {0}")]
    Runtime(String),
}
