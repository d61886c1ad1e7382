// THEORY:
// All tunables of the monitor live in one TOML document. Every field has a
// default, so an empty file is a valid configuration and a deployment only
// writes down what it changes. Loading validates once; everything downstream
// receives already-checked, strongly typed settings (`AlertConfig`,
// `PipelineConfig`, `WorkerSettings`, `ViewMap`).

use crate::core_modules::alert::AlertConfig;
use crate::core_modules::view::{ViewId, ViewMap, ViewSpec};
use crate::error::ConfigError;
use crate::pipeline::PipelineConfig;
use crate::worker::WorkerSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub alert: AlertSection,
    pub detection: DetectionSection,
    pub sampling: SamplingSection,
    pub reconnect: ReconnectSection,
    pub worker: WorkerSection,
    pub notify: NotifySection,
    pub regions: RegionsSection,
    pub frames: FramesSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlertSection {
    /// Consecutive dangerous sampled frames before an alert fires.
    pub threshold: u32,
    /// Minimum time an alert stays active.
    pub hold_down_secs: f64,
}

impl Default for AlertSection {
    fn default() -> Self {
        Self {
            threshold: 10,
            hold_down_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionSection {
    pub confidence: f32,
    pub hazard_class: String,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            confidence: 0.8,
            hazard_class: "bare".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SamplingSection {
    /// Fixed stride. When unset it is derived from the number of sources.
    pub interval: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub connect_backoff_ms: u64,
    pub read_backoff_ms: u64,
    pub settle_ms: u64,
    /// Delay before the supervisor rebuilds a disconnected worker.
    pub restart_delay_ms: u64,
    pub restart_on_disconnect: bool,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            connect_backoff_ms: 3000,
            read_backoff_ms: 2000,
            settle_ms: 1000,
            restart_delay_ms: 2000,
            restart_on_disconnect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub idle_delay_ms: u64,
    pub pause_poll_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            idle_delay_ms: 10,
            pause_poll_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    pub queue_capacity: usize,
    /// Used for every source that names no recipients of its own.
    pub default_recipients: Vec<String>,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            default_recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegionsSection {
    /// Base directory for view annotation files. Relative paths are resolved
    /// against the config file's directory.
    pub directory: PathBuf,
    /// Object name that marks a danger zone in annotation files.
    pub zone_class: String,
    pub views: Vec<ViewSpec>,
    pub default_view: ViewId,
}

impl Default for RegionsSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("regions"),
            zone_class: "area".to_string(),
            views: Vec::new(),
            default_view: ViewId(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FramesSection {
    pub bus_capacity: usize,
}

impl Default for FramesSection {
    fn default() -> Self {
        Self { bus_capacity: 4 }
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if config.regions.directory.is_relative() {
            config.regions.directory = base.join(&config.regions.directory);
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.alert.threshold == 0 {
            return invalid("alert.threshold must be at least 1");
        }
        if Duration::try_from_secs_f64(self.alert.hold_down_secs).is_err() {
            return invalid("alert.hold_down_secs must be a non-negative number of seconds that fits a duration");
        }
        if !(0.0..=1.0).contains(&self.detection.confidence) {
            return invalid("detection.confidence must be within 0..=1");
        }
        if self.detection.hazard_class.trim().is_empty() {
            return invalid("detection.hazard_class must not be empty");
        }
        if self.sampling.interval == Some(0) {
            return invalid("sampling.interval must be at least 1");
        }
        if self.notify.queue_capacity == 0 {
            return invalid("notify.queue_capacity must be at least 1");
        }
        if self.frames.bus_capacity == 0 {
            return invalid("frames.bus_capacity must be at least 1");
        }
        if !self.regions.views.is_empty() && self.regions.default_view.0 >= self.regions.views.len() {
            return Err(ConfigError::Invalid(format!(
                "regions.default_view {} does not name one of the {} configured views",
                self.regions.default_view,
                self.regions.views.len()
            )));
        }
        Ok(())
    }

    /// The sampling stride for a monitor running `enabled_sources` streams.
    ///
    /// More streams mean a sparser stride, between 3 and 5, unless fixed in config.
    pub fn sample_interval_for(&self, enabled_sources: usize) -> u64 {
        self.sampling
            .interval
            .unwrap_or_else(|| (enabled_sources as u64 / 2).clamp(3, 5))
    }

    pub fn alert_config(&self) -> AlertConfig {
        AlertConfig {
            threshold: self.alert.threshold,
            hold_down: Duration::try_from_secs_f64(self.alert.hold_down_secs).unwrap_or(Duration::MAX),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            hazard_class: self.detection.hazard_class.clone(),
            confidence: self.detection.confidence,
            alert: self.alert_config(),
        }
    }

    pub fn worker_settings(&self, sample_interval: u64) -> WorkerSettings {
        WorkerSettings {
            sample_interval,
            connect_backoff: Duration::from_millis(self.reconnect.connect_backoff_ms),
            read_backoff: Duration::from_millis(self.reconnect.read_backoff_ms),
            settle: Duration::from_millis(self.reconnect.settle_ms),
            idle_delay: Duration::from_millis(self.worker.idle_delay_ms),
            pause_poll: Duration::from_millis(self.worker.pause_poll_ms),
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect.restart_delay_ms)
    }

    pub fn view_map(&self) -> ViewMap {
        ViewMap::new(self.regions.views.clone(), self.regions.default_view)
    }

    /// Full path of a view's annotation file.
    pub fn annotation_path(&self, view: ViewId) -> Option<PathBuf> {
        self.regions
            .views
            .get(view.0)
            .map(|spec| self.regions.directory.join(&spec.annotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = MonitorConfig::from_toml_str("").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.alert_config(), AlertConfig::default());
        assert_eq!(config.pipeline_config().hazard_class, "bare");
        assert_eq!(config.worker_settings(3), WorkerSettings::default());
        assert_eq!(config.restart_delay(), Duration::from_secs(2));
        assert!(config.reconnect.restart_on_disconnect);
    }

    #[test]
    fn derived_interval_is_clamped() {
        let config = MonitorConfig::default();
        assert_eq!(config.sample_interval_for(0), 3);
        assert_eq!(config.sample_interval_for(2), 3);
        assert_eq!(config.sample_interval_for(8), 4);
        assert_eq!(config.sample_interval_for(40), 5);
    }

    #[test]
    fn fixed_interval_wins() {
        let config = MonitorConfig::from_toml_str("[sampling]\ninterval = 1\n").unwrap();
        assert_eq!(config.sample_interval_for(40), 1);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = MonitorConfig::from_toml_str(
            r#"
            [alert]
            threshold = 4

            [reconnect]
            restart_on_disconnect = false
            "#,
        )
        .unwrap();
        assert_eq!(config.alert.threshold, 4);
        assert_eq!(config.alert.hold_down_secs, 5.0);
        assert!(!config.reconnect.restart_on_disconnect);
        assert_eq!(config.reconnect.connect_backoff_ms, 3000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for doc in [
            "[alert]\nthreshold = 0\n",
            "[sampling]\ninterval = 0\n",
            "[frames]\nbus_capacity = 0\n",
            "[detection]\nconfidence = 1.5\n",
            "[notify]\nqueue_capacity = 0\n",
            "[alert]\nhold_down_secs = -1.0\n",
            "[alert]\nhold_down_secs = 1e30\n",
        ] {
            assert!(
                matches!(MonitorConfig::from_toml_str(doc), Err(ConfigError::Invalid(_))),
                "{doc}"
            );
        }
    }

    #[test]
    fn oversized_hold_down_saturates_instead_of_panicking() {
        let mut config = MonitorConfig::default();
        config.alert.hold_down_secs = 1e30;
        assert_eq!(config.alert_config().hold_down, Duration::MAX);
    }

    #[test]
    fn unknown_sections_are_parse_errors() {
        assert!(matches!(
            MonitorConfig::from_toml_str("[mail]\nhost = \"smtp\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn views_build_a_view_map() {
        let config = MonitorConfig::from_toml_str(
            r#"
            [regions]
            directory = "/etc/handguard/regions"
            default_view = 1

            [[regions.views]]
            name = "line 1"
            annotation = "line1.xml"
            keywords = ["20250829_1"]
            hosts = ["102"]

            [[regions.views]]
            name = "line 2"
            annotation = "line2.xml"
            hosts = ["106"]
            "#,
        )
        .unwrap();

        let views = config.view_map();
        assert_eq!(views.view_for("rtsp://u:p@192.168.1.102:554/s"), ViewId(0));
        assert_eq!(views.view_for("/videos/unknown.mp4"), ViewId(1));
        assert_eq!(
            config.annotation_path(ViewId(1)),
            Some(PathBuf::from("/etc/handguard/regions/line2.xml"))
        );
        assert_eq!(config.annotation_path(ViewId(7)), None);
    }

    #[test]
    fn default_view_must_exist() {
        let doc = r#"
            [regions]
            default_view = 2
            [[regions.views]]
            name = "only"
            annotation = "only.xml"
        "#;
        assert!(matches!(
            MonitorConfig::from_toml_str(doc),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn relative_region_directory_follows_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[regions]\ndirectory = \"zones\"").unwrap();

        let config = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(config.regions.directory, dir.path().join("zones"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MonitorConfig::from_file(&dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
