// THEORY:
// The runner's alert transport. Each alert becomes two files in the output
// directory: the annotated frame as JPEG and a short text summary naming the
// source, the message and the recipients. An operator (or a mail relay
// watching the directory) picks them up from there.

use handguard::core_modules::annotate::encode_jpeg;
use handguard::error::NotifyError;
use handguard::notify::{AlertNotice, Notifier};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::info;

const JPEG_QUALITY: u8 = 90;

#[derive(Debug)]
pub struct SnapshotNotifier {
    dir: PathBuf,
}

impl SnapshotNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Notifier for SnapshotNotifier {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn send_alert(&self, notice: &AlertNotice) -> Result<(), NotifyError> {
        let millis = notice
            .raised_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let stem = format!("alert-{}-{millis}", notice.source_id);

        let jpeg = encode_jpeg(&notice.frame, JPEG_QUALITY)?;
        let image_path = self.dir.join(format!("{stem}.jpg"));
        std::fs::write(&image_path, jpeg)?;

        let recipients = if notice.recipients.is_empty() {
            "(none)".to_string()
        } else {
            notice.recipients.join(", ")
        };
        let summary = format!(
            "source: {} ({})\nmessage: {}\nrecipients: {}\nraised_at_ms: {millis}\n",
            notice.source_name, notice.source_id, notice.message, recipients
        );
        std::fs::write(self.dir.join(format!("{stem}.txt")), summary)?;

        info!(path = %image_path.display(), source = %notice.source_name, "alert snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handguard::source::SourceId;
    use image::RgbImage;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    #[test]
    fn writes_image_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = SnapshotNotifier::new(dir.path().join("alerts")).unwrap();
        let notice = AlertNotice {
            source_id: SourceId(3),
            source_name: "press line".into(),
            message: "Bare-hand operation detected in line 1 (1 zone)".into(),
            frame: Arc::new(RgbImage::new(16, 16)),
            recipients: vec!["safety@example.com".into()],
            raised_at: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
        };

        notifier.send_alert(&notice).unwrap();

        let image = notifier.dir().join("alert-3-1700000000123.jpg");
        let summary = std::fs::read_to_string(notifier.dir().join("alert-3-1700000000123.txt")).unwrap();
        assert!(image.exists());
        assert!(summary.contains("press line"));
        assert!(summary.contains("safety@example.com"));
    }

    #[test]
    fn unwritable_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = SnapshotNotifier::new(dir.path()).unwrap();
        std::fs::remove_dir_all(dir.path()).unwrap();
        let notice = AlertNotice {
            source_id: SourceId(1),
            source_name: "gone".into(),
            message: "x".into(),
            frame: Arc::new(RgbImage::new(4, 4)),
            recipients: vec![],
            raised_at: SystemTime::now(),
        };
        assert!(matches!(notifier.send_alert(&notice), Err(NotifyError::Io(_))));
    }
}
