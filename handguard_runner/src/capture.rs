// THEORY:
// Frame acquisition backends for the runner. A source URI that names a
// directory is played back as a sorted still-image sequence (a finite
// recording). Everything else (video files, RTSP URLs, device indices) goes to
// OpenCV's `VideoCapture` when the `opencv` feature is enabled.

use handguard::error::{ConnectError, ReadError};
use handguard::source::{FrameSource, Source, SourceOpener};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// Plays a directory of still images in file-name order.
#[derive(Debug)]
pub struct ImageSequence {
    frames: Vec<PathBuf>,
    next: usize,
    open: bool,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self, ConnectError> {
        let unreachable = |reason: String| ConnectError::Unreachable {
            uri: dir.display().to_string(),
            reason,
        };

        let entries = std::fs::read_dir(dir).map_err(|e| unreachable(e.to_string()))?;
        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(unreachable("directory contains no images".into()));
        }
        debug!(dir = %dir.display(), frames = frames.len(), "image sequence opened");
        Ok(Self {
            frames,
            next: 0,
            open: true,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn read(&mut self) -> Result<RgbImage, ReadError> {
        let Some(path) = self.frames.get(self.next) else {
            return Err(ReadError::EndOfStream);
        };
        self.next += 1;
        image::open(path)
            .map(|img| img.to_rgb8())
            .map_err(|e| ReadError::Failed(format!("{}: {e}", path.display())))
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(feature = "opencv")]
pub use self::video::OpenCvCapture;

#[cfg(feature = "opencv")]
mod video {
    use super::*;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture},
    };

    /// Any URI OpenCV can open: video files, network streams, device indices.
    pub struct OpenCvCapture {
        cap: VideoCapture,
    }

    impl OpenCvCapture {
        pub fn open(uri: &str) -> Result<Self, ConnectError> {
            let unreachable = |reason: String| ConnectError::Unreachable {
                uri: uri.to_string(),
                reason,
            };

            let cap = match uri.trim().parse::<i32>() {
                Ok(index) => VideoCapture::new(index, videoio::CAP_ANY),
                Err(_) => VideoCapture::from_file(uri, videoio::CAP_ANY),
            }
            .map_err(|e| unreachable(e.to_string()))?;

            if !cap.is_opened().map_err(|e| unreachable(e.to_string()))? {
                return Err(unreachable("capture did not open".into()));
            }
            Ok(Self { cap })
        }
    }

    impl FrameSource for OpenCvCapture {
        fn read(&mut self) -> Result<RgbImage, ReadError> {
            let mut frame = Mat::default();
            match self.cap.read(&mut frame) {
                Ok(true) if !frame.empty() => {}
                Ok(_) => return Err(ReadError::EndOfStream),
                Err(e) => return Err(ReadError::Failed(e.to_string())),
            }

            // OpenCV decodes to BGR.
            let mut rgb = Mat::default();
            imgproc::cvt_color(&frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
                .map_err(|e| ReadError::Failed(e.to_string()))?;
            let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
            let bytes = rgb
                .data_bytes()
                .map_err(|e| ReadError::Failed(e.to_string()))?
                .to_vec();
            RgbImage::from_raw(width, height, bytes)
                .ok_or_else(|| ReadError::Failed("frame buffer size mismatch".into()))
        }

        fn is_open(&self) -> bool {
            self.cap.is_opened().unwrap_or(false)
        }

        fn close(&mut self) {
            let _ = self.cap.release();
        }
    }
}

/// Chooses a backend per source.
#[derive(Debug, Default)]
pub struct RunnerOpener;

impl SourceOpener for RunnerOpener {
    fn open(&self, source: &Source) -> Result<Box<dyn FrameSource>, ConnectError> {
        let path = Path::new(&source.uri);
        if path.is_dir() {
            return Ok(Box::new(ImageSequence::open(path)?));
        }

        #[cfg(feature = "opencv")]
        {
            Ok(Box::new(OpenCvCapture::open(&source.uri)?))
        }

        #[cfg(not(feature = "opencv"))]
        {
            Err(ConnectError::Unsupported {
                uri: source.uri.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frame(dir: &Path, name: &str, shade: u8) {
        let img = RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn images_play_in_name_order_then_end() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "frame_002.png", 20);
        write_frame(dir.path(), "frame_001.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.read().unwrap().get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(seq.read().unwrap().get_pixel(0, 0), &Rgb([20, 20, 20]));
        assert!(matches!(seq.read(), Err(ReadError::EndOfStream)));
    }

    #[test]
    fn empty_directory_cannot_be_opened() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequence::open(dir.path()),
            Err(ConnectError::Unreachable { .. })
        ));
    }

    #[test]
    fn opener_routes_directories_to_image_sequences() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "a.png", 0);
        let source = Source::new(1, "stills", dir.path().display().to_string());

        let mut handle = RunnerOpener.open(&source).unwrap();
        assert_eq!(handle.read().unwrap().dimensions(), (8, 6));
        handle.close();
        assert!(!handle.is_open());
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn other_uris_need_the_opencv_backend() {
        let source = Source::new(2, "camera", "rtsp://10.0.0.2/live");
        assert!(matches!(
            RunnerOpener.open(&source),
            Err(ConnectError::Unsupported { .. })
        ));
    }
}
