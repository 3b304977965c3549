use opencv::{
    core::{Mat, Size},
    imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::path::Path;

use crate::error::{Error, Result};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Image,
    Video,
}

impl InputKind {
    /// Classify a path by extension, case-insensitively.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(InputKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Ok(InputKind::Video)
        } else {
            Err(Error::UnsupportedFileType(path.display().to_string()))
        }
    }
}

/// Sequential frames from one image or one video file.
pub enum FrameSource {
    Image(Option<Mat>),
    Video { capture: VideoCapture, size: Size },
}

impl FrameSource {
    /// Open `path`; video frames are resized to `video_size` (`[w, h]`).
    ///
    /// An image that fails to decode is an [`Error::InvalidFrame`]; a video
    /// that cannot be opened is an [`Error::OpenInput`].
    pub fn open(path: &Path, video_size: [i32; 2]) -> Result<Self> {
        let path_str = path.to_string_lossy();
        match InputKind::from_path(path)? {
            InputKind::Image => {
                let img = imgcodecs::imread(&path_str, imgcodecs::IMREAD_COLOR)?;
                if img.empty() {
                    return Err(Error::InvalidFrame(format!("failed to decode image {}", path_str)));
                }
                Ok(FrameSource::Image(Some(img)))
            }
            InputKind::Video => {
                let capture = VideoCapture::from_file(&path_str, videoio::CAP_ANY)?;
                if !capture.is_opened()? {
                    return Err(Error::OpenInput(path_str.into_owned()));
                }
                Ok(FrameSource::Video {
                    capture,
                    size: Size::new(video_size[0], video_size[1]),
                })
            }
        }
    }

    pub fn kind(&self) -> InputKind {
        match self {
            FrameSource::Image(_) => InputKind::Image,
            FrameSource::Video { .. } => InputKind::Video,
        }
    }

    /// Frame rate reported by the container, if any.
    pub fn fps(&self) -> Option<f64> {
        match self {
            FrameSource::Image(_) => None,
            FrameSource::Video { capture, .. } => capture
                .get(videoio::CAP_PROP_FPS)
                .ok()
                .filter(|fps| *fps > 0.0),
        }
    }

    /// Next frame in stream order, `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Mat>> {
        match self {
            FrameSource::Image(img) => Ok(img.take()),
            FrameSource::Video { capture, size } => {
                let mut frame = Mat::default();
                if !capture.read(&mut frame)? || frame.empty() {
                    return Ok(None);
                }
                let mut resized = Mat::default();
                imgproc::resize(&frame, &mut resized, *size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
                Ok(Some(resized))
            }
        }
    }
}
