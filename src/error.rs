use std::time::Duration;
use thiserror::Error;

/// Errors raised while decoding, detecting or annotating a frame.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame is empty, has the wrong shape, or failed to decode.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("detection failed: {0}")]
    DetectionFailure(#[from] DetectionFailure),

    /// Input extension outside the image/video allow-list.
    #[error("unsupported file type: {0:?}")]
    UnsupportedFileType(String),

    /// The input stream itself could not be opened. Terminates the run.
    #[error("cannot open input {0}")]
    OpenInput(String),

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}

/// Reasons a detector call could not produce usable detections.
#[derive(Debug, Error)]
pub enum DetectionFailure {
    #[error("inference backend error: {0}")]
    Backend(#[from] tch::TchError),

    #[error("malformed detector output: {0}")]
    MalformedOutput(String),

    /// The model and the label table disagree.
    #[error("class index {index} outside label table of {len} entries")]
    UnknownClass { index: i64, len: usize },

    #[error("inference did not finish within {0:?}")]
    Timeout(Duration),
}

impl DetectionFailure {
    /// A label mismatch is a configuration error: the frame must be dropped
    /// rather than shown with a default verdict.
    pub fn is_fatal_for_frame(&self) -> bool {
        matches!(self, DetectionFailure::UnknownClass { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
