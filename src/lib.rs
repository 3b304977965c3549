pub mod analyzer;
pub mod config;
pub mod detection;
pub mod error;
pub mod labels;
pub mod report;
pub mod source;
pub mod utils;
pub mod verdict;
pub mod visualization;

// Re-export main types
pub use crate::analyzer::{FrameAnalyzer, FrameOutcome, FrameVerdict};
pub use crate::config::Config;
pub use crate::detection::{Detect, Detection, Detector, TimeoutDetector};
pub use crate::error::{DetectionFailure, Error};
pub use crate::labels::StateClass;
pub use crate::verdict::{ModeState, RetentionRule, Summary};
