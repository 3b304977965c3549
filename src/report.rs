use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::labels::StateClass;
use crate::verdict::{RetainedDetection, Summary};

#[derive(Serialize, Debug, Clone)]
pub struct DetectionLog {
    pub class_name: StateClass,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
}

impl From<&RetainedDetection> for DetectionLog {
    fn from(r: &RetainedDetection) -> Self {
        let b = r.detection.xyxy();
        DetectionLog {
            class_name: r.class,
            confidence: r.confidence,
            bbox: [b[0], b[1], b[2], b[3]],
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct FrameLog {
    pub frame_id: usize,
    #[serde(flatten)]
    pub summary: Summary,
    /// `false` when the frame fell back to the unannotated default verdict.
    pub analyzed: bool,
    pub detections: Vec<DetectionLog>,
}

/// Per-frame verdicts collected over a run and written out as JSON.
#[derive(Debug, Default)]
pub struct Report {
    path: Option<PathBuf>,
    frames: Vec<FrameLog>,
}

impl Report {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            frames: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn record(&mut self, frame_id: usize, summary: Summary, retained: &[RetainedDetection], analyzed: bool) {
        if !self.is_enabled() {
            return;
        }
        self.frames.push(FrameLog {
            frame_id,
            summary,
            analyzed,
            detections: retained.iter().map(DetectionLog::from).collect(),
        });
    }

    /// Write the collected frames; no-op when reporting is disabled.
    pub fn save(&self) -> anyhow::Result<Option<&Path>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let json = serde_json::to_string_pretty(&self.frames)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(Some(path.as_path()))
    }
}
