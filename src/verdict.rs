//! Reduction of raw detections into a per-frame verdict.
//!
//! Everything here is pure: detections in, retained detections and summary
//! values out. Drawing lives in [`crate::visualization`].

use serde::Serialize;
use std::fmt;

use crate::config::Config;
use crate::detection::Detection;
use crate::error::DetectionFailure;
use crate::labels::StateClass;

/// Round a raw confidence *up* to two decimals: 0.861 → 0.87.
///
/// A raw value that is already the f32 nearest to a hundredth (0.3, 0.95)
/// keeps that hundredth; anything else takes the ceiling, however close.
pub fn round_up_confidence(raw: f32) -> f32 {
    let scaled = f64::from(raw) * 100.0;
    let nearest = scaled.round();
    let hundredths = if (nearest / 100.0) as f32 == raw {
        nearest
    } else {
        scaled.ceil()
    };
    (hundredths / 100.0) as f32
}

/// The detector reports each sleeping occupant roughly twice (head and
/// torso), so the raw tally is halved and rounded up.
pub fn sleeping_count(sleeping_detections: usize) -> usize {
    sleeping_detections.div_ceil(2)
}

/// Headline state of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeState {
    Known(StateClass),
    Unknown,
}

impl fmt::Display for ModeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeState::Known(class) => write!(f, "{}", class),
            ModeState::Unknown => f.write_str("Unknown"),
        }
    }
}

impl Serialize for ModeState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Most common class; on equal counts the class seen first wins.
pub fn mode_state<I>(classes: I) -> ModeState
where
    I: IntoIterator<Item = StateClass>,
{
    // insertion-ordered tally
    let mut tally: Vec<(StateClass, usize)> = Vec::new();
    for class in classes {
        match tally.iter_mut().find(|(c, _)| *c == class) {
            Some((_, count)) => *count += 1,
            None => tally.push((class, 1)),
        }
    }

    let mut best: Option<(StateClass, usize)> = None;
    for &(class, count) in &tally {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((class, count));
        }
    }
    best.map_or(ModeState::Unknown, |(class, _)| ModeState::Known(class))
}

/// A detection that passed the confidence and class filters.
#[derive(Debug, Clone)]
pub struct RetainedDetection {
    pub detection: Detection,
    pub class: StateClass,
    /// Confidence after [`round_up_confidence`].
    pub confidence: f32,
}

impl RetainedDetection {
    pub fn label(&self) -> String {
        format!("{} {:.2}", self.class, self.confidence)
    }
}

/// Which detections are allowed to influence the verdict.
#[derive(Debug, Clone)]
pub struct RetentionRule {
    pub min_confidence: f32,
    pub classes: Vec<StateClass>,
}

impl Default for RetentionRule {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RetentionRule {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_confidence: config.min_confidence,
            classes: config.retained_classes.clone(),
        }
    }

    /// Filter detections, keeping detector order.
    ///
    /// Every class index is resolved first, so a single out-of-range index
    /// fails the whole frame even if that detection would have been dropped.
    pub fn retain(&self, detections: &[Detection]) -> Result<Vec<RetainedDetection>, DetectionFailure> {
        let resolved = detections
            .iter()
            .map(|det| StateClass::from_index(det.class_id).map(|class| (det, class)))
            .collect::<Result<Vec<_>, _>>()?;

        let retained = resolved
            .into_iter()
            .filter_map(|(det, class)| {
                let confidence = round_up_confidence(det.confidence);
                if confidence > self.min_confidence && self.classes.contains(&class) {
                    Some(RetainedDetection {
                        detection: det.clone(),
                        class,
                        confidence,
                    })
                } else {
                    log::debug!(
                        "dropping {} at {:.2} (raw {:.4})",
                        class,
                        confidence,
                        det.confidence
                    );
                    None
                }
            })
            .collect();
        Ok(retained)
    }
}

/// Scalar outputs of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub mode_state: ModeState,
    pub sleeping_count: usize,
}

impl Summary {
    pub const UNKNOWN: Summary = Summary {
        mode_state: ModeState::Unknown,
        sleeping_count: 0,
    };

    pub fn from_retained(retained: &[RetainedDetection]) -> Self {
        let sleeping = retained
            .iter()
            .filter(|r| r.class == StateClass::Sleeping)
            .count();
        Summary {
            mode_state: mode_state(retained.iter().map(|r| r.class)),
            sleeping_count: sleeping_count(sleeping),
        }
    }
}
