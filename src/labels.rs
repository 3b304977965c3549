use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DetectionFailure;

/// Semantic classes the drowsiness model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateClass {
    Awake,
    Sleeping,
    Cigarette,
    Phone,
    Car,
}

/// Index → class, in the order of the model's output channels.
pub const LABEL_TABLE: [StateClass; 5] = [
    StateClass::Awake,
    StateClass::Sleeping,
    StateClass::Cigarette,
    StateClass::Phone,
    StateClass::Car,
];

impl StateClass {
    /// Resolve a raw detector class index.
    pub fn from_index(index: i64) -> Result<Self, DetectionFailure> {
        usize::try_from(index)
            .ok()
            .and_then(|i| LABEL_TABLE.get(i).copied())
            .ok_or(DetectionFailure::UnknownClass {
                index,
                len: LABEL_TABLE.len(),
            })
    }

    pub fn name(&self) -> &'static str {
        match self {
            StateClass::Awake => "awake",
            StateClass::Sleeping => "sleeping",
            StateClass::Cigarette => "cigarette",
            StateClass::Phone => "phone",
            StateClass::Car => "car",
        }
    }
}

impl fmt::Display for StateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
