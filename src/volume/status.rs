//! Volume Status State Machine
//!
//! A volume starts `Initializing` and is promoted to `Ready` the first time
//! it is seen in use by a live workload while no resize is in flight.
//! There is no way back: a `Ready` volume that loses its workload (restart,
//! reschedule) stays `Ready`.

use serde::{Deserialize, Serialize};

/// Readiness status carried in the status annotation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    #[default]
    Initializing,
    Ready,
}

impl VolumeStatus {
    /// Annotation value
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeStatus::Initializing => "initializing",
            VolumeStatus::Ready => "ready",
        }
    }

    /// Decode an annotation value, tolerating case and surrounding whitespace
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "initializing" => Some(VolumeStatus::Initializing),
            "ready" => Some(VolumeStatus::Ready),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_become(&self, next: VolumeStatus) -> bool {
        !matches!((self, next), (VolumeStatus::Ready, VolumeStatus::Initializing))
    }
}

impl std::fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating the state machine for one volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// Promote to `Ready`
    Promote,
    /// Nothing to do
    Stay,
    /// Resize in progress; the volume must not be touched
    Frozen,
}

/// Evaluate the status transition for a volume
pub fn next_transition(current: VolumeStatus, in_use: bool, resizing: bool) -> StatusTransition {
    if resizing {
        return StatusTransition::Frozen;
    }
    match (current, in_use) {
        (VolumeStatus::Initializing, true) => StatusTransition::Promote,
        _ => StatusTransition::Stay,
    }
}
