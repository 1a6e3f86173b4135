use thiserror::Error;

use crate::mot::EventState;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("token for frame {frame} is not eligible for event {event} (end frame {end_frame}, state {state:?})")]
    TokenNotEligible {
        event: u32,
        frame: u32,
        end_frame: u32,
        state: EventState,
    },
    #[error("event {event}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        event: u32,
        from: EventState,
        to: EventState,
    },
    #[error("event {0} does not exist")]
    UnknownEvent(u32),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Appearance(#[from] AppearanceError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bad kalman parameters '{0}': expected \"process_noise,measurement_noise\"")]
    KalmanParameters(String),
    #[error("invalid parameter {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("could not read parameters: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse parameters: {0}")]
    Json(#[from] serde_json::Error),
}

/// Faults raised inside the appearance model. The strategy layer turns every one of
/// these into an ordinary "not found this frame" result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AppearanceError {
    #[error("vote ({dx}, {dy}) is outside the vote map")]
    VoteOutOfRange { dx: i32, dy: i32 },
    #[error("vote maximum {value} below confidence floor {floor}")]
    LowConfidence { value: f32, floor: f32 },
    #[error("segmentation produced an empty region")]
    EmptyRegion,
    #[error("appearance model was never reset")]
    NotInitialized,
    #[error("search region lies outside the image")]
    SearchRegionOutside,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported checkpoint version {0}")]
    UnknownVersion(u32),
    #[error("checkpoint event {0} has no tokens")]
    EmptyEvent(u32),
}
