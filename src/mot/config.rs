use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::mot::mot_errors::ConfigError;
use crate::mot::TrackingStrategy;

/// How open events are extended from one frame to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingMode {
    KalmanFilter,
    NearestNeighbor,
    Appearance,
    /// Prefer the Kalman tracker, fall back to the appearance tracker
    KalmanAppearance,
    /// Prefer the nearest neighbor tracker, fall back to the appearance tracker
    NearestNeighborAppearance,
    /// Events are created but never extended
    None,
}

impl TrackingMode {
    /// Ordered strategies tried for every open event. The first one is the primary.
    pub fn strategy_chain(&self) -> &'static [TrackingStrategy] {
        match self {
            TrackingMode::KalmanFilter => &[TrackingStrategy::Kalman],
            TrackingMode::NearestNeighbor => &[TrackingStrategy::NearestNeighbor],
            TrackingMode::Appearance => &[TrackingStrategy::Appearance],
            TrackingMode::KalmanAppearance => {
                &[TrackingStrategy::Kalman, TrackingStrategy::Appearance]
            }
            TrackingMode::NearestNeighborAppearance => &[
                TrackingStrategy::NearestNeighbor,
                TrackingStrategy::Appearance,
            ],
            TrackingMode::None => &[],
        }
    }
    pub fn uses_appearance(&self) -> bool {
        self.strategy_chain().contains(&TrackingStrategy::Appearance)
    }
    /// Strategy a newly created event starts with
    pub fn initial_strategy(&self) -> TrackingStrategy {
        self.strategy_chain()
            .first()
            .copied()
            .unwrap_or(TrackingStrategy::NearestNeighbor)
    }
}

/// Process and measurement noise for one axis of the kinematic tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanParameters {
    pub process_noise: f32,
    pub measurement_noise: f32,
    /// Variance of the unknown initial velocity, in (pixels/frame)^2
    pub initial_velocity_variance: f32,
}

impl Default for KalmanParameters {
    fn default() -> Self {
        KalmanParameters {
            process_noise: 1.0,
            measurement_noise: 0.5,
            initial_velocity_variance: 100.0,
        }
    }
}

/// Parses the "process_noise,measurement_noise" form
///
/// ```
/// use visual_events::mot::KalmanParameters;
/// let p: KalmanParameters = "0.1,10.0".parse().unwrap();
/// assert_eq!(p.process_noise, 0.1);
/// assert_eq!(p.measurement_noise, 10.0);
/// ```
impl FromStr for KalmanParameters {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|_| ConfigError::KalmanParameters(s.to_string()))?;
        match values.as_slice() {
            [process_noise, measurement_noise] => Ok(KalmanParameters {
                process_noise: *process_noise,
                measurement_noise: *measurement_noise,
                ..KalmanParameters::default()
            }),
            _ => Err(ConfigError::KalmanParameters(s.to_string())),
        }
    }
}

/// Parameters of the learned appearance model and of its forget-ratio policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppearanceParameters {
    pub num_ferns: usize,
    pub num_tests: usize,
    pub patch_size: i32,
    /// Width/height of the square offset vote map, in cells
    pub vote_map_size: i32,
    /// Pixels per vote map cell
    pub vote_map_step: i32,
    pub confidence_floor: f32,
    pub back_project_radius: f32,
    pub scale_increase: f32,
    pub seed: u64,
    pub default_forget_constant: f32,
    pub small_object_forget_constant: f32,
    pub small_object_ratio: f32,
    pub border_margin: i32,
    pub border_decay: f32,
    pub forget_floor: f32,
}

impl Default for AppearanceParameters {
    fn default() -> Self {
        AppearanceParameters {
            num_ferns: 20,
            num_tests: 8,
            patch_size: 12,
            vote_map_size: 100,
            vote_map_step: 2,
            confidence_floor: 3.0,
            back_project_radius: 4.0,
            scale_increase: 1.25,
            seed: 0x5eed,
            default_forget_constant: 0.9,
            small_object_forget_constant: 0.5,
            small_object_ratio: 0.25,
            border_margin: 20,
            border_decay: 0.8,
            forget_floor: 0.1,
        }
    }
}

/// Detection and tracking parameters. Built once and shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParameters {
    pub tracking_mode: TrackingMode,
    // Slack (pixels) a prediction may fall outside the image before the event closes
    pub max_dist: i32,
    pub max_cost: f32,
    pub min_event_frames: usize,
    // 0 disables the cap
    pub max_event_frames: u32,
    pub event_expiration_frames: u32,
    pub min_event_area: u32,
    pub max_event_area: u32,
    pub x_kalman: KalmanParameters,
    pub y_kalman: KalmanParameters,
    pub area_shrink_factor: f32,
    pub area_growth_factor: f32,
    pub kalman_area_growth_factor: f32,
    pub clamp_first_extension: bool,
    pub use_foa_mask_region: bool,
    pub min_intensity_ratio: f32,
    pub max_bbox_change: f32,
    pub nn_segment_scale: f32,
    pub kalman_segment_scale: f32,
    pub min_saliency_for_fallback: f64,
    pub appearance: AppearanceParameters,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        DetectionParameters {
            tracking_mode: TrackingMode::KalmanFilter,
            max_dist: 40,
            max_cost: 10.0,
            min_event_frames: 3,
            max_event_frames: 0,
            event_expiration_frames: 2,
            min_event_area: 20,
            max_event_area: 30_000,
            x_kalman: KalmanParameters::default(),
            y_kalman: KalmanParameters::default(),
            area_shrink_factor: 0.25,
            area_growth_factor: 4.0,
            kalman_area_growth_factor: 2.0,
            clamp_first_extension: true,
            use_foa_mask_region: false,
            min_intensity_ratio: 0.5,
            max_bbox_change: 0.5,
            nn_segment_scale: 3.0,
            kalman_segment_scale: 5.0,
            min_saliency_for_fallback: 0.002,
            appearance: AppearanceParameters::default(),
        }
    }
}

impl DetectionParameters {
    /// Reads parameters from a JSON document. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let params: DetectionParameters = serde_json::from_str(s)?;
        params.validate()?;
        Ok(params)
    }
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, reason: &str| {
            Err(ConfigError::Invalid {
                name,
                reason: reason.to_string(),
            })
        };
        if self.max_cost <= 0.0 {
            return invalid("max_cost", "must be positive");
        }
        if self.max_dist < 0 {
            return invalid("max_dist", "must not be negative");
        }
        if self.min_event_area > self.max_event_area {
            return invalid("min_event_area", "larger than max_event_area");
        }
        if !(0.0..=1.0).contains(&self.area_shrink_factor) {
            return invalid("area_shrink_factor", "must be within [0, 1]");
        }
        if self.area_growth_factor < 1.0 || self.kalman_area_growth_factor < 1.0 {
            return invalid("area_growth_factor", "must be at least 1");
        }
        for (name, k) in [("x_kalman", &self.x_kalman), ("y_kalman", &self.y_kalman)] {
            if k.process_noise < 0.0 || k.measurement_noise <= 0.0 {
                return invalid(name, "noise must be positive");
            }
        }
        let a = &self.appearance;
        if a.num_ferns == 0 || a.num_tests == 0 || a.num_tests > 31 {
            return invalid("appearance", "need at least one fern and 1..=31 tests");
        }
        if a.vote_map_size <= 0 || a.vote_map_step <= 0 || a.patch_size <= 0 {
            return invalid("appearance", "vote map and patch sizes must be positive");
        }
        if !(0.0..=1.0).contains(&a.default_forget_constant) {
            return invalid("appearance", "forget constant must be within [0, 1]");
        }
        Ok(())
    }
}

impl fmt::Display for DetectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Tracking mode: {:?}\n\tMaximum distance: {}\n\tMaximum cost: {}\n\tMinimum event frames: {}\n\tExpiration frames: {}",
            self.tracking_mode,
            self.max_dist,
            self.max_cost,
            self.min_event_frames,
            self.event_expiration_frames
        )
    }
}
