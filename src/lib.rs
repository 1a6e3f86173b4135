//! Visual event tracking.
//!
//! Associates per-frame detections ("regions") into persistent event tracks.
//! Three interchangeable strategies extend a track each frame: a Kalman-filter
//! centroid tracker, a nearest-neighbor region matcher and a learned appearance
//! tracker used as a fallback for tracks that are worth the cost.
//!
//! Basic usage:
//!
//! ```
//! use std::sync::Arc;
//! use visual_events::mot::{DetectionParameters, VisualEventSet};
//!
//! let params = Arc::new(DetectionParameters::default());
//! let mut events = VisualEventSet::new(params);
//! assert_eq!(events.num_events(), 0);
//! events.close_all();
//! events.clean_up(0);
//! ```
pub mod mot;
pub mod utils;
