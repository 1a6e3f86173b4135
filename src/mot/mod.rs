//! Export contents of `mot` folder
pub mod mot_errors;
mod config;
mod region;
mod token;
mod kalman;
mod visual_event;
mod candidate_queue;
mod frame;
mod collaborators;
mod strategy;
mod region_match;
mod nearest_neighbor;
mod kalman_tracker;
mod ferns;
mod appearance;
mod event_set;
mod properties;
mod checkpoint;

#[cfg(test)]
mod test_data;

pub use self::{
    mot_errors::*,
    config::*,
    region::*,
    token::*,
    kalman::*,
    visual_event::*,
    candidate_queue::*,
    frame::*,
    collaborators::*,
    strategy::*,
    ferns::*,
    event_set::*,
    properties::*,
    checkpoint::*,
};
pub use self::appearance::{apply_forget_policy, default_appearance_factory, AppearanceFactory, AppearanceModel};
pub use self::nearest_neighbor::{bbox_change_ok, corner_centroid_cost};
