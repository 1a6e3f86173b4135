use image::RgbImage;
use std::fmt;
use tracing::{debug, info};

use crate::mot::mot_errors::AppearanceError;
use crate::mot::region_match::{area_bounds, is_out_of_bounds};
use crate::mot::{
    AppearanceParameters, AssociationOutcome, FernVoteModel, Region, Token, TrackingContext,
    VisualEvent,
};
use crate::utils::Rect;

/// Learned, per-event model of what the tracked object looks like.
///
/// `reset` is expensive and only called when an event switches to appearance
/// tracking (or is created in appearance mode). `update` relocates the object
/// inside `search` and returns its refined mask in frame coordinates.
pub trait AppearanceModel: fmt::Debug + Send {
    fn reset(&mut self, image: &RgbImage, seed: &Region, decay: f32) -> Result<(), AppearanceError>;
    fn update(
        &mut self,
        image: &RgbImage,
        search: Rect,
        occluders: &[&Region],
        decay: f32,
    ) -> Result<Region, AppearanceError>;
    /// Scales every learned statistic by `decay`
    fn forget(&mut self, decay: f32);
}

/// Builds the appearance model for an event
pub type AppearanceFactory =
    Box<dyn Fn(&AppearanceParameters, u32) -> Box<dyn AppearanceModel> + Send>;

pub fn default_appearance_factory() -> AppearanceFactory {
    Box::new(|params, event_id| Box::new(FernVoteModel::new(params.clone(), event_id)))
}

/// Relocates the event with its appearance model around the predicted location.
/// Model faults never escape: they are logged and reported as `NotFound`.
pub fn associate(event: &mut VisualEvent, ctx: &TrackingContext) -> AssociationOutcome {
    let (max_dist, max_cost, growth) = {
        let params = event.get_params();
        (params.max_dist, params.max_cost, params.area_growth_factor)
    };
    let bounds = ctx.frame.bounds();
    let pred = event.predicted_location();
    if is_out_of_bounds(pred, bounds, max_dist) {
        info!("Event {} out of bounds - closing", event.get_id());
        return AssociationOutcome::OutOfBounds;
    }
    let occluders = ctx.occluders_of(event);
    let occlusion = !occluders.is_empty();
    if occlusion {
        debug!(
            "Event {} - appearance tracker intersects {} other event(s)",
            event.get_id(),
            occluders.len()
        );
    }
    let last_bbox = event.get_last_token().region.bounding_box();
    let search = Rect::center_dims(pred, last_bbox.width, last_bbox.height).overlap(&bounds);
    debug!("Search region {} {:?}", event.get_id(), search);
    if !search.is_valid() {
        info!("Event {} - appearance tracker invalid search region", event.get_id());
        return AssociationOutcome::OutOfBounds;
    }
    let (min_area, max_area) = area_bounds(event, growth);
    let decay = event.get_forget_constant();
    let id = event.get_id();

    let model = match event.appearance_model_mut() {
        Some(model) => model,
        None => {
            debug!("Event {} has no appearance model", id);
            return AssociationOutcome::NotFound;
        }
    };
    let found = match model.update(ctx.frame.image, search, &occluders, decay) {
        Ok(region) => region,
        Err(err) => {
            debug!("Event {} - appearance tracker failed: {}", id, err);
            return AssociationOutcome::NotFound;
        }
    };
    let mut region = match ctx.frame.mask {
        Some(_) => Region::from_pixels(
            found
                .pixels()
                .filter(|p| !ctx.frame.is_masked(*p))
                .collect::<Vec<_>>(),
        ),
        None => found,
    };
    if !region.is_valid() {
        debug!("Event {} - appearance tracker returned an empty region", id);
        return AssociationOutcome::NotFound;
    }
    region.set_intensity_from(ctx.frame.luminance());

    let area = region.area();
    if !occlusion && (area < min_area || area > max_area) {
        debug!(
            "Event {} - token area {} outside [{}, {}]",
            id, area, min_area, max_area
        );
        return AssociationOutcome::NotFound;
    }
    // Same kinematic gate as the other trackers to catch drift
    let cost = match event.get_cost(&Token::new(region.clone(), ctx.frame.frame_number)) {
        Some(cost) => cost,
        None => return AssociationOutcome::NotFound,
    };
    if !occlusion {
        if cost >= max_cost {
            debug!("Event {} - cost too high {} max cost {}", id, cost, max_cost);
            return AssociationOutcome::NotFound;
        }
        apply_forget_policy(event, &region, bounds);
    }
    AssociationOutcome::Found(ctx.build_token(region))
}

/// Lowers the event's forget constant when the model is likely to drift:
/// the object shrank well below its largest size, or it is close to the border.
pub fn apply_forget_policy(event: &mut VisualEvent, region: &Region, bounds: Rect) {
    let params = event.get_params().appearance.clone();
    let id = event.get_id();
    if event.get_number_of_tokens() > 1
        && (region.area() as f32) < params.small_object_ratio * event.get_max_size() as f32
    {
        info!(
            "Event {} growing small in appearance mode. Forget ratio {:.2} -> {:.2}",
            id,
            event.get_forget_constant(),
            params.small_object_forget_constant
        );
        event.set_forget_constant(params.small_object_forget_constant);
    }
    let bbox = region.bounding_box();
    let margin = params.border_margin;
    if bbox.bottom() >= bounds.height - margin
        || bbox.right() >= bounds.width - margin
        || bbox.top() <= margin
        || bbox.left() <= margin
    {
        let mut forget = params.border_decay * event.get_forget_constant();
        if forget < params.forget_floor {
            forget = 0.0;
        }
        info!(
            "Event {} near edge. Forget ratio {:.2} -> {:.2}",
            id,
            event.get_forget_constant(),
            forget
        );
        event.set_forget_constant(forget);
    }
}
