use tracing::{debug, info};

use crate::mot::region_match::{area_bounds, is_out_of_bounds, search_windows};
use crate::mot::{
    AssociationOutcome, CandidateQueue, ExtractionRequest, Token, TrackingContext, VisualEvent,
};
use crate::utils::Point;

/// Looks for the region whose centroid best agrees with the kinematic
/// prediction, searching around the predicted location.
pub fn associate(event: &mut VisualEvent, ctx: &TrackingContext) -> AssociationOutcome {
    let params = event.get_params();
    let bounds = ctx.frame.bounds();
    let pred = event.predicted_location();
    debug!("Event {} prediction: {:?}", event.get_id(), pred);
    if is_out_of_bounds(pred, bounds, params.max_dist) {
        info!("Event {} out of bounds - closing", event.get_id());
        return AssociationOutcome::OutOfBounds;
    }
    let occluders = ctx.occluders_of(event);
    let occlusion = !occluders.is_empty();
    if occlusion {
        debug!(
            "Event {} - kalman tracker intersects {} other event(s)",
            event.get_id(),
            occluders.len()
        );
    }
    let center = Point::new(i32::max(pred.x, 0), i32::max(pred.y, 0));
    let last_bbox = event.get_last_token().region.bounding_box();
    let (search, segment) =
        match search_windows(center, last_bbox, params.kalman_segment_scale, bounds) {
            Some(windows) => windows,
            None => {
                info!("Invalid search region - closing event {}", event.get_id());
                return AssociationOutcome::OutOfBounds;
            }
        };
    let (min_area, max_area) = area_bounds(event, params.kalman_area_growth_factor);
    let request = ExtractionRequest {
        seed: center,
        search,
        segment,
        min_area,
        max_area,
        min_intensity: 0.0,
        exclude: &occluders,
    };
    let candidates = ctx.extractor.extract(ctx.frame, &request);
    debug!(
        "Event {} predicted {:?} region {:?}: {} candidate(s)",
        event.get_id(),
        pred,
        search,
        candidates.len()
    );

    let mut queue = CandidateQueue::new();
    for (i, candidate) in candidates.iter().enumerate() {
        if candidates.len() > 1 && ctx.intersects_other(event.get_id(), candidate) {
            continue;
        }
        let candidate_token = Token::new(candidate.clone(), ctx.frame.frame_number);
        if let Some(cost) = event.get_cost(&candidate_token) {
            queue.push(i, cost);
        }
    }

    match queue.best() {
        // Occlusion shifts the centroid, so the cost gate does not apply
        Some(best) if best.cost <= params.max_cost || occlusion => {
            AssociationOutcome::Found(ctx.build_token(candidates[best.index].clone()))
        }
        Some(best) => {
            debug!(
                "Event {} - no token found, event cost {} max cost {}",
                event.get_id(),
                best.cost,
                params.max_cost
            );
            AssociationOutcome::NotFound
        }
        None => AssociationOutcome::NotFound,
    }
}
