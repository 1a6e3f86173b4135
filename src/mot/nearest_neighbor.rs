use tracing::{debug, info};

use crate::mot::region_match::{area_bounds, is_first_extension, is_out_of_bounds, search_windows};
use crate::mot::{AssociationOutcome, CandidateQueue, ExtractionRequest, TrackingContext, VisualEvent};
use crate::utils::{Point, Rect};

// Candidates may not fill more than this share of the segment window
const SEGMENT_FILL_LIMIT: f32 = 0.9;

/// Centroid distance plus the distances between the top-left and the
/// bottom-right corners of the two boxes
pub fn corner_centroid_cost(p1: Point, r1: &Rect, p2: Point, r2: &Rect) -> f32 {
    let distance = |ax: i32, ay: i32, bx: i32, by: i32| -> f32 {
        let dx = (ax - bx) as f64;
        let dy = (ay - by) as f64;
        (dx * dx + dy * dy).sqrt() as f32
    };
    let centroid = distance(p1.x, p1.y, p2.x, p2.y);
    let top_left = distance(r1.top(), r1.left(), r2.top(), r2.left());
    let bottom_right = distance(r1.bottom(), r1.right(), r2.bottom(), r2.right());
    centroid + top_left + bottom_right
}

/// Relative width and height change both stay below `max_change`
pub fn bbox_change_ok(last: &Rect, candidate: &Rect, max_change: f32) -> bool {
    let w_diff = ((candidate.width - last.width) as f32 / last.width as f32).abs();
    let h_diff = ((candidate.height - last.height) as f32 / last.height as f32).abs();
    w_diff < max_change && h_diff < max_change
}

/// Looks for the region closest in position and shape to the last one,
/// searching around the last centroid.
pub fn associate(event: &mut VisualEvent, ctx: &TrackingContext) -> AssociationOutcome {
    let params = event.get_params();
    let bounds = ctx.frame.bounds();
    let pred = event.predicted_location();
    if is_out_of_bounds(pred, bounds, params.max_dist) {
        info!("Event {} out of bounds - closing", event.get_id());
        return AssociationOutcome::OutOfBounds;
    }
    let last = &event.get_last_token().region;
    let occluders = ctx.occluders_of(event);
    let occlusion = !occluders.is_empty();
    if occlusion {
        debug!(
            "Event {} - nearest neighbor intersects {} other event(s)",
            event.get_id(),
            occluders.len()
        );
    }
    let center = last.centroid();
    let last_bbox = last.bounding_box();
    let (search, segment) = match search_windows(center, last_bbox, params.nn_segment_scale, bounds) {
        Some(windows) => windows,
        None => {
            info!("Invalid search region - closing event {}", event.get_id());
            return AssociationOutcome::OutOfBounds;
        }
    };
    let (min_area, mut max_area) = area_bounds(event, params.area_growth_factor);
    if !is_first_extension(event, params) {
        max_area = u32::min(max_area, (SEGMENT_FILL_LIMIT * segment.area() as f32) as u32);
    }
    let request = ExtractionRequest {
        seed: center,
        search,
        segment,
        min_area,
        max_area,
        min_intensity: params.min_intensity_ratio * last.avg_intensity(),
        exclude: &occluders,
    };
    let candidates = ctx.extractor.extract(ctx.frame, &request);
    debug!(
        "Event {} region {:?}: {} candidate(s)",
        event.get_id(),
        search,
        candidates.len()
    );

    let mut queue = CandidateQueue::new();
    for (i, candidate) in candidates.iter().enumerate() {
        if candidates.len() > 1 && ctx.intersects_other(event.get_id(), candidate) {
            continue;
        }
        let bbox = candidate.bounding_box();
        if !bbox_change_ok(&last_bbox, &bbox, params.max_bbox_change) {
            continue;
        }
        queue.push(i, corner_centroid_cost(center, &last_bbox, candidate.centroid(), &bbox));
    }

    match queue.best() {
        // Occlusion shifts the centroid, so the cost gate does not apply
        Some(best) if best.cost <= params.max_cost || occlusion => {
            AssociationOutcome::Found(ctx.build_token(candidates[best.index].clone()))
        }
        Some(best) => {
            debug!(
                "Event {} - no token found, cost {} max cost {}",
                event.get_id(),
                best.cost,
                params.max_cost
            );
            AssociationOutcome::NotFound
        }
        None => AssociationOutcome::NotFound,
    }
}
