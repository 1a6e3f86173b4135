use tracing::debug;

use crate::mot::{DetectionParameters, VisualEvent};
use crate::utils::{Point, Rect};

/// Is the predicted location further than `slack` pixels outside the frame?
pub fn is_out_of_bounds(pred: Point, bounds: Rect, slack: i32) -> bool {
    pred.x < bounds.left() - slack
        || pred.x > bounds.right() + slack
        || pred.y < bounds.top() - slack
        || pred.y > bounds.bottom() + slack
}

/// Search window (last box size) and segment window (`segment_scale` times the
/// last box) around `center`, both clipped to the frame. `None` when either
/// ends up empty.
pub fn search_windows(
    center: Point,
    last_bbox: Rect,
    segment_scale: f32,
    bounds: Rect,
) -> Option<(Rect, Rect)> {
    let search = Rect::center_dims(center, last_bbox.width, last_bbox.height).overlap(&bounds);
    let segment = Rect::center_dims(
        center,
        (last_bbox.width as f32 * segment_scale) as i32,
        (last_bbox.height as f32 * segment_scale) as i32,
    )
    .overlap(&bounds);
    debug!("Search region {:?} segment region {:?}", search, segment);
    if !search.is_valid() || !segment.is_valid() {
        return None;
    }
    Some((search, segment))
}

/// First extension of an event: the seed detection tends to be oversized,
/// so the next region may only be smaller.
pub fn is_first_extension(event: &VisualEvent, params: &DetectionParameters) -> bool {
    params.clamp_first_extension
        && event.get_number_of_tokens() == 1
        && !params.use_foa_mask_region
}

/// Candidate area range relative to the last region of `event`
pub fn area_bounds(event: &VisualEvent, growth_factor: f32) -> (u32, u32) {
    let params = event.get_params();
    let last_area = event.get_last_token().region.area();
    if is_first_extension(event, params) {
        return (1, last_area);
    }
    let area = last_area as f32;
    let min_area = (params.area_shrink_factor * area).ceil() as u32;
    let max_area = (growth_factor * area).floor() as u32;
    (min_area, max_area)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::{Region, Token};
    use crate::utils::Rect;
    use std::sync::Arc;

    #[test]
    fn test_out_of_bounds_slack() {
        let bounds = Rect::from_dims(100, 50);
        assert!(!is_out_of_bounds(Point::new(-40, 10), bounds, 40));
        assert!(is_out_of_bounds(Point::new(-41, 10), bounds, 40));
        assert!(!is_out_of_bounds(Point::new(139, 89), bounds, 40));
        assert!(is_out_of_bounds(Point::new(140, 10), bounds, 40));
        assert!(is_out_of_bounds(Point::new(10, 90), bounds, 40));
    }

    #[test]
    fn test_search_windows_clip() {
        let bounds = Rect::from_dims(100, 100);
        let (search, segment) =
            search_windows(Point::new(5, 5), Rect::new(0, 0, 10, 10), 3.0, bounds).unwrap();
        assert_eq!(search, Rect::new(0, 0, 10, 10));
        assert_eq!(segment, Rect::new(0, 0, 20, 20));
        assert!(search_windows(Point::new(500, 5), Rect::new(0, 0, 10, 10), 3.0, bounds).is_none());
    }

    #[test]
    fn test_area_bounds_first_extension() {
        let params = Arc::new(DetectionParameters::default());
        let seed = Token::new(Region::from_rect(Rect::new(0, 0, 10, 10)), 0);
        let mut event = VisualEvent::new(1, seed, params.clone());
        assert_eq!(area_bounds(&event, 4.0), (1, 100));

        let next = Token::new(Region::from_rect(Rect::new(1, 0, 10, 10)), 1);
        event.assign(next, None, 1).unwrap();
        assert_eq!(area_bounds(&event, 4.0), (25, 400));
        assert_eq!(area_bounds(&event, 2.0), (25, 200));

        let foa = Arc::new(DetectionParameters {
            use_foa_mask_region: true,
            ..DetectionParameters::default()
        });
        let seed = Token::new(Region::from_rect(Rect::new(0, 0, 10, 10)), 0);
        let event = VisualEvent::new(2, seed, foa);
        assert_eq!(area_bounds(&event, 4.0), (25, 400));
    }
}
