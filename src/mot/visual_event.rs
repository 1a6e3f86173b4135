use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::mot::mot_errors::{AppearanceError, TrackerError};
use crate::mot::{AppearanceModel, DetectionParameters, Kalman1D, Region, Token, TrackingStrategy};
use crate::utils::{euclidean_distance, Line, Point, Vector2D};

/// Lifecycle of an event. Transitions only ever move forward:
/// Open -> Closed -> WriteFini -> Delete (Closed may skip straight to Delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventState {
    Open,
    Closed,
    WriteFini,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Interesting,
    Boring,
}

/// A single track: the tokens observed for one object plus the state
/// needed to extend it in the next frame.
pub struct VisualEvent {
    id: u32,
    tokens: Vec<Token>,
    start_frame: u32,
    end_frame: u32,
    // Last frame with a real (non-placeholder) association
    valid_end_frame: u32,
    state: EventState,
    tracker: TrackingStrategy,
    tracker_changed: bool,
    max_size: u32,
    min_size: u32,
    max_size_frame: u32,
    x_tracker: Kalman1D,
    y_tracker: Kalman1D,
    appearance: Option<Box<dyn AppearanceModel>>,
    forget_constant: f32,
    params: Arc<DetectionParameters>,
}

impl fmt::Debug for VisualEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VisualEvent")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("tracker", &self.tracker)
            .field("start_frame", &self.start_frame)
            .field("end_frame", &self.end_frame)
            .field("valid_end_frame", &self.valid_end_frame)
            .field("tokens", &self.tokens.len())
            .field("has_appearance_model", &self.appearance.is_some())
            .finish()
    }
}

impl VisualEvent {
    /// Starts a new event from its seed token
    pub fn new(id: u32, token: Token, params: Arc<DetectionParameters>) -> Self {
        let area = token.region.area();
        let frame = token.frame_number;
        let x_tracker = Kalman1D::new(token.location.x, &params.x_kalman);
        let y_tracker = Kalman1D::new(token.location.y, &params.y_kalman);
        debug!(
            "Event {} created at ({}, {}) area {} frame {}",
            id, token.location.x, token.location.y, area, frame
        );
        VisualEvent {
            id,
            tokens: vec![token],
            start_frame: frame,
            end_frame: frame,
            valid_end_frame: frame,
            state: EventState::Open,
            tracker: params.tracking_mode.initial_strategy(),
            tracker_changed: true,
            max_size: area,
            min_size: area,
            max_size_frame: frame,
            x_tracker,
            y_tracker,
            appearance: None,
            forget_constant: params.appearance.default_forget_constant,
            params,
        }
    }
    pub fn get_id(&self) -> u32 {
        self.id
    }
    pub fn get_tokens(&self) -> &[Token] {
        &self.tokens
    }
    pub fn get_number_of_tokens(&self) -> usize {
        self.tokens.len()
    }
    pub fn get_last_token(&self) -> &Token {
        // Never empty: an event is born with its seed token
        &self.tokens[self.tokens.len() - 1]
    }
    pub fn get_start_frame(&self) -> u32 {
        self.start_frame
    }
    pub fn get_end_frame(&self) -> u32 {
        self.end_frame
    }
    pub fn get_valid_end_frame(&self) -> u32 {
        self.valid_end_frame
    }
    pub fn get_state(&self) -> EventState {
        self.state
    }
    pub fn is_open(&self) -> bool {
        self.state == EventState::Open
    }
    pub fn is_closed(&self) -> bool {
        self.state == EventState::Closed
    }
    pub fn get_tracker(&self) -> TrackingStrategy {
        self.tracker
    }
    /// Switches the active strategy, remembering whether it actually changed
    pub fn set_tracker(&mut self, tracker: TrackingStrategy) {
        self.tracker_changed = self.tracker != tracker;
        if self.tracker_changed {
            debug!("Event {} tracker {:?} -> {:?}", self.id, self.tracker, tracker);
        }
        self.tracker = tracker;
    }
    pub fn tracker_changed(&self) -> bool {
        self.tracker_changed
    }
    pub fn get_max_size(&self) -> u32 {
        self.max_size
    }
    pub fn get_min_size(&self) -> u32 {
        self.min_size
    }
    pub fn get_max_size_frame(&self) -> u32 {
        self.max_size_frame
    }
    pub fn get_params(&self) -> &DetectionParameters {
        &self.params
    }
    pub fn get_forget_constant(&self) -> f32 {
        self.forget_constant
    }
    pub fn set_forget_constant(&mut self, forget_constant: f32) {
        self.forget_constant = forget_constant.clamp(0.0, 1.0);
    }
    pub fn has_appearance_model(&self) -> bool {
        self.appearance.is_some()
    }
    pub fn set_appearance_model(&mut self, model: Box<dyn AppearanceModel>) {
        self.appearance = Some(model);
    }
    pub fn appearance_model_mut(&mut self) -> Option<&mut (dyn AppearanceModel + 'static)> {
        self.appearance.as_deref_mut()
    }
    /// Re-seeds the appearance model on `seed` and restores the default forget constant
    pub fn reset_appearance(&mut self, image: &RgbImage, seed: &Region) -> Result<(), AppearanceError> {
        self.forget_constant = self.params.appearance.default_forget_constant;
        let model = self.appearance.as_deref_mut().ok_or(AppearanceError::NotInitialized)?;
        info!(
            "Resetting appearance model for event {} on {:?}",
            self.id,
            seed.bounding_box()
        );
        model.reset(image, seed, self.forget_constant)
    }
    /// Drops the appearance model. It is rebuilt on next use.
    pub fn free_appearance_model(&mut self) {
        self.appearance = None;
    }
    /// A token may only extend an open event, and only in a later frame.
    /// Closed events (and anything past closed) accept nothing.
    pub fn is_token_ok(&self, frame_number: u32) -> bool {
        frame_number > self.end_frame && self.state == EventState::Open
    }
    /// Kinematic cost of `token` against the predicted location.
    /// `None` when the token is not eligible for this event.
    pub fn get_cost(&self, token: &Token) -> Option<f32> {
        if !self.is_token_ok(token.frame_number) {
            return None;
        }
        let cost = self.x_tracker.cost(token.location.x) + self.y_tracker.cost(token.location.y);
        debug!(
            "Event {} location ({}, {}) predicted ({}, {}) cost {} max cost {}",
            self.id,
            token.location.x,
            token.location.y,
            self.x_tracker.estimate(),
            self.y_tracker.estimate(),
            cost,
            self.params.max_cost
        );
        Some(cost)
    }
    /// Predicted centroid for the next frame, rounded to a pixel
    pub fn predicted_location(&self) -> Point {
        self.predicted_xy().to_point()
    }
    fn predicted_xy(&self) -> Vector2D {
        Vector2D::new(self.x_tracker.estimate(), self.y_tracker.estimate())
    }
    fn check_token(&self, token: &Token) -> Result<(), TrackerError> {
        if self.is_token_ok(token.frame_number) {
            return Ok(());
        }
        Err(TrackerError::TokenNotEligible {
            event: self.id,
            frame: token.frame_number,
            end_frame: self.end_frame,
            state: self.state,
        })
    }
    fn push_token(&mut self, mut token: Token) {
        // Saliency is not recomputed for tracked regions, the seed value is carried along
        let smv = self.get_last_token().region.smv();
        token.region.set_smv(smv);
        let area = token.region.area();
        if area > self.max_size {
            self.max_size = area;
            self.max_size_frame = token.frame_number;
        }
        if area < self.min_size {
            self.min_size = area;
        }
        self.end_frame = token.frame_number;
        self.tokens.push(token);
    }
    /// Appends a token carrying a real measurement.
    /// The stored location is the filtered one, not the raw centroid.
    pub fn assign(
        &mut self,
        mut token: Token,
        foe: Option<Vector2D>,
        valid_end_frame: u32,
    ) -> Result<(), TrackerError> {
        self.check_token(&token)?;
        token.prediction = Some(self.predicted_xy());
        token.location = Vector2D::new(
            self.x_tracker.update(token.location.x),
            self.y_tracker.update(token.location.y),
        );
        token.foe = foe;
        let direction = self.tokens[0].location - token.location;
        token.line = Some(Line::new(token.location, direction));
        token.angle = match foe {
            Some(foe) => direction.angle(&(token.location - foe)),
            None => 0.0,
        };
        token.placeholder = false;
        self.push_token(token);
        self.valid_end_frame = valid_end_frame;
        Ok(())
    }
    /// Appends a placeholder for a frame without a detection. The location
    /// coasts on the prediction and the valid end frame is left alone.
    pub fn assign_noprediction(
        &mut self,
        mut token: Token,
        foe: Option<Vector2D>,
    ) -> Result<(), TrackerError> {
        self.check_token(&token)?;
        let prediction = self.predicted_xy();
        token.prediction = Some(prediction);
        token.location = Vector2D::new(self.x_tracker.predict_only(), self.y_tracker.predict_only());
        token.foe = foe;
        token.placeholder = true;
        debug!(
            "Event {} placeholder at frame {} ({}, {}), valid end frame {}",
            self.id, token.frame_number, prediction.x, prediction.y, self.valid_end_frame
        );
        self.push_token(token);
        Ok(())
    }
    /// Open -> Closed. Closing an event that is already past Open does nothing.
    pub fn close(&mut self) {
        if self.state == EventState::Open {
            debug!("Event {} closed at frame {}", self.id, self.end_frame);
            self.state = EventState::Closed;
        }
    }
    /// Closed -> WriteFini, once persistence has written the tokens
    pub fn flag_write_complete(&mut self) -> Result<(), TrackerError> {
        match self.state {
            EventState::Closed | EventState::WriteFini => {
                self.state = EventState::WriteFini;
                Ok(())
            }
            from => Err(TrackerError::InvalidTransition {
                event: self.id,
                from,
                to: EventState::WriteFini,
            }),
        }
    }
    /// Closed/WriteFini -> Delete. The event is dropped by the next clean-up.
    pub fn flag_for_delete(&mut self) -> Result<(), TrackerError> {
        match self.state {
            EventState::Closed | EventState::WriteFini | EventState::Delete => {
                self.state = EventState::Delete;
                Ok(())
            }
            from => Err(TrackerError::InvalidTransition {
                event: self.id,
                from,
                to: EventState::Delete,
            }),
        }
    }
    pub fn get_category(&self) -> Category {
        if self.tokens.len() >= self.params.min_event_frames {
            Category::Interesting
        } else {
            Category::Boring
        }
    }
    pub fn frame_in_range(&self, frame_number: u32) -> bool {
        frame_number >= self.start_frame && frame_number <= self.end_frame
    }
    pub fn get_token_for_frame(&self, frame_number: u32) -> Option<&Token> {
        self.tokens
            .binary_search_by_key(&frame_number, |t| t.frame_number)
            .ok()
            .map(|idx| &self.tokens[idx])
    }
    /// Does the event's region in `frame_number` share pixels with `region`?
    pub fn does_intersect(&self, region: &Region, frame_number: u32) -> bool {
        if !self.frame_in_range(frame_number) {
            return false;
        }
        self.get_token_for_frame(frame_number)
            .map(|t| t.region.intersects(region))
            .unwrap_or(false)
    }
    /// Replaces the region stored for `frame_number`
    pub fn reset_region(&mut self, frame_number: u32, region: Region) -> bool {
        let idx = match self
            .tokens
            .binary_search_by_key(&frame_number, |t| t.frame_number)
        {
            Ok(idx) => idx,
            Err(_) => return false,
        };
        let area = region.area();
        self.tokens[idx].region = region;
        if area > self.max_size {
            self.max_size = area;
            self.max_size_frame = frame_number;
        }
        if area < self.min_size {
            self.min_size = area;
        }
        true
    }
    /// Average change of centroid speed over the last three frames
    pub fn get_acceleration(&self) -> f32 {
        const NUM_SAMPLES: u32 = 3;
        if self.tokens.len() <= 2 {
            return 0.0;
        }
        let mut last_speed: Option<f32> = None;
        let mut sum = 0.0;
        for frame in (self.end_frame + 1 - NUM_SAMPLES)..self.end_frame {
            let (t1, t2) = match (
                self.get_token_for_frame(frame),
                self.get_token_for_frame(frame + 1),
            ) {
                (Some(t1), Some(t2)) => (t1, t2),
                _ => continue,
            };
            if !t1.region.is_valid() || !t2.region.is_valid() {
                continue;
            }
            let speed = euclidean_distance(&t1.region.centroid(), &t2.region.centroid());
            if let Some(last) = last_speed {
                sum += speed - last;
            }
            last_speed = Some(speed);
        }
        sum / NUM_SAMPLES as f32
    }
    /// Largest width and height seen over all tokens
    pub fn get_max_object_dims(&self) -> (i32, i32) {
        self.tokens.iter().fold((-1, -1), |(w, h), t| {
            let (tw, th) = t.region.dims();
            (i32::max(w, tw), i32::max(h, th))
        })
    }
    pub fn get_max_size_token(&self) -> &Token {
        self.get_token_for_frame(self.max_size_frame)
            .unwrap_or_else(|| self.get_last_token())
    }
    /// Filtered locations of every token, in frame order
    pub fn get_positions(&self) -> Vec<(u32, Vector2D)> {
        self.tokens
            .iter()
            .map(|t| (t.frame_number, t.location))
            .collect()
    }
    pub fn get_unwritten_tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| !t.is_written())
    }
    /// Flags every token as persisted. Returns how many were newly flagged.
    pub fn mark_written(&mut self) -> usize {
        self.tokens
            .iter_mut()
            .map(|t| t.mark_written())
            .filter(|newly| *newly)
            .count()
    }
}

/// Everything needed to rebuild an event, minus the appearance model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub id: u32,
    pub state: EventState,
    pub tracker: TrackingStrategy,
    pub start_frame: u32,
    pub end_frame: u32,
    pub valid_end_frame: u32,
    pub max_size: u32,
    pub min_size: u32,
    pub max_size_frame: u32,
    pub forget_constant: f32,
    pub x_tracker: Kalman1D,
    pub y_tracker: Kalman1D,
    /// Tokens not yet persisted. The last token is always kept so the event
    /// can be extended after a reload.
    pub tokens: Vec<Token>,
}

impl VisualEvent {
    pub fn snapshot(&self) -> EventSnapshot {
        let last = self.tokens.len() - 1;
        let tokens = self
            .tokens
            .iter()
            .enumerate()
            .filter(|(idx, t)| !t.is_written() || *idx == last)
            .map(|(_, t)| t.clone())
            .collect();
        EventSnapshot {
            id: self.id,
            state: self.state,
            tracker: self.tracker,
            start_frame: self.start_frame,
            end_frame: self.end_frame,
            valid_end_frame: self.valid_end_frame,
            max_size: self.max_size,
            min_size: self.min_size,
            max_size_frame: self.max_size_frame,
            forget_constant: self.forget_constant,
            x_tracker: self.x_tracker.clone(),
            y_tracker: self.y_tracker.clone(),
            tokens,
        }
    }
    /// Rebuilds an event from a snapshot. `None` if the snapshot has no tokens.
    pub fn from_snapshot(snapshot: EventSnapshot, params: Arc<DetectionParameters>) -> Option<Self> {
        if snapshot.tokens.is_empty() {
            return None;
        }
        Some(VisualEvent {
            id: snapshot.id,
            tokens: snapshot.tokens,
            start_frame: snapshot.start_frame,
            end_frame: snapshot.end_frame,
            valid_end_frame: snapshot.valid_end_frame,
            state: snapshot.state,
            tracker: snapshot.tracker,
            // Forces an appearance reset if the event falls back again
            tracker_changed: true,
            max_size: snapshot.max_size,
            min_size: snapshot.min_size,
            max_size_frame: snapshot.max_size_frame,
            x_tracker: snapshot.x_tracker,
            y_tracker: snapshot.y_tracker,
            appearance: None,
            forget_constant: snapshot.forget_constant,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Rect;

    fn params() -> Arc<DetectionParameters> {
        Arc::new(DetectionParameters::default())
    }

    fn token_at(x: i32, y: i32, frame: u32) -> Token {
        Token::new(Region::from_rect(Rect::new(x, y, 10, 10)), frame)
    }

    #[test]
    fn test_eligibility_gate() {
        let mut event = VisualEvent::new(1, token_at(10, 10, 5), params());
        assert!(!event.is_token_ok(4));
        assert!(!event.is_token_ok(5));
        assert!(event.is_token_ok(6));
        assert!(event.get_cost(&token_at(10, 10, 5)).is_none());
        assert!(event.get_cost(&token_at(10, 10, 6)).unwrap() >= 0.0);
        event.close();
        assert!(!event.is_token_ok(6));
        assert!(event.get_cost(&token_at(10, 10, 6)).is_none());
        assert!(matches!(
            event.assign(token_at(10, 10, 6), None, 6),
            Err(TrackerError::TokenNotEligible { event: 1, frame: 6, .. })
        ));
    }

    #[test]
    fn test_assign_filters_location_and_tracks_sizes() {
        let mut event = VisualEvent::new(1, token_at(0, 0, 0), params());
        let big = Token::new(Region::from_rect(Rect::new(10, 0, 20, 10)), 1);
        event.assign(big, Some(Vector2D::new(0.0, 0.0)), 1).unwrap();
        let last = event.get_last_token();
        assert_eq!(last.prediction, Some(Vector2D::new(4.5, 4.5)));
        // Filtered location sits between the prediction and the raw centroid
        assert!(last.location.x > 4.5 && last.location.x <= 19.5);
        assert!(last.line.is_some());
        assert_eq!(event.get_max_size(), 200);
        assert_eq!(event.get_max_size_frame(), 1);
        assert_eq!(event.get_min_size(), 100);
        assert_eq!(event.get_end_frame(), 1);
        assert_eq!(event.get_valid_end_frame(), 1);
        assert_eq!(event.get_max_object_dims(), (20, 10));
        assert_eq!(event.get_max_size_token().frame_number, 1);
    }

    #[test]
    fn test_saliency_carried_from_seed() {
        let mut region = Region::from_rect(Rect::new(0, 0, 10, 10));
        region.set_smv(0.5);
        let mut event = VisualEvent::new(1, Token::new(region, 0), params());
        event.assign(token_at(2, 0, 1), None, 1).unwrap();
        assert_eq!(event.get_last_token().region.smv(), 0.5);
    }

    #[test]
    fn test_placeholder_keeps_valid_end_frame() {
        let mut event = VisualEvent::new(1, token_at(0, 0, 0), params());
        event.assign(token_at(5, 0, 1), None, 1).unwrap();
        let mut placeholder = event.get_last_token().clone();
        placeholder.frame_number = 2;
        event.assign_noprediction(placeholder, None).unwrap();
        assert_eq!(event.get_end_frame(), 2);
        assert_eq!(event.get_valid_end_frame(), 1);
        assert!(event.get_last_token().placeholder);
        assert_eq!(event.get_number_of_tokens(), 3);
    }

    #[test]
    fn test_state_transitions_only_move_forward() {
        let mut event = VisualEvent::new(1, token_at(0, 0, 0), params());
        assert!(event.flag_write_complete().is_err());
        assert!(event.flag_for_delete().is_err());
        assert_eq!(event.get_state(), EventState::Open);
        event.close();
        assert_eq!(event.get_state(), EventState::Closed);
        event.flag_write_complete().unwrap();
        event.close();
        assert_eq!(event.get_state(), EventState::WriteFini);
        event.flag_for_delete().unwrap();
        assert!(event.flag_write_complete().is_err());
        assert_eq!(event.get_state(), EventState::Delete);
    }

    #[test]
    fn test_category_boundary() {
        let p = params();
        let mut event = VisualEvent::new(1, token_at(0, 0, 0), p.clone());
        for frame in 1..(p.min_event_frames as u32 - 1) {
            event.assign(token_at(frame as i32, 0, frame), None, frame).unwrap();
        }
        assert_eq!(event.get_number_of_tokens(), p.min_event_frames - 1);
        assert_eq!(event.get_category(), Category::Boring);
        let next = p.min_event_frames as u32 - 1;
        event.assign(token_at(next as i32, 0, next), None, next).unwrap();
        assert_eq!(event.get_number_of_tokens(), p.min_event_frames);
        assert_eq!(event.get_category(), Category::Interesting);
    }

    #[test]
    fn test_token_lookup_and_intersection() {
        let mut event = VisualEvent::new(1, token_at(0, 0, 3), params());
        event.assign(token_at(4, 0, 4), None, 4).unwrap();
        assert!(event.frame_in_range(4));
        assert!(!event.frame_in_range(5));
        assert_eq!(event.get_token_for_frame(4).unwrap().frame_number, 4);
        assert!(event.get_token_for_frame(2).is_none());
        let nearby = Region::from_rect(Rect::new(12, 0, 5, 5));
        assert!(event.does_intersect(&nearby, 4));
        assert!(!event.does_intersect(&nearby, 3));
        assert!(!event.does_intersect(&nearby, 7));
    }

    #[test]
    fn test_acceleration_of_speeding_object() {
        let mut event = VisualEvent::new(1, token_at(0, 0, 0), params());
        for (frame, x) in [(1u32, 2), (2, 6), (3, 12)] {
            event.assign(token_at(x, 0, frame), None, frame).unwrap();
        }
        // speeds 4 then 6 over the last three frames
        assert!((event.get_acceleration() - 2.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_mark_written_and_snapshot() {
        let mut event = VisualEvent::new(7, token_at(0, 0, 0), params());
        event.assign(token_at(3, 0, 1), None, 1).unwrap();
        assert_eq!(event.mark_written(), 2);
        assert_eq!(event.mark_written(), 0);
        event.assign(token_at(6, 0, 2), None, 2).unwrap();
        let snapshot = event.snapshot();
        assert_eq!(
            snapshot.tokens.iter().map(|t| t.frame_number).collect::<Vec<_>>(),
            vec![2]
        );
        let restored = VisualEvent::from_snapshot(snapshot, params()).unwrap();
        assert_eq!(restored.get_id(), 7);
        assert_eq!(restored.get_end_frame(), 2);
        assert_eq!(restored.predicted_location(), event.predicted_location());
    }
}
