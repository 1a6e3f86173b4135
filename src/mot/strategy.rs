use serde::{Deserialize, Serialize};

use crate::mot::{
    appearance, kalman_tracker, nearest_neighbor, Classifier, FeatureExtractor, FrameData, Region,
    RegionExtractor, Token, VisualEvent,
};

/// The three interchangeable ways of extending an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingStrategy {
    Kalman,
    NearestNeighbor,
    Appearance,
}

/// Result of one association attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AssociationOutcome {
    /// A region was found; the token still has to be assigned to the event
    Found(Token),
    /// Nothing acceptable this frame
    NotFound,
    /// The prediction or search window left the image; the event must close
    OutOfBounds,
}

/// Read-only view of the frame shared by every strategy call.
///
/// `others` is the region each open event committed before this frame's update
/// started, so every event sees the same occlusion context no matter the order
/// events are processed in.
pub struct TrackingContext<'a> {
    pub frame: &'a FrameData<'a>,
    pub others: &'a [(u32, Region)],
    pub extractor: &'a dyn RegionExtractor,
    pub features: &'a dyn FeatureExtractor,
    pub classifier: Option<&'a dyn Classifier>,
}

impl<'a> TrackingContext<'a> {
    /// Regions of other events overlapping the last region of `event`
    pub fn occluders_of(&self, event: &VisualEvent) -> Vec<&'a Region> {
        let last = &event.get_last_token().region;
        self.others
            .iter()
            .filter(|(id, region)| *id != event.get_id() && region.intersects(last))
            .map(|(_, region)| region)
            .collect()
    }
    /// Does `region` overlap any event other than `event_id`?
    pub fn intersects_other(&self, event_id: u32, region: &Region) -> bool {
        self.others
            .iter()
            .any(|(id, other)| *id != event_id && other.intersects(region))
    }
    /// Wraps a chosen region into a token for this frame, with features and class
    pub fn build_token(&self, region: Region) -> Token {
        let features = self.features.extract(region.bounding_box(), self.frame);
        let mut token = Token::new(region, self.frame.frame_number).with_features(features);
        if let Some(classifier) = self.classifier {
            if let Some((name, probability)) = classifier.classify(&token.features) {
                token.set_class(&name, probability);
            }
        }
        token
    }
}

impl TrackingStrategy {
    /// Tries to find this frame's region for `event`. Never mutates the event's
    /// track; only the appearance strategy updates its model.
    pub fn try_associate(&self, event: &mut VisualEvent, ctx: &TrackingContext) -> AssociationOutcome {
        match self {
            TrackingStrategy::Kalman => kalman_tracker::associate(event, ctx),
            TrackingStrategy::NearestNeighbor => nearest_neighbor::associate(event, ctx),
            TrackingStrategy::Appearance => appearance::associate(event, ctx),
        }
    }
}
