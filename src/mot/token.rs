use serde::{Deserialize, Serialize};

use crate::mot::Region;
use crate::utils::{Line, Vector2D};

/// Label and probability a classifier attached to a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassLabel {
    pub name: String,
    pub probability: f32,
}

/// Named numeric feature vectors. The tracker never reads them back.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureBundle {
    pub vectors: Vec<(String, Vec<f32>)>,
}

impl FeatureBundle {
    pub fn push(&mut self, name: &str, values: Vec<f32>) {
        self.vectors.push((name.to_string(), values));
    }
    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.vectors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// One frame's observation of an event.
///
/// Tokens are built by the strategies and handed to the event, which fills in
/// the kinematic fields (`location`, `prediction`, `line`, `angle`) on assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub region: Region,
    pub frame_number: u32,
    /// Filtered location, set by the event on assignment
    pub location: Vector2D,
    pub prediction: Option<Vector2D>,
    pub line: Option<Line>,
    /// Angle of the trajectory relative to the focus of expansion, degrees
    pub angle: f32,
    pub foe: Option<Vector2D>,
    pub class_label: Option<ClassLabel>,
    pub features: FeatureBundle,
    /// True for tokens appended when nothing was found in the frame
    pub placeholder: bool,
    written: bool,
}

impl Token {
    pub fn new(region: Region, frame_number: u32) -> Self {
        let location = region.centroid_xy();
        Token {
            region,
            frame_number,
            location,
            prediction: None,
            line: None,
            angle: 0.0,
            foe: None,
            class_label: None,
            features: FeatureBundle::default(),
            placeholder: false,
            written: false,
        }
    }
    /// Token carrying no new measurement
    pub fn placeholder(region: Region, frame_number: u32) -> Self {
        Token {
            placeholder: true,
            ..Token::new(region, frame_number)
        }
    }
    pub fn with_features(mut self, features: FeatureBundle) -> Self {
        self.features = features;
        self
    }
    pub fn set_class(&mut self, name: &str, probability: f32) {
        self.class_label = Some(ClassLabel {
            name: name.to_string(),
            probability,
        });
    }
    /// Marks the token as persisted. Returns false if it already was.
    pub fn mark_written(&mut self) -> bool {
        if self.written {
            return false;
        }
        self.written = true;
        true
    }
    pub fn is_written(&self) -> bool {
        self.written
    }
}
