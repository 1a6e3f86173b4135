use image::Luma;
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeMap;
use tracing::debug;

use crate::mot::{FeatureBundle, FrameData, Region};
use crate::utils::{Point, Rect};

/// What a strategy asks the region extractor for
#[derive(Debug, Clone)]
pub struct ExtractionRequest<'r> {
    /// Point the search is centred on
    pub seed: Point,
    /// Candidates must have at least one pixel in here
    pub search: Rect,
    /// Candidates are labelled inside this larger window
    pub segment: Rect,
    pub min_area: u32,
    pub max_area: u32,
    /// Candidates need an average luminance above this (0 disables the test)
    pub min_intensity: f32,
    /// Pixels of these regions are treated as background
    pub exclude: &'r [&'r Region],
}

/// Produces candidate regions around a tracked object
pub trait RegionExtractor: Send {
    fn extract(&self, frame: &FrameData, request: &ExtractionRequest) -> Vec<Region>;
}

/// Computes the feature payload attached to tokens
pub trait FeatureExtractor: Send {
    fn extract(&self, bbox: Rect, frame: &FrameData) -> FeatureBundle;
}

/// Optional black-box scorer. Returns a label and its probability.
pub trait Classifier: Send {
    fn classify(&self, features: &FeatureBundle) -> Option<(String, f32)>;
}

/// A per-frame candidate proposed by the detector
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub region: Region,
    pub confidence: f64,
}

impl Detection {
    pub fn new(region: Region, confidence: f64) -> Self {
        Detection { region, confidence }
    }
}

/// Proposes detections for a frame. The driver owns it, the event set only consumes its output.
pub trait Detector {
    fn detect(&mut self, frame: &FrameData, search_hints: &[Rect]) -> Vec<Detection>;
}

/// Labels the segmentation image with 8-connectivity. Adjacent pixels with the
/// same non-zero value form one candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectedComponentExtractor;

impl RegionExtractor for ConnectedComponentExtractor {
    fn extract(&self, frame: &FrameData, request: &ExtractionRequest) -> Vec<Region> {
        let bounds = frame.bounds();
        let segment = request.segment.overlap(&bounds);
        let search = request.search.overlap(&bounds);
        if !segment.is_valid() || !search.is_valid() {
            return vec![];
        }
        let mut window = image::GrayImage::new(segment.width as u32, segment.height as u32);
        for y in 0..segment.height {
            for x in 0..segment.width {
                let p = Point::new(segment.x + x, segment.y + y);
                let value = frame.segment_image.get_pixel(p.x as u32, p.y as u32).0[0];
                if value == 0 || frame.is_masked(p) {
                    continue;
                }
                if request.exclude.iter().any(|r| r.contains(p)) {
                    continue;
                }
                window.put_pixel(x as u32, y as u32, Luma([value]));
            }
        }
        let labels = connected_components(&window, Connectivity::Eight, Luma([0u8]));
        let mut components: BTreeMap<u32, Vec<Point>> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            if label.0[0] == 0 {
                continue;
            }
            components
                .entry(label.0[0])
                .or_default()
                .push(Point::new(segment.x + x as i32, segment.y + y as i32));
        }
        let mut regions = vec![];
        for (_, pixels) in components {
            if !pixels.iter().any(|p| search.contains(*p)) {
                continue;
            }
            let area = pixels.len() as u32;
            if area < request.min_area || area > request.max_area {
                debug!(
                    "Candidate of area {} outside [{}, {}]",
                    area, request.min_area, request.max_area
                );
                continue;
            }
            let mut region = Region::from_pixels(pixels);
            region.set_intensity_from(frame.luminance());
            if request.min_intensity > 0.0 && region.avg_intensity() <= request.min_intensity {
                debug!(
                    "Candidate intensity {} below {}",
                    region.avg_intensity(),
                    request.min_intensity
                );
                continue;
            }
            regions.push(region);
        }
        regions
    }
}

/// Luminance histogram and mean colour inside the box
#[derive(Debug, Clone, Copy)]
pub struct IntensityHistogramExtractor {
    pub bins: usize,
}

impl Default for IntensityHistogramExtractor {
    fn default() -> Self {
        IntensityHistogramExtractor { bins: 16 }
    }
}

impl FeatureExtractor for IntensityHistogramExtractor {
    fn extract(&self, bbox: Rect, frame: &FrameData) -> FeatureBundle {
        let mut bundle = FeatureBundle::default();
        let area = bbox.overlap(&frame.bounds());
        if !area.is_valid() || self.bins == 0 {
            return bundle;
        }
        let mut histogram = vec![0f32; self.bins];
        let mut color = [0f32; 3];
        for y in area.top()..=area.bottom() {
            for x in area.left()..=area.right() {
                let lum = frame.luminance().get_pixel(x as u32, y as u32).0[0] as usize;
                histogram[lum * self.bins / 256] += 1.0;
                let rgb = frame.image.get_pixel(x as u32, y as u32).0;
                for c in 0..3 {
                    color[c] += rgb[c] as f32;
                }
            }
        }
        let n = area.area() as f32;
        histogram.iter_mut().for_each(|v| *v /= n);
        bundle.push("luminance_histogram", histogram);
        bundle.push("mean_color", color.iter().map(|c| c / n).collect());
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::test_data::{draw_square, blank_frame};

    #[test]
    fn test_extracts_components_touching_search_window() {
        let (mut image, mut segment) = blank_frame(64, 64);
        draw_square(&mut image, &mut segment, Rect::new(10, 10, 6, 6), 200);
        draw_square(&mut image, &mut segment, Rect::new(40, 40, 6, 6), 200);
        let frame = FrameData::new(0, &image, &segment);
        let request = ExtractionRequest {
            seed: Point::new(12, 12),
            search: Rect::new(8, 8, 10, 10),
            segment: Rect::new(0, 0, 64, 64),
            min_area: 1,
            max_area: 1000,
            min_intensity: 0.0,
            exclude: &[],
        };
        let regions = ConnectedComponentExtractor.extract(&frame, &request);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounding_box(), Rect::new(10, 10, 6, 6));
        assert!((regions[0].avg_intensity() - 200.0).abs() < 1.0);
    }

    #[test]
    fn test_area_intensity_and_exclusion() {
        let (mut image, mut segment) = blank_frame(32, 32);
        draw_square(&mut image, &mut segment, Rect::new(4, 4, 8, 8), 50);
        let frame = FrameData::new(0, &image, &segment);
        let mut request = ExtractionRequest {
            seed: Point::new(8, 8),
            search: Rect::new(0, 0, 32, 32),
            segment: Rect::new(0, 0, 32, 32),
            min_area: 1,
            max_area: 63,
            min_intensity: 0.0,
            exclude: &[],
        };
        assert!(ConnectedComponentExtractor.extract(&frame, &request).is_empty());
        request.max_area = 64;
        assert_eq!(ConnectedComponentExtractor.extract(&frame, &request).len(), 1);
        request.min_intensity = 100.0;
        assert!(ConnectedComponentExtractor.extract(&frame, &request).is_empty());

        request.min_intensity = 0.0;
        let occluder = Region::from_rect(Rect::new(4, 4, 4, 8));
        let exclude = [&occluder];
        request.exclude = &exclude;
        let regions = ConnectedComponentExtractor.extract(&frame, &request);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area(), 32);
    }

    #[test]
    fn test_histogram_features() {
        let (mut image, mut segment) = blank_frame(16, 16);
        draw_square(&mut image, &mut segment, Rect::new(0, 0, 4, 4), 255);
        let frame = FrameData::new(0, &image, &segment);
        let bundle = IntensityHistogramExtractor::default().extract(Rect::new(0, 0, 4, 8), &frame);
        let histogram = bundle.get("luminance_histogram").unwrap();
        assert_eq!(histogram.len(), 16);
        assert!((histogram[15] - 0.5).abs() < 1e-6);
        assert!((histogram[0] - 0.5).abs() < 1e-6);
        assert_eq!(bundle.get("mean_color").unwrap().len(), 3);
    }

    #[test]
    fn test_segmentation_smaller_than_frame() {
        let image = image::RgbImage::new(100, 100);
        let mut segment = image::GrayImage::new(50, 50);
        for y in 36..44 {
            for x in 44..50 {
                segment.put_pixel(x, y, Luma([255]));
            }
        }
        let frame = FrameData::new(0, &image, &segment);
        let request = ExtractionRequest {
            seed: Point::new(50, 40),
            search: Rect::new(40, 30, 20, 20),
            segment: Rect::new(30, 20, 40, 40),
            min_area: 1,
            max_area: 1000,
            min_intensity: 0.0,
            exclude: &[],
        };
        let regions = ConnectedComponentExtractor.extract(&frame, &request);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounding_box(), Rect::new(44, 36, 6, 8));
    }
}
