use image::{imageops, GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::gradients::sobel_gradients;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::mot::mot_errors::AppearanceError;
use crate::mot::{AppearanceModel, AppearanceParameters, Region};
use crate::utils::{euclidean_distance, Point, Rect};

// Only leaves more likely foreground than not cast votes
const VOTE_THRESHOLD: f32 = 0.5;
const MAX_VOTES_PER_LEAF: usize = 10;
const VOTE_BLUR_SIGMA: f32 = 1.1;
// Margin around the object window used for training
const UPDATE_MARGIN: i32 = 5;

type VoteImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Luminance, red, green, blue and gradient magnitude of one frame
struct FeatureChannels {
    channels: Vec<GrayImage>,
}

impl FeatureChannels {
    const COUNT: usize = 5;

    fn new(image: &RgbImage) -> Self {
        let (w, h) = image.dimensions();
        let luminance = imageops::grayscale(image);
        let gradients = sobel_gradients(&luminance);
        let magnitude = GrayImage::from_fn(w, h, |x, y| {
            Luma([u16::min(gradients.get_pixel(x, y).0[0] / 4, 255) as u8])
        });
        let split = |c: usize| GrayImage::from_fn(w, h, |x, y| Luma([image.get_pixel(x, y).0[c]]));
        FeatureChannels {
            channels: vec![luminance, split(0), split(1), split(2), magnitude],
        }
    }
    fn value(&self, channel: usize, p: Point) -> u8 {
        let img = &self.channels[channel];
        if p.x < 0 || p.y < 0 || p.x as u32 >= img.width() || p.y as u32 >= img.height() {
            return 0;
        }
        img.get_pixel(p.x as u32, p.y as u32).0[0]
    }
}

/// Binary comparison of two pixels of one channel inside the patch
#[derive(Debug, Clone, Copy)]
struct PixelTest {
    channel: usize,
    a: Point,
    b: Point,
}

impl PixelTest {
    fn random<R: Rng>(rng: &mut R, patch_size: i32) -> Self {
        PixelTest {
            channel: rng.gen_range(0..FeatureChannels::COUNT),
            a: Point::new(rng.gen_range(0..patch_size), rng.gen_range(0..patch_size)),
            b: Point::new(rng.gen_range(0..patch_size), rng.gen_range(0..patch_size)),
        }
    }
    fn eval(&self, features: &FeatureChannels, base: Point) -> bool {
        features.value(self.channel, base + self.a) > features.value(self.channel, base + self.b)
    }
}

/// Leaf statistics: sample counts and the offsets from training pixels to the object centre
#[derive(Debug, Clone)]
struct Node {
    num_pos: f32,
    num_neg: f32,
    prob_pos: f32,
    // Sparse vote map keyed by cell
    votes: BTreeMap<(i32, i32), f32>,
    // Strongest offsets, refreshed after every training pass
    top: Vec<(Point, f32)>,
}

impl Default for Node {
    fn default() -> Self {
        Node {
            num_pos: 1.0,
            num_neg: 1.0,
            prob_pos: 0.5,
            votes: BTreeMap::new(),
            top: vec![],
        }
    }
}

impl Node {
    fn update_probability(&mut self) {
        self.prob_pos = self.num_pos / (self.num_pos + self.num_neg);
    }
    fn forget(&mut self, factor: f32) {
        self.votes.values_mut().for_each(|v| *v *= factor);
        self.num_pos *= factor;
        self.num_neg *= factor;
    }
    fn refresh_top(&mut self, map: &VoteMapShape) {
        let avg = self.num_pos / (map.size * map.size) as f32;
        let mut top: Vec<(Point, f32)> = self
            .votes
            .iter()
            .filter(|(_, val)| **val > avg)
            .map(|(cell, val)| (map.offset(*cell), self.prob_pos * val / self.num_pos))
            .collect();
        top.sort_by(|a, b| b.1.total_cmp(&a.1));
        top.truncate(MAX_VOTES_PER_LEAF);
        self.top = top;
    }
}

/// Geometry of the square offset vote maps
#[derive(Debug, Clone, Copy)]
struct VoteMapShape {
    size: i32,
    step: i32,
}

impl VoteMapShape {
    fn cell(&self, vote: Point) -> Result<(i32, i32), AppearanceError> {
        let idx = (vote.x as f32 / self.step as f32).round() as i32 + self.size / 2;
        let idy = (vote.y as f32 / self.step as f32).round() as i32 + self.size / 2;
        if idx < 0 || idy < 0 || idx >= self.size || idy >= self.size {
            return Err(AppearanceError::VoteOutOfRange {
                dx: vote.x,
                dy: vote.y,
            });
        }
        Ok((idx, idy))
    }
    fn offset(&self, cell: (i32, i32)) -> Point {
        Point::new(
            (cell.0 - self.size / 2) * self.step,
            (cell.1 - self.size / 2) * self.step,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Sample {
    Positive,
    Negative,
    Ignore,
}

#[derive(Debug, Clone)]
struct Fern {
    tests: Vec<PixelTest>,
    nodes: BTreeMap<u32, Node>,
    patch_size: i32,
}

impl Fern {
    fn random<R: Rng>(rng: &mut R, patch_size: i32, num_tests: usize) -> Self {
        Fern {
            tests: (0..num_tests).map(|_| PixelTest::random(rng, patch_size)).collect(),
            nodes: BTreeMap::new(),
            patch_size,
        }
    }
    fn index(&self, features: &FeatureChannels, p: Point) -> u32 {
        let base = Point::new(p.x - self.patch_size / 2, p.y - self.patch_size / 2);
        self.tests
            .iter()
            .fold(0u32, |idx, test| (idx << 1) | test.eval(features, base) as u32)
    }
    fn update(
        &mut self,
        features: &FeatureChannels,
        p: Point,
        positive: bool,
        center: Point,
        map: &VoteMapShape,
    ) -> Result<(), AppearanceError> {
        let idx = self.index(features, p);
        // Checked before touching the leaf so a failed vote leaves it consistent
        let cell = if positive { Some(map.cell(center - p)?) } else { None };
        let node = self.nodes.entry(idx).or_default();
        match cell {
            Some(cell) => {
                node.num_pos += 1.0;
                *node.votes.entry(cell).or_insert(0.0) += 1.0;
            }
            None => node.num_neg += 1.0,
        }
        node.update_probability();
        Ok(())
    }
    fn evaluate(&self, features: &FeatureChannels, roi: Rect, result: &mut VoteImage) {
        let (w, h) = result.dimensions();
        for y in roi.top()..=roi.bottom() {
            for x in roi.left()..=roi.right() {
                let p = Point::new(x, y);
                let node = match self.nodes.get(&self.index(features, p)) {
                    Some(node) if node.prob_pos > VOTE_THRESHOLD => node,
                    _ => continue,
                };
                for (vote, weight) in &node.top {
                    let target = p + *vote;
                    if target.x < 0 || target.y < 0 || target.x as u32 >= w || target.y as u32 >= h {
                        continue;
                    }
                    result.get_pixel_mut(target.x as u32, target.y as u32).0[0] += *weight;
                }
            }
        }
    }
    fn back_project(
        &self,
        features: &FeatureChannels,
        roi: Rect,
        center: Point,
        radius: f32,
        projected: &mut GrayImage,
    ) -> usize {
        let mut count = 0;
        for y in roi.top()..=roi.bottom() {
            for x in roi.left()..=roi.right() {
                let p = Point::new(x, y);
                let node = match self.nodes.get(&self.index(features, p)) {
                    Some(node) if node.prob_pos > VOTE_THRESHOLD => node,
                    _ => continue,
                };
                let hit = node
                    .top
                    .iter()
                    .any(|(vote, _)| euclidean_distance(&(p + *vote), &center) <= radius);
                if hit {
                    projected.put_pixel(x as u32, y as u32, Luma([255]));
                    count += 1;
                }
            }
        }
        count
    }
    fn refresh(&mut self, map: &VoteMapShape) {
        self.nodes.values_mut().for_each(|n| n.refresh_top(map));
    }
    fn forget(&mut self, factor: f32) {
        self.nodes.values_mut().for_each(|n| n.forget(factor));
    }
}

/// Random-fern Hough voting model.
///
/// Every fern maps a pixel's patch to a leaf through `num_tests` pixel
/// comparisons. Leaves learn how likely they are to be on the object and
/// where the object centre lies relative to them. Locating the object means
/// accumulating those centre votes over the search window and taking the
/// maximum. The mask is recovered from the pixels that voted for it.
pub struct FernVoteModel {
    params: AppearanceParameters,
    rng: StdRng,
    ferns: Vec<Fern>,
    object: Rect,
    initialized: bool,
}

impl fmt::Debug for FernVoteModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FernVoteModel")
            .field("ferns", &self.ferns.len())
            .field("object", &self.object)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl FernVoteModel {
    /// The random tests are seeded from the parameters and the event id,
    /// so a run is reproducible.
    pub fn new(params: AppearanceParameters, event_id: u32) -> Self {
        let rng = StdRng::seed_from_u64(params.seed.wrapping_add(event_id as u64));
        FernVoteModel {
            params,
            rng,
            ferns: vec![],
            object: Rect::default(),
            initialized: false,
        }
    }
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
    /// Last object window
    pub fn get_object(&self) -> Rect {
        self.object
    }
    fn map_shape(&self) -> VoteMapShape {
        VoteMapShape {
            size: self.params.vote_map_size,
            step: self.params.vote_map_step,
        }
    }
    // Positions whose whole patch lies inside the image
    fn image_rect(&self, image: &RgbImage) -> Rect {
        let (w, h) = image.dimensions();
        let half = self.params.patch_size / 2;
        Rect::new(
            half,
            half,
            w as i32 - self.params.patch_size,
            h as i32 - self.params.patch_size,
        )
    }
    // Half of the ferns, the ones with the most populated tables
    fn active_ferns(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.ferns.len()).collect();
        order.sort_by(|a, b| self.ferns[*b].nodes.len().cmp(&self.ferns[*a].nodes.len()));
        order.truncate(usize::max(1, self.ferns.len() / 2));
        order
    }
    fn train<F: Fn(Point) -> Sample>(
        &mut self,
        features: &FeatureChannels,
        region: Rect,
        center: Point,
        label: F,
        decay: f32,
    ) -> Result<(), AppearanceError> {
        let map = self.map_shape();
        let (mut num_pos, mut num_neg) = (0, 0);
        for y in region.top()..=region.bottom() {
            for x in region.left()..=region.right() {
                let p = Point::new(x, y);
                let positive = match label(p) {
                    Sample::Positive => true,
                    Sample::Negative => false,
                    Sample::Ignore => continue,
                };
                for fern in self.ferns.iter_mut() {
                    fern.update(features, p, positive, center, &map)?;
                }
                if positive {
                    num_pos += 1;
                } else {
                    num_neg += 1;
                }
            }
        }
        for fern in self.ferns.iter_mut() {
            fern.refresh(&map);
            fern.forget(decay);
        }
        debug!("Updated {} points ({}+, {}-)", num_pos + num_neg, num_pos, num_neg);
        Ok(())
    }
}

/// Keeps the connected component of `projected` nearest `center` inside `window`.
/// Occluding regions are cleared first.
fn refine_mask(
    projected: &GrayImage,
    window: Rect,
    center: Point,
    occluders: &[&Region],
) -> Result<Region, AppearanceError> {
    let grown = dilate(projected, Norm::LInf, 1);
    let mut mask = GrayImage::new(window.width as u32, window.height as u32);
    for y in 0..window.height {
        for x in 0..window.width {
            let p = Point::new(window.x + x, window.y + y);
            if grown.get_pixel(p.x as u32, p.y as u32).0[0] == 0 {
                continue;
            }
            if occluders.iter().any(|r| r.contains(p)) {
                continue;
            }
            mask.put_pixel(x as u32, y as u32, Luma([255]));
        }
    }
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
    let mut components: BTreeMap<u32, Vec<Point>> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        if label.0[0] != 0 {
            components
                .entry(label.0[0])
                .or_default()
                .push(Point::new(window.x + x as i32, window.y + y as i32));
        }
    }
    components
        .into_values()
        .map(Region::from_pixels)
        .map(|r| (euclidean_distance(&r.centroid(), &center), r))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, r)| r)
        .ok_or(AppearanceError::EmptyRegion)
}

impl AppearanceModel for FernVoteModel {
    fn reset(&mut self, image: &RgbImage, seed: &Region, decay: f32) -> Result<(), AppearanceError> {
        if !seed.is_valid() {
            return Err(AppearanceError::EmptyRegion);
        }
        self.initialized = false;
        let features = FeatureChannels::new(image);
        let img_rect = self.image_rect(image);
        let (patch, tests) = (self.params.patch_size, self.params.num_tests);
        self.ferns = (0..self.params.num_ferns)
            .map(|_| Fern::random(&mut self.rng, patch, tests))
            .collect();
        self.object = seed.bounding_box();
        let max_object = self
            .object
            .squarify(self.params.scale_increase)
            .overlap(&img_rect);
        let update_region = max_object.inflate(UPDATE_MARGIN).overlap(&img_rect);
        if !update_region.is_valid() {
            return Err(AppearanceError::SearchRegionOutside);
        }
        info!("Initial position: {:?}", self.object);
        self.train(
            &features,
            update_region,
            seed.centroid(),
            |p| {
                if seed.contains(p) {
                    Sample::Positive
                } else {
                    Sample::Negative
                }
            },
            decay,
        )?;
        self.initialized = true;
        Ok(())
    }

    fn update(
        &mut self,
        image: &RgbImage,
        search: Rect,
        occluders: &[&Region],
        decay: f32,
    ) -> Result<Region, AppearanceError> {
        if !self.initialized {
            return Err(AppearanceError::NotInitialized);
        }
        let features = FeatureChannels::new(image);
        let img_rect = self.image_rect(image);
        let max_object = search.squarify(self.params.scale_increase).overlap(&img_rect);
        let window = max_object.inflate(UPDATE_MARGIN).overlap(&img_rect);
        if !max_object.is_valid() || !window.is_valid() {
            return Err(AppearanceError::SearchRegionOutside);
        }

        let (w, h) = image.dimensions();
        let mut votes = VoteImage::new(w, h);
        let active = self.active_ferns();
        for &i in &active {
            self.ferns[i].evaluate(&features, window, &mut votes);
        }
        let votes = imageops::blur(&votes, VOTE_BLUR_SIGMA);
        let (mut center, mut max_val) = (Point::default(), f32::MIN);
        for (x, y, v) in votes.enumerate_pixels() {
            if v.0[0] > max_val {
                max_val = v.0[0];
                center = Point::new(x as i32, y as i32);
            }
        }
        debug!("Locate: maximum is at {:?}: {}", center, max_val);
        if max_val < self.params.confidence_floor {
            return Err(AppearanceError::LowConfidence {
                value: max_val,
                floor: self.params.confidence_floor,
            });
        }

        let max_object = max_object.recenter(center).overlap(&img_rect);
        let window = window.recenter(center).overlap(&img_rect);
        if !max_object.is_valid() || !window.is_valid() {
            return Err(AppearanceError::SearchRegionOutside);
        }
        let mut projected = GrayImage::new(w, h);
        let count: usize = active
            .iter()
            .map(|&i| {
                self.ferns[i].back_project(
                    &features,
                    max_object,
                    center,
                    self.params.back_project_radius,
                    &mut projected,
                )
            })
            .sum();
        if count == 0 {
            return Err(AppearanceError::EmptyRegion);
        }
        let region = refine_mask(&projected, window, center, occluders)?;

        // Train around the centre of mass of the refined mask
        let center = region.centroid();
        let max_object = max_object.recenter(center);
        let update_region = max_object.inflate(UPDATE_MARGIN).overlap(&img_rect);
        self.train(
            &features,
            update_region,
            center,
            |p| {
                if region.contains(p) {
                    Sample::Positive
                } else if !max_object.contains(p) {
                    Sample::Negative
                } else {
                    Sample::Ignore
                }
            },
            decay,
        )?;
        self.object = region.bounding_box();
        Ok(region)
    }

    fn forget(&mut self, decay: f32) {
        self.ferns.iter_mut().for_each(|f| f.forget(decay));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn map() -> VoteMapShape {
        VoteMapShape { size: 100, step: 2 }
    }

    #[test]
    fn test_vote_cells() {
        let map = map();
        assert_eq!(map.cell(Point::new(0, 0)), Ok((50, 50)));
        assert_eq!(map.cell(Point::new(-100, 98)), Ok((0, 99)));
        assert_eq!(map.offset((0, 99)), Point::new(-100, 98));
        assert_eq!(
            map.cell(Point::new(-103, 0)),
            Err(AppearanceError::VoteOutOfRange { dx: -103, dy: 0 })
        );
        assert!(map.cell(Point::new(0, 100)).is_err());
    }

    #[test]
    fn test_node_top_votes() {
        let map = map();
        let mut node = Node::default();
        for (cell, hits) in [((50, 50), 3.0), ((52, 50), 1.0)] {
            node.votes.insert(cell, hits);
            node.num_pos += hits;
        }
        node.num_neg += 1.0;
        node.update_probability();
        node.refresh_top(&map);
        assert_eq!(node.top.len(), 2);
        assert_eq!(node.top[0].0, Point::new(0, 0));
        assert_eq!(node.top[1].0, Point::new(4, 0));
        assert!(node.top[0].1 > node.top[1].1);

        // Forgetting scales counts and votes alike
        let before = node.top.clone();
        node.forget(0.5);
        node.refresh_top(&map);
        assert_eq!(node.num_pos, 2.5);
        for (a, b) in before.iter().zip(node.top.iter()) {
            assert!((a.1 - b.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_update_requires_reset() {
        let mut model = FernVoteModel::new(AppearanceParameters::default(), 1);
        let image = RgbImage::new(64, 64);
        assert_eq!(
            model.update(&image, Rect::new(10, 10, 8, 8), &[], 0.9),
            Err(AppearanceError::NotInitialized)
        );
    }

    #[test]
    fn test_reset_trains_ferns() {
        let mut model = FernVoteModel::new(AppearanceParameters::default(), 1);
        let mut image = RgbImage::new(64, 64);
        for y in 20..30 {
            for x in 20..30 {
                image.put_pixel(x, y, Rgb([(x * 20) as u8, (y * 10) as u8, 90]));
            }
        }
        let seed = Region::from_rect(Rect::new(20, 20, 10, 10));
        model.reset(&image, &seed, 0.9).unwrap();
        assert!(model.is_initialized());
        assert_eq!(model.ferns.len(), 20);
        assert!(model.ferns.iter().all(|f| !f.nodes.is_empty()));
        assert_eq!(model.get_object(), Rect::new(20, 20, 10, 10));
        assert_eq!(model.active_ferns().len(), 10);
    }

    #[test]
    fn test_oversized_object_votes_out_of_range() {
        let mut model = FernVoteModel::new(AppearanceParameters::default(), 3);
        let image = RgbImage::from_pixel(260, 60, Rgb([40, 40, 40]));
        let seed = Region::from_rect(Rect::new(10, 20, 230, 20));
        assert!(matches!(
            model.reset(&image, &seed, 0.9),
            Err(AppearanceError::VoteOutOfRange { .. })
        ));
        assert!(!model.is_initialized());
    }

    #[test]
    fn test_refine_keeps_component_nearest_center() {
        let mut projected = GrayImage::new(40, 40);
        for (x, y) in [(10, 10), (11, 10), (11, 11), (30, 30), (31, 30)] {
            projected.put_pixel(x, y, Luma([255]));
        }
        let window = Rect::new(0, 0, 40, 40);
        let region = refine_mask(&projected, window, Point::new(29, 29), &[]).unwrap();
        assert!(region.contains(Point::new(30, 30)));
        assert!(!region.contains(Point::new(10, 10)));

        // Masking the near blob leaves only the far one
        let occluder = Region::from_rect(Rect::new(25, 25, 15, 15));
        let region = refine_mask(&projected, window, Point::new(29, 29), &[&occluder]).unwrap();
        assert!(region.contains(Point::new(10, 10)));

        assert_eq!(
            refine_mask(&GrayImage::new(40, 40), window, Point::new(1, 1), &[]),
            Err(AppearanceError::EmptyRegion)
        );
    }

    #[test]
    fn test_update_follows_shifted_object() {
        use crate::mot::test_data::{blank_frame, draw_textured_square};

        let before = Rect::new(58, 58, 24, 24);
        let after = Rect::new(61, 59, 24, 24);
        let (mut first, mut segment) = blank_frame(160, 160);
        draw_textured_square(&mut first, &mut segment, before);
        let (mut second, mut segment) = blank_frame(160, 160);
        draw_textured_square(&mut second, &mut segment, after);

        let mut model = FernVoteModel::new(AppearanceParameters::default(), 1);
        let seed = Region::from_rect(before);
        model.reset(&first, &seed, 0.9).unwrap();
        let search = Rect::center_dims(seed.centroid(), before.width, before.height);
        let region = model.update(&second, search, &[], 0.9).unwrap();

        let distance = euclidean_distance(&region.centroid(), &after.center());
        assert!(distance <= 4.0, "centroid {:?} too far from {:?}", region.centroid(), after.center());
        assert!(region.bounding_box().overlap(&after).area() * 2 >= after.area());
        assert!(region.area() > 200 && region.area() < 1200);
        assert_eq!(model.get_object(), region.bounding_box());
    }

    #[test]
    fn test_update_outside_image() {
        let mut model = FernVoteModel::new(AppearanceParameters::default(), 1);
        let image = RgbImage::from_pixel(64, 64, Rgb([10, 200, 10]));
        model
            .reset(&image, &Region::from_rect(Rect::new(20, 20, 10, 10)), 0.9)
            .unwrap();
        assert_eq!(
            model.update(&image, Rect::new(500, 500, 10, 10), &[], 0.9),
            Err(AppearanceError::SearchRegionOutside)
        );
    }
}
