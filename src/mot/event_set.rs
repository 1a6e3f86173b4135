use image::RgbImage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mot::mot_errors::TrackerError;
use crate::mot::{
    default_appearance_factory, AppearanceFactory, AssociationOutcome, Category, Classifier,
    ConnectedComponentExtractor, Detection, DetectionParameters, EventState, FeatureExtractor,
    FrameData, IntensityHistogramExtractor, Region, RegionExtractor, Token, TrackingContext,
    TrackingStrategy, VisualEvent,
};
use crate::utils::Vector2D;

/// Hands out event ids. Ids are never reused, even after the event is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIdGenerator {
    next: u32,
}

impl Default for EventIdGenerator {
    fn default() -> Self {
        EventIdGenerator { next: 1 }
    }
}

impl EventIdGenerator {
    /// Generator whose first id is `next`
    pub fn starting_at(next: u32) -> Self {
        EventIdGenerator { next }
    }
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
    /// Id the next event will get
    pub fn peek(&self) -> u32 {
        self.next
    }
}

/// Owns every event of a run and extends them frame by frame.
///
/// One frame is resolved completely before the next one:
/// `update_events` -> `initiate_events` -> `clean_up`, which is what
/// [`VisualEventSet::process_frame`] does.
pub struct VisualEventSet {
    params: Arc<DetectionParameters>,
    events: BTreeMap<u32, VisualEvent>,
    ids: EventIdGenerator,
    // First and last frame seen by initiate_events
    frame_window: Option<(u32, u32)>,
    run_id: Uuid,
    extractor: Box<dyn RegionExtractor>,
    features: Box<dyn FeatureExtractor>,
    classifier: Option<Box<dyn Classifier>>,
    appearance_factory: AppearanceFactory,
}

impl fmt::Debug for VisualEventSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VisualEventSet")
            .field("run_id", &self.run_id)
            .field("tracking_mode", &self.params.tracking_mode)
            .field("events", &self.events.len())
            .field("next_id", &self.ids.peek())
            .field("frame_window", &self.frame_window)
            .finish()
    }
}

impl VisualEventSet {
    /// Creates an empty set with the default collaborators
    ///
    /// Basic usage:
    ///
    /// ```
    /// use std::sync::Arc;
    /// use visual_events::mot::{DetectionParameters, TrackingMode, VisualEventSet};
    /// let params = DetectionParameters {
    ///     tracking_mode: TrackingMode::NearestNeighbor,
    ///     ..DetectionParameters::default()
    /// };
    /// let events = VisualEventSet::new(Arc::new(params));
    /// assert_eq!(events.num_events(), 0);
    /// ```
    pub fn new(params: Arc<DetectionParameters>) -> Self {
        info!("New event set\n\t{}", params);
        VisualEventSet {
            params,
            events: BTreeMap::new(),
            ids: EventIdGenerator::default(),
            frame_window: None,
            run_id: Uuid::new_v4(),
            extractor: Box::new(ConnectedComponentExtractor),
            features: Box::new(IntensityHistogramExtractor::default()),
            classifier: None,
            appearance_factory: default_appearance_factory(),
        }
    }
    pub fn with_region_extractor(mut self, extractor: Box<dyn RegionExtractor>) -> Self {
        self.extractor = extractor;
        self
    }
    pub fn with_feature_extractor(mut self, features: Box<dyn FeatureExtractor>) -> Self {
        self.features = features;
        self
    }
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }
    pub fn with_appearance_factory(mut self, factory: AppearanceFactory) -> Self {
        self.appearance_factory = factory;
        self
    }
    pub(crate) fn restore(
        params: Arc<DetectionParameters>,
        run_id: Uuid,
        ids: EventIdGenerator,
        frame_window: Option<(u32, u32)>,
        events: Vec<VisualEvent>,
    ) -> Self {
        let mut set = VisualEventSet::new(params);
        set.run_id = run_id;
        set.ids = ids;
        set.frame_window = frame_window;
        set.events = events.into_iter().map(|e| (e.get_id(), e)).collect();
        set
    }
    pub fn get_params(&self) -> &Arc<DetectionParameters> {
        &self.params
    }
    pub fn get_run_id(&self) -> Uuid {
        self.run_id
    }
    /// First and last frame that went through `initiate_events`
    pub fn get_frame_window(&self) -> Option<(u32, u32)> {
        self.frame_window
    }
    pub(crate) fn get_id_generator(&self) -> EventIdGenerator {
        self.ids
    }
    pub fn get_events(&self) -> impl Iterator<Item = &VisualEvent> {
        self.events.values()
    }

    /// Runs one frame: extends the open events, starts events for the
    /// detections nobody claimed and cleans up. Returns the new event ids.
    pub fn process_frame(
        &mut self,
        frame: &FrameData,
        detections: Vec<Detection>,
    ) -> Result<Vec<u32>, TrackerError> {
        let (min_area, max_area) = (self.params.min_event_area, self.params.max_event_area);
        let regions = detections
            .into_iter()
            .filter(|d| {
                let area = d.region.area();
                area >= min_area && area <= max_area
            })
            .map(|d| {
                let mut region = d.region;
                region.set_smv(d.confidence);
                region
            })
            .collect();
        self.update_events(frame)?;
        let created = self.initiate_events(regions, frame);
        self.clean_up(frame.frame_number);
        Ok(created)
    }

    /// Regions each open event committed last, taken before any event moves
    fn occlusion_context(&self) -> Vec<(u32, Region)> {
        self.events
            .values()
            .filter(|e| e.is_open())
            .map(|e| (e.get_id(), e.get_last_token().region.clone()))
            .collect()
    }

    /// Extends every open event into `frame` with the configured strategy chain
    pub fn update_events(&mut self, frame: &FrameData) -> Result<(), TrackerError> {
        let chain = self.params.tracking_mode.strategy_chain();
        if chain.is_empty() {
            debug!("Tracking disabled, frame {} leaves events untouched", frame.frame_number);
            return Ok(());
        }
        let others = self.occlusion_context();
        let ctx = TrackingContext {
            frame,
            others: &others,
            extractor: self.extractor.as_ref(),
            features: self.features.as_ref(),
            classifier: self.classifier.as_deref(),
        };
        for event in self.events.values_mut().filter(|e| e.is_open()) {
            run_chain(event, chain, &ctx, &self.appearance_factory)?;
        }
        Ok(())
    }

    /// Starts a new event for every region that no existing event claims.
    /// Returns the ids of the events created.
    pub fn initiate_events(&mut self, regions: Vec<Region>, frame: &FrameData) -> Vec<u32> {
        let frame_number = frame.frame_number;
        self.frame_window = Some(match self.frame_window {
            None => (frame_number, frame_number),
            Some((start, end)) => (start, u32::max(end, frame_number)),
        });

        let remaining: Vec<Region> = regions
            .into_iter()
            .filter(|region| {
                if !region.is_valid() {
                    debug!("Skipping empty region at frame {}", frame_number);
                }
                region.is_valid()
            })
            .map(|mut region| {
                // The first extension gates candidates on the seed's intensity
                if region.intensity().is_none() {
                    region.set_intensity_from(frame.luminance());
                }
                region
            })
            .filter(|region| !self.reset_intersect(region, frame))
            .collect();

        let ctx = TrackingContext {
            frame,
            others: &[],
            extractor: self.extractor.as_ref(),
            features: self.features.as_ref(),
            classifier: self.classifier.as_deref(),
        };
        let mut created = Vec::with_capacity(remaining.len());
        for region in remaining {
            let id = self.ids.next_id();
            info!(
                "Assigning object of area {} to new event {} frame {}",
                region.area(),
                id,
                frame_number
            );
            let seed = region.clone();
            let mut event = VisualEvent::new(id, ctx.build_token(region), self.params.clone());
            if event.get_tracker() == TrackingStrategy::Appearance {
                let model = (self.appearance_factory)(&self.params.appearance, id);
                event.set_appearance_model(model);
                if let Err(err) = event.reset_appearance(frame.image, &seed) {
                    debug!("Event {} - appearance reset failed: {}", id, err);
                }
            }
            self.events.insert(id, event);
            created.push(id);
        }
        created
    }

    /// Does `region` fall on an existing event in this frame? If the event is
    /// followed by its appearance and the detection mostly lies outside it,
    /// the two are merged and the model is re-seeded on the union.
    fn reset_intersect(&mut self, region: &Region, frame: &FrameData) -> bool {
        let frame_number = frame.frame_number;
        let uses_appearance = self.params.tracking_mode.uses_appearance();
        let event = match self
            .events
            .values_mut()
            .find(|e| e.does_intersect(region, frame_number))
        {
            Some(event) => event,
            None => return false,
        };
        if !uses_appearance
            || event.get_number_of_tokens() <= 1
            || event.get_tracker() != TrackingStrategy::Appearance
        {
            return true;
        }
        let current = match event.get_token_for_frame(event.get_end_frame()) {
            Some(token) => &token.region,
            None => return true,
        };
        let area = current.area() as f32;
        let outside = (area - current.intersection_area(region) as f32) / area;
        if outside <= 0.5 {
            return true;
        }
        let mut merged = current.union(region);
        merged.set_smv(region.smv());
        merged.set_intensity_from(frame.luminance());
        if !merged.is_valid() {
            return true;
        }
        let id = event.get_id();
        if !event.has_appearance_model() {
            let model = (self.appearance_factory)(&self.params.appearance, id);
            event.set_appearance_model(model);
        }
        if let Err(err) = event.reset_appearance(frame.image, &merged) {
            debug!("Event {} - appearance reset failed: {}", id, err);
        }
        info!(
            "Resetting appearance tracker frame {} event {} with object in bounding box {:?}",
            frame_number,
            id,
            region.bounding_box()
        );
        event.reset_region(event.get_end_frame(), merged);
        true
    }

    /// Bookkeeping after a frame: drops deleted events and closes events
    /// older than the frame cap
    pub fn clean_up(&mut self, current_frame: u32) {
        let max_frames = self.params.max_event_frames;
        self.events.retain(|id, event| match event.get_state() {
            EventState::Delete => {
                debug!("Erasing event {}", id);
                false
            }
            EventState::Open => {
                let cap = event.get_start_frame().saturating_add(max_frames);
                if max_frames > 0 && current_frame > cap {
                    info!(
                        "Event {} longer than {} frames - closing",
                        id, max_frames
                    );
                    event.close();
                }
                true
            }
            EventState::Closed | EventState::WriteFini => {
                debug!("Event {} waiting to be written, state {:?}", id, event.get_state());
                true
            }
        });
    }

    /// Closes every open event, e.g. at the end of a run
    pub fn close_all(&mut self) {
        for event in self.events.values_mut() {
            event.close();
        }
    }

    pub fn num_events(&self) -> usize {
        self.events.len()
    }
    pub fn does_event_exist(&self, id: u32) -> bool {
        self.events.contains_key(&id)
    }
    /// Panics if there is no event `id`: callers check `does_event_exist` first
    pub fn get_event_by_number(&self, id: u32) -> &VisualEvent {
        match self.events.get(&id) {
            Some(event) => event,
            None => panic!("Event with number {} does not exist", id),
        }
    }
    pub fn get_event_by_number_mut(&mut self, id: u32) -> Option<&mut VisualEvent> {
        self.events.get_mut(&id)
    }
    /// Swaps in `event` for the stored event with the same id
    pub fn replace_event(&mut self, event: VisualEvent) -> Result<VisualEvent, TrackerError> {
        match self.events.get_mut(&event.get_id()) {
            Some(stored) => Ok(std::mem::replace(stored, event)),
            None => Err(TrackerError::UnknownEvent(event.get_id())),
        }
    }
    /// Events that have a token in `frame_number`
    pub fn get_events_for_frame(&self, frame_number: u32) -> Vec<&VisualEvent> {
        self.events
            .values()
            .filter(|e| e.frame_in_range(frame_number))
            .collect()
    }
    /// Every closed event, waiting for persistence
    pub fn get_events_ready_to_save(&self) -> Vec<&VisualEvent> {
        self.events.values().filter(|e| e.is_closed()).collect()
    }
    pub fn get_bit_objects_for_frame(&self, frame_number: u32) -> Vec<&Region> {
        self.events
            .values()
            .filter_map(|e| e.get_token_for_frame(frame_number))
            .map(|t| &t.region)
            .collect()
    }
    pub fn get_tokens_for_frame(&self, frame_number: u32) -> Vec<(u32, &Token)> {
        self.events
            .values()
            .filter_map(|e| e.get_token_for_frame(frame_number).map(|t| (e.get_id(), t)))
            .collect()
    }
    /// Latest frame up to which every event that had started is closed,
    /// -1 if there is none
    pub fn get_all_closed_frame_num(&self, current_frame: u32) -> i64 {
        let mut frame = current_frame as i64;
        while frame >= -1 {
            let done = self
                .events
                .values()
                .all(|e| frame < e.get_start_frame() as i64 || e.is_closed());
            if done {
                return frame;
            }
            frame -= 1;
        }
        -1
    }
    /// Area range covered by the configured bounds and every event's sizes
    pub fn get_area_range(&self) -> (u32, u32) {
        self.events.values().fold(
            (self.params.min_event_area, self.params.max_event_area),
            |(min_area, max_area), e| {
                (
                    u32::min(min_area, e.get_min_size()),
                    u32::max(max_area, e.get_max_size()),
                )
            },
        )
    }
    /// Mean acceleration of all events except `skip_id`
    pub fn get_mean_acceleration(&self, skip_id: u32) -> f32 {
        let accelerations: Vec<f32> = self
            .events
            .values()
            .filter(|e| e.get_id() != skip_id)
            .map(|e| e.get_acceleration())
            .collect();
        if accelerations.is_empty() {
            return 0.0;
        }
        accelerations.iter().sum::<f32>() / accelerations.len() as f32
    }
    /// Filtered positions of event `id`
    pub fn get_positions(&self, id: u32) -> Result<Vec<(u32, Vector2D)>, TrackerError> {
        self.events
            .get(&id)
            .map(|e| e.get_positions())
            .ok_or(TrackerError::UnknownEvent(id))
    }
    /// Persistence has written event `id`: its tokens are flagged and it moves to WriteFini
    pub fn flag_write_complete(&mut self, id: u32) -> Result<(), TrackerError> {
        let event = self.events.get_mut(&id).ok_or(TrackerError::UnknownEvent(id))?;
        event.mark_written();
        event.flag_write_complete()
    }
    /// Event `id` is fully flushed and goes away with the next clean-up
    pub fn flag_for_delete(&mut self, id: u32) -> Result<(), TrackerError> {
        self.events
            .get_mut(&id)
            .ok_or(TrackerError::UnknownEvent(id))?
            .flag_for_delete()
    }
}

/// Extends one open event into the current frame.
///
/// The primary strategy is tried first. A miss falls back to the next strategy
/// only for events worth the cost: salient ones or ones already interesting.
/// Expiration is decided here and nowhere else.
fn run_chain(
    event: &mut VisualEvent,
    chain: &[TrackingStrategy],
    ctx: &TrackingContext,
    factory: &AppearanceFactory,
) -> Result<(), TrackerError> {
    let frame_number = ctx.frame.frame_number;
    if !event.is_token_ok(frame_number) {
        return Ok(());
    }
    let (primary, fallback) = match chain {
        [] => return Ok(()),
        [primary] => (*primary, None),
        [primary, fallback, ..] => (*primary, Some(*fallback)),
    };
    if primary == TrackingStrategy::Appearance && !event.has_appearance_model() {
        prepare_appearance(event, ctx, factory);
    }

    let mut found = None;
    match primary.try_associate(event, ctx) {
        AssociationOutcome::Found(token) => {
            event.set_tracker(primary);
            found = Some(token);
        }
        AssociationOutcome::OutOfBounds => event.close(),
        AssociationOutcome::NotFound => {
            if let Some(fallback) = fallback {
                if event.is_open() && worth_fallback(event) {
                    event.set_tracker(fallback);
                    if fallback == TrackingStrategy::Appearance {
                        prepare_appearance(event, ctx, factory);
                    }
                    match fallback.try_associate(event, ctx) {
                        AssociationOutcome::Found(token) => found = Some(token),
                        outcome => {
                            info!(
                                "Event {} - {:?} tracker failed ({:?}) - closing",
                                event.get_id(),
                                fallback,
                                outcome
                            );
                            event.close();
                        }
                    }
                }
            }
        }
    }

    let assigned = found.is_some();
    if let Some(token) = found {
        event.assign(token, ctx.frame.foe, frame_number)?;
    }
    let expiration = event.get_params().event_expiration_frames;
    let elapsed = frame_number.saturating_sub(event.get_valid_end_frame());
    if event.is_open() && elapsed > expiration {
        info!(
            "Event {} - no token found for {} frames - closing",
            event.get_id(),
            elapsed
        );
        event.close();
    }
    if event.is_open() && !assigned {
        let last = event.get_last_token();
        let mut placeholder = Token::placeholder(last.region.clone(), frame_number)
            .with_features(last.features.clone());
        placeholder.class_label = last.class_label.clone();
        event.assign_noprediction(placeholder, ctx.frame.foe)?;
    }
    Ok(())
}

fn worth_fallback(event: &VisualEvent) -> bool {
    event.get_last_token().region.smv() > event.get_params().min_saliency_for_fallback
        || event.get_category() == Category::Interesting
}

/// Makes sure the event has an appearance model seeded on its last region.
/// The model is re-seeded only when it is new or the tracker just switched.
fn prepare_appearance(
    event: &mut VisualEvent,
    ctx: &TrackingContext,
    factory: &AppearanceFactory,
) {
    let created = !event.has_appearance_model();
    if created {
        let model = factory(&event.get_params().appearance, event.get_id());
        event.set_appearance_model(model);
    }
    if !created && !event.tracker_changed() {
        return;
    }
    let image: &RgbImage = ctx.frame.previous_image.unwrap_or(ctx.frame.image);
    let seed = event.get_last_token().region.clone();
    if let Err(err) = event.reset_appearance(image, &seed) {
        warn!("Event {} - appearance reset failed: {}", event.get_id(), err);
    }
}
