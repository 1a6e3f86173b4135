//! Synthetic scenes for tests
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::mot::mot_errors::AppearanceError;
use crate::mot::{AppearanceModel, DetectionParameters, Region, Token, VisualEvent};
use crate::utils::Rect;

/// Black colour frame and empty segmentation of the given size
pub fn blank_frame(width: u32, height: u32) -> (RgbImage, GrayImage) {
    (RgbImage::new(width, height), GrayImage::new(width, height))
}

/// Grey square of intensity `value` in the colour frame, foreground in the segmentation
pub fn draw_square(image: &mut RgbImage, segment: &mut GrayImage, rect: Rect, value: u8) {
    let (w, h) = image.dimensions();
    for y in rect.top()..=rect.bottom() {
        for x in rect.left()..=rect.right() {
            if x < 0 || y < 0 || x as u32 >= w || y as u32 >= h {
                continue;
            }
            image.put_pixel(x as u32, y as u32, Rgb([value, value, value]));
            segment.put_pixel(x as u32, y as u32, Luma([255]));
        }
    }
}

/// Square with a colour pattern fixed to its top-left corner, so the
/// texture moves with it
pub fn draw_textured_square(image: &mut RgbImage, segment: &mut GrayImage, rect: Rect) {
    let (w, h) = image.dimensions();
    for j in 0..rect.height {
        for i in 0..rect.width {
            let (x, y) = (rect.x + i, rect.y + j);
            if x < 0 || y < 0 || x as u32 >= w || y as u32 >= h {
                continue;
            }
            let r = 40 + (i * 29 + j * 13) % 180;
            let g = 40 + (i * i + j * 7) % 180;
            let b = if (i / 4 + j / 4) % 2 == 0 { 60 } else { 210 };
            image.put_pixel(x as u32, y as u32, Rgb([r as u8, g as u8, b as u8]));
            segment.put_pixel(x as u32, y as u32, Luma([255]));
        }
    }
}

/// One square moving by `step` pixels per frame
pub fn moving_square(
    frames: u32,
    start: Rect,
    step: (i32, i32),
    width: u32,
    height: u32,
) -> Vec<(RgbImage, GrayImage, Rect)> {
    (0..frames as i32)
        .map(|i| {
            let rect = Rect::new(start.x + i * step.0, start.y + i * step.1, start.width, start.height);
            let (mut image, mut segment) = blank_frame(width, height);
            draw_square(&mut image, &mut segment, rect, 200);
            (image, segment, rect)
        })
        .collect()
}

/// New event seeded with a solid `rect` at frame 0
pub fn seed_event(id: u32, rect: Rect, params: Arc<DetectionParameters>) -> VisualEvent {
    VisualEvent::new(id, Token::new(Region::from_rect(rect), 0), params)
}

/// Appearance model that "finds" the search window, shifted by `offset`,
/// or fails with `fail_with`. Counts its resets.
#[derive(Debug, Clone, Default)]
pub struct StubAppearance {
    pub fail_with: Option<AppearanceError>,
    pub offset: (i32, i32),
    pub resets: Arc<AtomicUsize>,
}

impl AppearanceModel for StubAppearance {
    fn reset(&mut self, _image: &RgbImage, _seed: &Region, _decay: f32) -> Result<(), AppearanceError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn update(
        &mut self,
        _image: &RgbImage,
        search: Rect,
        _occluders: &[&Region],
        _decay: f32,
    ) -> Result<Region, AppearanceError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let (dx, dy) = self.offset;
        Ok(Region::from_rect(Rect::new(
            search.x + dx,
            search.y + dy,
            search.width,
            search.height,
        )))
    }
    fn forget(&mut self, _decay: f32) {}
}
