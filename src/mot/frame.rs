use image::{imageops, GrayImage, RgbImage};

use crate::utils::{Point, Rect, Vector2D};

/// Everything the trackers may look at for one frame
pub struct FrameData<'a> {
    pub frame_number: u32,
    /// Colour frame
    pub image: &'a RgbImage,
    /// Segmented frame. Non-zero pixels are foreground, equal values form one segment.
    pub segment_image: &'a GrayImage,
    /// Previous colour frame, used to seed an appearance model on a tracker switch
    pub previous_image: Option<&'a RgbImage>,
    /// Zero pixels are excluded from tracking
    pub mask: Option<&'a GrayImage>,
    /// Focus of expansion
    pub foe: Option<Vector2D>,
    luminance: GrayImage,
}

impl<'a> FrameData<'a> {
    pub fn new(frame_number: u32, image: &'a RgbImage, segment_image: &'a GrayImage) -> Self {
        FrameData {
            frame_number,
            image,
            segment_image,
            previous_image: None,
            mask: None,
            foe: None,
            luminance: imageops::grayscale(image),
        }
    }
    pub fn with_previous_image(mut self, previous_image: &'a RgbImage) -> Self {
        self.previous_image = Some(previous_image);
        self
    }
    pub fn with_mask(mut self, mask: &'a GrayImage) -> Self {
        self.mask = Some(mask);
        self
    }
    pub fn with_foe(mut self, foe: Vector2D) -> Self {
        self.foe = Some(foe);
        self
    }
    pub fn luminance(&self) -> &GrayImage {
        &self.luminance
    }
    /// Size shared by the colour and the segmented frame
    pub fn dims(&self) -> (u32, u32) {
        let (w, h) = self.image.dimensions();
        let (sw, sh) = self.segment_image.dimensions();
        (u32::min(w, sw), u32::min(h, sh))
    }
    /// Whole-frame rectangle
    pub fn bounds(&self) -> Rect {
        let (w, h) = self.dims();
        Rect::from_dims(w, h)
    }
    /// True when the exclusion mask removes `p`. Pixels outside the mask count as excluded.
    pub fn is_masked(&self, p: Point) -> bool {
        match self.mask {
            None => false,
            Some(mask) => {
                let (w, h) = mask.dimensions();
                if p.x < 0 || p.y < 0 || p.x as u32 >= w || p.y as u32 >= h {
                    return true;
                }
                mask.get_pixel(p.x as u32, p.y as u32).0[0] == 0
            }
        }
    }
}
