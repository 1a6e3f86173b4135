use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::utils::{Point, Rect, Vector2D};

/// Max/min/average luminance over the pixels of a region
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IntensityStats {
    pub max: f32,
    pub min: f32,
    pub avg: f32,
}

/// Central second moments of the region pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SecondMoments {
    pub uxx: f32,
    pub uyy: f32,
    pub uxy: f32,
}

/// A detected foreground blob.
///
/// The binary mask is stored relative to the bounding box, so a region costs
/// its own area in memory rather than a full frame. A region without pixels is
/// invalid and never takes part in association.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Region {
    bbox: Rect,
    mask: Vec<u8>,
    area: u32,
    centroid: Vector2D,
    intensity: Option<IntensityStats>,
    moments: SecondMoments,
    // Saliency map value of the winner that produced this region
    smv: f64,
}

impl Region {
    /// Builds a region from the pixels it covers. Duplicate pixels count once.
    pub fn from_pixels<I: IntoIterator<Item = Point>>(pixels: I) -> Self {
        let pixels: Vec<Point> = pixels.into_iter().collect();
        if pixels.is_empty() {
            return Region::default();
        }
        let left = pixels.iter().map(|p| p.x).min().unwrap_or(0);
        let right = pixels.iter().map(|p| p.x).max().unwrap_or(0);
        let top = pixels.iter().map(|p| p.y).min().unwrap_or(0);
        let bottom = pixels.iter().map(|p| p.y).max().unwrap_or(0);
        let bbox = Rect::from_tlbr(top, left, bottom, right);
        let mut mask = vec![0u8; (bbox.width * bbox.height) as usize];
        for p in &pixels {
            mask[((p.y - top) * bbox.width + (p.x - left)) as usize] = 1;
        }
        let mut region = Region {
            bbox,
            mask,
            ..Region::default()
        };
        region.compute_shape();
        region
    }
    /// Every non-zero pixel of `mask` becomes part of the region
    pub fn from_mask(mask: &GrayImage) -> Self {
        Region::from_pixels(
            mask.enumerate_pixels()
                .filter(|(_, _, p)| p.0[0] != 0)
                .map(|(x, y, _)| Point::new(x as i32, y as i32)),
        )
    }
    /// Solid rectangular region
    pub fn from_rect(rect: Rect) -> Self {
        if !rect.is_valid() {
            return Region::default();
        }
        let mut region = Region {
            bbox: rect,
            mask: vec![1u8; (rect.width * rect.height) as usize],
            ..Region::default()
        };
        region.compute_shape();
        region
    }
    fn compute_shape(&mut self) {
        let (mut n, mut sx, mut sy) = (0u32, 0f64, 0f64);
        for p in self.pixels() {
            n += 1;
            sx += p.x as f64;
            sy += p.y as f64;
        }
        self.area = n;
        if n == 0 {
            *self = Region::default();
            return;
        }
        let (cx, cy) = (sx / n as f64, sy / n as f64);
        self.centroid = Vector2D::new(cx as f32, cy as f32);
        let (mut uxx, mut uyy, mut uxy) = (0f64, 0f64, 0f64);
        for p in self.pixels() {
            let dx = p.x as f64 - cx;
            let dy = p.y as f64 - cy;
            uxx += dx * dx;
            uyy += dy * dy;
            uxy += dx * dy;
        }
        self.moments = SecondMoments {
            uxx: (uxx / n as f64) as f32,
            uyy: (uyy / n as f64) as f32,
            uxy: (uxy / n as f64) as f32,
        };
    }
    pub fn is_valid(&self) -> bool {
        self.area > 0
    }
    pub fn area(&self) -> u32 {
        self.area
    }
    pub fn bounding_box(&self) -> Rect {
        self.bbox
    }
    /// Pixel centroid, rounded to the nearest pixel
    pub fn centroid(&self) -> Point {
        self.centroid.to_point()
    }
    pub fn centroid_xy(&self) -> Vector2D {
        self.centroid
    }
    pub fn dims(&self) -> (i32, i32) {
        (self.bbox.width, self.bbox.height)
    }
    pub fn smv(&self) -> f64 {
        self.smv
    }
    pub fn set_smv(&mut self, smv: f64) {
        self.smv = smv
    }
    pub fn intensity(&self) -> Option<IntensityStats> {
        self.intensity
    }
    /// Average intensity, 0 when intensities were never measured
    pub fn avg_intensity(&self) -> f32 {
        self.intensity.map(|s| s.avg).unwrap_or(0.0)
    }
    pub fn second_moments(&self) -> SecondMoments {
        self.moments
    }
    /// Measures intensity statistics against a luminance image. Pixels outside the image are ignored.
    pub fn set_intensity_from(&mut self, luminance: &GrayImage) {
        let (w, h) = luminance.dimensions();
        let mut stats: Option<IntensityStats> = None;
        let mut sum = 0f64;
        let mut n = 0u32;
        for p in self.pixels() {
            if p.x < 0 || p.y < 0 || p.x as u32 >= w || p.y as u32 >= h {
                continue;
            }
            let v = luminance.get_pixel(p.x as u32, p.y as u32).0[0] as f32;
            sum += v as f64;
            n += 1;
            stats = Some(match stats {
                None => IntensityStats {
                    max: v,
                    min: v,
                    avg: 0.0,
                },
                Some(s) => IntensityStats {
                    max: f32::max(s.max, v),
                    min: f32::min(s.min, v),
                    avg: 0.0,
                },
            });
        }
        self.intensity = stats.map(|s| IntensityStats {
            avg: (sum / n as f64) as f32,
            ..s
        });
    }
    /// Is the pixel at `p` (frame coordinates) part of the region?
    pub fn contains(&self, p: Point) -> bool {
        if !self.bbox.contains(p) {
            return false;
        }
        let idx = (p.y - self.bbox.y) * self.bbox.width + (p.x - self.bbox.x);
        self.mask[idx as usize] != 0
    }
    /// Frame coordinates of every pixel in the region
    pub fn pixels(&self) -> impl Iterator<Item = Point> + '_ {
        let bbox = self.bbox;
        self.mask
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(move |(i, _)| {
                let i = i as i32;
                Point::new(bbox.x + i % bbox.width, bbox.y + i / bbox.width)
            })
    }
    /// Number of pixels shared with `other`
    pub fn intersection_area(&self, other: &Region) -> u32 {
        if !self.is_valid() || !other.is_valid() {
            return 0;
        }
        let overlap = self.bbox.overlap(&other.bbox);
        if !overlap.is_valid() {
            return 0;
        }
        let mut count = 0;
        for y in overlap.top()..=overlap.bottom() {
            for x in overlap.left()..=overlap.right() {
                let p = Point::new(x, y);
                if self.contains(p) && other.contains(p) {
                    count += 1;
                }
            }
        }
        count
    }
    pub fn intersects(&self, other: &Region) -> bool {
        self.intersection_area(other) > 0
    }
    /// Union of the two masks. Saliency and intensity are not carried over.
    pub fn union(&self, other: &Region) -> Region {
        Region::from_pixels(self.pixels().chain(other.pixels()))
    }
    /// Paints the region into `img` with `value`, clipping to the image
    pub fn draw(&self, img: &mut GrayImage, value: u8) {
        let (w, h) = img.dimensions();
        for p in self.pixels() {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < w && (p.y as u32) < h {
                img.put_pixel(p.x as u32, p.y as u32, image::Luma([value]));
            }
        }
    }
    /// Major and minor axis lengths of the equivalent ellipse
    pub fn axes(&self) -> (f32, f32) {
        let SecondMoments { uxx, uyy, uxy } = self.moments;
        let common = f32::sqrt((uxx - uyy) * (uxx - uyy) + 4.0 * uxy * uxy);
        let scale = 2.0 * std::f32::consts::SQRT_2;
        let major = scale * f32::sqrt(f32::max(uxx + uyy + common, 0.0));
        let minor = scale * f32::sqrt(f32::max(uxx + uyy - common, 0.0));
        (major, minor)
    }
    pub fn elongation(&self) -> f32 {
        let (major, minor) = self.axes();
        if minor == 0.0 {
            return 0.0;
        }
        major / minor
    }
    /// Orientation of the major axis in degrees
    pub fn orientation(&self) -> f32 {
        let SecondMoments { uxx, uyy, uxy } = self.moments;
        (0.5 * f32::atan2(2.0 * uxy, uxx - uyy)).to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_rect_region_shape() {
        let r = Region::from_rect(Rect::new(10, 20, 4, 2));
        assert!(r.is_valid());
        assert_eq!(r.area(), 8);
        assert_eq!(r.bounding_box(), Rect::new(10, 20, 4, 2));
        assert!((r.centroid_xy().x - 11.5).abs() < 1e-6);
        assert!((r.centroid_xy().y - 20.5).abs() < 1e-6);
        assert_eq!(r.centroid(), Point::new(12, 21));
    }

    #[test]
    fn test_empty_region_is_invalid() {
        let r = Region::from_pixels(Vec::new());
        assert!(!r.is_valid());
        assert!(!Region::from_rect(Rect::new(0, 0, 0, 5)).is_valid());
        assert_eq!(r.intersection_area(&Region::from_rect(Rect::new(0, 0, 5, 5))), 0);
    }

    #[test]
    fn test_intersection_and_union() {
        let a = Region::from_rect(Rect::new(0, 0, 10, 10));
        let b = Region::from_rect(Rect::new(5, 5, 10, 10));
        assert_eq!(a.intersection_area(&b), 25);
        assert!(a.intersects(&b));
        let u = a.union(&b);
        assert_eq!(u.area(), 175);
        assert_eq!(u.bounding_box(), Rect::new(0, 0, 15, 15));

        let c = Region::from_rect(Rect::new(20, 20, 3, 3));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_from_mask_and_intensity() {
        let mut mask = GrayImage::new(8, 8);
        let mut lum = GrayImage::new(8, 8);
        for (x, y, v) in [(2u32, 2u32, 100u8), (3, 2, 50), (2, 3, 150)] {
            mask.put_pixel(x, y, Luma([1]));
            lum.put_pixel(x, y, Luma([v]));
        }
        let mut r = Region::from_mask(&mask);
        assert_eq!(r.area(), 3);
        assert_eq!(r.avg_intensity(), 0.0);
        r.set_intensity_from(&lum);
        let stats = r.intensity().unwrap();
        assert_eq!(stats.max, 150.0);
        assert_eq!(stats.min, 50.0);
        assert!((stats.avg - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_elongated_region_axes() {
        let r = Region::from_rect(Rect::new(0, 0, 20, 2));
        let (major, minor) = r.axes();
        assert!(major > minor);
        assert!(r.elongation() > 1.0);
        assert!(r.orientation().abs() < 1e-3);
    }
}
