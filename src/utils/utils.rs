use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Axis-aligned integer rectangle. `x`/`y` is the top-left corner,
/// `bottom()`/`right()` are inclusive like pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }
    /// Builds a rectangle from inclusive top/left/bottom/right coordinates
    pub fn from_tlbr(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Rect {
            x: left,
            y: top,
            width: right - left + 1,
            height: bottom - top + 1,
        }
    }
    /// Rectangle of the given dimensions centered on `center`
    pub fn center_dims(center: Point, width: i32, height: i32) -> Self {
        Rect {
            x: center.x - width / 2,
            y: center.y - height / 2,
            width,
            height,
        }
    }
    /// Full image rectangle
    pub fn from_dims(width: u32, height: u32) -> Self {
        Rect::new(0, 0, width as i32, height as i32)
    }
    pub fn top(&self) -> i32 {
        self.y
    }
    pub fn left(&self) -> i32 {
        self.x
    }
    pub fn bottom(&self) -> i32 {
        self.y + self.height - 1
    }
    pub fn right(&self) -> i32 {
        self.x + self.width - 1
    }
    pub fn area(&self) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        self.width as i64 * self.height as i64
    }
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left() && p.x <= self.right() && p.y >= self.top() && p.y <= self.bottom()
    }
    /// Intersection of two rectangles; an invalid (empty) rectangle when they do not overlap
    pub fn overlap(&self, other: &Rect) -> Rect {
        let left = i32::max(self.left(), other.left());
        let top = i32::max(self.top(), other.top());
        let right = i32::min(self.right(), other.right());
        let bottom = i32::min(self.bottom(), other.bottom());
        if right < left || bottom < top {
            return Rect::default();
        }
        Rect::from_tlbr(top, left, bottom, right)
    }
    pub fn intersects(&self, other: &Rect) -> bool {
        self.overlap(other).is_valid()
    }
    /// Same center, both sides set to the larger side times `scale`
    pub fn squarify(&self, scale: f32) -> Rect {
        let side = (i32::max(self.width, self.height) as f32 * scale).round() as i32;
        Rect::center_dims(self.center(), side, side)
    }
    /// Grows the rectangle by `margin` pixels on every side
    pub fn inflate(&self, margin: i32) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + 2 * margin,
            self.height + 2 * margin,
        )
    }
    pub fn recenter(&self, center: Point) -> Rect {
        Rect::center_dims(center, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Float 2-D vector used for filtered locations, predictions and trajectory directions
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2D {
    pub x: f32,
    pub y: f32,
}

impl Vector2D {
    pub fn new(x: f32, y: f32) -> Self {
        Vector2D { x, y }
    }
    pub fn length(&self) -> f32 {
        f32::sqrt(self.x * self.x + self.y * self.y)
    }
    pub fn dot(&self, other: &Vector2D) -> f32 {
        self.x * other.x + self.y * other.y
    }
    /// Angle between two vectors in degrees; 0 when either vector has no length
    pub fn angle(&self, other: &Vector2D) -> f32 {
        let norm = self.length() * other.length();
        if norm == 0.0 {
            return 0.0;
        }
        let cos = (self.dot(other) / norm).clamp(-1.0, 1.0);
        cos.acos().to_degrees()
    }
    /// Rounds to the nearest pixel the same way predicted locations are rounded
    pub fn to_point(&self) -> Point {
        Point::new((self.x + 0.5).floor() as i32, (self.y + 0.5).floor() as i32)
    }
}

impl From<Point> for Vector2D {
    fn from(p: Point) -> Self {
        Vector2D::new(p.x as f32, p.y as f32)
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;
    fn sub(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Add for Vector2D {
    type Output = Vector2D;
    fn add(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

/// Straight trajectory line through `point` along `direction`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Line {
    pub point: Vector2D,
    pub direction: Vector2D,
}

impl Line {
    pub fn new(point: Vector2D, direction: Vector2D) -> Self {
        Line { point, direction }
    }
}

pub fn euclidean_distance(p1: &Point, p2: &Point) -> f32 {
    let x_squared = i32::pow(i32::abs(p1.x - p2.x), 2);
    let y_squared = i32::pow(i32::abs(p1.y - p2.y), 2);
    let sum_f32 = (x_squared + y_squared) as f32;
    f32::sqrt(sum_f32)
}
