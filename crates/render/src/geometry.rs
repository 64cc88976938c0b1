//! Canvas geometry primitives
//!
//! Points, sizes and axis-aligned rectangles in mosaic canvas coordinates.
//! The origin is the top-left corner of the canvas; `y` grows downwards.

use serde::{Deserialize, Serialize};

/// A point in canvas coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A width/height pair in canvas pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Axis-aligned rectangle
///
/// Stored as origin (top-left) plus size. A rectangle with a non-positive
/// width or height is empty and intersects nothing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: f64,

    /// Top edge
    pub y: f64,

    /// Horizontal extent
    pub width: f64,

    /// Vertical extent
    pub height: f64,
}

impl Rect {
    /// Create a rectangle from its top-left corner and size
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Create a rectangle centered at `center` with the given `size`
    pub fn centered(center: Point, size: Size) -> Self {
        Self {
            x: center.x - size.width / 2.0,
            y: center.y - size.height / 2.0,
            width: size.width,
            height: size.height,
        }
    }

    pub fn min_x(&self) -> f64 {
        self.x
    }

    pub fn min_y(&self) -> f64 {
        self.y
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Shrink the rectangle by `dx` on the left and right and `dy` on the
    /// top and bottom. Negative values grow it.
    pub fn inset_by(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width - 2.0 * dx,
            height: self.height - 2.0 * dy,
        }
    }

    /// Translate the rectangle by `(dx, dy)`
    pub fn offset_by(&self, dx: f64, dy: f64) -> Self {
        Self { x: self.x + dx, y: self.y + dy, ..*self }
    }

    /// Strict intersection test
    ///
    /// Rectangles that only share an edge do not intersect, and an empty
    /// rectangle never intersects anything.
    pub fn intersects(&self, other: &Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }

        self.min_x() < other.max_x()
            && other.min_x() < self.max_x()
            && self.min_y() < other.max_y()
            && other.min_y() < self.max_y()
    }

    /// Returns `true` if `point` lies inside the half-open rectangle
    pub fn contains_point(&self, point: Point) -> bool {
        point.x >= self.min_x()
            && point.x < self.max_x()
            && point.y >= self.min_y()
            && point.y < self.max_y()
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Self {
        let min_x = self.min_x().min(other.min_x());
        let min_y = self.min_y().min(other.min_y());
        let max_x = self.max_x().max(other.max_x());
        let max_y = self.max_y().max(other.max_y());
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_rect() {
        let rect = Rect::centered(Point::new(128.0, 64.0), Size::new(256.0, 128.0));
        assert_eq!(rect, Rect::new(0.0, 0.0, 256.0, 128.0));
        assert_eq!(rect.center(), Point::new(128.0, 64.0));
    }

    #[test]
    fn test_negative_inset_grows_symmetrically() {
        let rect = Rect::new(0.0, 0.0, 512.0, 512.0).inset_by(-256.0, -128.0);
        assert_eq!(rect, Rect::new(-256.0, -128.0, 1024.0, 768.0));
    }

    #[test]
    fn test_touching_edges_do_not_intersect() {
        let left = Rect::new(0.0, 0.0, 256.0, 256.0);
        let right = Rect::new(256.0, 0.0, 256.0, 256.0);
        let overlapping = Rect::new(255.0, 255.0, 10.0, 10.0);

        assert!(!left.intersects(&right));
        assert!(left.intersects(&overlapping));
        assert!(right.intersects(&overlapping));
    }

    #[test]
    fn test_empty_rect_intersects_nothing() {
        let empty = Rect::new(10.0, 10.0, 0.0, 50.0);
        let big = Rect::new(0.0, 0.0, 100.0, 100.0);

        assert!(empty.is_empty());
        assert!(!empty.intersects(&big));
        assert!(!big.intersects(&empty));
    }

    #[test]
    fn test_union_and_contains() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 5.0, 10.0, 10.0);
        let union = a.union(&b);

        assert_eq!(union, Rect::new(0.0, 0.0, 30.0, 15.0));
        assert!(union.contains_point(Point::new(25.0, 14.0)));
        assert!(!union.contains_point(Point::new(30.0, 0.0)));
    }

    #[test]
    fn test_offset() {
        let rect = Rect::new(10.0, 20.0, 5.0, 5.0).offset_by(-10.0, 5.0);
        assert_eq!(rect, Rect::new(0.0, 25.0, 5.0, 5.0));
    }
}
