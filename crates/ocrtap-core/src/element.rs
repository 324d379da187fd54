//! Shared geometry and element types.
//!
//! [`Frame`] is used for both OCR bounding boxes (in screenshot pixels) and
//! WebDriverAgent element rects (in screen points). [`ElementRef`] is the
//! opaque id WDA hands back from element lookups.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// W3C WebDriver element key.
pub const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Legacy JSON Wire Protocol element key.
pub const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

/// A point on screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Rounds to the integer coordinates WDA gesture endpoints take.
    pub fn rounded(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

/// Window dimensions in screen points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn center(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }
}

/// An axis-aligned rectangle.
///
/// The origin is the top-left corner of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// The x-coordinate of the top-left corner.
    pub x: f64,
    /// The y-coordinate of the top-left corner.
    pub y: f64,
    /// Width of the rectangle.
    pub width: f64,
    /// Height of the rectangle.
    pub height: f64,
}

impl Frame {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a frame from two opposite corners in any order.
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        let (left, right) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let (top, bottom) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        Self::new(left, top, right - left, bottom - top)
    }

    /// Axis-aligned bounding box of a polygon. Returns `None` for no points.
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::from_corners(min_x, min_y, max_x, max_y))
    }

    /// The tap point for this rectangle.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Divides every component by `factor`, e.g. to map screenshot pixels to
    /// screen points on a 3x display.
    pub fn scaled(&self, factor: f64) -> Self {
        if factor <= 0.0 || !factor.is_finite() {
            return *self;
        }
        Self::new(
            self.x / factor,
            self.y / factor,
            self.width / factor,
            self.height / factor,
        )
    }
}

/// Opaque element id returned by WDA element lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef(pub String);

impl ElementRef {
    /// Extracts the id from a lookup result object, accepting both the W3C and
    /// the legacy key.
    pub fn from_value(value: &Value) -> Option<Self> {
        value
            .get(W3C_ELEMENT_KEY)
            .or_else(|| value.get(LEGACY_ELEMENT_KEY))
            .and_then(Value::as_str)
            .map(|id| ElementRef(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_center() {
        let frame = Frame::new(10.0, 20.0, 100.0, 40.0);
        assert_eq!(frame.center(), Point::new(60.0, 40.0));
    }

    #[test]
    fn frame_from_corners_normalises() {
        let frame = Frame::from_corners(50.0, 80.0, 10.0, 20.0);
        assert_eq!(frame, Frame::new(10.0, 20.0, 40.0, 60.0));
    }

    #[test]
    fn frame_from_rotated_quad() {
        let quad = [
            Point::new(12.0, 30.0),
            Point::new(90.0, 25.0),
            Point::new(92.0, 50.0),
            Point::new(10.0, 55.0),
        ];
        let frame = Frame::from_points(&quad).unwrap();
        assert_eq!(frame, Frame::new(10.0, 25.0, 82.0, 30.0));
    }

    #[test]
    fn frame_from_no_points() {
        assert!(Frame::from_points(&[]).is_none());
    }

    #[test]
    fn frame_scaled_by_display_factor() {
        let frame = Frame::new(300.0, 600.0, 90.0, 30.0).scaled(3.0);
        assert_eq!(frame, Frame::new(100.0, 200.0, 30.0, 10.0));
        assert_eq!(frame.center().rounded(), (115, 205));
    }

    #[test]
    fn frame_scaled_ignores_bad_factor() {
        let frame = Frame::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(frame.scaled(0.0), frame);
        assert_eq!(frame.scaled(f64::NAN), frame);
    }

    #[test]
    fn point_rounding() {
        assert_eq!(Point::new(10.5, 19.4).rounded(), (11, 19));
    }

    #[test]
    fn element_ref_w3c_key() {
        let value = json!({ W3C_ELEMENT_KEY: "abc-123" });
        assert_eq!(ElementRef::from_value(&value), Some(ElementRef("abc-123".into())));
    }

    #[test]
    fn element_ref_legacy_key() {
        let value = json!({ "ELEMENT": "legacy-1" });
        assert_eq!(ElementRef::from_value(&value).unwrap().as_str(), "legacy-1");
    }

    #[test]
    fn element_ref_missing_key() {
        assert!(ElementRef::from_value(&json!({ "other": "x" })).is_none());
    }
}
