//! Plane geometry shared by the loader, the flattener and the connectivity pass.
//!
//! Sheet coordinates are millimetres with Y growing downward; library symbol
//! coordinates have Y growing upward. Rotations are in degrees,
//! counter-clockwise as seen on screen.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Two points closer than this on both axes are coincident (mm).
pub const COINCIDENCE_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Coincidence test used everywhere a connection depends on position.
    pub fn coincident(&self, other: &Point, epsilon: f64) -> bool {
        (self.x - other.x).abs() <= epsilon && (self.y - other.y).abs() <= epsilon
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset(&self, by: Point) -> Point {
        Point::new(self.x + by.x, self.y + by.y)
    }

    /// Rotate about the origin in sheet space (Y down).
    pub fn rotated(&self, degrees: f64) -> Point {
        let (cos, sin) = rotation_terms(degrees);
        // Y points down, so a screen-CCW turn is a clockwise turn in math terms.
        Point::new(self.x * cos + self.y * sin, -self.x * sin + self.y * cos)
    }

    /// True when the point lies on the segment `start..end` within `epsilon`.
    pub fn on_segment(&self, start: &Point, end: &Point, epsilon: f64) -> bool {
        let dx = end.x - start.x;
        let dy = end.y - start.y;
        let length_sq = dx * dx + dy * dy;

        if length_sq < 1e-12 {
            return self.coincident(start, epsilon);
        }

        let t = ((self.x - start.x) * dx + (self.y - start.y) * dy) / length_sq;
        let t = t.clamp(0.0, 1.0);
        let projected = Point::new(start.x + t * dx, start.y + t * dy);
        self.coincident(&projected, epsilon)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", round4(self.x), round4(self.y))
    }
}

/// Round to the 0.0001 mm resolution of the file format.
pub fn round4(value: f64) -> f64 {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Normalize an angle to `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let d = degrees % 360.0;
    let d = if d < 0.0 { d + 360.0 } else { d };
    if (d - 360.0).abs() < 1e-9 {
        0.0
    } else {
        d
    }
}

/// Exact terms for quarter turns so that pin positions land on the grid.
fn rotation_terms(degrees: f64) -> (f64, f64) {
    let d = normalize_degrees(degrees);
    for (quarter, terms) in [(0.0, (1.0, 0.0)), (90.0, (0.0, 1.0)), (180.0, (-1.0, 0.0)), (270.0, (0.0, -1.0))] {
        if (d - quarter).abs() < 1e-9 {
            return terms;
        }
    }
    let rad = d.to_radians();
    (rad.cos(), rad.sin())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mirror {
    #[default]
    None,
    /// Mirrored about the X axis (flipped vertically).
    X,
    /// Mirrored about the Y axis (flipped horizontally).
    Y,
}

impl Mirror {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "x" => Some(Mirror::X),
            "y" => Some(Mirror::Y),
            _ => None,
        }
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mirror::None => write!(f, "none"),
            Mirror::X => write!(f, "x"),
            Mirror::Y => write!(f, "y"),
        }
    }
}

/// Placement of a library symbol on a sheet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub origin: Point,
    pub rotation: f64,
    pub mirror: Mirror,
}

impl Placement {
    /// Map a library-space offset (Y up) to an absolute sheet position.
    pub fn apply(&self, local: Point) -> Point {
        let mut p = Point::new(local.x, -local.y);
        match self.mirror {
            Mirror::None => {}
            Mirror::X => p.y = -p.y,
            Mirror::Y => p.x = -p.x,
        }
        p.rotated(self.rotation).offset(self.origin)
    }
}

/// Rigid transform from a sheet's own coordinates into the flattened design.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub rotation: f64,
    pub offset: Point,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        rotation: 0.0,
        offset: Point::new(0.0, 0.0),
    };

    pub fn new(offset: Point, rotation: f64) -> Self {
        Self { rotation, offset }
    }

    pub fn apply(&self, p: Point) -> Point {
        p.rotated(self.rotation).offset(self.offset)
    }

    /// `self` applied after `inner`.
    pub fn compose(&self, inner: &Transform) -> Transform {
        Transform {
            rotation: normalize_degrees(self.rotation + inner.rotation),
            offset: self.apply(inner.offset),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
