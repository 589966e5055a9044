//! Points and axis-aligned bounding boxes over two spatial axes and one
//! temporal axis.

use crate::proto;

/// A location in space and time.
///
/// `x` is the first spatial axis (latitude for geographic data), `y` the
/// second (longitude), `time` a signed timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub time: i64,
}

impl Point3 {
    #[must_use]
    pub const fn new(x: f32, y: f32, time: i64) -> Self {
        Self { x, y, time }
    }
}

impl From<proto::Point> for Point3 {
    fn from(p: proto::Point) -> Self {
        Self::new(p.x, p.y, p.time)
    }
}

impl From<Point3> for proto::Point {
    fn from(p: Point3) -> Self {
        Self {
            x: p.x,
            y: p.y,
            time: p.time,
        }
    }
}

/// Minimal axis-aligned box enclosing a set of points.
///
/// # Invariants
///
/// - `min.x <= max.x`, `min.y <= max.y`, `min.time <= max.time` for every
///   box produced by the constructors in this module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point3,
    pub max: Point3,
}

impl BoundingBox {
    /// Build a box from two corners.
    ///
    /// # Errors
    ///
    /// Returns a description of the first inverted axis if `min > max` on
    /// any axis.
    pub fn new(min: Point3, max: Point3) -> Result<Self, String> {
        if min.x > max.x {
            return Err(format!("min x {} is greater than max x {}", min.x, max.x));
        }
        if min.y > max.y {
            return Err(format!("min y {} is greater than max y {}", min.y, max.y));
        }
        if min.time > max.time {
            return Err(format!(
                "min time {} is greater than max time {}",
                min.time, max.time
            ));
        }
        Ok(Self { min, max })
    }

    /// The degenerate box covering a single point.
    #[must_use]
    pub const fn from_point(p: Point3) -> Self {
        Self { min: p, max: p }
    }

    /// Whether `p` lies inside the box (boundaries inclusive).
    #[must_use]
    pub fn contains_point(&self, p: &Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.time >= self.min.time
            && p.time <= self.max.time
    }

    /// Whether `other` lies entirely inside this box.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.contains_point(&other.min) && self.contains_point(&other.max)
    }

    /// Whether the two boxes share at least one point.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.time <= other.max.time
            && other.min.time <= self.max.time
    }

    /// The smallest box covering both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: Point3 {
                x: self.min.x.min(other.min.x),
                y: self.min.y.min(other.min.y),
                time: self.min.time.min(other.min.time),
            },
            max: Point3 {
                x: self.max.x.max(other.max.x),
                y: self.max.y.max(other.max.y),
                time: self.max.time.max(other.max.time),
            },
        }
    }

    /// Grow the box in place to cover `other`.
    pub fn expand(&mut self, other: &Self) {
        *self = self.union(other);
    }

    /// Sum of the edge lengths. Non-zero for flat boxes, whose volume is 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn margin(&self) -> f64 {
        f64::from(self.max.x - self.min.x)
            + f64::from(self.max.y - self.min.y)
            + self.max.time.abs_diff(self.min.time) as f64
    }

    /// How much the margin grows if the box is extended to cover `other`.
    #[must_use]
    pub fn enlargement(&self, other: &Self) -> f64 {
        self.union(other).margin() - self.margin()
    }
}
