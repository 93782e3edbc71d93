//! Cartesian/polar primitives and the small amount of segment geometry the
//! growth engine needs.

use std::f64::consts::{PI, TAU};

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Norms below this are treated as zero when a direction is required.
pub const ZERO_NORM: f64 = 1e-13;

/// A relative displacement: length `r` along direction `phi` (radians).
///
/// Whether `phi` is absolute or relative to a heading depends on the call it
/// is passed to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Polar {
    pub r: f64,
    pub phi: f64,
}

impl Polar {
    pub const fn new(r: f64, phi: f64) -> Self {
        Self { r, phi }
    }

    /// Polar form of a vector. A zero vector has angle `0`.
    pub fn from_vector(v: DVec2) -> Self {
        Self {
            r: v.length(),
            phi: v.heading().unwrap_or(0.0),
        }
    }

    /// Displacement with `phi` taken as an absolute angle.
    pub fn to_vector(self) -> DVec2 {
        DVec2::new(self.r * self.phi.cos(), self.r * self.phi.sin())
    }

    /// Resolves this offset against `origin`, rotating `phi` by `reference_angle`.
    ///
    /// With `reference_angle` set to a tip heading this gives "advance `r`,
    /// turning `phi` from the current direction".
    pub fn to_point(self, origin: Point, reference_angle: f64) -> Point {
        origin + Polar::new(self.r, self.phi + reference_angle).to_vector()
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self {
            r: self.r * factor,
            phi: self.phi,
        }
    }
}

/// Direction and comparison helpers on top of [`DVec2`].
pub trait PointExt {
    /// Component-wise equality within `tol`.
    fn approx_eq(&self, other: Self, tol: f64) -> bool;

    /// Angle of the vector in (-π, π], `None` for a zero vector.
    fn heading(&self) -> Option<f64>;

    /// Counter-clockwise rotation by `phi`.
    fn rotated(&self, phi: f64) -> Self;

    /// Signed angle turning `self` onto `other`, `None` if either is zero.
    fn signed_angle_to(&self, other: Self) -> Option<f64>;

    /// Polar form of `self - origin`.
    fn polar_from(&self, origin: Self) -> Polar;
}

impl PointExt for DVec2 {
    fn approx_eq(&self, other: Self, tol: f64) -> bool {
        (self.x - other.x).abs() <= tol && (self.y - other.y).abs() <= tol
    }

    fn heading(&self) -> Option<f64> {
        if self.length() < ZERO_NORM {
            None
        } else {
            Some(self.y.atan2(self.x))
        }
    }

    fn rotated(&self, phi: f64) -> Self {
        let (s, c) = phi.sin_cos();
        DVec2::new(self.x * c - self.y * s, self.x * s + self.y * c)
    }

    fn signed_angle_to(&self, other: Self) -> Option<f64> {
        if self.length() < ZERO_NORM || other.length() < ZERO_NORM {
            return None;
        }
        Some(self.perp_dot(other).atan2(self.dot(other)))
    }

    fn polar_from(&self, origin: Self) -> Polar {
        Polar::from_vector(*self - origin)
    }
}

/// Wraps an angle into (-π, π].
pub fn normalize_angle(phi: f64) -> f64 {
    let mut a = phi.rem_euclid(TAU);
    if a > PI {
        a -= TAU;
    }
    a
}

/// Unit vector pointing along `phi`.
#[inline]
pub fn direction(phi: f64) -> DVec2 {
    DVec2::new(phi.cos(), phi.sin())
}

/// Distance from `p` to the closed segment `a`–`b`.
pub fn point_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// Parameter in [0, 1] of the projection of `p` onto `a`–`b`.
pub fn segment_parameter(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 == 0.0 {
        0.0
    } else {
        ((p - a).dot(ab) / len2).clamp(0.0, 1.0)
    }
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b - a).perp_dot(c - a)
}

/// Whether the closed segments `a`–`b` and `c`–`d` share at least one point.
pub fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    // Collinear and touching cases.
    (d1 == 0.0 && point_segment_distance(a, c, d) == 0.0)
        || (d2 == 0.0 && point_segment_distance(b, c, d) == 0.0)
        || (d3 == 0.0 && point_segment_distance(c, a, b) == 0.0)
        || (d4 == 0.0 && point_segment_distance(d, a, b) == 0.0)
}

/// Minimum distance between the closed segments `a`–`b` and `c`–`d`.
pub fn segment_segment_distance(a: Point, b: Point, c: Point, d: Point) -> f64 {
    if segments_intersect(a, b, c, d) {
        return 0.0;
    }
    point_segment_distance(a, c, d)
        .min(point_segment_distance(b, c, d))
        .min(point_segment_distance(c, a, b))
        .min(point_segment_distance(d, a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    #[test]
    fn polar_resolves_relative_to_heading() {
        let origin = Point::new(1.0, 1.0);
        // Heading straight up, turn right by 90 degrees.
        let p = Polar::new(2.0, -PI / 2.0).to_point(origin, PI / 2.0);
        assert!(p.approx_eq(Point::new(3.0, 1.0), TOL), "{p:?}");
    }

    #[test]
    fn polar_round_trips_through_vector() {
        let v = DVec2::new(-3.0, 4.0);
        let polar = Polar::from_vector(v);
        assert!((polar.r - 5.0).abs() < TOL);
        assert!(polar.to_vector().approx_eq(v, TOL));
        assert!(v.polar_from(DVec2::ZERO).to_vector().approx_eq(v, TOL));
    }

    #[test]
    fn heading_of_zero_vector_is_undefined() {
        assert_eq!(DVec2::ZERO.heading(), None);
        assert!((DVec2::new(0.0, -1.0).heading().unwrap() + PI / 2.0).abs() < TOL);
    }

    #[test]
    fn signed_angle_is_counter_clockwise_positive() {
        let x = DVec2::X;
        let y = DVec2::Y;
        assert!((x.signed_angle_to(y).unwrap() - PI / 2.0).abs() < TOL);
        assert!((y.signed_angle_to(x).unwrap() + PI / 2.0).abs() < TOL);
        assert_eq!(x.signed_angle_to(DVec2::ZERO), None);
    }

    #[test]
    fn rotation_preserves_length() {
        let v = DVec2::new(3.0, -2.0);
        let r = v.rotated(1.234);
        assert!((r.length() - v.length()).abs() < TOL);
        assert!(r.rotated(-1.234).approx_eq(v, 1e-12));
    }

    #[test]
    fn normalize_angle_wraps_into_half_open_range() {
        assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(-PI / 2.0 - TAU) + PI / 2.0).abs() < 1e-12);
        assert!(normalize_angle(0.0).abs() < 1e-12);
    }

    #[test]
    fn point_segment_distance_clamps_to_endpoints() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(1.0, 0.0);
        assert!((point_segment_distance(Point::new(0.5, 2.0), a, b) - 2.0).abs() < TOL);
        assert!((point_segment_distance(Point::new(4.0, 4.0), a, b) - 5.0).abs() < TOL);
        assert!((segment_parameter(Point::new(0.25, 7.0), a, b) - 0.25).abs() < TOL);
    }

    #[test]
    fn crossing_and_touching_segments_intersect() {
        let o = Point::ZERO;
        assert!(segments_intersect(
            o,
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
            Point::new(2.0, 0.0)
        ));
        // T-junction.
        assert!(segments_intersect(
            o,
            Point::new(2.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0)
        ));
        assert!(!segments_intersect(
            o,
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0)
        ));
    }

    #[test]
    fn parallel_segments_report_their_gap() {
        let d = segment_segment_distance(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 0.5),
            Point::new(1.0, 0.5),
        );
        assert!((d - 0.5).abs() < TOL);
    }
}
