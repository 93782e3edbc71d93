use std::f64::consts::{PI, TAU};

use glam::DVec2;
use rand::Rng;

use crate::{point::PointExt, types::Point};

/// One quadrature point of a [`Stencil`], expressed in the tip frame:
/// `offset.x` points along the tip heading, `offset.y` to its left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilPoint {
    pub offset: DVec2,
    pub weight: f64,
}

impl StencilPoint {
    /// Which side of the heading this point samples.
    pub fn side(&self) -> Side {
        if self.offset.y > 0.0 {
            Side::Left
        } else if self.offset.y < 0.0 {
            Side::Right
        } else {
            Side::Ahead
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Ahead,
}

/// Radial weight `exp(-(r / weight_radius)^exponent)`.
pub fn weight_function(r: f64, weight_radius: f64, exponent: f64) -> f64 {
    (-(r / weight_radius).powf(exponent)).exp()
}

/// Weighted sampling points around a tip, used to integrate the field over a
/// disk centred on it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stencil {
    pub points: Vec<StencilPoint>,
}

impl Stencil {
    pub fn from_points(points: Vec<StencilPoint>) -> Self {
        Self { points }
    }

    /// Midpoint rule on a polar grid of `rings × sectors` cells covering the
    /// disk of `radius`. Each weight is the cell area times the radial weight.
    ///
    /// Sector centres are offset by half a sector, so for an even `sectors`
    /// no point lies on the heading line and left and right are mirror images.
    pub fn polar_grid(
        radius: f64,
        rings: usize,
        sectors: usize,
        weight_radius: f64,
        exponent: f64,
    ) -> Self {
        if rings == 0 || sectors == 0 {
            return Self::default();
        }
        let dr = radius / rings as f64;
        let dphi = TAU / sectors as f64;
        let points = (0..rings)
            .flat_map(|i| {
                let r = dr * (i as f64 + 0.5);
                let w = weight_function(r, weight_radius, exponent) * r * dr * dphi;
                (0..sectors).map(move |j| {
                    let phi = -PI + dphi * (j as f64 + 0.5);
                    StencilPoint {
                        offset: DVec2::new(r * phi.cos(), r * phi.sin()),
                        weight: w,
                    }
                })
            })
            .collect();
        Self { points }
    }

    /// Monte-Carlo rule: `count` points uniform in the disk of `radius`, each
    /// weighted by the radial weight times `area / count`.
    pub fn random_in_disk(
        count: usize,
        radius: f64,
        weight_radius: f64,
        exponent: f64,
        rng: &mut impl Rng,
    ) -> Self {
        if count == 0 {
            return Self::default();
        }
        let cell = PI * radius * radius / count as f64;
        let points = (0..count)
            .map(|_| {
                // sqrt keeps the density uniform in area.
                let r = radius * rng.random_range(0.0..=1.0f64).sqrt();
                let phi = rng.random_range(-PI..PI);
                StencilPoint {
                    offset: DVec2::new(r * phi.cos(), r * phi.sin()),
                    weight: weight_function(r, weight_radius, exponent) * cell,
                }
            })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.points.iter().map(|p| p.weight).sum()
    }

    /// World positions of the stencil placed at `tip` facing `heading`.
    pub fn place(
        &self,
        tip: Point,
        heading: f64,
    ) -> impl Iterator<Item = (Point, &StencilPoint)> + '_ {
        self.points
            .iter()
            .map(move |sp| (tip + sp.offset.rotated(heading), sp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn polar_grid_is_mirror_symmetric() {
        let s = Stencil::polar_grid(1.0, 3, 8, 0.5, 2.0);
        assert_eq!(s.len(), 24);
        let left: f64 = s
            .points
            .iter()
            .filter(|p| p.side() == Side::Left)
            .map(|p| p.weight)
            .sum();
        let right: f64 = s
            .points
            .iter()
            .filter(|p| p.side() == Side::Right)
            .map(|p| p.weight)
            .sum();
        assert!((left - right).abs() < 1e-12);
        assert!(s.points.iter().all(|p| p.side() != Side::Ahead));
    }

    #[test]
    fn flat_weight_integrates_disk_area() {
        // A huge weight radius makes the weight function ~1.
        let s = Stencil::polar_grid(2.0, 10, 32, 1e9, 2.0);
        assert!((s.total_weight() - PI * 4.0).abs() < 1e-6);
    }

    #[test]
    fn empty_grid_for_zero_cells() {
        assert!(Stencil::polar_grid(1.0, 0, 8, 1.0, 2.0).is_empty());
        assert!(Stencil::polar_grid(1.0, 4, 0, 1.0, 2.0).is_empty());
    }

    #[test]
    fn random_disk_stays_inside_radius_and_is_reproducible() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let s1 = Stencil::random_in_disk(200, 0.5, 0.2, 2.0, &mut a);
        let s2 = Stencil::random_in_disk(200, 0.5, 0.2, 2.0, &mut b);
        assert_eq!(s1, s2);
        assert!(s1.points.iter().all(|p| p.offset.length() <= 0.5 + 1e-12));
        assert!(s1.points.iter().all(|p| p.weight > 0.0));
    }

    #[test]
    fn placement_rotates_into_heading() {
        let s = Stencil::from_points(vec![StencilPoint {
            offset: DVec2::new(1.0, 0.0),
            weight: 1.0,
        }]);
        let (p, _) = s.place(Point::new(2.0, 3.0), PI / 2.0).next().unwrap();
        assert!(p.approx_eq(Point::new(2.0, 4.0), 1e-12));
    }

    #[test]
    fn weight_function_decays() {
        assert_eq!(weight_function(0.0, 1.0, 2.0), 1.0);
        assert!(weight_function(2.0, 1.0, 2.0) < weight_function(1.0, 1.0, 2.0));
    }
}
