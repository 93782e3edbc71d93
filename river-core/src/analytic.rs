//! Closed-form stand-ins for the external field solver.
//!
//! Neither solver integrates a PDE. [`UniformSolver`] returns a constant
//! gradient everywhere; [`SinkSolver`] superposes a logarithmic sink at every
//! river vertex of the mesh on top of a background gradient.

use std::f64::consts::TAU;

use glam::DVec2;

use crate::{
    error::CollaboratorError,
    field::{BoundaryProblem, Field, FieldSolver},
    mesh::Mesh,
    types::Point,
};

/// `u(p) = offset + gradient · p`, defined everywhere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UniformField {
    pub gradient: DVec2,
    pub offset: f64,
}

impl Field for UniformField {
    fn value(&self, p: Point) -> Option<f64> {
        Some(self.offset + self.gradient.dot(p))
    }

    fn gradient(&self, _p: Point) -> Option<DVec2> {
        Some(self.gradient)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UniformSolver {
    pub gradient: DVec2,
}

impl UniformSolver {
    pub fn new(gradient: DVec2) -> Self {
        Self { gradient }
    }
}

impl FieldSolver for UniformSolver {
    type Field = UniformField;

    fn solve(
        &mut self,
        _mesh: &Mesh,
        _problem: &BoundaryProblem,
    ) -> Result<UniformField, CollaboratorError> {
        Ok(UniformField {
            gradient: self.gradient,
            offset: 0.0,
        })
    }
}

/// Sum of `strength / 2π · ln|p - s|` over the sinks plus `background · p`.
///
/// Supported on the bounding box of the mesh it was solved on. Within `core`
/// of a sink the logarithm is flattened so the field stays finite.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkField {
    pub sinks: Vec<Point>,
    pub strength: f64,
    pub background: DVec2,
    pub core: f64,
    pub bounds: Option<(Point, Point)>,
}

impl SinkField {
    fn supports(&self, p: Point) -> bool {
        const SLACK: f64 = 1e-9;
        match self.bounds {
            None => true,
            Some((lo, hi)) => {
                let lo = lo - Point::splat(SLACK);
                let hi = hi + Point::splat(SLACK);
                p.cmpge(lo).all() && p.cmple(hi).all()
            }
        }
    }
}

impl Field for SinkField {
    fn value(&self, p: Point) -> Option<f64> {
        if !self.supports(p) {
            return None;
        }
        let core2 = self.core * self.core;
        let sinks: f64 = self
            .sinks
            .iter()
            .map(|&s| 0.5 * (p - s).length_squared().max(core2).ln())
            .sum();
        Some(self.background.dot(p) + self.strength / TAU * sinks)
    }

    fn gradient(&self, p: Point) -> Option<DVec2> {
        if !self.supports(p) {
            return None;
        }
        let core2 = self.core * self.core;
        let sinks: DVec2 = self
            .sinks
            .iter()
            .map(|&s| {
                let d = p - s;
                d / d.length_squared().max(core2)
            })
            .sum();
        Some(self.background + sinks * (self.strength / TAU))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SinkSolver {
    pub strength: f64,
    pub background: DVec2,
    pub core: f64,
}

impl Default for SinkSolver {
    fn default() -> Self {
        Self {
            strength: 1.0,
            background: DVec2::Y,
            core: 1e-3,
        }
    }
}

impl FieldSolver for SinkSolver {
    type Field = SinkField;

    fn solve(
        &mut self,
        mesh: &Mesh,
        _problem: &BoundaryProblem,
    ) -> Result<SinkField, CollaboratorError> {
        if !(self.core > 0.0) {
            return Err(format!("sink core radius must be positive, got {}", self.core).into());
        }
        Ok(SinkField {
            sinks: mesh.river_points().collect(),
            strength: self.strength,
            background: self.background,
            core: self.core,
            bounds: mesh.bounds(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{boundary::Marker, mesh::MeshVertex};

    fn mesh_with(points: &[(f64, f64, Marker)]) -> Mesh {
        Mesh {
            vertices: points
                .iter()
                .map(|&(x, y, marker)| MeshVertex {
                    point: Point::new(x, y),
                    marker,
                    branch: None,
                })
                .collect(),
            ..Mesh::default()
        }
    }

    #[test]
    fn uniform_field_is_linear() {
        let mut solver = UniformSolver::new(DVec2::new(0.0, 2.0));
        let f = solver.solve(&Mesh::default(), &BoundaryProblem::laplace()).unwrap();
        assert_eq!(f.value(Point::new(3.0, 1.5)), Some(3.0));
        assert_eq!(f.gradient(Point::new(-100.0, 7.0)), Some(DVec2::new(0.0, 2.0)));
    }

    #[test]
    fn sinks_push_gradient_away_from_river() {
        let mesh = mesh_with(&[
            (0.0, 0.0, Marker::Bottom),
            (10.0, 10.0, Marker::Top),
            (5.0, 5.0, Marker::River),
        ]);
        let mut solver = SinkSolver {
            strength: 1.0,
            background: DVec2::ZERO,
            core: 1e-3,
        };
        let f = solver.solve(&mesh, &BoundaryProblem::laplace()).unwrap();
        assert_eq!(f.sinks, vec![Point::new(5.0, 5.0)]);

        let g = f.gradient(Point::new(6.0, 5.0)).unwrap();
        assert!(g.x > 0.0 && g.y.abs() < 1e-12);
        assert!((g.x - 1.0 / TAU).abs() < 1e-12);
        // Finite at the sink itself.
        assert_eq!(f.gradient(Point::new(5.0, 5.0)), Some(DVec2::ZERO));
        assert!(f.value(Point::new(5.0, 5.0)).unwrap().is_finite());
    }

    #[test]
    fn sink_field_is_undefined_outside_mesh_bounds() {
        let mesh = mesh_with(&[(0.0, 0.0, Marker::Bottom), (1.0, 1.0, Marker::Top)]);
        let f = SinkSolver::default().solve(&mesh, &BoundaryProblem::laplace()).unwrap();
        assert!(f.gradient(Point::new(0.5, 0.5)).is_some());
        assert!(f.gradient(Point::new(1.5, 0.5)).is_none());
        assert!(f.value(Point::new(0.5, -0.1)).is_none());
    }

    #[test]
    fn non_positive_core_fails_to_solve() {
        let mut solver = SinkSolver {
            core: 0.0,
            ..SinkSolver::default()
        };
        assert!(solver.solve(&Mesh::default(), &BoundaryProblem::laplace()).is_err());
    }
}
