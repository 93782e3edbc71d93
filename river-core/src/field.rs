//! Contract of the external field solver and the boundary problem it is asked
//! to solve.

use std::{collections::BTreeMap, fmt, sync::Arc};

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::{boundary::Marker, error::CollaboratorError, mesh::Mesh, types::Point};

/// A solved field, queryable anywhere inside its support.
pub trait Field {
    /// Field value at `p`, `None` outside the support.
    fn value(&self, p: Point) -> Option<f64>;

    /// Field gradient at `p`, `None` outside the support.
    fn gradient(&self, p: Point) -> Option<DVec2>;
}

/// External solver turning a mesh and a boundary problem into a [`Field`].
pub trait FieldSolver {
    type Field: Field;

    fn solve(
        &mut self,
        mesh: &Mesh,
        problem: &BoundaryProblem,
    ) -> Result<Self::Field, CollaboratorError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryKind {
    #[default]
    Dirichlet,
    Neumann,
    Robin,
}

/// Condition imposed on every edge carrying a given [`Marker`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryCondition {
    pub kind: BoundaryKind,
    pub value: f64,
}

impl BoundaryCondition {
    pub const fn dirichlet(value: f64) -> Self {
        Self {
            kind: BoundaryKind::Dirichlet,
            value,
        }
    }

    pub const fn neumann(value: f64) -> Self {
        Self {
            kind: BoundaryKind::Neumann,
            value,
        }
    }

    pub const fn robin(value: f64) -> Self {
        Self {
            kind: BoundaryKind::Robin,
            value,
        }
    }
}

type PointFn = Arc<dyn Fn(Point, Marker) -> f64 + Send + Sync>;

/// Position-dependent input of the boundary problem.
#[derive(Clone)]
pub enum FieldFunction {
    /// Overrides the constant value of the boundary conditions.
    BoundaryValues(PointFn),
    /// Source term of the equation; called with [`Marker::None`] inside the domain.
    RightHandSide(PointFn),
}

impl FieldFunction {
    pub fn boundary_values(f: impl Fn(Point, Marker) -> f64 + Send + Sync + 'static) -> Self {
        Self::BoundaryValues(Arc::new(f))
    }

    pub fn right_hand_side(f: impl Fn(Point, Marker) -> f64 + Send + Sync + 'static) -> Self {
        Self::RightHandSide(Arc::new(f))
    }

    /// Constant source term.
    pub fn constant_source(value: f64) -> Self {
        Self::right_hand_side(move |_, _| value)
    }

    pub fn evaluate(&self, p: Point, marker: Marker) -> f64 {
        match self {
            Self::BoundaryValues(f) | Self::RightHandSide(f) => f(p, marker),
        }
    }
}

impl fmt::Debug for FieldFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BoundaryValues(_) => f.write_str("BoundaryValues(..)"),
            Self::RightHandSide(_) => f.write_str("RightHandSide(..)"),
        }
    }
}

/// Boundary conditions keyed by marker plus the optional field functions.
#[derive(Clone, Debug, Default)]
pub struct BoundaryProblem {
    pub conditions: BTreeMap<Marker, BoundaryCondition>,
    pub functions: Vec<FieldFunction>,
}

impl BoundaryProblem {
    /// Laplace problem: unit flux enters through the top, the river and the
    /// bottom are held at zero, the sides are insulated.
    pub fn laplace() -> Self {
        Self::default()
            .with_condition(Marker::Bottom, BoundaryCondition::dirichlet(0.0))
            .with_condition(Marker::Right, BoundaryCondition::neumann(0.0))
            .with_condition(Marker::Top, BoundaryCondition::neumann(1.0))
            .with_condition(Marker::Left, BoundaryCondition::neumann(0.0))
            .with_condition(Marker::River, BoundaryCondition::dirichlet(0.0))
    }

    /// Poisson problem with a unit source and insulated sides and top.
    pub fn poisson() -> Self {
        Self::default()
            .with_condition(Marker::Bottom, BoundaryCondition::dirichlet(0.0))
            .with_condition(Marker::Right, BoundaryCondition::neumann(0.0))
            .with_condition(Marker::Top, BoundaryCondition::neumann(0.0))
            .with_condition(Marker::Left, BoundaryCondition::neumann(0.0))
            .with_condition(Marker::River, BoundaryCondition::dirichlet(0.0))
            .with_function(FieldFunction::constant_source(1.0))
    }

    /// Poisson problem with a unit source and zero value on every edge.
    pub fn dirichlet() -> Self {
        let mut problem = Self::default().with_function(FieldFunction::constant_source(1.0));
        for marker in [
            Marker::Bottom,
            Marker::Right,
            Marker::Top,
            Marker::Left,
            Marker::River,
        ] {
            problem
                .conditions
                .insert(marker, BoundaryCondition::dirichlet(0.0));
        }
        problem
    }

    pub fn with_condition(mut self, marker: Marker, condition: BoundaryCondition) -> Self {
        self.conditions.insert(marker, condition);
        self
    }

    pub fn with_function(mut self, function: FieldFunction) -> Self {
        self.functions.push(function);
        self
    }

    pub fn condition(&self, marker: Marker) -> Option<BoundaryCondition> {
        self.conditions.get(&marker).copied()
    }

    /// Boundary value at `p` on an edge tagged `marker`: the first
    /// [`FieldFunction::BoundaryValues`] if any, else the condition's constant.
    pub fn boundary_value(&self, p: Point, marker: Marker) -> Option<f64> {
        let condition = self.condition(marker)?;
        let overridden = self.functions.iter().find_map(|f| match f {
            FieldFunction::BoundaryValues(_) => Some(f.evaluate(p, marker)),
            FieldFunction::RightHandSide(_) => None,
        });
        Some(overridden.unwrap_or(condition.value))
    }

    /// Sum of every source term at `p`.
    pub fn right_hand_side(&self, p: Point) -> f64 {
        self.functions
            .iter()
            .filter(|f| matches!(f, FieldFunction::RightHandSide(_)))
            .map(|f| f.evaluate(p, Marker::None))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laplace_preset_matches_flux_from_top() {
        let p = BoundaryProblem::laplace();
        assert_eq!(p.condition(Marker::Top), Some(BoundaryCondition::neumann(1.0)));
        assert_eq!(p.condition(Marker::River), Some(BoundaryCondition::dirichlet(0.0)));
        assert_eq!(p.condition(Marker::None), None);
        assert_eq!(p.right_hand_side(Point::new(1.0, 1.0)), 0.0);
    }

    #[test]
    fn poisson_and_dirichlet_presets_have_unit_source() {
        let poisson = BoundaryProblem::poisson();
        assert_eq!(poisson.right_hand_side(Point::ZERO), 1.0);
        assert_eq!(poisson.condition(Marker::Top).unwrap().kind, BoundaryKind::Neumann);

        let dirichlet = BoundaryProblem::dirichlet();
        assert_eq!(dirichlet.right_hand_side(Point::ZERO), 1.0);
        assert!(
            dirichlet
                .conditions
                .values()
                .all(|c| c.kind == BoundaryKind::Dirichlet)
        );
        assert_eq!(dirichlet.conditions.len(), 5);
    }

    #[test]
    fn boundary_value_function_overrides_constant() {
        let p = BoundaryProblem::laplace()
            .with_function(FieldFunction::boundary_values(|p, m| {
                if m == Marker::Top { p.x } else { 0.0 }
            }));
        assert_eq!(p.boundary_value(Point::new(3.0, 10.0), Marker::Top), Some(3.0));
        assert_eq!(p.boundary_value(Point::ZERO, Marker::None), None);
        assert_eq!(BoundaryProblem::laplace().boundary_value(Point::ZERO, Marker::Top), Some(1.0));
    }

    #[test]
    fn field_function_debug_hides_closure() {
        let f = FieldFunction::constant_source(2.0);
        assert_eq!(format!("{f:?}"), "RightHandSide(..)");
        assert_eq!(f.evaluate(Point::ZERO, Marker::None), 2.0);
    }
}
