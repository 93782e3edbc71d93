//! Error type shared by every layer of the growth engine.
//!
//! The geometric failures (`InvalidParent` through `TooClose`) are reported,
//! recoverable conditions: the growth driver decides whether to retry with a
//! smaller step, terminate the tip or abort. Collaborator failures abort the
//! current iteration.

use thiserror::Error;

use crate::{
    boundary::Marker,
    types::{BranchId, Point},
};

/// Boxed error returned by the external mesh generator and field solver.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// What a rejected step came too close to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Obstacle {
    /// A boundary edge; `edge` indexes [`crate::boundary::Boundary::edges`].
    Boundary { edge: usize, marker: Marker },
    /// Segment `segment` (from point `segment` to `segment + 1`) of a branch.
    Branch { id: BranchId, segment: usize },
    /// The other half of the bifurcation being created.
    Sibling,
    /// The step itself is shorter than the tolerance.
    Step,
}

#[derive(Error, Debug)]
pub enum GrowthError {
    #[error("parent branch {parent} does not exist")]
    InvalidParent { parent: BranchId },

    #[error("branch {id} already has sub-branches")]
    AlreadyBifurcated { id: BranchId },

    #[error("bifurcation of branch {id} is degenerate: split angle {angle} < eps {eps}")]
    DegenerateSplit { id: BranchId, angle: f64, eps: f64 },

    #[error("branch {id} has no defined heading")]
    UndefinedHeading { id: BranchId },

    #[error("point {point} does not match the boundary: {reason}")]
    BoundaryMismatch { point: Point, reason: String },

    #[error("branch {id}: point {point} is {distance} from {obstacle:?}, closer than eps {eps}")]
    TooClose {
        id: BranchId,
        point: Point,
        distance: f64,
        eps: f64,
        obstacle: Obstacle,
    },

    #[error("branch {id} does not exist")]
    UnknownBranch { id: BranchId },

    #[error("branch {id} is not a tip")]
    NotATip { id: BranchId },

    #[error("invalid boundary: {0}")]
    InvalidBoundary(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("mesh generation failed at iteration {iteration}: {source}")]
    MeshGeneration {
        iteration: usize,
        #[source]
        source: CollaboratorError,
    },

    #[error("field solve failed at iteration {iteration}: {source}")]
    FieldSolve {
        iteration: usize,
        #[source]
        source: CollaboratorError,
    },

    #[error("field is not defined at tip {point} of branch {id}")]
    FieldUnavailable { id: BranchId, point: Point },

    #[error("cannot rebuild geometry from mesh: {0}")]
    Reconstruction(String),
}

impl GrowthError {
    /// Whether this is one of the geometric conditions a caller is expected to
    /// handle (retry with a smaller step, bifurcate, terminate the tip).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GrowthError::InvalidParent { .. }
                | GrowthError::AlreadyBifurcated { .. }
                | GrowthError::DegenerateSplit { .. }
                | GrowthError::UndefinedHeading { .. }
                | GrowthError::BoundaryMismatch { .. }
                | GrowthError::TooClose { .. }
        )
    }
}

pub type GrowthResult<T> = Result<T, GrowthError>;
