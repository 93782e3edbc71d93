//! Phases of one growth iteration.
//!
//! The update loop of [`crate::model::GrowthModel`] looks like:
//! 1. [`mesh_phase`] - the geometry is turned into a PSLG, meshed and solved
//!    for the field, coarsening the mesh when a collaborator fails.
//! 2. [`sampling_phase`] - the field is integrated over a stencil around
//!    every tip, accumulating into a [`FluxBuffer`].
//! 3. [`decide`] - the growth law and bifurcation criterion turn one tip's
//!    samples into a [`Decision`].
//! 4. [`advance_phase`] - the decision is applied to the geometry, halving a
//!    rejected step once before giving up on the tip.

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::{
    boundary::Marker,
    config::{GrowthConfig, MeshRetryConfig},
    error::{GrowthError, GrowthResult, Obstacle},
    field::{BoundaryProblem, Field, FieldSolver},
    flux_buffer::FluxBuffer,
    geometry::Geometry,
    law::{TipContext, TipSample},
    mesh::MeshGenerator,
    point::Polar,
    stencil::Stencil,
    types::{BranchId, Point},
};

/// A growing tip as seen by one iteration: id, tail point and tail heading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TipFrame {
    pub id: BranchId,
    pub point: Point,
    pub heading: f64,
}

/// Why a tip stopped growing for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// The tip ran into a boundary edge with this marker.
    ReachedBoundary(Marker),
    /// Another branch left no room, even for a halved step.
    Blocked,
    /// The tip wanted to split at the maximum depth.
    DepthLimit,
    /// The geometry refused the step for any other reason.
    Rejected,
}

/// What one tip should do this iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision {
    Stall,
    Grow(Polar),
    Bifurcate(Polar, Polar),
    Terminate(TerminationReason),
}

/// What actually happened to one tip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    Stalled,
    Grew {
        point: Point,
        retried: bool,
    },
    Bifurcated {
        left: BranchId,
        right: BranchId,
        retried: bool,
    },
    Terminated(TerminationReason),
}

/// Meshes the current geometry and solves the boundary problem on it.
///
/// A failed attempt is retried up to `retry.retries` times; every retry
/// multiplies all mesh-size hints by `retry.relax_factor` once more. Nothing
/// in `geometry` is touched.
///
/// ### Parameters
/// - `geometry` - Source of the PSLG, via [`Geometry::initiate_mesh_scaled`].
/// - `mesher` - External mesh generator.
/// - `solver` - External field solver.
/// - `problem` - Boundary conditions handed to the solver.
/// - `retry` - Retry budget and relax factor.
/// - `iteration` - Iteration number, only used in errors and logs.
///
/// ### Returns
/// The solved field and the number of attempts it took, or the error of the
/// last attempt ([`GrowthError::MeshGeneration`] or [`GrowthError::FieldSolve`]).
pub fn mesh_phase<M, S>(
    geometry: &Geometry,
    mesher: &mut M,
    solver: &mut S,
    problem: &BoundaryProblem,
    retry: &MeshRetryConfig,
    iteration: usize,
) -> GrowthResult<(S::Field, usize)>
where
    M: MeshGenerator,
    S: FieldSolver,
{
    let mut scale = 1.0;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let pslg = geometry.initiate_mesh_scaled(scale);
        let err = match mesher.generate(&pslg) {
            Ok(mesh) => match solver.solve(&mesh, problem) {
                Ok(field) => {
                    debug!(
                        iteration,
                        attempt,
                        vertices = mesh.vertices.len(),
                        triangles = mesh.triangles.len(),
                        "field solved"
                    );
                    return Ok((field, attempt));
                }
                Err(source) => GrowthError::FieldSolve { iteration, source },
            },
            Err(source) => GrowthError::MeshGeneration { iteration, source },
        };
        if attempt > retry.retries {
            return Err(err);
        }
        scale *= retry.relax_factor;
        warn!(iteration, attempt, scale, error = %err, "retrying with a coarser mesh");
    }
}

/// Integrates `field` over `stencil` around every tip in `frames`.
///
/// The buffer is resized (and cleared) to `frames.len()` first; slot `i`
/// holds the samples of `frames[i]`. Stencil points outside the field's
/// support are skipped.
///
/// ### Parameters
/// - `frames` - Tips to sample, in processing order.
/// - `field` - Field of the current iteration.
/// - `stencil` - Quadrature rule in the tip frame.
/// - `acc` - Scratch buffer the samples are accumulated into.
///
/// ### Returns
/// One [`TipSample`] per frame, or [`GrowthError::FieldUnavailable`] if the
/// gradient is undefined at a tip point.
pub fn sampling_phase<F: Field>(
    frames: &[TipFrame],
    field: &F,
    stencil: &Stencil,
    acc: &mut FluxBuffer,
) -> GrowthResult<Vec<TipSample>> {
    acc.ensure_len(frames.len());

    let mut tip_gradients = Vec::with_capacity(frames.len());
    for (slot, frame) in frames.iter().enumerate() {
        let tip_gradient = field
            .gradient(frame.point)
            .ok_or(GrowthError::FieldUnavailable {
                id: frame.id,
                point: frame.point,
            })?;
        tip_gradients.push(tip_gradient);

        for (p, sp) in stencil.place(frame.point, frame.heading) {
            if let Some(gradient) = field.gradient(p) {
                acc.add(slot, gradient, sp.weight, sp.side());
            }
        }
        trace!(
            id = frame.id,
            flux = acc.flux[slot],
            left = acc.left[slot],
            right = acc.right[slot],
            samples = acc.count[slot],
            "tip sampled"
        );
    }

    Ok(tip_gradients
        .into_iter()
        .enumerate()
        .map(|(slot, tip_gradient)| TipSample {
            tip_gradient,
            avg_gradient: acc.avg_gradient(slot),
            flux: acc.flux[slot],
            left: acc.left[slot],
            right: acc.right[slot],
            asymmetry: acc.asymmetry(slot),
            count: acc.count[slot],
        })
        .collect())
}

/// Chooses what the tip described by `ctx` does this iteration.
///
/// A tip below `cfg.growth_threshold` or with a non-positive step stalls. A
/// branch at least `cfg.bifurcation.min_length` long splits when the
/// criterion fires, into two children of the same step length at
/// `±cfg.bifurcation.angle` from the heading; at the depth budget it
/// terminates instead.
pub fn decide(ctx: &TipContext, cfg: &GrowthConfig, rng: &mut impl Rng) -> Decision {
    if ctx.sample.flux < cfg.growth_threshold {
        return Decision::Stall;
    }
    let step = cfg.law.compute_step(ctx);
    if !(step.r.is_finite() && step.r > 0.0) {
        return Decision::Stall;
    }

    let b = &cfg.bifurcation;
    if ctx.branch_length >= b.min_length && b.criterion.should_bifurcate(ctx, rng) {
        if b.max_depth.is_some_and(|max| ctx.depth >= max) {
            return Decision::Terminate(TerminationReason::DepthLimit);
        }
        return Decision::Bifurcate(Polar::new(step.r, b.angle), Polar::new(step.r, -b.angle));
    }
    Decision::Grow(step)
}

/// Applies `decision` to tip `id`.
///
/// A step rejected with [`GrowthError::TooClose`] is retried once at half its
/// length (both offsets of a bifurcation are halved). A second rejection, or
/// any other recoverable error, terminates the tip; nothing is committed for
/// a failed attempt. A step shorter than `eps` stalls the tip instead. When
/// only the halving made the step too short, the termination reason comes
/// from the first rejection.
///
/// ### Returns
/// The [`Outcome`] for this tip. Errors that are not recoverable geometric
/// conditions (e.g. an unknown branch id) are propagated.
pub fn advance_phase(
    geometry: &mut Geometry,
    id: BranchId,
    decision: Decision,
) -> GrowthResult<Outcome> {
    match decision {
        Decision::Stall => Ok(Outcome::Stalled),
        Decision::Terminate(reason) => Ok(terminated(id, reason)),
        Decision::Grow(step) => apply_with_retry(id, |retried| {
            let step = if retried { step.scaled(0.5) } else { step };
            let point = geometry.add_polar(id, step)?;
            Ok(Outcome::Grew { point, retried })
        }),
        Decision::Bifurcate(a, b) => apply_with_retry(id, |retried| {
            let (a, b) = if retried {
                (a.scaled(0.5), b.scaled(0.5))
            } else {
                (a, b)
            };
            let (left, right) = geometry.add_bifurcation(id, a, b)?;
            Ok(Outcome::Bifurcated {
                left,
                right,
                retried,
            })
        }),
    }
}

fn apply_with_retry(
    id: BranchId,
    mut apply: impl FnMut(bool) -> GrowthResult<Outcome>,
) -> GrowthResult<Outcome> {
    let err = match apply(false) {
        Ok(outcome) => return Ok(outcome),
        Err(GrowthError::TooClose {
            obstacle: Obstacle::Step,
            ..
        }) => return Ok(Outcome::Stalled),
        Err(err) => err,
    };
    let err = if matches!(err, GrowthError::TooClose { .. }) {
        warn!(id, error = %err, "step rejected, retrying at half length");
        match apply(true) {
            Ok(outcome) => return Ok(outcome),
            // The halved step only got too short; the first obstacle decides.
            Err(GrowthError::TooClose {
                obstacle: Obstacle::Step,
                ..
            }) => err,
            Err(retry_err) => retry_err,
        }
    } else {
        err
    };

    let reason = match err {
        GrowthError::TooClose {
            obstacle: Obstacle::Boundary { marker, .. },
            ..
        } => TerminationReason::ReachedBoundary(marker),
        GrowthError::TooClose { .. } => TerminationReason::Blocked,
        err if err.is_recoverable() => TerminationReason::Rejected,
        err => return Err(err),
    };
    Ok(terminated(id, reason))
}

fn terminated(id: BranchId, reason: TerminationReason) -> Outcome {
    warn!(id, ?reason, "tip terminated");
    Outcome::Terminated(reason)
}
