//! The growth driver: one shared field solve per iteration, then every tip
//! is advanced, split or terminated in ascending id order.
//!
//! [`GrowthModel::run_backward`] is the backward mode: every tip is shrunk
//! by the step the growth law gives it, regrown, and the geometry restored.

use std::collections::BTreeMap;

use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use crate::{
    branch::Branch,
    config::{GrowthConfig, SamplingConfig},
    error::{GrowthError, GrowthResult},
    field::{BoundaryProblem, FieldSolver},
    flux_buffer::FluxBuffer,
    geometry::Geometry,
    law::{TipContext, TipSample},
    mesh::MeshGenerator,
    phases::{
        Decision, Outcome, TerminationReason, TipFrame, advance_phase, decide, mesh_phase,
        sampling_phase,
    },
    stencil::Stencil,
    types::{BranchId, Point},
};

/// Lifecycle of one branch as seen by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TipState {
    Growing,
    /// Split into two children, which are `Growing` from then on.
    Bifurcated { left: BranchId, right: BranchId },
    /// No further mutation.
    Terminated(TerminationReason),
}

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    IterationBudget,
    AllTerminated,
    /// A tip reached [`GrowthConfig::stop_height`].
    ReachedHeight,
}

/// What one call to [`GrowthModel::step`] did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IterationReport {
    /// 1-based number of the iteration.
    pub iteration: usize,
    /// Mesh/solve attempts, `0` when nothing was solved.
    pub attempts: usize,
    pub grown: Vec<BranchId>,
    /// `(parent, left, right)` for every split.
    pub bifurcated: Vec<(BranchId, BranchId, BranchId)>,
    pub stalled: Vec<BranchId>,
    pub terminated: Vec<(BranchId, TerminationReason)>,
    /// Tips whose step was accepted only after halving.
    pub retried: Vec<BranchId>,
    /// Field samples of every tip processed this iteration.
    pub samples: BTreeMap<BranchId, TipSample>,
    pub stop: Option<StopReason>,
}

/// One tip that survived a backward run, see [`GrowthModel::run_backward`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackwardTip {
    /// Samples taken before the first shrink step.
    pub sample: TipSample,
    pub init: Point,
    /// Tip point after shrinking.
    pub backward: Point,
    /// Tip point after regrowing from `backward`.
    pub backward_forward: Point,
    /// Path length removed while shrinking.
    pub shrunk: f64,
    /// Path length added back while regrowing.
    pub regrown: f64,
}

impl BackwardTip {
    /// Regrown minus shrunk length; zero when regrowth undid the shrink.
    pub fn length_diff(&self) -> f64 {
        self.regrown - self.shrunk
    }

    /// Distance between the initial and the regrown tip point.
    pub fn drift(&self) -> f64 {
        self.init.distance(self.backward_forward)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackwardReport {
    pub steps: usize,
    /// Tips present before, after shrinking and after regrowing.
    pub tips: BTreeMap<BranchId, BackwardTip>,
    /// `|left - right|` child length of every fork whose children were
    /// removed because one of them shrank away.
    pub fork_length_diff: BTreeMap<BranchId, f64>,
    /// Largest tip flux of every shrink step.
    pub max_flux: Vec<f64>,
    /// Mesh/solve attempts over all solves.
    pub attempts: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: usize,
    pub branches: usize,
    pub tips: usize,
    pub terminated: usize,
    pub stop: StopReason,
}

/// Grows the river network of a [`Geometry`] against an external mesh
/// generator and field solver.
#[derive(Debug)]
pub struct GrowthModel<M, S> {
    geometry: Geometry,
    config: GrowthConfig,
    mesher: M,
    solver: S,
    problem: BoundaryProblem,
    states: BTreeMap<BranchId, TipState>,
    iteration: usize,
    rng: StdRng,
    stencil: Stencil,
    acc: FluxBuffer,
    stop: Option<StopReason>,
}

fn build_stencil(sampling: &SamplingConfig, rng: &mut StdRng) -> Stencil {
    match sampling.monte_carlo_points {
        Some(count) => Stencil::random_in_disk(
            count,
            sampling.radius,
            sampling.weight_radius,
            sampling.exponent,
            rng,
        ),
        None => Stencil::polar_grid(
            sampling.radius,
            sampling.rings,
            sampling.sectors,
            sampling.weight_radius,
            sampling.exponent,
        ),
    }
}

impl<M, S> GrowthModel<M, S>
where
    M: MeshGenerator,
    S: FieldSolver,
{
    /// Validates `config` and takes its `eps` over into `geometry`. Branches
    /// already in `geometry` start out `Growing`.
    pub fn new(
        mut geometry: Geometry,
        config: GrowthConfig,
        mesher: M,
        solver: S,
        problem: BoundaryProblem,
    ) -> GrowthResult<Self> {
        config.validate()?;
        geometry.set_eps(config.eps)?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let stencil = build_stencil(&config.sampling, &mut rng);
        let mut model = Self {
            geometry,
            config,
            mesher,
            solver,
            problem,
            states: BTreeMap::new(),
            iteration: 0,
            rng,
            stencil,
            acc: FluxBuffer::default(),
            stop: None,
        };
        model.sync_states();
        Ok(model)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Mutable access for seeding sources between iterations. New tips are
    /// picked up as `Growing` by the next [`GrowthModel::step`].
    pub fn geometry_mut(&mut self) -> &mut Geometry {
        &mut self.geometry
    }

    pub fn config(&self) -> &GrowthConfig {
        &self.config
    }

    /// Replaces the configuration; the iteration count and tip states stay.
    pub fn set_config(&mut self, config: GrowthConfig) -> GrowthResult<()> {
        config.validate()?;
        self.geometry.set_eps(config.eps)?;
        self.stencil = build_stencil(&config.sampling, &mut self.rng);
        self.config = config;
        if self.stop == Some(StopReason::IterationBudget)
            && self.iteration < self.config.max_iterations
        {
            self.stop = None;
        }
        Ok(())
    }

    pub fn problem(&self) -> &BoundaryProblem {
        &self.problem
    }

    pub fn set_problem(&mut self, problem: BoundaryProblem) {
        self.problem = problem;
    }

    pub fn stencil(&self) -> &Stencil {
        &self.stencil
    }

    /// Completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn state(&self, id: BranchId) -> Option<TipState> {
        self.states.get(&id).copied()
    }

    pub fn states(&self) -> &BTreeMap<BranchId, TipState> {
        &self.states
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    pub fn is_finished(&self) -> bool {
        self.stop.is_some()
    }

    /// Drops every branch and restarts the iteration count and random
    /// stream. Boundary and configuration stay.
    pub fn reset(&mut self) {
        self.geometry.clear();
        self.states.clear();
        self.iteration = 0;
        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.stencil = build_stencil(&self.config.sampling, &mut self.rng);
        self.acc.clear();
        self.stop = None;
    }

    /// Registers new tips as `Growing` and forgets deleted branches.
    fn sync_states(&mut self) {
        let tree = self.geometry.tree();
        self.states.retain(|id, _| tree.is_valid_branch_id(*id));
        for id in tree.tip_ids() {
            self.states.entry(id).or_insert(TipState::Growing);
        }
    }

    fn growing(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, TipState::Growing))
            .count()
    }

    /// Runs one iteration.
    ///
    /// The field is solved once for the whole iteration; tips are then
    /// processed in ascending id order, each against the geometry as updated
    /// by the tips before it. A collaborator failure (after the configured
    /// mesh retries) or an undefined field at a tip aborts the iteration
    /// before anything is mutated.
    pub fn step(&mut self) -> GrowthResult<IterationReport> {
        let mut report = IterationReport {
            iteration: self.iteration + 1,
            ..IterationReport::default()
        };
        if self.stop == Some(StopReason::AllTerminated) {
            // Sources seeded since then revive the run.
            self.sync_states();
            if self.growing() > 0 {
                self.stop = None;
            }
        }
        if let Some(stop) = self.stop {
            report.iteration = self.iteration;
            report.stop = Some(stop);
            return Ok(report);
        }
        self.sync_states();

        let (frames, headless) = self.frames(true);
        if frames.is_empty() {
            for id in headless {
                self.record(&mut report, id, Outcome::Terminated(TerminationReason::Rejected));
            }
            self.stop = Some(StopReason::AllTerminated);
            report.stop = self.stop;
            info!(iteration = report.iteration, "no growing tips left");
            return Ok(report);
        }

        let (samples, attempts) = self.solve_and_sample(&frames, report.iteration)?;
        report.attempts = attempts;
        report.samples = frames.iter().map(|f| f.id).zip(samples.iter().copied()).collect();
        let max_flux = self.acc.max_flux();
        self.advance_tips(&frames, &samples, max_flux, &mut report)?;
        for id in headless {
            self.record(&mut report, id, Outcome::Terminated(TerminationReason::Rejected));
        }

        self.iteration += 1;
        self.stop = self.check_stop();
        report.stop = self.stop;
        info!(
            iteration = report.iteration,
            grown = report.grown.len(),
            bifurcated = report.bifurcated.len(),
            stalled = report.stalled.len(),
            terminated = report.terminated.len(),
            tips = self.growing(),
            "iteration done"
        );
        Ok(report)
    }

    /// Tips with a heading, ascending by id, and the ids of those without.
    fn frames(&self, growing_only: bool) -> (Vec<TipFrame>, Vec<BranchId>) {
        let mut frames = Vec::new();
        let mut headless = Vec::new();
        for tip in self.geometry.tip_polars() {
            if growing_only && self.states.get(&tip.id) != Some(&TipState::Growing) {
                continue;
            }
            match tip.heading {
                Some(heading) => frames.push(TipFrame {
                    id: tip.id,
                    point: tip.point,
                    heading,
                }),
                None => headless.push(tip.id),
            }
        }
        (frames, headless)
    }

    fn solve_and_sample(
        &mut self,
        frames: &[TipFrame],
        iteration: usize,
    ) -> GrowthResult<(Vec<TipSample>, usize)> {
        let (field, attempts) = mesh_phase(
            &self.geometry,
            &mut self.mesher,
            &mut self.solver,
            &self.problem,
            &self.config.mesh_retry,
            iteration,
        )?;
        let samples = sampling_phase(frames, &field, &self.stencil, &mut self.acc)?;
        Ok((samples, attempts))
    }

    fn tip_context(&self, frame: &TipFrame, sample: TipSample, max_flux: f64) -> TipContext {
        let tree = self.geometry.tree();
        let branch = tree.branch(frame.id);
        let speed_limit = self.config.speed_limit;
        TipContext {
            id: frame.id,
            point: frame.point,
            heading: frame.heading,
            branch_length: branch.map_or(0.0, Branch::length),
            depth: tree.depth(frame.id).unwrap_or(0),
            sample,
            max_flux,
            growth_min_distance: self.config.growth_min_distance,
            max_turn_angle: self.config.max_turn_angle,
            average_speed: speed_limit
                .zip(branch)
                .and_then(|(limit, b)| b.average_speed(limit.window)),
            speed_limit,
        }
    }

    /// Decides and applies the step of every frame in order. An error that
    /// is not a geometric rejection restores the geometry and tip states to
    /// how they were before the first tip.
    fn advance_tips(
        &mut self,
        frames: &[TipFrame],
        samples: &[TipSample],
        max_flux: f64,
        report: &mut IterationReport,
    ) -> GrowthResult<()> {
        let snapshot = (self.geometry.clone(), self.states.clone());
        for (frame, &sample) in frames.iter().zip(samples) {
            let ctx = self.tip_context(frame, sample, max_flux);
            let decision = decide(&ctx, &self.config, &mut self.rng);
            debug!(id = frame.id, ?decision, flux = sample.flux, asymmetry = sample.asymmetry);
            match advance_phase(&mut self.geometry, frame.id, decision) {
                Ok(outcome) => self.record(report, frame.id, outcome),
                Err(err) => {
                    (self.geometry, self.states) = snapshot;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, report: &mut IterationReport, id: BranchId, outcome: Outcome) {
        match outcome {
            Outcome::Stalled => report.stalled.push(id),
            Outcome::Grew { retried, .. } => {
                report.grown.push(id);
                if retried {
                    report.retried.push(id);
                }
            }
            Outcome::Bifurcated {
                left,
                right,
                retried,
            } => {
                info!(id, left, right, "tip bifurcated");
                self.states.insert(id, TipState::Bifurcated { left, right });
                self.states.insert(left, TipState::Growing);
                self.states.insert(right, TipState::Growing);
                report.bifurcated.push((id, left, right));
                if retried {
                    report.retried.push(id);
                }
            }
            Outcome::Terminated(reason) => {
                self.states.insert(id, TipState::Terminated(reason));
                report.terminated.push((id, reason));
            }
        }
    }

    fn check_stop(&self) -> Option<StopReason> {
        if let Some(height) = self.config.stop_height
            && self.geometry.tip_points().iter().any(|p| p.y >= height)
        {
            return Some(StopReason::ReachedHeight);
        }
        if self.growing() == 0 {
            return Some(StopReason::AllTerminated);
        }
        if self.iteration >= self.config.max_iterations {
            return Some(StopReason::IterationBudget);
        }
        None
    }

    /// Steps until a stop condition or until `config.max_iterations`
    /// iterations have completed.
    pub fn run(&mut self) -> GrowthResult<RunSummary> {
        let stop = loop {
            if let Some(stop) = self.stop {
                break stop;
            }
            if self.iteration >= self.config.max_iterations {
                self.stop = Some(StopReason::IterationBudget);
                continue;
            }
            self.step()?;
        };
        let summary = RunSummary {
            iterations: self.iteration,
            branches: self.geometry.tree().len(),
            tips: self.growing(),
            terminated: self
                .states
                .values()
                .filter(|s| matches!(s, TipState::Terminated(_)))
                .count(),
            stop,
        };
        info!(?summary, "run finished");
        Ok(summary)
    }

    /// Shrinks every tip for `steps` solves, regrows it for as many, and
    /// puts the geometry back the way it was.
    ///
    /// Each shrink step removes the path length the growth law would have
    /// added (without the short-branch and speed adjustments). A child that
    /// shrinks to `eps` or less removes both children of its fork, whose
    /// parent is a tip again from the next step on. Regrowth never
    /// bifurcates; regrowth step `i` is normalised by the maximum flux of
    /// shrink step `steps - 1 - i`, so regrowth mirrors the shrink.
    ///
    /// Tip states, the iteration count and the random stream are untouched.
    ///
    /// ### Returns
    /// The collected [`BackwardReport`], or the first collaborator error. The
    /// geometry is restored in both cases.
    pub fn run_backward(&mut self, steps: usize) -> GrowthResult<BackwardReport> {
        if steps == 0 {
            return Err(GrowthError::InvalidConfig(
                "a backward run needs at least one step".into(),
            ));
        }
        let initial = self.geometry.clone();
        let result = self.backward_cycle(steps, &initial);
        self.geometry = initial;
        if let Ok(report) = &result {
            info!(
                steps,
                tips = report.tips.len(),
                collapsed = report.fork_length_diff.len(),
                "backward run finished"
            );
        }
        result
    }

    fn backward_context(&self, frame: &TipFrame, sample: TipSample, max_flux: f64) -> TipContext {
        TipContext {
            branch_length: f64::INFINITY,
            average_speed: None,
            speed_limit: None,
            ..self.tip_context(frame, sample, max_flux)
        }
    }

    fn backward_cycle(&mut self, steps: usize, initial: &Geometry) -> GrowthResult<BackwardReport> {
        let mut report = BackwardReport {
            steps,
            ..BackwardReport::default()
        };
        let mut first_samples = BTreeMap::new();

        for step in 0..steps {
            let (frames, _) = self.frames(false);
            let (samples, attempts) = self.solve_and_sample(&frames, self.iteration)?;
            report.attempts += attempts;
            let max_flux = self.acc.max_flux();
            report.max_flux.push(max_flux);
            if step == 0 {
                first_samples = frames.iter().map(|f| f.id).zip(samples.iter().copied()).collect();
            }

            for (frame, &sample) in frames.iter().zip(&samples) {
                if sample.flux < self.config.growth_threshold {
                    continue;
                }
                let ctx = self.backward_context(frame, sample, max_flux);
                let r = self.config.law.compute_step(&ctx).r;
                if r.is_finite() && r > 0.0 {
                    self.geometry.shrink_tip(frame.id, r)?;
                }
            }

            for fork in self.geometry.collapsed_forks(self.geometry.eps()) {
                let tree = self.geometry.tree();
                // Gone with an ancestor fork collapsed just before.
                if !tree.is_valid_branch_id(fork) {
                    continue;
                }
                let lengths: Vec<f64> = tree
                    .sub_branch_ids(fork)
                    .iter()
                    .filter_map(|&id| tree.branch(id).map(Branch::length))
                    .collect();
                let longest = lengths.iter().copied().fold(0.0, f64::max);
                let shortest = lengths.iter().copied().fold(longest, f64::min);
                report.fork_length_diff.insert(fork, longest - shortest);
                let removed = self.geometry.delete_sub_branches(fork)?;
                debug!(fork, ?removed, "fork collapsed");
            }
            debug!(step, max_flux, tips = frames.len(), "shrink step done");
        }
        let shrunk = self.geometry.clone();

        for step in 0..steps {
            let (frames, _) = self.frames(false);
            let (samples, attempts) = self.solve_and_sample(&frames, self.iteration)?;
            report.attempts += attempts;
            let max_flux = report.max_flux[steps - 1 - step];
            for (frame, &sample) in frames.iter().zip(&samples) {
                let decision = if sample.flux < self.config.growth_threshold {
                    Decision::Stall
                } else {
                    let ctx = self.backward_context(frame, sample, max_flux);
                    Decision::Grow(self.config.law.compute_step(&ctx))
                };
                let outcome = advance_phase(&mut self.geometry, frame.id, decision)?;
                debug!(id = frame.id, ?outcome, "regrown");
            }
        }

        for (id, sample) in first_samples {
            let (Some(init), Some(backward), Some(regrown)) =
                (initial.tip(id), shrunk.tip(id), self.geometry.tip(id))
            else {
                continue;
            };
            let length = |g: &Geometry| g.branch(id).map_or(0.0, Branch::length);
            report.tips.insert(id, BackwardTip {
                sample,
                init: init.point,
                backward: backward.point,
                backward_forward: regrown.point,
                shrunk: length(initial) - length(&shrunk),
                regrown: length(&self.geometry) - length(&shrunk),
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use glam::DVec2;

    use super::*;
    use crate::{
        analytic::{SinkSolver, UniformSolver},
        boundary::{Boundary, Marker},
        config::{BifurcationCriterion, GrowthLaw, SpeedLimit},
        error::{CollaboratorError, GrowthError},
        mesh::{Mesh, Pslg, PslgMesher},
        point::Polar,
        types::Point,
    };

    const FRAME: [Marker; 4] = [Marker::Bottom, Marker::Right, Marker::Top, Marker::Left];

    fn geometry_with_source() -> (Geometry, BranchId) {
        let mut g = Geometry::new(Boundary::square(10.0, FRAME).unwrap(), 0.01);
        let id = g.initiate_root_branch(Point::new(5.0, 0.0), FRAC_PI_2).unwrap();
        (g, id)
    }

    fn gain_config() -> GrowthConfig {
        let mut cfg = GrowthConfig {
            eps: 0.01,
            max_iterations: 20,
            law: GrowthLaw::Gain { gain: 0.5 },
            ..GrowthConfig::default()
        };
        cfg.bifurcation.criterion = BifurcationCriterion::Never;
        cfg
    }

    fn uniform_model(cfg: GrowthConfig) -> GrowthModel<PslgMesher, UniformSolver> {
        let (g, _) = geometry_with_source();
        GrowthModel::new(
            g,
            cfg,
            PslgMesher,
            UniformSolver::new(DVec2::Y),
            BoundaryProblem::laplace(),
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_invalid_config_and_applies_eps() {
        let (g, _) = geometry_with_source();
        let mut cfg = gain_config();
        cfg.sampling.rings = 0;
        let err = GrowthModel::new(
            g.clone(),
            cfg,
            PslgMesher,
            UniformSolver::new(DVec2::Y),
            BoundaryProblem::laplace(),
        )
        .unwrap_err();
        assert!(matches!(err, GrowthError::InvalidConfig(_)));

        let model = uniform_model(gain_config());
        assert_eq!(model.geometry().eps(), 0.01);
        assert_eq!(model.state(1), Some(TipState::Growing));
    }

    #[test]
    fn step_reports_growth() {
        let mut model = uniform_model(gain_config());
        let report = model.step().unwrap();
        assert_eq!(report.iteration, 1);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.grown, vec![1]);
        assert!(report.stop.is_none());
        assert_eq!(model.iteration(), 1);
        let sample = report.samples[&1];
        assert_eq!(sample.tip_gradient, DVec2::Y);
        assert!(sample.flux > 0.0);
        assert_eq!(sample.count, model.stencil().len() as u32);
        let tail = model.geometry().branch(1).unwrap().tail();
        assert!((tail - Point::new(5.0, 0.5)).length() < 1e-9);
    }

    #[test]
    fn run_stops_on_iteration_budget() {
        let mut cfg = gain_config();
        cfg.max_iterations = 4;
        let mut model = uniform_model(cfg);
        let summary = model.run().unwrap();
        assert_eq!(summary.iterations, 4);
        assert_eq!(summary.stop, StopReason::IterationBudget);
        assert_eq!(summary.branches, 1);
        assert!(model.is_finished());

        // A finished model does not move.
        let report = model.step().unwrap();
        assert!(report.grown.is_empty());
        assert_eq!(report.stop, Some(StopReason::IterationBudget));
    }

    #[test]
    fn run_stops_at_height() {
        let mut cfg = gain_config();
        cfg.stop_height = Some(1.9);
        let mut model = uniform_model(cfg);
        let summary = model.run().unwrap();
        assert_eq!(summary.stop, StopReason::ReachedHeight);
        assert_eq!(summary.iterations, 4);
    }

    #[test]
    fn tip_at_the_wall_terminates_and_run_ends() {
        let mut cfg = gain_config();
        cfg.max_iterations = 100;
        let mut model = uniform_model(cfg);
        let summary = model.run().unwrap();
        assert_eq!(summary.stop, StopReason::AllTerminated);
        assert_eq!(
            model.state(1),
            Some(TipState::Terminated(TerminationReason::ReachedBoundary(Marker::Top)))
        );
        assert!(model.geometry().branch(1).unwrap().tail().y < 10.0);
    }

    #[test]
    fn depth_budget_terminates_instead_of_splitting() {
        let mut cfg = gain_config();
        cfg.bifurcation.criterion = BifurcationCriterion::Asymmetry { threshold: 0.0 };
        cfg.bifurcation.max_depth = Some(1);
        let mut model = uniform_model(cfg);
        for _ in 0..3 {
            model.step().unwrap();
        }
        assert_eq!(model.geometry().tree().len(), 3);
        assert_eq!(
            model.state(1),
            Some(TipState::Bifurcated { left: 2, right: 3 })
        );
        assert_eq!(
            model.state(2),
            Some(TipState::Terminated(TerminationReason::DepthLimit))
        );
    }

    #[test]
    fn failed_mesh_aborts_without_mutation() {
        let (g, id) = geometry_with_source();
        let mut cfg = gain_config();
        cfg.mesh_retry.retries = 1;
        let mesher = |_: &Pslg| -> Result<Mesh, CollaboratorError> { Err("degenerate".into()) };
        let mut model = GrowthModel::new(
            g,
            cfg,
            mesher,
            UniformSolver::new(DVec2::Y),
            BoundaryProblem::laplace(),
        )
        .unwrap();
        let err = model.step().unwrap_err();
        assert!(matches!(err, GrowthError::MeshGeneration { iteration: 1, .. }));
        assert_eq!(model.iteration(), 0);
        assert_eq!(model.geometry().branch(id).unwrap().len(), 1);
    }

    #[test]
    fn reset_clears_branches_and_new_sources_start_growing() {
        let mut model = uniform_model(gain_config());
        model.step().unwrap();
        model.reset();
        assert_eq!(model.iteration(), 0);
        assert!(model.geometry().tree().is_empty());
        assert!(model.states().is_empty());

        let report = model.step().unwrap();
        assert_eq!(report.stop, Some(StopReason::AllTerminated));

        let id = model
            .geometry_mut()
            .initiate_root_branch(Point::new(3.0, 0.0), FRAC_PI_2)
            .unwrap();
        let report = model.step().unwrap();
        assert_eq!(report.grown, vec![id]);
    }

    #[test]
    fn sink_field_drives_growth_upwards() {
        let (g, id) = geometry_with_source();
        let mut cfg = gain_config();
        cfg.law = GrowthLaw::Integral { ds: 0.2, eta: 1.0 };
        cfg.max_iterations = 5;
        let solver = SinkSolver::default();
        let problem = BoundaryProblem::laplace();
        let mut model = GrowthModel::new(g, cfg, PslgMesher, solver, problem).unwrap();
        let summary = model.run().unwrap();
        assert_eq!(summary.iterations, 5);
        let tail = model.geometry().branch(id).unwrap().tail();
        assert!(tail.y > 0.5, "tail {tail} did not advance");
    }

    #[test]
    fn same_seed_same_tree() {
        let grow = || {
            let mut cfg = gain_config();
            cfg.max_iterations = 6;
            cfg.seed = 11;
            cfg.bifurcation.criterion = BifurcationCriterion::Random { threshold: 0.5 };
            cfg.sampling.monte_carlo_points = Some(64);
            let mut model = uniform_model(cfg);
            model.run().unwrap();
            model.geometry().topology()
        };
        assert_eq!(grow(), grow());
    }

    #[test]
    fn speed_limit_slows_steps_down_to_recent_pace() {
        let mut cfg = gain_config();
        cfg.speed_limit = Some(SpeedLimit {
            window: 2,
            max_ratio: 0.5,
        });
        let mut model = uniform_model(cfg);
        for _ in 0..3 {
            model.step().unwrap();
        }
        let ys: Vec<f64> = model
            .geometry()
            .branch(1)
            .unwrap()
            .points()
            .iter()
            .map(|p| p.y)
            .collect();
        // 0.5 unlimited, then half of 0.5, then half of the mean of both.
        let expected = [0.0, 0.5, 0.75, 0.9375];
        for (y, e) in ys.iter().zip(expected) {
            assert!((y - e).abs() < 1e-9, "{ys:?}");
        }
        assert_eq!(ys.len(), 4);
    }

    #[test]
    fn failing_tip_rolls_back_the_whole_pass() {
        let (mut g, id) = geometry_with_source();
        let other = g.initiate_root_branch(Point::new(2.0, 0.0), FRAC_PI_2).unwrap();
        let mut model = GrowthModel::new(
            g,
            gain_config(),
            PslgMesher,
            UniformSolver::new(DVec2::Y),
            BoundaryProblem::laplace(),
        )
        .unwrap();

        let (mut frames, _) = model.frames(true);
        frames.push(TipFrame {
            id: 42,
            point: Point::new(8.0, 1.0),
            heading: FRAC_PI_2,
        });
        let sample = TipSample {
            tip_gradient: DVec2::Y,
            avg_gradient: DVec2::Y,
            flux: 1.0,
            left: 0.5,
            right: 0.5,
            asymmetry: 1.0,
            count: 8,
        };
        let samples = vec![sample; frames.len()];
        let mut report = IterationReport::default();
        let err = model
            .advance_tips(&frames, &samples, 1.0, &mut report)
            .unwrap_err();

        assert!(matches!(err, GrowthError::UnknownBranch { id: 42 }));
        assert_eq!(model.geometry().branch(id).unwrap().len(), 1);
        assert_eq!(model.geometry().branch(other).unwrap().len(), 1);
        assert_eq!(model.state(id), Some(TipState::Growing));
        assert_eq!(model.state(other), Some(TipState::Growing));
    }

    #[test]
    fn backward_run_needs_steps_and_restores_geometry() {
        let mut model = uniform_model(gain_config());
        for _ in 0..2 {
            model.step().unwrap();
        }
        let before = model.geometry().tree().clone();
        assert!(matches!(
            model.run_backward(0),
            Err(GrowthError::InvalidConfig(_))
        ));

        let report = model.run_backward(1).unwrap();
        assert_eq!(report.steps, 1);
        assert_eq!(report.max_flux.len(), 1);
        assert_eq!(report.attempts, 2);
        assert_eq!(model.geometry().tree(), &before);
        assert_eq!(model.iteration(), 2);
        assert_eq!(model.state(1), Some(TipState::Growing));
    }

    #[test]
    fn failed_backward_solve_restores_geometry() {
        let (mut g, id) = geometry_with_source();
        g.add_polar(id, Polar::new(1.0, 0.0)).unwrap();
        let mut solves = 0;
        let mesher = move |pslg: &Pslg| -> Result<Mesh, CollaboratorError> {
            solves += 1;
            if solves > 1 {
                Err("out of memory".into())
            } else {
                Ok(Mesh::from(pslg))
            }
        };
        let mut cfg = gain_config();
        cfg.mesh_retry.retries = 0;
        let mut model = GrowthModel::new(
            g,
            cfg,
            mesher,
            UniformSolver::new(DVec2::Y),
            BoundaryProblem::laplace(),
        )
        .unwrap();

        let err = model.run_backward(1).unwrap_err();
        assert!(matches!(err, GrowthError::MeshGeneration { .. }));
        let tail = model.geometry().branch(id).unwrap().tail();
        assert!((tail - Point::new(5.0, 1.0)).length() < 1e-9);
    }
}
