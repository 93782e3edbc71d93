//! Per-tip growth decisions: step length, steering and bifurcation.

use glam::DVec2;
use rand::Rng;

use crate::{
    config::{BifurcationCriterion, GrowthLaw, SpeedLimit},
    point::{PointExt, Polar, ZERO_NORM, direction},
    types::{BranchId, Point},
};

/// Field samples gathered around one tip.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TipSample {
    /// Gradient at the tip point itself.
    pub tip_gradient: DVec2,
    /// Weight-averaged gradient over the stencil.
    pub avg_gradient: DVec2,
    /// Integrated flux `Σ w·|∇u|` over the stencil.
    pub flux: f64,
    pub left: f64,
    pub right: f64,
    /// Larger side flux over smaller side flux.
    pub asymmetry: f64,
    /// Stencil points that fell inside the field's support.
    pub count: u32,
}

/// Everything the growth law needs to know about one tip in one iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TipContext {
    pub id: BranchId,
    pub point: Point,
    pub heading: f64,
    pub branch_length: f64,
    pub depth: usize,
    pub sample: TipSample,
    /// Largest integrated flux over all tips of the iteration.
    pub max_flux: f64,
    /// Branches shorter than this grow with `eta = 0`.
    pub growth_min_distance: f64,
    pub max_turn_angle: f64,
    /// Mean recent segment length of the tip's branch, see
    /// [`crate::branch::Branch::average_speed`].
    pub average_speed: Option<f64>,
    pub speed_limit: Option<SpeedLimit>,
}

impl TipContext {
    /// Flux relative to the strongest tip, in [0, 1].
    pub fn normalized_flux(&self) -> f64 {
        if self.max_flux > 0.0 {
            self.sample.flux / self.max_flux
        } else {
            0.0
        }
    }

    /// Turn from the current heading towards the sampled gradient, clamped to
    /// `±max_turn_angle`. Zero when the field gives no direction.
    pub fn steering(&self) -> f64 {
        let target = if self.sample.avg_gradient.length() > ZERO_NORM {
            self.sample.avg_gradient
        } else {
            self.sample.tip_gradient
        };
        direction(self.heading)
            .signed_angle_to(target)
            .unwrap_or(0.0)
            .clamp(-self.max_turn_angle, self.max_turn_angle)
    }
}

impl GrowthLaw {
    /// Step for this tip, with `phi` relative to the tip heading.
    ///
    /// With a speed limit set, the step never exceeds `max_ratio` times the
    /// branch's average speed.
    pub fn compute_step(&self, ctx: &TipContext) -> Polar {
        let mut r = match *self {
            GrowthLaw::Integral { ds, eta } => {
                let eta = if ctx.branch_length < ctx.growth_min_distance {
                    0.0
                } else {
                    eta
                };
                ds * ctx.normalized_flux().powf(eta)
            }
            GrowthLaw::Gain { gain } => gain * ctx.sample.tip_gradient.length(),
        };
        if let (Some(limit), Some(speed)) = (ctx.speed_limit, ctx.average_speed) {
            r = r.min(limit.max_ratio * speed);
        }
        Polar::new(r, ctx.steering())
    }
}

impl BifurcationCriterion {
    /// Whether the field around this tip calls for a split. Only the
    /// [`BifurcationCriterion::Random`] variant draws from `rng`.
    pub fn should_bifurcate(&self, ctx: &TipContext, rng: &mut impl Rng) -> bool {
        match *self {
            BifurcationCriterion::Never => false,
            BifurcationCriterion::Asymmetry { threshold } => ctx.sample.asymmetry > threshold,
            BifurcationCriterion::Flux { threshold } => ctx.normalized_flux() >= threshold,
            BifurcationCriterion::Combined { asymmetry, flux } => {
                ctx.sample.asymmetry > asymmetry && ctx.normalized_flux() >= flux
            }
            BifurcationCriterion::Random { threshold } => {
                ctx.normalized_flux() * rng.random::<f64>() >= threshold
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use std::f64::consts::PI;

    fn ctx(flux: f64, max_flux: f64) -> TipContext {
        TipContext {
            id: 1,
            point: Point::new(0.0, 1.0),
            heading: PI / 2.0,
            branch_length: 1.0,
            depth: 0,
            sample: TipSample {
                tip_gradient: DVec2::new(0.0, 2.0),
                avg_gradient: DVec2::new(0.0, 2.0),
                flux,
                left: flux / 2.0,
                right: flux / 2.0,
                asymmetry: 1.0,
                count: 8,
            },
            max_flux,
            growth_min_distance: 0.1,
            max_turn_angle: PI / 4.0,
            average_speed: None,
            speed_limit: None,
        }
    }

    #[test]
    fn gain_law_scales_tip_gradient() {
        let step = GrowthLaw::Gain { gain: 0.25 }.compute_step(&ctx(1.0, 1.0));
        assert!((step.r - 0.5).abs() < 1e-12);
        assert!(step.phi.abs() < 1e-12);
    }

    #[test]
    fn integral_law_normalizes_by_strongest_tip() {
        let law = GrowthLaw::Integral { ds: 0.1, eta: 2.0 };
        let step = law.compute_step(&ctx(0.5, 1.0));
        assert!((step.r - 0.025).abs() < 1e-12);

        let strongest = law.compute_step(&ctx(1.0, 1.0));
        assert!((strongest.r - 0.1).abs() < 1e-12);
    }

    #[test]
    fn short_branches_grow_with_constant_step() {
        let law = GrowthLaw::Integral { ds: 0.1, eta: 2.0 };
        let mut c = ctx(0.5, 1.0);
        c.branch_length = 0.05;
        assert!((law.compute_step(&c).r - 0.1).abs() < 1e-12);
    }

    #[test]
    fn speed_limit_caps_fast_steps() {
        let law = GrowthLaw::Integral { ds: 0.1, eta: 1.0 };
        let mut c = ctx(1.0, 1.0);
        c.speed_limit = Some(SpeedLimit {
            window: 3,
            max_ratio: 2.0,
        });
        // A root-only branch has no speed yet.
        assert!((law.compute_step(&c).r - 0.1).abs() < 1e-12);

        c.average_speed = Some(0.01);
        assert!((law.compute_step(&c).r - 0.02).abs() < 1e-12);
        c.average_speed = Some(0.04);
        assert!((law.compute_step(&c).r - 0.08).abs() < 1e-12);
        c.average_speed = Some(1.0);
        assert!((law.compute_step(&c).r - 0.1).abs() < 1e-12);

        let gain = GrowthLaw::Gain { gain: 0.25 };
        c.average_speed = Some(0.1);
        assert!((gain.compute_step(&c).r - 0.2).abs() < 1e-12);
    }

    #[test]
    fn steering_is_clamped() {
        let mut c = ctx(1.0, 1.0);
        // Gradient points straight right, a 90 degree turn.
        c.sample.avg_gradient = DVec2::new(1.0, 0.0);
        assert!((c.steering() + PI / 4.0).abs() < 1e-12);

        c.sample.avg_gradient = DVec2::new(-1.0, 1.0);
        assert!((c.steering() - PI / 4.0).abs() < 1e-12);

        c.sample.avg_gradient = DVec2::ZERO;
        c.sample.tip_gradient = DVec2::ZERO;
        assert_eq!(c.steering(), 0.0);
    }

    #[test]
    fn criteria() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut c = ctx(0.5, 1.0);
        assert!(!BifurcationCriterion::Never.should_bifurcate(&c, &mut rng));
        assert!(BifurcationCriterion::Asymmetry { threshold: 0.0 }.should_bifurcate(&c, &mut rng));
        assert!(!BifurcationCriterion::Asymmetry { threshold: 1.5 }.should_bifurcate(&c, &mut rng));
        assert!(BifurcationCriterion::Flux { threshold: 0.5 }.should_bifurcate(&c, &mut rng));
        assert!(!BifurcationCriterion::Flux { threshold: 0.6 }.should_bifurcate(&c, &mut rng));

        c.sample.asymmetry = 3.0;
        let combined = BifurcationCriterion::Combined {
            asymmetry: 2.0,
            flux: 0.4,
        };
        assert!(combined.should_bifurcate(&c, &mut rng));
        c.sample.flux = 0.1;
        assert!(!combined.should_bifurcate(&c, &mut rng));
    }

    #[test]
    fn random_criterion_is_seeded() {
        let c = ctx(1.0, 1.0);
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..32)
                .map(|_| {
                    BifurcationCriterion::Random { threshold: 0.5 }.should_bifurcate(&c, &mut rng)
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
        assert!(draw(9).contains(&true));
        assert!(draw(9).contains(&false));
        // With no flux nothing ever splits.
        let mut rng = StdRng::seed_from_u64(9);
        let starved = ctx(0.0, 1.0);
        let random = BifurcationCriterion::Random { threshold: 0.1 };
        assert!(!random.should_bifurcate(&starved, &mut rng));
    }
}
