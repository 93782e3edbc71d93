//! Growth parameters, loadable from TOML.

use std::f64::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GrowthError, GrowthResult};

/// How a tip's step length is derived from the field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrowthLaw {
    /// `ds · (flux / max_flux)^eta`, with the flux integrated over the stencil.
    Integral { ds: f64, eta: f64 },
    /// `gain · |∇u|` at the tip.
    Gain { gain: f64 },
}

impl Default for GrowthLaw {
    fn default() -> Self {
        GrowthLaw::Integral { ds: 0.01, eta: 1.0 }
    }
}

/// When a tip splits instead of advancing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BifurcationCriterion {
    #[default]
    Never,
    /// Left/right flux ratio (larger over smaller) above `threshold`.
    Asymmetry { threshold: f64 },
    /// Normalised flux at or above `threshold`.
    Flux { threshold: f64 },
    /// Both of the above.
    Combined { asymmetry: f64, flux: f64 },
    /// Normalised flux times a uniform sample in [0, 1) at or above `threshold`.
    Random { threshold: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BifurcationConfig {
    pub criterion: BifurcationCriterion,
    /// Half the opening angle between the two children.
    pub angle: f64,
    /// A branch must be at least this long before it may split.
    pub min_length: f64,
    /// Tips at this depth terminate instead of splitting.
    pub max_depth: Option<usize>,
}

impl Default for BifurcationConfig {
    fn default() -> Self {
        Self {
            criterion: BifurcationCriterion::Asymmetry { threshold: 1.2 },
            angle: PI / 5.0,
            min_length: 0.05,
            max_depth: None,
        }
    }
}

/// Stencil used to integrate the field around each tip.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub radius: f64,
    pub weight_radius: f64,
    pub exponent: f64,
    pub rings: usize,
    pub sectors: usize,
    /// Use this many random points instead of the polar grid.
    pub monte_carlo_points: Option<usize>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            radius: 0.03,
            weight_radius: 0.01,
            exponent: 2.0,
            rings: 6,
            sectors: 16,
            monte_carlo_points: None,
        }
    }
}

/// Caps a tip's step at `max_ratio` times the mean length of its branch's
/// last `window` segments. Root-only branches are not capped.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedLimit {
    pub window: usize,
    pub max_ratio: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshRetryConfig {
    /// Extra attempts after a failed mesh or solve.
    pub retries: usize,
    /// Mesh sizes are multiplied by this on every retry.
    pub relax_factor: f64,
}

impl Default for MeshRetryConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            relax_factor: 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    pub eps: f64,
    pub max_iterations: usize,
    pub law: GrowthLaw,
    pub bifurcation: BifurcationConfig,
    pub sampling: SamplingConfig,
    /// Tips whose integrated flux is below this do not move.
    pub growth_threshold: f64,
    /// Branches shorter than this grow with a constant step (`eta = 0`).
    pub growth_min_distance: f64,
    /// Largest turn away from the current heading in one step.
    pub max_turn_angle: f64,
    pub speed_limit: Option<SpeedLimit>,
    pub mesh_retry: MeshRetryConfig,
    /// Stop once a tip reaches this y coordinate.
    pub stop_height: Option<f64>,
    pub seed: u64,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            eps: 1e-6,
            max_iterations: 10,
            law: GrowthLaw::default(),
            bifurcation: BifurcationConfig::default(),
            sampling: SamplingConfig::default(),
            growth_threshold: 0.0,
            growth_min_distance: 0.01,
            max_turn_angle: FRAC_PI_2,
            speed_limit: None,
            mesh_retry: MeshRetryConfig::default(),
            stop_height: None,
            seed: 0,
        }
    }
}

fn invalid(msg: String) -> GrowthError {
    GrowthError::InvalidConfig(msg)
}

fn positive(name: &str, value: f64) -> GrowthResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be positive, got {value}")))
    }
}

fn non_negative(name: &str, value: f64) -> GrowthResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} can't be negative, got {value}")))
    }
}

impl GrowthConfig {
    /// Parses and validates a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> GrowthResult<Self> {
        let cfg: GrowthConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects inconsistent parameters and warns about suspicious ones.
    pub fn validate(&self) -> GrowthResult<()> {
        positive("eps", self.eps)?;

        match self.law {
            GrowthLaw::Integral { ds, eta } => {
                positive("ds", ds)?;
                non_negative("eta", eta)?;
                if ds < 10.0 * self.eps {
                    warn!(ds, eps = self.eps, "step length is close to eps");
                }
                if eta > 10.0 {
                    warn!(eta, "eta is very large");
                }
            }
            GrowthLaw::Gain { gain } => positive("gain", gain)?,
        }

        let b = &self.bifurcation;
        if !(b.angle > 0.0 && b.angle <= FRAC_PI_2) {
            return Err(invalid(format!(
                "bifurcation angle must be in (0, pi/2], got {}",
                b.angle
            )));
        }
        if 2.0 * b.angle < self.eps {
            return Err(invalid(format!(
                "bifurcation split angle {} is below eps {}",
                2.0 * b.angle,
                self.eps
            )));
        }
        non_negative("bifurcation min_length", b.min_length)?;
        match b.criterion {
            BifurcationCriterion::Never => {}
            BifurcationCriterion::Asymmetry { threshold }
            | BifurcationCriterion::Flux { threshold }
            | BifurcationCriterion::Random { threshold } => {
                if !threshold.is_finite() {
                    return Err(invalid(format!("bifurcation threshold {threshold} is not finite")));
                }
                if threshold > 100.0 {
                    warn!(threshold, "bifurcation threshold is huge; tips will rarely split");
                }
            }
            BifurcationCriterion::Combined { asymmetry, flux } => {
                if !(asymmetry.is_finite() && flux.is_finite()) {
                    return Err(invalid("bifurcation thresholds must be finite".into()));
                }
            }
        }
        if b.max_depth == Some(0) {
            warn!("bifurcation max_depth is 0; no tip will ever split");
        }

        let s = &self.sampling;
        positive("sampling radius", s.radius)?;
        positive("sampling weight_radius", s.weight_radius)?;
        non_negative("sampling exponent", s.exponent)?;
        if s.rings == 0 || s.sectors == 0 {
            return Err(invalid(format!(
                "sampling grid needs rings and sectors, got {}x{}",
                s.rings, s.sectors
            )));
        }
        if s.monte_carlo_points == Some(0) {
            return Err(invalid("monte_carlo_points must be positive".into()));
        }
        if s.exponent > 100.0 {
            warn!(exponent = s.exponent, "weight function is close to a step function");
        }

        non_negative("growth_threshold", self.growth_threshold)?;
        non_negative("growth_min_distance", self.growth_min_distance)?;
        if !(self.max_turn_angle > 0.0 && self.max_turn_angle <= PI) {
            return Err(invalid(format!(
                "max_turn_angle must be in (0, pi], got {}",
                self.max_turn_angle
            )));
        }
        if let Some(limit) = self.speed_limit {
            if limit.window == 0 {
                return Err(invalid("speed_limit window must be positive".into()));
            }
            positive("speed_limit max_ratio", limit.max_ratio)?;
            if limit.max_ratio < 1.0 {
                warn!(max_ratio = limit.max_ratio, "speed limit slows every tip down");
            }
        }
        if !(self.mesh_retry.relax_factor >= 1.0 && self.mesh_retry.relax_factor.is_finite()) {
            return Err(invalid(format!(
                "mesh relax_factor must be at least 1, got {}",
                self.mesh_retry.relax_factor
            )));
        }
        if let Some(h) = self.stop_height
            && !h.is_finite()
        {
            return Err(invalid(format!("stop_height {h} is not finite")));
        }
        if self.max_iterations == 0 {
            warn!("max_iterations is 0; runs will not grow anything");
        }
        Ok(())
    }
}
