//! Trajectory selection and the single-transition entry point.
//!
//! A [`Trajectory`] decides how far to integrate and how to pick the next state
//! from the points visited. The No-U-Turn variant lives in [`crate::nuts`], the
//! static ones (plain HMC and HMCDA) in [`crate::hmc`].

use crate::distributions::LogDensity;
use crate::error::{HmcError, Result};
use crate::hamiltonian::{Hamiltonian, PhasePoint, DEFAULT_MAX_DELTA_ENERGY};
use crate::integrator::Integrator;
use crate::{hmc, nuts};
use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;

/// Default maximum NUTS tree depth.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// U-turn rule used to stop doubling a NUTS tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationCriterion {
    /// Hoffman & Gelman: compares the end momenta with the span `θ⁺ − θ⁻`.
    Classic,
    /// Betancourt: compares the end velocities with the summed momentum of the tree,
    /// and additionally checks the two merged sub-trees.
    #[default]
    Generalised,
}

/// How a NUTS candidate is drawn from the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionKernel {
    Slice,
    #[default]
    Multinomial,
}

/// How a static trajectory picks its proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaticKernel {
    /// Accept the end point with probability `min(1, exp(H₀ − H′))`.
    Metropolis,
    /// Sample a point of the whole trajectory proportionally to `exp(−H)`.
    #[default]
    Multinomial,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trajectory {
    Nuts {
        max_depth: usize,
        max_delta_energy: f64,
        criterion: TerminationCriterion,
        kernel: TransitionKernel,
    },
    /// Exactly `n_steps` leapfrog steps.
    FixedSteps {
        n_steps: usize,
        max_delta_energy: f64,
        kernel: StaticKernel,
    },
    /// HMCDA: `max(1, ⌊λ/ε⌋)` leapfrog steps for the nominal step size `ε`.
    FixedIntegrationTime {
        lambda: f64,
        max_delta_energy: f64,
        kernel: StaticKernel,
    },
}

impl Default for Trajectory {
    fn default() -> Self {
        Trajectory::nuts()
    }
}

impl Trajectory {
    /// NUTS with the default depth, divergence threshold, criterion and kernel.
    pub fn nuts() -> Self {
        Trajectory::Nuts {
            max_depth: DEFAULT_MAX_DEPTH,
            max_delta_energy: DEFAULT_MAX_DELTA_ENERGY,
            criterion: TerminationCriterion::default(),
            kernel: TransitionKernel::default(),
        }
    }

    /// Energy error beyond which a trajectory is flagged divergent.
    pub fn max_delta_energy(&self) -> f64 {
        match *self {
            Trajectory::Nuts {
                max_delta_energy, ..
            }
            | Trajectory::FixedSteps {
                max_delta_energy, ..
            }
            | Trajectory::FixedIntegrationTime {
                max_delta_energy, ..
            } => max_delta_energy,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let max_delta_energy = self.max_delta_energy();
        if !(max_delta_energy > 0.0) {
            return Err(HmcError::InvalidConfig(format!(
                "max_delta_energy must be positive, got {max_delta_energy}"
            )));
        }
        match *self {
            Trajectory::Nuts { max_depth, .. } => {
                if max_depth == 0 {
                    return Err(HmcError::InvalidConfig(
                        "max_depth must be at least 1".to_string(),
                    ));
                }
            }
            Trajectory::FixedSteps { n_steps, .. } => {
                if n_steps == 0 {
                    return Err(HmcError::InvalidConfig(
                        "n_steps must be at least 1".to_string(),
                    ));
                }
            }
            Trajectory::FixedIntegrationTime { lambda, .. } => {
                if !(lambda.is_finite() && lambda > 0.0) {
                    return Err(HmcError::InvalidConfig(format!(
                        "integration time must be positive and finite, got {lambda}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of leapfrog steps of a static trajectory, `None` for NUTS.
    pub fn n_steps(&self, nominal_step_size: f64) -> Option<usize> {
        match *self {
            Trajectory::Nuts { .. } => None,
            Trajectory::FixedSteps { n_steps, .. } => Some(n_steps),
            Trajectory::FixedIntegrationTime { lambda, .. } => {
                Some(((lambda / nominal_step_size).floor() as usize).clamp(1, MAX_HMCDA_STEPS))
            }
        }
    }
}

/// Upper bound on the leapfrog steps of a fixed-integration-time trajectory.
pub const MAX_HMCDA_STEPS: usize = 1000;

/// Diagnostics of one transition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransitionStats {
    /// Step size actually used (after jitter).
    pub step_size: f64,
    pub n_leapfrog_steps: usize,
    /// Mean Metropolis acceptance probability over the visited points; fed to dual averaging.
    pub acceptance_rate: f64,
    pub tree_depth: usize,
    pub divergent: bool,
    /// Hamiltonian of the returned point.
    pub energy: f64,
    /// `H(returned) − H₀`.
    pub energy_error: f64,
    /// Energy error of largest magnitude along the trajectory.
    pub max_energy_error: f64,
    pub log_density: f64,
    pub is_accept: bool,
    /// NUTS stopped on a U-turn.
    pub turning: bool,
    pub hit_max_depth: bool,
    pub numerical_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub point: PhasePoint,
    pub stats: TransitionStats,
}

/// Runs one transition from `z0`.
///
/// The momentum of `z0` is ignored: a fresh one is drawn from the metric.
pub fn transition<T, R>(
    rng: &mut R,
    h: &Hamiltonian<'_, T>,
    integrator: &Integrator,
    trajectory: &Trajectory,
    z0: &PhasePoint,
) -> Result<Transition>
where
    T: LogDensity + ?Sized,
    R: Rng + ?Sized,
{
    let z = h.refresh_momentum(rng, z0.clone());
    match *trajectory {
        Trajectory::Nuts {
            max_depth,
            max_delta_energy,
            criterion,
            kernel,
        } => {
            let options = nuts::NutsOptions {
                max_depth,
                max_delta_energy,
                criterion,
                kernel,
            };
            nuts::transition(rng, h, integrator, &options, z)
        }
        Trajectory::FixedSteps {
            max_delta_energy,
            kernel,
            ..
        }
        | Trajectory::FixedIntegrationTime {
            max_delta_energy,
            kernel,
            ..
        } => {
            let n_steps = trajectory
                .n_steps(integrator.nominal_step_size())
                .unwrap_or(1);
            let options = hmc::StaticOptions {
                n_steps,
                max_delta_energy,
                kernel,
            };
            hmc::transition(rng, h, integrator, &options, z)
        }
    }
}

/// `log(exp(a) + exp(b))` without overflow.
pub(crate) fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + (-(a - b).abs()).exp().ln_1p()
}

/// Draws an index with probability proportional to `exp(log_weights[i])`.
///
/// Uses a single uniform draw. Fails when no entry has positive weight.
pub fn randcat_logp<R: Rng + ?Sized>(rng: &mut R, log_weights: ArrayView1<f64>) -> Result<usize> {
    let max = log_weights.fold(f64::NEG_INFINITY, |m, &w| if w > m { w } else { m });
    if max == f64::NEG_INFINITY {
        return Err(HmcError::EmptyInput(
            "no category has positive weight".to_string(),
        ));
    }
    let total: f64 = log_weights.iter().map(|w| (w - max).exp()).sum();
    let u = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut last_positive = 0;
    for (i, w) in log_weights.iter().enumerate() {
        let p = (w - max).exp();
        if p > 0.0 {
            last_positive = i;
        }
        cumulative += p;
        if u < cumulative {
            return Ok(i);
        }
    }
    Ok(last_positive)
}

/// One independent categorical draw per chain, row `i` using `rngs[i]`.
pub fn randcat_logp_chains<R: Rng>(rngs: &mut [R], log_weights: ArrayView2<f64>) -> Result<Vec<usize>> {
    if rngs.len() != log_weights.nrows() {
        return Err(HmcError::StreamLengthMismatch {
            expected: log_weights.nrows(),
            found: rngs.len(),
        });
    }
    rngs.iter_mut()
        .zip(log_weights.rows())
        .map(|(rng, row)| randcat_logp(rng, row))
        .collect()
}
