//! Step-size adaptation by Nesterov dual averaging (Hoffman & Gelman 2014, §3.2).

use crate::config::DualAveragingConfig;
use crate::distributions::LogDensity;
use crate::error::{HmcError, Result};
use crate::hamiltonian::{Hamiltonian, PhasePoint};
use crate::integrator::Integrator;
use rand::Rng;

/// Dual-averaging state. `m` counts adaptation steps since the last reset.
#[derive(Debug, Clone, PartialEq)]
pub struct NesterovDualAveraging {
    config: DualAveragingConfig,
    /// Target acceptance statistic δ.
    delta: f64,
    m: usize,
    step_size: f64,
    mu: f64,
    x_bar: f64,
    h_bar: f64,
}

impl NesterovDualAveraging {
    pub fn new(delta: f64, initial_step_size: f64) -> Self {
        Self::with_config(DualAveragingConfig::default(), delta, initial_step_size)
    }

    pub fn with_config(config: DualAveragingConfig, delta: f64, initial_step_size: f64) -> Self {
        Self {
            config,
            delta,
            m: 0,
            step_size: initial_step_size,
            mu: (10.0 * initial_step_size).ln(),
            x_bar: 0.0,
            h_bar: 0.0,
        }
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn target_accept(&self) -> f64 {
        self.delta
    }

    /// Number of updates since construction or the last reset.
    pub fn count(&self) -> usize {
        self.m
    }

    /// Feeds one acceptance statistic and returns the next step size.
    pub fn adapt(&mut self, accept_stat: f64) -> f64 {
        let alpha = if accept_stat.is_nan() {
            0.0
        } else {
            accept_stat.min(1.0)
        };
        let DualAveragingConfig { gamma, t0, kappa } = self.config;

        self.m += 1;
        let m = self.m as f64;
        let eta = 1.0 / (m + t0);
        self.h_bar = (1.0 - eta) * self.h_bar + eta * (self.delta - alpha);

        let x = self.mu - m.sqrt() / gamma * self.h_bar;
        let w = m.powf(-kappa);
        self.x_bar = w * x + (1.0 - w) * self.x_bar;

        self.step_size = x.exp();
        self.step_size
    }

    /// Switches to the averaged iterate `exp(x̄)`; used at the end of warm-up.
    pub fn finalize(&mut self) -> f64 {
        if self.m > 0 {
            self.step_size = self.x_bar.exp();
        }
        self.step_size
    }

    /// Restarts the averaging around the current step size.
    pub fn reset(&mut self) {
        self.m = 0;
        self.mu = (10.0 * self.step_size).ln();
        self.x_bar = 0.0;
        self.h_bar = 0.0;
    }
}

/// Heuristic initial step size (Hoffman & Gelman 2014, Algorithm 4).
///
/// Starting from `initial`, doubles or halves the step size until the acceptance
/// probability of a single leapfrog step with a fresh momentum crosses 0.5.
pub fn find_reasonable_step_size<T, R>(
    rng: &mut R,
    h: &Hamiltonian<'_, T>,
    z: &PhasePoint,
    initial: f64,
) -> Result<f64>
where
    T: LogDensity + ?Sized,
    R: Rng + ?Sized,
{
    const MAX_ITERS: usize = 100;
    let log_cross = 0.5f64.ln();

    if !z.log_density.is_finite() {
        return Err(HmcError::InvalidConfig(
            "cannot tune the step size from a point with zero density".to_string(),
        ));
    }
    let z = h.refresh_momentum(rng, z.clone());
    let h0 = h.energy(&z);
    let log_accept = |eps: f64| -> Result<f64> {
        let z_new = Integrator::leapfrog(eps).step(h, &z, eps, 1)?;
        Ok(h0 - h.energy(&z_new))
    };

    let mut eps = initial;
    let increase = log_accept(eps)? > log_cross;
    for _ in 0..MAX_ITERS {
        let next = if increase { 2.0 * eps } else { 0.5 * eps };
        let crossed = if increase {
            !(log_accept(next)? > log_cross)
        } else {
            log_accept(next)? > log_cross
        };
        eps = next;
        if crossed {
            break;
        }
    }
    log::debug!("initial step size {eps}");
    Ok(eps)
}
