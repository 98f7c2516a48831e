//! Phase-space points and the Hamiltonian `H(θ, r) = -log p(θ) + K(r)`.

use crate::distributions::LogDensity;
use crate::error::{HmcError, Result};
use crate::metric::Metric;
use ndarray::Array1;
use rand::Rng;

/// Default energy error beyond which a trajectory is declared divergent.
pub const DEFAULT_MAX_DELTA_ENERGY: f64 = 1000.0;

/// A point in phase space with the log-density and its gradient cached at `theta`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePoint {
    pub theta: Array1<f64>,
    pub r: Array1<f64>,
    pub log_density: f64,
    pub grad_log_density: Array1<f64>,
}

impl PhasePoint {
    pub fn dim(&self) -> usize {
        self.theta.len()
    }

    /// Whether the cached log-density is finite, i.e. the point is feasible.
    pub fn is_finite(&self) -> bool {
        self.log_density.is_finite() && self.r.iter().all(|x| x.is_finite())
    }

    /// The same position and gradient with the momentum negated.
    pub fn flip_momentum(mut self) -> Self {
        self.r.mapv_inplace(|x| -x);
        self
    }
}

/// Couples a target density with a metric.
#[derive(Debug)]
pub struct Hamiltonian<'a, T: LogDensity + ?Sized> {
    target: &'a T,
    metric: Metric,
}

impl<T: LogDensity + ?Sized> Clone for Hamiltonian<'_, T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            metric: self.metric.clone(),
        }
    }
}

impl<'a, T: LogDensity + ?Sized> Hamiltonian<'a, T> {
    pub fn new(target: &'a T, metric: Metric) -> Result<Self> {
        if metric.dim() != target.dim() {
            return Err(HmcError::DimensionMismatch {
                expected: target.dim(),
                found: metric.dim(),
            });
        }
        Ok(Self { target, metric })
    }

    /// Same target, different metric.
    pub fn with_metric(&self, metric: Metric) -> Result<Self> {
        Self::new(self.target, metric)
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn target(&self) -> &'a T {
        self.target
    }

    pub fn dim(&self) -> usize {
        self.target.dim()
    }

    /// Evaluates the oracle at `theta`, returning `(log p(θ), ∇ log p(θ))`.
    ///
    /// A log-density of `-inf` is a legitimate answer for infeasible points; NaN,
    /// `+inf`, or a non-finite gradient at a finite log-density are not.
    pub fn gradient(&self, theta: &Array1<f64>) -> Result<(f64, Array1<f64>)> {
        if theta.len() != self.dim() {
            return Err(HmcError::DimensionMismatch {
                expected: self.dim(),
                found: theta.len(),
            });
        }
        let mut grad = Array1::zeros(theta.len());
        let logp = self.target.logp_and_grad(theta, &mut grad);
        if logp.is_nan() || logp == f64::INFINITY {
            return Err(HmcError::InvalidOracleOutput {
                log_density: logp,
                reason: "log-density must be finite or -inf".to_string(),
            });
        }
        if logp.is_finite() && grad.iter().any(|g| !g.is_finite()) {
            return Err(HmcError::InvalidOracleOutput {
                log_density: logp,
                reason: "gradient is not finite at a finite log-density".to_string(),
            });
        }
        Ok((logp, grad))
    }

    /// Builds a phase point at `theta` with momentum `r`.
    pub fn phase_point(&self, theta: Array1<f64>, r: Array1<f64>) -> Result<PhasePoint> {
        if r.len() != theta.len() {
            return Err(HmcError::DimensionMismatch {
                expected: theta.len(),
                found: r.len(),
            });
        }
        let (log_density, grad_log_density) = self.gradient(&theta)?;
        Ok(PhasePoint {
            theta,
            r,
            log_density,
            grad_log_density,
        })
    }

    /// Replaces the momentum of `z` with a fresh draw from the metric.
    pub fn refresh_momentum<R: Rng + ?Sized>(&self, rng: &mut R, mut z: PhasePoint) -> PhasePoint {
        z.r = self.metric.sample_momentum(rng);
        z
    }

    pub fn potential_energy(&self, z: &PhasePoint) -> f64 {
        -z.log_density
    }

    pub fn kinetic_energy(&self, z: &PhasePoint) -> f64 {
        self.metric.kinetic_energy(&z.r)
    }

    /// Total energy; infeasible or numerically broken points have energy `+inf`.
    pub fn energy(&self, z: &PhasePoint) -> f64 {
        let h = self.potential_energy(z) + self.kinetic_energy(z);
        if h.is_nan() {
            f64::INFINITY
        } else {
            h
        }
    }

    /// `∂H/∂r = M^{-1} r`.
    pub fn velocity(&self, r: &Array1<f64>) -> Array1<f64> {
        self.metric.velocity(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::StandardNormal;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    struct Broken(f64);

    impl LogDensity for Broken {
        fn dim(&self) -> usize {
            1
        }

        fn logp_and_grad(&self, _theta: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
            grad[0] = 0.0;
            self.0
        }
    }

    #[test]
    fn test_energy_standard_normal() {
        let target = StandardNormal::new(2);
        let h = Hamiltonian::new(&target, Metric::unit(2)).unwrap();
        let z = h.phase_point(arr1(&[1.0, 2.0]), arr1(&[0.5, 0.5])).unwrap();
        assert_abs_diff_eq!(h.potential_energy(&z), 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(h.kinetic_energy(&z), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(h.energy(&z), 2.75, epsilon = 1e-12);
        assert_abs_diff_eq!(z.grad_log_density, arr1(&[-1.0, -2.0]), epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_oracle_output_is_fatal() {
        let nan = Broken(f64::NAN);
        let h = Hamiltonian::new(&nan, Metric::unit(1)).unwrap();
        assert!(matches!(
            h.phase_point(arr1(&[0.0]), arr1(&[0.0])),
            Err(HmcError::InvalidOracleOutput { .. })
        ));

        let pos_inf = Broken(f64::INFINITY);
        let h = Hamiltonian::new(&pos_inf, Metric::unit(1)).unwrap();
        assert!(h.phase_point(arr1(&[0.0]), arr1(&[0.0])).is_err());
    }

    #[test]
    fn test_neg_inf_log_density_has_infinite_energy() {
        let infeasible = Broken(f64::NEG_INFINITY);
        let h = Hamiltonian::new(&infeasible, Metric::unit(1)).unwrap();
        let z = h.phase_point(arr1(&[0.0]), arr1(&[1.0])).unwrap();
        assert_eq!(h.energy(&z), f64::INFINITY);
        assert!(!z.is_finite());
    }

    #[test]
    fn test_dimension_mismatch() {
        let target = StandardNormal::new(3);
        assert!(matches!(
            Hamiltonian::new(&target, Metric::unit(2)),
            Err(HmcError::DimensionMismatch { .. })
        ));
    }
}
