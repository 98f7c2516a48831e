//! Symplectic integrators for Hamiltonian dynamics.
//!
//! All variants are built on the leapfrog scheme:
//! 1) a half-step momentum update using the gradient at the current position,
//! 2) a full-step position update using the velocity `M^{-1} r`,
//! 3) a half-step momentum update using the gradient at the new position.
//!
//! A negative step size integrates backwards in time, which is how the NUTS
//! tree is extended to the left.

use crate::distributions::LogDensity;
use crate::error::{HmcError, Result};
use crate::hamiltonian::{Hamiltonian, PhasePoint};
use ndarray::Array1;
use rand::Rng;

/// Selects the integrator built by the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum IntegratorKind {
    #[default]
    Leapfrog,
    /// Step size drawn uniformly from `ε (1 ± jitter)` once per trajectory.
    Jittered { jitter: f64 },
    /// Momentum tempering with factor `alpha`.
    Tempered { alpha: f64 },
}

impl IntegratorKind {
    pub fn build(self, step_size: f64) -> Result<Integrator> {
        let integrator = match self {
            IntegratorKind::Leapfrog => Integrator::Leapfrog { step_size },
            IntegratorKind::Jittered { jitter } => Integrator::JitteredLeapfrog { step_size, jitter },
            IntegratorKind::Tempered { alpha } => Integrator::TemperedLeapfrog { step_size, alpha },
        };
        integrator.validate()?;
        Ok(integrator)
    }
}

/// A leapfrog integrator with its nominal step size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Integrator {
    Leapfrog { step_size: f64 },
    JitteredLeapfrog { step_size: f64, jitter: f64 },
    TemperedLeapfrog { step_size: f64, alpha: f64 },
}

impl Integrator {
    pub fn leapfrog(step_size: f64) -> Self {
        Integrator::Leapfrog { step_size }
    }

    pub fn validate(&self) -> Result<()> {
        let eps = self.nominal_step_size();
        if !(eps.is_finite() && eps > 0.0) {
            return Err(HmcError::InvalidConfig(format!(
                "step size must be positive and finite, got {eps}"
            )));
        }
        match *self {
            Integrator::JitteredLeapfrog { jitter, .. } if !(0.0..1.0).contains(&jitter) => Err(
                HmcError::InvalidConfig(format!("jitter must lie in [0, 1), got {jitter}")),
            ),
            Integrator::TemperedLeapfrog { alpha, .. } if !(alpha.is_finite() && alpha > 0.0) => {
                Err(HmcError::InvalidConfig(format!(
                    "tempering factor must be positive and finite, got {alpha}"
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn nominal_step_size(&self) -> f64 {
        match *self {
            Integrator::Leapfrog { step_size }
            | Integrator::JitteredLeapfrog { step_size, .. }
            | Integrator::TemperedLeapfrog { step_size, .. } => step_size,
        }
    }

    /// The same integrator with a new nominal step size.
    pub fn with_step_size(self, eps: f64) -> Self {
        match self {
            Integrator::Leapfrog { .. } => Integrator::Leapfrog { step_size: eps },
            Integrator::JitteredLeapfrog { jitter, .. } => Integrator::JitteredLeapfrog {
                step_size: eps,
                jitter,
            },
            Integrator::TemperedLeapfrog { alpha, .. } => Integrator::TemperedLeapfrog {
                step_size: eps,
                alpha,
            },
        }
    }

    /// Step size to use for one whole trajectory.
    pub fn draw_step_size<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Integrator::JitteredLeapfrog { step_size, jitter } => {
                let u: f64 = rng.gen();
                step_size * (1.0 + jitter * (2.0 * u - 1.0))
            }
            _ => self.nominal_step_size(),
        }
    }

    /// Integrates `n_steps` leapfrog steps of signed size `step_size` from `z`.
    ///
    /// Integration stops early, returning the offending point, as soon as the
    /// log-density stops being finite.
    pub fn step<T: LogDensity + ?Sized>(
        &self,
        h: &Hamiltonian<'_, T>,
        z: &PhasePoint,
        step_size: f64,
        n_steps: usize,
    ) -> Result<PhasePoint> {
        let mut current = z.clone();
        for i in 1..=n_steps {
            current = self.single_step(h, current, step_size, i, n_steps)?;
            if !current.is_finite() {
                break;
            }
        }
        Ok(current)
    }

    /// Like [`Integrator::step`] but returns every intermediate point (excluding `z`).
    pub fn trajectory<T: LogDensity + ?Sized>(
        &self,
        h: &Hamiltonian<'_, T>,
        z: &PhasePoint,
        step_size: f64,
        n_steps: usize,
    ) -> Result<Vec<PhasePoint>> {
        let mut points = Vec::with_capacity(n_steps);
        let mut current = z.clone();
        for i in 1..=n_steps {
            current = self.single_step(h, current, step_size, i, n_steps)?;
            points.push(current.clone());
            if !current.is_finite() {
                break;
            }
        }
        Ok(points)
    }

    fn single_step<T: LogDensity + ?Sized>(
        &self,
        h: &Hamiltonian<'_, T>,
        z: PhasePoint,
        eps: f64,
        i: usize,
        n_steps: usize,
    ) -> Result<PhasePoint> {
        let half = 0.5 * eps;
        let PhasePoint {
            mut theta,
            mut r,
            grad_log_density,
            ..
        } = z;

        self.temper(&mut r, i, true, n_steps);
        r.scaled_add(half, &grad_log_density);

        let v = h.velocity(&r);
        theta.scaled_add(eps, &v);

        // An overflowing position is an integrator failure, not an oracle one.
        let (log_density, grad) = if theta.iter().all(|x| x.is_finite()) {
            h.gradient(&theta)?
        } else {
            (f64::NEG_INFINITY, Array1::zeros(theta.len()))
        };

        r.scaled_add(half, &grad);
        self.temper(&mut r, i, false, n_steps);

        Ok(PhasePoint {
            theta,
            r,
            log_density,
            grad_log_density: grad,
        })
    }

    // Half-steps of the first half of a trajectory heat the momentum, those of the
    // second half cool it, so the schedule is palindromic and reversible.
    fn temper(&self, r: &mut Array1<f64>, i: usize, is_half: bool, n_steps: usize) {
        if let Integrator::TemperedLeapfrog { alpha, .. } = *self {
            let i_temper = 2 * (i - 1) + 1 + is_half as usize;
            let factor = if i_temper <= n_steps {
                alpha.sqrt()
            } else {
                1.0 / alpha.sqrt()
            };
            r.mapv_inplace(|x| x * factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{MvGaussian, StandardNormal};
    use crate::metric::Metric;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn assert_points_close(a: &PhasePoint, b: &PhasePoint, tol: f64) {
        assert_abs_diff_eq!(a.theta, b.theta, epsilon = tol);
        assert_abs_diff_eq!(a.r, b.r, epsilon = tol);
        assert_abs_diff_eq!(a.log_density, b.log_density, epsilon = tol);
    }

    fn correlated_target() -> MvGaussian {
        MvGaussian::new(
            arr1(&[0.5, -1.0, 2.0]),
            arr2(&[[2.0, 0.3, 0.1], [0.3, 1.0, -0.2], [0.1, -0.2, 0.5]]),
        )
        .unwrap()
    }

    #[test]
    fn test_reversibility_all_variants() {
        let target = correlated_target();
        let metric = Metric::dense(arr2(&[[1.5, 0.2, 0.0], [0.2, 1.0, 0.1], [0.0, 0.1, 0.7]])).unwrap();
        let h = Hamiltonian::new(&target, metric).unwrap();
        let z0 = h
            .phase_point(arr1(&[0.1, 0.2, -0.3]), arr1(&[1.0, -0.5, 0.25]))
            .unwrap();
        let integrators = [
            Integrator::leapfrog(0.1),
            Integrator::JitteredLeapfrog {
                step_size: 0.1,
                jitter: 0.5,
            },
            Integrator::TemperedLeapfrog {
                step_size: 0.1,
                alpha: 1.05,
            },
        ];
        for integrator in integrators {
            for n_steps in [1, 4, 7] {
                let forward = integrator.step(&h, &z0, 0.1, n_steps).unwrap();
                let back = integrator.step(&h, &forward, -0.1, n_steps).unwrap();
                assert_points_close(&back, &z0, 1e-10);
            }
        }
    }

    #[test]
    fn test_energy_drift_is_bounded() {
        let target = StandardNormal::new(5);
        let h = Hamiltonian::new(&target, Metric::unit(5)).unwrap();
        let z0 = h
            .phase_point(
                arr1(&[1.0, -0.5, 0.3, 0.8, -1.2]),
                arr1(&[0.5, 1.0, -0.7, 0.2, 0.4]),
            )
            .unwrap();
        let h0 = h.energy(&z0);
        let integrator = Integrator::leapfrog(0.05);

        let mut max_err_short: f64 = 0.0;
        let mut max_err_long: f64 = 0.0;
        let mut z = z0.clone();
        for i in 0..2000 {
            z = integrator.step(&h, &z, 0.05, 1).unwrap();
            let err = (h.energy(&z) - h0).abs();
            if i < 200 {
                max_err_short = max_err_short.max(err);
            }
            max_err_long = max_err_long.max(err);
        }
        // O(ε^2) and no secular growth.
        assert!(max_err_long < 0.05 * 0.05 * h0, "energy error {max_err_long}");
        assert!(max_err_long < 1.5 * max_err_short + 1e-12);

        // Halving ε shrinks the error roughly fourfold.
        let small = Integrator::leapfrog(0.025);
        let mut z = z0.clone();
        let mut max_err_small: f64 = 0.0;
        for _ in 0..4000 {
            z = small.step(&h, &z, 0.025, 1).unwrap();
            max_err_small = max_err_small.max((h.energy(&z) - h0).abs());
        }
        assert!(max_err_small < 0.35 * max_err_long);
    }

    #[test]
    fn test_jittered_step_size_bounds() {
        let integrator = Integrator::JitteredLeapfrog {
            step_size: 0.2,
            jitter: 0.25,
        };
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..1000 {
            let eps = integrator.draw_step_size(&mut rng);
            assert!((0.15..=0.25).contains(&eps));
        }
        assert_eq!(Integrator::leapfrog(0.2).draw_step_size(&mut rng), 0.2);
    }

    #[test]
    fn test_tempering_single_step_is_energy_neutral_in_the_limit() {
        // With alpha = 1 tempering is the identity.
        let target = StandardNormal::new(2);
        let h = Hamiltonian::new(&target, Metric::unit(2)).unwrap();
        let z0 = h.phase_point(arr1(&[0.3, 0.4]), arr1(&[1.0, 0.0])).unwrap();
        let plain = Integrator::leapfrog(0.1).step(&h, &z0, 0.1, 5).unwrap();
        let tempered = Integrator::TemperedLeapfrog {
            step_size: 0.1,
            alpha: 1.0,
        }
        .step(&h, &z0, 0.1, 5)
        .unwrap();
        assert_points_close(&plain, &tempered, 1e-14);
    }

    #[test]
    fn test_trajectory_returns_all_points() {
        let target = StandardNormal::new(2);
        let h = Hamiltonian::new(&target, Metric::unit(2)).unwrap();
        let z0 = h.phase_point(arr1(&[0.3, 0.4]), arr1(&[1.0, 0.0])).unwrap();
        let integrator = Integrator::leapfrog(0.1);
        let points = integrator.trajectory(&h, &z0, 0.1, 6).unwrap();
        assert_eq!(points.len(), 6);
        let end = integrator.step(&h, &z0, 0.1, 6).unwrap();
        assert_points_close(&points[5], &end, 1e-14);
    }

    #[test]
    fn test_validate() {
        assert!(Integrator::leapfrog(0.0).validate().is_err());
        assert!(Integrator::leapfrog(f64::NAN).validate().is_err());
        assert!(IntegratorKind::Jittered { jitter: 1.0 }.build(0.1).is_err());
        assert!(IntegratorKind::Tempered { alpha: -1.0 }.build(0.1).is_err());
        let kind = IntegratorKind::Tempered { alpha: 1.1 }.build(0.1).unwrap();
        assert_eq!(kind.with_step_size(0.3).nominal_step_size(), 0.3);
    }
}
