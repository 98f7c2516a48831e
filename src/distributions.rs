/*!
Defines the log-density oracle consumed by the engine together with a handful of
reference targets used in tests and demos.

The engine never evaluates densities itself: everything goes through
[`LogDensity::logp_and_grad`], which returns the (unnormalized) log-density at a
position and writes its gradient into a caller-provided buffer.

# Examples

```rust
use mini_hmc::distributions::{LogDensity, MvGaussian};
use ndarray::{arr1, arr2};

let target = MvGaussian::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap();
let theta = arr1(&[0.0, 1.0]);
let mut grad = ndarray::Array1::zeros(2);
let logp = target.logp_and_grad(&theta, &mut grad);
assert_eq!(logp, 0.0);
assert_eq!(grad, arr1(&[0.0, 0.0]));
```
*/

use crate::error::{HmcError, Result};
use nalgebra as na;
use ndarray::{Array1, Array2};

/// A differentiable target density.
///
/// Implementations must be pure: the same `theta` always yields the same output.
/// Returning `f64::NEG_INFINITY` marks `theta` as infeasible; the sampler treats
/// such a point as a divergence rather than an error. NaN and `+inf` are contract
/// violations and abort the run.
pub trait LogDensity {
    /// Dimension of the parameter space.
    fn dim(&self) -> usize;

    /// Returns `log p(theta)` (up to an additive constant) and writes
    /// `∇ log p(theta)` into `grad`.
    fn logp_and_grad(&self, theta: &Array1<f64>, grad: &mut Array1<f64>) -> f64;

    /// Log-density without the gradient.
    fn log_density(&self, theta: &Array1<f64>) -> f64 {
        let mut grad = Array1::zeros(theta.len());
        self.logp_and_grad(theta, &mut grad)
    }
}

impl<T: LogDensity + ?Sized> LogDensity for &T {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn logp_and_grad(&self, theta: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        (**self).logp_and_grad(theta, grad)
    }
}

/// Standard normal distribution in `dim` dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StandardNormal {
    pub dim: usize,
}

impl StandardNormal {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl LogDensity for StandardNormal {
    fn dim(&self) -> usize {
        self.dim
    }

    fn logp_and_grad(&self, theta: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        grad.zip_mut_with(theta, |g, &x| *g = -x);
        -0.5 * theta.dot(theta)
    }
}

/// Gaussian with independent coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagGaussian {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl DiagGaussian {
    pub fn new(mean: Array1<f64>, std: Array1<f64>) -> Result<Self> {
        if mean.len() != std.len() {
            return Err(HmcError::DimensionMismatch {
                expected: mean.len(),
                found: std.len(),
            });
        }
        if std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(HmcError::InvalidConfig(
                "standard deviations must be positive and finite".to_string(),
            ));
        }
        Ok(Self { mean, std })
    }
}

impl LogDensity for DiagGaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn logp_and_grad(&self, theta: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let mut logp = 0.0;
        for i in 0..theta.len() {
            let z = (theta[i] - self.mean[i]) / self.std[i];
            grad[i] = -z / self.std[i];
            logp -= 0.5 * z * z;
        }
        logp
    }
}

/// Multivariate Gaussian parameterized by its mean and a full covariance matrix.
///
/// The precision matrix is computed once, at construction, through a Cholesky
/// factorization of the covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct MvGaussian {
    pub mean: Array1<f64>,
    pub cov: Array2<f64>,
    precision: Array2<f64>,
}

impl MvGaussian {
    pub fn new(mean: Array1<f64>, cov: Array2<f64>) -> Result<Self> {
        let n = mean.len();
        if cov.nrows() != n || cov.ncols() != n {
            return Err(HmcError::DimensionMismatch {
                expected: n,
                found: cov.nrows(),
            });
        }
        let cov_na = na::DMatrix::from_fn(n, n, |i, j| cov[[i, j]]);
        let chol = na::Cholesky::new(cov_na).ok_or_else(|| {
            HmcError::InvalidConfig("covariance matrix is not positive definite".to_string())
        })?;
        let inv = chol.inverse();
        let precision = Array2::from_shape_fn((n, n), |(i, j)| inv[(i, j)]);
        Ok(Self {
            mean,
            cov,
            precision,
        })
    }

    pub fn precision(&self) -> &Array2<f64> {
        &self.precision
    }
}

impl LogDensity for MvGaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn logp_and_grad(&self, theta: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let diff = theta - &self.mean;
        let p_diff = self.precision.dot(&diff);
        grad.zip_mut_with(&p_diff, |g, &v| *g = -v);
        -0.5 * diff.dot(&p_diff)
    }
}

/// The banana-shaped Rosenbrock density `log p(x, y) = -((a - x)^2 + b (y - x^2)^2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rosenbrock2D {
    pub a: f64,
    pub b: f64,
}

impl LogDensity for Rosenbrock2D {
    fn dim(&self) -> usize {
        2
    }

    fn logp_and_grad(&self, theta: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let (x, y) = (theta[0], theta[1]);
        let t = y - x * x;
        grad[0] = 2.0 * (self.a - x) + 4.0 * self.b * x * t;
        grad[1] = -2.0 * self.b * t;
        -((self.a - x).powi(2) + self.b * t * t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn finite_difference<T: LogDensity>(target: &T, theta: &Array1<f64>) -> Array1<f64> {
        let h = 1e-6;
        Array1::from_shape_fn(theta.len(), |i| {
            let mut up = theta.clone();
            let mut down = theta.clone();
            up[i] += h;
            down[i] -= h;
            (target.log_density(&up) - target.log_density(&down)) / (2.0 * h)
        })
    }

    #[test]
    fn test_mv_gaussian_gradient() {
        let target = MvGaussian::new(arr1(&[1.0, 2.0]), arr2(&[[1.0, 0.5], [0.5, 2.0]])).unwrap();
        let theta = arr1(&[0.3, -0.7]);
        let mut grad = Array1::zeros(2);
        target.logp_and_grad(&theta, &mut grad);
        let fd = finite_difference(&target, &theta);
        assert_abs_diff_eq!(grad, fd, epsilon = 1e-5);
    }

    #[test]
    fn test_rosenbrock_gradient() {
        let target = Rosenbrock2D { a: 1.0, b: 100.0 };
        let theta = arr1(&[0.5, 0.1]);
        let mut grad = Array1::zeros(2);
        target.logp_and_grad(&theta, &mut grad);
        let fd = finite_difference(&target, &theta);
        assert_abs_diff_eq!(grad, fd, epsilon = 1e-4);
    }

    #[test]
    fn test_diag_gaussian_matches_mv() {
        let diag = DiagGaussian::new(arr1(&[0.0, 1.0]), arr1(&[2.0, 0.5])).unwrap();
        let mv = MvGaussian::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 0.0], [0.0, 0.25]])).unwrap();
        let theta = arr1(&[1.5, -0.2]);
        assert_abs_diff_eq!(
            diag.log_density(&theta),
            mv.log_density(&theta),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_mv_gaussian_rejects_indefinite_covariance() {
        let res = MvGaussian::new(arr1(&[0.0, 0.0]), arr2(&[[1.0, 2.0], [2.0, 1.0]]));
        assert!(matches!(res, Err(HmcError::InvalidConfig(_))));
    }
}
