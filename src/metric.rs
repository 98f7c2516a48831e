//! Euclidean metrics (mass matrices) used to draw momenta and to evaluate the
//! kinetic energy.
//!
//! A [`Metric`] stores the *inverse* mass matrix `M^{-1}`, which is what the
//! Welford estimators produce and what the integrator needs for the velocity
//! `dθ/dt = M^{-1} r`. For the dense case the lower Cholesky factor `L` of
//! `M^{-1} = L L^T` is cached at construction, so that
//! - the kinetic energy is `0.5 * |L^T r|^2`,
//! - the velocity is `L (L^T r)`,
//! - momenta `r ~ N(0, M)` are drawn by solving `L^T r = z` with `z ~ N(0, I)`.
//!
//! Every constructor validates its input: a `Metric` value is always symmetric
//! positive definite, and there is no way to mutate it in place.

use crate::error::{HmcError, Result};
use nalgebra as na;
use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::StandardNormal;

/// Selects which family of metric a sampler estimates during warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MetricKind {
    /// Identity mass matrix, never adapted.
    Unit,
    /// Diagonal mass matrix.
    #[default]
    Diagonal,
    /// Dense mass matrix.
    Dense,
}

#[derive(Debug, Clone, PartialEq)]
enum Inner {
    Unit {
        dim: usize,
    },
    Diagonal {
        inv_mass: Array1<f64>,
        // sqrt(M_ii) = 1 / sqrt(M^{-1}_ii), cached for momentum draws.
        mass_sqrt: Array1<f64>,
    },
    Dense {
        inv_mass: Array2<f64>,
        // Lower factor of M^{-1}.
        chol: na::DMatrix<f64>,
    },
}

/// A symmetric positive-definite metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    inner: Inner,
}

const SYMMETRY_TOL: f64 = 1e-10;

impl Metric {
    /// The identity metric in `dim` dimensions.
    pub fn unit(dim: usize) -> Self {
        Self {
            inner: Inner::Unit { dim },
        }
    }

    /// Identity mass matrix stored in the representation of `kind`.
    pub fn identity(kind: MetricKind, dim: usize) -> Self {
        let inner = match kind {
            MetricKind::Unit => Inner::Unit { dim },
            MetricKind::Diagonal => Inner::Diagonal {
                inv_mass: Array1::ones(dim),
                mass_sqrt: Array1::ones(dim),
            },
            MetricKind::Dense => Inner::Dense {
                inv_mass: Array2::eye(dim),
                chol: na::DMatrix::identity(dim, dim),
            },
        };
        Self { inner }
    }

    /// Diagonal metric from the diagonal of the inverse mass matrix.
    pub fn diagonal(inv_mass: Array1<f64>) -> Result<Self> {
        if inv_mass.is_empty() {
            return Err(HmcError::NonPositiveDefiniteMetric(
                "empty inverse mass diagonal".to_string(),
            ));
        }
        if let Some((i, v)) = inv_mass
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && **v > 0.0))
        {
            return Err(HmcError::NonPositiveDefiniteMetric(format!(
                "inverse mass diagonal entry {i} is {v}"
            )));
        }
        let mass_sqrt = inv_mass.mapv(|v| 1.0 / v.sqrt());
        Ok(Self {
            inner: Inner::Diagonal {
                inv_mass,
                mass_sqrt,
            },
        })
    }

    /// Dense metric from the full inverse mass matrix.
    ///
    /// Fails unless the matrix is square, finite, symmetric and admits a
    /// Cholesky decomposition.
    pub fn dense(inv_mass: Array2<f64>) -> Result<Self> {
        let n = inv_mass.nrows();
        if n == 0 || inv_mass.ncols() != n {
            return Err(HmcError::NonPositiveDefiniteMetric(format!(
                "inverse mass matrix has shape {:?}",
                inv_mass.shape()
            )));
        }
        if inv_mass.iter().any(|v| !v.is_finite()) {
            return Err(HmcError::NonPositiveDefiniteMetric(
                "inverse mass matrix has non-finite entries".to_string(),
            ));
        }
        for i in 0..n {
            for j in 0..i {
                let (a, b) = (inv_mass[[i, j]], inv_mass[[j, i]]);
                if (a - b).abs() > SYMMETRY_TOL * a.abs().max(b.abs()).max(1.0) {
                    return Err(HmcError::NonPositiveDefiniteMetric(format!(
                        "inverse mass matrix is not symmetric at ({i}, {j})"
                    )));
                }
            }
        }

        let sym = na::DMatrix::from_fn(n, n, |i, j| 0.5 * (inv_mass[[i, j]] + inv_mass[[j, i]]));
        let chol = na::Cholesky::new(sym)
            .ok_or_else(|| {
                HmcError::NonPositiveDefiniteMetric("Cholesky decomposition failed".to_string())
            })?
            .l();
        if (0..n).any(|i| !(chol[(i, i)].is_finite() && chol[(i, i)] > 0.0)) {
            return Err(HmcError::NonPositiveDefiniteMetric(
                "Cholesky factor has a degenerate diagonal".to_string(),
            ));
        }
        let inv_mass = Array2::from_shape_fn((n, n), |(i, j)| 0.5 * (inv_mass[[i, j]] + inv_mass[[j, i]]));
        Ok(Self {
            inner: Inner::Dense { inv_mass, chol },
        })
    }

    pub fn dim(&self) -> usize {
        match &self.inner {
            Inner::Unit { dim } => *dim,
            Inner::Diagonal { inv_mass, .. } => inv_mass.len(),
            Inner::Dense { inv_mass, .. } => inv_mass.nrows(),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match &self.inner {
            Inner::Unit { .. } => MetricKind::Unit,
            Inner::Diagonal { .. } => MetricKind::Diagonal,
            Inner::Dense { .. } => MetricKind::Dense,
        }
    }

    /// Short human-readable name, used in log messages.
    pub fn name(&self) -> &'static str {
        match self.kind() {
            MetricKind::Unit => "unit",
            MetricKind::Diagonal => "diagonal",
            MetricKind::Dense => "dense",
        }
    }

    /// Diagonal of the inverse mass matrix.
    pub fn inv_mass_diag(&self) -> Array1<f64> {
        match &self.inner {
            Inner::Unit { dim } => Array1::ones(*dim),
            Inner::Diagonal { inv_mass, .. } => inv_mass.clone(),
            Inner::Dense { inv_mass, .. } => inv_mass.diag().to_owned(),
        }
    }

    /// Full inverse mass matrix.
    pub fn inv_mass_matrix(&self) -> Array2<f64> {
        match &self.inner {
            Inner::Unit { dim } => Array2::eye(*dim),
            Inner::Diagonal { inv_mass, .. } => Array2::from_diag(inv_mass),
            Inner::Dense { inv_mass, .. } => inv_mass.clone(),
        }
    }

    /// Draws `r ~ N(0, M)`.
    pub fn sample_momentum<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let z: Array1<f64> = Array1::from_iter((0..self.dim()).map(|_| rng.sample(StandardNormal)));
        match &self.inner {
            Inner::Unit { .. } => z,
            Inner::Diagonal { mass_sqrt, .. } => z * mass_sqrt,
            Inner::Dense { chol, .. } => {
                // L^T r = z; the diagonal of L is checked positive at construction.
                let mut r = to_na(&z);
                let solved = chol.tr_solve_lower_triangular_mut(&mut r);
                debug_assert!(solved);
                from_na(&r)
            }
        }
    }

    /// Kinetic energy `0.5 * r^T M^{-1} r`.
    pub fn kinetic_energy(&self, r: &Array1<f64>) -> f64 {
        match &self.inner {
            Inner::Unit { .. } => 0.5 * r.dot(r),
            Inner::Diagonal { inv_mass, .. } => {
                0.5 * r
                    .iter()
                    .zip(inv_mass.iter())
                    .map(|(&ri, &mi)| ri * ri * mi)
                    .sum::<f64>()
            }
            Inner::Dense { chol, .. } => 0.5 * chol.tr_mul(&to_na(r)).norm_squared(),
        }
    }

    /// Velocity `∂K/∂r = M^{-1} r`.
    pub fn velocity(&self, r: &Array1<f64>) -> Array1<f64> {
        match &self.inner {
            Inner::Unit { .. } => r.clone(),
            Inner::Diagonal { inv_mass, .. } => r * inv_mass,
            Inner::Dense { chol, .. } => from_na(&(chol * chol.tr_mul(&to_na(r)))),
        }
    }
}

fn to_na(x: &Array1<f64>) -> na::DVector<f64> {
    na::DVector::from_iterator(x.len(), x.iter().copied())
}

fn from_na(x: &na::DVector<f64>) -> Array1<f64> {
    x.iter().copied().collect()
}
