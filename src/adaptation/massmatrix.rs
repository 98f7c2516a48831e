//! Mass-matrix adaptation from online (Welford) moment estimates.
//!
//! The estimators track the posterior (co)variance of the warm-up draws, which is
//! used directly as the inverse mass matrix. Estimates are shrunk towards a small
//! multiple of the identity:
//!
//! ```text
//! n / ((n + w)(n − 1)) · M2 + τ · w / (n + w) · I
//! ```

use crate::config::WelfordConfig;
use crate::error::Result;
use crate::metric::{Metric, MetricKind};
use ndarray::{Array1, Array2};

/// Online mean and per-coordinate sum of squared deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct WelfordVar {
    n: usize,
    mean: Array1<f64>,
    m2: Array1<f64>,
    config: WelfordConfig,
}

impl WelfordVar {
    pub fn new(dim: usize) -> Self {
        Self::with_config(dim, WelfordConfig::default())
    }

    pub fn with_config(dim: usize, config: WelfordConfig) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(dim),
            m2: Array1::zeros(dim),
            config,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn push(&mut self, theta: &Array1<f64>) {
        self.n += 1;
        let n = self.n as f64;
        for i in 0..self.mean.len() {
            let delta = theta[i] - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (theta[i] - self.mean[i]);
        }
    }

    /// Unbiased sample variance, `None` before two samples.
    pub fn variance(&self) -> Option<Array1<f64>> {
        (self.n >= 2).then(|| &self.m2 / (self.n as f64 - 1.0))
    }

    /// Regularised variance, `None` before two samples.
    pub fn estimate(&self) -> Option<Array1<f64>> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        let w = self.config.shrinkage;
        let scale = n / ((n + w) * (n - 1.0));
        let shrink = self.config.regularization * w / (n + w);
        Some(self.m2.mapv(|m| scale * m + shrink))
    }

    pub fn reset(&mut self) {
        self.n = 0;
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }
}

/// Online mean and sum of cross-products of deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct WelfordCov {
    n: usize,
    mean: Array1<f64>,
    m2: Array2<f64>,
    config: WelfordConfig,
}

impl WelfordCov {
    pub fn new(dim: usize) -> Self {
        Self::with_config(dim, WelfordConfig::default())
    }

    pub fn with_config(dim: usize, config: WelfordConfig) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(dim),
            m2: Array2::zeros((dim, dim)),
            config,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn push(&mut self, theta: &Array1<f64>) {
        self.n += 1;
        let n = self.n as f64;
        let delta = theta - &self.mean;
        self.mean.scaled_add(1.0 / n, &delta);
        let delta2 = theta - &self.mean;
        let dim = delta.len();
        for i in 0..dim {
            for j in 0..dim {
                self.m2[[i, j]] += delta[i] * delta2[j];
            }
        }
    }

    // M2 is symmetric only up to rounding.
    fn symmetric_m2(&self) -> Array2<f64> {
        (&self.m2 + &self.m2.t()) * 0.5
    }

    /// Unbiased sample covariance, `None` before two samples.
    pub fn covariance(&self) -> Option<Array2<f64>> {
        (self.n >= 2).then(|| self.symmetric_m2() / (self.n as f64 - 1.0))
    }

    /// Regularised covariance, `None` before two samples.
    pub fn estimate(&self) -> Option<Array2<f64>> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        let w = self.config.shrinkage;
        let mut cov = self.symmetric_m2() * (n / ((n + w) * (n - 1.0)));
        let shrink = self.config.regularization * w / (n + w);
        cov.diag_mut().mapv_inplace(|v| v + shrink);
        Some(cov)
    }

    pub fn reset(&mut self) {
        self.n = 0;
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }
}

/// Estimator behind a [`MassMatrixAdaptor`].
#[derive(Debug, Clone, PartialEq)]
pub enum MassMatrixEstimator {
    Unit,
    Diagonal(WelfordVar),
    Dense(WelfordCov),
}

/// Accumulates warm-up draws and turns them into a metric on request.
#[derive(Debug, Clone, PartialEq)]
pub struct MassMatrixAdaptor {
    estimator: MassMatrixEstimator,
    metric: Metric,
    n_min: usize,
    fallbacks: usize,
}

impl MassMatrixAdaptor {
    pub fn new(kind: MetricKind, dim: usize, config: WelfordConfig) -> Self {
        let estimator = match kind {
            MetricKind::Unit => MassMatrixEstimator::Unit,
            MetricKind::Diagonal => MassMatrixEstimator::Diagonal(WelfordVar::with_config(dim, config)),
            MetricKind::Dense => MassMatrixEstimator::Dense(WelfordCov::with_config(dim, config)),
        };
        Self {
            estimator,
            metric: Metric::identity(kind, dim),
            n_min: config.n_min,
            fallbacks: 0,
        }
    }

    /// Starts from `metric` instead of the identity.
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn estimator(&self) -> &MassMatrixEstimator {
        &self.estimator
    }

    pub fn count(&self) -> usize {
        match &self.estimator {
            MassMatrixEstimator::Unit => 0,
            MassMatrixEstimator::Diagonal(w) => w.count(),
            MassMatrixEstimator::Dense(w) => w.count(),
        }
    }

    /// Number of estimates that were rejected and replaced by a simpler metric.
    pub fn metric_fallbacks(&self) -> usize {
        self.fallbacks
    }

    /// Records `theta`; when `is_update` and enough samples have been seen, replaces
    /// the metric by the current estimate and returns it.
    pub fn adapt(&mut self, theta: &Array1<f64>, is_update: bool) -> Option<Metric> {
        match &mut self.estimator {
            MassMatrixEstimator::Unit => return None,
            MassMatrixEstimator::Diagonal(w) => w.push(theta),
            MassMatrixEstimator::Dense(w) => w.push(theta),
        }
        if !is_update || self.count() < self.n_min {
            return None;
        }
        let metric = self.estimate_metric();
        self.metric = metric.clone();
        Some(metric)
    }

    fn estimate_metric(&mut self) -> Metric {
        let dim = self.metric.dim();
        let estimate: Result<Metric> = match &self.estimator {
            MassMatrixEstimator::Unit => return self.metric.clone(),
            MassMatrixEstimator::Diagonal(w) => match w.estimate() {
                Some(var) => Metric::diagonal(var),
                None => return self.metric.clone(),
            },
            MassMatrixEstimator::Dense(w) => match w.estimate() {
                // Too few draws for a full-rank covariance.
                Some(cov) if w.count() < dim + 1 => Metric::diagonal(cov.diag().to_owned()),
                Some(cov) => Metric::dense(cov),
                None => return self.metric.clone(),
            },
        };
        match estimate {
            Ok(metric) => {
                log::debug!("updated {} metric from {} draws", metric.name(), self.count());
                metric
            }
            Err(err) => {
                self.fallbacks += 1;
                self.fallback_metric(err.to_string())
            }
        }
    }

    fn fallback_metric(&self, reason: String) -> Metric {
        let dim = self.metric.dim();
        if let MassMatrixEstimator::Dense(w) = &self.estimator {
            if let Some(diag) = w.estimate().map(|cov| cov.diag().to_owned()) {
                if let Ok(metric) = Metric::diagonal(diag) {
                    log::warn!("dense metric estimate rejected ({reason}); using its diagonal");
                    return metric;
                }
            }
        }
        log::warn!("metric estimate rejected ({reason}); using the unit metric");
        Metric::unit(dim)
    }

    /// Clears the accumulated draws but keeps the current metric.
    pub fn reset(&mut self) {
        match &mut self.estimator {
            MassMatrixEstimator::Unit => {}
            MassMatrixEstimator::Diagonal(w) => w.reset(),
            MassMatrixEstimator::Dense(w) => w.reset(),
        }
    }
}
