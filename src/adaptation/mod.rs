//! Warm-up adaptation of the step size and the metric.
//!
//! An [`Adaptor`] is fed one `(θ, acceptance statistic)` pair per warm-up
//! iteration and answers with the step size to use next and, when it changed, a new
//! metric. At the end of warm-up [`Adaptor::finalize`] returns the parameters that
//! stay frozen for sampling.

pub mod massmatrix;
pub mod stan;
pub mod stepsize;

pub use massmatrix::{MassMatrixAdaptor, MassMatrixEstimator, WelfordCov, WelfordVar};
pub use stan::{StanHmcAdaptor, StanWindows};
pub use stepsize::{find_reasonable_step_size, NesterovDualAveraging};

use crate::config::{AdaptationKind, SamplerConfig};
use crate::metric::Metric;
use ndarray::Array1;

/// Result of one adaptation step.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationUpdate {
    pub step_size: f64,
    /// `Some` only when the metric was replaced.
    pub metric: Option<Metric>,
}

/// Warm-up strategy. Each variant carries the parameter it does not adapt.
#[derive(Debug, Clone, PartialEq)]
pub enum Adaptor {
    NoAdaptation {
        step_size: f64,
        metric: Metric,
    },
    StepSize {
        step: NesterovDualAveraging,
        metric: Metric,
    },
    MassMatrix {
        mass: MassMatrixAdaptor,
        step_size: f64,
    },
    /// Both adaptors every iteration.
    Naive {
        mass: MassMatrixAdaptor,
        step: NesterovDualAveraging,
    },
    Stan(StanHmcAdaptor),
}

impl Adaptor {
    /// Builds the adaptor described by `config` for `n_adapts` warm-up iterations.
    pub fn from_config(
        config: &SamplerConfig,
        dim: usize,
        n_adapts: usize,
        initial_step_size: f64,
    ) -> Self {
        let metric = Metric::identity(config.metric, dim);
        let step = || {
            NesterovDualAveraging::with_config(
                config.dual_averaging,
                config.target_accept,
                initial_step_size,
            )
        };
        let mass = || MassMatrixAdaptor::new(config.metric, dim, config.welford);
        match config.adaptation {
            AdaptationKind::None => Adaptor::NoAdaptation {
                step_size: initial_step_size,
                metric,
            },
            AdaptationKind::StepSize => Adaptor::StepSize {
                step: step(),
                metric,
            },
            AdaptationKind::MassMatrix => Adaptor::MassMatrix {
                mass: mass(),
                step_size: initial_step_size,
            },
            AdaptationKind::Naive => Adaptor::Naive {
                mass: mass(),
                step: step(),
            },
            AdaptationKind::Stan => Adaptor::Stan(StanHmcAdaptor::new(
                step(),
                mass(),
                StanWindows::new(n_adapts, config.windows),
            )),
        }
    }

    pub fn step_size(&self) -> f64 {
        match self {
            Adaptor::NoAdaptation { step_size, .. } | Adaptor::MassMatrix { step_size, .. } => {
                *step_size
            }
            Adaptor::StepSize { step, .. } | Adaptor::Naive { step, .. } => step.step_size(),
            Adaptor::Stan(stan) => stan.step_size_adaptor().step_size(),
        }
    }

    pub fn metric(&self) -> &Metric {
        match self {
            Adaptor::NoAdaptation { metric, .. } | Adaptor::StepSize { metric, .. } => metric,
            Adaptor::MassMatrix { mass, .. } | Adaptor::Naive { mass, .. } => mass.metric(),
            Adaptor::Stan(stan) => stan.mass_matrix_adaptor().metric(),
        }
    }

    /// Number of metric estimates replaced by a fallback.
    pub fn metric_fallbacks(&self) -> usize {
        match self {
            Adaptor::NoAdaptation { .. } | Adaptor::StepSize { .. } => 0,
            Adaptor::MassMatrix { mass, .. } | Adaptor::Naive { mass, .. } => {
                mass.metric_fallbacks()
            }
            Adaptor::Stan(stan) => stan.mass_matrix_adaptor().metric_fallbacks(),
        }
    }

    /// One warm-up step: `theta` is the new draw, `accept_stat` the acceptance
    /// statistic of the transition that produced it.
    pub fn adapt(&mut self, theta: &Array1<f64>, accept_stat: f64) -> AdaptationUpdate {
        match self {
            Adaptor::NoAdaptation { step_size, .. } => AdaptationUpdate {
                step_size: *step_size,
                metric: None,
            },
            Adaptor::StepSize { step, .. } => AdaptationUpdate {
                step_size: step.adapt(accept_stat),
                metric: None,
            },
            Adaptor::MassMatrix { mass, step_size } => AdaptationUpdate {
                step_size: *step_size,
                metric: mass.adapt(theta, true),
            },
            Adaptor::Naive { mass, step } => AdaptationUpdate {
                step_size: step.adapt(accept_stat),
                metric: mass.adapt(theta, true),
            },
            Adaptor::Stan(stan) => stan.adapt(theta, accept_stat),
        }
    }

    /// Ends warm-up: the step size switches to its averaged value.
    pub fn finalize(&mut self) -> (f64, Metric) {
        let step_size = match self {
            Adaptor::NoAdaptation { step_size, .. } | Adaptor::MassMatrix { step_size, .. } => {
                *step_size
            }
            Adaptor::StepSize { step, .. } | Adaptor::Naive { step, .. } => step.finalize(),
            Adaptor::Stan(stan) => stan.finalize(),
        };
        (step_size, self.metric().clone())
    }
}
