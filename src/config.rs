//! Sampler configuration with the library defaults.
//!
//! Every struct has a `Default` holding the usual Stan/AdvancedHMC values and a
//! `validate` method; setters consume and return `Self` so configurations read as a
//! chain of builder calls:
//!
//! ```rust
//! use mini_hmc::config::{AdaptationKind, SamplerConfig};
//! use mini_hmc::metric::MetricKind;
//!
//! let config = SamplerConfig::default()
//!     .set_target_accept(0.9)
//!     .set_metric(MetricKind::Dense)
//!     .set_adaptation(AdaptationKind::Stan);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{HmcError, Result};
use crate::hamiltonian::DEFAULT_MAX_DELTA_ENERGY;
use crate::metric::MetricKind;
use crate::trajectory::{
    StaticKernel, TerminationCriterion, Trajectory, TransitionKernel, DEFAULT_MAX_DEPTH,
};

pub use crate::integrator::IntegratorKind;

/// Nesterov dual-averaging constants. The target acceptance lives in
/// [`SamplerConfig::target_accept`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualAveragingConfig {
    pub gamma: f64,
    pub t0: f64,
    pub kappa: f64,
}

impl Default for DualAveragingConfig {
    fn default() -> Self {
        Self {
            gamma: 0.05,
            t0: 10.0,
            kappa: 0.75,
        }
    }
}

impl DualAveragingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.gamma > 0.0 && self.gamma.is_finite()) {
            return Err(HmcError::InvalidConfig(format!("gamma must be positive, got {}", self.gamma)));
        }
        if !(self.t0 >= 0.0 && self.t0.is_finite()) {
            return Err(HmcError::InvalidConfig(format!("t0 must be non-negative, got {}", self.t0)));
        }
        if !(self.kappa > 0.5 && self.kappa <= 1.0) {
            return Err(HmcError::InvalidConfig(format!(
                "kappa must lie in (0.5, 1], got {}",
                self.kappa
            )));
        }
        Ok(())
    }
}

/// Regularisation of the Welford mass-matrix estimates:
/// `n/((n+w)(n−1)) · M2 + τ · w/(n+w) · I` with `w = shrinkage`, `τ = regularization`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelfordConfig {
    pub shrinkage: f64,
    pub regularization: f64,
    /// Minimum number of samples before an estimate replaces the metric.
    pub n_min: usize,
}

impl Default for WelfordConfig {
    fn default() -> Self {
        Self {
            shrinkage: 5.0,
            regularization: 1e-3,
            n_min: 10,
        }
    }
}

impl WelfordConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.shrinkage >= 0.0 && self.shrinkage.is_finite()) {
            return Err(HmcError::InvalidConfig(format!(
                "shrinkage must be non-negative, got {}",
                self.shrinkage
            )));
        }
        if !(self.regularization > 0.0 && self.regularization.is_finite()) {
            return Err(HmcError::InvalidConfig(format!(
                "regularization must be positive, got {}",
                self.regularization
            )));
        }
        if self.n_min < 2 {
            return Err(HmcError::InvalidConfig(format!(
                "n_min must be at least 2, got {}",
                self.n_min
            )));
        }
        Ok(())
    }
}

/// Stan warm-up windows: a fast initial buffer, doubling slow windows and a fast
/// terminal buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub init_buffer: usize,
    pub term_buffer: usize,
    pub window_size: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            init_buffer: 75,
            term_buffer: 50,
            window_size: 25,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(HmcError::InvalidConfig(
                "window_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrajectoryKind {
    Nuts {
        criterion: TerminationCriterion,
        kernel: TransitionKernel,
    },
    FixedSteps {
        n_steps: usize,
        kernel: StaticKernel,
    },
    /// HMCDA.
    FixedIntegrationTime {
        lambda: f64,
        kernel: StaticKernel,
    },
}

impl Default for TrajectoryKind {
    fn default() -> Self {
        TrajectoryKind::Nuts {
            criterion: TerminationCriterion::default(),
            kernel: TransitionKernel::default(),
        }
    }
}

/// What is tuned during warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdaptationKind {
    None,
    StepSize,
    MassMatrix,
    /// Step size and mass matrix both every iteration.
    Naive,
    /// Step size every iteration, mass matrix in Stan windows.
    #[default]
    Stan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    pub target_accept: f64,
    pub max_depth: usize,
    pub max_delta_energy: f64,
    pub integrator: IntegratorKind,
    pub trajectory: TrajectoryKind,
    pub metric: MetricKind,
    pub adaptation: AdaptationKind,
    pub dual_averaging: DualAveragingConfig,
    pub welford: WelfordConfig,
    pub windows: WindowConfig,
    /// Starting step size; found heuristically from the first position when `None`.
    pub initial_step_size: Option<f64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            target_accept: 0.8,
            max_depth: DEFAULT_MAX_DEPTH,
            max_delta_energy: DEFAULT_MAX_DELTA_ENERGY,
            integrator: IntegratorKind::default(),
            trajectory: TrajectoryKind::default(),
            metric: MetricKind::default(),
            adaptation: AdaptationKind::default(),
            dual_averaging: DualAveragingConfig::default(),
            welford: WelfordConfig::default(),
            windows: WindowConfig::default(),
            initial_step_size: None,
        }
    }
}

impl SamplerConfig {
    pub fn set_target_accept(mut self, target_accept: f64) -> Self {
        self.target_accept = target_accept;
        self
    }

    pub fn set_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn set_max_delta_energy(mut self, max_delta_energy: f64) -> Self {
        self.max_delta_energy = max_delta_energy;
        self
    }

    pub fn set_integrator(mut self, integrator: IntegratorKind) -> Self {
        self.integrator = integrator;
        self
    }

    pub fn set_trajectory(mut self, trajectory: TrajectoryKind) -> Self {
        self.trajectory = trajectory;
        self
    }

    pub fn set_metric(mut self, metric: MetricKind) -> Self {
        self.metric = metric;
        self
    }

    pub fn set_adaptation(mut self, adaptation: AdaptationKind) -> Self {
        self.adaptation = adaptation;
        self
    }

    pub fn set_step_size(mut self, step_size: f64) -> Self {
        self.initial_step_size = Some(step_size);
        self
    }

    pub fn set_windows(mut self, windows: WindowConfig) -> Self {
        self.windows = windows;
        self
    }

    /// The trajectory this configuration describes.
    pub fn build_trajectory(&self) -> Trajectory {
        match self.trajectory {
            TrajectoryKind::Nuts { criterion, kernel } => Trajectory::Nuts {
                max_depth: self.max_depth,
                max_delta_energy: self.max_delta_energy,
                criterion,
                kernel,
            },
            TrajectoryKind::FixedSteps { n_steps, kernel } => Trajectory::FixedSteps {
                n_steps,
                max_delta_energy: self.max_delta_energy,
                kernel,
            },
            TrajectoryKind::FixedIntegrationTime { lambda, kernel } => {
                Trajectory::FixedIntegrationTime {
                    lambda,
                    max_delta_energy: self.max_delta_energy,
                    kernel,
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(HmcError::InvalidConfig(format!(
                "target_accept must lie in (0, 1), got {}",
                self.target_accept
            )));
        }
        if let Some(eps) = self.initial_step_size {
            self.integrator.build(eps)?;
        } else {
            self.integrator.build(1.0)?;
        }
        self.build_trajectory().validate()?;
        self.dual_averaging.validate()?;
        self.welford.validate()?;
        self.windows.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SamplerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.build_trajectory(), Trajectory::nuts());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad = [
            SamplerConfig::default().set_target_accept(1.0),
            SamplerConfig::default().set_max_depth(0),
            SamplerConfig::default().set_max_delta_energy(-1.0),
            SamplerConfig::default().set_step_size(0.0),
            SamplerConfig::default().set_integrator(IntegratorKind::Jittered { jitter: 1.5 }),
            SamplerConfig::default().set_trajectory(TrajectoryKind::FixedIntegrationTime {
                lambda: f64::NAN,
                kernel: StaticKernel::Metropolis,
            }),
            SamplerConfig::default().set_windows(WindowConfig {
                window_size: 0,
                ..WindowConfig::default()
            }),
            SamplerConfig::default()
                .set_max_delta_energy(-5.0)
                .set_trajectory(TrajectoryKind::FixedSteps {
                    n_steps: 10,
                    kernel: StaticKernel::Metropolis,
                }),
            SamplerConfig::default()
                .set_max_delta_energy(0.0)
                .set_trajectory(TrajectoryKind::FixedIntegrationTime {
                    lambda: 1.0,
                    kernel: StaticKernel::Multinomial,
                }),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(HmcError::InvalidConfig(_))),
                "{config:?}"
            );
        }
    }

    #[test]
    fn test_static_trajectories_carry_threshold() {
        let config = SamplerConfig::default()
            .set_max_delta_energy(0.25)
            .set_trajectory(TrajectoryKind::FixedSteps {
                n_steps: 5,
                kernel: StaticKernel::Multinomial,
            });
        assert_eq!(
            config.build_trajectory(),
            Trajectory::FixedSteps {
                n_steps: 5,
                max_delta_energy: 0.25,
                kernel: StaticKernel::Multinomial,
            }
        );
        let hmcda = config.set_trajectory(TrajectoryKind::FixedIntegrationTime {
            lambda: 2.0,
            kernel: StaticKernel::Metropolis,
        });
        assert_eq!(hmcda.build_trajectory().max_delta_energy(), 0.25);
    }
}
