/*!
Multi-chain HMC/NUTS sampler with warm-up adaptation.

[`HmcSampler`] owns one [`HmcChain`] per initial position. Every chain holds its own
random number generator, metric, integrator and adaptor, so chains run in parallel
without sharing mutable state; only the target is shared through an [`Arc`].

# Examples

```rust
use mini_hmc::config::SamplerConfig;
use mini_hmc::distributions::StandardNormal;
use mini_hmc::sampler::HmcSampler;

let mut sampler = HmcSampler::new(
    StandardNormal::new(2),
    vec![vec![0.5, -0.5]; 2],
    SamplerConfig::default(),
)
.unwrap()
.set_seed(42);

let output = sampler.run(200, 200).unwrap();
assert_eq!(output.draws.shape(), &[2, 200, 2]);
let summary = output.summary();
assert!(summary.mean_accept > 0.5);
```
*/

use crate::adaptation::{find_reasonable_step_size, Adaptor};
use crate::config::SamplerConfig;
use crate::core::{ChainOutput, ChainRunner, HasChains, MarkovChain};
use crate::distributions::LogDensity;
use crate::error::{HmcError, Result};
use crate::hamiltonian::{Hamiltonian, PhasePoint};
use crate::integrator::Integrator;
use crate::metric::Metric;
use crate::stats::{collect_rhat, max_rhat, ChainStats, ChainTracker};
use crate::trajectory::{transition, Trajectory, Transition, TransitionStats};
use ndarray::{Array1, Array3, Axis};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;

/// A single HMC chain.
#[derive(Debug, Clone)]
pub struct HmcChain<T: LogDensity> {
    target: Arc<T>,
    point: PhasePoint,
    metric: Metric,
    integrator: Integrator,
    trajectory: Trajectory,
    adaptor: Adaptor,
    config: SamplerConfig,
    /// Warm-up iterations of the current run.
    n_adapts: usize,
    /// Iterations since the last call to `set_warmup`.
    iteration: usize,
    /// Whether the adaptor matches the current warm-up length.
    initialized: bool,
    /// Whether a step size has been chosen at least once.
    tuned: bool,
    rng: SmallRng,
}

impl<T: LogDensity> HmcChain<T> {
    /// Creates a chain at `initial_position`. The position must have a finite
    /// log-density.
    pub fn new(target: Arc<T>, initial_position: Array1<f64>, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        let dim = target.dim();
        if initial_position.len() != dim {
            return Err(HmcError::DimensionMismatch {
                expected: dim,
                found: initial_position.len(),
            });
        }

        let metric = Metric::identity(config.metric, dim);
        let step_size = config.initial_step_size.unwrap_or(1.0);
        let integrator = config.integrator.build(step_size)?;
        let point = Hamiltonian::new(target.as_ref(), metric.clone())?
            .phase_point(initial_position, Array1::zeros(dim))?;
        if !point.log_density.is_finite() {
            return Err(HmcError::InvalidConfig(
                "initial position has zero density".to_string(),
            ));
        }
        let adaptor = Adaptor::from_config(&config, dim, 0, step_size);

        Ok(Self {
            target,
            point,
            metric,
            integrator,
            trajectory: config.build_trajectory(),
            adaptor,
            tuned: config.initial_step_size.is_some(),
            config,
            n_adapts: 0,
            iteration: 0,
            initialized: false,
            rng: SmallRng::from_entropy(),
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn with_rng(mut self, rng: SmallRng) -> Self {
        self.rng = rng;
        self
    }

    /// Starts a new run whose first `n_adapts` iterations adapt the step size and the
    /// metric. With `n_adapts == 0` the parameters of the previous run are kept.
    pub fn set_warmup(&mut self, n_adapts: usize) {
        self.n_adapts = n_adapts;
        self.iteration = 0;
        self.initialized = false;
    }

    pub fn point(&self) -> &PhasePoint {
        &self.point
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn step_size(&self) -> f64 {
        self.integrator.nominal_step_size()
    }

    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    pub fn adaptor(&self) -> &Adaptor {
        &self.adaptor
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn is_warming_up(&self) -> bool {
        self.iteration < self.n_adapts
    }

    fn initialize(&mut self) -> Result<()> {
        let dim = self.target.dim();
        if self.n_adapts > 0 || !self.tuned {
            self.metric = Metric::identity(self.config.metric, dim);
            let step_size = match self.config.initial_step_size {
                Some(eps) => eps,
                None => {
                    let h = Hamiltonian::new(self.target.as_ref(), self.metric.clone())?;
                    find_reasonable_step_size(&mut self.rng, &h, &self.point, 1.0)?
                }
            };
            self.integrator = self.integrator.with_step_size(step_size);
            self.tuned = true;
        }
        self.adaptor = Adaptor::from_config(
            &self.config,
            dim,
            self.n_adapts,
            self.integrator.nominal_step_size(),
        );
        self.initialized = true;
        Ok(())
    }

    /// Runs one transition, adapting while in warm-up.
    pub fn step(&mut self) -> Result<TransitionStats> {
        if !self.initialized {
            self.initialize()?;
        }

        let h = Hamiltonian::new(self.target.as_ref(), self.metric.clone())?;
        let Transition { point, stats } = transition(
            &mut self.rng,
            &h,
            &self.integrator,
            &self.trajectory,
            &self.point,
        )?;
        self.point = point;
        self.iteration += 1;

        if self.iteration <= self.n_adapts {
            let update = self.adaptor.adapt(&self.point.theta, stats.acceptance_rate);
            if let Some(metric) = update.metric {
                self.metric = metric;
            }
            self.integrator = self.integrator.with_step_size(update.step_size);

            if self.iteration == self.n_adapts {
                let (step_size, metric) = self.adaptor.finalize();
                self.integrator = self.integrator.with_step_size(step_size);
                self.metric = metric;
                log::info!(
                    "finished {} warm-up iterations: step size {step_size:.4}, {} metric",
                    self.n_adapts,
                    self.metric.name()
                );
            }
        }
        Ok(stats)
    }
}

impl<T: LogDensity + Send + Sync> MarkovChain for HmcChain<T> {
    fn step(&mut self) -> Result<TransitionStats> {
        HmcChain::step(self)
    }

    fn position(&self) -> &Array1<f64> {
        &self.point.theta
    }
}

/// Runs several [`HmcChain`]s over one shared target.
#[derive(Debug, Clone)]
pub struct HmcSampler<T: LogDensity> {
    pub chains: Vec<HmcChain<T>>,
    /// Seed of the first chain, if one was set.
    pub seed: Option<u64>,
}

impl<T: LogDensity> HmcSampler<T> {
    /// One chain per entry of `initial_positions`.
    pub fn new(target: T, initial_positions: Vec<Vec<f64>>, config: SamplerConfig) -> Result<Self> {
        if initial_positions.is_empty() {
            return Err(HmcError::EmptyInput(
                "at least one initial position is required".to_string(),
            ));
        }
        let target = Arc::new(target);
        let chains = initial_positions
            .into_iter()
            .map(|x| HmcChain::new(Arc::clone(&target), Array1::from(x), config.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { chains, seed: None })
    }

    /// Seeds chain `i` with `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.chains = self
            .chains
            .into_iter()
            .enumerate()
            .map(|(i, chain)| chain.set_seed(seed.wrapping_add(i as u64)))
            .collect();
        self
    }

    /// Hands one random number stream to every chain.
    pub fn with_rngs(mut self, rngs: Vec<SmallRng>) -> Result<Self> {
        if rngs.len() != self.chains.len() {
            return Err(HmcError::StreamLengthMismatch {
                expected: self.chains.len(),
                found: rngs.len(),
            });
        }
        self.seed = None;
        self.chains = self
            .chains
            .into_iter()
            .zip(rngs)
            .map(|(chain, rng)| chain.with_rng(rng))
            .collect();
        Ok(self)
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    fn collect_output(&self, outputs: Vec<ChainOutput>) -> RunOutput {
        let n_draws = outputs.first().map_or(0, |o| o.draws.nrows());
        let dim = outputs.first().map_or(0, |o| o.draws.ncols());
        let mut draws = Array3::zeros((outputs.len(), n_draws, dim));
        let mut stats = Vec::with_capacity(outputs.len());
        for (c, out) in outputs.into_iter().enumerate() {
            draws.index_axis_mut(Axis(0), c).assign(&out.draws);
            stats.push(out.stats);
        }
        RunOutput {
            draws,
            stats,
            step_sizes: self.chains.iter().map(|c| c.step_size()).collect(),
            metrics: self.chains.iter().map(|c| c.metric().clone()).collect(),
            metric_fallbacks: self
                .chains
                .iter()
                .map(|c| c.adaptor().metric_fallbacks())
                .collect(),
        }
    }
}

impl<T: LogDensity + Send + Sync> HmcSampler<T> {
    /// Runs `n_discard` warm-up iterations followed by `n_collect` sampling
    /// iterations on every chain. Warm-up draws are not returned.
    pub fn run(&mut self, n_collect: usize, n_discard: usize) -> Result<RunOutput> {
        self.chains.iter_mut().for_each(|c| c.set_warmup(n_discard));
        let outputs = self.run_chains(n_collect + n_discard, n_discard)?;
        Ok(self.collect_output(outputs))
    }

    /// Same as [`HmcSampler::run`], with one progress bar per chain.
    pub fn run_progress(&mut self, n_collect: usize, n_discard: usize) -> Result<RunOutput> {
        self.chains.iter_mut().for_each(|c| c.set_warmup(n_discard));
        let outputs = self.run_chains_with_progress(n_collect + n_discard, n_discard)?;
        Ok(self.collect_output(outputs))
    }
}

impl<T: LogDensity + Send + Sync> HasChains for HmcSampler<T> {
    type Chain = HmcChain<T>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

/// Collected draws and diagnostics of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    /// `[chain, draw, dim]`.
    pub draws: Array3<f64>,
    /// `stats[chain][draw]`.
    pub stats: Vec<Vec<TransitionStats>>,
    /// Step size of each chain after warm-up.
    pub step_sizes: Vec<f64>,
    /// Metric of each chain after warm-up.
    pub metrics: Vec<Metric>,
    /// Number of rejected metric estimates per chain.
    pub metric_fallbacks: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub n_divergent: usize,
    pub n_max_depth: usize,
    pub mean_accept: f64,
    /// Per-parameter R̂; `None` with fewer than two chains or draws.
    pub rhat: Option<Array1<f64>>,
    pub max_rhat: Option<f64>,
    pub metric_fallbacks: usize,
    pub chains: Vec<ChainStats>,
}

impl RunOutput {
    pub fn n_chains(&self) -> usize {
        self.draws.len_of(Axis(0))
    }

    pub fn n_draws(&self) -> usize {
        self.draws.len_of(Axis(1))
    }

    pub fn summary(&self) -> RunSummary {
        let dim = self.draws.len_of(Axis(2));
        let chains: Vec<ChainStats> = self
            .stats
            .iter()
            .enumerate()
            .map(|(c, stats)| {
                let mut tracker = ChainTracker::new(dim);
                let draws = self.draws.index_axis(Axis(0), c);
                for (row, s) in draws.rows().into_iter().zip(stats) {
                    tracker.step(row, s);
                }
                tracker.stats()
            })
            .collect();

        let all = || self.stats.iter().flatten();
        let n_total = all().count();
        let mean_accept = if n_total == 0 {
            0.0
        } else {
            all().map(|s| s.acceptance_rate).sum::<f64>() / n_total as f64
        };

        let rhat = if chains.len() >= 2 && self.n_draws() >= 2 {
            let refs: Vec<&ChainStats> = chains.iter().collect();
            collect_rhat(&refs).ok()
        } else {
            None
        };

        RunSummary {
            n_divergent: all().filter(|s| s.divergent).count(),
            n_max_depth: all().filter(|s| s.hit_max_depth).count(),
            mean_accept,
            max_rhat: rhat.as_ref().and_then(|r| max_rhat(r).ok()),
            rhat,
            metric_fallbacks: self.metric_fallbacks.iter().sum(),
            chains,
        }
    }
}
