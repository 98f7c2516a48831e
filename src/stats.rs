//! Running per-chain statistics and the potential scale reduction factor.

use crate::error::{HmcError, Result};
use crate::trajectory::TransitionStats;
use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use std::collections::VecDeque;

/// Size of the sliding window used for the running acceptance rate.
const ACCEPT_WINDOW: usize = 100;

/// Tracks running moments of one chain's draws and its recent acceptance statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTracker {
    n: u64,
    mean: Array1<f64>,
    mean_sq: Array1<f64>,
    n_divergent: usize,
    accept_window: VecDeque<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    pub n: u64,
    /// Mean acceptance statistic over the last iterations.
    pub p_accept: f64,
    pub n_divergent: usize,
    pub mean: Array1<f64>,
    /// Unbiased within-chain variance.
    pub sm2: Array1<f64>,
}

impl ChainTracker {
    pub fn new(n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(n_params),
            mean_sq: Array1::zeros(n_params),
            n_divergent: 0,
            accept_window: VecDeque::with_capacity(ACCEPT_WINDOW + 1),
        }
    }

    pub fn step(&mut self, x: ArrayView1<f64>, stats: &TransitionStats) {
        self.n += 1;
        let n = self.n as f64;
        self.mean = (&self.mean * (n - 1.0) + x) / n;
        self.mean_sq = (&self.mean_sq * (n - 1.0) + x.mapv(|v| v * v)) / n;

        self.n_divergent += usize::from(stats.divergent);
        self.accept_window.push_back(stats.acceptance_rate);
        if self.accept_window.len() > ACCEPT_WINDOW {
            self.accept_window.pop_front();
        }
    }

    pub fn p_accept(&self) -> f64 {
        if self.accept_window.is_empty() {
            return 0.0;
        }
        self.accept_window.iter().sum::<f64>() / self.accept_window.len() as f64
    }

    pub fn n_divergent(&self) -> usize {
        self.n_divergent
    }

    pub fn sm2(&self) -> Array1<f64> {
        let n = self.n as f64;
        (&self.mean_sq - &self.mean.mapv(|m| m * m)) * n / (n - 1.0)
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            n: self.n,
            p_accept: self.p_accept(),
            n_divergent: self.n_divergent,
            mean: self.mean.clone(),
            sm2: self.sm2(),
        }
    }
}

/// Split-free R̂ (Gelman–Rubin) per parameter from the summaries of several chains.
pub fn collect_rhat(all_chain_stats: &[&ChainStats]) -> Result<Array1<f64>> {
    if all_chain_stats.len() < 2 {
        return Err(HmcError::EmptyInput(
            "R-hat needs at least two chains".to_string(),
        ));
    }
    let dim = all_chain_stats[0].mean.len();
    if let Some(bad) = all_chain_stats
        .iter()
        .find(|x| x.mean.len() != dim || x.sm2.len() != dim)
    {
        return Err(HmcError::DimensionMismatch {
            expected: dim,
            found: bad.mean.len(),
        });
    }
    let means = Array2::from_shape_fn((all_chain_stats.len(), dim), |(c, j)| {
        all_chain_stats[c].mean[j]
    });
    let sm2s = Array2::from_shape_fn((all_chain_stats.len(), dim), |(c, j)| {
        all_chain_stats[c].sm2[j]
    });

    let n_chains = means.nrows() as f64;
    let within = sm2s
        .mean_axis(Axis(0))
        .ok_or_else(|| HmcError::EmptyInput("no chains".to_string()))?;
    let global_means = means
        .mean_axis(Axis(0))
        .ok_or_else(|| HmcError::EmptyInput("no chains".to_string()))?;
    let diffs = &means - &global_means.insert_axis(Axis(0));
    let between_over_n = diffs.mapv(|d| d * d).sum_axis(Axis(0)) / (n_chains - 1.0);

    let n = all_chain_stats.iter().map(|x| x.n as f64).sum::<f64>() / n_chains;
    Ok(((between_over_n + &within * ((n - 1.0) / n)) / within).mapv(f64::sqrt))
}

/// Largest entry of an R̂ vector, ignoring NaN (constant parameters).
pub fn max_rhat(rhat: &Array1<f64>) -> Result<f64> {
    let finite: Array1<f64> = rhat.iter().copied().filter(|v| !v.is_nan()).collect();
    finite
        .max()
        .map(|v| *v)
        .map_err(|e| HmcError::EmptyInput(format!("no finite R-hat value: {e}")))
}
