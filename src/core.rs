//! Chain-running machinery shared by every sampler in the crate.
//!
//! A [`MarkovChain`] advances one iteration at a time; anything that owns several of
//! them implements [`HasChains`] and gets [`ChainRunner`] for free, which runs the
//! chains in parallel with rayon (optionally with one indicatif bar per chain).

use crate::error::{HmcError, Result};
use crate::stats::ChainTracker;
use crate::trajectory::TransitionStats;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{s, Array1, Array2};
use rayon::prelude::*;

pub trait MarkovChain {
    /// Runs one iteration and returns its diagnostics.
    fn step(&mut self) -> Result<TransitionStats>;

    /// Current position of the chain.
    fn position(&self) -> &Array1<f64>;
}

/// Draws and per-iteration statistics of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    /// `[draw, dim]`.
    pub draws: Array2<f64>,
    pub stats: Vec<TransitionStats>,
}

impl ChainOutput {
    fn with_capacity(n_steps: usize, dim: usize) -> Self {
        Self {
            draws: Array2::zeros((n_steps, dim)),
            stats: Vec::with_capacity(n_steps),
        }
    }

    /// Drops the first `discard` iterations.
    pub fn discard(self, discard: usize) -> Self {
        let discard = discard.min(self.stats.len());
        Self {
            draws: self.draws.slice(s![discard.., ..]).to_owned(),
            stats: self.stats.into_iter().skip(discard).collect(),
        }
    }
}

pub fn run_chain<M>(chain: &mut M, n_steps: usize) -> Result<ChainOutput>
where
    M: MarkovChain + ?Sized,
{
    let dim = chain.position().len();
    let mut out = ChainOutput::with_capacity(n_steps, dim);

    for i in 0..n_steps {
        let stats = chain.step()?;
        out.draws.row_mut(i).assign(chain.position());
        out.stats.push(stats);
    }

    Ok(out)
}

/// Like [`run_chain`], advancing `pb` and showing the running acceptance rate and
/// divergence count in its message.
pub fn run_chain_with_progress<M>(
    chain: &mut M,
    n_steps: usize,
    pb: &ProgressBar,
) -> Result<ChainOutput>
where
    M: MarkovChain + ?Sized,
{
    let dim = chain.position().len();
    let mut out = ChainOutput::with_capacity(n_steps, dim);
    let mut tracker = ChainTracker::new(dim);

    pb.set_length(n_steps as u64);

    for i in 0..n_steps {
        let stats = chain.step()?;
        out.draws.row_mut(i).assign(chain.position());
        tracker.step(out.draws.row(i), &stats);
        out.stats.push(stats);

        pb.inc(1);
        if i % 50 == 0 || i + 1 == n_steps {
            pb.set_message(format!(
                "p(accept)≈{:.2} divergences={}",
                tracker.p_accept(),
                tracker.n_divergent()
            ));
        }
    }

    Ok(out)
}

/// A trait for anything that owns multiple [`MarkovChain`]s.
pub trait HasChains {
    type Chain: MarkovChain + Send;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

pub trait ChainRunner: HasChains {
    /// Runs every chain for `n_steps` iterations in parallel and drops the first
    /// `discard` iterations of each.
    fn run_chains(&mut self, n_steps: usize, discard: usize) -> Result<Vec<ChainOutput>> {
        if self.chains_mut().is_empty() {
            return Err(HmcError::EmptyInput("no chains to run".to_string()));
        }
        let results: Result<Vec<ChainOutput>> = self
            .chains_mut()
            .par_iter_mut()
            .map(|chain| run_chain(chain, n_steps))
            .collect();

        Ok(results?
            .into_iter()
            .map(|out| out.discard(discard))
            .collect())
    }

    fn run_chains_with_progress(
        &mut self,
        n_steps: usize,
        discard: usize,
    ) -> Result<Vec<ChainOutput>> {
        if self.chains_mut().is_empty() {
            return Err(HmcError::EmptyInput("no chains to run".to_string()));
        }
        let multi = MultiProgress::new();
        let pb_style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        let results: Result<Vec<ChainOutput>> = self
            .chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let pb = multi.add(ProgressBar::new(n_steps as u64));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(pb_style.clone());

                let out = run_chain_with_progress(chain, n_steps, &pb);
                match &out {
                    Ok(_) => pb.finish(),
                    Err(e) => pb.abandon_with_message(format!("failed: {e}")),
                }
                out
            })
            .collect();

        Ok(results?
            .into_par_iter()
            .map(|out| out.discard(discard))
            .collect())
    }
}

impl<T: HasChains> ChainRunner for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    /// Deterministic walk that fails after `fail_at` steps.
    struct Counter {
        x: Array1<f64>,
        fail_at: Option<usize>,
        n: usize,
    }

    impl MarkovChain for Counter {
        fn step(&mut self) -> Result<TransitionStats> {
            if Some(self.n) == self.fail_at {
                return Err(HmcError::InvalidConfig("boom".to_string()));
            }
            self.n += 1;
            self.x += 1.0;
            Ok(TransitionStats {
                acceptance_rate: 1.0,
                divergent: self.n % 2 == 0,
                ..TransitionStats::default()
            })
        }

        fn position(&self) -> &Array1<f64> {
            &self.x
        }
    }

    struct Chains(Vec<Counter>);

    impl HasChains for Chains {
        type Chain = Counter;

        fn chains_mut(&mut self) -> &mut Vec<Counter> {
            &mut self.0
        }
    }

    fn counters(n: usize, fail_at: Option<usize>) -> Chains {
        Chains(
            (0..n)
                .map(|i| Counter {
                    x: arr1(&[i as f64, 0.0]),
                    fail_at,
                    n: 0,
                })
                .collect(),
        )
    }

    #[test]
    fn test_run_chain_records_every_step() {
        let mut chain = counters(1, None).0.remove(0);
        let out = run_chain(&mut chain, 4).unwrap();
        assert_eq!(out.draws.shape(), &[4, 2]);
        assert_eq!(out.draws.column(1).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.stats.len(), 4);
    }

    #[test]
    fn test_run_chains_discards_burn_in() {
        let mut chains = counters(3, None);
        let outputs = chains.run_chains(10, 4).unwrap();
        assert_eq!(outputs.len(), 3);
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(out.draws.nrows(), 6);
            assert_eq!(out.stats.len(), 6);
            assert_eq!(out.draws[[0, 0]], i as f64 + 5.0);
        }
    }

    #[test]
    fn test_progress_run_matches_plain_run() {
        let plain = counters(2, None).run_chains(20, 5).unwrap();
        let with_bars = counters(2, None).run_chains_with_progress(20, 5).unwrap();
        assert_eq!(plain, with_bars);
    }

    #[test]
    fn test_errors_propagate() {
        let mut chains = counters(2, Some(3));
        assert!(matches!(
            chains.run_chains(10, 0),
            Err(HmcError::InvalidConfig(_))
        ));
        assert!(matches!(
            Chains(Vec::new()).run_chains(10, 0),
            Err(HmcError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_discard_more_than_available() {
        let mut chain = counters(1, None).0.remove(0);
        let out = run_chain(&mut chain, 3).unwrap().discard(10);
        assert_eq!(out.draws.nrows(), 0);
        assert!(out.stats.is_empty());
    }
}
