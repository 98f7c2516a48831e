//! Hamiltonian Monte Carlo and the No-U-Turn Sampler with online step size and mass
//! matrix adaptation.

pub mod adaptation;
pub mod config;
pub mod core;
pub mod distributions;
pub mod error;
pub mod hamiltonian;
mod hmc;
pub mod integrator;
pub mod io;
pub mod metric;
mod nuts;
pub mod sampler;
pub mod stats;
pub mod trajectory;

pub use config::SamplerConfig;
pub use distributions::LogDensity;
pub use error::{HmcError, Result};
pub use sampler::{HmcChain, HmcSampler, RunOutput, RunSummary};
