//! Static Hamiltonian Monte Carlo trajectories.
//!
//! Covers plain HMC (a fixed number of leapfrog steps) and HMCDA (a fixed integration
//! time, so the number of steps follows the adapted step size). Both integrate for a
//! predetermined number of steps and then pick the next state either with a
//! Metropolis test on the end point or by multinomial sampling over the whole
//! trajectory.

use crate::distributions::LogDensity;
use crate::error::Result;
use crate::hamiltonian::{Hamiltonian, PhasePoint};
use crate::integrator::Integrator;
use crate::trajectory::{randcat_logp, StaticKernel, Transition, TransitionStats};
use ndarray::Array1;
use rand::Rng;

/// Settings of one static trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct StaticOptions {
    pub n_steps: usize,
    pub max_delta_energy: f64,
    pub kernel: StaticKernel,
}

/// Proposal of a static trajectory before the momentum flip.
struct Proposal {
    point: PhasePoint,
    is_accept: bool,
    acceptance_rate: f64,
    n_steps: usize,
    max_energy_error: f64,
    divergent: bool,
}

/// One static HMC transition from `z0`, whose momentum has already been refreshed.
///
/// The update consists of:
/// 1) Drawing the step size for this trajectory (jitter only).
/// 2) Integrating `n_steps` leapfrog steps, or a random split of them forwards and
///    backwards for the multinomial kernel.
/// 3) Selecting the next state and negating its momentum so the move is its own
///    inverse.
pub(crate) fn transition<T, R>(
    rng: &mut R,
    h: &Hamiltonian<'_, T>,
    integrator: &Integrator,
    options: &StaticOptions,
    z0: PhasePoint,
) -> Result<Transition>
where
    T: LogDensity + ?Sized,
    R: Rng + ?Sized,
{
    let step_size = integrator.draw_step_size(rng);
    let h0 = h.energy(&z0);
    let proposal = match options.kernel {
        StaticKernel::Metropolis => end_point(rng, h, integrator, step_size, options, &z0, h0)?,
        StaticKernel::Multinomial => multinomial(rng, h, integrator, step_size, options, &z0, h0)?,
    };

    let point = if proposal.is_accept {
        proposal.point
    } else {
        z0
    }
    .flip_momentum();
    let energy = h.energy(&point);

    let stats = TransitionStats {
        step_size,
        n_leapfrog_steps: proposal.n_steps,
        acceptance_rate: proposal.acceptance_rate,
        tree_depth: 0,
        divergent: proposal.divergent,
        energy,
        energy_error: energy - h0,
        max_energy_error: proposal.max_energy_error,
        log_density: point.log_density,
        is_accept: proposal.is_accept,
        turning: false,
        hit_max_depth: false,
        numerical_error: proposal.divergent,
    };
    Ok(Transition { point, stats })
}

fn is_divergent(delta_energy: f64, max_delta_energy: f64) -> bool {
    !(delta_energy < max_delta_energy)
}

/// Metropolis test on the end point: accept with probability `min(1, exp(H₀ − H′))`.
fn end_point<T, R>(
    rng: &mut R,
    h: &Hamiltonian<'_, T>,
    integrator: &Integrator,
    step_size: f64,
    options: &StaticOptions,
    z0: &PhasePoint,
    h0: f64,
) -> Result<Proposal>
where
    T: LogDensity + ?Sized,
    R: Rng + ?Sized,
{
    let n_steps = options.n_steps;
    let z_new = integrator.step(h, z0, step_size, n_steps)?;
    let delta = h.energy(&z_new) - h0;
    let acceptance_rate = (-delta).min(0.0).exp();
    let is_accept = rng.gen::<f64>() < acceptance_rate;
    Ok(Proposal {
        point: z_new,
        is_accept,
        acceptance_rate,
        n_steps,
        max_energy_error: delta,
        divergent: is_divergent(delta, options.max_delta_energy),
    })
}

/// Multinomial sampling over a trajectory of `n_steps + 1` points containing `z0`
/// at a uniformly random offset.
fn multinomial<T, R>(
    rng: &mut R,
    h: &Hamiltonian<'_, T>,
    integrator: &Integrator,
    step_size: f64,
    options: &StaticOptions,
    z0: &PhasePoint,
    h0: f64,
) -> Result<Proposal>
where
    T: LogDensity + ?Sized,
    R: Rng + ?Sized,
{
    let n_fwd = rng.gen_range(0..=options.n_steps);
    let n_bwd = options.n_steps - n_fwd;
    let forward = integrator.trajectory(h, z0, step_size, n_fwd)?;
    let backward = integrator.trajectory(h, z0, -step_size, n_bwd)?;
    let n_taken = forward.len() + backward.len();

    let points: Vec<PhasePoint> = backward
        .into_iter()
        .rev()
        .chain(std::iter::once(z0.clone()))
        .chain(forward)
        .collect();
    let delta: Array1<f64> = points.iter().map(|z| h.energy(z) - h0).collect();

    let acceptance_rate = delta.mapv(|d| (-d).min(0.0).exp()).mean().unwrap_or(0.0);
    let max_energy_error = delta.fold(0.0, |m: f64, &d| if d.abs() > m.abs() { d } else { m });
    let divergent = delta
        .iter()
        .any(|&d| is_divergent(d, options.max_delta_energy));

    let log_weights = delta.mapv(|d| -d);
    let index = randcat_logp(rng, log_weights.view())?;
    let point = points
        .into_iter()
        .nth(index)
        .unwrap_or_else(|| z0.clone());

    Ok(Proposal {
        point,
        is_accept: true,
        acceptance_rate,
        n_steps: n_taken,
        max_energy_error,
        divergent,
    })
}
