//! No-U-Turn trajectory builder.
//!
//! The tree is grown by repeated doubling in a random direction. Each doubling
//! builds a sub-tree of the current depth from the matching edge, recursively as two
//! half-size sub-trees. Sub-trees are owned values handed back up the recursion and
//! merged, so no state is shared between branches.
//!
//! Candidates are chosen by progressive sampling: uniform among the slice for the
//! slice kernel, proportionally to `exp(−H)` for the multinomial kernel, with the
//! biased variant at the top level to favour points far from the start.

use crate::distributions::LogDensity;
use crate::error::Result;
use crate::hamiltonian::{Hamiltonian, PhasePoint};
use crate::integrator::Integrator;
use crate::trajectory::{
    log_add_exp, TerminationCriterion, Transition, TransitionKernel, TransitionStats,
};
use ndarray::Array1;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NutsOptions {
    pub max_depth: usize,
    pub max_delta_energy: f64,
    pub criterion: TerminationCriterion,
    pub kernel: TransitionKernel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Termination {
    /// U-turn.
    dynamic: bool,
    /// Divergence.
    numerical: bool,
}

impl Termination {
    fn turning(dynamic: bool) -> Self {
        Self {
            dynamic,
            numerical: false,
        }
    }

    fn is_terminated(self) -> bool {
        self.dynamic || self.numerical
    }

    fn or(self, other: Self) -> Self {
        Self {
            dynamic: self.dynamic || other.dynamic,
            numerical: self.numerical || other.numerical,
        }
    }
}

#[derive(Debug, Clone)]
struct BinaryTree {
    left: PhasePoint,
    right: PhasePoint,
    /// Sum of the momenta of every point in the tree.
    rho: Array1<f64>,
    sum_alpha: f64,
    n_alpha: usize,
    /// Energy error of largest magnitude.
    max_delta_energy: f64,
}

impl BinaryTree {
    fn leaf(z: PhasePoint, alpha: f64, delta_energy: f64) -> Self {
        Self {
            rho: z.r.clone(),
            left: z.clone(),
            right: z,
            sum_alpha: alpha,
            n_alpha: 1,
            max_delta_energy: delta_energy,
        }
    }

    /// Merges two adjacent trees, `left` preceding `right` in time.
    fn combine(left: &Self, right: &Self) -> Self {
        let max_delta_energy = if left.max_delta_energy.abs() >= right.max_delta_energy.abs() {
            left.max_delta_energy
        } else {
            right.max_delta_energy
        };
        Self {
            left: left.left.clone(),
            right: right.right.clone(),
            rho: &left.rho + &right.rho,
            sum_alpha: left.sum_alpha + right.sum_alpha,
            n_alpha: left.n_alpha + right.n_alpha,
            max_delta_energy,
        }
    }
}

/// Candidate of a (sub-)tree with the total weight of its points.
#[derive(Debug, Clone)]
struct Sampler {
    candidate: PhasePoint,
    /// Number of points inside the slice (slice kernel).
    n: usize,
    /// `log Σ exp(H₀ − H)` over the points (multinomial kernel).
    log_w: f64,
}

struct TreeBuilder<'b, 'a, T: LogDensity + ?Sized> {
    h: &'b Hamiltonian<'a, T>,
    integrator: &'b Integrator,
    options: &'b NutsOptions,
    step_size: f64,
    h0: f64,
    log_u: f64,
}

impl<T: LogDensity + ?Sized> TreeBuilder<'_, '_, T> {
    fn leaf_sampler(&self, z: PhasePoint, energy: f64) -> Sampler {
        Sampler {
            candidate: z,
            n: usize::from(self.log_u <= -energy),
            log_w: self.h0 - energy,
        }
    }

    fn is_divergent(&self, energy: f64) -> bool {
        if !energy.is_finite() {
            return true;
        }
        match self.options.kernel {
            TransitionKernel::Slice => !(self.log_u < self.options.max_delta_energy - energy),
            TransitionKernel::Multinomial => !(energy - self.h0 < self.options.max_delta_energy),
        }
    }

    /// Progressive sampling inside a sub-tree: pick from `s1` or `s2` proportionally
    /// to their weights.
    fn combine_samplers<R: Rng + ?Sized>(&self, rng: &mut R, s1: Sampler, s2: Sampler) -> Sampler {
        let n = s1.n + s2.n;
        let log_w = log_add_exp(s1.log_w, s2.log_w);
        let p_first = match self.options.kernel {
            TransitionKernel::Slice => s1.n as f64 / n as f64,
            TransitionKernel::Multinomial => (s1.log_w - log_w).exp(),
        };
        let candidate = if rng.gen::<f64>() < p_first {
            s1.candidate
        } else {
            s2.candidate
        };
        Sampler {
            candidate,
            n,
            log_w,
        }
    }

    /// Biased progressive sampling between the current tree and a new sub-tree.
    fn accepts_subtree<R: Rng + ?Sized>(&self, rng: &mut R, current: &Sampler, proposal: &Sampler) -> bool {
        let p = match self.options.kernel {
            TransitionKernel::Slice => proposal.n as f64 / current.n as f64,
            TransitionKernel::Multinomial => (proposal.log_w - current.log_w).exp(),
        };
        rng.gen::<f64>() < p.min(1.0)
    }

    fn velocity(&self, z: &PhasePoint) -> Array1<f64> {
        self.h.velocity(&z.r)
    }

    fn generalised_turn(rho: &Array1<f64>, v_minus: &Array1<f64>, v_plus: &Array1<f64>) -> bool {
        !(rho.dot(v_minus) > 0.0 && rho.dot(v_plus) > 0.0)
    }

    fn is_turning(&self, tree: &BinaryTree) -> bool {
        let v_minus = self.velocity(&tree.left);
        let v_plus = self.velocity(&tree.right);
        match self.options.criterion {
            TerminationCriterion::Classic => {
                let span = &tree.right.theta - &tree.left.theta;
                span.dot(&v_minus) < 0.0 || span.dot(&v_plus) < 0.0
            }
            TerminationCriterion::Generalised => {
                Self::generalised_turn(&tree.rho, &v_minus, &v_plus)
            }
        }
    }

    /// U-turn check of a merged tree. The generalised criterion also checks the
    /// span from the start of `left` to the start of `right`, and from the end of
    /// `left` to the end of `right`.
    fn is_turning_merged(&self, tree: &BinaryTree, left: &BinaryTree, right: &BinaryTree) -> bool {
        if self.is_turning(tree) {
            return true;
        }
        if self.options.criterion == TerminationCriterion::Classic {
            return false;
        }
        let rho_left = &left.rho + &right.left.r;
        if Self::generalised_turn(
            &rho_left,
            &self.velocity(&left.left),
            &self.velocity(&right.left),
        ) {
            return true;
        }
        let rho_right = &left.right.r + &right.rho;
        Self::generalised_turn(
            &rho_right,
            &self.velocity(&left.right),
            &self.velocity(&right.right),
        )
    }

    /// Builds a tree of `2^depth` points starting one step away from `z` in `direction`.
    fn build_tree<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        z: &PhasePoint,
        direction: f64,
        depth: usize,
    ) -> Result<(BinaryTree, Sampler, Termination)> {
        if depth == 0 {
            let z_new = self.integrator.step(self.h, z, direction * self.step_size, 1)?;
            let energy = self.h.energy(&z_new);
            let delta = energy - self.h0;
            let alpha = (-delta).min(0.0).exp();
            let termination = Termination {
                dynamic: false,
                numerical: self.is_divergent(energy),
            };
            let sampler = self.leaf_sampler(z_new.clone(), energy);
            return Ok((BinaryTree::leaf(z_new, alpha, delta), sampler, termination));
        }

        let (first, s1, t1) = self.build_tree(rng, z, direction, depth - 1)?;
        if t1.is_terminated() {
            return Ok((first, s1, t1));
        }
        let edge = if direction > 0.0 { &first.right } else { &first.left };
        let (second, s2, t2) = self.build_tree(rng, edge, direction, depth - 1)?;

        let (left, right) = if direction > 0.0 {
            (&first, &second)
        } else {
            (&second, &first)
        };
        let tree = BinaryTree::combine(left, right);
        let turning = self.is_turning_merged(&tree, left, right);
        let sampler = self.combine_samplers(rng, s1, s2);
        Ok((tree, sampler, t1.or(t2).or(Termination::turning(turning))))
    }
}

/// One NUTS transition from `z0`, whose momentum has already been refreshed.
pub(crate) fn transition<T, R>(
    rng: &mut R,
    h: &Hamiltonian<'_, T>,
    integrator: &Integrator,
    options: &NutsOptions,
    z0: PhasePoint,
) -> Result<Transition>
where
    T: LogDensity + ?Sized,
    R: Rng + ?Sized,
{
    let step_size = integrator.draw_step_size(rng);
    let h0 = h.energy(&z0);
    let log_u = match options.kernel {
        TransitionKernel::Slice => rng.gen::<f64>().ln() - h0,
        TransitionKernel::Multinomial => f64::NEG_INFINITY,
    };
    let builder = TreeBuilder {
        h,
        integrator,
        options,
        step_size,
        h0,
        log_u,
    };

    let mut tree = BinaryTree {
        left: z0.clone(),
        right: z0.clone(),
        rho: z0.r.clone(),
        sum_alpha: 0.0,
        n_alpha: 0,
        max_delta_energy: 0.0,
    };
    let mut sampler = Sampler {
        candidate: z0.clone(),
        n: 1,
        log_w: 0.0,
    };
    let mut termination = Termination::default();
    let mut depth = 0;

    while !termination.is_terminated() && depth < options.max_depth {
        let forward = rng.gen::<bool>();
        let (direction, edge) = if forward {
            (1.0, &tree.right)
        } else {
            (-1.0, &tree.left)
        };
        let (subtree, sub_sampler, sub_termination) =
            builder.build_tree(rng, edge, direction, depth)?;

        let mut candidate = None;
        if !sub_termination.is_terminated() {
            depth += 1;
            if builder.accepts_subtree(rng, &sampler, &sub_sampler) {
                candidate = Some(sub_sampler.candidate.clone());
            }
        }

        let (left, right) = if forward {
            (&tree, &subtree)
        } else {
            (&subtree, &tree)
        };
        let merged = BinaryTree::combine(left, right);
        let turning = builder.is_turning_merged(&merged, left, right);
        termination = termination
            .or(sub_termination)
            .or(Termination::turning(turning));
        tree = merged;

        sampler = Sampler {
            candidate: candidate.unwrap_or(sampler.candidate),
            n: sampler.n + sub_sampler.n,
            log_w: log_add_exp(sampler.log_w, sub_sampler.log_w),
        };
    }

    let point = sampler.candidate;
    let energy = h.energy(&point);
    let acceptance_rate = if tree.n_alpha > 0 {
        tree.sum_alpha / tree.n_alpha as f64
    } else {
        0.0
    };
    let stats = TransitionStats {
        step_size,
        n_leapfrog_steps: tree.n_alpha,
        acceptance_rate,
        tree_depth: depth,
        divergent: termination.numerical,
        energy,
        energy_error: energy - h0,
        max_energy_error: tree.max_delta_energy,
        log_density: point.log_density,
        is_accept: point.theta != z0.theta,
        turning: termination.dynamic,
        hit_max_depth: !termination.is_terminated(),
        numerical_error: termination.numerical,
    };
    Ok(Transition { point, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::StandardNormal;
    use crate::metric::Metric;
    use crate::trajectory::{self, Trajectory};
    use ndarray::arr1;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn options(criterion: TerminationCriterion, kernel: TransitionKernel) -> Trajectory {
        Trajectory::Nuts {
            max_depth: 10,
            max_delta_energy: 1000.0,
            criterion,
            kernel,
        }
    }

    /// Half-normal: infeasible for negative x.
    struct HalfNormal;

    impl LogDensity for HalfNormal {
        fn dim(&self) -> usize {
            1
        }

        fn logp_and_grad(&self, theta: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
            grad[0] = -theta[0];
            if theta[0] < 0.0 {
                f64::NEG_INFINITY
            } else {
                -0.5 * theta[0] * theta[0]
            }
        }
    }

    #[test]
    fn test_uturn_on_harmonic_oscillator() {
        let target = StandardNormal::new(2);
        let h = Hamiltonian::new(&target, Metric::unit(2)).unwrap();
        let z0 = h.phase_point(arr1(&[1.0, 0.5]), arr1(&[0.0, 0.0])).unwrap();
        let integrator = Integrator::leapfrog(0.1);
        for criterion in [TerminationCriterion::Classic, TerminationCriterion::Generalised] {
            let mut rng = SmallRng::seed_from_u64(7);
            for _ in 0..20 {
                let t = trajectory::transition(
                    &mut rng,
                    &h,
                    &integrator,
                    &options(criterion, TransitionKernel::Multinomial),
                    &z0,
                )
                .unwrap();
                assert!(t.stats.turning);
                assert!(!t.stats.divergent);
                assert!(!t.stats.hit_max_depth);
                assert!(t.stats.tree_depth < 10);
                // Accepted doublings add up to 2^depth - 1 steps; the one that
                // U-turned adds at most 2^depth more.
                let accepted = (1usize << t.stats.tree_depth) - 1;
                assert!(t.stats.n_leapfrog_steps >= accepted);
                assert!(t.stats.n_leapfrog_steps <= 2 * accepted + 1);
                // Half a period at ε = 0.1 is about 31 steps.
                assert!(t.stats.n_leapfrog_steps <= 128);
            }
        }
    }

    #[test]
    fn test_depth_cap_stops_short_trajectories() {
        let target = StandardNormal::new(2);
        let h = Hamiltonian::new(&target, Metric::unit(2)).unwrap();
        let z0 = h.phase_point(arr1(&[0.3, -0.4]), arr1(&[0.0, 0.0])).unwrap();
        // Seven steps of 0.001 are far too short to turn around.
        let integrator = Integrator::leapfrog(0.001);
        for criterion in [TerminationCriterion::Classic, TerminationCriterion::Generalised] {
            for kernel in [TransitionKernel::Slice, TransitionKernel::Multinomial] {
                let trajectory = Trajectory::Nuts {
                    max_depth: 3,
                    max_delta_energy: 1000.0,
                    criterion,
                    kernel,
                };
                let mut rng = SmallRng::seed_from_u64(21);
                for _ in 0..10 {
                    let t = trajectory::transition(&mut rng, &h, &integrator, &trajectory, &z0)
                        .unwrap();
                    assert!(t.stats.hit_max_depth);
                    assert!(!t.stats.turning);
                    assert!(!t.stats.divergent);
                    assert_eq!(t.stats.tree_depth, 3);
                    assert_eq!(t.stats.n_leapfrog_steps, 7);
                }
            }
        }
    }

    #[test]
    fn test_divergence_keeps_start() {
        let target = StandardNormal::new(3);
        let h = Hamiltonian::new(&target, Metric::unit(3)).unwrap();
        let z0 = h
            .phase_point(arr1(&[1.0, -1.0, 0.5]), arr1(&[0.0, 0.0, 0.0]))
            .unwrap();
        let integrator = Integrator::leapfrog(1e3);
        let mut rng = SmallRng::seed_from_u64(0);
        for kernel in [TransitionKernel::Slice, TransitionKernel::Multinomial] {
            let t = trajectory::transition(
                &mut rng,
                &h,
                &integrator,
                &options(TerminationCriterion::Generalised, kernel),
                &z0,
            )
            .unwrap();
            assert!(t.stats.divergent);
            assert!(t.stats.numerical_error);
            assert_eq!(t.stats.tree_depth, 0);
            assert_eq!(t.stats.n_leapfrog_steps, 1);
            assert_eq!(t.stats.acceptance_rate, 0.0);
            assert!(!t.stats.is_accept);
            assert_eq!(t.point.theta, z0.theta);
        }
    }

    #[test]
    fn test_infeasible_region_is_never_returned() {
        let target = HalfNormal;
        let h = Hamiltonian::new(&target, Metric::unit(1)).unwrap();
        let mut z = h.phase_point(arr1(&[0.5]), arr1(&[0.0])).unwrap();
        let integrator = Integrator::leapfrog(0.3);
        let trajectory = Trajectory::nuts();
        let mut rng = SmallRng::seed_from_u64(11);
        let mut n_divergent = 0;
        for _ in 0..500 {
            let t = trajectory::transition(&mut rng, &h, &integrator, &trajectory, &z).unwrap();
            n_divergent += usize::from(t.stats.divergent);
            z = t.point;
            assert!(z.theta[0] >= 0.0);
            assert!(z.log_density.is_finite());
        }
        assert!(n_divergent > 0);
    }

    #[test]
    fn test_all_kernels_sample_standard_normal() {
        let target = StandardNormal::new(2);
        let h = Hamiltonian::new(&target, Metric::unit(2)).unwrap();
        let integrator = Integrator::leapfrog(0.5);
        let n = 4000;
        for criterion in [TerminationCriterion::Classic, TerminationCriterion::Generalised] {
            for kernel in [TransitionKernel::Slice, TransitionKernel::Multinomial] {
                let trajectory = options(criterion, kernel);
                let mut rng = SmallRng::seed_from_u64(2024);
                let mut z = h.phase_point(arr1(&[0.0, 0.0]), arr1(&[0.0, 0.0])).unwrap();
                let mut sum = Array1::<f64>::zeros(2);
                let mut sum_sq = Array1::<f64>::zeros(2);
                for _ in 0..n {
                    z = trajectory::transition(&mut rng, &h, &integrator, &trajectory, &z)
                        .unwrap()
                        .point;
                    sum += &z.theta;
                    sum_sq += &z.theta.mapv(|x| x * x);
                }
                let mean = &sum / n as f64;
                let var = &sum_sq / n as f64 - &mean.mapv(|m| m * m);
                for d in 0..2 {
                    assert!(mean[d].abs() < 0.1, "{criterion:?}/{kernel:?}: mean {mean}");
                    assert!((var[d] - 1.0).abs() < 0.15, "{criterion:?}/{kernel:?}: var {var}");
                }
            }
        }
    }
}
