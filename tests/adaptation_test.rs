//! Warm-up adaptation on correlated and badly scaled Gaussian targets.

use approx::assert_abs_diff_eq;
use mini_hmc::config::{AdaptationKind, SamplerConfig, TrajectoryKind, WindowConfig};
use mini_hmc::distributions::{DiagGaussian, MvGaussian};
use mini_hmc::metric::MetricKind;
use mini_hmc::sampler::{HmcSampler, RunOutput};
use mini_hmc::trajectory::StaticKernel;
use mini_hmc::HmcError;
use ndarray::{arr1, arr2, Array2, Axis};
use ndarray_stats::CorrelationExt;
use rand::rngs::SmallRng;
use rand::SeedableRng;

fn flat_draws(output: &RunOutput) -> Array2<f64> {
    let (c, n, d) = output.draws.dim();
    output
        .draws
        .to_shape((c * n, d))
        .expect("draws are contiguous")
        .to_owned()
}

fn correlated_target() -> MvGaussian {
    MvGaussian::new(arr1(&[1.0, -1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap()
}

#[test]
fn test_dense_metric_learns_covariance() {
    let config = SamplerConfig::default().set_metric(MetricKind::Dense);
    let mut sampler = HmcSampler::new(correlated_target(), vec![vec![0.0, 0.0]; 4], config)
        .unwrap()
        .set_seed(42);
    let output = sampler.run(2000, 1000).unwrap();

    for metric in &output.metrics {
        assert_eq!(metric.kind(), MetricKind::Dense);
        let inv_mass = metric.inv_mass_matrix();
        assert_abs_diff_eq!(inv_mass[[0, 0]], 4.0, epsilon = 1.5);
        assert_abs_diff_eq!(inv_mass[[1, 1]], 3.0, epsilon = 1.2);
        assert_abs_diff_eq!(inv_mass[[0, 1]], 2.0, epsilon = 1.0);
        assert_eq!(inv_mass[[0, 1]], inv_mass[[1, 0]]);
    }

    let draws = flat_draws(&output);
    let mean = draws.mean_axis(Axis(0)).unwrap();
    assert_abs_diff_eq!(mean, arr1(&[1.0, -1.0]), epsilon = 0.2);
    let cov = draws.t().cov(1.0).unwrap();
    assert_abs_diff_eq!(cov, arr2(&[[4.0, 2.0], [2.0, 3.0]]), epsilon = 0.6);
    assert_eq!(output.summary().metric_fallbacks, 0);
}

#[test]
fn test_diagonal_metric_rescales() {
    let target = DiagGaussian::new(arr1(&[0.0, 0.0, 0.0]), arr1(&[0.1, 1.0, 10.0])).unwrap();
    let config = SamplerConfig::default().set_metric(MetricKind::Diagonal);
    let output = HmcSampler::new(target, vec![vec![0.05, 0.5, 1.0]; 2], config)
        .unwrap()
        .set_seed(9)
        .run(1500, 1000)
        .unwrap();

    for metric in &output.metrics {
        let inv_mass = metric.inv_mass_diag();
        assert!(inv_mass[0] < inv_mass[1] && inv_mass[1] < inv_mass[2], "{inv_mass:?}");
    }
    let sd = flat_draws(&output).std_axis(Axis(0), 1.0);
    assert!((sd[0] - 0.1).abs() < 0.02, "{sd:?}");
    assert!((sd[1] - 1.0).abs() < 0.15, "{sd:?}");
    assert!((sd[2] - 10.0).abs() < 1.5, "{sd:?}");
    assert_eq!(output.summary().n_divergent, 0);
}

#[test]
fn test_step_size_adaptation_hits_target() {
    for target_accept in [0.65, 0.9] {
        let config = SamplerConfig::default()
            .set_target_accept(target_accept)
            .set_adaptation(AdaptationKind::StepSize);
        let output = HmcSampler::new(correlated_target(), vec![vec![0.0, 0.0]; 2], config)
            .unwrap()
            .set_seed(3)
            .run(2000, 1000)
            .unwrap();
        let summary = output.summary();
        assert!(
            (summary.mean_accept - target_accept).abs() < 0.12,
            "target {target_accept}, got {}",
            summary.mean_accept
        );
    }
}

#[test]
fn test_hmcda_with_short_warmup() {
    let config = SamplerConfig::default()
        .set_metric(MetricKind::Diagonal)
        .set_trajectory(TrajectoryKind::FixedIntegrationTime {
            lambda: 3.0,
            kernel: StaticKernel::Metropolis,
        });
    // 60 warm-up iterations are fewer than the default 75 + 25 + 50 windows.
    let output = HmcSampler::new(correlated_target(), vec![vec![0.0, 0.0]; 2], config)
        .unwrap()
        .set_seed(17)
        .run(3000, 60)
        .unwrap();
    assert_eq!(output.n_draws(), 3000);
    let mean = flat_draws(&output).mean_axis(Axis(0)).unwrap();
    assert_abs_diff_eq!(mean, arr1(&[1.0, -1.0]), epsilon = 0.3);
    assert!(output.step_sizes.iter().all(|&eps| eps > 0.0 && eps.is_finite()));
}

#[test]
fn test_custom_windows_and_no_adaptation() {
    let windows = WindowConfig {
        init_buffer: 20,
        window_size: 10,
        term_buffer: 20,
    };
    let config = SamplerConfig::default()
        .set_metric(MetricKind::Diagonal)
        .set_windows(windows);
    let output = HmcSampler::new(correlated_target(), vec![vec![0.0, 0.0]; 2], config)
        .unwrap()
        .set_seed(5)
        .run(200, 200)
        .unwrap();
    assert!(output.metrics.iter().all(|m| m.inv_mass_diag()[0] != 1.0));

    let fixed = SamplerConfig::default()
        .set_adaptation(AdaptationKind::None)
        .set_metric(MetricKind::Unit)
        .set_step_size(0.4);
    let output = HmcSampler::new(correlated_target(), vec![vec![0.0, 0.0]; 2], fixed)
        .unwrap()
        .set_seed(5)
        .run(100, 100)
        .unwrap();
    assert_eq!(output.step_sizes, vec![0.4, 0.4]);
    assert!(output.metrics.iter().all(|m| m.kind() == MetricKind::Unit));
}

#[test]
fn test_stream_length_mismatch() {
    let sampler = HmcSampler::new(
        correlated_target(),
        vec![vec![0.0, 0.0]; 4],
        SamplerConfig::default(),
    )
    .unwrap();
    let rngs: Vec<SmallRng> = (0..3).map(SmallRng::seed_from_u64).collect();
    match sampler.with_rngs(rngs) {
        Err(HmcError::StreamLengthMismatch { expected, found }) => {
            assert_eq!((expected, found), (4, 3));
        }
        other => panic!("expected a stream length mismatch, got {other:?}"),
    }
}
