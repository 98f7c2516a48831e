use mini_hmc::config::SamplerConfig;
use mini_hmc::distributions::Rosenbrock2D;
use mini_hmc::sampler::HmcSampler;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    // Create the 2D Rosenbrock target (a = 1, b = 100).
    let target = Rosenbrock2D { a: 1.0, b: 100.0 };

    // Four chains started around the mode.
    let initial_positions = vec![
        vec![1.0, 1.0],
        vec![0.5, 0.3],
        vec![1.2, 1.5],
        vec![0.8, 0.6],
    ];

    // NUTS with a high acceptance target for the curved ridge.
    let config = SamplerConfig::default().set_target_accept(0.95);
    let mut sampler = HmcSampler::new(target, initial_positions, config)?.set_seed(42);

    // Number of samples to collect and to discard (warm-up).
    let n_collect = 1000;
    let n_discard = 1000;

    let output = sampler.run_progress(n_collect, n_discard)?;
    println!(
        "NUTS sampler: generated {} observations.",
        output.n_chains() * output.n_draws()
    );
    assert_eq!(output.draws.shape(), &[4, 1000, 2]);

    let summary = output.summary();
    println!("Divergent transitions: {}", summary.n_divergent);
    println!("Hit max tree depth: {}", summary.n_max_depth);
    println!("Mean acceptance: {:.3}", summary.mean_accept);
    if let Some(max_rhat) = summary.max_rhat {
        println!("MAX Rhat: {max_rhat:.3}");
    }
    for (i, eps) in output.step_sizes.iter().enumerate() {
        println!("Chain {i}: step size {eps:.4}");
    }
    Ok(())
}
