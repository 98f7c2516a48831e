/*!
# Saving runs to CSV

Writes collected draws and per-iteration statistics to CSV files. Enable via the `csv`
feature.
*/

use crate::error::Result;
use crate::sampler::RunOutput;
use crate::trajectory::TransitionStats;
use csv::Writer;
use ndarray::{Array3, Axis};
use std::fs::File;
use std::path::Path;

/**
Saves draws of shape **chain × sample × dimension**.

The file has a header row `chain,sample,dim_0,dim_1,...` followed by one row per
draw.

# Examples

```rust
use mini_hmc::io::csv::save_csv;
use ndarray::arr3;

let draws = arr3(&[[[1.0, 2.0], [3.0, 4.0]]]);
let file = tempfile::NamedTempFile::new()?;
save_csv(&draws, file.path())?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv<P: AsRef<Path>>(draws: &Array3<f64>, filename: P) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    let n_dims = draws.len_of(Axis(2));

    let mut header = vec!["chain".to_string(), "sample".to_string()];
    header.extend((0..n_dims).map(|i| format!("dim_{i}")));
    wtr.write_record(&header)?;

    for (chain_idx, chain) in draws.axis_iter(Axis(0)).enumerate() {
        for (sample_idx, sample) in chain.axis_iter(Axis(0)).enumerate() {
            let mut row = vec![chain_idx.to_string(), sample_idx.to_string()];
            row.extend(sample.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

const STATS_HEADER: [&str; 14] = [
    "chain",
    "sample",
    "step_size",
    "n_leapfrog_steps",
    "acceptance_rate",
    "tree_depth",
    "divergent",
    "energy",
    "energy_error",
    "max_energy_error",
    "log_density",
    "is_accept",
    "turning",
    "hit_max_depth",
];

/// Saves one row of [`TransitionStats`] per chain and iteration.
pub fn save_stats_csv<P: AsRef<Path>>(stats: &[Vec<TransitionStats>], filename: P) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    wtr.write_record(STATS_HEADER)?;

    for (chain_idx, chain) in stats.iter().enumerate() {
        for (sample_idx, s) in chain.iter().enumerate() {
            wtr.write_record([
                chain_idx.to_string(),
                sample_idx.to_string(),
                s.step_size.to_string(),
                s.n_leapfrog_steps.to_string(),
                s.acceptance_rate.to_string(),
                s.tree_depth.to_string(),
                s.divergent.to_string(),
                s.energy.to_string(),
                s.energy_error.to_string(),
                s.max_energy_error.to_string(),
                s.log_density.to_string(),
                s.is_accept.to_string(),
                s.turning.to_string(),
                s.hit_max_depth.to_string(),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Writes `<prefix>_draws.csv` and `<prefix>_stats.csv` into `dir`.
pub fn save_run<P: AsRef<Path>>(output: &RunOutput, dir: P, prefix: &str) -> Result<()> {
    let dir = dir.as_ref();
    save_csv(&output.draws, dir.join(format!("{prefix}_draws.csv")))?;
    save_stats_csv(&output.stats, dir.join(format!("{prefix}_stats.csv")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr3;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_save_csv_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("draws.csv");
        let draws = arr3(&[[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.5, -8.0]]]);
        save_csv(&draws, &path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "chain,sample,dim_0,dim_1");
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "0,0,1,2");
        assert_eq!(lines[4], "1,1,7.5,-8");
    }

    #[test]
    fn test_save_stats_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        let stats = vec![
            vec![TransitionStats {
                divergent: true,
                tree_depth: 3,
                ..TransitionStats::default()
            }],
            vec![TransitionStats::default(); 2],
        ];
        save_stats_csv(&stats, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(header.len(), STATS_HEADER.len());
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[0][5], "3");
        assert_eq!(&records[0][6], "true");
        assert_eq!(&records[2][0], "1");
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let draws = arr3(&[[[1.0]]]);
        assert!(save_csv(&draws, "/nonexistent-dir/x/draws.csv").is_err());
    }
}
