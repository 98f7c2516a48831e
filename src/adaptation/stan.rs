//! Stan's windowed warm-up schedule.
//!
//! Warm-up iterations `1..=n_adapts` are split into a fast initial buffer (step size
//! only), a sequence of slow windows whose lengths double (step size and mass matrix,
//! the metric being replaced at the end of every window) and a fast terminal buffer.
//! The last slow window is stretched to the start of the terminal buffer when the
//! following doubled window would not fit.

use crate::adaptation::massmatrix::MassMatrixAdaptor;
use crate::adaptation::stepsize::NesterovDualAveraging;
use crate::adaptation::AdaptationUpdate;
use crate::config::WindowConfig;
use ndarray::Array1;

/// Window boundaries for `n_adapts` warm-up iterations, counted from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanWindows {
    n_adapts: usize,
    init_buffer: usize,
    term_buffer: usize,
    window_size: usize,
    window_start: usize,
    window_end: usize,
    splits: Vec<usize>,
}

impl StanWindows {
    pub fn new(n_adapts: usize, config: WindowConfig) -> Self {
        let WindowConfig {
            mut init_buffer,
            mut term_buffer,
            mut window_size,
        } = config;

        if init_buffer + window_size + term_buffer > n_adapts {
            init_buffer = (0.15 * n_adapts as f64).floor() as usize;
            term_buffer = (0.1 * n_adapts as f64).floor() as usize;
            window_size = n_adapts - (init_buffer + term_buffer);
            if n_adapts > 0 {
                log::warn!(
                    "{n_adapts} warm-up iterations are too few for the requested windows \
                     ({} + {} + {}); using {init_buffer} / {window_size} / {term_buffer}",
                    config.init_buffer,
                    config.window_size,
                    config.term_buffer,
                );
            }
        }

        let window_start = init_buffer + 1;
        let window_end = n_adapts - term_buffer;
        let mut splits = Vec::new();
        if window_size > 0 && window_start <= window_end {
            let mut size = window_size;
            let mut next = window_start + size - 1;
            while next <= window_end {
                splits.push(next);
                if next == window_end {
                    break;
                }
                size *= 2;
                next += size;
                // Stretch to the end when the window after this one would not fit.
                if next + 2 * size >= window_end {
                    next = window_end;
                }
            }
        }

        Self {
            n_adapts,
            init_buffer,
            term_buffer,
            window_size,
            window_start,
            window_end,
            splits,
        }
    }

    pub fn n_adapts(&self) -> usize {
        self.n_adapts
    }

    /// `(init_buffer, window_size, term_buffer)` after any shrinking.
    pub fn buffers(&self) -> (usize, usize, usize) {
        (self.init_buffer, self.window_size, self.term_buffer)
    }

    /// Last iteration of every slow window.
    pub fn splits(&self) -> &[usize] {
        &self.splits
    }

    pub fn is_in_window(&self, i: usize) -> bool {
        i >= self.window_start && i <= self.window_end
    }

    pub fn is_window_end(&self, i: usize) -> bool {
        self.splits.contains(&i)
    }
}

/// Step size every iteration, mass matrix inside the slow windows.
#[derive(Debug, Clone, PartialEq)]
pub struct StanHmcAdaptor {
    step: NesterovDualAveraging,
    mass: MassMatrixAdaptor,
    windows: StanWindows,
    i: usize,
}

impl StanHmcAdaptor {
    pub fn new(step: NesterovDualAveraging, mass: MassMatrixAdaptor, windows: StanWindows) -> Self {
        Self {
            step,
            mass,
            windows,
            i: 0,
        }
    }

    pub fn windows(&self) -> &StanWindows {
        &self.windows
    }

    pub fn step_size_adaptor(&self) -> &NesterovDualAveraging {
        &self.step
    }

    pub fn mass_matrix_adaptor(&self) -> &MassMatrixAdaptor {
        &self.mass
    }

    /// Number of adaptation iterations seen so far.
    pub fn iteration(&self) -> usize {
        self.i
    }

    pub fn adapt(&mut self, theta: &Array1<f64>, accept_stat: f64) -> AdaptationUpdate {
        self.i += 1;
        self.step.adapt(accept_stat);

        let is_window_end = self.windows.is_window_end(self.i);
        let metric = if self.windows.is_in_window(self.i) {
            self.mass.adapt(theta, is_window_end)
        } else {
            None
        };
        if is_window_end {
            log::debug!("end of adaptation window at iteration {}", self.i);
            self.step.reset();
            self.mass.reset();
        }
        AdaptationUpdate {
            step_size: self.step.step_size(),
            metric,
        }
    }

    pub(crate) fn finalize(&mut self) -> f64 {
        self.step.finalize()
    }
}
