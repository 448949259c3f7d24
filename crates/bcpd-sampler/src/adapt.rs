// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Warmup adaptation: dual-averaging step size and windowed diagonal metric.

const DA_GAMMA: f64 = 0.05;
const DA_T0: f64 = 10.0;
const DA_KAPPA: f64 = 0.75;

const INIT_BUFFER: usize = 75;
const TERM_BUFFER: usize = 50;
const BASE_WINDOW: usize = 25;
const MIN_WARMUP_FOR_METRIC: usize = 20;

/// Nesterov dual averaging of `ln(step_size)` toward a target acceptance rate.
#[derive(Clone, Debug)]
pub struct DualAveraging {
    target: f64,
    mu: f64,
    counter: f64,
    s_bar: f64,
    x_bar: f64,
}

impl DualAveraging {
    pub fn new(target: f64, step_size: f64) -> Self {
        let mut da = Self {
            target,
            mu: 0.0,
            counter: 0.0,
            s_bar: 0.0,
            x_bar: 0.0,
        };
        da.restart(step_size);
        da
    }

    /// Re-centres the iterate on `ln(10 * step_size)` and clears the history.
    pub fn restart(&mut self, step_size: f64) {
        self.mu = (10.0 * step_size).ln();
        self.counter = 0.0;
        self.s_bar = 0.0;
        self.x_bar = 0.0;
    }

    /// Feeds one acceptance statistic and returns the next step size.
    pub fn update(&mut self, accept_stat: f64) -> f64 {
        let accept_stat = if accept_stat.is_finite() {
            accept_stat.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.counter += 1.0;
        let eta = 1.0 / (self.counter + DA_T0);
        self.s_bar = (1.0 - eta) * self.s_bar + eta * (self.target - accept_stat);
        let x = self.mu - self.s_bar * self.counter.sqrt() / DA_GAMMA;
        let x_eta = self.counter.powf(-DA_KAPPA);
        self.x_bar = (1.0 - x_eta) * self.x_bar + x_eta * x;
        x.exp()
    }

    /// Averaged step size used once tuning ends.
    pub fn final_step_size(&self) -> f64 {
        self.x_bar.exp()
    }
}

/// Streaming per-coordinate mean and variance (Welford).
#[derive(Clone, Debug)]
pub struct WelfordVariance {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl WelfordVariance {
    pub fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn add(&mut self, point: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &x) in self.mean.iter_mut().zip(&mut self.m2).zip(point) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
    }

    /// Sample variance shrunk toward `1e-3`, weighted by the window size.
    pub fn regularized_variance(&self) -> Vec<f64> {
        let n = self.count as f64;
        let denom = (self.count.saturating_sub(1)).max(1) as f64;
        self.m2
            .iter()
            .map(|m2| (n / (n + 5.0)) * (m2 / denom) + 1e-3 * (5.0 / (n + 5.0)))
            .collect()
    }

    pub fn restart(&mut self) {
        self.count = 0;
        self.mean.iter_mut().for_each(|v| *v = 0.0);
        self.m2.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Slow-phase window schedule over `tune` iterations.
///
/// A fast initial buffer, a run of doubling windows whose last member
/// stretches to the terminal buffer, then a fast terminal buffer. Buffers are
/// scaled to 15% / 10% of `tune` when the defaults do not fit, and the metric
/// is left untouched for very short warmups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSchedule {
    init_buffer: usize,
    slow_end: usize,
    window_ends: Vec<usize>,
}

impl WindowSchedule {
    pub fn new(tune: usize) -> Self {
        if tune < MIN_WARMUP_FOR_METRIC {
            return Self {
                init_buffer: tune,
                slow_end: tune,
                window_ends: Vec::new(),
            };
        }

        let (init_buffer, term_buffer, base_window) =
            if INIT_BUFFER + TERM_BUFFER + BASE_WINDOW > tune {
                let init = (0.15 * tune as f64) as usize;
                let term = (0.1 * tune as f64) as usize;
                (init, term, tune - init - term)
            } else {
                (INIT_BUFFER, TERM_BUFFER, BASE_WINDOW)
            };

        let slow_end = tune - term_buffer;
        let mut window_ends = Vec::new();
        let mut start = init_buffer;
        let mut size = base_window;
        while start < slow_end {
            let mut end = start + size;
            // A following window of twice the size must still fit, otherwise
            // this window absorbs the remainder of the slow phase.
            if end + 2 * size > slow_end {
                end = slow_end;
            }
            window_ends.push(end);
            start = end;
            size *= 2;
        }

        Self {
            init_buffer,
            slow_end,
            window_ends,
        }
    }

    /// Whether the draw produced at 0-based tuning iteration `iteration` feeds the metric estimate.
    pub fn in_slow_phase(&self, iteration: usize) -> bool {
        !self.window_ends.is_empty() && iteration >= self.init_buffer && iteration < self.slow_end
    }

    /// Whether a metric window closes after `iteration`.
    pub fn is_window_end(&self, iteration: usize) -> bool {
        self.window_ends.binary_search(&(iteration + 1)).is_ok()
    }

    pub fn window_ends(&self) -> &[usize] {
        &self.window_ends
    }
}

#[cfg(test)]
mod tests {
    use super::{DualAveraging, WelfordVariance, WindowSchedule};

    #[test]
    fn default_schedule_doubles_windows_and_absorbs_tail() {
        let schedule = WindowSchedule::new(1000);
        assert_eq!(schedule.window_ends(), &[100, 150, 250, 450, 950]);
        assert!(!schedule.in_slow_phase(74));
        assert!(schedule.in_slow_phase(75));
        assert!(schedule.in_slow_phase(949));
        assert!(!schedule.in_slow_phase(950));
        assert!(schedule.is_window_end(99));
        assert!(!schedule.is_window_end(100));
    }

    #[test]
    fn short_warmup_scales_buffers() {
        let schedule = WindowSchedule::new(100);
        // init 15, term 10, a single window covering the slow phase.
        assert_eq!(schedule.window_ends(), &[90]);
        assert!(schedule.in_slow_phase(15));
        assert!(!schedule.in_slow_phase(14));
    }

    #[test]
    fn tiny_warmup_skips_metric_adaptation() {
        let schedule = WindowSchedule::new(10);
        assert!(schedule.window_ends().is_empty());
        assert!(!(0..10).any(|i| schedule.in_slow_phase(i)));
    }

    #[test]
    fn dual_averaging_shrinks_step_on_low_acceptance() {
        let mut da = DualAveraging::new(0.8, 1.0);
        let mut step = 1.0;
        for _ in 0..50 {
            step = da.update(0.1);
        }
        assert!(step < 1.0);
        assert!(da.final_step_size() < 1.0);

        let mut da = DualAveraging::new(0.8, 1.0);
        for _ in 0..50 {
            step = da.update(1.0);
        }
        assert!(step > 1.0);
    }

    #[test]
    fn welford_matches_two_pass_variance() {
        let mut w = WelfordVariance::new(2);
        let points = [[1.0, 10.0], [2.0, 10.0], [4.0, 10.0], [7.0, 10.0]];
        for p in &points {
            w.add(p);
        }
        assert_eq!(w.count(), 4);
        let var = w.regularized_variance();
        // sample variance of [1,2,4,7] is 7.0
        let expected = (4.0 / 9.0) * 7.0 + 1e-3 * (5.0 / 9.0);
        assert!((var[0] - expected).abs() < 1e-12);
        assert!((var[1] - 1e-3 * (5.0 / 9.0)).abs() < 1e-12);
        w.restart();
        assert_eq!(w.count(), 0);
    }
}
