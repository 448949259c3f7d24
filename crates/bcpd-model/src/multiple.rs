// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Piecewise-constant model with `k` change points.
//!
//! Segment lengths come from a Dirichlet-distributed simplex over `k + 1`
//! components; the cumulative fractions scaled by the series length give the
//! boundaries. The simplex is sampled through the stick-breaking transform so
//! the unconstrained layout is `[y_0..y_{k-1}, mu_0..mu_k, ln sigma]`.

use crate::config::{ModelKind, MultiplePriors};
use crate::model::{GenerativeModel, half_normal_log_pdf, normal_log_pdf};
use bcpd_core::numeric::{log1p_exp, mean, std_population};
use bcpd_core::BcpdError;
use statrs::function::gamma::ln_gamma;

#[derive(Clone, Debug)]
pub struct MultipleChangePointModel {
    data: Vec<f64>,
    n_changepoints: usize,
    priors: MultiplePriors,
    prefix_sum: Vec<f64>,
    prefix_sum_sq: Vec<f64>,
}

/// Constrained view of one point.
#[derive(Clone, Debug, PartialEq)]
pub struct MultipleParams {
    pub taus: Vec<f64>,
    pub changepoints: Vec<usize>,
    pub mus: Vec<f64>,
    pub sigma: f64,
}

/// Stick-breaking map from `K - 1` reals to the `K`-simplex.
///
/// Returns the log of each simplex entry and the log-Jacobian of the map. The
/// offset `ln(K - 1 - i)` centres `y = 0` on the uniform simplex.
pub fn stick_breaking_log(y: &[f64]) -> (Vec<f64>, f64) {
    let components = y.len() + 1;
    let mut log_x = Vec::with_capacity(components);
    let mut log_remaining = 0.0;
    let mut log_jacobian = 0.0;
    for (i, &yi) in y.iter().enumerate() {
        let u = yi - ((components - 1 - i) as f64).ln();
        let log_z = -log1p_exp(-u);
        let log_one_minus_z = -log1p_exp(u);
        log_x.push(log_remaining + log_z);
        log_jacobian += log_z + log_one_minus_z + log_remaining;
        log_remaining += log_one_minus_z;
    }
    log_x.push(log_remaining);
    (log_x, log_jacobian)
}

/// Boundary indices from segment fractions: `floor(cumsum(fractions * n))`,
/// clamped to `n`. The final cumulative entry is the series end and is dropped.
pub fn changepoints_from_fractions(fractions: &[f64], n: usize) -> Vec<usize> {
    let scale = n as f64;
    let mut acc = 0.0;
    let mut out = Vec::with_capacity(fractions.len().saturating_sub(1));
    for &fraction in fractions.iter().take(fractions.len().saturating_sub(1)) {
        acc += fraction * scale;
        let idx = if acc.is_finite() && acc > 0.0 {
            (acc.floor() as usize).min(n)
        } else {
            0
        };
        // Cumulative rounding can not step backwards, but keep the sequence
        // monotone even for non-finite input.
        let idx = out.last().map_or(idx, |&prev: &usize| idx.max(prev));
        out.push(idx);
    }
    out
}

/// Segment of observation `index`: the number of boundaries `<= index`.
///
/// `boundaries` must be sorted ascending.
pub fn segment_of(boundaries: &[usize], index: usize) -> usize {
    boundaries.partition_point(|&b| b <= index)
}

/// Segment label for every observation in `0..n`. Equivalent to calling
/// [`segment_of`] per index, done in a single sweep.
pub fn segment_assignment(boundaries: &[usize], n: usize) -> Vec<usize> {
    let mut labels = Vec::with_capacity(n);
    let mut segment = 0;
    for i in 0..n {
        while segment < boundaries.len() && boundaries[segment] <= i {
            segment += 1;
        }
        labels.push(segment);
    }
    labels
}

impl MultipleChangePointModel {
    pub fn new(
        data: Vec<f64>,
        n_changepoints: usize,
        priors: MultiplePriors,
    ) -> Result<Self, BcpdError> {
        if n_changepoints == 0 {
            return Err(BcpdError::config(
                "multiple change-point model requires n_changepoints >= 1",
            ));
        }
        if data.len() <= n_changepoints {
            return Err(BcpdError::insufficient_data(format!(
                "{n_changepoints} change points need more than {n_changepoints} observations; got {}",
                data.len()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(BcpdError::invalid_input(
                "multiple change-point model requires finite observations",
            ));
        }

        let mut prefix_sum = Vec::with_capacity(data.len() + 1);
        let mut prefix_sum_sq = Vec::with_capacity(data.len() + 1);
        prefix_sum.push(0.0);
        prefix_sum_sq.push(0.0);
        let (mut s1, mut s2) = (0.0, 0.0);
        for &y in &data {
            s1 += y;
            s2 += y * y;
            prefix_sum.push(s1);
            prefix_sum_sq.push(s2);
        }

        Ok(Self {
            data,
            n_changepoints,
            priors,
            prefix_sum,
            prefix_sum_sq,
        })
    }

    pub fn n_changepoints(&self) -> usize {
        self.n_changepoints
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    fn components(&self) -> usize {
        self.n_changepoints + 1
    }

    fn mu_offset(&self) -> usize {
        self.n_changepoints
    }

    fn log_sigma_index(&self) -> usize {
        2 * self.n_changepoints + 1
    }

    pub fn unpack(&self, theta: &[f64]) -> MultipleParams {
        let (log_x, _) = stick_breaking_log(&theta[..self.n_changepoints]);
        let taus: Vec<f64> = log_x.iter().map(|lx| lx.exp()).collect();
        let changepoints = changepoints_from_fractions(&taus, self.data.len());
        let mus = theta[self.mu_offset()..self.mu_offset() + self.components()].to_vec();
        MultipleParams {
            taus,
            changepoints,
            mus,
            sigma: theta[self.log_sigma_index()].exp(),
        }
    }

    /// Sum of squared residuals of `data[start..end]` around `mu`.
    fn segment_sse(&self, start: usize, end: usize, mu: f64) -> f64 {
        if end <= start {
            return 0.0;
        }
        let len = (end - start) as f64;
        let s1 = self.prefix_sum[end] - self.prefix_sum[start];
        let s2 = self.prefix_sum_sq[end] - self.prefix_sum_sq[start];
        (s2 - 2.0 * mu * s1 + len * mu * mu).max(0.0)
    }

    fn log_likelihood(&self, boundaries: &[usize], mus: &[f64], sigma: f64) -> f64 {
        let n = self.data.len();
        let mut start = 0;
        let mut sse = 0.0;
        for (segment, &mu) in mus.iter().enumerate() {
            let end = boundaries.get(segment).copied().unwrap_or(n).clamp(start, n);
            sse += self.segment_sse(start, end, mu);
            start = end;
        }
        let n = n as f64;
        -0.5 * sse / (sigma * sigma) - n * sigma.ln() - 0.5 * n * (2.0 * std::f64::consts::PI).ln()
    }

    fn dirichlet_log_pdf(&self, log_x: &[f64]) -> f64 {
        let alpha = self.priors.dirichlet_concentration;
        let components = log_x.len() as f64;
        let norm = ln_gamma(components * alpha) - components * ln_gamma(alpha);
        if alpha == 1.0 {
            return norm;
        }
        norm + (alpha - 1.0) * log_x.iter().sum::<f64>()
    }
}

impl GenerativeModel for MultipleChangePointModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Multiple
    }

    fn n_obs(&self) -> usize {
        self.data.len()
    }

    fn dim(&self) -> usize {
        self.n_changepoints + self.components() + 1
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        if theta.iter().any(|v| !v.is_finite()) {
            return f64::NEG_INFINITY;
        }
        let (log_x, log_jacobian) = stick_breaking_log(&theta[..self.n_changepoints]);
        let log_sigma = theta[self.log_sigma_index()];
        let sigma = log_sigma.exp();
        if !sigma.is_finite() || sigma <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let taus: Vec<f64> = log_x.iter().map(|lx| lx.exp()).collect();
        let boundaries = changepoints_from_fractions(&taus, self.data.len());
        let mus = &theta[self.mu_offset()..self.mu_offset() + self.components()];

        let log_prior = self.dirichlet_log_pdf(&log_x)
            + log_jacobian
            + mus
                .iter()
                .map(|&mu| normal_log_pdf(mu, self.priors.mu_loc, self.priors.mu_scale))
                .sum::<f64>()
            + half_normal_log_pdf(sigma, self.priors.sigma_scale)
            + log_sigma;

        let value = log_prior + self.log_likelihood(&boundaries, mus, sigma);
        if value.is_nan() {
            f64::NEG_INFINITY
        } else {
            value
        }
    }

    /// Uniform simplex, per-segment sample means, and the overall spread.
    fn initial_point(&self) -> Vec<f64> {
        let n = self.data.len();
        let components = self.components();
        let mut theta = vec![0.0; self.n_changepoints];
        for segment in 0..components {
            let start = segment * n / components;
            let end = (segment + 1) * n / components;
            theta.push(mean(&self.data[start..end]).unwrap_or(self.priors.mu_loc));
        }
        let sigma = std_population(&self.data)
            .filter(|s| *s > 0.0)
            .unwrap_or(self.priors.sigma_scale);
        theta.push(sigma.ln());
        theta
    }

    fn initial_scales(&self) -> Vec<f64> {
        let spread = std_population(&self.data)
            .filter(|s| *s > 0.0)
            .unwrap_or(self.priors.mu_scale);
        let mut scales = vec![0.5; self.n_changepoints];
        scales.extend(std::iter::repeat_n(spread, self.components()));
        scales.push(0.5);
        scales
    }

    fn parameter_names(&self) -> Vec<String> {
        let components = self.components();
        let mut names = Vec::with_capacity(3 * components);
        names.extend((0..components).map(|i| format!("taus[{i}]")));
        names.extend((0..self.n_changepoints).map(|i| format!("changepoints[{i}]")));
        names.extend((0..components).map(|i| format!("mus[{i}]")));
        names.push("sigma".to_string());
        names
    }

    fn constrain(&self, theta: &[f64]) -> Vec<f64> {
        let params = self.unpack(theta);
        let mut out = Vec::with_capacity(3 * self.components());
        out.extend_from_slice(&params.taus);
        out.extend(params.changepoints.iter().map(|&c| c as f64));
        out.extend_from_slice(&params.mus);
        out.push(params.sigma);
        out
    }
}
