// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Smooth single-change-point model.
//!
//! ```text
//! tau   ~ Normal(n * tau_loc_fraction, n * tau_scale_fraction)
//! k     ~ Exponential(k_rate)
//! mu1   ~ Normal(mu_loc, mu_scale)
//! mu2   ~ Normal(mu_loc, mu_scale)
//! sigma ~ HalfNormal(sigma_scale)
//! w(t)  = sigmoid((t - tau) / k)
//! y(t)  ~ Normal(mu1 * (1 - w(t)) + mu2 * w(t), sigma)
//! ```
//!
//! Sampled in `(tau, ln k, mu1, mu2, ln sigma)`.

use crate::config::{ModelKind, SinglePriors};
use crate::model::{GenerativeModel, exponential_log_pdf, half_normal_log_pdf, normal_log_pdf};
use bcpd_core::numeric::{mean, sigmoid, std_population};
use bcpd_core::BcpdError;

const MIN_OBSERVATIONS: usize = 3;
const IDX_TAU: usize = 0;
const IDX_LOG_K: usize = 1;
const IDX_MU1: usize = 2;
const IDX_MU2: usize = 3;
const IDX_LOG_SIGMA: usize = 4;
const DIM: usize = 5;

#[derive(Clone, Debug)]
pub struct SingleChangePointModel {
    data: Vec<f64>,
    priors: SinglePriors,
    tau_loc: f64,
    tau_scale: f64,
}

/// Parameters in constrained space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SingleParams {
    pub tau: f64,
    pub k: f64,
    pub mu1: f64,
    pub mu2: f64,
    pub sigma: f64,
}

impl SingleChangePointModel {
    pub fn new(data: Vec<f64>, priors: SinglePriors) -> Result<Self, BcpdError> {
        if data.len() < MIN_OBSERVATIONS {
            return Err(BcpdError::insufficient_data(format!(
                "single change-point model needs at least {MIN_OBSERVATIONS} observations; got {}",
                data.len()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(BcpdError::invalid_input(
                "single change-point model requires finite observations",
            ));
        }
        let n = data.len() as f64;
        Ok(Self {
            tau_loc: n * priors.tau_loc_fraction,
            tau_scale: n * priors.tau_scale_fraction,
            data,
            priors,
        })
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn unpack(theta: &[f64]) -> SingleParams {
        SingleParams {
            tau: theta[IDX_TAU],
            k: theta[IDX_LOG_K].exp(),
            mu1: theta[IDX_MU1],
            mu2: theta[IDX_MU2],
            sigma: theta[IDX_LOG_SIGMA].exp(),
        }
    }

    /// Expected value at every index for the given parameters.
    pub fn mean_curve(&self, params: &SingleParams) -> Vec<f64> {
        (0..self.data.len())
            .map(|t| {
                let w = sigmoid((t as f64 - params.tau) / params.k);
                params.mu1 * (1.0 - w) + params.mu2 * w
            })
            .collect()
    }

    fn log_prior(&self, theta: &[f64], p: &SingleParams) -> f64 {
        normal_log_pdf(p.tau, self.tau_loc, self.tau_scale)
            + exponential_log_pdf(p.k, self.priors.k_rate)
            + theta[IDX_LOG_K]
            + normal_log_pdf(p.mu1, self.priors.mu_loc, self.priors.mu_scale)
            + normal_log_pdf(p.mu2, self.priors.mu_loc, self.priors.mu_scale)
            + half_normal_log_pdf(p.sigma, self.priors.sigma_scale)
            + theta[IDX_LOG_SIGMA]
    }

    fn params_are_usable(p: &SingleParams) -> bool {
        p.tau.is_finite()
            && p.k.is_finite()
            && p.k > 0.0
            && p.mu1.is_finite()
            && p.mu2.is_finite()
            && p.sigma.is_finite()
            && p.sigma > 0.0
    }
}

impl GenerativeModel for SingleChangePointModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Single
    }

    fn n_obs(&self) -> usize {
        self.data.len()
    }

    fn dim(&self) -> usize {
        DIM
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        let p = Self::unpack(theta);
        if !Self::params_are_usable(&p) {
            return f64::NEG_INFINITY;
        }
        let inv_var = 1.0 / (p.sigma * p.sigma);
        let mut ss = 0.0;
        for (t, y) in self.data.iter().enumerate() {
            let w = sigmoid((t as f64 - p.tau) / p.k);
            let r = y - (p.mu1 + (p.mu2 - p.mu1) * w);
            ss += r * r;
        }
        let n = self.data.len() as f64;
        let log_lik =
            -0.5 * ss * inv_var - n * p.sigma.ln() - 0.5 * n * (2.0 * std::f64::consts::PI).ln();
        log_lik + self.log_prior(theta, &p)
    }

    fn supports_gradient(&self) -> bool {
        true
    }

    fn log_density_gradient(&self, theta: &[f64], grad: &mut [f64]) -> Option<f64> {
        let p = Self::unpack(theta);
        if !Self::params_are_usable(&p) {
            grad.iter_mut().for_each(|g| *g = 0.0);
            return Some(f64::NEG_INFINITY);
        }
        let inv_var = 1.0 / (p.sigma * p.sigma);
        let delta_mu = p.mu2 - p.mu1;

        let mut ss = 0.0;
        let mut g_tau = 0.0;
        let mut g_log_k = 0.0;
        let mut g_mu1 = 0.0;
        let mut g_mu2 = 0.0;
        for (t, y) in self.data.iter().enumerate() {
            let z = (t as f64 - p.tau) / p.k;
            let w = sigmoid(z);
            let r = y - (p.mu1 + delta_mu * w);
            ss += r * r;

            let d_mean = r * inv_var;
            let dw = w * (1.0 - w);
            g_mu1 += d_mean * (1.0 - w);
            g_mu2 += d_mean * w;
            g_tau -= d_mean * delta_mu * dw / p.k;
            g_log_k -= d_mean * delta_mu * dw * z;
        }
        let n = self.data.len() as f64;
        let log_lik =
            -0.5 * ss * inv_var - n * p.sigma.ln() - 0.5 * n * (2.0 * std::f64::consts::PI).ln();

        let mu_var = self.priors.mu_scale * self.priors.mu_scale;
        grad[IDX_TAU] = g_tau - (p.tau - self.tau_loc) / (self.tau_scale * self.tau_scale);
        grad[IDX_LOG_K] = g_log_k + 1.0 - self.priors.k_rate * p.k;
        grad[IDX_MU1] = g_mu1 - (p.mu1 - self.priors.mu_loc) / mu_var;
        grad[IDX_MU2] = g_mu2 - (p.mu2 - self.priors.mu_loc) / mu_var;
        grad[IDX_LOG_SIGMA] = -n + ss * inv_var + 1.0
            - (p.sigma * p.sigma) / (self.priors.sigma_scale * self.priors.sigma_scale);

        Some(log_lik + self.log_prior(theta, &p))
    }

    /// Starts at the prior centre for `tau` and `k`, and at half-series moments
    /// for the regime means and noise scale.
    fn initial_point(&self) -> Vec<f64> {
        let half = self.data.len() / 2;
        let mu1 = mean(&self.data[..half]).unwrap_or(self.priors.mu_loc);
        let mu2 = mean(&self.data[half..]).unwrap_or(self.priors.mu_loc);
        let sigma = std_population(&self.data)
            .filter(|s| *s > 0.0)
            .unwrap_or(self.priors.sigma_scale);
        vec![
            self.tau_loc,
            (1.0 / self.priors.k_rate).ln(),
            mu1,
            mu2,
            sigma.ln(),
        ]
    }

    fn initial_scales(&self) -> Vec<f64> {
        let sigma = std_population(&self.data)
            .filter(|s| *s > 0.0)
            .unwrap_or(self.priors.sigma_scale);
        vec![
            self.tau_scale,
            1.0,
            sigma.min(self.priors.mu_scale),
            sigma.min(self.priors.mu_scale),
            0.5,
        ]
    }

    fn parameter_names(&self) -> Vec<String> {
        ["tau", "k", "mu1", "mu2", "sigma"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn constrain(&self, theta: &[f64]) -> Vec<f64> {
        let p = Self::unpack(theta);
        vec![p.tau, p.k, p.mu1, p.mu2, p.sigma]
    }
}

#[cfg(test)]
mod tests {
    use super::SingleChangePointModel;
    use crate::config::SinglePriors;
    use crate::model::GenerativeModel;

    fn step_data() -> Vec<f64> {
        (0..40)
            .map(|t| {
                let base = if t < 20 { 0.0 } else { 0.05 };
                base + 0.003 * ((t as f64) * 1.7).sin()
            })
            .collect()
    }

    #[test]
    fn rejects_too_short_series() {
        let err = SingleChangePointModel::new(vec![0.0, 1.0], SinglePriors::default())
            .expect_err("two observations must fail");
        assert_eq!(err.code(), "insufficient_data");
    }

    #[test]
    fn analytic_gradient_matches_finite_differences() {
        let model =
            SingleChangePointModel::new(step_data(), SinglePriors::default()).expect("model");
        let theta = [18.3, (2.5f64).ln(), 0.004, 0.041, (0.012f64).ln()];
        let mut grad = vec![0.0; model.dim()];
        let lp = model
            .log_density_gradient(&theta, &mut grad)
            .expect("model is differentiable");
        assert!((lp - model.log_density(&theta)).abs() < 1e-9);

        for i in 0..theta.len() {
            let h = 1e-6;
            let mut plus = theta;
            let mut minus = theta;
            plus[i] += h;
            minus[i] -= h;
            let numeric = (model.log_density(&plus) - model.log_density(&minus)) / (2.0 * h);
            let tol = 1e-4 * numeric.abs().max(1.0);
            assert!(
                (numeric - grad[i]).abs() <= tol,
                "coordinate {i}: analytic={} numeric={numeric}",
                grad[i]
            );
        }
    }

    #[test]
    fn log_density_prefers_true_change_location() {
        let model =
            SingleChangePointModel::new(step_data(), SinglePriors::default()).expect("model");
        let at = |tau: f64| model.log_density(&[tau, (0.2f64).ln(), 0.0, 0.05, (0.003f64).ln()]);
        assert!(at(19.5) > at(10.0));
        assert!(at(19.5) > at(30.0));
    }

    #[test]
    fn non_finite_parameters_have_zero_density() {
        let model =
            SingleChangePointModel::new(step_data(), SinglePriors::default()).expect("model");
        assert_eq!(
            model.log_density(&[f64::NAN, 0.0, 0.0, 0.0, 0.0]),
            f64::NEG_INFINITY
        );
        assert_eq!(
            model.log_density(&[10.0, -1_000.0, 0.0, 0.0, 0.0]),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn constrain_exposes_named_parameters() {
        let model =
            SingleChangePointModel::new(step_data(), SinglePriors::default()).expect("model");
        assert_eq!(model.parameter_names(), vec!["tau", "k", "mu1", "mu2", "sigma"]);
        let values = model.constrain(&[12.0, 0.0, 0.1, 0.2, (0.5f64).ln()]);
        assert_eq!(values[0], 12.0);
        assert!((values[1] - 1.0).abs() < 1e-12);
        assert!((values[4] - 0.5).abs() < 1e-12);
        assert_eq!(model.initial_point().len(), model.dim());
        assert_eq!(model.initial_scales().len(), model.dim());
    }
}
