//! Variational Bayesian Gaussian mixture with a Dirichlet-process prior.
//!
//! Full covariances, Gaussian-Wishart priors on every component and a
//! stick-breaking prior on the weights (Blei & Jordan, "Variational inference
//! for Dirichlet process mixtures"). Components the data does not support
//! collapse to near-zero weight instead of being removed.

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use sft_core::{SftError, SolveStage};

/// Scale matrix of the Wishart prior on the precisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum CovariancePrior {
    /// Sample covariance of the data.
    #[default]
    Empirical,
    /// `value · I`.
    Isotropic(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixtureParams {
    pub max_iters: usize,
    /// Stop once no responsibility moves by more than this.
    pub tolerance: f64,
    /// Added to the diagonal of every component covariance.
    pub reg_covar: f64,
    /// Stick-breaking concentration; `None` uses `1 / n_components`.
    pub weight_concentration_prior: Option<f64>,
    pub mean_precision_prior: f64,
    /// Wishart degrees of freedom; `None` uses the feature dimension.
    pub degrees_of_freedom_prior: Option<f64>,
    pub covariance_prior: CovariancePrior,
}

impl Default for MixtureParams {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tolerance: 1e-3,
            reg_covar: 1e-6,
            weight_concentration_prior: None,
            mean_precision_prior: 1.0,
            degrees_of_freedom_prior: None,
            covariance_prior: CovariancePrior::Empirical,
        }
    }
}

/// A fitted mixture.
#[derive(Clone, Debug)]
pub struct GaussianMixture {
    means: Vec<DVector<f64>>,
    covariances: Vec<DMatrix<f64>>,
    weight_concentration: (DVector<f64>, DVector<f64>),
    responsibilities: DMatrix<f64>,
    converged: bool,
    iterations: usize,
}

struct Priors {
    weight_concentration: f64,
    mean_precision: f64,
    mean: DVector<f64>,
    dof: f64,
    covariance: DMatrix<f64>,
}

/// Posterior parameters from one M-step.
struct Posterior {
    wc0: DVector<f64>,
    wc1: DVector<f64>,
    mean_precision: DVector<f64>,
    means: Vec<DVector<f64>>,
    dof: DVector<f64>,
    covariances: Vec<DMatrix<f64>>,
}

impl GaussianMixture {
    /// Fit `n_components` components to the rows of `x`.
    ///
    /// Responsibilities start one-hot, sample `i` in component
    /// `i mod n_components`.
    pub fn fit(
        x: &DMatrix<f64>,
        n_components: usize,
        params: &MixtureParams,
    ) -> Result<Self, SftError> {
        let (n, d) = x.shape();
        if n == 0 || d == 0 || n_components == 0 {
            return Err(SftError::EmptyInput {
                context: "mixture samples",
            });
        }
        let priors = priors(x, n_components, params);

        let mut resp = DMatrix::zeros(n, n_components);
        for i in 0..n {
            resp[(i, i % n_components)] = 1.0;
        }

        let mut post = m_step(x, &resp, &priors, params.reg_covar)?;
        let mut converged = false;
        let mut iterations = 0;
        for it in 1..=params.max_iters {
            iterations = it;
            let next = e_step(x, &post)?;
            let change = (&next - &resp).amax();
            resp = next;
            post = m_step(x, &resp, &priors, params.reg_covar)?;
            if change < params.tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            debug!("mixture did not converge in {} iterations", params.max_iters);
        }
        // Responsibilities consistent with the final parameters.
        let resp = e_step(x, &post)?;

        Ok(Self {
            means: post.means,
            covariances: post.covariances,
            weight_concentration: (post.wc0, post.wc1),
            responsibilities: resp,
            converged,
            iterations,
        })
    }

    pub fn n_components(&self) -> usize {
        self.means.len()
    }

    pub fn means(&self) -> &[DVector<f64>] {
        &self.means
    }

    pub fn covariances(&self) -> &[DMatrix<f64>] {
        &self.covariances
    }

    /// `n × K` posterior responsibilities.
    pub fn responsibilities(&self) -> &DMatrix<f64> {
        &self.responsibilities
    }

    /// Expected stick-breaking weights.
    pub fn weights(&self) -> Vec<f64> {
        let (a, b) = &self.weight_concentration;
        let mut remaining = 1.0;
        (0..a.len())
            .map(|k| {
                let frac = a[k] / (a[k] + b[k]);
                let w = remaining * frac;
                remaining *= 1.0 - frac;
                w
            })
            .collect()
    }

    /// Most responsible component per sample.
    pub fn labels(&self) -> Vec<usize> {
        self.responsibilities
            .row_iter()
            .map(|r| r.transpose().argmax().0)
            .collect()
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

fn priors(x: &DMatrix<f64>, k: usize, params: &MixtureParams) -> Priors {
    let (n, d) = x.shape();
    let mean: DVector<f64> = x.row_mean().transpose();
    let covariance = match params.covariance_prior {
        CovariancePrior::Isotropic(v) => DMatrix::identity(d, d) * v,
        CovariancePrior::Empirical if n > 1 => {
            let mut c = DMatrix::zeros(d, d);
            for row in x.row_iter() {
                let diff = row.transpose() - &mean;
                c += &diff * diff.transpose();
            }
            c / (n - 1) as f64
        }
        CovariancePrior::Empirical => DMatrix::identity(d, d),
    };
    Priors {
        weight_concentration: params.weight_concentration_prior.unwrap_or(1.0 / k as f64),
        mean_precision: params.mean_precision_prior,
        mean,
        dof: params.degrees_of_freedom_prior.unwrap_or(d as f64),
        covariance,
    }
}

fn m_step(
    x: &DMatrix<f64>,
    resp: &DMatrix<f64>,
    priors: &Priors,
    reg_covar: f64,
) -> Result<Posterior, SftError> {
    let (_, d) = x.shape();
    let k = resp.ncols();
    let eps = 10.0 * f64::EPSILON;

    let nk = DVector::from_iterator(k, resp.column_iter().map(|c| c.sum() + eps));

    let mut means = Vec::with_capacity(k);
    let mut covariances = Vec::with_capacity(k);
    let mut mean_precision = DVector::zeros(k);
    let mut dof = DVector::zeros(k);
    for c in 0..k {
        let r = resp.column(c);
        let xk: DVector<f64> = (x.transpose() * r) / nk[c];

        let mut sk = DMatrix::<f64>::zeros(d, d);
        for (i, row) in x.row_iter().enumerate() {
            if r[i] == 0.0 {
                continue;
            }
            let diff = row.transpose() - &xk;
            sk += (&diff * diff.transpose()) * r[i];
        }
        sk /= nk[c];
        for j in 0..d {
            sk[(j, j)] += reg_covar;
        }

        let mp = priors.mean_precision + nk[c];
        let nu = priors.dof + nk[c];
        let diff = &xk - &priors.mean;
        let cov = (&priors.covariance
            + &sk * nk[c]
            + (&diff * diff.transpose()) * (nk[c] * priors.mean_precision / mp))
            / nu;

        means.push((&priors.mean * priors.mean_precision + &xk * nk[c]) / mp);
        covariances.push(cov);
        mean_precision[c] = mp;
        dof[c] = nu;
    }

    // Stick-breaking: a = 1 + N_k, b = prior + Σ_{j>k} N_j.
    let wc0 = nk.map(|v| 1.0 + v);
    let mut wc1 = DVector::zeros(k);
    let mut tail = 0.0;
    for c in (0..k).rev() {
        wc1[c] = priors.weight_concentration + tail;
        tail += nk[c];
    }

    if covariances.iter().any(|c| c.iter().any(|v| !v.is_finite())) {
        return Err(SftError::SingularSystem {
            stage: SolveStage::OutlierRejection,
        });
    }

    Ok(Posterior {
        wc0,
        wc1,
        mean_precision,
        means,
        dof,
        covariances,
    })
}

fn e_step(x: &DMatrix<f64>, post: &Posterior) -> Result<DMatrix<f64>, SftError> {
    let (n, d) = x.shape();
    let k = post.means.len();
    let df = d as f64;
    let singular = SftError::SingularSystem {
        stage: SolveStage::OutlierRejection,
    };

    // Expected log stick-breaking weights.
    let mut log_weights = DVector::zeros(k);
    let mut carry = 0.0;
    for c in 0..k {
        let sum = digamma(post.wc0[c] + post.wc1[c]);
        log_weights[c] = digamma(post.wc0[c]) - sum + carry;
        carry += digamma(post.wc1[c]) - sum;
    }

    let mut log_resp = DMatrix::zeros(n, k);
    for c in 0..k {
        let chol = post.covariances[c]
            .clone()
            .cholesky()
            .ok_or(singular.clone())?;
        let l = chol.l();
        let log_det_cov = 2.0 * l.diagonal().iter().map(|v| v.ln()).sum::<f64>();
        let nu = post.dof[c];

        // E[ln |Λ|] up to the covariance log-determinant.
        let log_lambda = df * std::f64::consts::LN_2
            + (0..d).map(|i| digamma(0.5 * (nu - i as f64))).sum::<f64>();

        for (i, row) in x.row_iter().enumerate() {
            let diff = row.transpose() - &post.means[c];
            let z = l.solve_lower_triangular(&diff).ok_or(singular.clone())?;
            let maha = z.norm_squared();
            let log_gauss = -0.5 * (df * (2.0 * std::f64::consts::PI).ln() + maha)
                - 0.5 * log_det_cov
                - 0.5 * df * nu.ln();
            log_resp[(i, c)] =
                log_gauss + 0.5 * (log_lambda - df / post.mean_precision[c]) + log_weights[c];
        }
    }

    for mut row in log_resp.row_iter_mut() {
        let max = row.max();
        let lse = max + row.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
        row.apply(|v| *v = (*v - lse).exp());
    }
    if log_resp.iter().any(|v| !v.is_finite()) {
        return Err(singular);
    }
    Ok(log_resp)
}

/// Digamma function ψ(x) for `x > 0`.
pub(crate) fn digamma(mut x: f64) -> f64 {
    let mut acc = 0.0;
    while x < 6.0 {
        acc -= 1.0 / x;
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    acc + x.ln()
        - 0.5 / x
        - f * (1.0 / 12.0 - f * (1.0 / 120.0 - f * (1.0 / 252.0 - f * (1.0 / 240.0 - f / 132.0))))
}
