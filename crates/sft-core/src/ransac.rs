//! Model-agnostic RANSAC.
//!
//! Implement [`Estimator`] for a model and call [`ransac`] with the data and
//! [`RansacOptions`]. When no consensus is found the result has
//! `success == false` and no model.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    pub max_iters: usize,
    /// Inlier residual threshold, in the estimator's residual units.
    pub thresh: f64,
    /// Minimum consensus size for a model to be accepted.
    pub min_inliers: usize,
    /// Target probability in `[0, 1]` of drawing one all-inlier sample;
    /// shrinks the iteration budget as the inlier ratio improves.
    pub confidence: f64,
    pub seed: u64,
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            thresh: 5.0,
            min_inliers: 4,
            confidence: 0.995,
            seed: 1_234_567,
            refit_on_inliers: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over the inliers.
    pub inlier_rms: f64,
    /// Iteration at which the best model was found.
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

pub trait Estimator {
    type Datum;
    type Model;

    /// Minimal sample size.
    const MIN_SAMPLES: usize;

    /// Fit from a sample of indices; `None` when the sample is unusable.
    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual in the units of [`RansacOptions::thresh`].
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    fn is_degenerate(_data: &[Self::Datum], _sample_indices: &[usize]) -> bool {
        false
    }

    /// Refit on a consensus set. Default keeps the minimal-sample model.
    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    let ss: f64 = vals.iter().map(|&v| v * v).sum();
    (ss / vals.len() as f64).sqrt()
}

fn required_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    let denom = (1.0 - inlier_ratio.powf(min_samples as f64)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let n = ((1.0 - confidence).ln() / denom).ceil() as usize;
    n.clamp(iters_so_far, max_iters)
}

fn consensus<E: Estimator>(
    data: &[E::Datum],
    model: &E::Model,
    thresh: f64,
) -> (Vec<usize>, Vec<f64>) {
    let mut inliers = Vec::new();
    let mut residuals = Vec::new();
    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
    (inliers, residuals)
}

/// Run RANSAC for estimator `E`.
///
/// A model beats the current best with more inliers, or as many inliers and
/// a smaller RMS.
pub fn ransac<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();
    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut budget = opts.max_iters;

    let mut iter = 0;
    while iter < budget {
        iter += 1;
        let sample: Vec<usize> = all_indices
            .choose_multiple(&mut rng, E::MIN_SAMPLES)
            .copied()
            .collect();

        if E::is_degenerate(data, &sample) {
            continue;
        }
        let Some(mut model) = E::fit(data, &sample) else {
            continue;
        };

        let (mut inliers, mut residuals) = consensus::<E>(data, &model, opts.thresh);
        if inliers.len() < opts.min_inliers {
            continue;
        }

        if opts.refit_on_inliers {
            if let Some(refined) = E::refit(data, &inliers) {
                let (ri, rr) = consensus::<E>(data, &refined, opts.thresh);
                if ri.len() >= opts.min_inliers {
                    model = refined;
                    inliers = ri;
                    residuals = rr;
                }
            }
        }

        let inlier_rms = rms(&residuals);
        let better = !best.success
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && inlier_rms < best.inlier_rms);
        if better {
            let ratio = inliers.len() as f64 / data.len() as f64;
            best = RansacResult {
                success: true,
                model: Some(model),
                inliers,
                inlier_rms,
                iters: iter,
            };
            budget = required_iterations(opts.confidence, ratio, E::MIN_SAMPLES, iter, opts.max_iters);
        }
    }

    best
}
