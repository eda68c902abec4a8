//! Generic, model-agnostic RANSAC.
//!
//! Implement [`Estimator`] for a model and call [`ransac_fit`] with the data
//! and [`RansacOptions`]. The loop never panics: when no consensus is found the
//! returned [`RansacResult`] has `success == false` and no model.
//!
//! Sampling uses a seeded [`StdRng`], so a run is reproducible for a given
//! seed and data order.

use rand::prelude::IndexedRandom;
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Configuration of the RANSAC loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RansacOptions {
    /// Upper bound on hypotheses drawn.
    pub max_iters: usize,
    /// Inlier threshold, in the units of [`Estimator::residual`].
    pub thresh: f64,
    /// Smallest consensus set that is accepted.
    pub min_inliers: usize,
    /// Target probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    pub seed: u64,
    /// Refit on the consensus set and re-score before comparing models.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            thresh: 3.0,
            min_inliers: 4,
            confidence: 0.995,
            seed: 0x5eed_1a5e,
            refit_on_inliers: true,
        }
    }
}

/// Outcome of [`ransac_fit`].
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    /// Indices of the consensus set of `model`.
    pub inliers: Vec<usize>,
    /// RMS residual over `inliers`.
    pub inlier_rms: f64,
    /// Hypotheses drawn before stopping.
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

/// Model family usable with [`ransac_fit`].
pub trait Estimator {
    type Datum;
    type Model;

    /// Size of a minimal sample.
    const MIN_SAMPLES: usize;

    /// Fit a model to the data at `sample`; `None` if the fit fails.
    fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative error of one datum under `model`.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Reject a minimal sample before fitting. Default: never.
    fn is_degenerate(_data: &[Self::Datum], _sample: &[usize]) -> bool {
        false
    }

    /// Fit to a full consensus set. Default: keep the minimal-sample model.
    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

struct Consensus {
    inliers: Vec<usize>,
    rms: f64,
}

fn score<E: Estimator>(model: &E::Model, data: &[E::Datum], thresh: f64) -> Consensus {
    let mut inliers = Vec::with_capacity(data.len());
    let mut ss = 0.0;
    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            ss += r * r;
        }
    }
    let rms = if inliers.is_empty() {
        f64::INFINITY
    } else {
        (ss / inliers.len() as f64).sqrt()
    };
    Consensus { inliers, rms }
}

/// Hypotheses needed to reach `confidence` at the given inlier ratio.
fn required_iterations(confidence: f64, inlier_ratio: f64, sample_size: usize) -> Option<usize> {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return None;
    }
    let p_good = inlier_ratio.powi(sample_size as i32);
    let log_fail = (1.0 - p_good).max(1e-12).ln();
    if log_fail >= 0.0 {
        return None;
    }
    Some(((1.0 - confidence).ln() / log_fail).ceil() as usize)
}

/// Run RANSAC for estimator `E`.
pub fn ransac_fit<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best = RansacResult::<E::Model>::default();
    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = Vec::with_capacity(E::MIN_SAMPLES);
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut budget = opts.max_iters;
    let mut iter = 0;

    while iter < budget {
        iter += 1;
        sample.clear();
        sample.extend(indices.choose_multiple(&mut rng, E::MIN_SAMPLES).copied());

        if E::is_degenerate(data, &sample) {
            continue;
        }
        let Some(mut model) = E::fit(data, &sample) else {
            continue;
        };

        let mut consensus = score::<E>(&model, data, opts.thresh);
        if consensus.inliers.len() < opts.min_inliers {
            continue;
        }
        if opts.refit_on_inliers {
            if let Some(refined) = E::refit(data, &consensus.inliers) {
                let rescored = score::<E>(&refined, data, opts.thresh);
                if rescored.inliers.len() >= opts.min_inliers {
                    model = refined;
                    consensus = rescored;
                }
            }
        }

        let improves = !best.success
            || consensus.inliers.len() > best.inliers.len()
            || (consensus.inliers.len() == best.inliers.len() && consensus.rms < best.inlier_rms);
        if improves {
            let ratio = consensus.inliers.len() as f64 / data.len() as f64;
            best = RansacResult {
                success: true,
                model: Some(model),
                inliers: consensus.inliers,
                inlier_rms: consensus.rms,
                iters: iter,
            };
            if let Some(n) = required_iterations(opts.confidence, ratio, E::MIN_SAMPLES) {
                budget = n.clamp(iter, opts.max_iters);
            }
        }
    }

    best.iters = iter;
    best
}
