//! Core traits and the exhaustive hypothesis search.
//!
//! Spatial verification is a RANSAC variant without random sampling: every
//! correspondence carries enough geometry (centre, shape and orientation) to
//! pin down a local affine map on its own, so each correspondence is used
//! once as the minimal sample of its own hypothesis. The pieces are the same
//! as in a sampled RANSAC pipeline:
//! - an [`Estimator`] turns a sample of correspondence indices into a model,
//! - a [`Scoring`] strategy measures every correspondence against a model,
//! - [`HypothesisSearch`] enumerates the samples and collects the results,
//! - a [`LocalOptimizer`] refits the winner on its inliers.

use crate::matches::MatchData;

/// Estimator responsible for generating model hypotheses from samples.
pub trait Estimator {
    /// Model type produced by this estimator.
    type Model: Clone;

    /// Size of a minimal sample for this estimator.
    fn sample_size(&self) -> usize;

    /// Estimate a model from a minimal sample. `None` for degenerate samples.
    fn estimate_model(&self, data: &MatchData<'_>, sample: &[usize]) -> Option<Self::Model>;

    /// Least-squares fit over more than a minimal sample.
    ///
    /// `weights`, when given, has one entry per correspondence of `data` (not
    /// per sample element).
    fn estimate_model_nonminimal(
        &self,
        data: &MatchData<'_>,
        sample: &[usize],
        weights: Option<&[f64]>,
    ) -> Option<Self::Model> {
        let _ = weights;
        self.estimate_model(data, sample)
    }
}

/// Scoring strategy: residual of one correspondence under a model, and the
/// inlier decision on that residual.
pub trait Scoring<M> {
    type Residual: Copy;

    fn residual(&self, data: &MatchData<'_>, model: &M, index: usize) -> Self::Residual;

    fn is_inlier(&self, residual: &Self::Residual) -> bool;

    /// Residual recorded for every correspondence when no model exists.
    /// Must never be classified as an inlier.
    fn degenerate_residual(&self) -> Self::Residual;

    /// Residuals and inlier indices of all correspondences under `model`.
    fn score_all(&self, data: &MatchData<'_>, model: &M) -> (Vec<Self::Residual>, Vec<usize>) {
        let residuals: Vec<Self::Residual> = (0..data.len())
            .map(|i| self.residual(data, model, i))
            .collect();
        let inliers = residuals
            .iter()
            .enumerate()
            .filter(|(_, r)| self.is_inlier(r))
            .map(|(i, _)| i)
            .collect();
        (residuals, inliers)
    }
}

/// Local optimization: refit a model on a set of inliers.
pub trait LocalOptimizer<M> {
    /// Fit a model to `inliers` and return it with the inliers it explains.
    /// `None` when the inliers cannot support a fit.
    fn run(
        &self,
        data: &MatchData<'_>,
        inliers: &[usize],
        weights: Option<&[f64]>,
    ) -> Option<(M, Vec<usize>)>;
}

/// Outcome of scoring one hypothesis against every correspondence.
#[derive(Debug, Clone)]
pub struct ScoredHypothesis<M, R> {
    /// `None` when the generating sample was degenerate.
    pub model: Option<M>,
    /// One residual per correspondence.
    pub residuals: Vec<R>,
    /// One flag per correspondence.
    pub inlier_mask: Vec<bool>,
}

impl<M, R> ScoredHypothesis<M, R> {
    pub fn is_degenerate(&self) -> bool {
        self.model.is_none()
    }

    pub fn inlier_count(&self) -> usize {
        self.inlier_mask.iter().filter(|&&f| f).count()
    }

    pub fn inlier_indices(&self) -> Vec<usize> {
        mask_to_indices(&self.inlier_mask)
    }
}

/// Deterministic search over single-correspondence hypotheses.
///
/// Hypothesis `k` is generated from correspondence `k`. `max_hypotheses`
/// bounds how many correspondences seed a hypothesis; every correspondence is
/// still scored against each hypothesis.
#[derive(Debug, Clone)]
pub struct HypothesisSearch<E, S> {
    pub estimator: E,
    pub scoring: S,
    pub max_hypotheses: Option<usize>,
}

impl<E, S> HypothesisSearch<E, S>
where
    E: Estimator + Sync,
    E::Model: Send,
    S: Scoring<E::Model> + Sync,
    S::Residual: Send,
{
    pub fn new(estimator: E, scoring: S) -> Self {
        Self {
            estimator,
            scoring,
            max_hypotheses: None,
        }
    }

    pub fn with_max_hypotheses(mut self, max_hypotheses: Option<usize>) -> Self {
        self.max_hypotheses = max_hypotheses;
        self
    }

    /// Number of hypotheses `run` produces for `data`.
    pub fn num_hypotheses(&self, data: &MatchData<'_>) -> usize {
        match self.max_hypotheses {
            Some(cap) => cap.min(data.len()),
            None => data.len(),
        }
    }

    /// Generate and score every hypothesis, in correspondence order.
    pub fn run(&self, data: &MatchData<'_>) -> Vec<ScoredHypothesis<E::Model, S::Residual>> {
        let num = self.num_hypotheses(data);
        debug_assert!(self.estimator.sample_size() == 1);

        #[cfg(feature = "parallel")]
        let scored = {
            use rayon::prelude::*;
            (0..num)
                .into_par_iter()
                .map(|k| self.score_one(data, k))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let scored = (0..num).map(|k| self.score_one(data, k)).collect();

        scored
    }

    fn score_one(&self, data: &MatchData<'_>, k: usize) -> ScoredHypothesis<E::Model, S::Residual> {
        match self.estimator.estimate_model(data, &[k]) {
            Some(model) => {
                let residuals: Vec<S::Residual> = (0..data.len())
                    .map(|i| self.scoring.residual(data, &model, i))
                    .collect();
                let inlier_mask = residuals.iter().map(|r| self.scoring.is_inlier(r)).collect();
                ScoredHypothesis {
                    model: Some(model),
                    residuals,
                    inlier_mask,
                }
            }
            None => ScoredHypothesis {
                model: None,
                residuals: vec![self.scoring.degenerate_residual(); data.len()],
                inlier_mask: vec![false; data.len()],
            },
        }
    }
}

/// Indices of the set flags, in order.
pub fn mask_to_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter(|&(_, &f)| f)
        .map(|(i, _)| i)
        .collect()
}
