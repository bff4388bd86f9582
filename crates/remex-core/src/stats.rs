//! Dataset statistics and the perplexity diversity measure.
//!
//! Perplexity of a count vector is `exp(H)` of its normalized
//! distribution; it reads as "effective number of distinct entities" and
//! is the diversity axis of every relevance/diversity curve downstream.

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;

/// Perplexity of a non-negative count vector: `exp(entropy)` of the
/// normalized distribution. Zero or empty mass yields `1.0` (a single
/// effective outcome).
#[must_use]
pub fn perplexity(counts: &[f64]) -> f64 {
    let total: f64 = counts.iter().filter(|c| c.is_finite() && **c > 0.0).sum();
    if total <= 0.0 {
        return 1.0;
    }
    let entropy: f64 = counts
        .iter()
        .filter(|c| c.is_finite() && **c > 0.0)
        .map(|&c| {
            let p = c / total;
            -p * p.ln()
        })
        .sum();
    entropy.exp()
}

/// Top-line dataset statistics. Feeds report headers and log lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub warm_users: usize,
    pub cold_users: usize,
    pub avg_hist_len: f64,
    pub avg_hist_span: f64,
    pub horizon: f64,
    pub warm_items: usize,
    pub cold_items: usize,
    pub avg_item_hist_len: f64,
    pub train_events: usize,
    pub test_events: usize,
    pub avg_targets_per_user: f64,
    pub avg_targets_per_item: f64,
    pub default_item_rec_top_k: usize,
    pub default_user_rec_top_c: usize,
    /// Perplexity of in-test users' history-length distribution.
    pub user_ppl: f64,
    /// Perplexity of in-test items' history-length distribution.
    pub item_ppl: f64,
}

impl DatasetStats {
    #[must_use]
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let warm_users = dataset.users_in_test().len();
        let warm_items = dataset.items_in_test().len();
        let target = dataset.target_matrix();

        #[allow(clippy::cast_precision_loss)]
        let user_hist: Vec<f64> = dataset
            .users_in_test()
            .iter()
            .map(|&pos| dataset.users()[pos as usize].hist_len as f64)
            .collect();
        let user_span: Vec<f64> = dataset
            .users_in_test()
            .iter()
            .map(|&pos| dataset.users()[pos as usize].hist_span)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let item_hist: Vec<f64> = dataset
            .items_in_test()
            .iter()
            .map(|&pos| dataset.items()[pos as usize].hist_len as f64)
            .collect();

        let train_events = dataset.events().iter().filter(|e| !e.is_holdout).count();

        Self {
            warm_users,
            cold_users: dataset.users().len() - warm_users,
            avg_hist_len: mean(&user_hist),
            avg_hist_span: mean(&user_span),
            horizon: dataset.horizon,
            warm_items,
            cold_items: dataset.items().len() - warm_items,
            avg_item_hist_len: mean(&item_hist),
            train_events,
            test_events: target.nnz(),
            avg_targets_per_user: ratio(target.nnz(), target.n_rows()),
            avg_targets_per_item: ratio(target.nnz(), target.n_cols()),
            default_item_rec_top_k: dataset.default_item_rec_top_k,
            default_user_rec_top_c: dataset.default_user_rec_top_c,
            user_ppl: perplexity(&user_hist),
            item_ppl: perplexity(&item_hist),
        }
    }
}

impl Dataset {
    /// Convenience accessor for [`DatasetStats::from_dataset`].
    #[must_use]
    pub fn stats(&self) -> DatasetStats {
        DatasetStats::from_dataset(self)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let out = numerator as f64 / denominator as f64;
    out
}
