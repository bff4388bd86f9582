//! Top-line recommendation metrics.
//!
//! Two symmetric views of the same score matrix:
//!
//! - [`evaluate_item_rec`] — each user receives their top-`k` items
//!   ("item recommendation"); precision/recall averaged over users,
//!   plus the perplexity of item exposure across all lists.
//! - [`evaluate_user_rec`] — each item receives its top-`c` users
//!   ("user recommendation"); precision/recall averaged over items,
//!   plus the perplexity of user selection counts.
//!
//! Recall averages only over rows (columns) that have at least one
//! target; an entity with no holdout ground truth contributes no recall
//! signal either way.

use std::collections::BTreeMap;

use remex_core::{ScoreMatrix, TargetMatrix, perplexity};

/// Top-`k` item recommendation metrics per user.
#[must_use]
pub fn evaluate_item_rec(
    target: &TargetMatrix,
    scores: &ScoreMatrix,
    k: usize,
) -> BTreeMap<String, f64> {
    let mut precisions = Vec::with_capacity(scores.n_rows());
    let mut recalls = Vec::new();
    let mut exposure = vec![0.0f64; scores.n_cols()];

    for row in 0..scores.n_rows() {
        let picked = top_k(scores.row(row), k);
        let hits = picked
            .iter()
            .filter(|&&col| target.contains(row, col))
            .count();
        for &col in &picked {
            exposure[col as usize] += 1.0;
        }
        precisions.push(ratio(hits, k));
        let targets = target.row(row).len();
        if targets > 0 {
            recalls.push(ratio(hits, targets));
        }
    }

    let mut out = BTreeMap::new();
    out.insert("prec".to_string(), mean(&precisions));
    out.insert("recall".to_string(), mean(&recalls));
    out.insert("item_ppl".to_string(), perplexity(&exposure));
    out
}

/// Top-`c` user recommendation metrics per item.
#[must_use]
pub fn evaluate_user_rec(
    target: &TargetMatrix,
    scores: &ScoreMatrix,
    c: usize,
) -> BTreeMap<String, f64> {
    let n_rows = scores.n_rows();
    let n_cols = scores.n_cols();
    let mut col_targets = vec![0usize; n_cols];
    for row in 0..target.n_rows() {
        for &col in target.row(row) {
            col_targets[col as usize] += 1;
        }
    }

    let mut precisions = Vec::with_capacity(n_cols);
    let mut recalls = Vec::new();
    let mut selection = vec![0.0f64; n_rows];

    for col in 0..n_cols {
        let column: Vec<f64> = (0..n_rows).map(|row| scores.get(row, col)).collect();
        let picked = top_k(&column, c);
        #[allow(clippy::cast_possible_truncation)]
        let hits = picked
            .iter()
            .filter(|&&row| target.contains(row as usize, col as u32))
            .count();
        for &row in &picked {
            selection[row as usize] += 1.0;
        }
        precisions.push(ratio(hits, c));
        if col_targets[col] > 0 {
            recalls.push(ratio(hits, col_targets[col]));
        }
    }

    let mut out = BTreeMap::new();
    out.insert("prec".to_string(), mean(&precisions));
    out.insert("recall".to_string(), mean(&recalls));
    out.insert("user_ppl".to_string(), perplexity(&selection));
    out
}

/// Indices of the `k` largest values; ties break by index, NaN last.
fn top_k(values: &[f64], k: usize) -> Vec<u32> {
    #[allow(clippy::cast_possible_truncation)]
    let mut order: Vec<u32> = (0..values.len() as u32).collect();
    order.sort_by(|&a, &b| {
        let (x, y) = (values[a as usize], values[b as usize]);
        match (x.is_nan(), y.is_nan()) {
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            _ => y.total_cmp(&x).then_with(|| a.cmp(&b)),
        }
    });
    order.truncate(k);
    order
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let out = numerator as f64 / denominator as f64;
    out
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetMatrix {
        // u0 wants i0 and i2; u1 wants i1.
        TargetMatrix::new(vec![vec![0, 2], vec![1]], 3)
    }

    fn scores() -> ScoreMatrix {
        ScoreMatrix::new(2, 3, vec![0.9, 0.1, 0.8, 0.2, 0.7, 0.3])
    }

    #[test]
    fn item_rec_precision_at_two() {
        let metrics = evaluate_item_rec(&target(), &scores(), 2);
        // u0 picks i0, i2 (2 hits); u1 picks i1, i2 (1 hit).
        assert!((metrics["prec"] - 0.75).abs() < 1e-12);
        // u0 recall 2/2, u1 recall 1/1.
        assert!((metrics["recall"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn item_rec_exposure_perplexity_reflects_spread() {
        let metrics = evaluate_item_rec(&target(), &scores(), 2);
        // Exposure: i0 once, i1 once, i2 twice -> between 1 and 3.
        assert!(metrics["item_ppl"] > 1.0 && metrics["item_ppl"] < 3.0);
    }

    #[test]
    fn user_rec_precision_at_one() {
        let metrics = evaluate_user_rec(&target(), &scores(), 1);
        // i0 picks u0 (hit); i1 picks u1 (hit); i2 picks u0 (hit).
        assert!((metrics["prec"] - 1.0).abs() < 1e-12);
        assert!((metrics["recall"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn recall_skips_entities_without_targets() {
        let sparse = TargetMatrix::new(vec![vec![0], vec![]], 3);
        let metrics = evaluate_item_rec(&sparse, &scores(), 1);
        // Only u0 contributes recall; their top-1 is i0, a hit.
        assert!((metrics["recall"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn k_larger_than_catalogue_truncates() {
        let metrics = evaluate_item_rec(&target(), &scores(), 10);
        // Everything is recommended; precision = hits / k uses k = 10.
        assert!(metrics["prec"] > 0.0 && metrics["prec"] < 1.0);
    }
}
