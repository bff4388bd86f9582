//! Capacity-constrained matching between users and items.
//!
//! # Overview
//!
//! [`evaluate_mtch`] assigns recommendation slots under one
//! [`ConstraintConfig`] and reports precision/recall plus exposure
//! perplexities of the resulting allocation. Two solution modes:
//!
//! - **Ranked** — greedy best-score-first assignment over a precomputed
//!   global descending argsort. The argsort depends only on the score
//!   matrix, so the orchestrator computes it once per policy and reuses
//!   it for every configuration in a sweep.
//! - **Relaxed** — per-item dual potentials fitted by iterative
//!   adjustment against the capacity target on a raw score matrix (the
//!   validation matrix when online), then decoded greedily on the
//!   potential-reshaped *live* matrix. Fitting and decoding matrices
//!   may cover different user sets; only their item axes must agree,
//!   since the potentials are per item. Dual vectors are warm-started
//!   across a sweep via a [`DualCache`] keyed by the caller's
//!   `{policy}-{online}` label.
//!
//! Constraint regimes (see [`crate::planner`]):
//!
//! - upper bound: users take at most `k` items, items appear in at most
//!   `c` lists (caps are floored — never exceeded).
//! - lower bound: a floor-filling phase guarantees each item at least
//!   `ceil(c)` exposures where ranked pairs allow, then remaining user
//!   slots fill freely up to `k`.

use std::collections::HashMap;

use tracing::debug;

use remex_core::{ScoreMatrix, TargetMatrix, perplexity};

use crate::planner::{ConstraintConfig, ConstraintKind};

/// Dual-iteration count for the relaxation mode.
const DUAL_ROUNDS: usize = 40;
/// Dual-ascent step size.
const DUAL_STEP: f64 = 0.05;

/// Warm-start store for relaxation duals, keyed by caller label.
#[derive(Debug, Default)]
pub struct DualCache {
    item_potentials: HashMap<String, Vec<f64>>,
}

/// Mode-specific inputs to [`evaluate_mtch`].
pub enum MatchMode<'a> {
    /// Precomputed global descending ranking of the score matrix.
    Ranked { argsort: &'a [(u32, u32)] },
    /// Raw matrix the relaxation fits duals against (validation matrix
    /// when online), the live matrix the allocation is decoded on, and
    /// a label for warm-start caching. `decode_on` rows must line up
    /// with the target matrix rows.
    Relaxed {
        solve_on: &'a ScoreMatrix,
        decode_on: &'a ScoreMatrix,
        label: String,
        cache: &'a mut DualCache,
    },
}

/// Solve one constraint configuration and score the allocation against
/// the target matrix. Returns `prec`, `recall`, `item_ppl`, `user_ppl`
/// plus allocation size under `n_rec`.
#[must_use]
pub fn evaluate_mtch(
    target: &TargetMatrix,
    config: ConstraintConfig,
    mode: MatchMode<'_>,
) -> std::collections::BTreeMap<String, f64> {
    let allocation = match mode {
        MatchMode::Ranked { argsort } => {
            greedy_assign(argsort, target.n_rows(), target.n_cols(), config)
        }
        MatchMode::Relaxed {
            solve_on,
            decode_on,
            label,
            cache,
        } => relaxed_assign(solve_on, decode_on, config, &label, cache),
    };
    score_allocation(target, &allocation)
}

// ---------------------------------------------------------------------------
// Greedy rank-based assignment
// ---------------------------------------------------------------------------

/// One user's assigned item columns.
type Allocation = Vec<Vec<u32>>;

fn greedy_assign(
    argsort: &[(u32, u32)],
    n_rows: usize,
    n_cols: usize,
    config: ConstraintConfig,
) -> Allocation {
    // A user never receives more than floor(k) items in either regime.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let user_cap = config.capacity_k.max(0.0).floor() as usize;
    let mut assigned: Allocation = vec![Vec::new(); n_rows];
    let mut item_load = vec![0usize; n_cols];

    match config.kind {
        ConstraintKind::UpperBound => {
            // Item exposure caps are floored: a cap is never exceeded.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let item_cap = config.capacity_c.max(0.0).floor() as usize;
            for &(row, col) in argsort {
                let (row_ix, col_ix) = (row as usize, col as usize);
                if assigned[row_ix].len() < user_cap && item_load[col_ix] < item_cap {
                    assigned[row_ix].push(col);
                    item_load[col_ix] += 1;
                }
            }
        }
        ConstraintKind::LowerBound => {
            // Floors are ceiled: "at least c" must be met, not undercut.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let item_floor = config.capacity_c.max(0.0).ceil() as usize;
            // Phase 1: route ranked pairs toward underexposed items.
            for &(row, col) in argsort {
                let (row_ix, col_ix) = (row as usize, col as usize);
                if assigned[row_ix].len() < user_cap && item_load[col_ix] < item_floor {
                    assigned[row_ix].push(col);
                    item_load[col_ix] += 1;
                }
            }
            // Phase 2: fill remaining user slots by rank, floors met.
            for &(row, col) in argsort {
                let (row_ix, col_ix) = (row as usize, col as usize);
                if assigned[row_ix].len() < user_cap && !assigned[row_ix].contains(&col) {
                    assigned[row_ix].push(col);
                    item_load[col_ix] += 1;
                }
            }
        }
    }
    assigned
}

// ---------------------------------------------------------------------------
// Relaxation mode
// ---------------------------------------------------------------------------

/// Fit per-item potentials on `solve_on` so that expected exposure under
/// a smoothed top-`k` assignment tracks the capacity target, then decode
/// greedily on the potential-reshaped `decode_on`. Deterministic; the
/// numerical scheme is not part of the external contract.
fn relaxed_assign(
    solve_on: &ScoreMatrix,
    decode_on: &ScoreMatrix,
    config: ConstraintConfig,
    label: &str,
    cache: &mut DualCache,
) -> Allocation {
    debug_assert_eq!(solve_on.n_cols(), decode_on.n_cols());
    let n_cols = solve_on.n_cols();
    let mut potentials = cache
        .item_potentials
        .get(label)
        .cloned()
        .unwrap_or_else(|| vec![0.0; n_cols]);
    if potentials.len() != n_cols {
        potentials = vec![0.0; n_cols];
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let user_cap = config.capacity_k.max(0.0).floor() as usize;
    for round in 0..DUAL_ROUNDS {
        // Expected exposure: count each item's appearances in per-user
        // top-k lists of the adjusted scores.
        let mut exposure = vec![0.0f64; n_cols];
        for row in 0..solve_on.n_rows() {
            for col in top_k_adjusted(solve_on.row(row), &potentials, user_cap) {
                exposure[col as usize] += 1.0;
            }
        }
        let mut shift = 0.0f64;
        for (col, load) in exposure.iter().enumerate() {
            let excess = load - config.capacity_c;
            let delta = match config.kind {
                // Penalize overexposed items only.
                ConstraintKind::UpperBound => (DUAL_STEP * excess).max(-potentials[col]),
                // Subsidize underexposed items only.
                ConstraintKind::LowerBound => (DUAL_STEP * excess).min(-potentials[col]),
            };
            potentials[col] += delta;
            shift += delta.abs();
        }
        if shift < 1e-9 {
            debug!(round, label, "duals converged early");
            break;
        }
    }
    cache
        .item_potentials
        .insert(label.to_string(), potentials.clone());

    // Decode: greedy on the potential-reshaped live ranking.
    let adjusted = adjusted_matrix(decode_on, &potentials);
    greedy_assign(
        &adjusted.argsort_desc(),
        decode_on.n_rows(),
        decode_on.n_cols(),
        config,
    )
}

fn adjusted_matrix(scores: &ScoreMatrix, potentials: &[f64]) -> ScoreMatrix {
    let mut values = Vec::with_capacity(scores.n_rows() * scores.n_cols());
    for row in 0..scores.n_rows() {
        for (col, &value) in scores.row(row).iter().enumerate() {
            values.push(value - potentials[col]);
        }
    }
    ScoreMatrix::new(scores.n_rows(), scores.n_cols(), values)
}

/// Columns of the `k` largest `scores[col] - potentials[col]`.
fn top_k_adjusted(scores: &[f64], potentials: &[f64], k: usize) -> Vec<u32> {
    #[allow(clippy::cast_possible_truncation)]
    let mut order: Vec<u32> = (0..scores.len() as u32).collect();
    order.sort_by(|&a, &b| {
        let x = scores[a as usize] - potentials[a as usize];
        let y = scores[b as usize] - potentials[b as usize];
        y.total_cmp(&x).then_with(|| a.cmp(&b))
    });
    order.truncate(k);
    order
}

// ---------------------------------------------------------------------------
// Allocation scoring
// ---------------------------------------------------------------------------

fn score_allocation(
    target: &TargetMatrix,
    allocation: &Allocation,
) -> std::collections::BTreeMap<String, f64> {
    let mut hits = 0usize;
    let mut recommended = 0usize;
    let mut item_exposure = vec![0.0f64; target.n_cols()];
    let mut user_load = Vec::with_capacity(allocation.len());
    for (row, items) in allocation.iter().enumerate() {
        recommended += items.len();
        #[allow(clippy::cast_precision_loss)]
        user_load.push(items.len() as f64);
        for &col in items {
            item_exposure[col as usize] += 1.0;
            if target.contains(row, col) {
                hits += 1;
            }
        }
    }

    let mut out = std::collections::BTreeMap::new();
    out.insert("prec".to_string(), ratio(hits, recommended));
    out.insert("recall".to_string(), ratio(hits, target.nnz()));
    out.insert("item_ppl".to_string(), perplexity(&item_exposure));
    out.insert("user_ppl".to_string(), perplexity(&user_load));
    #[allow(clippy::cast_precision_loss)]
    out.insert("n_rec".to_string(), recommended as f64);
    out
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let out = numerator as f64 / denominator as f64;
    out
}
