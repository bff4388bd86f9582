//! Score and target matrices.
//!
//! # Overview
//!
//! Three matrix shapes move through an evaluation run:
//!
//! - [`ScoreFrame`] — a policy's raw output: a dense real matrix labeled
//!   with the user/item id orderings the policy scored. Policies may
//!   score a superset of the evaluation index.
//! - [`ScoreMatrix`] — a frame projected onto a canonical evaluation
//!   index (in-test users × in-test items), produced by
//!   `Dataset::project`. Unlabeled; rows/columns follow the dataset's
//!   in-test orderings.
//! - [`TargetMatrix`] — sparse boolean ground truth: one row per in-test
//!   user, sorted in-test item columns with a holdout event.
//!
//! Projection is loud by default: a cell that would be filled with a NaN
//! sentinel is a [`ProjectionError`], because a NaN that reaches a
//! precision computation downstream corrupts the result silently.

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// ProjectionError
// ---------------------------------------------------------------------------

/// Reindexing failed to resolve required cells.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    /// `missing` cells had no score and the fill sentinel is NaN; the
    /// first offending pair is named for diagnosis.
    #[error("{missing} required cells have no score (first: user {user:?}, item {item:?})")]
    MissingScores {
        user: String,
        item: String,
        missing: usize,
    },
}

// ---------------------------------------------------------------------------
// ScoreFrame
// ---------------------------------------------------------------------------

/// Labeled dense score matrix as produced by a policy, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreFrame {
    users: Vec<String>,
    items: Vec<String>,
    values: Vec<f64>,
}

impl ScoreFrame {
    /// Build from labels and row-major values.
    ///
    /// # Panics
    ///
    /// Panics if `values.len() != users.len() * items.len()`; a policy
    /// emitting a ragged frame is a programming error, not input data.
    #[must_use]
    pub fn new(users: Vec<String>, items: Vec<String>, values: Vec<f64>) -> Self {
        assert_eq!(
            values.len(),
            users.len() * items.len(),
            "score frame shape mismatch"
        );
        Self {
            users,
            items,
            values,
        }
    }

    #[must_use]
    pub fn users(&self) -> &[String] {
        &self.users
    }

    #[must_use]
    pub fn items(&self) -> &[String] {
        &self.items
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.items.len() + col]
    }

    /// Cell-wise product with an identically-labeled frame. Composite
    /// policies (`SeqPop` etc.) combine factor scores this way.
    ///
    /// # Errors
    ///
    /// Fails when the frames' user or item labels differ; silently
    /// multiplying misaligned cells would be a data bug, not a score.
    pub fn hadamard(&self, other: &Self) -> anyhow::Result<Self> {
        anyhow::ensure!(
            self.users == other.users && self.items == other.items,
            "hadamard product requires identical frame labels"
        );
        let values = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| a * b)
            .collect();
        Ok(Self {
            users: self.users.clone(),
            items: self.items.clone(),
            values,
        })
    }

    /// Row/column lookup maps for projection.
    #[must_use]
    pub(crate) fn indices(&self) -> (HashMap<&str, usize>, HashMap<&str, usize>) {
        let rows = self
            .users
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.as_str(), pos))
            .collect();
        let cols = self
            .items
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.as_str(), pos))
            .collect();
        (rows, cols)
    }
}

// ---------------------------------------------------------------------------
// ScoreMatrix
// ---------------------------------------------------------------------------

/// Dense score matrix aligned to a canonical evaluation index.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix {
    n_rows: usize,
    n_cols: usize,
    values: Vec<f64>,
}

impl ScoreMatrix {
    /// # Panics
    ///
    /// Panics if `values.len() != n_rows * n_cols`.
    #[must_use]
    pub fn new(n_rows: usize, n_cols: usize, values: Vec<f64>) -> Self {
        assert_eq!(values.len(), n_rows * n_cols, "score matrix shape mismatch");
        Self {
            n_rows,
            n_cols,
            values,
        }
    }

    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[must_use]
    pub const fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.n_cols + col]
    }

    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.n_cols..(row + 1) * self.n_cols]
    }

    /// Global descending argsort of all cells.
    ///
    /// The ranking depends only on the scores, never on capacities, so
    /// rank-based sweeps compute it once and reuse it per configuration.
    /// Ties break by (row, col) for determinism; NaN sorts last.
    #[must_use]
    pub fn argsort_desc(&self) -> Vec<(u32, u32)> {
        #[allow(clippy::cast_possible_truncation)]
        let n_flat = self.values.len() as u32;
        let mut order: Vec<u32> = (0..n_flat).collect();
        order.sort_by(|&a, &b| {
            let (x, y) = (self.values[a as usize], self.values[b as usize]);
            match (x.is_nan(), y.is_nan()) {
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                _ => y.total_cmp(&x).then_with(|| a.cmp(&b)),
            }
        });
        #[allow(clippy::cast_possible_truncation)]
        let n_cols = self.n_cols as u32;
        order
            .into_iter()
            .map(|flat| (flat / n_cols, flat % n_cols))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TargetMatrix
// ---------------------------------------------------------------------------

/// Sparse boolean holdout matrix over the in-test index.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetMatrix {
    /// Sorted, deduplicated in-test item positions per in-test user row.
    rows: Vec<Vec<u32>>,
    n_cols: usize,
}

impl TargetMatrix {
    #[must_use]
    pub fn new(mut rows: Vec<Vec<u32>>, n_cols: usize) -> Self {
        for row in &mut rows {
            row.sort_unstable();
            row.dedup();
        }
        Self { rows, n_cols }
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub const fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Sorted in-test item positions with a holdout event for this row.
    #[must_use]
    pub fn row(&self, row: usize) -> &[u32] {
        &self.rows[row]
    }

    #[must_use]
    pub fn contains(&self, row: usize, col: u32) -> bool {
        self.rows[row].binary_search(&col).is_ok()
    }

    /// Total number of positive cells.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }
}
