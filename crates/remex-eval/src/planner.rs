//! Constraint sweep planning.
//!
//! One multiplier list drives the whole relevance/diversity curve. Each
//! multiplier `m` maps to a capacity pair around the dataset defaults
//! `(base_k, base_c)`:
//!
//! - `m < 1` — a **lower-bound** config `(base_k, base_c * m)`: every
//!   item must receive at least `base_c * m` aggregate exposure while
//!   users still get up to `base_k` recommendations.
//! - `m >= 1` — an **upper-bound** config `(base_k * m, base_c)`: every
//!   user may receive up to `base_k * m` items while per-item exposure
//!   stays within `base_c`.
//!
//! The two regimes are structurally different constraints, so the kind
//! is carried as a tagged enum rather than re-derived downstream from
//! capacity magnitudes. Output order matches input order; duplicate
//! multipliers are kept — re-probing a point is the caller's call.

use serde::{Deserialize, Serialize};

/// Which side of the capacity pair is the binding constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Item minimum-exposure floor.
    LowerBound,
    /// User maximum-list-length cap.
    UpperBound,
}

/// One point on the sweep. Capacities are `f64` because fractional
/// multipliers produce fractional capacities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    pub capacity_k: f64,
    pub capacity_c: f64,
    pub kind: ConstraintKind,
}

/// Translate a multiplier list into the ordered sweep configurations.
///
/// Multipliers must be non-negative; the orchestrator validates this
/// before planning.
#[must_use]
pub fn plan(multipliers: &[f64], base_k: usize, base_c: usize) -> Vec<ConstraintConfig> {
    #[allow(clippy::cast_precision_loss)]
    let (base_k, base_c) = (base_k as f64, base_c as f64);
    multipliers
        .iter()
        .map(|&m| {
            if m < 1.0 {
                ConstraintConfig {
                    capacity_k: base_k,
                    capacity_c: base_c * m,
                    kind: ConstraintKind::LowerBound,
                }
            } else {
                ConstraintConfig {
                    capacity_k: base_k * m,
                    capacity_c: base_c,
                    kind: ConstraintKind::UpperBound,
                }
            }
        })
        .collect()
}
