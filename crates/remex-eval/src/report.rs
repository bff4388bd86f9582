//! Experiment result accumulation, pivoting, and persistence.
//!
//! [`ExperimentResult`] is the structured report an orchestrator run
//! produces: top-line metrics per policy, the ordered sweep rows per
//! policy, and any contained per-policy failures. It accumulates
//! monotonically while the run proceeds and serializes to JSON.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// One evaluated sweep configuration, tagged with the capacities used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    pub capacity_k: f64,
    pub capacity_c: f64,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, f64>,
}

/// Structured report of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub cvx: bool,
    pub online: bool,
    /// Default per-user list length (1% of in-test items, min 1).
    pub default_k: usize,
    /// Default per-item exposure budget (1% of in-test users, min 1).
    pub default_c: usize,
    /// In-test item count: the ceiling for any `k`.
    pub max_k: usize,
    /// In-test user count: the ceiling for any `c`.
    pub max_c: usize,
    pub item_ppl: f64,
    pub user_ppl: f64,
    /// Policy name → item-recommendation metrics at `default_k`.
    pub item_rec: BTreeMap<String, BTreeMap<String, f64>>,
    /// Policy name → user-recommendation metrics at `default_c`.
    pub user_rec: BTreeMap<String, BTreeMap<String, f64>>,
    /// Policy name → sweep rows in planned order.
    pub mtch: BTreeMap<String, Vec<SweepRecord>>,
    /// Policy name → failure message for contained policy failures.
    pub failures: BTreeMap<String, String>,
}

impl ExperimentResult {
    /// Sweep rows at a fixed `capacity_k`, per policy, ordered by the
    /// free capacity `c`. Capacities stem from exact multiplier
    /// arithmetic, so exact comparison is intentional.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn sweep_at_k(&self, k: f64) -> BTreeMap<&str, Vec<&SweepRecord>> {
        self.pivot(|record| (record.capacity_k == k).then_some(record.capacity_c))
    }

    /// Sweep rows at a fixed `capacity_c`, per policy, ordered by the
    /// free capacity `k`.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn sweep_at_c(&self, c: f64) -> BTreeMap<&str, Vec<&SweepRecord>> {
        self.pivot(|record| (record.capacity_c == c).then_some(record.capacity_k))
    }

    fn pivot(
        &self,
        free_axis: impl Fn(&SweepRecord) -> Option<f64>,
    ) -> BTreeMap<&str, Vec<&SweepRecord>> {
        let mut out = BTreeMap::new();
        for (policy, rows) in &self.mtch {
            let mut selected: Vec<(f64, &SweepRecord)> = rows
                .iter()
                .filter_map(|record| free_axis(record).map(|axis| (axis, record)))
                .collect();
            selected.sort_by(|a, b| a.0.total_cmp(&b.0));
            if !selected.is_empty() {
                out.insert(
                    policy.as_str(),
                    selected.into_iter().map(|(_, record)| record).collect(),
                );
            }
        }
        out
    }

    /// Persist as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// I/O and serialization failures, with the path in context.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("creating result file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("serializing results to {}", path.display()))?;
        Ok(())
    }

    /// Load a previously saved report.
    ///
    /// # Errors
    ///
    /// I/O and deserialization failures, with the path in context.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening result file {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing results from {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(k: f64, c: f64, prec: f64) -> SweepRecord {
        let mut metrics = BTreeMap::new();
        metrics.insert("prec".to_string(), prec);
        SweepRecord {
            capacity_k: k,
            capacity_c: c,
            metrics,
        }
    }

    fn result_with_sweep() -> ExperimentResult {
        let mut mtch = BTreeMap::new();
        mtch.insert(
            "Pop".to_string(),
            vec![
                record(5.0, 0.0, 0.30),
                record(5.0, 2.5, 0.25),
                record(10.0, 5.0, 0.20),
            ],
        );
        ExperimentResult {
            cvx: false,
            online: false,
            default_k: 5,
            default_c: 5,
            max_k: 100,
            max_c: 200,
            item_ppl: 12.0,
            user_ppl: 34.0,
            item_rec: BTreeMap::new(),
            user_rec: BTreeMap::new(),
            mtch,
            failures: BTreeMap::new(),
        }
    }

    #[test]
    fn pivot_at_fixed_k_orders_by_c() {
        let result = result_with_sweep();
        let pivot = result.sweep_at_k(5.0);
        let rows = &pivot["Pop"];
        assert_eq!(rows.len(), 2);
        assert!(rows[0].capacity_c < rows[1].capacity_c);
    }

    #[test]
    fn pivot_at_fixed_c_selects_matching_rows() {
        let result = result_with_sweep();
        let pivot = result.sweep_at_c(5.0);
        assert_eq!(pivot["Pop"].len(), 1);
        assert!((pivot["Pop"][0].capacity_k - 10.0).abs() < 1e-12);
    }

    #[test]
    fn pivot_omits_policies_without_matches() {
        let result = result_with_sweep();
        assert!(result.sweep_at_k(99.0).is_empty());
    }

    #[test]
    fn json_round_trip_preserves_report() {
        let result = result_with_sweep();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("result.json");
        result.save(&path).expect("save");
        let loaded = ExperimentResult::load(&path).expect("load");
        assert_eq!(result, loaded);
    }

    #[test]
    fn sweep_record_serializes_metrics_flat() {
        let json = serde_json::to_value(record(5.0, 1.0, 0.5)).expect("json");
        assert!(json.get("prec").is_some(), "metrics flatten to the top level");
        assert!(json.get("capacity_k").is_some());
    }
}
