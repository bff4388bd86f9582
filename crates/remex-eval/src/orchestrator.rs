//! Evaluation orchestration.
//!
//! # Overview
//!
//! [`Experiment`] drives one evaluation run: for every configured policy
//! it obtains a score matrix, records top-line metrics at the dataset's
//! default capacities, and — when multipliers were requested — executes
//! the constraint sweep in planned order. Results accumulate
//! monotonically in an [`ExperimentResult`]; a failing policy is
//! contained (logged and recorded) and never disturbs what earlier
//! policies produced.
//!
//! # Modes
//!
//! - `cvx = false` — rank-based sweeps: one global argsort per policy,
//!   reused across every configuration.
//! - `cvx = true` — relaxation sweeps: the raw score matrix goes to the
//!   matching collaborator per configuration, labeled
//!   `{policy}-{online}` so the collaborator can warm-start its duals
//!   per (policy, mode).
//! - `online = true` (requires `cvx` and a validation dataset): duals
//!   are fitted on the validation score matrix, reindexed to the
//!   validation users on the *same* in-test item index, while the
//!   allocation itself is decoded and scored on the live matrix over
//!   the evaluation users; top-line metrics always use the live matrix.
//!
//! All preconditions are checked in [`Experiment::new`], before any
//! policy executes.

use tracing::{error, info};

use remex_core::{Dataset, DatasetStats, ScoreMatrix};

use crate::matching::{DualCache, MatchMode, evaluate_mtch};
use crate::metrics::{evaluate_item_rec, evaluate_user_rec};
use crate::planner;
use crate::policy::{PolicySet, SharedArtifacts};
use crate::report::{ExperimentResult, SweepRecord};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Orchestrator configuration, resolved against a [`PolicySet`] at
/// construction time.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExperimentConfig {
    /// Policy names to run, in order.
    pub policies: Vec<String>,
    /// Sweep multipliers; empty disables the sweep.
    pub multipliers: Vec<f64>,
    /// Solve sweeps by convex relaxation instead of rank-based greedy.
    pub cvx: bool,
    /// Solve sweeps against the validation score matrix. Requires `cvx`.
    pub online: bool,
    /// Seed for stochastic policies in the standard registry; see
    /// [`Experiment::with_standard_policies`].
    pub seed: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            policies: ["Rand", "Pop", "Ema", "Hawkes", "Seq", "SeqPop"]
                .map(str::to_owned)
                .to_vec(),
            multipliers: Vec::new(),
            cvx: false,
            online: false,
            seed: 42,
        }
    }
}

impl ExperimentConfig {
    /// Check the configuration's internal consistency, independent of
    /// any dataset.
    ///
    /// # Errors
    ///
    /// Negative or NaN multipliers, or `online` without `cvx`.
    pub fn validate(&self) -> Result<(), PreconditionError> {
        for &value in &self.multipliers {
            if value.is_nan() || value < 0.0 {
                return Err(PreconditionError::InvalidMultiplier { value });
            }
        }
        if self.online && !self.cvx {
            return Err(PreconditionError::OnlineRequiresCvx);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PreconditionError
// ---------------------------------------------------------------------------

/// Fatal orchestrator-level violations, raised before any policy runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PreconditionError {
    #[error("online evaluation requires the convex-relaxation mode (cvx)")]
    OnlineRequiresCvx,

    #[error("online evaluation requires a validation dataset")]
    OnlineRequiresValidation,

    /// The validation dataset's in-test items differ from the
    /// evaluation dataset's; dimension parity is mandatory.
    #[error("validation in-test item index ({actual} items) does not match dataset ({expected})")]
    ItemIndexMismatch { expected: usize, actual: usize },

    #[error("policy {name:?} is not registered")]
    UnknownPolicy { name: String },

    #[error("sweep multipliers must be non-negative, got {value}")]
    InvalidMultiplier { value: f64 },
}

// ---------------------------------------------------------------------------
// Experiment
// ---------------------------------------------------------------------------

/// One evaluation run over a dataset (and optional validation dataset).
pub struct Experiment<'a> {
    dataset: &'a Dataset,
    validation: Option<&'a Dataset>,
    config: ExperimentConfig,
    policies: PolicySet,
    shared: SharedArtifacts,
    duals: DualCache,
    results: ExperimentResult,
}

impl<'a> Experiment<'a> {
    /// Validate preconditions and set up the run.
    ///
    /// # Errors
    ///
    /// Any [`PreconditionError`]: negative or NaN multipliers, online
    /// without `cvx` or without a validation dataset, a validation item
    /// index that differs from the evaluation dataset's, or a configured
    /// policy name missing from the registry.
    pub fn new(
        dataset: &'a Dataset,
        validation: Option<&'a Dataset>,
        config: ExperimentConfig,
        policies: PolicySet,
    ) -> Result<Self, PreconditionError> {
        config.validate()?;
        if config.online {
            let Some(validation) = validation else {
                return Err(PreconditionError::OnlineRequiresValidation);
            };
            if !validation
                .item_ids_in_test()
                .eq(dataset.item_ids_in_test())
            {
                return Err(PreconditionError::ItemIndexMismatch {
                    expected: dataset.items_in_test().len(),
                    actual: validation.items_in_test().len(),
                });
            }
        }
        for name in &config.policies {
            if policies.get(name).is_none() {
                return Err(PreconditionError::UnknownPolicy { name: name.clone() });
            }
        }

        let stats = DatasetStats::from_dataset(dataset);
        let results = ExperimentResult {
            cvx: config.cvx,
            online: config.online,
            default_k: dataset.default_item_rec_top_k,
            default_c: dataset.default_user_rec_top_c,
            max_k: dataset.items_in_test().len(),
            max_c: dataset.users_in_test().len(),
            item_ppl: stats.item_ppl,
            user_ppl: stats.user_ppl,
            item_rec: std::collections::BTreeMap::new(),
            user_rec: std::collections::BTreeMap::new(),
            mtch: std::collections::BTreeMap::new(),
            failures: std::collections::BTreeMap::new(),
        };
        Ok(Self {
            dataset,
            validation,
            config,
            policies,
            shared: SharedArtifacts::default(),
            duals: DualCache::default(),
            results,
        })
    }

    /// Set up a run over the built-in policy registry, seeded from the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`Experiment::new`].
    pub fn with_standard_policies(
        dataset: &'a Dataset,
        validation: Option<&'a Dataset>,
        config: ExperimentConfig,
    ) -> Result<Self, PreconditionError> {
        let policies = PolicySet::standard(config.seed);
        Self::new(dataset, validation, config, policies)
    }

    /// Run every configured policy in order. Per-policy failures are
    /// contained: logged, recorded under `failures`, and skipped past.
    pub fn run(&mut self) -> &ExperimentResult {
        let names = self.config.policies.clone();
        for name in names {
            info!(policy = %name, "running policy");
            if let Err(err) = self.run_policy(&name) {
                error!(policy = %name, "policy failed: {err:#}");
                self.results.failures.insert(name, format!("{err:#}"));
            }
        }
        &self.results
    }

    #[must_use]
    pub const fn results(&self) -> &ExperimentResult {
        &self.results
    }

    /// Consume the experiment, handing the report to its consumer.
    #[must_use]
    pub fn into_results(self) -> ExperimentResult {
        self.results
    }

    fn run_policy(&mut self, name: &str) -> anyhow::Result<()> {
        let Some(policy) = self.policies.get(name) else {
            // Resolved in `new`; a miss here is a registry mutation bug.
            anyhow::bail!("policy {name:?} vanished from the registry");
        };

        let frame = policy.transform(self.dataset, &self.shared)?;
        let score = self.dataset.project(&frame, None, f64::NAN)?;

        let valid: Option<ScoreMatrix> = if self.config.online {
            let validation = self
                .validation
                .ok_or_else(|| anyhow::anyhow!("validation dataset missing"))?;
            let valid_frame = policy.transform(validation, &self.shared)?;
            let valid_users: Vec<String> =
                validation.user_ids_in_test().map(str::to_owned).collect();
            // Validation rows on the shared item index; cells the policy
            // did not score are deliberately zero-padded.
            Some(self.dataset.project(&valid_frame, Some(&valid_users), 0.0)?)
        } else {
            None
        };

        let target = self.dataset.target_matrix();
        self.results.item_rec.insert(
            name.to_string(),
            evaluate_item_rec(target, &score, self.results.default_k),
        );
        self.results.user_rec.insert(
            name.to_string(),
            evaluate_user_rec(target, &score, self.results.default_c),
        );

        if self.config.multipliers.is_empty() {
            return Ok(());
        }

        let configs = planner::plan(
            &self.config.multipliers,
            self.results.default_k,
            self.results.default_c,
        );
        let mut rows = Vec::with_capacity(configs.len());
        if self.config.cvx {
            let solve_on = valid.as_ref().unwrap_or(&score);
            let label = format!("{name}-{}", self.config.online);
            for config in configs {
                let metrics = evaluate_mtch(
                    target,
                    config,
                    MatchMode::Relaxed {
                        solve_on,
                        decode_on: &score,
                        label: label.clone(),
                        cache: &mut self.duals,
                    },
                );
                rows.push(SweepRecord {
                    capacity_k: config.capacity_k,
                    capacity_c: config.capacity_c,
                    metrics,
                });
            }
        } else {
            // Ranking depends only on scores; compute once per policy.
            let argsort = score.argsort_desc();
            for config in configs {
                let metrics =
                    evaluate_mtch(target, config, MatchMode::Ranked { argsort: &argsort });
                rows.push(SweepRecord {
                    capacity_k: config.capacity_k,
                    capacity_c: config.capacity_c,
                    metrics,
                });
            }
        }
        self.results.mtch.insert(name.to_string(), rows);
        Ok(())
    }
}
