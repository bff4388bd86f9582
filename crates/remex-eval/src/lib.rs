#![forbid(unsafe_code)]
//! remex-eval: constraint sweep planning, scoring policies, and
//! evaluation orchestration.
//!
//! Sits on top of `remex-core`: takes a constructed [`remex_core::Dataset`],
//! runs each configured policy, and reports relevance/diversity trade-off
//! points across a family of capacity constraints.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums for preconditions; `anyhow`
//!   through the policy seam where failures are contained per policy.
//! - **Logging**: `tracing` macros; one `info!` per policy run, `error!`
//!   on contained failures.

pub mod matching;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod policy;
pub mod report;

pub use matching::{DualCache, MatchMode, evaluate_mtch};
pub use metrics::{evaluate_item_rec, evaluate_user_rec};
pub use orchestrator::{Experiment, ExperimentConfig, PreconditionError};
pub use planner::{ConstraintConfig, ConstraintKind, plan};
pub use policy::{Policy, PolicySet, SequenceModel, SharedArtifacts};
pub use report::{ExperimentResult, SweepRecord};
