#![forbid(unsafe_code)]
//! remex-core: temporal dataset construction for recommendation
//! evaluation.
//!
//! Builds a leakage-free train/test split from raw interaction tables,
//! derives per-entity history, exposes the holdout target matrix and the
//! score-matrix projection used by the evaluation layer.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums at the module seams
//!   ([`SchemaError`], [`ProjectionError`]); advisories are data, not
//!   errors.
//! - **Logging**: `tracing` macros (`warn!` for advisories, `debug!` for
//!   construction milestones).

pub mod dataset;
pub mod matrix;
pub mod schema;
pub mod stats;

pub use dataset::{Dataset, Event, ItemRecord, UserRecord};
pub use matrix::{ProjectionError, ScoreFrame, ScoreMatrix, TargetMatrix};
pub use schema::{Advisory, RawEvent, RawItem, RawUser, SchemaError};
pub use stats::{DatasetStats, perplexity};
