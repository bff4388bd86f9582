//! Raw input tables and pre-derivation validation.
//!
//! # Overview
//!
//! A dataset is loaded from three flat tables:
//!
//! - events: `(user, item, timestamp)` — a multiset, duplicates allowed
//! - users:  `(user, test_start_time)` — one test window per user
//! - items:  `(item)` — one row per item
//!
//! [`check_inputs`] enforces the referential invariants that must hold
//! *before* any derived column is computed: unique primary keys and no
//! dangling references from the event table. Violations are fatal
//! [`SchemaError`]s naming the offending row.
//!
//! Two further checks are advisory only (see [`Advisory`]): events not
//! grouped/ordered by `(user, time)` cost efficiency but not correctness,
//! and a high repeated `(user, item)` pair rate is usually a sign of an
//! upstream join bug worth flagging.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Repeat rate above which the duplicate-pair advisory fires.
///
/// Heuristic diagnostic; the exact threshold is not a contract.
pub const REPEAT_RATE_ADVISORY: f64 = 0.05;

// ---------------------------------------------------------------------------
// Raw table rows
// ---------------------------------------------------------------------------

/// One interaction event. Timestamps are abstract epochs (`f64`), not
/// calendar times; the only requirement is a consistent ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub user: String,
    pub item: String,
    pub timestamp: f64,
}

/// One user row. `test_start_time = +inf` marks a training-only user
/// that is never eligible for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUser {
    pub user: String,
    pub test_start_time: f64,
}

/// One item row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub item: String,
}

impl RawEvent {
    #[must_use]
    pub fn new(user: impl Into<String>, item: impl Into<String>, timestamp: f64) -> Self {
        Self {
            user: user.into(),
            item: item.into(),
            timestamp,
        }
    }
}

impl RawUser {
    #[must_use]
    pub fn new(user: impl Into<String>, test_start_time: f64) -> Self {
        Self {
            user: user.into(),
            test_start_time,
        }
    }
}

impl RawItem {
    #[must_use]
    pub fn new(item: impl Into<String>) -> Self {
        Self { item: item.into() }
    }
}

// ---------------------------------------------------------------------------
// SchemaError
// ---------------------------------------------------------------------------

/// Fatal pre-derivation violations. Construction aborts before any
/// derived field is computed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// The user table carries the same id twice (one test window per user).
    #[error("duplicate user id {0:?} in user table")]
    DuplicateUser(String),

    /// The item table carries the same id twice.
    #[error("duplicate item id {0:?} in item table")]
    DuplicateItem(String),

    /// An event references a user absent from the user table.
    #[error("event row {row} references unknown user {user:?}")]
    UnknownUser { row: usize, user: String },

    /// An event references an item absent from the item table.
    #[error("event row {row} references unknown item {item:?}")]
    UnknownItem { row: usize, item: String },

    /// A user's test start time is NaN, so no holdout boundary exists.
    #[error("user {user:?} has an undefined (NaN) test start time")]
    UndefinedTestStart { user: String },
}

// ---------------------------------------------------------------------------
// Advisory
// ---------------------------------------------------------------------------

/// Non-fatal diagnostics surfaced during construction. Logged via
/// `tracing::warn!` and collected on the dataset; never stop execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Advisory {
    /// Events are not grouped/ordered by `(user, time)`. Efficiency hint
    /// only; the construction is order-independent.
    UnsortedEvents,
    /// Repeated `(user, item)` pairs exceed [`REPEAT_RATE_ADVISORY`].
    RepeatedUserItemPairs { rate: f64 },
    /// An infinite horizon degrades sequence-model training.
    InfiniteHorizon,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsortedEvents => {
                write!(f, "events are not sorted by (user, time); construction is slower")
            }
            Self::RepeatedUserItemPairs { rate } => {
                write!(f, "repeated user-item pair rate {:.1}%", rate * 100.0)
            }
            Self::InfiniteHorizon => {
                write!(f, "infinite horizon: sequence models need a finite horizon to train well")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Resolved id spaces: insertion-ordered ids plus reverse lookup.
#[derive(Debug, Clone)]
pub struct IdIndex {
    ids: Vec<String>,
    positions: HashMap<String, u32>,
}

impl IdIndex {
    /// Build from unique ids, rejecting duplicates via `on_duplicate`.
    fn from_ids<I>(ids: I, on_duplicate: impl Fn(String) -> SchemaError) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut out = Self {
            ids: Vec::new(),
            positions: HashMap::new(),
        };
        for id in ids {
            // Table sizes are bounded well below u32::MAX in practice.
            #[allow(clippy::cast_possible_truncation)]
            let next = out.ids.len() as u32;
            if out.positions.insert(id.clone(), next).is_some() {
                return Err(on_duplicate(id));
            }
            out.ids.push(id);
        }
        Ok(out)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<u32> {
        self.positions.get(id).copied()
    }

    #[must_use]
    pub fn id(&self, pos: u32) -> &str {
        &self.ids[pos as usize]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

/// Outcome of [`check_inputs`]: resolved id spaces, index-resolved events,
/// and any advisories raised along the way.
#[derive(Debug)]
pub struct CheckedInputs {
    pub user_index: IdIndex,
    pub item_index: IdIndex,
    /// `(user_pos, item_pos, timestamp)` in input order.
    pub events: Vec<(u32, u32, f64)>,
    pub advisories: Vec<Advisory>,
}

/// Validate the three raw tables and resolve ids to table positions.
///
/// # Errors
///
/// Fails fast with the first [`SchemaError`] found; advisory checks run
/// only once the fatal checks pass.
pub fn check_inputs(
    events: &[RawEvent],
    users: &[RawUser],
    items: &[RawItem],
) -> Result<CheckedInputs, SchemaError> {
    let user_index = IdIndex::from_ids(
        users.iter().map(|u| u.user.clone()),
        SchemaError::DuplicateUser,
    )?;
    let item_index = IdIndex::from_ids(
        items.iter().map(|i| i.item.clone()),
        SchemaError::DuplicateItem,
    )?;

    for user in users {
        if user.test_start_time.is_nan() {
            return Err(SchemaError::UndefinedTestStart {
                user: user.user.clone(),
            });
        }
    }

    let mut resolved = Vec::with_capacity(events.len());
    for (row, event) in events.iter().enumerate() {
        let user = user_index
            .get(&event.user)
            .ok_or_else(|| SchemaError::UnknownUser {
                row,
                user: event.user.clone(),
            })?;
        let item = item_index
            .get(&event.item)
            .ok_or_else(|| SchemaError::UnknownItem {
                row,
                item: event.item.clone(),
            })?;
        resolved.push((user, item, event.timestamp));
    }

    let mut advisories = Vec::new();
    if !is_grouped_by_user_time(events) {
        warn!("{}", Advisory::UnsortedEvents);
        advisories.push(Advisory::UnsortedEvents);
    }
    if let Some(rate) = elevated_repeat_rate(&resolved) {
        let advisory = Advisory::RepeatedUserItemPairs { rate };
        warn!("{advisory}");
        advisories.push(advisory);
    }

    Ok(CheckedInputs {
        user_index,
        item_index,
        events: resolved,
        advisories,
    })
}

/// Necessary condition for `(user, time)` grouping: every consecutive
/// pair advances in at least one of the two keys.
fn is_grouped_by_user_time(events: &[RawEvent]) -> bool {
    events
        .windows(2)
        .all(|w| w[1].user >= w[0].user || w[1].timestamp >= w[0].timestamp)
}

/// Repeat rate `len / unique - 1` when it exceeds the advisory threshold.
fn elevated_repeat_rate(events: &[(u32, u32, f64)]) -> Option<f64> {
    if events.is_empty() {
        return None;
    }
    let unique: HashSet<(u32, u32)> = events.iter().map(|&(u, i, _)| (u, i)).collect();
    #[allow(clippy::cast_precision_loss)]
    let rate = events.len() as f64 / unique.len() as f64 - 1.0;
    (rate > REPEAT_RATE_ADVISORY).then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> (Vec<RawEvent>, Vec<RawUser>, Vec<RawItem>) {
        (
            vec![
                RawEvent::new("u1", "i1", 0.0),
                RawEvent::new("u1", "i2", 5.0),
                RawEvent::new("u2", "i1", 3.0),
            ],
            vec![RawUser::new("u1", 10.0), RawUser::new("u2", 20.0)],
            vec![RawItem::new("i1"), RawItem::new("i2")],
        )
    }

    #[test]
    fn accepts_consistent_tables() {
        let (events, users, items) = tables();
        let checked = check_inputs(&events, &users, &items).expect("valid inputs");
        assert_eq!(checked.events.len(), 3);
        assert_eq!(checked.user_index.len(), 2);
        assert!(checked.advisories.is_empty());
    }

    #[test]
    fn rejects_duplicate_user() {
        let (events, mut users, items) = tables();
        users.push(RawUser::new("u1", 99.0));
        let err = check_inputs(&events, &users, &items).expect_err("duplicate");
        assert_eq!(err, SchemaError::DuplicateUser("u1".into()));
    }

    #[test]
    fn rejects_duplicate_item() {
        let (events, users, mut items) = tables();
        items.push(RawItem::new("i2"));
        let err = check_inputs(&events, &users, &items).expect_err("duplicate");
        assert_eq!(err, SchemaError::DuplicateItem("i2".into()));
    }

    #[test]
    fn rejects_dangling_user_reference() {
        let (mut events, users, items) = tables();
        events.push(RawEvent::new("ghost", "i1", 1.0));
        let err = check_inputs(&events, &users, &items).expect_err("dangling");
        assert_eq!(
            err,
            SchemaError::UnknownUser {
                row: 3,
                user: "ghost".into()
            }
        );
    }

    #[test]
    fn rejects_dangling_item_reference() {
        let (mut events, users, items) = tables();
        events.push(RawEvent::new("u2", "ghost", 1.0));
        assert!(matches!(
            check_inputs(&events, &users, &items),
            Err(SchemaError::UnknownItem { row: 3, .. })
        ));
    }

    #[test]
    fn rejects_nan_test_start() {
        let (events, mut users, items) = tables();
        users[1].test_start_time = f64::NAN;
        assert!(matches!(
            check_inputs(&events, &users, &items),
            Err(SchemaError::UndefinedTestStart { .. })
        ));
    }

    #[test]
    fn flags_unsorted_events() {
        let (mut events, users, items) = tables();
        // u2 then back to u1 with an earlier timestamp: neither key advances.
        events.push(RawEvent::new("u1", "i1", 1.0));
        let checked = check_inputs(&events, &users, &items).expect("valid inputs");
        assert!(checked.advisories.contains(&Advisory::UnsortedEvents));
    }

    #[test]
    fn flags_elevated_repeat_rate() {
        let users = vec![RawUser::new("u1", 10.0)];
        let items = vec![RawItem::new("i1")];
        let events = vec![
            RawEvent::new("u1", "i1", 0.0),
            RawEvent::new("u1", "i1", 1.0),
            RawEvent::new("u1", "i1", 2.0),
        ];
        let checked = check_inputs(&events, &users, &items).expect("valid inputs");
        assert!(checked
            .advisories
            .iter()
            .any(|a| matches!(a, Advisory::RepeatedUserItemPairs { rate } if *rate > 1.0)));
    }

    #[test]
    fn sorted_events_raise_no_order_advisory() {
        let (events, users, items) = tables();
        let checked = check_inputs(&events, &users, &items).expect("valid inputs");
        assert!(!checked.advisories.contains(&Advisory::UnsortedEvents));
    }
}
