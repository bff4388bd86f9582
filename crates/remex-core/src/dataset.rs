//! Temporal train/test dataset construction.
//!
//! # Overview
//!
//! [`Dataset::construct`] turns three raw tables into a leakage-free
//! evaluation dataset:
//!
//! 1. Schema validation (fatal) and order/repeat advisories, see
//!    [`crate::schema`].
//! 2. Holdout marking: an event is holdout iff its timestamp is at or
//!    past its user's test start time.
//! 3. Trimming: events at or past `test_start + horizon` are dropped
//!    entirely, not merely flagged.
//! 4. Per-user chronological training history (`hist_items`,
//!    `hist_timestamps` — the latter always terminated by the user's
//!    test start time), per-item training event counts.
//! 5. In-test flags: users need `hist_len >= min_user_len` and a finite
//!    test start; items need `hist_len >= min_item_len`.
//! 6. Default evaluation capacities: 1% of the in-test population,
//!    rounded up, floored at 1.
//!
//! The dataset is read-only after construction; the target matrix is
//! memoized on first access and shared read-only for the dataset's
//! lifetime, so its dimensions can never drift from the in-test sets it
//! was built against.

use std::cell::OnceCell;
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::matrix::{ProjectionError, ScoreFrame, ScoreMatrix, TargetMatrix};
use crate::schema::{Advisory, CheckedInputs, RawEvent, RawItem, RawUser, SchemaError, check_inputs};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A retained interaction event, ids resolved to table positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub user: u32,
    pub item: u32,
    pub timestamp: f64,
    /// True iff the event falls in its user's holdout window.
    pub is_holdout: bool,
}

/// A user with derived training history.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub test_start_time: f64,
    /// Item positions of the user's non-holdout events, chronological.
    pub hist_items: Vec<u32>,
    /// Timestamps of `hist_items` plus a final entry equal to
    /// `test_start_time`; always `hist_items.len() + 1` long.
    pub hist_timestamps: Vec<f64>,
    pub hist_len: usize,
    /// `hist_timestamps.last() - hist_timestamps.first()`, or `0.0`
    /// when the history is empty.
    pub hist_span: f64,
    pub in_test: bool,
}

/// An item with derived training statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    /// Number of training-window events referencing the item.
    pub hist_len: u64,
    pub in_test: bool,
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Validated, derived, read-only evaluation dataset.
#[derive(Debug)]
pub struct Dataset {
    users: Vec<UserRecord>,
    items: Vec<ItemRecord>,
    events: Vec<Event>,
    user_ids: Vec<String>,
    item_ids: Vec<String>,
    /// Table positions of in-test users/items, in table order.
    users_in_test: Vec<u32>,
    items_in_test: Vec<u32>,
    pub horizon: f64,
    pub default_item_rec_top_k: usize,
    pub default_user_rec_top_c: usize,
    advisories: Vec<Advisory>,
    target: OnceCell<TargetMatrix>,
}

impl Dataset {
    /// Construct a dataset from raw tables. See the module docs for the
    /// pipeline.
    ///
    /// # Errors
    ///
    /// Fails with [`SchemaError`] before any derivation when ids repeat
    /// within a table, events reference unknown ids, or a user row has
    /// no test start time.
    pub fn construct(
        events: &[RawEvent],
        users: &[RawUser],
        items: &[RawItem],
        horizon: f64,
        min_user_len: usize,
        min_item_len: usize,
    ) -> Result<Self, SchemaError> {
        let CheckedInputs {
            user_index,
            item_index,
            events: resolved,
            mut advisories,
        } = check_inputs(events, users, items)?;

        if horizon.is_infinite() {
            warn!("{}", Advisory::InfiniteHorizon);
            advisories.push(Advisory::InfiniteHorizon);
        }

        // Holdout marking and trimming in one pass.
        let mut retained = Vec::with_capacity(resolved.len());
        for (user, item, timestamp) in resolved {
            let test_start = users[user as usize].test_start_time;
            if timestamp >= test_start + horizon {
                continue;
            }
            retained.push(Event {
                user,
                item,
                timestamp,
                is_holdout: timestamp >= test_start,
            });
        }
        debug!(
            retained = retained.len(),
            dropped = events.len() - retained.len(),
            "holdout marked, post-horizon events trimmed"
        );

        // Per-user training history, chronological.
        let mut histories: Vec<Vec<(f64, u32)>> = vec![Vec::new(); users.len()];
        for event in retained.iter().filter(|e| !e.is_holdout) {
            histories[event.user as usize].push((event.timestamp, event.item));
        }

        let mut item_records: Vec<ItemRecord> = items
            .iter()
            .map(|_| ItemRecord {
                hist_len: 0,
                in_test: false,
            })
            .collect();
        for event in retained.iter().filter(|e| !e.is_holdout) {
            item_records[event.item as usize].hist_len += 1;
        }

        let user_records: Vec<UserRecord> = users
            .iter()
            .zip(histories)
            .map(|(raw, mut history)| {
                history.sort_by(|a, b| a.0.total_cmp(&b.0));
                let hist_items: Vec<u32> = history.iter().map(|&(_, item)| item).collect();
                let mut hist_timestamps: Vec<f64> =
                    history.iter().map(|&(ts, _)| ts).collect();
                hist_timestamps.push(raw.test_start_time);
                // An empty history has no extent; inf - inf on the
                // terminator alone would otherwise yield NaN.
                let hist_span = if history.is_empty() {
                    0.0
                } else {
                    hist_timestamps[hist_timestamps.len() - 1] - hist_timestamps[0]
                };
                let hist_len = hist_items.len();
                UserRecord {
                    test_start_time: raw.test_start_time,
                    hist_items,
                    hist_timestamps,
                    hist_len,
                    hist_span,
                    in_test: hist_len >= min_user_len && raw.test_start_time < f64::INFINITY,
                }
            })
            .collect();

        for record in &mut item_records {
            record.in_test = record.hist_len >= min_item_len as u64;
        }

        #[allow(clippy::cast_possible_truncation)]
        let users_in_test: Vec<u32> = user_records
            .iter()
            .enumerate()
            .filter(|(_, u)| u.in_test)
            .map(|(pos, _)| pos as u32)
            .collect();
        #[allow(clippy::cast_possible_truncation)]
        let items_in_test: Vec<u32> = item_records
            .iter()
            .enumerate()
            .filter(|(_, i)| i.in_test)
            .map(|(pos, _)| pos as u32)
            .collect();

        let dataset = Self {
            default_item_rec_top_k: default_top(items_in_test.len()),
            default_user_rec_top_c: default_top(users_in_test.len()),
            users: user_records,
            items: item_records,
            events: retained,
            user_ids: user_index.ids().to_vec(),
            item_ids: item_index.ids().to_vec(),
            users_in_test,
            items_in_test,
            horizon,
            advisories,
            target: OnceCell::new(),
        };
        debug!(
            warm_users = dataset.users_in_test.len(),
            warm_items = dataset.items_in_test.len(),
            default_k = dataset.default_item_rec_top_k,
            default_c = dataset.default_user_rec_top_c,
            "dataset constructed"
        );
        Ok(dataset)
    }

    #[must_use]
    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    #[must_use]
    pub fn items(&self) -> &[ItemRecord] {
        &self.items
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[must_use]
    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    #[must_use]
    pub fn item_ids(&self) -> &[String] {
        &self.item_ids
    }

    /// Record for a user id, if present.
    #[must_use]
    pub fn user(&self, id: &str) -> Option<&UserRecord> {
        self.user_ids
            .iter()
            .position(|candidate| candidate == id)
            .map(|pos| &self.users[pos])
    }

    /// Record for an item id, if present.
    #[must_use]
    pub fn item(&self, id: &str) -> Option<&ItemRecord> {
        self.item_ids
            .iter()
            .position(|candidate| candidate == id)
            .map(|pos| &self.items[pos])
    }

    /// Table positions of in-test users, in table order.
    #[must_use]
    pub fn users_in_test(&self) -> &[u32] {
        &self.users_in_test
    }

    /// Table positions of in-test items, in table order.
    #[must_use]
    pub fn items_in_test(&self) -> &[u32] {
        &self.items_in_test
    }

    /// Ids of in-test users, in table order.
    pub fn user_ids_in_test(&self) -> impl Iterator<Item = &str> {
        self.users_in_test
            .iter()
            .map(|&pos| self.user_ids[pos as usize].as_str())
    }

    /// Ids of in-test items, in table order.
    pub fn item_ids_in_test(&self) -> impl Iterator<Item = &str> {
        self.items_in_test
            .iter()
            .map(|&pos| self.item_ids[pos as usize].as_str())
    }

    /// Diagnostics raised during construction. Never fatal.
    #[must_use]
    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    /// The holdout target matrix over the in-test index, built on first
    /// access and shared read-only thereafter. Its dimensions cannot
    /// drift because the in-test sets are frozen at construction.
    pub fn target_matrix(&self) -> &TargetMatrix {
        self.target.get_or_init(|| self.build_target_matrix())
    }

    fn build_target_matrix(&self) -> TargetMatrix {
        let user_rows: HashMap<u32, usize> = self
            .users_in_test
            .iter()
            .enumerate()
            .map(|(row, &pos)| (pos, row))
            .collect();
        let item_cols: HashMap<u32, u32> = self
            .items_in_test
            .iter()
            .enumerate()
            .map(|(col, &pos)| {
                #[allow(clippy::cast_possible_truncation)]
                let col = col as u32;
                (pos, col)
            })
            .collect();

        let mut rows = vec![Vec::new(); self.users_in_test.len()];
        for event in self.events.iter().filter(|e| e.is_holdout) {
            if let (Some(&row), Some(&col)) =
                (user_rows.get(&event.user), item_cols.get(&event.item))
            {
                rows[row].push(col);
            }
        }
        TargetMatrix::new(rows, self.items_in_test.len())
    }

    /// Reindex a policy's [`ScoreFrame`] onto the canonical evaluation
    /// index: rows are `user_subset` (or the in-test users), columns are
    /// the in-test items.
    ///
    /// A required cell the frame does not cover takes `fill`. When `fill`
    /// is NaN — the default posture — missing cells are a fatal
    /// [`ProjectionError`] rather than a silent NaN in a relevance
    /// matrix. Callers that *mean* to pad (e.g. the online validation
    /// path) pass an explicit finite fill. Covered cells pass through
    /// verbatim; a NaN the scoring policy itself produced is kept but
    /// logged at warn level.
    ///
    /// # Errors
    ///
    /// [`ProjectionError::MissingScores`] when required cells are
    /// uncovered and `fill` is NaN.
    pub fn project(
        &self,
        frame: &ScoreFrame,
        user_subset: Option<&[String]>,
        fill: f64,
    ) -> Result<ScoreMatrix, ProjectionError> {
        let (frame_rows, frame_cols) = frame.indices();

        let row_ids: Vec<&str> = user_subset.map_or_else(
            || self.user_ids_in_test().collect(),
            |subset| subset.iter().map(String::as_str).collect(),
        );
        let col_ids: Vec<&str> = self.item_ids_in_test().collect();

        let mut values = Vec::with_capacity(row_ids.len() * col_ids.len());
        let mut missing = 0usize;
        let mut nan_scored = 0usize;
        let mut first_missing: Option<(String, String)> = None;
        for row_id in &row_ids {
            let frame_row = frame_rows.get(row_id).copied();
            for col_id in &col_ids {
                let cell = frame_row.and_then(|row| {
                    frame_cols.get(col_id).map(|&col| frame.get(row, col))
                });
                match cell {
                    Some(value) => {
                        if value.is_nan() {
                            nan_scored += 1;
                        }
                        values.push(value);
                    }
                    None => {
                        missing += 1;
                        if first_missing.is_none() {
                            first_missing =
                                Some(((*row_id).to_string(), (*col_id).to_string()));
                        }
                        values.push(fill);
                    }
                }
            }
        }

        if missing > 0 {
            if let Some((user, item)) = first_missing {
                if fill.is_nan() {
                    return Err(ProjectionError::MissingScores {
                        user,
                        item,
                        missing,
                    });
                }
                debug!(missing, fill, "projection filled uncovered cells");
            }
        }
        if nan_scored > 0 {
            // A NaN the policy itself produced is not a coverage gap,
            // but it still poisons any ranking built on the matrix.
            warn!(nan_scored, "projection passed through NaN scores");
        }
        Ok(ScoreMatrix::new(row_ids.len(), col_ids.len(), values))
    }
}

/// 1% of the in-test population, rounded up, never below 1.
fn default_top(in_test: usize) -> usize {
    in_test.div_ceil(100).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Dataset {
        let events = vec![
            RawEvent::new("u1", "i1", 0.0),
            RawEvent::new("u1", "i2", 5.0),
            RawEvent::new("u1", "i1", 12.0),
            RawEvent::new("u2", "i2", 1.0),
        ];
        let users = vec![RawUser::new("u1", 10.0), RawUser::new("u2", f64::INFINITY)];
        let items = vec![RawItem::new("i1"), RawItem::new("i2")];
        Dataset::construct(&events, &users, &items, 100.0, 1, 1).expect("valid")
    }

    #[test]
    fn holdout_flag_follows_test_start() {
        let d = small();
        let flags: Vec<bool> = d.events().iter().map(|e| e.is_holdout).collect();
        // u1 events at 0 and 5 are training; 12 is holdout; u2's never is.
        assert_eq!(flags, vec![false, false, true, false]);
    }

    #[test]
    fn events_past_horizon_are_dropped() {
        let events = vec![
            RawEvent::new("u1", "i1", 0.0),
            RawEvent::new("u1", "i2", 5.0),
            RawEvent::new("u1", "i2", 14.0),
        ];
        let users = vec![RawUser::new("u1", 10.0)];
        let items = vec![RawItem::new("i1"), RawItem::new("i2")];
        let d = Dataset::construct(&events, &users, &items, 3.0, 1, 1).expect("valid");
        // 14 >= 10 + 3 is gone entirely; 5 < 13 survives as training.
        assert_eq!(d.events().len(), 2);
        assert!(d.events().iter().all(|e| e.timestamp < 13.0));
    }

    #[test]
    fn history_is_chronological_and_ends_at_test_start() {
        let events = vec![
            RawEvent::new("u1", "i2", 5.0),
            RawEvent::new("u1", "i1", 0.0),
        ];
        let users = vec![RawUser::new("u1", 10.0)];
        let items = vec![RawItem::new("i1"), RawItem::new("i2")];
        let d = Dataset::construct(&events, &users, &items, 100.0, 1, 1).expect("valid");
        let u = d.user("u1").expect("exists");
        assert_eq!(u.hist_items, vec![0, 1]);
        assert_eq!(u.hist_timestamps, vec![0.0, 5.0, 10.0]);
        assert!((u.hist_span - 10.0).abs() < 1e-12);
    }

    #[test]
    fn empty_history_still_terminates_at_test_start() {
        let users = vec![RawUser::new("u1", 7.0)];
        let items = vec![RawItem::new("i1")];
        let d = Dataset::construct(&[], &users, &items, 100.0, 1, 1).expect("valid");
        let u = d.user("u1").expect("exists");
        assert!(u.hist_items.is_empty());
        assert_eq!(u.hist_timestamps, vec![7.0]);
        assert!((u.hist_span - 0.0).abs() < 1e-12);
        assert!(!u.in_test);
    }

    #[test]
    fn empty_history_span_stays_zero_for_training_only_users() {
        let users = vec![RawUser::new("u1", f64::INFINITY)];
        let items = vec![RawItem::new("i1")];
        let a = Dataset::construct(&[], &users, &items, 100.0, 1, 1).expect("valid");
        let b = Dataset::construct(&[], &users, &items, 100.0, 1, 1).expect("valid");
        let u = a.user("u1").expect("exists");
        // The infinite terminator alone must not poison the span.
        assert!((u.hist_span - 0.0).abs() < 1e-12);
        assert_eq!(a.users(), b.users());
    }

    #[test]
    fn infinite_test_start_excludes_user_from_test() {
        let d = small();
        let u2 = d.user("u2").expect("exists");
        assert_eq!(u2.hist_len, 1);
        assert!(!u2.in_test, "training-only users never enter the test set");
    }

    #[test]
    fn min_lengths_gate_in_test_flags() {
        let events = vec![
            RawEvent::new("u1", "i1", 0.0),
            RawEvent::new("u1", "i1", 1.0),
            RawEvent::new("u2", "i2", 0.0),
        ];
        let users = vec![RawUser::new("u1", 10.0), RawUser::new("u2", 10.0)];
        let items = vec![RawItem::new("i1"), RawItem::new("i2")];
        let d = Dataset::construct(&events, &users, &items, 100.0, 2, 2).expect("valid");
        assert!(d.user("u1").expect("exists").in_test);
        assert!(!d.user("u2").expect("exists").in_test);
        assert!(d.item("i1").expect("exists").in_test);
        assert!(!d.item("i2").expect("exists").in_test);
    }

    #[test]
    fn default_capacities_floor_at_one() {
        let d = small();
        assert_eq!(d.default_item_rec_top_k, 1);
        assert_eq!(d.default_user_rec_top_c, 1);
    }

    #[test]
    fn infinite_horizon_is_advisory_not_fatal() {
        let events = vec![RawEvent::new("u1", "i1", 0.0)];
        let users = vec![RawUser::new("u1", 10.0)];
        let items = vec![RawItem::new("i1")];
        let d = Dataset::construct(&events, &users, &items, f64::INFINITY, 1, 1).expect("valid");
        assert!(d.advisories().contains(&Advisory::InfiniteHorizon));
    }

    #[test]
    fn target_matrix_covers_in_test_index() {
        let d = small();
        let t = d.target_matrix();
        // u1 is the only in-test user; its holdout event hits i1.
        assert_eq!(t.n_rows(), 1);
        assert_eq!(t.n_cols(), 2);
        assert!(t.contains(0, 0));
        assert!(!t.contains(0, 1));
    }

    #[test]
    fn target_matrix_is_memoized() {
        let d = small();
        let first = std::ptr::from_ref(d.target_matrix());
        let second = std::ptr::from_ref(d.target_matrix());
        assert_eq!(first, second);
    }

    #[test]
    fn project_fills_explicitly_and_errors_on_nan_fill() {
        let d = small();
        // Frame covering only i1: i2's column is unresolvable.
        let frame = ScoreFrame::new(vec!["u1".into()], vec!["i1".into()], vec![0.7]);
        let err = d.project(&frame, None, f64::NAN).expect_err("loud");
        assert!(matches!(
            err,
            ProjectionError::MissingScores { missing: 1, .. }
        ));

        let padded = d.project(&frame, None, 0.0).expect("explicit fill");
        assert!((padded.get(0, 0) - 0.7).abs() < 1e-12);
        assert!((padded.get(0, 1) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn project_passes_through_policy_scored_nans() {
        let d = small();
        // Both cells covered, one scored NaN by the policy itself: not
        // a coverage gap, so no error even under the loud NaN fill.
        let frame = ScoreFrame::new(
            vec!["u1".into()],
            vec!["i1".into(), "i2".into()],
            vec![0.7, f64::NAN],
        );
        let m = d.project(&frame, None, f64::NAN).expect("covered");
        assert!((m.get(0, 0) - 0.7).abs() < 1e-12);
        assert!(m.get(0, 1).is_nan());
    }

    #[test]
    fn project_honours_user_subset() {
        let d = small();
        let frame = ScoreFrame::new(
            vec!["u1".into(), "u2".into()],
            vec!["i1".into(), "i2".into()],
            vec![0.1, 0.2, 0.3, 0.4],
        );
        let subset = vec!["u2".to_string()];
        let m = d.project(&frame, Some(&subset), f64::NAN).expect("covered");
        assert_eq!(m.n_rows(), 1);
        assert!((m.get(0, 1) - 0.4).abs() < 1e-12);
    }
}
