//! Scoring policies and the shared-artifact cache.
//!
//! # Overview
//!
//! A [`Policy`] turns a dataset into a [`ScoreFrame`] over the in-test
//! users × in-test items. The built-in closed set mirrors the classic
//! baselines:
//!
//! - `Rand` — seeded Gaussian noise (floor of every curve)
//! - `Pop` — user/item popularity with configurable exponents
//! - `Ema` — per-user recency-decayed item affinity × item popularity
//! - `Hawkes` — self-exciting intensity at test start × item popularity
//! - `Seq` — trained first-order sequence model (the expensive artifact)
//! - `SeqPop` — `Seq` × item popularity
//!
//! `Seq` and `SeqPop` must share one trained model. [`SharedArtifacts`]
//! memoizes it single-flight: the first requester trains, every later
//! requester gets the same `Arc`, nothing is ever retrained or
//! invalidated within an orchestrator run.
//!
//! Policies are resolved by name from a [`PolicySet`] at configuration
//! time; orchestration code never branches on policy names.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, info};

use remex_core::{Dataset, ScoreFrame};

// ---------------------------------------------------------------------------
// Policy trait and registry
// ---------------------------------------------------------------------------

/// A scoring policy. `transform` must cover at least the dataset's
/// in-test users and items; the orchestrator reindexes the result.
pub trait Policy {
    /// Score the dataset.
    ///
    /// # Errors
    ///
    /// Policies surface their own failures (unfittable models, label
    /// mismatches in composite frames) as `anyhow` errors; the
    /// orchestrator contains them per policy.
    fn transform(&self, dataset: &Dataset, shared: &SharedArtifacts)
    -> anyhow::Result<ScoreFrame>;
}

/// Name → policy registry, resolved once at configuration time.
#[derive(Default)]
pub struct PolicySet {
    entries: Vec<(String, Box<dyn Policy>)>,
}

impl PolicySet {
    /// The closed built-in set. `seed` drives every stochastic policy.
    #[must_use]
    pub fn standard(seed: u64) -> Self {
        let mut set = Self::default();
        set.register("Rand", Box::new(Rand { seed }));
        set.register("Pop", Box::new(Pop::default()));
        set.register("Ema", Box::new(Ema));
        set.register("Hawkes", Box::new(Hawkes));
        set.register("Seq", Box::new(Seq));
        set.register("SeqPop", Box::new(SeqPop));
        set
    }

    /// Register (or override) a policy under `name`.
    pub fn register(&mut self, name: impl Into<String>, policy: Box<dyn Policy>) {
        let name = name.into();
        self.entries.retain(|(existing, _)| *existing != name);
        self.entries.push((name, policy));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Policy> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, policy)| policy.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

// ---------------------------------------------------------------------------
// Shared artifacts
// ---------------------------------------------------------------------------

/// Cross-policy cache for expensive artifacts, keyed by artifact kind.
/// Compute-once, share-read-only for the life of an orchestrator run.
#[derive(Default)]
pub struct SharedArtifacts {
    sequence: OnceCell<Arc<SequenceModel>>,
}

impl SharedArtifacts {
    /// The shared sequence model, trained on first access.
    ///
    /// # Errors
    ///
    /// Propagates [`SequenceModel::fit`] failures; nothing is cached on
    /// failure, so a later call retries.
    pub fn sequence_model(&self, dataset: &Dataset) -> anyhow::Result<Arc<SequenceModel>> {
        if let Some(model) = self.sequence.get() {
            return Ok(Arc::clone(model));
        }
        let trained = Arc::new(SequenceModel::fit(dataset)?);
        Ok(Arc::clone(self.sequence.get_or_init(|| trained)))
    }
}

// ---------------------------------------------------------------------------
// Sequence model
// ---------------------------------------------------------------------------

/// First-order transition model over consecutive history items with
/// Laplace smoothing. Fitting walks every training history once; this is
/// the "train once, score many" artifact of the policy set.
#[derive(Debug)]
pub struct SequenceModel {
    /// `transitions[prev] -> (next -> count)`.
    transitions: HashMap<u32, HashMap<u32, f64>>,
    /// Training popularity per item table position.
    popularity: Vec<f64>,
    smoothing: f64,
}

impl SequenceModel {
    const SMOOTHING: f64 = 0.1;

    /// Train on every user's chronological history.
    ///
    /// # Errors
    ///
    /// Fails on an empty item table; there is nothing to smooth toward.
    pub fn fit(dataset: &Dataset) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !dataset.items().is_empty(),
            "cannot fit a sequence model on an empty item table"
        );
        let mut transitions: HashMap<u32, HashMap<u32, f64>> = HashMap::new();
        let mut pairs = 0usize;
        for user in dataset.users() {
            for window in user.hist_items.windows(2) {
                *transitions
                    .entry(window[0])
                    .or_default()
                    .entry(window[1])
                    .or_default() += 1.0;
                pairs += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let popularity: Vec<f64> = dataset.items().iter().map(|i| i.hist_len as f64).collect();
        info!(pairs, items = popularity.len(), "sequence model trained");
        Ok(Self {
            transitions,
            popularity,
            smoothing: Self::SMOOTHING,
        })
    }

    /// Smoothed next-item score given the previous item, blended with a
    /// popularity prior for unseen transitions and empty histories.
    #[must_use]
    pub fn score(&self, prev: Option<u32>, next: u32) -> f64 {
        let prior = self.prior(next);
        let Some(prev) = prev else {
            return prior;
        };
        let Some(row) = self.transitions.get(&prev) else {
            return prior;
        };
        let total: f64 = row.values().sum();
        #[allow(clippy::cast_precision_loss)]
        let denom = self.smoothing.mul_add(self.popularity.len() as f64, total);
        let count = row.get(&next).copied().unwrap_or(0.0);
        self.smoothing.mul_add(prior.max(f64::MIN_POSITIVE), count) / denom
    }

    fn prior(&self, item: u32) -> f64 {
        let total: f64 = self.popularity.iter().sum();
        if total <= 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let n = self.popularity.len() as f64;
            return 1.0 / n;
        }
        self.popularity[item as usize] / total
    }

    /// Score every in-test user against every in-test item from the
    /// user's last training item.
    ///
    /// # Errors
    ///
    /// Infallible today; the signature matches [`Policy::transform`].
    pub fn score_frame(&self, dataset: &Dataset) -> anyhow::Result<ScoreFrame> {
        Ok(score_in_test(dataset, |user, item_pos| {
            self.score(user.hist_items.last().copied(), item_pos)
        }))
    }
}

// ---------------------------------------------------------------------------
// Built-in policies
// ---------------------------------------------------------------------------

/// Seeded Gaussian noise, a floor baseline for every metric.
#[derive(Debug, Clone, Copy)]
pub struct Rand {
    pub seed: u64,
}

impl Policy for Rand {
    fn transform(
        &self,
        dataset: &Dataset,
        _shared: &SharedArtifacts,
    ) -> anyhow::Result<ScoreFrame> {
        let users: Vec<String> = dataset.user_ids_in_test().map(str::to_owned).collect();
        let items: Vec<String> = dataset.item_ids_in_test().map(str::to_owned).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let values = (0..users.len() * items.len())
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        Ok(ScoreFrame::new(users, items, values))
    }
}

/// Popularity scores `user_hist_len^a * item_hist_len^b`.
///
/// `Pop(0, 1)` is pure item popularity, `Pop(1, 0)` pure user activity.
#[derive(Debug, Clone, Copy)]
pub struct Pop {
    pub user_exponent: f64,
    pub item_exponent: f64,
}

impl Default for Pop {
    fn default() -> Self {
        Self {
            user_exponent: 1.0,
            item_exponent: 1.0,
        }
    }
}

impl Pop {
    #[must_use]
    pub const fn item_only() -> Self {
        Self {
            user_exponent: 0.0,
            item_exponent: 1.0,
        }
    }

    #[must_use]
    pub const fn user_only() -> Self {
        Self {
            user_exponent: 1.0,
            item_exponent: 0.0,
        }
    }
}

impl Policy for Pop {
    fn transform(
        &self,
        dataset: &Dataset,
        _shared: &SharedArtifacts,
    ) -> anyhow::Result<ScoreFrame> {
        Ok(score_in_test(dataset, |user, item_pos| {
            #[allow(clippy::cast_precision_loss)]
            let (u, i) = (
                user.hist_len as f64,
                dataset.items()[item_pos as usize].hist_len as f64,
            );
            u.powf(self.user_exponent) * i.powf(self.item_exponent)
        }))
    }
}

/// Recency-decayed affinity: each past `(user, item)` event contributes
/// `exp(-(test_start - t) / horizon)`, multiplied by item popularity.
#[derive(Debug, Clone, Copy)]
pub struct Ema;

impl Policy for Ema {
    fn transform(
        &self,
        dataset: &Dataset,
        shared: &SharedArtifacts,
    ) -> anyhow::Result<ScoreFrame> {
        let recency = decayed_history_frame(dataset, dataset.horizon);
        recency.hadamard(&Pop::item_only().transform(dataset, shared)?)
    }
}

/// Self-exciting intensity at test start: a sharper kernel than [`Ema`]
/// (quarter-horizon time constant) plus a small popularity base rate.
#[derive(Debug, Clone, Copy)]
pub struct Hawkes;

impl Hawkes {
    const BASE_RATE: f64 = 0.1;
}

impl Policy for Hawkes {
    fn transform(
        &self,
        dataset: &Dataset,
        shared: &SharedArtifacts,
    ) -> anyhow::Result<ScoreFrame> {
        let excitation = decayed_history_frame(dataset, dataset.horizon / 4.0);
        let base = score_in_test(dataset, |_, _| Self::BASE_RATE);
        let users = excitation.users().to_vec();
        let items = excitation.items().to_vec();
        let mut values = Vec::with_capacity(users.len() * items.len());
        for row in 0..users.len() {
            for col in 0..items.len() {
                values.push(excitation.get(row, col) + base.get(row, col));
            }
        }
        let intensity = ScoreFrame::new(users, items, values);
        intensity.hadamard(&Pop::item_only().transform(dataset, shared)?)
    }
}

/// The shared trained sequence model.
#[derive(Debug, Clone, Copy)]
pub struct Seq;

impl Policy for Seq {
    fn transform(
        &self,
        dataset: &Dataset,
        shared: &SharedArtifacts,
    ) -> anyhow::Result<ScoreFrame> {
        shared.sequence_model(dataset)?.score_frame(dataset)
    }
}

/// Sequence model × user-activity popularity reweighting.
#[derive(Debug, Clone, Copy)]
pub struct SeqPop;

impl Policy for SeqPop {
    fn transform(
        &self,
        dataset: &Dataset,
        shared: &SharedArtifacts,
    ) -> anyhow::Result<ScoreFrame> {
        let seq = shared.sequence_model(dataset)?.score_frame(dataset)?;
        seq.hadamard(&Pop::user_only().transform(dataset, shared)?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build an in-test frame by scoring each (user record, item position).
fn score_in_test(
    dataset: &Dataset,
    score: impl Fn(&remex_core::UserRecord, u32) -> f64,
) -> ScoreFrame {
    let users: Vec<String> = dataset.user_ids_in_test().map(str::to_owned).collect();
    let items: Vec<String> = dataset.item_ids_in_test().map(str::to_owned).collect();
    let mut values = Vec::with_capacity(users.len() * items.len());
    for &user_pos in dataset.users_in_test() {
        let user = &dataset.users()[user_pos as usize];
        for &item_pos in dataset.items_in_test() {
            values.push(score(user, item_pos));
        }
    }
    ScoreFrame::new(users, items, values)
}

/// Sum of `exp(-(test_start - t) / tau)` over each user's history events
/// of each item. An infinite `tau` degenerates to plain counts.
fn decayed_history_frame(dataset: &Dataset, tau: f64) -> ScoreFrame {
    debug!(tau, "building decayed history frame");
    score_in_test(dataset, |user, item_pos| {
        user.hist_items
            .iter()
            .zip(&user.hist_timestamps)
            .filter(|&(&item, _)| item == item_pos)
            .map(|(_, &ts)| {
                let age = user.test_start_time - ts;
                if tau.is_finite() {
                    (-age / tau).exp()
                } else {
                    1.0
                }
            })
            .sum()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use remex_core::{RawEvent, RawItem, RawUser};

    fn dataset() -> Dataset {
        let events = vec![
            RawEvent::new("u1", "i1", 0.0),
            RawEvent::new("u1", "i2", 5.0),
            RawEvent::new("u1", "i2", 8.0),
            RawEvent::new("u2", "i1", 1.0),
            RawEvent::new("u2", "i2", 2.0),
        ];
        let users = vec![RawUser::new("u1", 10.0), RawUser::new("u2", 10.0)];
        let items = vec![RawItem::new("i1"), RawItem::new("i2")];
        Dataset::construct(&events, &users, &items, 100.0, 1, 1).expect("valid")
    }

    #[test]
    fn rand_is_deterministic_under_a_seed() {
        let d = dataset();
        let shared = SharedArtifacts::default();
        let a = Rand { seed: 7 }.transform(&d, &shared).expect("scores");
        let b = Rand { seed: 7 }.transform(&d, &shared).expect("scores");
        assert_eq!(a, b);
    }

    #[test]
    fn pop_item_only_ranks_by_item_history() {
        let d = dataset();
        let shared = SharedArtifacts::default();
        let frame = Pop::item_only().transform(&d, &shared).expect("scores");
        // i2 has 3 training events, i1 has 2; every user ranks i2 first.
        assert!(frame.get(0, 1) > frame.get(0, 0));
        assert!(frame.get(1, 1) > frame.get(1, 0));
    }

    #[test]
    fn ema_prefers_recent_items() {
        let d = dataset();
        let shared = SharedArtifacts::default();
        let frame = Ema.transform(&d, &shared).expect("scores");
        // u1 touched i2 most recently (and twice); i2 also wins popularity.
        assert!(frame.get(0, 1) > frame.get(0, 0));
    }

    #[test]
    fn hawkes_scores_are_finite_and_positive() {
        let d = dataset();
        let shared = SharedArtifacts::default();
        let frame = Hawkes.transform(&d, &shared).expect("scores");
        for row in 0..2 {
            for col in 0..2 {
                let v = frame.get(row, col);
                assert!(v.is_finite() && v > 0.0);
            }
        }
    }

    #[test]
    fn sequence_model_learns_observed_transition() {
        let d = dataset();
        let model = SequenceModel::fit(&d).expect("fit");
        // i1 -> i2 was observed twice, i1 -> i1 never.
        assert!(model.score(Some(0), 1) > model.score(Some(0), 0));
    }

    #[test]
    fn sequence_model_falls_back_to_popularity() {
        let d = dataset();
        let model = SequenceModel::fit(&d).expect("fit");
        let cold = model.score(None, 1);
        assert!((cold - 3.0 / 5.0).abs() < 1e-12, "popularity prior, got {cold}");
    }

    #[test]
    fn shared_sequence_model_is_trained_once() {
        let d = dataset();
        let shared = SharedArtifacts::default();
        let first = shared.sequence_model(&d).expect("fit");
        let second = shared.sequence_model(&d).expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn seq_and_seqpop_share_one_artifact() {
        let d = dataset();
        let shared = SharedArtifacts::default();
        Seq.transform(&d, &shared).expect("scores");
        let model = shared.sequence_model(&d).expect("already trained");
        SeqPop.transform(&d, &shared).expect("scores");
        let after = shared.sequence_model(&d).expect("still cached");
        assert!(Arc::ptr_eq(&model, &after));
    }

    #[test]
    fn registry_resolves_and_overrides_by_name() {
        let mut set = PolicySet::standard(1);
        assert!(set.get("Pop").is_some());
        assert!(set.get("nope").is_none());
        set.register("Pop", Box::new(Pop::user_only()));
        assert_eq!(set.names().filter(|n| *n == "Pop").count(), 1);
    }
}
