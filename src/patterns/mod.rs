//! Pattern Engine: scans decision history for repeated-harm signatures.
//!
//! A pattern is a (decision_type, harm_category) pair with an occurrence count
//! and the contributing decision ids. Patterns are derived on demand and never
//! persisted. Matching decisions to a queried type goes through the pluggable
//! [`TypeMatcher`] seam; the aggregation below never assumes exact equality.

use crate::error::LedgerResult;
use crate::store::{self, Db, DecisionFilter};
use crate::types::DecisionId;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Capability seam for deciding whether a historical decision's type matches
/// a queried type. The prototype ships exact matching; a fuzzy matcher can be
/// swapped in without touching the aggregation logic.
pub trait TypeMatcher: Send + Sync {
    fn matches(&self, candidate: &str, query: &str) -> bool;
}

/// Default matcher: exact category equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactTypeMatcher;

impl TypeMatcher for ExactTypeMatcher {
    fn matches(&self, candidate: &str, query: &str) -> bool {
        candidate == query
    }
}

/// A recurring (decision_type, harm_category) signature derived from history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub decision_type: String,
    pub harm_category: String,
    pub occurrences: usize,
    /// Decisions that contributed at least one matching outcome.
    pub decision_ids: Vec<DecisionId>,
    pub last_observed_at: DateTime<Utc>,
}

/// Aggregate patterns for every decision matching `decision_type` under the
/// given matcher. Categories with zero occurrences are never emitted.
///
/// Ordering: occurrence count descending, ties broken by most recent
/// observation first, then category name for determinism.
pub(crate) fn detect_patterns_conn(
    conn: &Connection,
    matcher: &dyn TypeMatcher,
    decision_type: &str,
) -> LedgerResult<Vec<Pattern>> {
    struct Bucket {
        occurrences: usize,
        decision_ids: Vec<DecisionId>,
        last_observed_at: DateTime<Utc>,
    }

    let decisions = store::load_decisions(conn, &DecisionFilter::default())?;
    let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();

    for decision in decisions
        .iter()
        .filter(|d| matcher.matches(&d.decision_type, decision_type))
    {
        for outcome in store::load_outcomes(conn, &decision.id)? {
            let bucket = buckets
                .entry(outcome.harm_category.clone())
                .or_insert_with(|| Bucket {
                    occurrences: 0,
                    decision_ids: Vec::new(),
                    last_observed_at: outcome.observed_at,
                });
            bucket.occurrences += 1;
            if bucket.last_observed_at < outcome.observed_at {
                bucket.last_observed_at = outcome.observed_at;
            }
            if !bucket.decision_ids.contains(&decision.id) {
                bucket.decision_ids.push(decision.id.clone());
            }
        }
    }

    let mut patterns: Vec<Pattern> = buckets
        .into_iter()
        .map(|(harm_category, bucket)| Pattern {
            decision_type: decision_type.to_string(),
            harm_category,
            occurrences: bucket.occurrences,
            decision_ids: bucket.decision_ids,
            last_observed_at: bucket.last_observed_at,
        })
        .collect();
    patterns.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then(b.last_observed_at.cmp(&a.last_observed_at))
            .then(a.harm_category.cmp(&b.harm_category))
    });
    Ok(patterns)
}

/// On-demand pattern detection over the record store.
#[derive(Clone)]
pub struct PatternEngine {
    db: Db,
    matcher: Arc<dyn TypeMatcher>,
    threshold: usize,
}

impl std::fmt::Debug for PatternEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternEngine")
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl PatternEngine {
    pub(crate) fn new(db: Db, matcher: Arc<dyn TypeMatcher>, threshold: usize) -> Self {
        Self {
            db,
            matcher,
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// All harm patterns seen after decisions of the queried type, computed
    /// from a consistent snapshot. Finite and restartable: call again to
    /// recompute against current history.
    pub fn detect_patterns(&self, decision_type: &str) -> LedgerResult<Vec<Pattern>> {
        let conn = self.db.lock()?;
        detect_patterns_conn(&conn, self.matcher.as_ref(), decision_type)
    }

    /// Patterns whose occurrence count reaches the configured threshold.
    pub fn significant_patterns(&self, decision_type: &str) -> LedgerResult<Vec<Pattern>> {
        Ok(self
            .detect_patterns(decision_type)?
            .into_iter()
            .filter(|p| p.occurrences >= self.threshold)
            .collect())
    }

    /// Whole-ledger harm tally: for every decision type present in history,
    /// its harm patterns. Each outcome is counted once (outcome ids are
    /// unique per row, so the per-type aggregation cannot double count).
    pub fn harm_report(&self) -> LedgerResult<Vec<(String, Vec<Pattern>)>> {
        let conn = self.db.lock()?;
        let decisions = store::load_decisions(&conn, &DecisionFilter::default())?;

        let mut types: Vec<String> = decisions.iter().map(|d| d.decision_type.clone()).collect();
        types.sort();
        types.dedup();

        let exact = ExactTypeMatcher;
        types
            .into_iter()
            .map(|t| detect_patterns_conn(&conn, &exact, &t).map(|ps| (t, ps)))
            .collect()
    }
}
