//! Memory/Advisory Layer: renders warnings and counterfactual citations from
//! pattern output.
//!
//! Pure read-side. Every warning and counterfactual is a literal citation of
//! recorded history (category, count, decision ids, justification text) with
//! no scoring, ranking by confidence, or extrapolation. This is institutional
//! memory, not prediction, and keeping it that way is a correctness
//! requirement.

use crate::error::LedgerResult;
use crate::patterns::{self, Pattern, TypeMatcher};
use crate::store::{self, Db, DecisionFilter};
use crate::types::{DecisionId, ResponseAction};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A warning citing a significant repeated-harm pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub decision_type: String,
    pub harm_category: String,
    pub occurrences: usize,
    pub decision_ids: Vec<DecisionId>,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "harm '{}' recorded {} time(s) after decisions of type '{}' (see {})",
            self.harm_category,
            self.occurrences,
            self.decision_type,
            self.decision_ids.join(", ")
        )
    }
}

/// A cited historical precedent offered as a safer alternative: a decision of
/// the same type that was rejected or deferred and accrued none of the harms
/// this type is known for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counterfactual {
    pub decision_id: DecisionId,
    pub action: ResponseAction,
    pub justification: String,
    pub responded_at: DateTime<Utc>,
}

impl fmt::Display for Counterfactual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "precedent {}: {} with justification \"{}\"",
            self.decision_id,
            self.action.as_str(),
            self.justification
        )
    }
}

pub(crate) fn warnings_conn(
    conn: &Connection,
    matcher: &dyn TypeMatcher,
    threshold: usize,
    decision_type: &str,
) -> LedgerResult<Vec<Warning>> {
    Ok(patterns::detect_patterns_conn(conn, matcher, decision_type)?
        .into_iter()
        .filter(|p| p.occurrences >= threshold)
        .map(warning_from_pattern)
        .collect())
}

fn warning_from_pattern(pattern: Pattern) -> Warning {
    Warning {
        decision_type: pattern.decision_type,
        harm_category: pattern.harm_category,
        occurrences: pattern.occurrences,
        decision_ids: pattern.decision_ids,
    }
}

pub(crate) fn counterfactuals_conn(
    conn: &Connection,
    matcher: &dyn TypeMatcher,
    decision_type: &str,
) -> LedgerResult<Vec<Counterfactual>> {
    let known_harms: HashSet<String> =
        patterns::detect_patterns_conn(conn, matcher, decision_type)?
            .into_iter()
            .map(|p| p.harm_category)
            .collect();

    let decisions = store::load_decisions(conn, &DecisionFilter::default())?;
    let mut cited = Vec::new();
    for decision in decisions
        .iter()
        .filter(|d| matcher.matches(&d.decision_type, decision_type))
    {
        let response = match store::active_response(conn, &decision.id)? {
            Some(r) => r,
            None => continue,
        };
        if !matches!(
            response.action,
            ResponseAction::Reject | ResponseAction::Defer
        ) {
            continue;
        }
        // A precedent only qualifies if none of its outcomes match a harm the
        // queried type is known for.
        let outcomes = store::load_outcomes(conn, &decision.id)?;
        if outcomes
            .iter()
            .any(|o| known_harms.contains(&o.harm_category))
        {
            continue;
        }
        cited.push(Counterfactual {
            decision_id: decision.id.clone(),
            action: response.action,
            justification: response.justification,
            responded_at: response.responded_at,
        });
    }
    // Most recent precedent first.
    cited.sort_by(|a, b| b.responded_at.cmp(&a.responded_at));
    Ok(cited)
}

/// Read-side advisory queries over the record store.
#[derive(Clone)]
pub struct Advisory {
    db: Db,
    matcher: Arc<dyn TypeMatcher>,
    threshold: usize,
}

impl std::fmt::Debug for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advisory")
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl Advisory {
    pub(crate) fn new(db: Db, matcher: Arc<dyn TypeMatcher>, threshold: usize) -> Self {
        Self {
            db,
            matcher,
            threshold,
        }
    }

    /// One warning per significant pattern for the queried type, in pattern
    /// order. Empty when nothing crosses the threshold.
    pub fn warnings_for(&self, decision_type: &str) -> LedgerResult<Vec<Warning>> {
        let conn = self.db.lock()?;
        warnings_conn(&conn, self.matcher.as_ref(), self.threshold, decision_type)
    }

    /// Cited precedents of the same type whose response was REJECT or DEFER
    /// and which accrued no matching-harm outcome, most recent first.
    pub fn counterfactuals_for(&self, decision_type: &str) -> LedgerResult<Vec<Counterfactual>> {
        let conn = self.db.lock()?;
        counterfactuals_conn(&conn, self.matcher.as_ref(), decision_type)
    }
}
