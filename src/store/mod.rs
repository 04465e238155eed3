//! Record Store: durable, append-only persistence of decisions, outcomes and
//! responses.
//!
//! Rows are never deleted or edited after creation. The only in-place updates
//! are the monotonic decision status transition and the `superseded` flag on a
//! replaced response, both performed inside a single transaction with the row
//! that causes them. Every write is committed before the call returns.

use crate::error::{LedgerError, LedgerResult};
use crate::types::{
    new_decision_id, new_outcome_id, new_response_id, AnchorRecord, Decision, DecisionStatus,
    Outcome, Response, ResponseAction,
};
use crate::workflow;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// SQLite plumbing
// ---------------------------------------------------------------------------

/// Shared handle over the single SQLite connection.
///
/// `rusqlite::Connection` is `Send` but not `Sync`; the `Mutex` makes the
/// handle `Sync` and doubles as the global writer lock: every mutating
/// operation (including finalize, which must be strictly serialized across
/// decisions) runs while holding it.
#[derive(Clone)]
pub(crate) struct Db(Arc<Mutex<Connection>>);

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Db(<sqlite>)")
    }
}

/// DDL for all four tables. Idempotent; applied on every open.
const CREATE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS decisions (
    decision_id   TEXT PRIMARY KEY,
    decision_type TEXT NOT NULL,
    description   TEXT NOT NULL,
    proposed_at   TEXT NOT NULL,
    status        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS responses (
    response_id   TEXT PRIMARY KEY,
    decision_id   TEXT NOT NULL REFERENCES decisions(decision_id),
    action        TEXT NOT NULL,
    justification TEXT NOT NULL,
    responded_at  TEXT NOT NULL,
    superseded    INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS outcomes (
    outcome_id    TEXT PRIMARY KEY,
    decision_id   TEXT NOT NULL REFERENCES decisions(decision_id),
    harm_category TEXT NOT NULL,
    severity      INTEGER NOT NULL,
    narrative     TEXT NOT NULL,
    observed_at   TEXT NOT NULL,
    recorded_at   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS anchors (
    sequence      INTEGER PRIMARY KEY,
    decision_id   TEXT NOT NULL UNIQUE REFERENCES decisions(decision_id),
    content_hash  TEXT NOT NULL,
    previous_hash TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decisions_type   ON decisions(decision_type);
CREATE INDEX IF NOT EXISTS idx_decisions_status ON decisions(status);
CREATE INDEX IF NOT EXISTS idx_responses_dec    ON responses(decision_id);
CREATE INDEX IF NOT EXISTS idx_outcomes_dec     ON outcomes(decision_id);
";

impl Db {
    /// Open (or create) the ledger database at `path` and apply the schema.
    pub(crate) fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        // WAL mode for better concurrent read behavior.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(CREATE_SCHEMA_SQL)?;

        log::info!("opened ledger db at {}", path.display());
        Ok(Self(Arc::new(Mutex::new(conn))))
    }

    pub(crate) fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.0.lock().map_err(|_| LedgerError::LockPoisoned)
    }
}

/// Timestamps are persisted as RFC 3339 UTC with microsecond precision so
/// that lexicographic comparison in SQL matches chronological order.
pub(crate) fn ts_to_sql(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_sql(s: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::Integrity(format!("bad timestamp in storage '{}': {}", s, e)))
}

// ---------------------------------------------------------------------------
// Row loading (free functions taking an open connection, so the anchor chain
// can reuse them inside its own transaction without re-locking)
// ---------------------------------------------------------------------------

type DecisionRow = (String, String, String, String, String);
type ResponseRow = (String, String, String, String, String, i64);
type OutcomeRow = (String, String, String, i64, String, String, String);

fn decision_from_row(row: DecisionRow) -> LedgerResult<Decision> {
    let (id, decision_type, description, proposed_at, status) = row;
    Ok(Decision {
        id,
        decision_type,
        description,
        proposed_at: ts_from_sql(&proposed_at)?,
        status: DecisionStatus::from_stored(&status)?,
    })
}

fn response_from_row(row: ResponseRow) -> LedgerResult<Response> {
    let (id, decision_id, action, justification, responded_at, superseded) = row;
    Ok(Response {
        id,
        decision_id,
        action: ResponseAction::from_stored(&action)?,
        justification,
        responded_at: ts_from_sql(&responded_at)?,
        superseded: superseded != 0,
    })
}

fn outcome_from_row(row: OutcomeRow) -> LedgerResult<Outcome> {
    let (id, decision_id, harm_category, severity, narrative, observed_at, recorded_at) = row;
    if !(1..=5).contains(&severity) {
        return Err(LedgerError::Integrity(format!(
            "outcome {} has out-of-range severity {} in storage",
            id, severity
        )));
    }
    Ok(Outcome {
        id,
        decision_id,
        harm_category,
        severity: severity as u8,
        narrative,
        observed_at: ts_from_sql(&observed_at)?,
        recorded_at: ts_from_sql(&recorded_at)?,
    })
}

pub(crate) fn get_decision_opt(
    conn: &Connection,
    id: &str,
) -> LedgerResult<Option<Decision>> {
    let row = conn
        .query_row(
            "SELECT decision_id, decision_type, description, proposed_at, status \
             FROM decisions WHERE decision_id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    row.map(decision_from_row).transpose()
}

pub(crate) fn require_decision(conn: &Connection, id: &str) -> LedgerResult<Decision> {
    get_decision_opt(conn, id)?.ok_or_else(|| LedgerError::not_found("decision", id))
}

pub(crate) fn active_response(
    conn: &Connection,
    decision_id: &str,
) -> LedgerResult<Option<Response>> {
    let row = conn
        .query_row(
            "SELECT response_id, decision_id, action, justification, responded_at, superseded \
             FROM responses WHERE decision_id = ?1 AND superseded = 0 \
             ORDER BY responded_at DESC LIMIT 1",
            [decision_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?;
    row.map(response_from_row).transpose()
}

fn load_responses(conn: &Connection, decision_id: &str) -> LedgerResult<Vec<Response>> {
    let mut stmt = conn.prepare(
        "SELECT response_id, decision_id, action, justification, responded_at, superseded \
         FROM responses WHERE decision_id = ?1 ORDER BY responded_at ASC, response_id ASC",
    )?;
    let rows = stmt
        .query_map([decision_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(response_from_row).collect()
}

/// Outcomes of a decision ordered by outcome id, the canonical hashing order.
pub(crate) fn load_outcomes(conn: &Connection, decision_id: &str) -> LedgerResult<Vec<Outcome>> {
    outcomes_recorded_until(conn, decision_id, None)
}

/// Outcomes recorded at or before `until`. Passing `None` loads all of them.
/// Chain verification uses the bound to reconstruct the exact outcome set the
/// content hash committed to at finalization time.
pub(crate) fn outcomes_recorded_until(
    conn: &Connection,
    decision_id: &str,
    until: Option<&DateTime<Utc>>,
) -> LedgerResult<Vec<Outcome>> {
    let (sql, params): (&str, Vec<String>) = match until {
        Some(t) => (
            "SELECT outcome_id, decision_id, harm_category, severity, narrative, \
                    observed_at, recorded_at \
             FROM outcomes WHERE decision_id = ?1 AND recorded_at <= ?2 \
             ORDER BY outcome_id ASC",
            vec![decision_id.to_string(), ts_to_sql(t)],
        ),
        None => (
            "SELECT outcome_id, decision_id, harm_category, severity, narrative, \
                    observed_at, recorded_at \
             FROM outcomes WHERE decision_id = ?1 ORDER BY outcome_id ASC",
            vec![decision_id.to_string()],
        ),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(outcome_from_row).collect()
}

pub(crate) fn load_decisions(
    conn: &Connection,
    filter: &DecisionFilter,
) -> LedgerResult<Vec<Decision>> {
    let mut sql = String::from(
        "SELECT decision_id, decision_type, description, proposed_at, status FROM decisions",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();
    if let Some(ref t) = filter.decision_type {
        clauses.push("decision_type = ?");
        values.push(t.clone());
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(status.as_str().to_string());
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY proposed_at ASC, decision_id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decision_from_row).collect()
}

fn load_anchor_for_decision(
    conn: &Connection,
    decision_id: &str,
) -> LedgerResult<Option<AnchorRecord>> {
    let row = conn
        .query_row(
            "SELECT sequence, decision_id, content_hash, previous_hash, created_at \
             FROM anchors WHERE decision_id = ?1",
            [decision_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    match row {
        Some((sequence, decision_id, content_hash, previous_hash, created_at)) => {
            Ok(Some(AnchorRecord {
                sequence: sequence as u64,
                decision_id,
                content_hash,
                previous_hash,
                created_at: ts_from_sql(&created_at)?,
            }))
        }
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// Filter for listing decisions.
#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub decision_type: Option<String>,
    pub status: Option<DecisionStatus>,
}

impl DecisionFilter {
    pub fn by_type(decision_type: &str) -> Self {
        Self {
            decision_type: Some(decision_type.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: DecisionStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// One entry of a decision's merged history ("autopsy" view).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEvent {
    Proposed { at: DateTime<Utc>, decision: Decision },
    ResponseRecorded { at: DateTime<Utc>, response: Response },
    OutcomeRecorded { at: DateTime<Utc>, outcome: Outcome },
    Finalized { at: DateTime<Utc>, anchor: AnchorRecord },
}

impl TimelineEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            TimelineEvent::Proposed { at, .. }
            | TimelineEvent::ResponseRecorded { at, .. }
            | TimelineEvent::OutcomeRecorded { at, .. }
            | TimelineEvent::Finalized { at, .. } => *at,
        }
    }
}

/// Append-only store for decisions, outcomes and responses.
#[derive(Debug, Clone)]
pub struct RecordStore {
    db: Db,
}

impl RecordStore {
    pub(crate) fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn create_decision(
        &self,
        decision_type: &str,
        description: &str,
    ) -> LedgerResult<Decision> {
        let decision_type = decision_type.trim();
        let description = description.trim();
        if decision_type.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "decision_type must not be empty".to_string(),
            ));
        }
        if description.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "description must not be empty".to_string(),
            ));
        }

        let decision = Decision {
            id: new_decision_id(),
            decision_type: decision_type.to_string(),
            description: description.to_string(),
            proposed_at: Utc::now(),
            status: DecisionStatus::Proposed,
        };

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO decisions (decision_id, decision_type, description, proposed_at, status) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                decision.id,
                decision.decision_type,
                decision.description,
                ts_to_sql(&decision.proposed_at),
                decision.status.as_str(),
            ],
        )?;
        log::info!(
            "decision proposed: {} type='{}'",
            decision.id,
            decision.decision_type
        );
        Ok(decision)
    }

    /// Record an observed consequence. Accepted at any time after the decision
    /// exists, including after finalization; late outcomes never touch the
    /// existing anchor.
    pub fn add_outcome(
        &self,
        decision_id: &str,
        harm_category: &str,
        severity: u8,
        narrative: &str,
        observed_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Outcome> {
        let harm_category = harm_category.trim();
        if harm_category.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "harm_category must not be empty".to_string(),
            ));
        }
        if !(1..=5).contains(&severity) {
            return Err(LedgerError::InvalidArgument(format!(
                "severity must be between 1 and 5, got {}",
                severity
            )));
        }

        let conn = self.db.lock()?;
        require_decision(&conn, decision_id)?;

        let now = Utc::now();
        let outcome = Outcome {
            id: new_outcome_id(),
            decision_id: decision_id.to_string(),
            harm_category: harm_category.to_string(),
            severity,
            narrative: narrative.to_string(),
            observed_at: observed_at.unwrap_or(now),
            recorded_at: now,
        };
        conn.execute(
            "INSERT INTO outcomes (outcome_id, decision_id, harm_category, severity, \
                                   narrative, observed_at, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                outcome.id,
                outcome.decision_id,
                outcome.harm_category,
                outcome.severity as i64,
                outcome.narrative,
                ts_to_sql(&outcome.observed_at),
                ts_to_sql(&outcome.recorded_at),
            ],
        )?;
        log::info!(
            "outcome recorded: {} decision={} harm='{}' severity={}",
            outcome.id,
            decision_id,
            outcome.harm_category,
            severity
        );
        Ok(outcome)
    }

    /// Record (or supersede) the leadership response for a decision.
    ///
    /// The prior active response, if any, is flagged superseded in the same
    /// transaction; its row is retained as an audit trail.
    pub fn record_response(
        &self,
        decision_id: &str,
        action: ResponseAction,
        justification: &str,
    ) -> LedgerResult<Response> {
        let justification = justification.trim();
        if justification.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "justification must not be empty".to_string(),
            ));
        }

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let decision = require_decision(&tx, decision_id)?;
        workflow::ensure_can_respond(&decision)?;

        tx.execute(
            "UPDATE responses SET superseded = 1 WHERE decision_id = ?1 AND superseded = 0",
            [decision_id],
        )?;

        let response = Response {
            id: new_response_id(),
            decision_id: decision_id.to_string(),
            action,
            justification: justification.to_string(),
            responded_at: Utc::now(),
            superseded: false,
        };
        tx.execute(
            "INSERT INTO responses (response_id, decision_id, action, justification, \
                                    responded_at, superseded) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                response.id,
                response.decision_id,
                response.action.as_str(),
                response.justification,
                ts_to_sql(&response.responded_at),
            ],
        )?;
        tx.execute(
            "UPDATE decisions SET status = ?1 WHERE decision_id = ?2",
            params![
                workflow::status_after_response(decision.status).as_str(),
                decision_id
            ],
        )?;
        tx.commit()?;

        log::info!(
            "response recorded: {} decision={} action={}",
            response.id,
            decision_id,
            action
        );
        Ok(response)
    }

    pub fn get_decision(&self, id: &str) -> LedgerResult<Decision> {
        let conn = self.db.lock()?;
        require_decision(&conn, id)
    }

    /// The single non-superseded response, if any has been recorded yet.
    pub fn active_response(&self, decision_id: &str) -> LedgerResult<Option<Response>> {
        let conn = self.db.lock()?;
        require_decision(&conn, decision_id)?;
        active_response(&conn, decision_id)
    }

    /// Full response audit trail, oldest first, superseded rows included.
    pub fn list_responses(&self, decision_id: &str) -> LedgerResult<Vec<Response>> {
        let conn = self.db.lock()?;
        require_decision(&conn, decision_id)?;
        load_responses(&conn, decision_id)
    }

    pub fn list_outcomes(&self, decision_id: &str) -> LedgerResult<Vec<Outcome>> {
        let conn = self.db.lock()?;
        require_decision(&conn, decision_id)?;
        load_outcomes(&conn, decision_id)
    }

    pub fn list_decisions(&self, filter: &DecisionFilter) -> LedgerResult<Vec<Decision>> {
        let conn = self.db.lock()?;
        load_decisions(&conn, filter)
    }

    /// Merged chronological history of one decision: proposal, every response
    /// (superseded ones included), every outcome and the anchor seal.
    pub fn decision_timeline(&self, decision_id: &str) -> LedgerResult<Vec<TimelineEvent>> {
        let conn = self.db.lock()?;
        let decision = require_decision(&conn, decision_id)?;
        let mut events = vec![TimelineEvent::Proposed {
            at: decision.proposed_at,
            decision: decision.clone(),
        }];
        for response in load_responses(&conn, decision_id)? {
            events.push(TimelineEvent::ResponseRecorded {
                at: response.responded_at,
                response,
            });
        }
        for outcome in load_outcomes(&conn, decision_id)? {
            events.push(TimelineEvent::OutcomeRecorded {
                at: outcome.recorded_at,
                outcome,
            });
        }
        if let Some(anchor) = load_anchor_for_decision(&conn, decision_id)? {
            events.push(TimelineEvent::Finalized {
                at: anchor.created_at,
                anchor,
            });
        }
        events.sort_by_key(|e| e.at());
        Ok(events)
    }

    /// Decisions with no recorded outcome at all: the "drift report". A
    /// decision whose consequences were never looked at is itself a signal.
    pub fn decisions_without_outcomes(&self) -> LedgerResult<Vec<Decision>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT d.decision_id, d.decision_type, d.description, d.proposed_at, d.status \
             FROM decisions d \
             LEFT JOIN outcomes o ON o.decision_id = d.decision_id \
             WHERE o.outcome_id IS NULL \
             ORDER BY d.proposed_at ASC, d.decision_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(decision_from_row).collect()
    }
}
