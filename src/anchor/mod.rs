//! Hash Anchor Chain: seals each finalized decision into a tamper-evident,
//! singly-linked chain of SHA-256 anchors.
//!
//! The content hash commits to the decision, its active response and every
//! outcome known at the finalization instant, serialized in a fixed canonical
//! field order. Each anchor's `previous_hash` is the hash of the prior anchor
//! record itself (or the `GENESIS` sentinel), so any out-of-band row edit,
//! truncation or insertion breaks the first affected link.
//!
//! Outcomes recorded after finalization are deliberately outside the hash:
//! the anchor attests to the decision commitment as finalized, and
//! verification reconstructs that instant via the outcome `recorded_at`
//! column.

use crate::config::GENESIS_HASH;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{self, Db};
use crate::types::{AnchorRecord, Decision, Outcome, Response};
use crate::workflow;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Canonical serialization
// ---------------------------------------------------------------------------

/// Canonical byte layout of the sealed content. Field order is the hash
/// contract; do not reorder.
#[derive(Serialize)]
struct CanonicalContent<'a> {
    decision_id: &'a str,
    decision_type: &'a str,
    description: &'a str,
    response_action: &'a str,
    response_justification: &'a str,
    outcomes: Vec<CanonicalOutcome<'a>>,
}

#[derive(Serialize)]
struct CanonicalOutcome<'a> {
    id: &'a str,
    harm_category: &'a str,
    severity: u8,
    narrative: &'a str,
    observed_at: String,
}

/// Canonical byte layout of an anchor record, hashed to produce the next
/// record's `previous_hash`.
#[derive(Serialize)]
struct CanonicalAnchor<'a> {
    sequence: u64,
    decision_id: &'a str,
    content_hash: &'a str,
    previous_hash: &'a str,
    created_at: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash of the decision + response + outcomes canonical payload.
/// `outcomes` must already be sorted by outcome id (the store guarantees it).
pub(crate) fn content_hash(
    decision: &Decision,
    response: &Response,
    outcomes: &[Outcome],
) -> LedgerResult<String> {
    let payload = CanonicalContent {
        decision_id: &decision.id,
        decision_type: &decision.decision_type,
        description: &decision.description,
        response_action: response.action.as_str(),
        response_justification: &response.justification,
        outcomes: outcomes
            .iter()
            .map(|o| CanonicalOutcome {
                id: &o.id,
                harm_category: &o.harm_category,
                severity: o.severity,
                narrative: &o.narrative,
                observed_at: store::ts_to_sql(&o.observed_at),
            })
            .collect(),
    };
    Ok(sha256_hex(&serde_json::to_vec(&payload)?))
}

/// Hash of an anchor record itself; the chain link value.
pub(crate) fn record_hash(anchor: &AnchorRecord) -> LedgerResult<String> {
    let payload = CanonicalAnchor {
        sequence: anchor.sequence,
        decision_id: &anchor.decision_id,
        content_hash: &anchor.content_hash,
        previous_hash: &anchor.previous_hash,
        created_at: store::ts_to_sql(&anchor.created_at),
    };
    Ok(sha256_hex(&serde_json::to_vec(&payload)?))
}

// ---------------------------------------------------------------------------
// Row access
// ---------------------------------------------------------------------------

type AnchorRow = (i64, String, String, String, String);

fn anchor_from_row(row: AnchorRow) -> LedgerResult<AnchorRecord> {
    let (sequence, decision_id, content_hash, previous_hash, created_at) = row;
    Ok(AnchorRecord {
        sequence: sequence as u64,
        decision_id,
        content_hash,
        previous_hash,
        created_at: store::ts_from_sql(&created_at)?,
    })
}

fn load_all_anchors(conn: &Connection) -> LedgerResult<Vec<AnchorRecord>> {
    let mut stmt = conn.prepare(
        "SELECT sequence, decision_id, content_hash, previous_hash, created_at \
         FROM anchors ORDER BY sequence ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(anchor_from_row).collect()
}

fn load_tip(conn: &Connection) -> LedgerResult<Option<AnchorRecord>> {
    let row = conn
        .query_row(
            "SELECT sequence, decision_id, content_hash, previous_hash, created_at \
             FROM anchors ORDER BY sequence DESC LIMIT 1",
            [],
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
    row.map(anchor_from_row).transpose()
}

// ---------------------------------------------------------------------------
// Verification result
// ---------------------------------------------------------------------------

/// Outcome of a full chain walk. `first_broken` is the sequence number of the
/// first anchor whose link or content failed to recompute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub first_broken: Option<u64>,
    pub records: usize,
    /// Hash of the tip record when the chain is valid and non-empty.
    pub tip: Option<String>,
}

impl ChainVerification {
    fn valid_with(records: usize, tip: Option<String>) -> Self {
        Self {
            valid: true,
            first_broken: None,
            records,
            tip,
        }
    }

    fn broken_at(sequence: u64, records: usize) -> Self {
        Self {
            valid: false,
            first_broken: Some(sequence),
            records,
            tip: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AnchorChain
// ---------------------------------------------------------------------------

/// Sealing and verification over the anchors table, plus the external anchor
/// files used for offline audit.
#[derive(Debug, Clone)]
pub struct AnchorChain {
    db: Db,
    anchor_file: PathBuf,
    anchor_history: PathBuf,
}

impl AnchorChain {
    pub(crate) fn new(db: Db, anchor_file: PathBuf, anchor_history: PathBuf) -> Self {
        Self {
            db,
            anchor_file,
            anchor_history,
        }
    }

    /// Seal a decision: compute its content hash, link it to the chain tip and
    /// flip its status to FINALIZED, all in one transaction.
    ///
    /// The connection mutex plus the transaction serialize concurrent finalize
    /// calls globally, so two anchors can never claim the same previous hash.
    pub fn finalize(&self, decision_id: &str) -> LedgerResult<AnchorRecord> {
        let anchor = {
            let mut conn = self.db.lock()?;
            let tx = conn.transaction()?;

            let decision = store::require_decision(&tx, decision_id)?;
            let response = store::active_response(&tx, decision_id)?;
            workflow::ensure_can_finalize(&decision, response.is_some())?;
            let response = response.ok_or_else(|| {
                LedgerError::InvalidState(format!("decision {} has no response", decision_id))
            })?;
            let outcomes = store::load_outcomes(&tx, decision_id)?;

            let created_at = Utc::now();
            let content_hash = content_hash(&decision, &response, &outcomes)?;
            let (sequence, previous_hash) = match load_tip(&tx)? {
                Some(tip) => (tip.sequence + 1, record_hash(&tip)?),
                None => (0, GENESIS_HASH.to_string()),
            };

            let anchor = AnchorRecord {
                sequence,
                decision_id: decision_id.to_string(),
                content_hash,
                previous_hash,
                created_at,
            };
            tx.execute(
                "INSERT INTO anchors (sequence, decision_id, content_hash, previous_hash, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    anchor.sequence as i64,
                    anchor.decision_id,
                    anchor.content_hash,
                    anchor.previous_hash,
                    store::ts_to_sql(&anchor.created_at),
                ],
            )?;
            tx.execute(
                "UPDATE decisions SET status = 'FINALIZED' WHERE decision_id = ?1",
                [decision_id],
            )?;
            tx.commit()?;
            anchor
        };

        // Anchor files are re-derivable from the table; written only after
        // commit so a crash here leaves the chain intact and verify_anchor
        // able to flag the stale snapshot.
        let note = format!("finalize {}", decision_id);
        self.write_anchor_files(&record_hash(&anchor)?, &anchor.created_at, &note)?;

        log::info!(
            "decision finalized: {} anchor seq={} hash={}",
            decision_id,
            anchor.sequence,
            anchor.content_hash
        );
        Ok(anchor)
    }

    /// Walk the whole chain, recomputing every content hash and every link.
    /// Read-only and idempotent; never repairs anything.
    pub fn verify_chain(&self) -> LedgerResult<ChainVerification> {
        let conn = self.db.lock()?;
        let anchors = load_all_anchors(&conn)?;
        let records = anchors.len();

        let mut previous: Option<&AnchorRecord> = None;
        for (index, anchor) in anchors.iter().enumerate() {
            // Sequence numbers must be dense from zero; a gap means a record
            // was removed or inserted.
            if anchor.sequence != index as u64 {
                return Ok(ChainVerification::broken_at(anchor.sequence, records));
            }

            let expected_previous = match previous {
                Some(prev) => record_hash(prev)?,
                None => GENESIS_HASH.to_string(),
            };
            if anchor.previous_hash != expected_previous {
                return Ok(ChainVerification::broken_at(anchor.sequence, records));
            }

            if self.recompute_content_hash(&conn, anchor)? != anchor.content_hash {
                return Ok(ChainVerification::broken_at(anchor.sequence, records));
            }

            previous = Some(anchor);
        }

        let tip = match previous {
            Some(tip) => Some(record_hash(tip)?),
            None => None,
        };
        Ok(ChainVerification::valid_with(records, tip))
    }

    /// Cross-check the database chain tip against the anchor snapshot file.
    /// Either side disagreeing is an integrity violation.
    pub fn verify_anchor(&self) -> LedgerResult<()> {
        let verification = self.verify_chain()?;
        if !verification.valid {
            return Err(LedgerError::Integrity(format!(
                "chain broken at sequence {}",
                verification.first_broken.unwrap_or_default()
            )));
        }

        let anchored = self.read_anchor_file()?;
        match (&verification.tip, &anchored) {
            (None, None) => Ok(()),
            (Some(db_tip), Some(file_tip)) if db_tip == file_tip => Ok(()),
            (db_tip, file_tip) => Err(LedgerError::Integrity(format!(
                "anchor mismatch: db tip {:?}, anchor file {:?}",
                db_tip, file_tip
            ))),
        }
    }

    /// All anchor records in sequence order.
    pub fn list_anchors(&self) -> LedgerResult<Vec<AnchorRecord>> {
        let conn = self.db.lock()?;
        load_all_anchors(&conn)
    }

    /// Re-derive the canonical payload a given anchor committed to, using only
    /// the outcomes recorded at or before the anchor's creation instant.
    fn recompute_content_hash(
        &self,
        conn: &Connection,
        anchor: &AnchorRecord,
    ) -> LedgerResult<String> {
        let decision = store::get_decision_opt(conn, &anchor.decision_id)?.ok_or_else(|| {
            LedgerError::Integrity(format!(
                "anchor {} references missing decision {}",
                anchor.sequence, anchor.decision_id
            ))
        })?;
        let response = store::active_response(conn, &anchor.decision_id)?.ok_or_else(|| {
            LedgerError::Integrity(format!(
                "anchor {} references decision {} with no active response",
                anchor.sequence, anchor.decision_id
            ))
        })?;
        let outcomes =
            store::outcomes_recorded_until(conn, &anchor.decision_id, Some(&anchor.created_at))?;
        content_hash(&decision, &response, &outcomes)
    }

    // -- anchor files -------------------------------------------------------

    fn write_anchor_files(
        &self,
        tip_hash: &str,
        created_at: &DateTime<Utc>,
        note: &str,
    ) -> LedgerResult<()> {
        let ts = store::ts_to_sql(created_at);

        // Snapshot: current fingerprint, key=value lines.
        std::fs::write(
            &self.anchor_file,
            format!("latest_hash={}\ntimestamp={}\nnote={}\n", tip_hash, ts, note),
        )?;

        // Append-only external history.
        let mut history = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.anchor_history)?;
        writeln!(history, "{} | {} | {}", ts, tip_hash, note)?;
        Ok(())
    }

    /// Read `latest_hash` from the snapshot file; `None` when the file does
    /// not exist yet (nothing has been finalized).
    fn read_anchor_file(&self) -> LedgerResult<Option<String>> {
        if !Path::new(&self.anchor_file).exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.anchor_file)?;
        for line in content.lines() {
            if let Some(hash) = line.trim().strip_prefix("latest_hash=") {
                return Ok(Some(hash.trim().to_string()));
            }
        }
        Err(LedgerError::Integrity(format!(
            "anchor file {} has no latest_hash line",
            self.anchor_file.display()
        )))
    }
}
