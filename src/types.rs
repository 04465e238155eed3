//! Core record types: decisions, outcomes, responses and anchor records.
//!
//! These map 1:1 onto the persisted tables. Rows are append-only; the only
//! in-place mutation the store ever performs is the monotonic decision status
//! transition (Proposed -> Responded -> Finalized) and the `superseded` flag
//! on a response that has been replaced before finalization.

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type DecisionId = String;
pub type OutcomeId = String;
pub type ResponseId = String;

pub fn new_decision_id() -> DecisionId {
    format!("dec-{}", Uuid::new_v4())
}

pub fn new_outcome_id() -> OutcomeId {
    format!("out-{}", Uuid::new_v4())
}

pub fn new_response_id() -> ResponseId {
    format!("resp-{}", Uuid::new_v4())
}

/// Lifecycle status of a decision. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Proposed,
    Responded,
    Finalized,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Proposed => "PROPOSED",
            DecisionStatus::Responded => "RESPONDED",
            DecisionStatus::Finalized => "FINALIZED",
        }
    }

    /// Parse a status persisted by the store. An unknown value means the row
    /// was edited out-of-band, so this reports an integrity violation rather
    /// than an argument error.
    pub fn from_stored(s: &str) -> LedgerResult<Self> {
        match s {
            "PROPOSED" => Ok(DecisionStatus::Proposed),
            "RESPONDED" => Ok(DecisionStatus::Responded),
            "FINALIZED" => Ok(DecisionStatus::Finalized),
            other => Err(LedgerError::Integrity(format!(
                "unknown decision status in storage: {}",
                other
            ))),
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, DecisionStatus::Finalized)
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROPOSED" => Ok(DecisionStatus::Proposed),
            "RESPONDED" => Ok(DecisionStatus::Responded),
            "FINALIZED" => Ok(DecisionStatus::Finalized),
            other => Err(LedgerError::InvalidArgument(format!(
                "status must be PROPOSED, RESPONDED or FINALIZED, got '{}'",
                other
            ))),
        }
    }
}

/// Leadership disposition toward a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseAction {
    Approve,
    Reject,
    Defer,
}

impl ResponseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseAction::Approve => "APPROVE",
            ResponseAction::Reject => "REJECT",
            ResponseAction::Defer => "DEFER",
        }
    }

    pub fn from_stored(s: &str) -> LedgerResult<Self> {
        match s {
            "APPROVE" => Ok(ResponseAction::Approve),
            "REJECT" => Ok(ResponseAction::Reject),
            "DEFER" => Ok(ResponseAction::Defer),
            other => Err(LedgerError::Integrity(format!(
                "unknown response action in storage: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVE" => Ok(ResponseAction::Approve),
            "REJECT" => Ok(ResponseAction::Reject),
            "DEFER" => Ok(ResponseAction::Defer),
            other => Err(LedgerError::InvalidArgument(format!(
                "action must be APPROVE, REJECT or DEFER, got '{}'",
                other
            ))),
        }
    }
}

/// A proposed organizational action recorded for posterity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub decision_type: String,
    pub description: String,
    pub proposed_at: DateTime<Utc>,
    pub status: DecisionStatus,
}

/// An observed real-world consequence of a decision.
///
/// `observed_at` is when the harm happened in the world; `recorded_at` is when
/// the row entered the ledger. Chain verification uses `recorded_at` to
/// reconstruct the set of outcomes known at finalization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: OutcomeId,
    pub decision_id: DecisionId,
    pub harm_category: String,
    pub severity: u8,
    pub narrative: String,
    pub observed_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// Leadership's recorded disposition toward a decision.
///
/// Responses are never deleted: recording a new one before finalization marks
/// the prior row superseded, keeping the full audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub decision_id: DecisionId,
    pub action: ResponseAction,
    pub justification: String,
    pub responded_at: DateTime<Utc>,
    pub superseded: bool,
}

/// One link of the tamper-evident chain sealing a finalized decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub sequence: u64,
    pub decision_id: DecisionId,
    pub content_hash: String,
    pub previous_hash: String,
    pub created_at: DateTime<Utc>,
}
