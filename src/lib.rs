//! Consequence Ledger: an integrity and memory engine for organizational
//! decisions.
//!
//! The ledger preserves decisions, their observed real-world outcomes and
//! leadership responses in an append-only SQLite store, seals each finalized
//! decision into a tamper-evident SHA-256 hash chain, and answers "has a
//! decision like this hurt us before?" by aggregating repeated-harm patterns
//! from history. It retrieves and cites prior facts; it never predicts
//! outcomes or recommends an action.

pub mod advisory;
pub mod anchor;
pub mod config;
pub mod error;
pub mod patterns;
pub mod store;
pub mod types;
pub mod workflow;

pub use advisory::{Advisory, Counterfactual, Warning};
pub use anchor::{AnchorChain, ChainVerification};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use patterns::{ExactTypeMatcher, Pattern, PatternEngine, TypeMatcher};
pub use store::{DecisionFilter, RecordStore, TimelineEvent};
pub use types::{
    AnchorRecord, Decision, DecisionId, DecisionStatus, Outcome, OutcomeId, Response,
    ResponseAction, ResponseId,
};

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Facade composing the record store, anchor chain, pattern engine and
/// advisory layer over one shared connection.
#[derive(Debug, Clone)]
pub struct Ledger {
    store: RecordStore,
    anchor: AnchorChain,
    patterns: PatternEngine,
    advisory: Advisory,
}

impl Ledger {
    /// Open (or create) a ledger with the default exact type matcher.
    pub fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        Self::open_with_matcher(config, Arc::new(ExactTypeMatcher))
    }

    /// Open with a custom decision-type matcher (the aggregation logic is
    /// matcher-agnostic; only the matching seam changes).
    pub fn open_with_matcher(
        config: &LedgerConfig,
        matcher: Arc<dyn TypeMatcher>,
    ) -> LedgerResult<Self> {
        let db = store::Db::open(&config.db_path)?;
        Ok(Self {
            store: RecordStore::new(db.clone()),
            anchor: AnchorChain::new(
                db.clone(),
                config.anchor_file.clone(),
                config.anchor_history.clone(),
            ),
            patterns: PatternEngine::new(db.clone(), matcher.clone(), config.pattern_threshold),
            advisory: Advisory::new(db, matcher, config.pattern_threshold),
        })
    }

    // -- record store --------------------------------------------------------

    pub fn create_decision(
        &self,
        decision_type: &str,
        description: &str,
    ) -> LedgerResult<Decision> {
        self.store.create_decision(decision_type, description)
    }

    pub fn add_outcome(
        &self,
        decision_id: &str,
        harm_category: &str,
        severity: u8,
        narrative: &str,
        observed_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<Outcome> {
        self.store
            .add_outcome(decision_id, harm_category, severity, narrative, observed_at)
    }

    pub fn record_response(
        &self,
        decision_id: &str,
        action: ResponseAction,
        justification: &str,
    ) -> LedgerResult<Response> {
        self.store.record_response(decision_id, action, justification)
    }

    pub fn get_decision(&self, id: &str) -> LedgerResult<Decision> {
        self.store.get_decision(id)
    }

    pub fn list_decisions(&self, filter: &DecisionFilter) -> LedgerResult<Vec<Decision>> {
        self.store.list_decisions(filter)
    }

    pub fn list_outcomes(&self, decision_id: &str) -> LedgerResult<Vec<Outcome>> {
        self.store.list_outcomes(decision_id)
    }

    pub fn list_responses(&self, decision_id: &str) -> LedgerResult<Vec<Response>> {
        self.store.list_responses(decision_id)
    }

    pub fn active_response(&self, decision_id: &str) -> LedgerResult<Option<Response>> {
        self.store.active_response(decision_id)
    }

    pub fn decision_timeline(&self, decision_id: &str) -> LedgerResult<Vec<TimelineEvent>> {
        self.store.decision_timeline(decision_id)
    }

    pub fn decisions_without_outcomes(&self) -> LedgerResult<Vec<Decision>> {
        self.store.decisions_without_outcomes()
    }

    // -- anchor chain ---------------------------------------------------------

    pub fn finalize(&self, decision_id: &str) -> LedgerResult<AnchorRecord> {
        self.anchor.finalize(decision_id)
    }

    pub fn verify_chain(&self) -> LedgerResult<ChainVerification> {
        self.anchor.verify_chain()
    }

    pub fn verify_anchor(&self) -> LedgerResult<()> {
        self.anchor.verify_anchor()
    }

    pub fn list_anchors(&self) -> LedgerResult<Vec<AnchorRecord>> {
        self.anchor.list_anchors()
    }

    // -- pattern engine & advisory --------------------------------------------

    pub fn detect_patterns(&self, decision_type: &str) -> LedgerResult<Vec<Pattern>> {
        self.patterns.detect_patterns(decision_type)
    }

    pub fn significant_patterns(&self, decision_type: &str) -> LedgerResult<Vec<Pattern>> {
        self.patterns.significant_patterns(decision_type)
    }

    pub fn harm_report(&self) -> LedgerResult<Vec<(String, Vec<Pattern>)>> {
        self.patterns.harm_report()
    }

    pub fn warnings_for(&self, decision_type: &str) -> LedgerResult<Vec<Warning>> {
        self.advisory.warnings_for(decision_type)
    }

    pub fn counterfactuals_for(&self, decision_type: &str) -> LedgerResult<Vec<Counterfactual>> {
        self.advisory.counterfactuals_for(decision_type)
    }

    // -- component access -------------------------------------------------------

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn anchor_chain(&self) -> &AnchorChain {
        &self.anchor
    }

    pub fn pattern_engine(&self) -> &PatternEngine {
        &self.patterns
    }
}
