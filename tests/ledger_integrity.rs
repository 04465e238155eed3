//! End-to-end tests over a real on-disk database: lifecycle enforcement,
//! hash-chain integrity (including direct-SQL tampering), pattern detection
//! and advisory output.

use consequence_ledger::{
    DecisionFilter, DecisionStatus, Ledger, LedgerConfig, LedgerError, ResponseAction,
};
use pretty_assertions::assert_eq;
use rusqlite::Connection;
use std::time::Duration;
use tempfile::TempDir;

fn open_ledger() -> (TempDir, LedgerConfig, Ledger) {
    let dir = TempDir::new().expect("tempdir");
    let config = LedgerConfig::in_dir(dir.path());
    let ledger = Ledger::open(&config).expect("open ledger");
    (dir, config, ledger)
}

/// Create, respond to and finalize one decision, returning its id.
fn finalized_decision(ledger: &Ledger, decision_type: &str, description: &str) -> String {
    let decision = ledger.create_decision(decision_type, description).unwrap();
    ledger
        .record_response(&decision.id, ResponseAction::Approve, "accepted risk")
        .unwrap();
    ledger.finalize(&decision.id).unwrap();
    decision.id
}

#[test]
fn chain_is_valid_after_any_sequence_of_finalizations() {
    let (_dir, _config, ledger) = open_ledger();

    for i in 0..5 {
        finalized_decision(&ledger, "Cost Cutting", &format!("round {}", i));
    }

    let verification = ledger.verify_chain().unwrap();
    assert!(verification.valid);
    assert_eq!(verification.first_broken, None);
    assert_eq!(verification.records, 5);
    assert!(verification.tip.is_some());

    // The anchor snapshot file tracks the tip.
    ledger.verify_anchor().unwrap();

    // Anchors are dense from zero and each references one decision.
    let anchors = ledger.list_anchors().unwrap();
    assert_eq!(anchors.len(), 5);
    for (i, anchor) in anchors.iter().enumerate() {
        assert_eq!(anchor.sequence, i as u64);
    }
    assert_eq!(anchors[0].previous_hash, "GENESIS");
}

#[test]
fn verify_chain_is_idempotent() {
    let (_dir, _config, ledger) = open_ledger();
    finalized_decision(&ledger, "Cost Cutting", "cut QA budget");

    let first = ledger.verify_chain().unwrap();
    let second = ledger.verify_chain().unwrap();
    assert_eq!(first, second);
}

#[test]
fn tampering_with_sealed_content_reports_exact_index() {
    let (_dir, config, ledger) = open_ledger();

    finalized_decision(&ledger, "Cost Cutting", "first");
    let tampered = finalized_decision(&ledger, "Cost Cutting", "second");
    finalized_decision(&ledger, "Cost Cutting", "third");

    // Simulate an out-of-band edit to the sealed decision text.
    let conn = Connection::open(&config.db_path).unwrap();
    conn.execute(
        "UPDATE decisions SET description = 'rewritten history' WHERE decision_id = ?1",
        [&tampered],
    )
    .unwrap();

    let verification = ledger.verify_chain().unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.first_broken, Some(1));
    assert_eq!(verification.records, 3);
    assert_eq!(verification.tip, None);
}

#[test]
fn tampering_with_a_link_breaks_that_anchor() {
    let (_dir, config, ledger) = open_ledger();
    finalized_decision(&ledger, "Cost Cutting", "first");
    finalized_decision(&ledger, "Cost Cutting", "second");
    finalized_decision(&ledger, "Cost Cutting", "third");

    let conn = Connection::open(&config.db_path).unwrap();
    conn.execute(
        "UPDATE anchors SET previous_hash = 'forged' WHERE sequence = 2",
        [],
    )
    .unwrap();

    let verification = ledger.verify_chain().unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.first_broken, Some(2));
}

#[test]
fn truncating_the_chain_tip_is_caught_by_the_anchor_file() {
    let (_dir, config, ledger) = open_ledger();
    finalized_decision(&ledger, "Cost Cutting", "first");
    finalized_decision(&ledger, "Cost Cutting", "second");

    let conn = Connection::open(&config.db_path).unwrap();
    conn.execute("DELETE FROM anchors WHERE sequence = 1", [])
        .unwrap();

    // The remaining prefix still verifies on its own...
    let verification = ledger.verify_chain().unwrap();
    assert!(verification.valid);
    assert_eq!(verification.records, 1);

    // ...but the external tip pointer exposes the truncation.
    let err = ledger.verify_anchor().unwrap_err();
    assert!(matches!(err, LedgerError::Integrity(_)));
}

#[test]
fn responding_to_a_finalized_decision_fails_without_partial_write() {
    let (_dir, _config, ledger) = open_ledger();
    let id = finalized_decision(&ledger, "Cost Cutting", "cut QA budget");

    let before = ledger.list_responses(&id).unwrap();
    let err = ledger
        .record_response(&id, ResponseAction::Reject, "second thoughts")
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));

    let after = ledger.list_responses(&id).unwrap();
    assert_eq!(before, after);
    assert_eq!(
        ledger.get_decision(&id).unwrap().status,
        DecisionStatus::Finalized
    );
}

#[test]
fn finalize_requires_a_response_and_is_not_repeatable() {
    let (_dir, _config, ledger) = open_ledger();
    let decision = ledger
        .create_decision("Cost Cutting", "cut QA budget")
        .unwrap();

    let err = ledger.finalize(&decision.id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));

    ledger
        .record_response(&decision.id, ResponseAction::Approve, "accepted risk")
        .unwrap();
    ledger.finalize(&decision.id).unwrap();

    let err = ledger.finalize(&decision.id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));

    // Exactly one anchor exists for the decision.
    let anchors = ledger.list_anchors().unwrap();
    assert_eq!(anchors.len(), 1);
    assert_eq!(anchors[0].decision_id, decision.id);
}

#[test]
fn detect_patterns_counts_and_omits_empty_categories() {
    let (_dir, _config, ledger) = open_ledger();

    let a = ledger.create_decision("X", "first of type X").unwrap();
    let b = ledger.create_decision("X", "second of type X").unwrap();
    let other = ledger.create_decision("Y", "unrelated type").unwrap();

    ledger
        .add_outcome(&a.id, "misinformation", 3, "false claims spread", None)
        .unwrap();
    ledger
        .add_outcome(&b.id, "misinformation", 4, "more false claims", None)
        .unwrap();
    ledger
        .add_outcome(&other.id, "burnout", 2, "different type, must not leak", None)
        .unwrap();

    let patterns = ledger.detect_patterns("X").unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].harm_category, "misinformation");
    assert_eq!(patterns[0].occurrences, 2);
    let mut cited = patterns[0].decision_ids.clone();
    cited.sort();
    let mut expected = vec![a.id.clone(), b.id.clone()];
    expected.sort();
    assert_eq!(cited, expected);

    // No decisions of an unseen type means no patterns at all.
    assert!(ledger.detect_patterns("Z").unwrap().is_empty());
}

#[test]
fn patterns_order_by_count_then_recency() {
    let (_dir, _config, ledger) = open_ledger();
    let d = ledger.create_decision("X", "decision").unwrap();

    ledger
        .add_outcome(&d.id, "burnout", 2, "", None)
        .unwrap();
    ledger
        .add_outcome(&d.id, "misinformation", 3, "", None)
        .unwrap();
    ledger
        .add_outcome(&d.id, "misinformation", 4, "", None)
        .unwrap();

    let patterns = ledger.detect_patterns("X").unwrap();
    assert_eq!(patterns.len(), 2);
    assert_eq!(patterns[0].harm_category, "misinformation");
    assert_eq!(patterns[0].occurrences, 2);
    assert_eq!(patterns[1].harm_category, "burnout");
    assert_eq!(patterns[1].occurrences, 1);
}

#[test]
fn warning_threshold_scenario() {
    let (_dir, _config, ledger) = open_ledger();

    // First decision of the type accrues one misinformation outcome.
    let first = ledger
        .create_decision("Engagement Optimization", "Increase amplification")
        .unwrap();
    ledger
        .add_outcome(&first.id, "misinformation", 4, "false posts spiked", None)
        .unwrap();

    // A sibling decision of the same type is proposed.
    let sibling = ledger
        .create_decision("Engagement Optimization", "Increase amplification again")
        .unwrap();

    let patterns = ledger.detect_patterns("Engagement Optimization").unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].harm_category, "misinformation");
    assert_eq!(patterns[0].occurrences, 1);

    // One occurrence is below the default threshold of 2: no warnings yet.
    assert!(ledger
        .warnings_for("Engagement Optimization")
        .unwrap()
        .is_empty());

    // A second matching outcome crosses the threshold.
    ledger
        .add_outcome(&sibling.id, "misinformation", 3, "same failure mode", None)
        .unwrap();
    let warnings = ledger.warnings_for("Engagement Optimization").unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].harm_category, "misinformation");
    assert_eq!(warnings[0].occurrences, 2);
    assert_eq!(warnings[0].decision_ids.len(), 2);
}

#[test]
fn counterfactuals_cite_only_harm_free_rejected_precedents() {
    let (_dir, _config, ledger) = open_ledger();

    // A rejected precedent that stayed harm-free.
    let clean = ledger
        .create_decision("Engagement Optimization", "Throttle amplification")
        .unwrap();
    ledger
        .record_response(&clean.id, ResponseAction::Reject, "pilot showed harm risk")
        .unwrap();

    // A rejected precedent that still accrued the matching harm.
    let harmed = ledger
        .create_decision("Engagement Optimization", "Partial rollout")
        .unwrap();
    ledger
        .record_response(&harmed.id, ResponseAction::Defer, "wait for review")
        .unwrap();
    ledger
        .add_outcome(&harmed.id, "misinformation", 4, "leaked anyway", None)
        .unwrap();

    // An approved decision never qualifies regardless of outcomes.
    let approved = ledger
        .create_decision("Engagement Optimization", "Full rollout")
        .unwrap();
    ledger
        .record_response(&approved.id, ResponseAction::Approve, "growth targets")
        .unwrap();
    ledger
        .add_outcome(&approved.id, "misinformation", 5, "major incident", None)
        .unwrap();

    let counterfactuals = ledger
        .counterfactuals_for("Engagement Optimization")
        .unwrap();
    assert_eq!(counterfactuals.len(), 1);
    assert_eq!(counterfactuals[0].decision_id, clean.id);
    assert_eq!(counterfactuals[0].action, ResponseAction::Reject);
    assert_eq!(counterfactuals[0].justification, "pilot showed harm risk");

    // Round-trip: the cited precedent has zero matching-harm outcomes.
    let cited_outcomes = ledger.list_outcomes(&counterfactuals[0].decision_id).unwrap();
    assert!(cited_outcomes
        .iter()
        .all(|o| o.harm_category != "misinformation"));
}

#[test]
fn late_outcomes_do_not_disturb_the_anchor() {
    let (_dir, _config, ledger) = open_ledger();
    let id = finalized_decision(&ledger, "Engagement Optimization", "Increase amplification");

    let anchors_before = ledger.list_anchors().unwrap();
    assert_eq!(anchors_before.len(), 1);
    let sealed_hash = anchors_before[0].content_hash.clone();

    // Outcomes keep arriving long after finalization.
    std::thread::sleep(Duration::from_millis(5));
    ledger
        .add_outcome(&id, "misinformation", 4, "observed months later", None)
        .unwrap();

    // The anchor content hash is unchanged and the chain still verifies.
    let anchors_after = ledger.list_anchors().unwrap();
    assert_eq!(anchors_after[0].content_hash, sealed_hash);
    let verification = ledger.verify_chain().unwrap();
    assert!(verification.valid);

    // The late outcome is still part of the decision's record.
    assert_eq!(ledger.list_outcomes(&id).unwrap().len(), 1);
}

#[test]
fn outcomes_present_at_finalization_are_sealed() {
    let (_dir, config, ledger) = open_ledger();
    let decision = ledger
        .create_decision("Engagement Optimization", "Increase amplification")
        .unwrap();
    ledger
        .add_outcome(&decision.id, "misinformation", 4, "early signal", None)
        .unwrap();
    ledger
        .record_response(&decision.id, ResponseAction::Approve, "growth targets")
        .unwrap();
    std::thread::sleep(Duration::from_millis(5));
    ledger.finalize(&decision.id).unwrap();

    // Editing the sealed outcome narrative breaks verification.
    let conn = Connection::open(&config.db_path).unwrap();
    conn.execute(
        "UPDATE outcomes SET narrative = 'softened wording' WHERE decision_id = ?1",
        [&decision.id],
    )
    .unwrap();

    let verification = ledger.verify_chain().unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.first_broken, Some(0));
}

#[test]
fn validation_failures_name_the_problem() {
    let (_dir, _config, ledger) = open_ledger();

    let err = ledger.create_decision("X", "").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidArgument(ref m) if m.contains("description")));

    let d = ledger.create_decision("X", "valid decision").unwrap();
    let err = ledger.add_outcome(&d.id, "burnout", 6, "", None).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidArgument(ref m) if m.contains("severity")));

    let err = ledger.get_decision("dec-missing").unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "decision", .. }));

    let err = "ESCALATE".parse::<ResponseAction>().unwrap_err();
    assert!(matches!(err, LedgerError::InvalidArgument(ref m) if m.contains("ESCALATE")));
}

#[test]
fn status_transitions_are_monotonic_and_visible_in_listings() {
    let (_dir, _config, ledger) = open_ledger();
    let d = ledger.create_decision("X", "watch the lifecycle").unwrap();
    assert_eq!(
        ledger.get_decision(&d.id).unwrap().status,
        DecisionStatus::Proposed
    );

    ledger
        .record_response(&d.id, ResponseAction::Defer, "needs more data")
        .unwrap();
    assert_eq!(
        ledger.get_decision(&d.id).unwrap().status,
        DecisionStatus::Responded
    );

    ledger.finalize(&d.id).unwrap();
    let finalized =
        ledger.list_decisions(&DecisionFilter::by_type("X").with_status(DecisionStatus::Finalized));
    assert_eq!(finalized.unwrap().len(), 1);
}

#[test]
fn timeline_merges_history_in_order() {
    let (_dir, _config, ledger) = open_ledger();
    let d = ledger.create_decision("X", "full history").unwrap();
    ledger
        .record_response(&d.id, ResponseAction::Approve, "first call")
        .unwrap();
    ledger
        .record_response(&d.id, ResponseAction::Reject, "reversed after review")
        .unwrap();
    ledger.add_outcome(&d.id, "financial", 2, "small loss", None).unwrap();
    ledger.finalize(&d.id).unwrap();

    let timeline = ledger.decision_timeline(&d.id).unwrap();
    // proposal + 2 responses + 1 outcome + finalization
    assert_eq!(timeline.len(), 5);
    for pair in timeline.windows(2) {
        assert!(pair[0].at() <= pair[1].at());
    }
}

#[test]
fn ledger_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = LedgerConfig::in_dir(dir.path());

    let id = {
        let ledger = Ledger::open(&config).unwrap();
        finalized_decision(&ledger, "Cost Cutting", "persisted across restarts")
    };

    let reopened = Ledger::open(&config).unwrap();
    assert_eq!(
        reopened.get_decision(&id).unwrap().status,
        DecisionStatus::Finalized
    );
    let verification = reopened.verify_chain().unwrap();
    assert!(verification.valid);
    assert_eq!(verification.records, 1);
    reopened.verify_anchor().unwrap();
}
