//! Smoke tests driving the `ledger` binary itself, so startup (subscriber
//! installation, argument parsing) and the subcommand wiring are exercised,
//! not just the library underneath.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn ledger(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ledger"))
        .arg("--db")
        .arg(dir.join("ledger.db"))
        .arg("--anchor-file")
        .arg(dir.join("ANCHOR.txt"))
        .arg("--anchor-history")
        .arg(dir.join("ANCHOR_HISTORY.log"))
        .args(args)
        .output()
        .expect("spawn ledger binary")
}

fn stdout_of(output: &Output) -> String {
    assert!(
        output.status.success(),
        "command failed: status={:?} stderr={}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn init_starts_cleanly() {
    let dir = TempDir::new().unwrap();
    let out = ledger(dir.path(), &["init"]);
    let stdout = stdout_of(&out);
    assert!(stdout.contains("Initialized ledger"), "stdout: {}", stdout);
}

#[test]
fn full_lifecycle_through_the_binary() {
    let dir = TempDir::new().unwrap();

    let out = ledger(
        dir.path(),
        &[
            "propose",
            "--type",
            "Cost Cutting",
            "--description",
            "Cut QA team",
        ],
    );
    let stdout = stdout_of(&out);
    let decision_id = stdout
        .lines()
        .find_map(|l| l.strip_prefix("Proposed decision "))
        .expect("propose prints the decision id")
        .trim()
        .to_string();
    assert!(decision_id.starts_with("dec-"), "id: {}", decision_id);
    assert!(stdout.contains("institutional memory, not a prediction"));

    let out = ledger(
        dir.path(),
        &[
            "outcome",
            &decision_id,
            "--harm",
            "burnout",
            "--severity",
            "3",
            "--narrative",
            "on-call load doubled",
        ],
    );
    assert!(stdout_of(&out).contains("Recorded outcome"));

    let out = ledger(
        dir.path(),
        &[
            "respond",
            &decision_id,
            "approve",
            "--justification",
            "budget pressure",
        ],
    );
    assert!(stdout_of(&out).contains("APPROVE"));

    let out = ledger(dir.path(), &["finalize", &decision_id]);
    assert!(stdout_of(&out).contains("anchor sequence=0"));

    let out = ledger(dir.path(), &["status", &decision_id]);
    let stdout = stdout_of(&out);
    assert!(stdout.contains("[FINALIZED]"));
    assert!(stdout.contains("burnout"));

    let out = ledger(dir.path(), &["verify"]);
    let stdout = stdout_of(&out);
    assert!(stdout.contains("Chain OK (1 anchor record(s))"));
    assert!(stdout.contains("Anchor file matches the database tip"));
}

#[test]
fn verify_fails_nonzero_on_a_tampered_chain() {
    let dir = TempDir::new().unwrap();

    let out = ledger(
        dir.path(),
        &["propose", "--type", "X", "--description", "to be tampered"],
    );
    let decision_id = stdout_of(&out)
        .lines()
        .find_map(|l| l.strip_prefix("Proposed decision ").map(str::to_string))
        .unwrap();
    ledger(
        dir.path(),
        &["respond", &decision_id, "APPROVE", "--justification", "ok"],
    );
    ledger(dir.path(), &["finalize", &decision_id]);

    let conn = rusqlite::Connection::open(dir.path().join("ledger.db")).unwrap();
    conn.execute(
        "UPDATE decisions SET description = 'rewritten' WHERE decision_id = ?1",
        [&decision_id],
    )
    .unwrap();

    let out = ledger(dir.path(), &["verify"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("chain BROKEN at sequence 0"));
}

#[test]
fn bad_action_is_reported_not_panicked() {
    let dir = TempDir::new().unwrap();
    let out = ledger(
        dir.path(),
        &["respond", "dec-missing", "ESCALATE", "--justification", "x"],
    );
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("ESCALATE"), "stderr: {}", stderr);
    assert!(!stderr.contains("panicked"), "stderr: {}", stderr);
}
