//! Response workflow rules.
//!
//! The decision lifecycle is a small forward-only state machine:
//!
//! ```text
//! PROPOSED --respond--> RESPONDED --respond--> RESPONDED (supersede)
//!                        RESPONDED --finalize--> FINALIZED (terminal)
//! ```
//!
//! The store and the anchor chain call these guards before mutating anything,
//! so a lifecycle violation can never partially apply.

use crate::error::{LedgerError, LedgerResult};
use crate::types::{Decision, DecisionStatus};

/// A response may be recorded (or superseded) any time before finalization.
pub fn ensure_can_respond(decision: &Decision) -> LedgerResult<()> {
    if decision.status.is_finalized() {
        return Err(LedgerError::InvalidState(format!(
            "decision {} is FINALIZED and can no longer be responded to",
            decision.id
        )));
    }
    Ok(())
}

/// Finalization requires a recorded response and a not-yet-finalized decision.
pub fn ensure_can_finalize(decision: &Decision, has_response: bool) -> LedgerResult<()> {
    if decision.status.is_finalized() {
        return Err(LedgerError::InvalidState(format!(
            "decision {} is already FINALIZED",
            decision.id
        )));
    }
    if !has_response {
        return Err(LedgerError::InvalidState(format!(
            "decision {} has no response; record APPROVE/REJECT/DEFER before finalizing",
            decision.id
        )));
    }
    Ok(())
}

/// Status after a successful respond call. Responding again while already
/// RESPONDED supersedes the prior response but does not move the status.
pub fn status_after_response(_current: DecisionStatus) -> DecisionStatus {
    DecisionStatus::Responded
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn decision_with(status: DecisionStatus) -> Decision {
        Decision {
            id: "dec-test".to_string(),
            decision_type: "Cost Cutting".to_string(),
            description: "Reduce support staffing".to_string(),
            proposed_at: Utc::now(),
            status,
        }
    }

    #[test]
    fn respond_allowed_before_finalization() {
        assert!(ensure_can_respond(&decision_with(DecisionStatus::Proposed)).is_ok());
        assert!(ensure_can_respond(&decision_with(DecisionStatus::Responded)).is_ok());
    }

    #[test]
    fn respond_rejected_after_finalization() {
        let err = ensure_can_respond(&decision_with(DecisionStatus::Finalized)).unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn finalize_requires_a_response() {
        let err =
            ensure_can_finalize(&decision_with(DecisionStatus::Proposed), false).unwrap_err();
        assert!(err.is_invalid_state());
        assert!(ensure_can_finalize(&decision_with(DecisionStatus::Responded), true).is_ok());
    }

    #[test]
    fn finalize_is_terminal() {
        let err = ensure_can_finalize(&decision_with(DecisionStatus::Finalized), true).unwrap_err();
        assert!(err.is_invalid_state());
    }
}
