//! Turn reconciliation state machine.
//!
//! Coalesces interleaved, incrementally arriving transcription fragments into
//! discrete conversation turns and derives the side effects each transition
//! demands. The machine is pure — it mutates only the log it is given and
//! returns [`Effect`]s for the caller to apply — so every rule is testable
//! without a runtime.
//!
//! ## Reconciliation rule
//!
//! A fragment for role R appends to the log's last turn iff that turn has
//! role R and is not yet final; otherwise a brand-new turn is appended. Only
//! the tail of the log is ever eligible for mutation.

use super::log::{ConversationLog, ConversationTurn, Role};

/// Side effects demanded by a state transition, applied by the director.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Gate/ungate the microphone and drive the speaking indicator.
    SetAgentSpeaking(bool),
    /// A fresh user turn began — any armed response countdown is moot.
    CancelResponseTimer,
    /// The agent asked a question — start the response-window countdown.
    ArmResponseTimer,
    /// Request a companion illustration for the finalized turn text.
    RequestIllustration(String),
}

/// Whether a fragment for `role` would start a new turn rather than extend
/// the tail.
fn starts_new_turn(log: &ConversationLog, role: Role) -> bool {
    !matches!(log.tail(), Some(tail) if tail.role == role && !tail.is_final)
}

/// Apply one transcription fragment for `role`.
///
/// Fragments are processed in arrival order; a fragment may itself carry the
/// finalizing flag, closing the turn it lands in.
pub fn apply_transcription(
    log: &mut ConversationLog,
    role: Role,
    text: &str,
    is_final: bool,
) -> Vec<Effect> {
    let mut effects = Vec::new();

    if starts_new_turn(log, role) {
        match role {
            // A user speaking up cancels the response countdown immediately,
            // before the fragment even lands in the log.
            Role::User => effects.push(Effect::CancelResponseTimer),
            // The agent's first fragment flips the speaking gate on.
            Role::Agent => effects.push(Effect::SetAgentSpeaking(true)),
            Role::System => {}
        }
        log.push(ConversationTurn::new(role, text, is_final));
    } else {
        log.extend_tail(text, is_final);
    }

    effects
}

/// Apply a turn-complete signal: finalize the non-final tail turn.
///
/// Idempotent — a signal with no non-final tail is a no-op, so duplicate
/// signals can never double side effects.
pub fn apply_turn_complete(log: &mut ConversationLog) -> Vec<Effect> {
    if !log.finalize_tail() {
        return Vec::new();
    }

    let Some(tail) = log.tail() else {
        return Vec::new();
    };
    let mut effects = Vec::new();

    if tail.role == Role::Agent && !tail.text.is_empty() {
        effects.push(Effect::SetAgentSpeaking(false));
        effects.push(Effect::RequestIllustration(tail.text.clone()));
        if tail.text.trim().ends_with('?') {
            effects.push(Effect::ArmResponseTimer);
        }
    }

    effects
}
