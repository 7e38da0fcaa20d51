//! Conversation log: append-only turn history with a mutable tail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

/// One contiguous utterance by a single role.
///
/// Grows by appended fragments while `is_final` is false; immutable once
/// finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>, is_final: bool) -> Self {
        Self {
            role,
            text: text.into(),
            is_final,
            timestamp: Utc::now(),
        }
    }
}

/// Ordered turn history. Insertion order is temporal order; only the tail
/// entry may be mutated, and only until it is finalized.
#[derive(Debug, Default)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recently appended turn.
    pub fn tail(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Append a brand-new turn at the tail.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Append a text fragment to the tail turn, optionally finalizing it.
    ///
    /// Callers must have checked that the tail exists and is not final; a
    /// violated invariant is a no-op rather than a panic.
    pub fn extend_tail(&mut self, fragment: &str, is_final: bool) {
        if let Some(tail) = self.turns.last_mut() {
            if tail.is_final {
                return;
            }
            tail.text.push_str(fragment);
            tail.is_final = is_final;
        }
    }

    /// Mark the tail turn final. Returns `true` when a turn transitioned;
    /// idempotent on an already-final tail and a no-op on an empty log.
    pub fn finalize_tail(&mut self) -> bool {
        match self.turns.last_mut() {
            Some(tail) if !tail.is_final => {
                tail.is_final = true;
                true
            }
            _ => false,
        }
    }

    /// Reset at the "new story" boundary.
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
