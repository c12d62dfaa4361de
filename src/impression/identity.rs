//! Turn identity: which subject a finished turn belongs to, what was said, and
//! the durable message id it maps to in the host's log.

use std::fmt;

use tracing::{debug, warn};

use crate::traits::{StateStore, TurnSource};
use crate::utils::unix_now;

/// Why a turn could not be attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityError {
    NoSubject,
    EmptyContent,
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::NoSubject => write!(f, "no subject id on the turn"),
            IdentityError::EmptyContent => write!(f, "turn has no text content"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Owned copy of everything the update pipeline needs from a host message.
///
/// Taken synchronously inside the hook so the detached worker never borrows
/// host data.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSnapshot {
    pub subject_id: String,
    pub text: String,
    pub timestamp: f64,
}

impl TurnSnapshot {
    pub fn capture(source: &dyn TurnSource) -> Result<Self, IdentityError> {
        let subject_id = [
            source.addressed_subject(),
            source.sender_subject(),
            source.raw_subject_field(),
            source.nested_subject(),
        ]
        .into_iter()
        .find_map(normalize_subject)
        .ok_or(IdentityError::NoSubject)?;

        let text = source
            .plain_text()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(IdentityError::EmptyContent)?;

        let timestamp = source.timestamp().unwrap_or_else(unix_now);

        Ok(Self {
            subject_id,
            text,
            timestamp,
        })
    }
}

fn normalize_subject(raw: Option<String>) -> Option<String> {
    let trimmed = raw?.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// A snapshot with its message id attached.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnIdentity {
    pub subject_id: String,
    pub message_id: String,
    pub text: String,
    pub timestamp: f64,
    /// False when the id is the `temp_` fallback.
    pub durable: bool,
}

/// Fallback id when the host log has no matching turn.
pub fn temp_message_id(subject_id: &str, timestamp: f64) -> String {
    format!("temp_{}_{}", subject_id, timestamp.floor() as i64)
}

/// Attach a message id to the snapshot. Never fails: a missing or broken
/// lookup degrades to the temporary id.
pub async fn resolve(store: &dyn StateStore, snapshot: TurnSnapshot) -> TurnIdentity {
    let looked_up = match store
        .lookup_message_id(&snapshot.subject_id, snapshot.timestamp)
        .await
    {
        Ok(found) => found,
        Err(e) => {
            warn!(subject = %snapshot.subject_id, error = %e, "Message id lookup failed");
            None
        }
    };

    let (message_id, durable) = match looked_up {
        Some(id) => {
            debug!(subject = %snapshot.subject_id, message_id = %id, "Resolved durable message id");
            (id, true)
        }
        None => {
            let id = temp_message_id(&snapshot.subject_id, snapshot.timestamp);
            warn!(
                subject = %snapshot.subject_id,
                message_id = %id,
                "No stored turn matches this timestamp; using a temporary message id"
            );
            (id, false)
        }
    };

    TurnIdentity {
        subject_id: snapshot.subject_id,
        message_id,
        text: snapshot.text,
        timestamp: snapshot.timestamp,
        durable,
    }
}
