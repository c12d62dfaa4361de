use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AffectionLevel;

/// Long-term state tracked for one subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserState {
    pub subject_id: String,
    /// Free-text impression; empty until the first profile derivation.
    pub profile: String,
    pub score: f64,
    pub level: AffectionLevel,
    /// Turns whose profile derivation succeeded.
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-subject summary written when a turn settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageState {
    pub subject_id: String,
    pub total_messages: i64,
    pub last_message_id: String,
    pub last_profile_updated: bool,
    pub last_score_updated: bool,
    pub updated_at: DateTime<Utc>,
}

/// One turn of the host's conversation log, as visible to the history window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTurn {
    pub id: String,
    pub subject_id: String,
    pub text: String,
    /// Unix seconds, as reported by the host.
    pub timestamp: f64,
}

impl StoredTurn {
    pub fn new(subject_id: &str, text: &str, timestamp: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            text: text.to_string(),
            timestamp,
        }
    }
}

/// Inclusive bounds and starting point for affection scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBounds {
    pub min: f64,
    pub max: f64,
    pub initial: f64,
}

impl ScoreBounds {
    pub fn clamp(&self, score: f64) -> f64 {
        score.clamp(self.min, self.max)
    }
}

impl From<&crate::config::AffectionConfig> for ScoreBounds {
    fn from(cfg: &crate::config::AffectionConfig) -> Self {
        Self {
            min: cfg.min_score,
            max: cfg.max_score,
            initial: cfg.initial_score,
        }
    }
}

mod host;
mod provider;
mod state_store;

pub use host::*;
pub use provider::*;
pub use state_store::*;

/// Import this in modules that call store-trait methods on concrete types.
///
/// `StateStore` is a facade (supertrait) used for trait objects, but Rust still
/// requires the defining trait to be in scope for method-call syntax.
pub mod store_prelude {
    #![allow(unused_imports)]
    pub use super::{LedgerStore, StateStore, TurnStore, UserStateStore};
}
