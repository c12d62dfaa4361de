use async_trait::async_trait;

use super::{MessageState, ScoreBounds, StoredTurn, UserState};

/// Subject state: profile, score and the per-subject settlement summary.
#[async_trait]
pub trait UserStateStore: Send + Sync {
    async fn get_user_state(&self, subject_id: &str) -> anyhow::Result<Option<UserState>>;

    /// Returns the state and whether it was created by this call.
    async fn get_or_create_user_state(
        &self,
        subject_id: &str,
        bounds: ScoreBounds,
    ) -> anyhow::Result<(UserState, bool)>;

    async fn list_user_states(&self) -> anyhow::Result<Vec<UserState>>;

    /// Overwrite the profile text and bump the processed-turn counter.
    async fn set_profile(
        &self,
        subject_id: &str,
        profile: &str,
        bounds: ScoreBounds,
    ) -> anyhow::Result<UserState>;

    /// Add `delta` to the score, clamped to `bounds`, and recompute the level.
    async fn apply_score_delta(
        &self,
        subject_id: &str,
        delta: f64,
        bounds: ScoreBounds,
    ) -> anyhow::Result<UserState>;

    /// Administrative override. Returns the state and whether it was created.
    async fn set_score(
        &self,
        subject_id: &str,
        score: f64,
        bounds: ScoreBounds,
    ) -> anyhow::Result<(UserState, bool)>;

    async fn get_message_state(&self, subject_id: &str) -> anyhow::Result<Option<MessageState>>;

    async fn update_message_state(
        &self,
        subject_id: &str,
        message_id: &str,
        profile_updated: bool,
        score_updated: bool,
    ) -> anyhow::Result<()>;
}

/// Append-only (subject, message id) ledger used for deduplication.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn is_message_processed(&self, subject_id: &str, message_id: &str)
        -> anyhow::Result<bool>;

    /// Idempotent: recording an existing pair is a no-op.
    async fn record_processed_message(&self, subject_id: &str, message_id: &str)
        -> anyhow::Result<()>;
}

/// The host's conversation log.
#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn append_turn(&self, turn: &StoredTurn) -> anyhow::Result<()>;

    /// Durable id of the subject's turn closest to `timestamp`, within one second.
    async fn lookup_message_id(
        &self,
        subject_id: &str,
        timestamp: f64,
    ) -> anyhow::Result<Option<String>>;

    /// Turns at or after `since` that are not in the ledger, newest first.
    async fn unprocessed_turns_since(
        &self,
        subject_id: &str,
        since: f64,
    ) -> anyhow::Result<Vec<StoredTurn>>;
}

/// Full state store facade.
///
/// Call sites hold `Arc<dyn StateStore>`; components that only need one
/// concern still name the focused trait in their bounds.
pub trait StateStore: Send + Sync + UserStateStore + LedgerStore + TurnStore {}

impl<T> StateStore for T where T: Send + Sync + UserStateStore + LedgerStore + TurnStore {}
