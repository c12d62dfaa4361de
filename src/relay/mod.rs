//! Outcome context relay.
//!
//! Carries the planner's action-check decision across the host's lifecycle
//! for one conversation:
//!
//! * Point A (planning prompt): append the marker protocol, once per prompt.
//! * Point B (render prompt): parse the last marker, stash the decision,
//!   strip marker lines, append the outcome block.
//! * Point C (after render): stage a display tag from a live decision.
//! * Point D (before send): prefix the first text segment with the staged
//!   tag, then clear the conversation.
//!
//! All four points are synchronous and infallible. Every state lookup is
//! keyed by conversation and re-checks expiry.

pub mod marker;
pub mod store;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RuntimeOverrides;
use crate::traits::{HookMessage, HookOutcome, Segment, UserState};

pub use marker::{OutcomeDecision, RollResult};
pub use store::{Clock, ManualClock, OutcomeContext, PendingTag, RelayStore, SystemClock};

const DEFAULT_SCORE: f64 = 50.0;
const DEFAULT_LEVEL: &str = "neutral";

pub struct OutcomeRelay {
    store: Arc<RelayStore>,
    overrides: Arc<RuntimeOverrides>,
}

impl OutcomeRelay {
    pub fn new(store: Arc<RelayStore>, overrides: Arc<RuntimeOverrides>) -> Self {
        Self { store, overrides }
    }

    pub fn store(&self) -> &RelayStore {
        &self.store
    }

    /// Point A. `standing` is the subject's stored state, if any.
    pub fn augment_plan(&self, message: &HookMessage, standing: Option<&UserState>) -> HookOutcome {
        if !self.overrides.relay_enabled() {
            return HookOutcome::pass();
        }
        let Some(prompt) = message.llm_prompt.as_deref().filter(|p| !p.is_empty()) else {
            return HookOutcome::pass();
        };
        if prompt.contains(marker::SENTINEL) {
            return HookOutcome::pass();
        }

        let (score, level) = standing
            .map(|s| (s.score, s.level.as_str()))
            .unwrap_or((DEFAULT_SCORE, DEFAULT_LEVEL));
        let block = marker::instruction_block(
            &message.base_info.platform,
            message.base_info.user_id.as_deref().unwrap_or(""),
            score,
            level,
            self.overrides.show_roll_result(),
        );

        let mut modified = message.clone();
        modified.modify_llm_prompt(format!("{}\n\n{}", prompt.trim_end(), block));
        debug!(conversation = ?message.conversation_id(), "Action check protocol injected");
        HookOutcome::modified("action check protocol injected", modified)
    }

    /// Point B.
    pub fn augment_render(&self, message: &HookMessage) -> HookOutcome {
        if !self.overrides.relay_enabled() {
            return HookOutcome::pass();
        }
        let (Some(prompt), Some(conversation)) = (
            message.llm_prompt.as_deref().filter(|p| !p.is_empty()),
            message.conversation_id(),
        ) else {
            return HookOutcome::pass();
        };
        self.store.evict_expired(conversation);

        let Some(decision) = marker::parse_marker(prompt) else {
            self.store.drop_context(conversation);
            return HookOutcome::pass();
        };

        let block = marker::result_block(&decision);
        info!(
            conversation = %conversation,
            interaction = %decision.interaction,
            chance = decision.chance,
            result = %decision.result,
            "Action check decision captured"
        );
        self.store.put_context(conversation, decision);

        let cleaned = marker::strip_markers(prompt);
        let mut modified = message.clone();
        modified.modify_llm_prompt(format!("{}\n\n{}", cleaned.trim_end(), block));
        HookOutcome::modified("action check result injected", modified)
    }

    /// Point C. Never touches the message.
    pub fn stage_tag(&self, message: &HookMessage) -> HookOutcome {
        if !self.overrides.relay_enabled() || !self.overrides.show_roll_result() {
            return HookOutcome::pass();
        }
        let Some(conversation) = message.conversation_id() else {
            return HookOutcome::pass();
        };
        let Some(context) = self.store.context(conversation) else {
            return HookOutcome::pass();
        };

        let tag = marker::format_tag(context.decision.chance, context.decision.result);
        debug!(conversation = %conversation, tag = %tag, "Action check tag staged");
        self.store.put_tag(conversation, tag);
        HookOutcome::noted("action check tag staged")
    }

    /// Point D.
    pub fn apply_tag(&self, message: &HookMessage) -> HookOutcome {
        if !self.overrides.relay_enabled() || !self.overrides.show_roll_result() {
            return HookOutcome::pass();
        }
        let Some(conversation) = message.conversation_id() else {
            return HookOutcome::pass();
        };
        let Some(tag) = self.store.tag(conversation) else {
            return HookOutcome::pass();
        };
        let Some(index) = message.segments.iter().position(|s| s.as_text().is_some()) else {
            return HookOutcome::pass();
        };
        let text = message.segments[index].as_text().unwrap_or_default();

        if text.trim_start().starts_with(marker::TAG_GUARD) {
            self.store.clear(conversation);
            return HookOutcome::pass();
        }

        let mut segments = message.segments.clone();
        segments[index] = Segment::text(format!("{} {}", tag.text, text).trim_end());
        let mut modified = message.clone();
        modified.modify_segments(segments);
        self.store.clear(conversation);
        info!(conversation = %conversation, "Action check tag applied");
        HookOutcome::modified("action check tag applied", modified)
    }
}
