//! Host-facing entry points.
//!
//! Each lifecycle callback returns a `HookOutcome` and never fails: internal
//! errors and panics are logged and degrade to a pass-through.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::admin::AdminConsole;
use crate::config::{AppConfig, RuntimeOverrides};
use crate::impression::{TurnOutcome, TurnSnapshot, UpdateOrchestrator, UpdateWorker};
use crate::providers;
use crate::relay::{OutcomeRelay, RelayStore};
use crate::traits::{
    HookMessage, HookOutcome, StateStore, StoredTurn, TextGenerator, TurnSource, UserState,
};

pub struct RapportPlugin {
    config: Arc<AppConfig>,
    store: Arc<dyn StateStore>,
    overrides: Arc<RuntimeOverrides>,
    relay: OutcomeRelay,
    orchestrator: Arc<UpdateOrchestrator>,
    worker: Option<UpdateWorker>,
    admin: AdminConsole,
}

impl RapportPlugin {
    /// Must be called inside a Tokio runtime: the update worker is spawned
    /// here when `features.auto_update` is on.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn StateStore>,
        generator: Arc<dyn TextGenerator>,
        weight_generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        let overrides = Arc::new(RuntimeOverrides::new(&config.action_check));
        let relay = OutcomeRelay::new(Arc::new(RelayStore::default()), overrides.clone());
        let orchestrator = Arc::new(UpdateOrchestrator::new(
            &config,
            store.clone(),
            generator,
            weight_generator,
        ));
        let worker = config
            .features
            .auto_update
            .then(|| UpdateWorker::spawn(orchestrator.clone(), config.worker.queue_capacity));
        let admin = AdminConsole::new(&config, store.clone(), overrides.clone());

        info!(
            auto_update = config.features.auto_update,
            action_check = config.action_check.enabled,
            filter_mode = %config.weight.filter_mode,
            "Rapport plugin ready"
        );
        Self {
            config: Arc::new(config),
            store,
            overrides,
            relay,
            orchestrator,
            worker,
            admin,
        }
    }

    /// Build the generators from `[llm]` and `[weight.custom_model]`.
    pub fn from_config(config: AppConfig, store: Arc<dyn StateStore>) -> anyhow::Result<Self> {
        let generator = providers::build_generator(&config.llm)?;
        let weight_generator = config
            .weight
            .custom_model
            .as_ref()
            .map(providers::build_generator)
            .transpose()?;
        Ok(Self::new(config, store, generator, weight_generator))
    }

    /// Swap the relay state, e.g. for one driven by a manual clock.
    pub fn with_relay_store(mut self, store: Arc<RelayStore>) -> Self {
        self.relay = OutcomeRelay::new(store, self.overrides.clone());
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn overrides(&self) -> &RuntimeOverrides {
        &self.overrides
    }

    pub fn relay(&self) -> &OutcomeRelay {
        &self.relay
    }

    pub fn orchestrator(&self) -> &UpdateOrchestrator {
        &self.orchestrator
    }

    pub fn admin(&self) -> &AdminConsole {
        &self.admin
    }

    /// Settled and skipped turns, when the update pipeline is running.
    pub fn outcomes(&self) -> Option<broadcast::Receiver<TurnOutcome>> {
        self.worker.as_ref().map(UpdateWorker::subscribe)
    }

    /// Append an incoming user turn to the log the history window reads.
    pub async fn record_turn(&self, subject_id: &str, text: &str, timestamp: f64) -> Option<String> {
        let turn = StoredTurn::new(subject_id.trim(), text, timestamp);
        match self.store.append_turn(&turn).await {
            Ok(()) => Some(turn.id),
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Failed to record turn");
                None
            }
        }
    }

    /// Point A: planning prompt.
    pub async fn on_plan(&self, message: &HookMessage) -> HookOutcome {
        let standing = if self.overrides.relay_enabled() {
            self.load_standing(message).await
        } else {
            None
        };
        guarded("on_plan", || {
            self.relay.augment_plan(message, standing.as_ref())
        })
    }

    /// Point B: render prompt.
    pub fn on_post_llm(&self, message: &HookMessage) -> HookOutcome {
        guarded("on_post_llm", || self.relay.augment_render(message))
    }

    /// Point C, then hand the turn to the update worker.
    pub fn on_after_llm(&self, message: &HookMessage) -> HookOutcome {
        let outcome = guarded("on_after_llm", || self.relay.stage_tag(message));
        let queued = guarded_flag("on_after_llm", || self.queue_update(message));
        if queued && outcome.note.is_none() {
            return HookOutcome::noted("impression update queued");
        }
        outcome
    }

    /// Point D: outgoing segments.
    pub fn on_post_send(&self, message: &HookMessage) -> HookOutcome {
        guarded("on_post_send", || self.relay.apply_tag(message))
    }

    fn queue_update(&self, message: &HookMessage) -> bool {
        let Some(worker) = &self.worker else {
            return false;
        };
        match TurnSnapshot::capture(message) {
            Ok(snapshot) => worker.submit(snapshot),
            Err(e) => {
                warn!(conversation = ?message.conversation_id(), reason = %e, "Turn dropped before update");
                false
            }
        }
    }

    async fn load_standing(&self, message: &HookMessage) -> Option<UserState> {
        let subject = message.raw_subject_field()?;
        let subject = subject.trim();
        if subject.is_empty() {
            return None;
        }
        match self.store.get_user_state(subject).await {
            Ok(state) => state,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Failed to load standing for planner");
                None
            }
        }
    }
}

fn guarded(hook: &str, f: impl FnOnce() -> HookOutcome) -> HookOutcome {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => {
            if outcome.intercept {
                debug!(hook, note = ?outcome.note, "Hook modified message");
            }
            outcome
        }
        Err(_) => {
            error!(hook, "Hook panicked; passing message through");
            HookOutcome::pass()
        }
    }
}

fn guarded_flag(hook: &str, f: impl FnOnce() -> bool) -> bool {
    std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!(hook, "Update submission panicked");
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impression::TurnStage;
    use crate::relay::ManualClock;
    use crate::testing::{
        test_config, test_store, MockGenerator, AFFECTION_PROMPT, PROFILE_PROMPT, WEIGHT_PROMPT,
    };
    use crate::traits::store_prelude::*;
    use crate::traits::{BaseInfo, Segment, TurnRelation};
    use crate::utils::unix_now;
    use std::time::Duration;

    fn mock() -> Arc<MockGenerator> {
        Arc::new(
            MockGenerator::new()
                .reply_when(WEIGHT_PROMPT, "WEIGHT_SCORE: 91; REASON: personal")
                .reply_when(PROFILE_PROMPT, "Plays the cello and loves the sea.")
                .reply_when(AFFECTION_PROMPT, "TYPE: friendly"),
        )
    }

    fn config(relay: bool) -> AppConfig {
        let mut config = test_config();
        config.action_check.enabled = relay;
        config.action_check.show_roll_result = relay;
        config
    }

    fn reply(stream: &str, subject: &str, text: &str, time: f64) -> HookMessage {
        HookMessage {
            stream_id: Some(stream.into()),
            segments: vec![Segment::text(text)],
            base_info: BaseInfo {
                platform: "qq".into(),
                user_id: None,
                time: Some(time),
            },
            last_turn: Some(TurnRelation {
                sender_id: Some(subject.into()),
                reply_to_user_id: None,
            }),
            plain_text: Some(text.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn after_llm_queues_the_update_and_returns_immediately() {
        let (store, _f) = test_store().await;
        let gen = mock();
        let plugin = RapportPlugin::new(config(false), store.clone(), gen.clone(), None);
        let mut outcomes = plugin.outcomes().unwrap();

        let ts = unix_now() - 2.0;
        let id = plugin
            .record_turn("U1", "I play the cello every evening", ts)
            .await
            .unwrap();

        let out = plugin.on_after_llm(&reply("s1", "U1", "I play the cello every evening", ts));
        assert_eq!(
            out.into_tuple(),
            (true, false, Some("impression update queued".to_string()), None, None)
        );

        let settled = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.message_id, id);
        assert_eq!(settled.stage, TurnStage::Settled);
        let state = store.get_user_state("U1").await.unwrap().unwrap();
        assert_eq!(state.profile, "Plays the cello and loves the sea.");
        assert_eq!(state.score, 52.0);
    }

    #[tokio::test]
    async fn auto_update_off_means_no_worker() {
        let (store, _f) = test_store().await;
        let mut cfg = config(false);
        cfg.features.auto_update = false;
        let gen = mock();
        let plugin = RapportPlugin::new(cfg, store, gen.clone(), None);

        assert!(plugin.outcomes().is_none());
        let out = plugin.on_after_llm(&reply("s1", "U1", "hello there friend", unix_now()));
        assert_eq!(out.into_tuple(), (true, false, None, None, None));
        assert_eq!(gen.call_count().await, 0);
    }

    #[tokio::test]
    async fn unattributable_turn_is_dropped_quietly() {
        let (store, _f) = test_store().await;
        let plugin = RapportPlugin::new(config(false), store, mock(), None);
        let mut msg = reply("s1", "U1", "hello", unix_now());
        msg.last_turn = None;
        let out = plugin.on_after_llm(&msg);
        assert!(out.continue_processing);
        assert!(!out.intercept);
    }

    #[tokio::test]
    async fn plan_prompt_reports_stored_score() {
        let (store, _f) = test_store().await;
        let cfg = config(true);
        store
            .set_score("10001", 72.0, crate::traits::ScoreBounds::from(&cfg.affection))
            .await
            .unwrap();
        let plugin = RapportPlugin::new(cfg, store, mock(), None);

        let msg = HookMessage {
            stream_id: Some("s1".into()),
            llm_prompt: Some("plan".into()),
            base_info: BaseInfo {
                platform: "qq".into(),
                user_id: Some("10001".into()),
                time: None,
            },
            ..Default::default()
        };
        let out = plugin.on_plan(&msg).await;
        let prompt = out.message.unwrap().llm_prompt.unwrap();
        assert!(prompt.contains("affection_score: 72.0/100"));
        assert!(prompt.contains("affection_level: friendly"));
    }

    #[tokio::test]
    async fn from_config_rejects_plain_http_weight_model() {
        let (store, _f) = test_store().await;
        let mut cfg = config(false);
        assert!(RapportPlugin::from_config(cfg.clone(), store.clone()).is_ok());

        cfg.weight.custom_model = Some(crate::config::LlmConfig {
            base_url: "http://weights.example.com/v1".into(),
            ..Default::default()
        });
        assert!(RapportPlugin::from_config(cfg, store).is_err());
    }

    #[tokio::test]
    async fn full_lifecycle_tags_the_reply_once() {
        let (store, _f) = test_store().await;
        let clock = Arc::new(ManualClock::new(5_000.0));
        let plugin = RapportPlugin::new(config(true), store, mock(), None)
            .with_relay_store(Arc::new(RelayStore::new(clock)));

        let render = HookMessage {
            stream_id: Some("s1".into()),
            llm_prompt: Some(
                "reasoning\nACTION_CHECK_JSON: {\"interaction\":\"pat\",\"chance\":\"55\",\"result\":\"passed\"}"
                    .into(),
            ),
            ..Default::default()
        };
        assert!(plugin.on_post_llm(&render).intercept);

        let out = plugin.on_after_llm(&reply("s1", "U1", "*leans into the pat*", unix_now()));
        assert!(!out.intercept);

        let sent = plugin.on_post_send(&reply("s1", "U1", "*leans into the pat*", unix_now()));
        let msg = sent.message.unwrap();
        assert_eq!(
            msg.segments[0].as_text(),
            Some("[动作检定： 55% 成功] *leans into the pat*")
        );

        let again = plugin.on_post_send(&msg);
        assert!(again.message.is_none());
        assert!(plugin.relay().store().is_empty());
    }
}
