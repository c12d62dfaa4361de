use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub action_check: ActionCheckConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub weight: WeightConfig,
    #[serde(default)]
    pub affection: AffectionConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Upper bound for a single completion, including the HTTP round trip.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PermissionsConfig {
    /// Entries are either `platform:user_id` or a bare `user_id`.
    #[serde(default)]
    pub admin: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ActionCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub show_roll_result: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "rapport.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_hours_back")]
    pub hours_back: i64,
    /// Turns shorter than this (in characters, after trimming) never enter a window.
    #[serde(default = "default_min_message_length")]
    pub min_message_length: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_max_history_chars")]
    pub max_history_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            hours_back: default_hours_back(),
            min_message_length: default_min_message_length(),
            max_message_chars: default_max_message_chars(),
            max_history_chars: default_max_history_chars(),
        }
    }
}

fn default_max_messages() -> usize {
    20
}
fn default_hours_back() -> i64 {
    72
}
fn default_min_message_length() -> usize {
    5
}
fn default_max_message_chars() -> usize {
    500
}
fn default_max_history_chars() -> usize {
    2000
}

/// Which weight levels are allowed to trigger a state recomputation.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Every successfully evaluated turn passes.
    Disabled,
    /// Only `score >= high_threshold`.
    #[default]
    Selective,
    /// `score >= medium_threshold`.
    Balanced,
}

impl FilterMode {
    pub fn accepts(self, score: f64, high_threshold: f64, medium_threshold: f64) -> bool {
        match self {
            FilterMode::Disabled => true,
            FilterMode::Selective => score >= high_threshold,
            FilterMode::Balanced => score >= medium_threshold,
        }
    }
}

impl std::fmt::Display for FilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterMode::Disabled => write!(f, "disabled"),
            FilterMode::Selective => write!(f, "selective"),
            FilterMode::Balanced => write!(f, "balanced"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeightConfig {
    #[serde(default)]
    pub filter_mode: FilterMode,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
    #[serde(default = "default_evaluation_prompt")]
    pub evaluation_prompt: String,
    /// Size of the in-memory evaluation log kept for inspection.
    #[serde(default = "default_max_weight_records")]
    pub max_records: usize,
    /// Dedicated model for weight evaluation. Falls back to `[llm]` when unset.
    #[serde(default)]
    pub custom_model: Option<LlmConfig>,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            filter_mode: FilterMode::default(),
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
            evaluation_prompt: default_evaluation_prompt(),
            max_records: default_max_weight_records(),
            custom_model: None,
        }
    }
}

fn default_high_threshold() -> f64 {
    70.0
}
fn default_medium_threshold() -> f64 {
    40.0
}
fn default_max_weight_records() -> usize {
    100
}
fn default_evaluation_prompt() -> String {
    "Rate from 0 to 100 how much the current message is worth remembering about the user, \
     judged together with the conversation context. High (70-100): personal information, \
     interests, values, emotional expression, deeper thoughts, distinctive opinions, life \
     experiences. Medium (40-69): everyday chat, simple questions, factual statements. \
     Low (0-39): greetings, pleasantries, emoji-only or content-free replies. Sharing \
     personal preferences, asking about the other side's preferences and stating personal \
     views all deserve a higher weight. Reply with key-value pairs only: \
     WEIGHT_SCORE: <score>; WEIGHT_LEVEL: high/medium/low; REASON: <reason>; \
     Current message: {message}; Conversation context: {context}"
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AffectionConfig {
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
    #[serde(default = "default_initial_score")]
    pub initial_score: f64,
    #[serde(default = "default_friendly_increment")]
    pub friendly_increment: f64,
    #[serde(default = "default_neutral_increment")]
    pub neutral_increment: f64,
    #[serde(default = "default_negative_increment")]
    pub negative_increment: f64,
}

impl Default for AffectionConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            max_score: default_max_score(),
            initial_score: default_initial_score(),
            friendly_increment: default_friendly_increment(),
            neutral_increment: default_neutral_increment(),
            negative_increment: default_negative_increment(),
        }
    }
}

fn default_min_score() -> f64 {
    0.0
}
fn default_max_score() -> f64 {
    100.0
}
fn default_initial_score() -> f64 {
    50.0
}
fn default_friendly_increment() -> f64 {
    2.0
}
fn default_neutral_increment() -> f64 {
    0.5
}
fn default_negative_increment() -> f64 {
    -3.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptsConfig {
    #[serde(default = "default_profile_template")]
    pub profile_template: String,
    #[serde(default = "default_affection_template")]
    pub affection_template: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            profile_template: default_profile_template(),
            affection_template: default_affection_template(),
        }
    }
}

fn default_profile_template() -> String {
    "Write an impression of the user based on the conversation. \
     Existing impression: {existing_profile} Conversation history: {history_context} \
     Current message: {message} Distil the core personality traits and behavioural \
     patterns. Keep it objective, short and direct, avoid clinical jargon, and keep what \
     makes this user distinctive. Around 100 words."
        .to_string()
}

fn default_affection_template() -> String {
    "You are a pragmatics analyst. Classify the message strictly as friendly, neutral or \
     negative. Friendly: explicit positive emotion (fondness, excitement, gratitude), \
     affectionate address, humour or emoticons; bare politeness such as hello/thanks with \
     no emotional colour is not friendly. Neutral: objective statements, task requests, \
     confirmations. Negative: hostility, anger, sarcasm, impatience or harsh criticism. \
     Reply as: TYPE: friendly/neutral/negative; REASON: <reason>; Message: {message}"
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub auto_update: bool,
    #[serde(default = "default_true")]
    pub enable_commands: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            auto_update: true,
            enable_commands: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Turns waiting for the update worker. Submissions beyond this are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let w = &self.weight;
        if !(0.0..=100.0).contains(&w.medium_threshold)
            || !(0.0..=100.0).contains(&w.high_threshold)
        {
            anyhow::bail!("weight thresholds must lie within 0-100");
        }
        if w.medium_threshold > w.high_threshold {
            anyhow::bail!(
                "weight.medium_threshold ({}) must not exceed weight.high_threshold ({})",
                w.medium_threshold,
                w.high_threshold
            );
        }

        let a = &self.affection;
        if a.min_score >= a.max_score {
            anyhow::bail!("affection.min_score must be below affection.max_score");
        }
        if a.initial_score < a.min_score || a.initial_score > a.max_score {
            anyhow::bail!("affection.initial_score must lie within the score bounds");
        }
        if a.friendly_increment < 0.0 || a.neutral_increment < 0.0 {
            anyhow::bail!("friendly and neutral increments must not be negative");
        }
        if a.negative_increment >= 0.0 {
            anyhow::bail!("affection.negative_increment must be negative");
        }

        let h = &self.history;
        if h.max_messages == 0 || h.max_message_chars == 0 || h.max_history_chars == 0 {
            anyhow::bail!("history limits must be greater than zero");
        }
        if self.worker.queue_capacity == 0 {
            anyhow::bail!("worker.queue_capacity must be greater than zero");
        }
        if self.llm.request_timeout_secs == 0 {
            anyhow::bail!("llm.request_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

/// Process-lifetime overrides for the relay toggles. Seeded from config at
/// startup, flipped by admin commands, never written back to disk.
#[derive(Debug)]
pub struct RuntimeOverrides {
    relay_enabled: AtomicBool,
    show_roll_result: AtomicBool,
}

impl RuntimeOverrides {
    pub fn new(action_check: &ActionCheckConfig) -> Self {
        Self {
            relay_enabled: AtomicBool::new(action_check.enabled),
            show_roll_result: AtomicBool::new(action_check.show_roll_result),
        }
    }

    pub fn relay_enabled(&self) -> bool {
        self.relay_enabled.load(Ordering::Relaxed)
    }

    pub fn set_relay_enabled(&self, enabled: bool) {
        self.relay_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn show_roll_result(&self) -> bool {
        self.show_roll_result.load(Ordering::Relaxed)
    }

    pub fn set_show_roll_result(&self, enabled: bool) {
        self.show_roll_result.store(enabled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.weight.filter_mode, FilterMode::Selective);
        assert_eq!(config.weight.high_threshold, 70.0);
        assert_eq!(config.history.max_messages, 20);
        assert_eq!(config.affection.negative_increment, -3.0);
        assert!(!config.action_check.enabled);
        assert!(config.features.auto_update);
    }

    #[test]
    fn parses_sections() {
        let raw = r#"
            [action_check]
            enabled = true
            show_roll_result = true

            [weight]
            filter_mode = "balanced"
            high_threshold = 75.0

            [weight.custom_model]
            model = "weight-mini"

            [permissions]
            admin = ["qq:10001", "42"]
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.weight.filter_mode, FilterMode::Balanced);
        assert_eq!(config.weight.high_threshold, 75.0);
        assert_eq!(config.weight.medium_threshold, 40.0);
        assert_eq!(
            config.weight.custom_model.as_ref().map(|m| m.model.as_str()),
            Some("weight-mini")
        );
        assert_eq!(config.permissions.admin.len(), 2);
        assert!(config.action_check.show_roll_result);
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let mut config = AppConfig::default();
        config.weight.medium_threshold = 80.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_positive_negative_increment() {
        let mut config = AppConfig::default();
        config.affection.negative_increment = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn filter_modes_gate_on_thresholds() {
        assert!(FilterMode::Disabled.accepts(0.0, 70.0, 40.0));
        assert!(!FilterMode::Selective.accepts(69.0, 70.0, 40.0));
        assert!(FilterMode::Selective.accepts(70.0, 70.0, 40.0));
        assert!(FilterMode::Balanced.accepts(40.0, 70.0, 40.0));
        assert!(!FilterMode::Balanced.accepts(39.9, 70.0, 40.0));
    }

    #[test]
    fn overrides_do_not_touch_config() {
        let cfg = ActionCheckConfig {
            enabled: false,
            show_roll_result: false,
        };
        let overrides = RuntimeOverrides::new(&cfg);
        overrides.set_relay_enabled(true);
        overrides.set_show_roll_result(true);
        assert!(overrides.relay_enabled());
        assert!(overrides.show_roll_result());
        assert!(!cfg.enabled);
    }
}
