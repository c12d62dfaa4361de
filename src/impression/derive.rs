//! The two derivation paths fed by a gated turn: the qualitative profile and
//! the affection score. They share nothing but the store, and neither can
//! fail the other.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::config::AffectionConfig;
use crate::traits::{ScoreBounds, StateStore, TextGenerator};
use crate::types::Register;
use crate::utils::{fill_template, truncate_str};

static REGISTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)TYPE\s*[:：]\s*(friendly|neutral|negative)")
        .expect("register regex should compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationReport {
    pub ok: bool,
    pub detail: String,
}

impl DerivationReport {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait DerivationPath: Send + Sync {
    fn name(&self) -> &'static str;

    /// Best effort. Failures come back as `ok = false`, never as errors.
    async fn derive(&self, subject_id: &str, message_text: &str, context: &str)
        -> DerivationReport;
}

/// Rewrites the subject's free-text impression.
pub struct ProfilePath {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn StateStore>,
    template: String,
    bounds: ScoreBounds,
}

impl ProfilePath {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn StateStore>,
        template: String,
        bounds: ScoreBounds,
    ) -> Self {
        Self {
            generator,
            store,
            template,
            bounds,
        }
    }
}

#[async_trait]
impl DerivationPath for ProfilePath {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn derive(
        &self,
        subject_id: &str,
        message_text: &str,
        context: &str,
    ) -> DerivationReport {
        let existing = match self.store.get_user_state(subject_id).await {
            Ok(state) => state.map(|s| s.profile).unwrap_or_default(),
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Failed to load existing profile");
                return DerivationReport::failure(format!("store read failed: {}", e));
            }
        };

        let prompt = fill_template(
            &self.template,
            &[
                ("existing_profile", existing.as_str()),
                ("history_context", context),
                ("message", message_text),
            ],
        );
        let profile = match self.generator.complete(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Profile generation failed");
                return DerivationReport::failure(format!("generation failed: {}", e));
            }
        };
        if profile.is_empty() {
            warn!(subject = %subject_id, "Profile generation returned nothing");
            return DerivationReport::failure("empty profile");
        }

        match self.store.set_profile(subject_id, &profile, self.bounds).await {
            Ok(state) => {
                info!(subject = %subject_id, turns = state.message_count, "Profile updated");
                DerivationReport::success(truncate_str(&profile, 80))
            }
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Failed to persist profile");
                DerivationReport::failure(format!("store write failed: {}", e))
            }
        }
    }
}

/// Nudges the affection score by the register of the turn.
pub struct ScorePath {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn StateStore>,
    template: String,
    affection: AffectionConfig,
}

impl ScorePath {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn StateStore>,
        template: String,
        affection: AffectionConfig,
    ) -> Self {
        Self {
            generator,
            store,
            template,
            affection,
        }
    }
}

pub fn parse_register(response: &str) -> Option<Register> {
    REGISTER_RE
        .captures(response)
        .and_then(|c| c.get(1))
        .and_then(|m| Register::parse(m.as_str()))
}

pub fn increment_for(register: Register, affection: &AffectionConfig) -> f64 {
    match register {
        Register::Friendly => affection.friendly_increment,
        Register::Neutral => affection.neutral_increment,
        Register::Negative => affection.negative_increment,
    }
}

#[async_trait]
impl DerivationPath for ScorePath {
    fn name(&self) -> &'static str {
        "score"
    }

    async fn derive(
        &self,
        subject_id: &str,
        message_text: &str,
        _context: &str,
    ) -> DerivationReport {
        let prompt = fill_template(&self.template, &[("message", message_text)]);
        let response = match self.generator.complete(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Register classification failed");
                return DerivationReport::failure(format!("generation failed: {}", e));
            }
        };
        let Some(register) = parse_register(&response) else {
            warn!(subject = %subject_id, response = %truncate_str(&response, 120), "Unrecognised register");
            return DerivationReport::failure("no TYPE in response");
        };

        let delta = increment_for(register, &self.affection);
        let bounds = ScoreBounds::from(&self.affection);
        match self.store.apply_score_delta(subject_id, delta, bounds).await {
            Ok(state) => {
                info!(
                    subject = %subject_id,
                    register = %register,
                    delta,
                    score = state.score,
                    level = %state.level,
                    "Affection updated"
                );
                DerivationReport::success(format!(
                    "{} {:+.1} -> {:.1} ({})",
                    register, delta, state.score, state.level
                ))
            }
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Failed to persist score");
                DerivationReport::failure(format!("store write failed: {}", e))
            }
        }
    }
}
