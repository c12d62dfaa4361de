//! `/impression` administrator commands.
//!
//! Only configured admins get an answer; everyone else is ignored without a
//! reply. Relay toggles change the in-memory overrides and are lost on
//! restart.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{AppConfig, RuntimeOverrides};
use crate::traits::{ScoreBounds, StateStore};
use crate::utils::truncate_str;

const COMMAND_PREFIX: &str = "/impression";

const USAGE: &str = "Usage:\n\
    /impression view <user_id>\n\
    /impression set <user_id> <score>\n\
    /impression list\n\
    /impression roll on|off|status\n\
    /impression rollshow on|off|status";

pub struct AdminConsole {
    store: Arc<dyn StateStore>,
    overrides: Arc<RuntimeOverrides>,
    admins: Vec<String>,
    bounds: ScoreBounds,
    enabled: bool,
}

impl AdminConsole {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn StateStore>,
        overrides: Arc<RuntimeOverrides>,
    ) -> Self {
        Self {
            store,
            overrides,
            admins: config.permissions.admin.clone(),
            bounds: ScoreBounds::from(&config.affection),
            enabled: config.features.enable_commands,
        }
    }

    pub fn is_admin(&self, platform: &str, user_id: &str) -> bool {
        let qualified = format!("{}:{}", platform, user_id);
        self.admins
            .iter()
            .map(|a| a.trim())
            .any(|a| a == user_id || a == qualified)
    }

    /// Reply text for a command, or `None` when the message is not ours to
    /// answer.
    pub async fn handle(&self, platform: &str, user_id: &str, text: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let mut words = text.split_whitespace();
        if words.next() != Some(COMMAND_PREFIX) {
            return None;
        }
        if !self.is_admin(platform, user_id) {
            debug!(platform, user_id, "Ignoring admin command from non-admin");
            return None;
        }

        let args: Vec<&str> = words.collect();
        let reply = match args.as_slice() {
            ["view" | "v", id] => self.view(id).await,
            ["set" | "s", id, score] => match score.parse::<f64>() {
                Ok(score) => self.set_score(id, score).await,
                Err(_) => Ok(format!("Not a number: {}", score)),
            },
            ["list" | "ls"] => self.list().await,
            ["roll", mode] => Ok(self.toggle_relay(mode)),
            ["rollshow", mode] => Ok(self.toggle_tag(mode)),
            _ => Ok(USAGE.to_string()),
        };

        Some(reply.unwrap_or_else(|e| {
            warn!(error = %e, "Admin command failed");
            format!("Command failed: {}", e)
        }))
    }

    pub async fn view(&self, subject_id: &str) -> anyhow::Result<String> {
        let Some(state) = self.store.get_user_state(subject_id).await? else {
            return Ok(format!("No impression recorded for {}", subject_id));
        };
        let profile = if state.profile.is_empty() {
            "(none yet)".to_string()
        } else {
            state.profile.clone()
        };
        let mut out = format!(
            "Subject: {}\nScore: {:.1}/{:.0} ({})\nProfile updates: {}\nUpdated: {}\nProfile: {}",
            state.subject_id,
            state.score,
            self.bounds.max,
            state.level,
            state.message_count,
            state.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            profile
        );
        if let Some(ms) = self.store.get_message_state(subject_id).await? {
            out.push_str(&format!(
                "\nLast turn: {} (profile {}, score {}), {} settled in total",
                ms.last_message_id,
                if ms.last_profile_updated { "updated" } else { "unchanged" },
                if ms.last_score_updated { "updated" } else { "unchanged" },
                ms.total_messages
            ));
        }
        Ok(out)
    }

    pub async fn set_score(&self, subject_id: &str, score: f64) -> anyhow::Result<String> {
        if !(self.bounds.min..=self.bounds.max).contains(&score) {
            return Ok(format!(
                "Score must be between {} and {}",
                self.bounds.min, self.bounds.max
            ));
        }
        let (state, created) = self.store.set_score(subject_id, score, self.bounds).await?;
        info!(subject = %subject_id, score = state.score, created, "Score set by admin");
        Ok(format!(
            "{} {}: score {:.1} ({})",
            if created { "Created" } else { "Updated" },
            state.subject_id,
            state.score,
            state.level
        ))
    }

    pub async fn list(&self) -> anyhow::Result<String> {
        let states = self.store.list_user_states().await?;
        if states.is_empty() {
            return Ok("No subjects recorded yet".to_string());
        }
        let mut out = format!("{} subject(s):", states.len());
        for s in &states {
            out.push_str(&format!(
                "\n{}  {:.1}  {}  {}",
                s.subject_id,
                s.score,
                s.level,
                truncate_str(&s.profile, 40)
            ));
        }
        Ok(out)
    }

    fn toggle_relay(&self, mode: &str) -> String {
        match mode {
            "on" => self.overrides.set_relay_enabled(true),
            "off" => self.overrides.set_relay_enabled(false),
            "status" => {}
            _ => return USAGE.to_string(),
        }
        info!(mode, "Action check toggle");
        format!(
            "Action check: {}{}",
            on_off(self.overrides.relay_enabled()),
            if mode == "status" { "" } else { " (until restart)" }
        )
    }

    fn toggle_tag(&self, mode: &str) -> String {
        match mode {
            "on" => self.overrides.set_show_roll_result(true),
            "off" => self.overrides.set_show_roll_result(false),
            "status" => {}
            _ => return USAGE.to_string(),
        }
        info!(mode, "Action check tag toggle");
        format!(
            "Action check tag: {}{}",
            on_off(self.overrides.show_roll_result()),
            if mode == "status" { "" } else { " (until restart)" }
        )
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}
