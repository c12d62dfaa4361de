//! Read-only history window over the host's conversation log.
//!
//! The window is the unit the weight evaluator and the profile path look at:
//! recent turns of one subject that have not been folded into an earlier
//! window, oldest first, within the configured character budgets. Marking the
//! returned ids as processed is the caller's job.

use std::sync::Arc;

use chrono::DateTime;

use crate::config::HistoryConfig;
use crate::traits::{StateStore, StoredTurn};
use crate::utils::{truncate_head, truncate_str, unix_now};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Window {
    /// Newline-joined `"[MM-DD HH:MM] text"` lines, oldest first.
    pub context: String,
    /// Every turn selected for this window, oldest first.
    pub message_ids: Vec<String>,
}

impl Window {
    pub fn is_empty(&self) -> bool {
        self.context.trim().is_empty()
    }
}

#[derive(Clone)]
pub struct HistoryWindow {
    store: Arc<dyn StateStore>,
    config: HistoryConfig,
}

impl HistoryWindow {
    pub fn new(store: Arc<dyn StateStore>, config: HistoryConfig) -> Self {
        Self { store, config }
    }

    pub fn default_limit(&self) -> usize {
        self.config.max_messages
    }

    pub async fn get_window(&self, subject_id: &str, limit: usize) -> anyhow::Result<Window> {
        let since = unix_now() - (self.config.hours_back as f64) * 3600.0;
        let candidates = self.store.unprocessed_turns_since(subject_id, since).await?;
        Ok(build_window(&self.config, candidates, limit))
    }
}

/// `candidates` arrive newest first.
fn build_window(config: &HistoryConfig, candidates: Vec<StoredTurn>, limit: usize) -> Window {
    let mut selected: Vec<StoredTurn> = candidates
        .into_iter()
        .filter(|t| t.text.trim().chars().count() >= config.min_message_length.max(1))
        .take(limit)
        .collect();
    selected.reverse();

    let message_ids = selected.iter().map(|t| t.id.clone()).collect();
    let mut lines: Vec<String> = selected
        .iter()
        .map(|t| {
            format!(
                "[{}] {}",
                format_turn_time(t.timestamp),
                truncate_str(t.text.trim(), config.max_message_chars)
            )
        })
        .collect();

    let budget = config.max_history_chars;
    while lines.len() > 1 && joined_chars(&lines) > budget {
        lines.remove(0);
    }
    if let [only] = lines.as_mut_slice() {
        *only = truncate_head(only, budget);
    }

    Window {
        context: lines.join("\n"),
        message_ids,
    }
}

fn joined_chars(lines: &[String]) -> usize {
    let text: usize = lines.iter().map(|l| l.chars().count()).sum();
    text + lines.len().saturating_sub(1)
}

fn format_turn_time(timestamp: f64) -> String {
    let secs = timestamp.floor() as i64;
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "??-?? ??:??".to_string())
}
