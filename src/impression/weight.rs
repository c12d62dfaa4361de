//! Signal-weight evaluation: how much a turn is worth folding into the
//! subject's long-term state, and whether the configured filter lets it through.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::WeightConfig;
use crate::traits::TextGenerator;
use crate::types::WeightLevel;
use crate::utils::{fill_template, truncate_str};

static SCORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)WEIGHT_SCORE\s*[:：]\s*(-?\d+(?:\.\d+)?)")
        .expect("weight score regex should compile")
});

static REASON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)REASON\s*[:：]\s*([^;\r\n]*)").expect("weight reason regex should compile")
});

#[derive(Debug, Clone, PartialEq)]
pub enum WeightVerdict {
    Scored {
        score: f64,
        level: WeightLevel,
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl WeightVerdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, WeightVerdict::Scored { .. })
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            WeightVerdict::Scored { score, .. } => Some(*score),
            WeightVerdict::Failed { .. } => None,
        }
    }
}

/// One successful evaluation, kept for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct WeightRecord {
    pub subject_id: String,
    pub message_id: String,
    pub score: f64,
    pub level: WeightLevel,
    pub reason: String,
    pub evaluated_at: DateTime<Utc>,
}

/// Bounded FIFO log of recent evaluations. Never consulted for gating.
pub struct WeightCache {
    records: Mutex<VecDeque<WeightRecord>>,
    capacity: usize,
}

impl WeightCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn push(&self, record: WeightRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<WeightRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse `WEIGHT_SCORE: <n>; ...; REASON: <text>`. The level the model
/// reports is ignored; it is recomputed from the thresholds.
pub fn parse_weight_response(
    response: &str,
    high_threshold: f64,
    medium_threshold: f64,
) -> WeightVerdict {
    let Some(raw) = SCORE_RE
        .captures(response)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    else {
        return WeightVerdict::Failed {
            reason: format!("no WEIGHT_SCORE in response: {}", truncate_str(response, 120)),
        };
    };

    let score = raw.clamp(0.0, 100.0);
    let reason = REASON_RE
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    WeightVerdict::Scored {
        score,
        level: WeightLevel::bucket(score, high_threshold, medium_threshold),
        reason,
    }
}

pub struct WeightEvaluator {
    generator: Arc<dyn TextGenerator>,
    config: WeightConfig,
    cache: WeightCache,
}

impl WeightEvaluator {
    pub fn new(generator: Arc<dyn TextGenerator>, config: WeightConfig) -> Self {
        let cache = WeightCache::new(config.max_records);
        Self {
            generator,
            config,
            cache,
        }
    }

    pub fn cache(&self) -> &WeightCache {
        &self.cache
    }

    pub async fn evaluate(
        &self,
        subject_id: &str,
        message_id: &str,
        message_text: &str,
        context: &str,
    ) -> WeightVerdict {
        if context.trim().is_empty() {
            return WeightVerdict::Failed {
                reason: "empty context".to_string(),
            };
        }

        let prompt = fill_template(
            &self.config.evaluation_prompt,
            &[("message", message_text), ("context", context)],
        );
        let response = match self.generator.complete(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!(subject = %subject_id, message_id = %message_id, error = %e, "Weight evaluation call failed");
                return WeightVerdict::Failed {
                    reason: format!("generation failed: {}", e),
                };
            }
        };

        let verdict = parse_weight_response(
            &response,
            self.config.high_threshold,
            self.config.medium_threshold,
        );
        match &verdict {
            WeightVerdict::Scored {
                score,
                level,
                reason,
            } => {
                info!(
                    subject = %subject_id,
                    message_id = %message_id,
                    score = *score,
                    level = %level,
                    model = self.generator.model_name(),
                    "Weight evaluated"
                );
                self.cache.push(WeightRecord {
                    subject_id: subject_id.to_string(),
                    message_id: message_id.to_string(),
                    score: *score,
                    level: *level,
                    reason: reason.clone(),
                    evaluated_at: Utc::now(),
                });
            }
            WeightVerdict::Failed { reason } => {
                warn!(subject = %subject_id, message_id = %message_id, reason = %reason, "Weight response unusable");
            }
        }
        verdict
    }

    /// Gating decision. Failed evaluations never pass.
    pub fn accepts(&self, verdict: &WeightVerdict) -> bool {
        let Some(score) = verdict.score() else {
            return false;
        };
        let accepted = self.config.filter_mode.accepts(
            score,
            self.config.high_threshold,
            self.config.medium_threshold,
        );
        debug!(
            mode = %self.config.filter_mode,
            score,
            high = self.config.high_threshold,
            medium = self.config.medium_threshold,
            accepted,
            "Weight gate"
        );
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterMode;
    use crate::testing::{MockGenerator, WEIGHT_PROMPT};

    #[test]
    fn parses_ascii_and_full_width_colons() {
        let v = parse_weight_response(
            "WEIGHT_SCORE: 82; WEIGHT_LEVEL: high; REASON: shares a personal story",
            70.0,
            40.0,
        );
        assert_eq!(
            v,
            WeightVerdict::Scored {
                score: 82.0,
                level: WeightLevel::High,
                reason: "shares a personal story".into()
            }
        );

        let v = parse_weight_response("WEIGHT_SCORE：45.5\nREASON：small talk", 70.0, 40.0);
        assert_eq!(v.score(), Some(45.5));
        assert!(matches!(v, WeightVerdict::Scored { level: WeightLevel::Medium, .. }));
    }

    #[test]
    fn reported_level_is_ignored_and_score_clamped() {
        let v = parse_weight_response("WEIGHT_SCORE: 140; WEIGHT_LEVEL: low", 70.0, 40.0);
        assert_eq!(v.score(), Some(100.0));
        assert!(matches!(v, WeightVerdict::Scored { level: WeightLevel::High, .. }));
    }

    #[test]
    fn missing_score_fails_instead_of_defaulting() {
        let v = parse_weight_response("WEIGHT_LEVEL: high; REASON: great", 70.0, 40.0);
        assert!(!v.is_ok());
        assert_eq!(v.score(), None);
    }

    #[test]
    fn cache_evicts_oldest_first() {
        let cache = WeightCache::new(2);
        for id in ["m1", "m2", "m3"] {
            cache.push(WeightRecord {
                subject_id: "u1".into(),
                message_id: id.into(),
                score: 50.0,
                level: WeightLevel::Medium,
                reason: String::new(),
                evaluated_at: Utc::now(),
            });
        }
        let ids: Vec<String> = cache.snapshot().into_iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn empty_context_skips_the_generator() {
        let mock = Arc::new(MockGenerator::new().reply_when(WEIGHT_PROMPT, "WEIGHT_SCORE: 90"));
        let evaluator = WeightEvaluator::new(mock.clone(), WeightConfig::default());

        let v = evaluator.evaluate("u1", "m1", "hello", "   ").await;
        assert!(!v.is_ok());
        assert_eq!(mock.call_count().await, 0);
    }

    #[tokio::test]
    async fn selective_gate_is_inclusive_at_high_threshold() {
        for (reply, expected) in [("WEIGHT_SCORE: 69", false), ("WEIGHT_SCORE: 70", true)] {
            let mock = Arc::new(MockGenerator::new().reply_when(WEIGHT_PROMPT, reply));
            let config = WeightConfig {
                filter_mode: FilterMode::Selective,
                high_threshold: 70.0,
                ..WeightConfig::default()
            };
            let evaluator = WeightEvaluator::new(mock, config);
            let v = evaluator.evaluate("u1", "m1", "msg", "[01-01 00:00] ctx").await;
            assert_eq!(evaluator.accepts(&v), expected, "reply {reply}");
            assert_eq!(evaluator.cache().len(), 1);
        }
    }

    #[tokio::test]
    async fn placeholder_in_message_is_sent_verbatim() {
        let mock = Arc::new(MockGenerator::new().reply_when(WEIGHT_PROMPT, "WEIGHT_SCORE: 10"));
        let evaluator = WeightEvaluator::new(mock.clone(), WeightConfig::default());

        evaluator
            .evaluate("u1", "m1", "what is {context}?", "[01-01 00:00] earlier chat")
            .await;
        assert_eq!(mock.calls_containing("what is {context}?").await, 1);
        assert_eq!(mock.calls_containing("what is [01-01").await, 0);
    }

    #[tokio::test]
    async fn generator_failure_is_a_failed_verdict() {
        let mock = Arc::new(MockGenerator::new().fail_when(WEIGHT_PROMPT, "timeout"));
        let evaluator = WeightEvaluator::new(
            mock,
            WeightConfig {
                filter_mode: FilterMode::Disabled,
                ..WeightConfig::default()
            },
        );
        let v = evaluator.evaluate("u1", "m1", "msg", "ctx").await;
        assert!(!v.is_ok());
        // Even the permissive mode rejects a failed evaluation.
        assert!(!evaluator.accepts(&v));
        assert!(evaluator.cache().is_empty());
    }
}
