use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::marker::OutcomeDecision;
use crate::utils::unix_now;

pub const CONTEXT_TTL_SECS: f64 = 120.0;
pub const PENDING_TAG_TTL_SECS: f64 = 60.0;

/// Time source for relay expiry.
pub trait Clock: Send + Sync {
    /// Unix seconds.
    fn now(&self) -> f64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        unix_now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeContext {
    pub conversation_id: String,
    pub decision: OutcomeDecision,
    pub created_at: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingTag {
    pub text: String,
    pub created_at: f64,
}

/// Per-conversation relay state. Entries expire lazily: every read first
/// drops whatever is older than its TTL for that conversation.
pub struct RelayStore {
    contexts: Mutex<HashMap<String, OutcomeContext>>,
    tags: Mutex<HashMap<String, PendingTag>>,
    clock: Arc<dyn Clock>,
}

impl Default for RelayStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RelayStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn evict_expired(&self, conversation_id: &str) {
        let now = self.clock.now();
        {
            let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
            if contexts
                .get(conversation_id)
                .is_some_and(|c| now - c.created_at > CONTEXT_TTL_SECS)
            {
                contexts.remove(conversation_id);
            }
        }
        let mut tags = self.tags.lock().unwrap_or_else(|e| e.into_inner());
        if tags
            .get(conversation_id)
            .is_some_and(|t| now - t.created_at > PENDING_TAG_TTL_SECS)
        {
            tags.remove(conversation_id);
        }
    }

    /// Last writer wins.
    pub fn put_context(&self, conversation_id: &str, decision: OutcomeDecision) {
        let context = OutcomeContext {
            conversation_id: conversation_id.to_string(),
            decision,
            created_at: self.clock.now(),
        };
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conversation_id.to_string(), context);
    }

    pub fn context(&self, conversation_id: &str) -> Option<OutcomeContext> {
        self.evict_expired(conversation_id);
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(conversation_id)
            .cloned()
    }

    pub fn drop_context(&self, conversation_id: &str) {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(conversation_id);
    }

    pub fn put_tag(&self, conversation_id: &str, text: String) {
        let tag = PendingTag {
            text,
            created_at: self.clock.now(),
        };
        self.tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conversation_id.to_string(), tag);
    }

    pub fn tag(&self, conversation_id: &str) -> Option<PendingTag> {
        self.evict_expired(conversation_id);
        self.tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(conversation_id)
            .cloned()
    }

    /// Drop both the pending tag and the context.
    pub fn clear(&self, conversation_id: &str) {
        self.tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(conversation_id);
        self.drop_context(conversation_id);
    }

    pub fn is_empty(&self) -> bool {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
            && self.tags.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}
