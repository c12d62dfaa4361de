use std::sync::Arc;

use tracing::debug;

use crate::traits::StateStore;

/// Which (subject, message) pairs have already been folded into a window.
#[derive(Clone)]
pub struct ProcessedLedger {
    store: Arc<dyn StateStore>,
}

impl ProcessedLedger {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn is_processed(&self, subject_id: &str, message_id: &str) -> anyhow::Result<bool> {
        self.store.is_message_processed(subject_id, message_id).await
    }

    pub async fn record(&self, subject_id: &str, message_id: &str) -> anyhow::Result<()> {
        self.store
            .record_processed_message(subject_id, message_id)
            .await
    }

    /// Record every id, stopping at the first store error.
    pub async fn record_all(&self, subject_id: &str, message_ids: &[String]) -> anyhow::Result<()> {
        for id in message_ids {
            self.record(subject_id, id).await?;
        }
        if !message_ids.is_empty() {
            debug!(subject = %subject_id, count = message_ids.len(), "Marked window turns processed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_store;

    #[tokio::test]
    async fn record_all_is_idempotent() {
        let (store, _f) = test_store().await;
        let ledger = ProcessedLedger::new(store);
        let ids = vec!["m1".to_string(), "m2".to_string()];

        ledger.record_all("u1", &ids).await.unwrap();
        ledger.record_all("u1", &ids).await.unwrap();
        ledger.record("u1", "m1").await.unwrap();

        assert!(ledger.is_processed("u1", "m1").await.unwrap());
        assert!(ledger.is_processed("u1", "m2").await.unwrap());
        assert!(!ledger.is_processed("u1", "m3").await.unwrap());
    }
}
