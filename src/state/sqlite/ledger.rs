use super::*;

#[async_trait]
impl crate::traits::LedgerStore for SqliteStateStore {
    async fn is_message_processed(
        &self,
        subject_id: &str,
        message_id: &str,
    ) -> anyhow::Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM processed_messages WHERE subject_id = ? AND message_id = ? LIMIT 1",
        )
        .bind(subject_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn record_processed_message(
        &self,
        subject_id: &str,
        message_id: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO processed_messages (subject_id, message_id, processed_at) \
             VALUES (?, ?, ?)",
        )
        .bind(subject_id)
        .bind(message_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
