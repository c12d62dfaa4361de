use super::*;

#[async_trait]
impl crate::traits::TurnStore for SqliteStateStore {
    async fn append_turn(&self, turn: &StoredTurn) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO turns (id, subject_id, text, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(&turn.id)
        .bind(&turn.subject_id)
        .bind(&turn.text)
        .bind(turn.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lookup_message_id(
        &self,
        subject_id: &str,
        timestamp: f64,
    ) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            "SELECT id FROM turns \
             WHERE subject_id = ? AND ABS(timestamp - ?) <= 1.0 \
             ORDER BY ABS(timestamp - ?) ASC LIMIT 1",
        )
        .bind(subject_id)
        .bind(timestamp)
        .bind(timestamp)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>("id")))
    }

    async fn unprocessed_turns_since(
        &self,
        subject_id: &str,
        since: f64,
    ) -> anyhow::Result<Vec<StoredTurn>> {
        let rows = sqlx::query(
            "SELECT t.id, t.subject_id, t.text, t.timestamp FROM turns t \
             WHERE t.subject_id = ? AND t.timestamp >= ? \
             AND NOT EXISTS ( \
                 SELECT 1 FROM processed_messages p \
                 WHERE p.subject_id = t.subject_id AND p.message_id = t.id \
             ) \
             ORDER BY t.timestamp DESC",
        )
        .bind(subject_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_turn).collect())
    }
}
