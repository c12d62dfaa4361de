use super::*;

#[async_trait]
impl crate::traits::UserStateStore for SqliteStateStore {
    async fn get_user_state(&self, subject_id: &str) -> anyhow::Result<Option<UserState>> {
        let row = sqlx::query(
            "SELECT subject_id, profile, score, level, message_count, created_at, updated_at \
             FROM user_states WHERE subject_id = ?",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Self::row_to_user_state(&r)))
    }

    async fn get_or_create_user_state(
        &self,
        subject_id: &str,
        bounds: ScoreBounds,
    ) -> anyhow::Result<(UserState, bool)> {
        let created = self.ensure_user_state(subject_id, bounds).await?;
        let state = self.fetch_user_state(subject_id).await?;
        Ok((state, created))
    }

    async fn list_user_states(&self) -> anyhow::Result<Vec<UserState>> {
        let rows = sqlx::query(
            "SELECT subject_id, profile, score, level, message_count, created_at, updated_at \
             FROM user_states ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_user_state).collect())
    }

    async fn set_profile(
        &self,
        subject_id: &str,
        profile: &str,
        bounds: ScoreBounds,
    ) -> anyhow::Result<UserState> {
        self.ensure_user_state(subject_id, bounds).await?;
        // Only the profile columns are touched, so a concurrent score update
        // on the same row cannot be lost.
        sqlx::query(
            "UPDATE user_states SET profile = ?, message_count = message_count + 1, updated_at = ? \
             WHERE subject_id = ?",
        )
        .bind(profile)
        .bind(Utc::now().to_rfc3339())
        .bind(subject_id)
        .execute(&self.pool)
        .await?;
        self.fetch_user_state(subject_id).await
    }

    async fn apply_score_delta(
        &self,
        subject_id: &str,
        delta: f64,
        bounds: ScoreBounds,
    ) -> anyhow::Result<UserState> {
        self.ensure_user_state(subject_id, bounds).await?;
        let row = sqlx::query(
            "UPDATE user_states SET score = MIN(?, MAX(?, score + ?)), updated_at = ? \
             WHERE subject_id = ? RETURNING score",
        )
        .bind(bounds.max)
        .bind(bounds.min)
        .bind(delta)
        .bind(Utc::now().to_rfc3339())
        .bind(subject_id)
        .fetch_one(&self.pool)
        .await?;
        let score: f64 = row.get("score");

        // Guarded on the score we just wrote: if another update landed in
        // between, it writes the level for its own score.
        sqlx::query("UPDATE user_states SET level = ? WHERE subject_id = ? AND score = ?")
            .bind(AffectionLevel::from_score(score).as_str())
            .bind(subject_id)
            .bind(score)
            .execute(&self.pool)
            .await?;

        self.fetch_user_state(subject_id).await
    }

    async fn set_score(
        &self,
        subject_id: &str,
        score: f64,
        bounds: ScoreBounds,
    ) -> anyhow::Result<(UserState, bool)> {
        let created = self.ensure_user_state(subject_id, bounds).await?;
        let score = bounds.clamp(score);
        sqlx::query("UPDATE user_states SET score = ?, level = ?, updated_at = ? WHERE subject_id = ?")
            .bind(score)
            .bind(AffectionLevel::from_score(score).as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(subject_id)
            .execute(&self.pool)
            .await?;
        let state = self.fetch_user_state(subject_id).await?;
        Ok((state, created))
    }

    async fn get_message_state(&self, subject_id: &str) -> anyhow::Result<Option<MessageState>> {
        let row = sqlx::query(
            "SELECT subject_id, total_messages, last_message_id, last_profile_updated, \
             last_score_updated, updated_at FROM message_states WHERE subject_id = ?",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Self::row_to_message_state(&r)))
    }

    async fn update_message_state(
        &self,
        subject_id: &str,
        message_id: &str,
        profile_updated: bool,
        score_updated: bool,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO message_states \
             (subject_id, total_messages, last_message_id, last_profile_updated, last_score_updated, updated_at) \
             VALUES (?, 1, ?, ?, ?, ?) \
             ON CONFLICT(subject_id) DO UPDATE SET \
             total_messages = total_messages + 1, \
             last_message_id = excluded.last_message_id, \
             last_profile_updated = excluded.last_profile_updated, \
             last_score_updated = excluded.last_score_updated, \
             updated_at = excluded.updated_at",
        )
        .bind(subject_id)
        .bind(message_id)
        .bind(profile_updated as i64)
        .bind(score_updated as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
