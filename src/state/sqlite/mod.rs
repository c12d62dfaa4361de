use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::traits::{MessageState, ScoreBounds, StoredTurn, UserState};
use crate::types::AffectionLevel;

mod migrations;

/// Owner-only access for the database file and its WAL companions.
#[cfg(unix)]
fn restrict_db_files(db_path: &str) {
    use std::os::unix::fs::PermissionsExt;
    let files = [
        db_path.to_string(),
        format!("{}-wal", db_path),
        format!("{}-shm", db_path),
    ];
    for path in files.iter().filter(|p| std::path::Path::new(p).exists()) {
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!(path = %path, error = %e, "Could not restrict database file");
        }
    }
}

#[cfg(not(unix))]
fn restrict_db_files(_db_path: &str) {}

fn parse_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        restrict_db_files(db_path);
        migrations::migrate_state(&pool).await?;
        tracing::debug!(db_path, "State store ready");

        Ok(Self { pool })
    }

    fn row_to_user_state(row: &sqlx::sqlite::SqliteRow) -> UserState {
        let score: f64 = row.get("score");
        let level_raw: String = row.get("level");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");
        UserState {
            subject_id: row.get("subject_id"),
            profile: row.get("profile"),
            score,
            level: AffectionLevel::parse(&level_raw)
                .unwrap_or_else(|| AffectionLevel::from_score(score)),
            message_count: row.get("message_count"),
            created_at: parse_datetime(&created_at),
            updated_at: parse_datetime(&updated_at),
        }
    }

    fn row_to_message_state(row: &sqlx::sqlite::SqliteRow) -> MessageState {
        let updated_at: String = row.get("updated_at");
        MessageState {
            subject_id: row.get("subject_id"),
            total_messages: row.get("total_messages"),
            last_message_id: row.get("last_message_id"),
            last_profile_updated: row.get::<i64, _>("last_profile_updated") != 0,
            last_score_updated: row.get::<i64, _>("last_score_updated") != 0,
            updated_at: parse_datetime(&updated_at),
        }
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> StoredTurn {
        StoredTurn {
            id: row.get("id"),
            subject_id: row.get("subject_id"),
            text: row.get("text"),
            timestamp: row.get("timestamp"),
        }
    }

    /// Insert a fresh state row unless one exists. Returns true when inserted.
    async fn ensure_user_state(&self, subject_id: &str, bounds: ScoreBounds) -> anyhow::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let initial = bounds.clamp(bounds.initial);
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_states \
             (subject_id, profile, score, level, message_count, created_at, updated_at) \
             VALUES (?, '', ?, ?, 0, ?, ?)",
        )
        .bind(subject_id)
        .bind(initial)
        .bind(AffectionLevel::from_score(initial).as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_user_state(&self, subject_id: &str) -> anyhow::Result<UserState> {
        let row = sqlx::query(
            "SELECT subject_id, profile, score, level, message_count, created_at, updated_at \
             FROM user_states WHERE subject_id = ?",
        )
        .bind(subject_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::row_to_user_state(&row))
    }
}

mod ledger;
mod turns;
mod users;

#[cfg(test)]
mod tests;
