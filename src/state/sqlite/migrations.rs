use sqlx::SqlitePool;

pub(crate) async fn migrate_state(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_states (
            subject_id TEXT PRIMARY KEY,
            profile TEXT NOT NULL DEFAULT '',
            score REAL NOT NULL,
            level TEXT NOT NULL,
            message_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS message_states (
            subject_id TEXT PRIMARY KEY,
            total_messages INTEGER NOT NULL DEFAULT 0,
            last_message_id TEXT NOT NULL DEFAULT '',
            last_profile_updated INTEGER NOT NULL DEFAULT 0,
            last_score_updated INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // Dedup ledger. The composite key is what makes recording idempotent.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS processed_messages (
            subject_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            PRIMARY KEY (subject_id, message_id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS turns (
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            text TEXT NOT NULL,
            timestamp REAL NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_subject_ts ON turns(subject_id, timestamp)")
        .execute(pool)
        .await?;

    Ok(())
}
