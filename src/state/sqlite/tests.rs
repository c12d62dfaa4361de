use super::*;
use crate::traits::store_prelude::*;

async fn setup_test_store() -> (SqliteStateStore, tempfile::NamedTempFile) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let store = SqliteStateStore::new(db_file.path().to_str().unwrap())
        .await
        .unwrap();
    (store, db_file)
}

fn bounds() -> ScoreBounds {
    ScoreBounds {
        min: 0.0,
        max: 100.0,
        initial: 50.0,
    }
}

#[tokio::test]
async fn get_or_create_reports_creation_once() {
    let (store, _f) = setup_test_store().await;

    let (state, created) = store.get_or_create_user_state("u1", bounds()).await.unwrap();
    assert!(created);
    assert_eq!(state.score, 50.0);
    assert_eq!(state.level, AffectionLevel::Neutral);
    assert_eq!(state.profile, "");

    let (_, created_again) = store.get_or_create_user_state("u1", bounds()).await.unwrap();
    assert!(!created_again);
}

#[tokio::test]
async fn score_delta_clamps_and_relevels() {
    let (store, _f) = setup_test_store().await;

    for _ in 0..30 {
        store.apply_score_delta("u1", -3.0, bounds()).await.unwrap();
    }
    let state = store.get_user_state("u1").await.unwrap().unwrap();
    assert_eq!(state.score, 0.0);
    assert_eq!(state.level, AffectionLevel::Hostile);

    for _ in 0..60 {
        store.apply_score_delta("u1", 2.0, bounds()).await.unwrap();
    }
    let state = store.get_user_state("u1").await.unwrap().unwrap();
    assert_eq!(state.score, 100.0);
    assert_eq!(state.level, AffectionLevel::Devoted);
}

#[tokio::test]
async fn profile_updates_keep_score_and_count_turns() {
    let (store, _f) = setup_test_store().await;

    store.apply_score_delta("u1", 12.0, bounds()).await.unwrap();
    store.set_profile("u1", "likes cats", bounds()).await.unwrap();
    let state = store.set_profile("u1", "likes cats and tea", bounds()).await.unwrap();

    assert_eq!(state.profile, "likes cats and tea");
    assert_eq!(state.message_count, 2);
    assert_eq!(state.score, 62.0);
    assert_eq!(state.level, AffectionLevel::Friendly);
}

#[tokio::test]
async fn set_score_clamps_out_of_range_values() {
    let (store, _f) = setup_test_store().await;
    let (state, created) = store.set_score("u9", 140.0, bounds()).await.unwrap();
    assert!(created);
    assert_eq!(state.score, 100.0);
}

#[tokio::test]
async fn ledger_record_is_idempotent() {
    let (store, _f) = setup_test_store().await;

    assert!(!store.is_message_processed("u1", "m1").await.unwrap());
    store.record_processed_message("u1", "m1").await.unwrap();
    store.record_processed_message("u1", "m1").await.unwrap();
    assert!(store.is_message_processed("u1", "m1").await.unwrap());
    // Keyed per subject.
    assert!(!store.is_message_processed("u2", "m1").await.unwrap());
}

#[tokio::test]
async fn unprocessed_turns_exclude_ledger_and_old_turns() {
    let (store, _f) = setup_test_store().await;

    let old = StoredTurn::new("u1", "ancient history", 100.0);
    let a = StoredTurn::new("u1", "first message", 1_000.0);
    let b = StoredTurn::new("u1", "second message", 1_010.0);
    let other = StoredTurn::new("u2", "someone else", 1_005.0);
    for t in [&old, &a, &b, &other] {
        store.append_turn(t).await.unwrap();
    }
    store.record_processed_message("u1", &a.id).await.unwrap();

    let turns = store.unprocessed_turns_since("u1", 500.0).await.unwrap();
    let ids: Vec<&str> = turns.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec![b.id.as_str()]);
}

#[tokio::test]
async fn lookup_message_id_matches_within_a_second() {
    let (store, _f) = setup_test_store().await;
    let turn = StoredTurn::new("u1", "hello there", 2_000.4);
    store.append_turn(&turn).await.unwrap();

    assert_eq!(
        store.lookup_message_id("u1", 2_000.0).await.unwrap(),
        Some(turn.id.clone())
    );
    assert_eq!(store.lookup_message_id("u1", 2_005.0).await.unwrap(), None);
    assert_eq!(store.lookup_message_id("u2", 2_000.4).await.unwrap(), None);
}

#[tokio::test]
async fn message_state_accumulates() {
    let (store, _f) = setup_test_store().await;

    store.update_message_state("u1", "m1", true, false).await.unwrap();
    store.update_message_state("u1", "m2", false, true).await.unwrap();

    let ms = store.get_message_state("u1").await.unwrap().unwrap();
    assert_eq!(ms.total_messages, 2);
    assert_eq!(ms.last_message_id, "m2");
    assert!(!ms.last_profile_updated);
    assert!(ms.last_score_updated);
}

#[cfg(unix)]
#[tokio::test]
async fn database_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let (_store, db_file) = setup_test_store().await;
    let mode = std::fs::metadata(db_file.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
