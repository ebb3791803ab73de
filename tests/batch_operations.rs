/// Chunked batch and transactional reads and writes
use dynamo_gateway::{BatchOptions, BatchOutcome, EntityMethods, Error, FailureKind};
use std::time::Duration;
use tokio::time::Instant;

mod helpers;
use helpers::*;

#[tokio::test]
async fn test_batch_write_splits_into_bounded_chunks() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let scores = scores_for("u1", 30);

    let output = table.batch_write(&scores).await.unwrap();

    assert_eq!(backend.calls(Operation::BatchWriteItem).await, 2);
    assert_eq!(output.processed, 30);
    assert_eq!(output.chunks, 2);
    assert_eq!(output.outcome(), BatchOutcome::Complete);
    assert_eq!(output.items, scores);
    assert_eq!(backend.item_count(TABLE).await, 30);
}

#[tokio::test]
async fn test_batch_write_respects_configured_chunk_size() {
    let backend = memory_backend();
    let table = memory_table_with(&backend, TableConfig::new(TABLE).with_write_chunk_size(10));

    let output = table.batch_write(&scores_for("u1", 30)).await.unwrap();

    assert_eq!(backend.calls(Operation::BatchWriteItem).await, 3);
    assert_eq!(output.processed, 30);
}

#[tokio::test]
async fn test_batch_write_empty_input_makes_no_calls() {
    let backend = memory_backend();
    let table = memory_table(&backend);

    let output = table.batch_write(&[]).await.unwrap();

    assert!(output.is_complete());
    assert_eq!(output.processed, 0);
    assert_eq!(backend.calls(Operation::BatchWriteItem).await, 0);
}

#[tokio::test]
async fn test_batch_write_stops_at_partially_processed_chunk() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    backend.set_batch_capacity(Some(10)).await;
    let scores = scores_for("u1", 30);

    let output = table.batch_write(&scores).await.unwrap();

    assert_eq!(output.outcome(), BatchOutcome::PartiallyProcessed);
    assert_eq!(backend.calls(Operation::BatchWriteItem).await, 1);
    assert_eq!(output.processed, 10);
    assert_eq!(output.items, scores[..10].to_vec());
    // Declined items of the first chunk, then everything never submitted.
    assert_eq!(output.unprocessed, scores[10..].to_vec());
    assert_eq!(backend.item_count(TABLE).await, 10);

    backend.set_batch_capacity(None).await;
    let retry = table.batch_write(&output.unprocessed).await.unwrap();
    assert!(retry.is_complete());
    assert_eq!(backend.item_count(TABLE).await, 30);
}

#[tokio::test]
async fn test_batch_write_failure_in_first_chunk() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let scores = scores_for("u1", 60);
    backend
        .fail_next(Operation::BatchWriteItem, FailureKind::Throttled)
        .await;

    let err = table.batch_write(&scores).await.unwrap_err();

    assert_eq!(err.source.kind(), Some(FailureKind::Throttled));
    assert!(err.source.is_retryable());
    assert_eq!(err.partial.chunks, 0);
    assert_eq!(err.partial.processed, 0);
    assert_eq!(err.partial.unprocessed, scores);
    assert_eq!(backend.calls(Operation::BatchWriteItem).await, 1);
    assert_eq!(backend.item_count(TABLE).await, 0);
}

#[tokio::test]
async fn test_batch_write_error_in_second_chunk() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let scores = scores_for("u1", 60);
    let _ = table.batch_write(&scores[..25]).await.unwrap();

    // A duplicate key inside one chunk is rejected by the store.
    let mut input = scores[25..50].to_vec();
    input.extend(scores[50..].iter().cloned());
    input[30] = input[31].clone();

    let err = table.batch_write(&input).await.unwrap_err();

    assert_eq!(err.source.kind(), Some(FailureKind::Validation));
    assert_eq!(err.partial.chunks, 1);
    assert_eq!(err.partial.processed, 25);
    assert_eq!(err.partial.unprocessed, input[25..].to_vec());
    assert_eq!(backend.item_count(TABLE).await, 50);
}

#[tokio::test]
async fn test_batch_get_returns_only_existing_entities() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let scores = scores_for("u1", 3);
    seed(&table, &scores).await;

    let keys = vec![
        key("u1", "game_000"),
        key("u1", "missing"),
        key("u1", "game_002"),
        key("nobody", "game_000"),
    ];
    let mut output = table.batch_get(&keys).await.unwrap();
    output.items.sort_by(|a, b| a.game_title.cmp(&b.game_title));

    assert_eq!(output.processed, 2);
    assert!(output.is_complete());
    assert_eq!(output.items, vec![scores[0].clone(), scores[2].clone()]);

    let missing = GameScore::missing_keys(&output.items, &keys);
    assert_eq!(missing, vec![key("u1", "missing"), key("nobody", "game_000")]);
}

#[tokio::test]
async fn test_batch_get_chunks_by_read_size() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let scores = scores_for("u1", 250);
    let _ = table.batch_write(&scores).await.unwrap();
    backend.reset_calls().await;

    let keys = GameScore::keys_of(&scores);
    let output = table.batch_get(&keys).await.unwrap();

    assert_eq!(backend.calls(Operation::BatchWriteItem).await, 0);
    assert_eq!(backend.calls(Operation::BatchGetItem).await, 3);
    assert_eq!(output.processed, 250);
    assert_eq!(output.chunks, 3);
}

#[tokio::test]
async fn test_batch_get_reports_unprocessed_keys() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let scores = scores_for("u1", 150);
    let _ = table.batch_write(&scores).await.unwrap();
    backend.set_batch_capacity(Some(60)).await;

    let keys = GameScore::keys_of(&scores);
    let output = table.batch_get(&keys).await.unwrap();

    assert_eq!(output.outcome(), BatchOutcome::PartiallyProcessed);
    assert_eq!(output.processed, 60);
    // 40 declined in the first chunk plus the 50 never submitted.
    assert_eq!(output.unprocessed.len(), 90);
    assert_eq!(backend.calls(Operation::BatchGetItem).await, 1);

    let found = GameScore::keys_of(&output.items);
    assert!(output.unprocessed.iter().all(|key| !found.contains(key)));
}

#[tokio::test]
async fn test_batch_delete_removes_items() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let scores = scores_for("u1", 40);
    let _ = table.batch_write(&scores).await.unwrap();

    let mut keys = GameScore::keys_of(&scores[..30]);
    keys.push(key("u1", "never_written"));
    let output = table.batch_delete(&keys).await.unwrap();

    assert!(output.is_complete());
    assert_eq!(output.processed, 31);
    assert_eq!(output.items, keys);
    assert_eq!(backend.item_count(TABLE).await, 10);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_stops_submitting_chunks() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    backend.set_latency(Some(Duration::from_millis(10))).await;
    let scores = scores_for("u1", 100);

    let options = BatchOptions::with_deadline(Instant::now() + Duration::from_millis(25));
    let err = table.batch_write_with(&scores, options).await.unwrap_err();

    assert!(matches!(err.source, Error::DeadlineExceeded));
    assert_eq!(err.partial.processed, 50);
    assert_eq!(err.partial.unprocessed, scores[50..].to_vec());
}

#[tokio::test]
async fn test_transact_get_is_positional_and_skips_missing() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let scores = scores_for("u1", 3);
    seed(&table, &scores).await;

    let keys = vec![
        key("u1", "game_002"),
        key("u1", "missing"),
        key("u1", "game_000"),
    ];
    let output = table.transact_get(&keys).await.unwrap();

    assert_eq!(output.items, vec![scores[2].clone(), scores[0].clone()]);
    assert_eq!(output.processed, 2);
    assert_eq!(backend.calls(Operation::TransactGetItems).await, 1);
}

#[tokio::test]
async fn test_transact_get_failure_is_reported() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    backend
        .fail_next(Operation::TransactGetItems, FailureKind::Conflict)
        .await;

    let err = table.transact_get(&[key("u1", "a")]).await.unwrap_err();

    assert_eq!(err.source.kind(), Some(FailureKind::Conflict));
    assert!(err.source.is_retryable());
    assert_eq!(err.partial.unprocessed, vec![key("u1", "a")]);
}
