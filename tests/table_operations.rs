/// Point reads and writes, queries, scans and counts
///
/// Runs against the in-memory backend, so no external store is needed.
use dynamo_gateway::table::codec::{composite_key_item, key_from_item, marshal};
use dynamo_gateway::{
    Error, FailureKind, GetOptions, PutOptions, QueryOptions, RangeFilter, ReturnValues,
    ScanOptions, Update, UpdateOptions,
};

mod helpers;
use helpers::*;

fn user(id: &str) -> String {
    id.to_string()
}

fn title(game: &str) -> String {
    game.to_string()
}

/// Key conversion is lossless in both directions
#[test]
fn test_key_round_trip() {
    let composite = key("u1", "chess");
    let item = composite_key_item::<GameScore>(&composite).unwrap();
    assert_eq!(item.len(), 2);
    assert_eq!(key_from_item::<GameScore>(&item).unwrap(), composite);

    let again = composite_key_item::<GameScore>(&key_from_item::<GameScore>(&item).unwrap()).unwrap();
    assert_eq!(again, item);
}

#[tokio::test]
async fn test_put_then_get_returns_equal_entity() {
    let backend = memory_backend();
    let table = memory_table(&backend);

    let mut stored = score("u1", "chess", 1200);
    stored.wins = 4;
    let _ = stored.info.insert("rating".to_string(), 7);
    table.put(&stored).await.unwrap();

    let got = table.get(&user("u1"), Some(&title("chess"))).await.unwrap();
    assert_eq!(got, Outcome::Found(stored));
}

#[tokio::test]
async fn test_get_delete_get() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    table.put(&score("u1", "chess", 10)).await.unwrap();

    let first = table.get(&user("u1"), Some(&title("chess"))).await.unwrap();
    assert!(first.is_found());

    table.delete(&user("u1"), Some(&title("chess"))).await.unwrap();

    let second = table.get(&user("u1"), Some(&title("chess"))).await.unwrap();
    assert_eq!(second, Outcome::NotFound);
    assert_eq!(backend.item_count(TABLE).await, 0);
}

#[tokio::test]
async fn test_delete_missing_item_succeeds() {
    let backend = memory_backend();
    let table = memory_table(&backend);

    assert!(table.delete(&user("nobody"), Some(&title("chess"))).await.is_ok());
}

#[tokio::test]
async fn test_missing_sort_key_is_rejected_before_any_call() {
    let backend = memory_backend();
    let table = memory_table(&backend);

    let err = table.get(&user("u1"), None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidKey(_)));
    assert_eq!(backend.calls(Operation::GetItem).await, 0);
}

#[tokio::test]
async fn test_put_with_returns_replaced_entity() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    table.put(&score("u1", "chess", 10)).await.unwrap();

    let options = PutOptions {
        return_old: true,
        ..PutOptions::default()
    };
    let outcome = table
        .put_with(&score("u1", "chess", 20), options.clone())
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Applied(Some(score("u1", "chess", 10))));

    let fresh = table
        .put_with(&score("u1", "go", 5), options)
        .await
        .unwrap();
    assert_eq!(fresh, WriteOutcome::Applied(None));
}

#[tokio::test]
async fn test_update_returns_updated_attributes_over_key() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let mut stored = score("u1", "chess", 10);
    stored.wins = 3;
    table.put(&stored).await.unwrap();

    let update = Update::new().set_value("top_score", &99).unwrap();
    let updated = table.update(&stored, update).await.unwrap().unwrap();

    // Only top_score came back; the rest takes serde defaults.
    assert_eq!(updated.user_id, "u1");
    assert_eq!(updated.game_title, "chess");
    assert_eq!(updated.top_score, 99);
    assert_eq!(updated.wins, 0);

    let got = table.get(&user("u1"), Some(&title("chess"))).await.unwrap();
    let mut expected = stored.clone();
    expected.top_score = 99;
    assert_eq!(got, Outcome::Found(expected));
}

#[tokio::test]
async fn test_update_nested_path_and_remove() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let mut stored = score("u1", "chess", 10);
    stored.wins = 3;
    table.put(&stored).await.unwrap();

    let update = Update::new()
        .set("info.rating", AttributeValue::N("5".into()))
        .remove("wins");
    let outcome = table
        .update_with(
            &stored,
            update,
            UpdateOptions {
                return_values: ReturnValues::AllNew,
                ..UpdateOptions::default()
            },
        )
        .await
        .unwrap();

    let updated = outcome.applied().flatten().unwrap();
    assert_eq!(updated.wins, 0);
    assert_eq!(updated.top_score, 10);
    assert_eq!(updated.info.get("rating"), Some(&5));
}

#[tokio::test]
async fn test_update_creates_missing_item() {
    let backend = memory_backend();
    let table = memory_table(&backend);

    let update = Update::new().set_value("top_score", &7).unwrap();
    let _ = table
        .update(&score("u9", "chess", 0), update)
        .await
        .unwrap();

    let got = table.get(&user("u9"), Some(&title("chess"))).await.unwrap();
    assert_eq!(got, Outcome::Found(score("u9", "chess", 7)));
}

#[tokio::test]
async fn test_update_of_key_attribute_is_rejected() {
    let backend = memory_backend();
    let table = memory_table(&backend);

    let update = Update::new().set("game_title", AttributeValue::S("go".into()));
    let err = table
        .update(&score("u1", "chess", 0), update)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Expression(_)));
    assert_eq!(backend.calls(Operation::UpdateItem).await, 0);
}

#[tokio::test]
async fn test_query_follows_every_page_in_sort_order() {
    let backend = memory_backend().with_page_size(2);
    let table = memory_table(&backend);
    seed(&table, &scores_for("u1", 5)).await;
    seed(&table, &scores_for("u2", 3)).await;

    let results = table.query(&user("u1")).await.unwrap();

    assert_eq!(results, scores_for("u1", 5));
    assert_eq!(backend.calls(Operation::Query).await, 3);
}

#[tokio::test]
async fn test_query_with_filter_and_reverse_order() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    seed(&table, &scores_for("u1", 5)).await;

    let options = QueryOptions {
        filter: Some(RangeFilter::between_values("top_score", &10, &30).unwrap()),
        scan_forward: false,
        ..QueryOptions::default()
    };
    let results = table.query_with(&user("u1"), options).await.unwrap();

    let titles: Vec<&str> = results.iter().map(|s| s.game_title.as_str()).collect();
    assert_eq!(titles, vec!["game_003", "game_002", "game_001"]);
}

#[tokio::test]
async fn test_query_of_unknown_partition_is_empty() {
    let backend = memory_backend();
    let table = memory_table(&backend);

    assert!(table.query(&user("nobody")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_and_count_agree() {
    let backend = memory_backend().with_page_size(3);
    let table = memory_table(&backend);
    seed(&table, &scores_for("u1", 6)).await;
    seed(&table, &scores_for("u2", 6)).await;

    let filter = RangeFilter::between_values("top_score", &20, &40).unwrap();
    let found = table.scan(&filter).await.unwrap();
    let counted = table.count(&filter).await.unwrap();

    assert_eq!(found.len(), 6);
    assert_eq!(counted, 6);
    assert!(found.iter().all(|s| (20..=40).contains(&s.top_score)));
}

#[tokio::test]
async fn test_scan_projection_keeps_keys() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let mut stored = score("u1", "chess", 50);
    stored.wins = 9;
    table.put(&stored).await.unwrap();

    let options = ScanOptions {
        projection: Some(vec!["top_score".to_string()]),
        ..ScanOptions::default()
    };
    let found = table.scan_with(None, options).await.unwrap();

    assert_eq!(found, vec![score("u1", "chess", 50)]);
}

#[tokio::test]
async fn test_get_projection_keeps_keys() {
    let backend = memory_backend();
    let table = memory_table(&backend);
    let mut stored = score("u1", "chess", 50);
    stored.wins = 9;
    table.put(&stored).await.unwrap();

    let options = GetOptions {
        projection: Some(vec!["wins".to_string()]),
        ..GetOptions::default()
    };
    let got = table
        .get_with(&user("u1"), Some(&title("chess")), options)
        .await
        .unwrap()
        .into_option()
        .unwrap();

    assert_eq!(got.wins, 9);
    assert_eq!(got.top_score, 0);
    assert_eq!(got.game_title, "chess");
}

#[tokio::test]
async fn test_undecodable_item_is_an_error_not_a_miss() {
    let backend = memory_backend();
    let table = memory_table(&backend);

    let mut item = marshal(&score("u1", "chess", 1)).unwrap();
    let _ = item.insert("top_score".to_string(), AttributeValue::S("lots".into()));
    backend.insert_raw(TABLE, item).await.unwrap();

    let err = table
        .get(&user("u1"), Some(&title("chess")))
        .await
        .unwrap_err();
    assert!(err.is_serialization_error());

    let err = table.scan_with(None, ScanOptions::default()).await.unwrap_err();
    assert!(err.is_serialization_error());
}

#[tokio::test]
async fn test_backend_failures_keep_their_kind() {
    let backend = memory_backend();
    let table = memory_table(&backend);

    backend
        .fail_next(Operation::GetItem, FailureKind::Throttled)
        .await;
    let err = table
        .get(&user("u1"), Some(&title("chess")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(FailureKind::Throttled));
    assert!(err.is_retryable());

    // The failure was consumed.
    assert!(table.get(&user("u1"), Some(&title("chess"))).await.is_ok());
}

#[tokio::test]
async fn test_undeclared_table_is_not_found() {
    init_tracing();
    let backend = MemoryBackend::new();
    let table = memory_table(&backend);

    let err = table
        .get(&user("u1"), Some(&title("chess")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(FailureKind::TableNotFound));
    assert!(!err.is_retryable());
}

#[test]
fn test_invalid_config_is_rejected() {
    let backend = MemoryBackend::new();

    let err = Table::<GameScore, _>::new(
        backend.clone(),
        TableConfig::new(TABLE).with_write_chunk_size(26),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    assert!(Table::<GameScore, _>::new(backend, TableConfig::new("")).is_err());
}
