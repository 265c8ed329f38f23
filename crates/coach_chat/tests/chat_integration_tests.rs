//! Integration tests for coaching sessions.
//!
//! These drive a full session against the scripted generator and a
//! file-backed data store in a temporary directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use coach_chat::mock::{MockGenerator, MockReply};
use coach_chat::{
    ActionOutcome, ChatError, ChatResult, CoachConfig, CoachSession, DispatchEvent, Domain, FileDataStore,
    FileStorage, HistoryStore, Hydration, KnowledgeLookup, LookupSource, MemoryStorage, ProductHit, ProductSource,
    SessionBackend,
};

const SKYR_REPLY: &str = "Klingt gut, das trage ich als Snack ein.\n\n```action:log_meal\n{\"name\":\"500g Skyr mit 2 Orangen\",\"type\":\"snack\",\"calories\":430,\"protein\":52,\"carbs\":58,\"fat\":2}\n```";

fn file_session(mock: &MockGenerator, dir: &TempDir) -> (CoachSession, Arc<FileDataStore>) {
    let data = Arc::new(FileDataStore::new(dir.path().join("data")));
    let storage = Arc::new(FileStorage::new(dir.path().join("session")));
    let backend = SessionBackend::from_data_store(data.clone(), storage);
    let session = CoachSession::new(CoachConfig::default(), Arc::new(mock.clone()), backend);
    (session, data)
}

/// Test that a meal message becomes exactly one persisted meal record.
#[tokio::test]
async fn test_meal_logging_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mock = MockGenerator::new().add_text(SKYR_REPLY);
    let (session, data) = file_session(&mock, &dir);

    let (tx, mut rx) = mpsc::channel(256);
    let outcome = session.send_message("500g Skyr und 2 Orangen", Some(tx)).await.unwrap();

    assert_eq!(outcome.routing.primary().map(|d| d.domain), Some(Domain::Nutrition));
    assert_eq!(outcome.reply.content, "Klingt gut, das trage ich als Snack ein.");
    assert!(!outcome.reply.streaming);
    assert_eq!(outcome.reply.actions.len(), 1);

    let mut chunks = 0;
    while let Ok(event) = rx.try_recv() {
        assert!(matches!(event, DispatchEvent::Chunk { domain: Domain::Nutrition, .. }));
        chunks += 1;
    }
    assert!(chunks > 1);

    let action_id = outcome.reply.actions[0].id.clone();
    assert_eq!(session.confirm_action(&action_id).await.unwrap(), ActionOutcome::Executed);
    assert!(session.confirm_action(&action_id).await.is_err());

    let rows = data.load_table("meal_logs").unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["name"], "500g Skyr mit 2 Orangen");
    assert_eq!(row["type"], "snack");
    assert_eq!(row["calories"], 430.0);
    assert_eq!(row["protein"], 52.0);
    assert_eq!(
        row["date"],
        chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
    );

    let stored = session.store().find_message(&outcome.reply.id).unwrap();
    assert!(stored.actions.is_empty());
}

/// Test that a failed insert keeps the action visible and retry executes it.
#[tokio::test]
async fn test_failed_action_can_be_retried() {
    struct FlakySink {
        calls: parking_lot::Mutex<u32>,
    }

    #[async_trait]
    impl coach_chat::ActionSink for FlakySink {
        async fn insert(&self, _table: &str, _record: serde_json::Value) -> ChatResult<()> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls == 1 {
                return Err(ChatError::Persistence("connection reset".to_string()));
            }
            Ok(())
        }
    }

    let dir = TempDir::new().unwrap();
    let data = Arc::new(FileDataStore::new(dir.path()));
    let sink = Arc::new(FlakySink {
        calls: parking_lot::Mutex::new(0),
    });
    let backend = SessionBackend {
        actions: sink.clone(),
        ..SessionBackend::from_data_store(data, Arc::new(MemoryStorage::new()))
    };
    let mock = MockGenerator::new().add_text(SKYR_REPLY);
    let session = CoachSession::new(CoachConfig::default(), Arc::new(mock), backend);

    let outcome = session.send_message("500g Skyr und 2 Orangen", None).await.unwrap();
    let action_id = outcome.reply.actions[0].id.clone();

    assert!(matches!(
        session.confirm_action(&action_id).await.unwrap(),
        ActionOutcome::Failed(_)
    ));
    assert_eq!(session.reject_action(&action_id).unwrap(), ActionOutcome::Ignored);
    assert_eq!(session.retry_action(&action_id).await.unwrap(), ActionOutcome::Executed);
    assert_eq!(*sink.calls.lock(), 2);
}

/// Test that a later session restores threads from storage, or from history
/// when the local cache is gone.
#[tokio::test]
async fn test_threads_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let mock = MockGenerator::new().add_text(SKYR_REPLY);
    let (first, data) = file_session(&mock, &dir);
    first.hydrate().await.unwrap();
    first.send_message("500g Skyr und 2 Orangen", None).await.unwrap();

    let (second, _) = file_session(&MockGenerator::new(), &dir);
    assert_eq!(second.hydrate().await.unwrap(), Hydration::LocalCache);
    assert_eq!(second.store().messages(Domain::General).len(), 2);
    assert_eq!(second.hydrate().await.unwrap(), Hydration::Skipped);

    let fresh_storage = Arc::new(MemoryStorage::new());
    let backend = SessionBackend::from_data_store(data.clone(), fresh_storage);
    let third = CoachSession::new(CoachConfig::default(), Arc::new(MockGenerator::new()), backend);
    assert_eq!(third.hydrate().await.unwrap(), Hydration::Remote);

    let restored = third.store().messages(Domain::General);
    assert_eq!(restored.len(), 2);
    assert!(restored[1].raw_content.as_deref().unwrap_or_default().contains("log_meal"));
    assert_eq!(data.load_recent(Domain::General, 1).await.unwrap().len(), 1);
}

/// Test that a search directive is answered with database values.
#[tokio::test]
async fn test_product_search_round() {
    struct Catalogue;

    #[async_trait]
    impl ProductSource for Catalogue {
        async fn search(&self, _query: &str) -> ChatResult<Vec<ProductHit>> {
            Ok(vec![
                ProductHit {
                    name: "Früchte Tee".to_string(),
                    brand: Some("Teekanne".to_string()),
                    energy_kcal_100g: Some(2.0),
                    ..Default::default()
                },
                ProductHit {
                    name: "Hafer-Müsli Früchte".to_string(),
                    brand: Some("Kölln".to_string()),
                    energy_kcal_100g: Some(362.0),
                    proteins_100g: Some(9.1),
                    carbohydrates_100g: Some(61.0),
                    fat_100g: Some(6.2),
                    serving_size: Some("50 g".to_string()),
                    serving_quantity: Some(50.0),
                },
            ])
        }
    }

    let dir = TempDir::new().unwrap();
    let mock = MockGenerator::new()
        .add_text("Moment.\n\n```action:search_product\n{\"query\": \"Kölln Hafermüsli Früchte\", \"amount_g\": 60}\n```")
        .add_reply(MockReply::failure("follow-up timed out"));
    let (session, _) = file_session(&mock, &dir);
    let session = session.with_lookup(Arc::new(KnowledgeLookup::new(Arc::new(Catalogue))));

    let outcome = session.send_message("Wie viele Kalorien hat Kölln Hafermüsli?", None).await.unwrap();
    let lookup = outcome.lookup.unwrap();
    assert_eq!(lookup.source, LookupSource::PrimaryDatabase);
    assert_eq!(lookup.product.as_ref().map(|p| p.name.as_str()), Some("Hafer-Müsli Früchte"));
    assert!(outcome.reply.content.starts_with("Moment.\n\n"));
    assert!(outcome.reply.content.contains(&lookup.summary));
    assert!(!outcome.reply.errored);
}

/// Test lookup fallback through a blocking runtime.
#[test]
fn test_lookup_not_found_without_fallback() {
    struct Empty;

    #[async_trait]
    impl ProductSource for Empty {
        async fn search(&self, _query: &str) -> ChatResult<Vec<ProductHit>> {
            Ok(Vec::new())
        }
    }

    let generator = MockGenerator::new().add_text("I am not sure.");
    let lookup = KnowledgeLookup::new(Arc::new(Empty)).with_fallback(Arc::new(generator), Duration::from_secs(1));
    let result = tokio_test::block_on(lookup.resolve("Hausmarke Protein Pudding"));

    assert!(!result.found);
    assert_eq!(result.source, LookupSource::None);
}
