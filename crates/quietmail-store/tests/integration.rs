//! Integration tests for the message store.
//!
//! Every test opens a file-backed store in its own temporary directory.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use proptest::prelude::*;
use quietmail_store::{
    BatchOptions, DatabaseConfig, DeliveryStatus, EngineManager, Folder, FolderData,
    HealthChecker, HealthStatus, Message, MessageId, MessageRepository, SearchField,
    SearchOperator, SearchQuery, SearchService, TransactionManager,
};

struct Store {
    _dir: TempDir,
    engine: Arc<EngineManager>,
    repository: MessageRepository,
}

impl Store {
    fn open() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mail").join("store.db");
        let engine = Arc::new(EngineManager::new(path, DatabaseConfig::default()).unwrap());
        let repository = MessageRepository::new(Arc::clone(&engine));
        Self {
            _dir: dir,
            engine,
            repository,
        }
    }

    fn search(&self) -> SearchService {
        SearchService::new(Arc::clone(&self.engine))
    }
}

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, day)
        .unwrap()
        .and_hms_opt(hour, 15, 30)
        .unwrap()
}

fn message(uid: u32, folder: Folder) -> Message {
    Message::new(MessageId::from(uid), folder, at(1 + uid % 28, uid % 24))
        .with_subject(format!("Message {uid}"))
        .with_sender("alice@example.com")
        .with_recipients(["bob@example.com"])
}

#[tokio::test]
async fn save_then_find_returns_identical_records() {
    let store = Store::open();
    let messages = [
        message(1, Folder::Inbox)
            .with_body("Hello Bob")
            .with_attachments(["report.pdf", "chart.png"])
            .with_recipients(["bob@example.com", "carol@example.com"])
            .with_folder_data(FolderData::Inbox { flagged: true }),
        message(2, Folder::Sent).with_folder_data(FolderData::Sent {
            status: DeliveryStatus::Sent,
            send_at: Some(Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()),
        }),
        message(3, Folder::Drafts),
        message(4, Folder::Trash).with_folder_data(FolderData::Trash {
            flagged: false,
            deleted_at: Utc.with_ymd_and_hms(2024, 6, 4, 12, 30, 0).unwrap(),
        }),
    ];

    for m in &messages {
        store.repository.save(m).await.unwrap();
    }
    for m in &messages {
        let found = store
            .repository
            .find_by_id(&m.id, m.folder())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&found, m);
    }
    store.engine.close().await;
}

#[tokio::test]
async fn save_batch_of_fifty_in_chunks_of_ten() {
    let store = Store::open();
    let messages: Vec<Message> = (1..=50).map(|uid| message(uid, Folder::Inbox)).collect();
    let calls = AtomicUsize::new(0);
    let progress = |_done: usize, _total: usize| {
        calls.fetch_add(1, Ordering::SeqCst);
    };

    let result = store
        .repository
        .save_batch(&messages, BatchOptions::default().batch_size(10).progress(&progress))
        .await
        .unwrap();

    assert_eq!(result.total, 50);
    assert_eq!(result.succeeded, 50);
    assert_eq!(result.failed, 0);
    assert!(result.is_complete_success());
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(store.repository.count(Folder::Inbox).await.unwrap(), 50);
    store.engine.close().await;
}

#[tokio::test]
async fn cancelled_batch_keeps_completed_chunks() {
    let store = Store::open();
    let messages: Vec<Message> = (1..=50).map(|uid| message(uid, Folder::Inbox)).collect();
    let cancel = CancellationToken::new();
    let progress = |done: usize, _total: usize| {
        if done >= 25 {
            cancel.cancel();
        }
    };

    let result = store
        .repository
        .save_batch(
            &messages,
            BatchOptions::default()
                .batch_size(10)
                .progress(&progress)
                .cancel(&cancel),
        )
        .await
        .unwrap();

    assert!(result.cancelled);
    assert!(result.succeeded + result.failed <= result.total);
    assert_eq!(result.succeeded, 30);
    assert_eq!(store.repository.count(Folder::Inbox).await.unwrap(), 30);
    store.engine.close().await;
}

#[tokio::test]
async fn failing_chunk_is_reported_and_later_chunks_run() {
    let store = Store::open();
    let pool = store.engine.get_engine().await.unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_uid_23 BEFORE INSERT ON inbox WHEN NEW.uid = '23' \
         BEGIN SELECT RAISE(ABORT, 'uid 23 rejected'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let messages: Vec<Message> = (1..=50).map(|uid| message(uid, Folder::Inbox)).collect();
    let result = store
        .repository
        .save_batch(&messages, BatchOptions::default().batch_size(10))
        .await
        .unwrap();

    assert_eq!(result.total, 50);
    assert_eq!(result.failed, 10);
    assert_eq!(result.succeeded, 40);
    assert!(!result.cancelled);
    let failed_ids: Vec<&str> = result.errors.iter().map(|(id, _)| id.as_str()).collect();
    let expected: Vec<String> = (21..=30).map(|uid: u32| uid.to_string()).collect();
    assert_eq!(failed_ids, expected);
    assert!(result.errors.iter().all(|(_, reason)| reason.contains("uid 23 rejected")));

    assert_eq!(store.repository.count(Folder::Inbox).await.unwrap(), 40);
    assert!(!store.repository.exists(&MessageId::from(21), Folder::Inbox).await.unwrap());
    assert!(store.repository.exists(&MessageId::from(31), Folder::Inbox).await.unwrap());
    assert!(store.repository.exists(&MessageId::from(50), Folder::Inbox).await.unwrap());
    store.engine.close().await;
}

#[tokio::test]
async fn list_entries_with_commas_round_trip() {
    let store = Store::open();
    let m = message(9, Folder::Inbox)
        .with_recipients(["Doe, John <j@x.com>", " padded@example.com "])
        .with_attachments(["report, final.pdf", "C:\\mail\\notes.txt"]);
    store.repository.save(&m).await.unwrap();

    let found = store
        .repository
        .find_by_id(&m.id, Folder::Inbox)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, m);
    assert_eq!(found.recipients.len(), 2);
    store.engine.close().await;
}

#[tokio::test]
async fn flagging_depends_on_folder() {
    let store = Store::open();
    let trashed = message(7, Folder::Trash);
    let draft = message(8, Folder::Drafts);
    store.repository.save(&trashed).await.unwrap();
    store.repository.save(&draft).await.unwrap();

    store.repository.flag(&trashed.id, Folder::Trash).await.unwrap();
    let found = store
        .repository
        .find_by_id(&trashed.id, Folder::Trash)
        .await
        .unwrap()
        .unwrap();
    assert!(found.is_flagged());

    let err = store
        .repository
        .flag(&draft.id, Folder::Drafts)
        .await
        .unwrap_err();
    assert!(err.is_capability());
    store.engine.close().await;
}

#[tokio::test]
async fn delete_missing_message_is_not_found() {
    let store = Store::open();
    let err = store
        .repository
        .delete(&MessageId::from(404), Folder::Inbox)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    store.repository.save(&message(5, Folder::Inbox)).await.unwrap();
    store
        .repository
        .delete(&MessageId::from(5), Folder::Inbox)
        .await
        .unwrap();
    assert!(
        store
            .repository
            .delete(&MessageId::from(5), Folder::Inbox)
            .await
            .unwrap_err()
            .is_not_found()
    );
    store.engine.close().await;
}

#[tokio::test]
async fn move_leaves_message_in_exactly_one_folder() {
    let store = Store::open();
    let original = message(11, Folder::Inbox).with_folder_data(FolderData::Inbox { flagged: true });
    store.repository.save(&original).await.unwrap();

    let moved = store
        .repository
        .move_message(&original.id, Folder::Inbox, Folder::Trash)
        .await
        .unwrap();
    assert_eq!(moved.folder(), Folder::Trash);
    assert!(moved.is_flagged());

    let exists = |folder: Folder| {
        let repo = store.repository.clone();
        let id = original.id.clone();
        async move { repo.exists(&id, folder).await.unwrap() }
    };
    assert!(!exists(Folder::Inbox).await);
    assert!(exists(Folder::Trash).await);

    let err = store
        .repository
        .move_message(&original.id, Folder::Inbox, Folder::Trash)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(exists(Folder::Trash).await);
    store.engine.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_moves_are_serialized() {
    let store = Store::open();
    let messages: Vec<Message> = (1..=16).map(|uid| message(uid, Folder::Inbox)).collect();
    store
        .repository
        .save_batch(&messages, BatchOptions::default())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for uid in 1..=16_u32 {
        let repository = store.repository.clone();
        handles.push(tokio::spawn(async move {
            repository
                .move_message(&MessageId::from(uid), Folder::Inbox, Folder::Trash)
                .await
        }));
    }
    let mut failures = Vec::new();
    for handle in handles {
        if let Err(e) = handle.await.unwrap() {
            failures.push(e.to_string());
        }
    }

    assert!(failures.is_empty(), "moves failed: {failures:?}");
    assert_eq!(store.repository.count(Folder::Inbox).await.unwrap(), 0);
    assert_eq!(store.repository.count(Folder::Trash).await.unwrap(), 16);
    store.engine.close().await;
}

#[tokio::test]
async fn keyword_search_across_folders_keeps_provenance() {
    let store = Store::open();
    store
        .repository
        .save(&message(1, Folder::Inbox).with_subject("Weekly meeting"))
        .await
        .unwrap();
    store
        .repository
        .save(&message(2, Folder::Sent).with_body("See you at the meeting"))
        .await
        .unwrap();
    store
        .repository
        .save(&message(3, Folder::Drafts).with_subject("meeting agenda"))
        .await
        .unwrap();

    let query = SearchQuery::builder()
        .keyword("meeting")
        .in_folders(&[Folder::Inbox, Folder::Sent])
        .build()
        .unwrap();
    let result = store.search().search(&query).await.unwrap();

    assert_eq!(result.messages.len(), 2);
    assert_eq!(result.total_count, 2);
    for m in &result.messages {
        let expected = if m.id.as_str() == "1" {
            Folder::Inbox
        } else {
            Folder::Sent
        };
        assert_eq!(m.folder(), expected);
    }
    store.engine.close().await;
}

#[tokio::test]
async fn search_pages_are_consistent_with_total() {
    let store = Store::open();
    let inbox: Vec<Message> = (1..=9)
        .map(|uid| message(uid, Folder::Inbox).with_subject("invoice"))
        .collect();
    let trash: Vec<Message> = (10..=13)
        .map(|uid| message(uid, Folder::Trash).with_subject("old invoice"))
        .collect();
    store.repository.save_batch(&inbox, BatchOptions::default()).await.unwrap();
    store.repository.save_batch(&trash, BatchOptions::default()).await.unwrap();

    let total = 13_u32;
    for (limit, offset) in [(5, 0), (5, 10), (20, 0), (3, 13), (4, 20)] {
        let query = SearchQuery::builder()
            .keyword("invoice")
            .limit(limit)
            .offset(offset)
            .build()
            .unwrap();
        let result = store.search().search(&query).await.unwrap();
        let expected = limit.min(total.saturating_sub(offset));
        assert_eq!(result.messages.len(), expected as usize, "limit {limit} offset {offset}");
        assert_eq!(result.total_count, u64::from(total));
        assert_eq!(result.has_more(), offset + expected < total);
    }

    let query = SearchQuery::builder()
        .keyword("invoice")
        .filter(SearchField::Flagged, SearchOperator::Equals, false)
        .filter(SearchField::Subject, SearchOperator::StartsWith, "old")
        .build()
        .unwrap();
    let result = store.search().search(&query).await.unwrap();
    assert_eq!(result.total_count, 4);
    assert!(result.messages.iter().all(|m| m.folder() == Folder::Trash));
    store.engine.close().await;
}

#[tokio::test]
async fn read_only_transaction_sees_one_snapshot() {
    let store = Store::open();
    store.repository.save(&message(1, Folder::Inbox)).await.unwrap();

    let manager = TransactionManager::for_engine(&store.engine).await.unwrap();
    let mut tx = manager.begin_read_only().await.unwrap();
    let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inbox")
        .fetch_one(tx.conn())
        .await
        .unwrap();

    store.repository.save(&message(2, Folder::Inbox)).await.unwrap();

    let during: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inbox")
        .fetch_one(tx.conn())
        .await
        .unwrap();
    tx.finish(Ok(())).await.unwrap();

    assert_eq!(before, 1);
    assert_eq!(during, before);
    assert_eq!(store.repository.count(Folder::Inbox).await.unwrap(), 2);
    store.engine.close().await;
}

#[tokio::test]
async fn concurrent_writers_share_one_engine() {
    let store = Store::open();
    let mut handles = Vec::new();
    for worker in 0..8_u32 {
        let repository = store.repository.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..10_u32 {
                let uid = worker * 100 + i + 1;
                repository.save(&message(uid, Folder::Inbox)).await.unwrap();
                repository
                    .mark_read(&MessageId::from(uid), Folder::Inbox)
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.repository.count(Folder::Inbox).await.unwrap(), 80);
    assert_eq!(store.repository.get_highest_uid(Folder::Inbox).await, 710);

    let stats = store.engine.get_pool_stats().await;
    assert!(stats.size.unwrap() <= stats.capacity());
    assert!(stats.database_size_bytes.unwrap() > 0);
    store.engine.close().await;
}

#[tokio::test]
async fn health_report_for_file_store() {
    let store = Store::open();
    store.repository.save(&message(1, Folder::Sent)).await.unwrap();

    let health = HealthChecker::new(Arc::clone(&store.engine)).check_all().await;
    let status_of = |name: &str| {
        health
            .checks
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.status)
            .unwrap()
    };
    assert_eq!(status_of("connectivity"), HealthStatus::Healthy);
    assert_eq!(status_of("tables"), HealthStatus::Healthy);
    assert_ne!(health.status, HealthStatus::Unknown);

    let json = health.to_json().unwrap();
    assert!(json.contains("\"table_counts\""));

    store.engine.close().await;
    store.engine.close().await;
    assert!(!store.engine.health_check(true).await);
}

fn text() -> impl Strategy<Value = String> {
    "[ -~]{0,24}"
}

fn entries() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[ -~]{1,16}", 0..4)
}

fn utc_time() -> impl Strategy<Value = chrono::DateTime<Utc>> {
    (0_i64..4_000_000_000, 0_u32..1_000_000_000)
        .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
}

fn folder_data() -> impl Strategy<Value = FolderData> {
    prop_oneof![
        any::<bool>().prop_map(|flagged| FolderData::Inbox { flagged }),
        (
            prop_oneof![
                Just(DeliveryStatus::Pending),
                Just(DeliveryStatus::Sent),
                Just(DeliveryStatus::Failed),
            ],
            proptest::option::of(utc_time()),
        )
            .prop_map(|(status, send_at)| FolderData::Sent { status, send_at }),
        Just(FolderData::Drafts),
        (any::<bool>(), utc_time())
            .prop_map(|(flagged, deleted_at)| FolderData::Trash { flagged, deleted_at }),
    ]
}

prop_compose! {
    fn any_message()(
        uid in 1_u32..1_000_000,
        subject in text(),
        sender in text(),
        recipients in entries(),
        seconds in 0_i64..3_000_000_000,
        body in proptest::option::of(text()),
        attachments in entries(),
        is_read in any::<bool>(),
        folder_data in folder_data(),
    ) -> Message {
        let received_at = chrono::DateTime::from_timestamp(seconds, 0).unwrap().naive_utc();
        let mut m = Message::new(MessageId::from(uid), folder_data.folder(), received_at)
            .with_subject(subject)
            .with_sender(sender)
            .with_recipients(recipients)
            .with_attachments(attachments)
            .with_folder_data(folder_data);
        m.body = body;
        m.is_read = is_read;
        m
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn saved_messages_read_back_unchanged(m in any_message()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let found = runtime.block_on(async {
            let store = Store::open();
            store.repository.save(&m).await.unwrap();
            let found = store.repository.find_by_id(&m.id, m.folder()).await.unwrap();
            store.engine.close().await;
            found
        });
        prop_assert_eq!(found, Some(m));
    }
}
