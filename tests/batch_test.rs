//! Batch coordinator integration tests

use std::sync::Arc;

use granary::db::{batches, ledger, Db};
use granary::types::RewardEvent;
use granary::{BatchMode, BatchStatus, Config, Currency, GranaryService};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn service_with(mut tweak: impl FnMut(&mut Config)) -> GranaryService {
    let mut config = Config::default();
    tweak(&mut config);
    let db = Arc::new(Db::open_in_memory().unwrap());
    GranaryService::new(db, &config)
}

fn register_chain(service: &GranaryService, len: usize) -> Vec<i64> {
    let mut ids = Vec::new();
    let mut parent: Option<String> = None;
    for _ in 0..len {
        let row = service.register_participant(parent.as_deref()).unwrap();
        parent = Some(row.public_code.clone());
        ids.push(row.id);
    }
    ids
}

fn batch(service: &GranaryService, batch_id: &str) -> batches::RewardBatchRow {
    service
        .db()
        .with_conn(|conn| batches::get_batch(conn, batch_id))
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_completed_batch_is_idempotent() {
    let service = service_with(|_| {});
    let ids = register_chain(&service, 2);

    let batch_id = service
        .queue_reward(ids[1], dec!(1000), Currency::Coin)
        .await
        .unwrap();
    assert_eq!(batch(&service, &batch_id).status, BatchStatus::Completed);

    let entries_before = service
        .db()
        .with_conn(|conn| ledger::entries_for_source(conn, &batch_id))
        .unwrap()
        .len();

    // Re-driving the same batch id returns the stored result untouched
    let outcome = service.coordinator().drive_batch(&batch_id).await.unwrap();
    assert_eq!(outcome.total_distributed, dec!(50));

    let entries_after = service
        .db()
        .with_conn(|conn| ledger::entries_for_source(conn, &batch_id))
        .unwrap()
        .len();
    assert_eq!(entries_before, entries_after);

    let row = batch(&service, &batch_id);
    assert_eq!(row.status, BatchStatus::Completed);
    assert_eq!(row.attempts, 1);
}

#[tokio::test]
async fn test_invalid_event_marked_failed_without_retries() {
    let service = service_with(|c| {
        c.batch.max_attempts = 3;
        c.batch.retry_base_delay_ms = 1;
    });
    register_chain(&service, 2);

    // A malformed row planted directly in the log (enqueue would reject it)
    let event = RewardEvent {
        batch_id: "planted-bad".to_string(),
        source_participant_id: 1,
        amount: dec!(-100),
        currency: Currency::Coin,
    };
    service
        .db()
        .with_conn_mut(|conn| batches::insert_batch(conn, &event, 0))
        .unwrap();

    let err = service.coordinator().drive_batch("planted-bad").await;
    assert!(err.is_err());

    let row = batch(&service, "planted-bad");
    assert_eq!(row.status, BatchStatus::Failed);
    assert!(row.error_message.is_some());
    // Validation failures are deterministic: one attempt, no retries
    assert_eq!(row.attempts, 1);
}

#[tokio::test]
async fn test_recovery_redrives_stuck_processing() {
    let service = service_with(|c| c.batch.stale_processing_secs = 1);
    let ids = register_chain(&service, 2);

    // Simulate a crash mid-flight: row stuck in processing, long ago
    let event = RewardEvent {
        batch_id: "stuck-1".to_string(),
        source_participant_id: ids[1],
        amount: dec!(1000),
        currency: Currency::Coin,
    };
    service
        .db()
        .with_conn_mut(|conn| {
            batches::insert_batch(conn, &event, 0)?;
            batches::mark_processing(conn, "stuck-1", 0)
        })
        .unwrap();

    let recovered = service.coordinator().recover().await.unwrap();
    assert_eq!(recovered, 1);

    let row = batch(&service, "stuck-1");
    assert_eq!(row.status, BatchStatus::Completed);
    assert_eq!(row.total_distributed, dec!(50));

    // The sweep is idempotent: nothing left to recover
    assert_eq!(service.coordinator().recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_recovery_leaves_exhausted_failures_failed() {
    let service = service_with(|c| c.batch.stale_processing_secs = 1);

    let event = RewardEvent {
        batch_id: "dead-1".to_string(),
        source_participant_id: 404,
        amount: dec!(-1),
        currency: Currency::Coin,
    };
    service
        .db()
        .with_conn_mut(|conn| batches::insert_batch(conn, &event, 0))
        .unwrap();

    assert_eq!(service.coordinator().recover().await.unwrap(), 0);
    let row = batch(&service, "dead-1");
    assert_eq!(row.status, BatchStatus::Failed);
}

#[tokio::test]
async fn test_batched_mode_flushes_on_threshold() {
    let service = service_with(|c| {
        c.batch.mode = BatchMode::Batched;
        c.batch.batch_size = 3;
    });
    let ids = register_chain(&service, 2);

    let b1 = service
        .queue_reward(ids[1], dec!(100), Currency::Coin)
        .await
        .unwrap();
    let b2 = service
        .queue_reward(ids[1], dec!(100), Currency::Coin)
        .await
        .unwrap();

    // Below the threshold nothing is processed yet
    assert_eq!(batch(&service, &b1).status, BatchStatus::Queued);
    assert_eq!(batch(&service, &b2).status, BatchStatus::Queued);

    let b3 = service
        .queue_reward(ids[1], dec!(100), Currency::Coin)
        .await
        .unwrap();

    // The third event crossed the threshold and flushed the whole buffer
    for id in [&b1, &b2, &b3] {
        assert_eq!(batch(&service, id).status, BatchStatus::Completed);
    }
    assert_eq!(batch(&service, &b3).total_distributed, dec!(5));
}

#[tokio::test]
async fn test_explicit_flush_drains_buffer() {
    let service = service_with(|c| {
        c.batch.mode = BatchMode::Batched;
        c.batch.batch_size = 100;
    });
    let ids = register_chain(&service, 2);

    service
        .queue_reward(ids[1], dec!(100), Currency::Coin)
        .await
        .unwrap();
    service
        .queue_reward(ids[1], dec!(200), Currency::Coin)
        .await
        .unwrap();

    let summary = service.coordinator().flush().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 0);

    // A second flush has nothing to do
    let summary = service.coordinator().flush().await.unwrap();
    assert_eq!(summary.processed, 0);
}

#[tokio::test]
async fn test_queued_totals_accumulate_on_inviter() {
    let service = service_with(|_| {});
    let ids = register_chain(&service, 2);

    service
        .queue_reward(ids[1], dec!(1000), Currency::Coin)
        .await
        .unwrap();
    service
        .queue_reward(ids[1], dec!(1000), Currency::Coin)
        .await
        .unwrap();

    let balance = service
        .db()
        .with_conn(|conn| {
            granary::db::participants::get_balance(conn, ids[0], Currency::Coin)
        })
        .unwrap();
    assert_eq!(balance.main, dec!(100));
    assert_eq!(balance.accumulator, Decimal::ZERO);
}
