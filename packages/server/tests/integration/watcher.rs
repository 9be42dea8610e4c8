use std::time::Duration;

use ::common::{EnqueueOptions, FailureNotification, JobStatus};
use mq::{FailDecision, Job};
use sea_orm::{ConnectionTrait, EntityTrait};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use worker::{WorkerConfig, WorkerPool};

use server::consumers::PromotionOutcome;
use server::dlq::{DlqService, sweep_once};
use server::entity::dead_letter_item;

use crate::common::{TestApp, instant_retries};

const QUEUE: &str = "emails";

/// Enqueue a job with `max_attempts` and fail it until it is exhausted.
async fn exhaust_job(app: &TestApp, max_attempts: u32) -> String {
    let job_id = app
        .queue
        .enqueue(
            QUEUE,
            json!({"to": "a@example.com"}),
            EnqueueOptions::default().max_attempts(max_attempts),
        )
        .await
        .unwrap();

    for attempt in 1..=max_attempts {
        let job = app
            .queue
            .claim_next(QUEUE, "test")
            .await
            .unwrap()
            .expect("job should be claimable");
        assert_eq!(job.job_id, job_id);
        let decision = app
            .queue
            .fail(&job_id, attempt, &format!("smtp refused #{attempt}"))
            .await
            .unwrap();
        if attempt == max_attempts {
            assert_eq!(decision, FailDecision::Exhausted);
        }
    }
    job_id
}

async fn exhausted_notification(app: &TestApp) -> FailureNotification {
    let mut failures = app.queue.exhausted_failures(10).await.unwrap();
    assert_eq!(failures.len(), 1);
    failures.remove(0)
}

async fn dlq_count(app: &TestApp) -> u64 {
    DlqService::new(&app.db).count(None).await.unwrap()
}

mod promotion {
    use super::*;

    #[tokio::test]
    async fn exhausted_job_is_promoted_end_to_end() {
        let app = TestApp::spawn_with(instant_retries()).await;
        let shutdown = CancellationToken::new();
        let watcher_handle = app.watcher().spawn(shutdown.clone());

        let job_id = app
            .queue
            .enqueue(
                QUEUE,
                json!({"to": "a@example.com"}),
                EnqueueOptions::default().max_attempts(3),
            )
            .await
            .unwrap();

        let pool = WorkerPool::new(
            app.queue.clone(),
            QUEUE,
            WorkerConfig {
                concurrency: 2,
                poll_interval_ms: 20,
                ..Default::default()
            },
            |_job: Job| async { Err::<(), _>(anyhow::anyhow!("smtp refused")) },
        )
        .unwrap();
        let pool_token = shutdown.clone();
        let pool_handle = tokio::spawn(async move { pool.run(pool_token).await });

        tokio::time::timeout(Duration::from_secs(20), async {
            while dlq_count(&app).await == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job was not promoted in time");

        let (items, total) = DlqService::new(&app.db)
            .list(Some(QUEUE), None, 10, 0)
            .await
            .unwrap();
        assert_eq!(total, 1);
        let item = &items[0];
        assert_eq!(item.job_id, job_id);
        assert_eq!(item.attempts, 3);
        assert_eq!(item.last_error, "smtp refused");
        assert_eq!(item.payload, json!({"to": "a@example.com"}));
        assert_eq!(item.metadata["error_code"], "MAX_RETRIES_EXCEEDED");
        assert_eq!(item.metadata["max_attempts"], 3);
        assert_eq!(item.metadata["retry_history"].as_array().unwrap().len(), 3);

        // Archiving is the last step, after the metrics are updated.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = app.queue.get_job(&job_id).await.unwrap().unwrap();
                if job.is_status(JobStatus::Removed) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job was not archived");

        let snapshot = app.metrics.snapshot();
        assert_eq!(snapshot.dlq_size, 1);
        assert_eq!(snapshot.dlq_pending_size, 1);
        assert_eq!(snapshot.dlq_add_total, 1);

        shutdown.cancel();
        pool_handle.await.unwrap().unwrap();
        watcher_handle.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_notifications_insert_once() {
        let app = TestApp::spawn_with(instant_retries()).await;
        exhaust_job(&app, 2).await;
        let notification = exhausted_notification(&app).await;
        let watcher = app.watcher();

        let outcomes = futures::future::join_all(
            (0..8).map(|_| watcher.promote(&notification)),
        )
        .await;

        let mut promoted = 0;
        for outcome in outcomes {
            match outcome.unwrap() {
                PromotionOutcome::Promoted { .. } => promoted += 1,
                PromotionOutcome::AlreadyPromoted { .. } | PromotionOutcome::Gone => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(promoted, 1);
        assert_eq!(dlq_count(&app).await, 1);
        assert_eq!(app.metrics.snapshot().dlq_add_total, 1);

        // A late redelivery after archiving is a no-op.
        assert_eq!(
            watcher.promote(&notification).await.unwrap(),
            PromotionOutcome::Gone
        );
        assert_eq!(app.metrics.snapshot().dlq_add_total, 1);
    }

    #[tokio::test]
    async fn duplicate_hit_finishes_interrupted_promotion() {
        let app = TestApp::spawn_with(instant_retries()).await;
        let job_id = exhaust_job(&app, 1).await;
        let notification = exhausted_notification(&app).await;

        // Simulate a crash after the insert but before the archive.
        let item_id = app.seed_dead_letter(QUEUE, &job_id, chrono::Utc::now()).await;

        let outcome = app.watcher().promote(&notification).await.unwrap();
        assert_eq!(outcome, PromotionOutcome::AlreadyPromoted { item_id });

        let job = app.queue.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.is_status(JobStatus::Removed));
        assert_eq!(app.metrics.snapshot().dlq_add_total, 0);
    }

    #[tokio::test]
    async fn archive_failure_still_counts_the_promotion_once() {
        let app = TestApp::spawn_with(instant_retries()).await;
        let job_id = exhaust_job(&app, 1).await;
        let notification = exhausted_notification(&app).await;
        let watcher = app.watcher();

        app.db
            .execute_unprepared(
                "CREATE TRIGGER block_archive BEFORE UPDATE ON job \
                 WHEN NEW.status = 'removed' \
                 BEGIN SELECT RAISE(ABORT, 'archive blocked'); END",
            )
            .await
            .unwrap();

        let outcome = watcher.promote(&notification).await.unwrap();
        assert!(matches!(outcome, PromotionOutcome::Promoted { .. }));
        assert_eq!(app.metrics.snapshot().dlq_add_total, 1);
        assert_eq!(app.metrics.snapshot().dlq_size, 1);

        let job = app.queue.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.is_status(JobStatus::Failed));

        app.db
            .execute_unprepared("DROP TRIGGER block_archive")
            .await
            .unwrap();

        let report = sweep_once(&watcher, 100).await.unwrap();
        assert_eq!(report.promoted, 0);
        assert_eq!(report.already_promoted, 1);

        let job = app.queue.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.is_status(JobStatus::Removed));
        assert_eq!(dlq_count(&app).await, 1);
        assert_eq!(app.metrics.snapshot().dlq_add_total, 1);
    }

    #[tokio::test]
    async fn retryable_job_is_not_promoted() {
        let app = TestApp::spawn_with(instant_retries()).await;
        let mut events = app.queue.subscribe();

        let job_id = app
            .queue
            .enqueue(QUEUE, json!({}), EnqueueOptions::default().max_attempts(3))
            .await
            .unwrap();
        app.queue.claim_next(QUEUE, "test").await.unwrap().unwrap();
        let decision = app.queue.fail(&job_id, 1, "flaky").await.unwrap();
        assert!(matches!(decision, FailDecision::Retry { attempt: 1, .. }));

        let notification = events.recv().await.unwrap();
        assert!(!notification.is_exhausted());

        let outcome = app.watcher().promote(&notification).await.unwrap();
        assert_eq!(outcome, PromotionOutcome::NotExhausted);
        assert_eq!(dlq_count(&app).await, 0);
    }

    #[tokio::test]
    async fn unknown_job_is_gone() {
        let app = TestApp::spawn().await;
        let notification = FailureNotification {
            job_id: "does-not-exist".into(),
            queue_name: QUEUE.into(),
            attempts_made: 5,
            max_attempts: 5,
            last_error: "boom".into(),
        };

        let outcome = app.watcher().promote(&notification).await.unwrap();
        assert_eq!(outcome, PromotionOutcome::Gone);
        assert_eq!(dlq_count(&app).await, 0);
    }

    #[tokio::test]
    async fn store_failure_leaves_job_failed() {
        let app = TestApp::spawn_with(instant_retries()).await;
        let job_id = exhaust_job(&app, 1).await;
        let notification = exhausted_notification(&app).await;

        app.db
            .execute_unprepared("DROP TABLE dead_letter_item")
            .await
            .unwrap();

        assert!(app.watcher().promote(&notification).await.is_err());

        let job = app.queue.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.is_status(JobStatus::Failed));
        assert_eq!(app.metrics.snapshot().dlq_add_total, 0);
    }
}

mod sweep {
    use super::*;

    #[tokio::test]
    async fn sweep_promotes_missed_failures() {
        let app = TestApp::spawn_with(instant_retries()).await;
        let first = exhaust_job(&app, 1).await;
        let second = exhaust_job(&app, 2).await;
        let watcher = app.watcher();

        let report = sweep_once(&watcher, 100).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.promoted, 2);
        assert_eq!(report.failed, 0);

        for job_id in [&first, &second] {
            let job = app.queue.get_job(job_id).await.unwrap().unwrap();
            assert!(job.is_status(JobStatus::Removed));
        }

        let rows = dead_letter_item::Entity::find().all(&app.db).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(app.metrics.snapshot().dlq_size, 2);

        let report = sweep_once(&watcher, 100).await.unwrap();
        assert_eq!(report.scanned, 0);
    }

    #[tokio::test]
    async fn sweep_respects_batch_size() {
        let app = TestApp::spawn_with(instant_retries()).await;
        for _ in 0..3 {
            exhaust_job(&app, 1).await;
        }
        let watcher = app.watcher();

        let report = sweep_once(&watcher, 2).await.unwrap();
        assert_eq!(report.promoted, 2);
        assert_eq!(dlq_count(&app).await, 2);

        let report = sweep_once(&watcher, 2).await.unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(dlq_count(&app).await, 3);
    }
}
