use chrono::{Duration, Utc};
use sea_orm::EntityTrait;
use serde_json::json;

use ::common::JobStatus;
use server::entity::dead_letter_item;

use crate::common::{TestApp, routes};

mod dlq_listing {
    use super::*;

    #[tokio::test]
    async fn lists_newest_failure_first() {
        let app = TestApp::spawn().await;
        let now = Utc::now();
        app.seed_dead_letter("emails", "job-old", now - Duration::minutes(10))
            .await;
        app.seed_dead_letter("emails", "job-new", now).await;
        app.seed_dead_letter("emails", "job-mid", now - Duration::minutes(5))
            .await;

        let res = app.admin_get(routes::DLQ).await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["success"], true);

        let job_ids: Vec<&str> = res
            .data_array()
            .iter()
            .map(|item| item["job_id"].as_str().unwrap())
            .collect();
        assert_eq!(job_ids, ["job-new", "job-mid", "job-old"]);
        assert_eq!(res.body["pagination"]["total"], 3);
        assert_eq!(res.body["pagination"]["limit"], 50);
        assert_eq!(res.body["pagination"]["offset"], 0);
    }

    #[tokio::test]
    async fn limit_is_capped_at_one_hundred() {
        let app = TestApp::spawn().await;
        let now = Utc::now();
        for i in 0..120 {
            app.seed_dead_letter("emails", &format!("job-{i}"), now - Duration::seconds(i))
                .await;
        }

        let res = app.admin_get(&format!("{}?limit=500", routes::DLQ)).await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.data_array().len(), 100);
        assert_eq!(res.body["pagination"]["limit"], 100);
        assert_eq!(res.body["pagination"]["total"], 120);

        let res = app.admin_get(routes::DLQ).await;
        assert_eq!(res.data_array().len(), 50);
        assert_eq!(res.data_array()[0]["job_id"], "job-0");
    }

    #[tokio::test]
    async fn offset_skips_items() {
        let app = TestApp::spawn().await;
        let now = Utc::now();
        for i in 0..5 {
            app.seed_dead_letter("emails", &format!("job-{i}"), now - Duration::seconds(i))
                .await;
        }

        let res = app
            .admin_get(&format!("{}?limit=2&offset=3", routes::DLQ))
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        let job_ids: Vec<&str> = res
            .data_array()
            .iter()
            .map(|item| item["job_id"].as_str().unwrap())
            .collect();
        assert_eq!(job_ids, ["job-3", "job-4"]);
        assert_eq!(res.body["pagination"]["offset"], 3);
    }

    #[tokio::test]
    async fn filters_by_queue_name() {
        let app = TestApp::spawn().await;
        let now = Utc::now();
        app.seed_dead_letter("emails", "job-1", now).await;
        app.seed_dead_letter("reports", "job-2", now).await;

        let res = app
            .admin_get(&format!("{}?queue_name=reports", routes::DLQ))
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.data_array().len(), 1);
        assert_eq!(res.data_array()[0]["queue_name"], "reports");
        assert_eq!(res.body["pagination"]["total"], 1);
    }

    #[tokio::test]
    async fn negative_offset_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.admin_get(&format!("{}?offset=-1", routes::DLQ)).await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["success"], false);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn malformed_query_is_a_json_error() {
        let app = TestApp::spawn().await;

        let res = app.admin_get(&format!("{}?limit=lots", routes::DLQ)).await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }
}

mod dlq_get {
    use super::*;

    #[tokio::test]
    async fn returns_item_with_payload() {
        let app = TestApp::spawn().await;
        let id = app.seed_dead_letter("emails", "job-1", Utc::now()).await;

        let res = app.admin_get(&routes::dlq_item(id)).await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["success"], true);
        assert_eq!(res.body["data"]["id"], id);
        assert_eq!(res.body["data"]["payload"], json!({"job": "job-1"}));
        assert_eq!(res.body["data"]["attempts"], 5);
        assert_eq!(res.body["data"]["requeued"], false);
        assert!(res.body["data"]["requeued_at"].is_null());
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app.admin_get(&routes::dlq_item(9999)).await;
        assert_eq!(res.status, 404);
        assert_eq!(res.body["success"], false);
        assert_eq!(res.body["message"], "Not found");
        assert_eq!(res.body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn non_numeric_id_is_a_json_error() {
        let app = TestApp::spawn().await;

        let res = app.admin_get("/api/v1/dlq/abc").await;
        assert_eq!(res.status, 400, "{}", res.text);
        assert_eq!(res.body["success"], false);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }
}

mod dlq_requeue {
    use super::*;

    #[tokio::test]
    async fn requeue_creates_one_fresh_job() {
        let app = TestApp::spawn().await;
        let id = app.seed_dead_letter("emails", "job-1", Utc::now()).await;

        let res = app.admin_post(&routes::dlq_requeue(id)).await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["success"], true);
        assert_eq!(res.body["message"], "Requeued");

        let new_job_id = res.body["job_id"].as_str().unwrap().to_string();
        assert_ne!(new_job_id, "job-1");

        let job = app
            .queue
            .get_job(&new_job_id)
            .await
            .unwrap()
            .expect("requeued job should exist");
        assert!(job.is_status(JobStatus::Waiting));
        assert_eq!(job.queue_name, "emails");
        assert_eq!(job.payload, json!({"job": "job-1"}));
        assert_eq!(job.attempts_made, 0);
        assert_eq!(job.max_attempts, 5);

        let counts = app.queue.counts(Some("emails")).await.unwrap();
        assert_eq!(counts.waiting, 1);

        let row = dead_letter_item::Entity::find_by_id(id)
            .one(&app.db)
            .await
            .unwrap()
            .unwrap();
        assert!(row.requeued);
        assert!(row.requeued_at.is_some());
        assert_eq!(row.metadata["requeue"]["job_id"], new_job_id.as_str());
    }

    #[tokio::test]
    async fn second_requeue_conflicts() {
        let app = TestApp::spawn().await;
        let id = app.seed_dead_letter("emails", "job-1", Utc::now()).await;

        let first = app.admin_post(&routes::dlq_requeue(id)).await;
        assert_eq!(first.status, 200, "{}", first.text);

        let second = app.admin_post(&routes::dlq_requeue(id)).await;
        assert_eq!(second.status, 409);
        assert_eq!(second.body["success"], false);
        assert_eq!(second.body["code"], "CONFLICT");
        assert_eq!(second.body["message"], "Already requeued");

        let counts = app.queue.counts(Some("emails")).await.unwrap();
        assert_eq!(counts.waiting, 1, "the second requeue must not enqueue");
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app.admin_post(&routes::dlq_requeue(4242)).await;
        assert_eq!(res.status, 404);
        assert_eq!(res.body["message"], "Not found");

        let counts = app.queue.counts(None).await.unwrap();
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn non_numeric_id_is_a_json_error() {
        let app = TestApp::spawn().await;
        app.seed_dead_letter("emails", "job-1", Utc::now()).await;

        let res = app.admin_post("/api/v1/dlq/abc/requeue").await;
        assert_eq!(res.status, 400, "{}", res.text);
        assert_eq!(res.body["success"], false);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");

        let counts = app.queue.counts(None).await.unwrap();
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn requeue_updates_pending_gauge_only() {
        let app = TestApp::spawn().await;
        let id = app.seed_dead_letter("emails", "job-1", Utc::now()).await;
        app.seed_dead_letter("emails", "job-2", Utc::now()).await;
        app.watcher().refresh_gauges().await.unwrap();

        let res = app.admin_post(&routes::dlq_requeue(id)).await;
        assert_eq!(res.status, 200, "{}", res.text);

        let snapshot = app.metrics.snapshot();
        assert_eq!(snapshot.dlq_size, 2);
        assert_eq!(snapshot.dlq_pending_size, 1);
    }
}

mod dlq_stats {
    use super::*;

    #[tokio::test]
    async fn stats_count_rows_by_state_and_queue() {
        let app = TestApp::spawn().await;
        let now = Utc::now();
        let id = app.seed_dead_letter("emails", "job-1", now).await;
        app.seed_dead_letter("emails", "job-2", now).await;
        app.seed_dead_letter("reports", "job-3", now).await;

        let res = app.admin_post(&routes::dlq_requeue(id)).await;
        assert_eq!(res.status, 200, "{}", res.text);

        let res = app.admin_get(routes::DLQ_STATS).await;
        assert_eq!(res.status, 200, "{}", res.text);
        let data = &res.body["data"];
        assert_eq!(data["total"], 3);
        assert_eq!(data["pending"], 2);
        assert_eq!(data["requeued"], 1);
        assert_eq!(data["by_queue"]["emails"], 2);
        assert_eq!(data["by_queue"]["reports"], 1);
        assert_eq!(data["metrics"]["dlq_pending_size"], 2);
    }

    #[tokio::test]
    async fn metrics_endpoint_is_outside_admin_gate() {
        let app = TestApp::spawn().await;

        let res = app.get_without_token(routes::METRICS).await;
        assert_eq!(res.status, 200);
    }
}

mod dlq_auth {
    use super::*;

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.get_without_token(routes::DLQ).await;
        assert_eq!(res.status, 401);
        assert_eq!(res.body["success"], false);
        assert_eq!(res.body["code"], "TOKEN_MISSING");
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let app = TestApp::spawn().await;
        let id = app.seed_dead_letter("emails", "job-1", Utc::now()).await;

        let res = app.get_with_token(routes::DLQ, "not-the-token").await;
        assert_eq!(res.status, 401);
        assert_eq!(res.body["code"], "TOKEN_INVALID");

        let res = app
            .post_with_token(&routes::dlq_requeue(id), "not-the-token")
            .await;
        assert_eq!(res.status, 401);

        let row = dead_letter_item::Entity::find_by_id(id)
            .one(&app.db)
            .await
            .unwrap()
            .unwrap();
        assert!(!row.requeued);
    }
}
