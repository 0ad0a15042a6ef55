//! Startup recovery tests
//!
//! Covers:
//! - pending/running builds become failed-permanently
//! - queue positions are compacted to 1..N
//! - the queue head starts once recovery finishes

use chrono::Utc;
use serde_json::json;

mod common;
use common::{create_test_config, create_test_db, create_test_scheduler, wait_for_status, wait_until_idle};

use cicd_server::models::build::{self, BuildStatus};
use cicd_server::services::build_store::NewBuild;
use cicd_server::services::{reconcile, BuildStore};
use sea_orm::DatabaseConnection;

async fn insert_build(
    db: &DatabaseConnection,
    config_id: i64,
    status: BuildStatus,
    queue_position: Option<i32>,
) -> build::Model {
    BuildStore::new(db.clone())
        .create(NewBuild {
            config_id,
            status,
            branch: "main".to_string(),
            triggered_by: "test".to_string(),
            payload: json!({}),
            project_path: String::new(),
            total_steps: 1,
            queue_position,
            started_at: matches!(status, BuildStatus::Pending | BuildStatus::Running)
                .then(Utc::now),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_interrupted_builds_fail_permanently() {
    let db = create_test_db().await;
    let config = create_test_config(&db, "app", "", &["true"], 5).await;
    let running = insert_build(&db, config.id, BuildStatus::Running, None).await;
    let pending = insert_build(&db, config.id, BuildStatus::Pending, None).await;
    let finished = insert_build(&db, config.id, BuildStatus::Success, None).await;

    let scheduler = create_test_scheduler(&db);
    let report = reconcile(&scheduler).await.unwrap();

    assert_eq!(report.abandoned, vec![running.id, pending.id]);
    assert_eq!(report.requeued, 0);
    assert_eq!(report.promoted, None);

    let store = BuildStore::new(db.clone());
    for id in [running.id, pending.id] {
        let build = store.get(id).await.unwrap();
        assert_eq!(build.status, BuildStatus::FailedPermanently);
        assert!(build.completed_at.is_some());
        assert!(build
            .log
            .contains("Build marked as FAILED PERMANENTLY due to server restart at"));
    }

    // Finished builds are left alone
    let untouched = store.get(finished.id).await.unwrap();
    assert_eq!(untouched.status, BuildStatus::Success);
    assert!(untouched.log.is_empty());
}

#[tokio::test]
async fn test_renumber_closes_gaps() {
    let db = create_test_db().await;
    let config = create_test_config(&db, "app", "", &["true"], 5).await;
    let a = insert_build(&db, config.id, BuildStatus::Queued, Some(3)).await;
    let b = insert_build(&db, config.id, BuildStatus::Queued, Some(7)).await;
    let c = insert_build(&db, config.id, BuildStatus::Queued, Some(9)).await;

    let scheduler = create_test_scheduler(&db);
    let count = scheduler.renumber_queue().await.unwrap();
    assert_eq!(count, 3);

    let queued = BuildStore::new(db.clone()).list_queued().await.unwrap();
    let positions: Vec<(i64, Option<i32>)> =
        queued.iter().map(|b| (b.id, b.queue_position)).collect();
    assert_eq!(positions, vec![(a.id, Some(1)), (b.id, Some(2)), (c.id, Some(3))]);
}

#[tokio::test]
async fn test_reconcile_starts_queue_head() {
    let db = create_test_db().await;
    let config = create_test_config(&db, "app", "", &["echo recovered"], 5).await;
    let interrupted = insert_build(&db, config.id, BuildStatus::Running, None).await;
    let head = insert_build(&db, config.id, BuildStatus::Queued, Some(4)).await;
    let tail = insert_build(&db, config.id, BuildStatus::Queued, Some(6)).await;

    let scheduler = create_test_scheduler(&db);
    let report = reconcile(&scheduler).await.unwrap();

    assert_eq!(report.abandoned, vec![interrupted.id]);
    assert_eq!(report.promoted, Some(head.id));
    assert_eq!(report.requeued, 1);

    let store = BuildStore::new(db.clone());
    let waiting = store.get(tail.id).await.unwrap();
    assert!(
        waiting.status != BuildStatus::Queued || waiting.queue_position == Some(1),
        "tail should be first in line, got {:?}",
        waiting.queue_position
    );

    let head = wait_for_status(&db, head.id, BuildStatus::Success).await;
    assert!(head.log.contains("recovered"));
    wait_for_status(&db, tail.id, BuildStatus::Success).await;
    wait_until_idle(&db, &scheduler).await;
}

#[tokio::test]
async fn test_reconcile_on_empty_store() {
    let db = create_test_db().await;
    let scheduler = create_test_scheduler(&db);

    let report = reconcile(&scheduler).await.unwrap();

    assert!(report.abandoned.is_empty());
    assert_eq!(report.requeued, 0);
    assert_eq!(report.promoted, None);
    assert!(scheduler.running_build().await.is_none());
}
