//! Test helpers and utilities for integration testing.
//!
//! Provides an in-memory database, configuration fixtures and helpers for
//! waiting on builds that run on background tasks.

#![allow(dead_code)]

use std::time::Duration;

use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use cicd_server::migrations::Migrator;
use cicd_server::models::build::{self, BuildStatus};
use cicd_server::models::configuration;
use cicd_server::services::configuration::{ConfigurationService, NewConfiguration};
use cicd_server::services::{BuildScheduler, BuildStore, SchedulerSettings};
use cicd_server::state::AppState;

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run test migrations");

    db
}

/// Scheduler settings with a short progress period
pub fn test_settings() -> SchedulerSettings {
    SchedulerSettings {
        progress_interval: Duration::from_millis(20),
        broadcaster_grace: Duration::from_millis(500),
        shell: "sh".to_string(),
    }
}

pub fn create_test_scheduler(db: &DatabaseConnection) -> BuildScheduler {
    BuildScheduler::new(db.clone(), test_settings())
}

pub fn build_app_state(db: DatabaseConnection) -> AppState {
    let scheduler = create_test_scheduler(&db);
    AppState::new(db, scheduler)
}

/// Create a configuration running `steps` in `project_path`
pub async fn create_test_config(
    db: &DatabaseConnection,
    name: &str,
    project_path: &str,
    steps: &[&str],
    max_queue_length: i32,
) -> configuration::Model {
    ConfigurationService::new(db.clone())
        .create(NewConfiguration {
            name: name.to_string(),
            project_path: project_path.to_string(),
            build_steps: steps.iter().map(|s| s.to_string()).collect(),
            max_queue_length: Some(max_queue_length),
        })
        .await
        .expect("Failed to create test configuration")
}

/// Poll until the build reaches `status`, panicking after a timeout
pub async fn wait_for_status(
    db: &DatabaseConnection,
    build_id: i64,
    status: BuildStatus,
) -> build::Model {
    let store = BuildStore::new(db.clone());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);

    loop {
        let build = store.get(build_id).await.expect("Failed to load build");
        if build.status == status {
            return build;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "Build #{} did not reach {} (currently {})",
                build_id, status, build.status
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until no build holds the execution slot and nothing is queued
pub async fn wait_until_idle(db: &DatabaseConnection, scheduler: &BuildScheduler) {
    let store = BuildStore::new(db.clone());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);

    loop {
        let queued = store.list_queued().await.expect("Failed to list queue");
        if queued.is_empty() && scheduler.running_build().await.is_none() {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("Scheduler did not become idle");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
