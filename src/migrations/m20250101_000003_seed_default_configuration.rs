//! Migration: Ensure at least one build configuration exists

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        use crate::models::configuration::{self, DEFAULT_MAX_QUEUE_LENGTH};
        use crate::models::prelude::*;

        let db = manager.get_connection();

        if Configuration::find().count(db).await? > 0 {
            return Ok(());
        }

        let now = chrono::Utc::now();
        let default_config = configuration::ActiveModel {
            name: Set("Default Configuration".to_string()),
            api_token: Set(uuid::Uuid::new_v4().to_string()),
            project_path: Set(String::new()),
            build_steps: Set(String::new()),
            max_queue_length: Set(DEFAULT_MAX_QUEUE_LENGTH),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        default_config.insert(db).await?;

        Ok(())
    }

    async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
        // Seeding is not reversible - the configuration may have been edited
        Ok(())
    }
}
