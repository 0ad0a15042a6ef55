//! Migration: Create builds table

use sea_orm_migration::prelude::*;

use super::m20250101_000001_create_configurations::Configurations;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Builds::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Builds::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Builds::ConfigId).big_integer().not_null())
                    .col(ColumnDef::new(Builds::Status).string_len(20).not_null())
                    .col(ColumnDef::new(Builds::Branch).string_len(100).not_null())
                    .col(ColumnDef::new(Builds::TriggeredBy).string_len(100).not_null())
                    .col(ColumnDef::new(Builds::Payload).json().not_null())
                    .col(
                        ColumnDef::new(Builds::ProjectPath)
                            .string_len(500)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Builds::TotalSteps)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Builds::CurrentStep)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Builds::StepTimes).json().not_null())
                    .col(ColumnDef::new(Builds::QueuePosition).integer().null())
                    .col(
                        ColumnDef::new(Builds::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Builds::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Builds::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Builds::Log).text().not_null().default(""))
                    .foreign_key(
                        ForeignKey::create()
                            .from(Builds::Table, Builds::ConfigId)
                            .to(Configurations::Table, Configurations::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_builds_status")
                    .table(Builds::Table)
                    .col(Builds::Status)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_builds_config_id")
                    .table(Builds::Table)
                    .col(Builds::ConfigId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_builds_queue_position")
                    .table(Builds::Table)
                    .col(Builds::QueuePosition)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Builds::Table).if_exists().to_owned())
            .await
    }
}

#[derive(Iden)]
#[iden = "builds"]
enum Builds {
    Table,
    Id,
    #[iden = "config_id"]
    ConfigId,
    Status,
    Branch,
    #[iden = "triggered_by"]
    TriggeredBy,
    Payload,
    #[iden = "project_path"]
    ProjectPath,
    #[iden = "total_steps"]
    TotalSteps,
    #[iden = "current_step"]
    CurrentStep,
    #[iden = "step_times"]
    StepTimes,
    #[iden = "queue_position"]
    QueuePosition,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "started_at"]
    StartedAt,
    #[iden = "completed_at"]
    CompletedAt,
    Log,
}
