use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per migration unit, the durable resume point for data copies
        manager
            .create_table(
                Table::create()
                    .table(MigrationCheckpoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MigrationCheckpoints::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MigrationCheckpoints::UnitName)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(MigrationCheckpoints::LastRecordId)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MigrationCheckpoints::BatchNumber)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MigrationCheckpoints::RecordsMigrated)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MigrationCheckpoints::Status)
                            .string_len(50)
                            .not_null()
                            .check(Expr::col(MigrationCheckpoints::Status).is_in([
                                "in_progress",
                                "completed",
                                "failed",
                            ])),
                    )
                    .col(
                        ColumnDef::new(MigrationCheckpoints::ErrorMessage)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MigrationCheckpoints::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MigrationCheckpoints::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_migration_checkpoints_unit_name")
                    .table(MigrationCheckpoints::Table)
                    .col(MigrationCheckpoints::UnitName)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_migration_checkpoints_status")
                    .table(MigrationCheckpoints::Table)
                    .col(MigrationCheckpoints::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MigrationCheckpoints::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MigrationCheckpoints {
    Table,
    Id,
    UnitName,
    LastRecordId,
    BatchNumber,
    RecordsMigrated,
    Status,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}
