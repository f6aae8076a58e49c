use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Patients::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Patients::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Patients::PatientId)
                            .string_len(50)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Patients::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Patients::Age)
                            .integer()
                            .not_null()
                            .check(Expr::col(Patients::Age).gt(0)),
                    )
                    .col(ColumnDef::new(Patients::Gender).string_len(20).not_null())
                    .col(
                        ColumnDef::new(Patients::MedicalCondition)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Patients::LastVisit).date().not_null())
                    .col(
                        ColumnDef::new(Patients::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Patients::UpdatedAt)
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
                    .name("idx_patients_patient_id")
                    .table(Patients::Table)
                    .col(Patients::PatientId)
                    .to_owned(),
            )
            .await?;

        // Search and sort by name
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_patients_name")
                    .table(Patients::Table)
                    .col(Patients::Name)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Patients::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Patients {
    Table,
    Id,
    PatientId,
    Name,
    Age,
    Gender,
    MedicalCondition,
    LastVisit,
    CreatedAt,
    UpdatedAt,
}
