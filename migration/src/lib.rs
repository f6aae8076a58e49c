pub use sea_orm_migration::prelude::*;

mod m20251201_000001_create_patients_table;
mod m20251201_000002_create_migration_checkpoints_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251201_000001_create_patients_table::Migration),
            Box::new(m20251201_000002_create_migration_checkpoints_table::Migration),
        ]
    }
}
