//! SeaORM entities for the two tables the service owns.

pub mod migration_checkpoint;
pub mod patient;
