use std::time::Instant;

use sea_orm::DatabaseConnection;

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub environment: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(database: DatabaseConnection, environment: impl Into<String>) -> Self {
        let environment = environment.into();
        assert!(
            !environment.trim().is_empty(),
            "Environment name must be configured"
        );
        Self {
            database,
            environment,
            start_time: Instant::now(),
        }
    }
}
