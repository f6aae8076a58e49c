use anyhow::{Context, Result};
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;

use crate::config::{DatabaseConfig, redact_database_url};

/// Hands out fresh connection pools for one configured database.
///
/// Callers that need to reconnect ask the factory again instead of mutating a
/// shared handle.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    label: &'static str,
    config: DatabaseConfig,
}

impl ConnectionFactory {
    pub fn new(label: &'static str, config: DatabaseConfig) -> Self {
        assert!(!label.is_empty(), "Connection label cannot be empty");
        Self { label, config }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn redacted_url(&self) -> String {
        redact_database_url(&self.config.url)
    }

    pub async fn connect(&self) -> Result<DatabaseConnection> {
        self.config.ensure_bounds()?;

        let mut options = ConnectOptions::new(self.config.url.clone());
        options
            .max_connections(self.config.max_connections)
            .sqlx_logging(true)
            .sqlx_logging_level(tracing::log::LevelFilter::Debug)
            .acquire_timeout(self.config.acquire_timeout());

        if let Some(min) = self.config.min_connections {
            options.min_connections(min);
        }

        let connection = Database::connect(options).await.with_context(|| {
            format!(
                "Failed to connect to {} database at {}",
                self.label,
                self.redacted_url()
            )
        })?;
        info!(
            "Connected to {} database at {}",
            self.label,
            self.redacted_url()
        );
        Ok(connection)
    }
}

pub async fn run_migrations(database: &DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}
