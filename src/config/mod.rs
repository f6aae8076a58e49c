use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

pub const DEFAULT_UNIT_NAME: &str = "patients";
pub const DEFAULT_BATCH_SIZE: u64 = 500;
pub const DEFAULT_SAMPLE_SIZE: u64 = 100;
pub const MAX_BATCH_SIZE: u64 = 10_000;
pub const MAX_SAMPLE_SIZE: u64 = 10_000;

const HOSTED_POOLER_PORT: &str = ":6543";
const HOSTED_DIRECT_PORT: &str = ":5432";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default = "ApiConfig::default_environment")]
    pub environment: String,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path = std::env::var("PATIENT_API_CONFIG")
            .unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("PATIENT_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            bail!("Database URL must be specified");
        }
        if self.server.port == 0 {
            bail!("Server port must be greater than zero");
        }
        self.database.url = normalize_database_url(&self.database.url, ConnectionRole::Application)?;
        self.database.ensure_bounds()?;
        Ok(())
    }

    fn default_environment() -> String {
        "development".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
    pub min_connections: Option<u32>,
    pub acquire_timeout_ms: Option<u64>,
}

impl DatabaseConfig {
    /// Single-purpose connection settings used by the migration tooling.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 4,
            min_connections: None,
            acquire_timeout_ms: None,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        let millis = self.acquire_timeout_ms.unwrap_or(10_000);
        assert!(millis >= 100, "Acquire timeout must be at least 100ms");
        Duration::from_millis(millis)
    }

    pub fn ensure_bounds(&self) -> Result<()> {
        if self.max_connections == 0 || self.max_connections > 128 {
            bail!(
                "max_connections must be within 1..=128, got {}",
                self.max_connections
            );
        }
        if let Some(min) = self.min_connections {
            if min > self.max_connections {
                bail!("min_connections ({min}) exceeds max_connections");
            }
        }
        if let Some(millis) = self.acquire_timeout_ms {
            if !(100..=120_000).contains(&millis) {
                bail!("acquire_timeout_ms must be within 100..=120000, got {millis}");
            }
        }
        Ok(())
    }

    const fn default_max_connections() -> u32 {
        10
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "CorsConfig::default_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Self::default_origins(),
        }
    }
}

impl CorsConfig {
    fn default_origins() -> Vec<String> {
        vec![
            "http://localhost:5173".to_string(),
            "http://localhost:3000".to_string(),
        ]
    }
}

/// What a connection is used for; hosted databases expose a pooler port for
/// application traffic and a direct port for schema and data migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Application,
    Migration,
}

/// Enforces TLS for hosted (Supabase) connection strings and checks that the
/// port matches the connection role. Other URLs pass through untouched.
pub fn normalize_database_url(url: &str, role: ConnectionRole) -> Result<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        bail!("Database URL cannot be empty");
    }
    if !is_hosted_url(trimmed) {
        return Ok(trimmed.to_string());
    }

    let mut normalized = trimmed.to_string();
    if !normalized.contains("sslmode=") {
        let separator = if normalized.contains('?') { '&' } else { '?' };
        normalized.push(separator);
        normalized.push_str("sslmode=require");
    } else if !normalized.contains("sslmode=require") && !normalized.contains("sslmode=prefer") {
        bail!("Hosted database URL must use sslmode=require; TLS cannot be disabled");
    }

    match role {
        ConnectionRole::Application if normalized.contains(HOSTED_DIRECT_PORT) => bail!(
            "Application database URL should use the connection pooler (port 6543), not the direct port 5432"
        ),
        ConnectionRole::Migration if normalized.contains(HOSTED_POOLER_PORT) => bail!(
            "Migration database URL should use the direct connection (port 5432), not the pooler port 6543"
        ),
        _ => Ok(normalized),
    }
}

fn is_hosted_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains("supabase")
}

/// Host portion of a connection URL, safe to log.
pub fn redact_database_url(url: &str) -> String {
    match url.rsplit_once('@') {
        Some((_, host)) => host.to_string(),
        None if url.starts_with("sqlite:") => url.to_string(),
        None => "N/A".to_string(),
    }
}

/// Everything a migration or verification run needs, built once at start-up.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub source: DatabaseConfig,
    pub destination: DatabaseConfig,
    pub unit_name: String,
    pub batch_size: u64,
    pub sample_size: u64,
    pub skip_schema: bool,
}

impl MigrationSettings {
    pub fn new(source_url: &str, destination_url: &str) -> Result<Self> {
        let source = normalize_database_url(source_url, ConnectionRole::Migration)
            .context("Invalid source database URL")?;
        let destination = normalize_database_url(destination_url, ConnectionRole::Migration)
            .context("Invalid destination database URL")?;
        Ok(Self {
            source: DatabaseConfig::for_url(source),
            destination: DatabaseConfig::for_url(destination),
            unit_name: DEFAULT_UNIT_NAME.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            sample_size: DEFAULT_SAMPLE_SIZE,
            skip_schema: false,
        })
    }

    pub fn with_unit_name(mut self, unit_name: impl Into<String>) -> Self {
        self.unit_name = unit_name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_sample_size(mut self, sample_size: u64) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_skip_schema(mut self, skip_schema: bool) -> Self {
        self.skip_schema = skip_schema;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let unit = self.unit_name.trim();
        if unit.is_empty() || unit.len() > 255 {
            bail!("Unit name must be 1..=255 characters");
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            bail!(
                "Batch size must be within 1..={MAX_BATCH_SIZE}, got {}",
                self.batch_size
            );
        }
        if self.sample_size == 0 || self.sample_size > MAX_SAMPLE_SIZE {
            bail!(
                "Sample size must be within 1..={MAX_SAMPLE_SIZE}, got {}",
                self.sample_size
            );
        }
        self.source.ensure_bounds()?;
        self.destination.ensure_bounds()?;
        Ok(())
    }

    /// Copies always read the `patients` table, so the unit must name it.
    pub fn ensure_copyable(&self) -> Result<()> {
        if self.unit_name.trim() != DEFAULT_UNIT_NAME {
            bail!(
                "Only the {DEFAULT_UNIT_NAME} table can be copied, got {:?}",
                self.unit_name
            );
        }
        Ok(())
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
