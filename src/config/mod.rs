use ::config::{Environment, File, FileFormat};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::storage::PoolSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] ::config::ConfigError),
    #[error("a [postgres] section is required when database.backend = postgres")]
    MissingPostgres,
    #[error("database.max_connections must be at least 1")]
    NoConnections,
    #[error("database.min_connections ({min}) exceeds database.max_connections ({max})")]
    MinAboveMax { min: u32, max: u32 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    /// Only used by the sqlite backend
    pub sqlite_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Clone, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl PostgresConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

impl DatabaseConfig {
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }
}

impl Config {
    /// Where the INI file is looked up when no path is given
    pub const DEFAULT_PATH: &'static str = "/opt/app/dummyapp/config.ini";

    /// Prefix for environment overrides, e.g. `VISITLOG__POSTGRES__PASSWORD`
    pub const ENV_PREFIX: &'static str = "VISITLOG";

    /// Load the INI file at `path`, then apply environment overrides.
    ///
    /// The file is required; a missing or unparsable file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let builder = Self::defaults()?
            .add_source(File::from(path).format(FileFormat::Ini).required(true))
            .add_source(Environment::with_prefix(Self::ENV_PREFIX).separator("__"));

        Self::finish(builder)
    }

    /// Parse INI text, without environment overrides
    pub fn from_ini_str(ini: &str) -> Result<Self, ConfigError> {
        let builder = Self::defaults()?.add_source(File::from_str(ini, FileFormat::Ini));
        Self::finish(builder)
    }

    /// The postgres connection section, required by the postgres backend
    pub fn postgres(&self) -> Result<&PostgresConfig, ConfigError> {
        self.postgres.as_ref().ok_or(ConfigError::MissingPostgres)
    }

    fn defaults() -> Result<::config::ConfigBuilder<::config::builder::DefaultState>, ConfigError> {
        let defaults = PoolSettings::default();

        Ok(::config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000_i64)?
            .set_default("database.backend", "postgres")?
            .set_default("database.sqlite_url", "sqlite://./visits.db")?
            .set_default("database.min_connections", i64::from(defaults.min_connections))?
            .set_default("database.max_connections", i64::from(defaults.max_connections))?
            .set_default(
                "database.acquire_timeout_secs",
                defaults.acquire_timeout.as_secs() as i64,
            )?)
    }

    fn finish(
        builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let db = &self.database;
        if db.max_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        if db.min_connections > db.max_connections {
            return Err(ConfigError::MinAboveMax {
                min: db.min_connections,
                max: db.max_connections,
            });
        }
        if db.backend == DatabaseBackend::Postgres {
            self.postgres()?;
        }
        Ok(())
    }
}
