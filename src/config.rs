use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::constants::{self, DEFAULT_CONFIG_FILE};
use crate::error::{Result, SyncError};
use crate::types::Identifier;

/// Job settings, optionally read from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub table: Identifier,
    pub timestamp_columns: Vec<Identifier>,
    pub date_column: Identifier,
    pub key_columns: Vec<Identifier>,
    pub connect_timeout_secs: u64,
    pub statement_timeout_secs: u64,
    pub insert_batch_rows: usize,
    pub poll_interval_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            table: Identifier::new(constants::DEFAULT_TABLE).expect("default table name is valid"),
            timestamp_columns: Identifier::parse_list(&constants::default_timestamp_columns().join(","))
                .expect("default timestamp columns are valid"),
            date_column: Identifier::new(constants::DEFAULT_DATE_COLUMN)
                .expect("default date column is valid"),
            key_columns: Vec::new(),
            connect_timeout_secs: 30,
            statement_timeout_secs: 300,
            insert_batch_rows: 1000,
            poll_interval_ms: 500,
        }
    }
}

impl JobConfig {
    /// Load `path`, or `warehouse_sync.toml` when present, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Path::new(DEFAULT_CONFIG_FILE),
            None => return Ok(Self::default()),
        };
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: JobConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.timestamp_columns.is_empty() {
            return Err(SyncError::Config("timestamp_columns must not be empty".into()));
        }
        if self.insert_batch_rows == 0 {
            return Err(SyncError::Config("insert_batch_rows must be positive".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SyncError::Config(format!("{key} environment variable not set")))
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

/// Postgres connection settings (`DB_*`).
#[derive(Clone)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
}

impl SourceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match optional(&lookup, "DB_PORT") {
            Some(p) => p
                .trim()
                .parse()
                .map_err(|_| SyncError::Config(format!("DB_PORT is not a port number: {p}")))?,
            None => 5432,
        };
        Ok(Self {
            host: required(&lookup, "DB_HOST")?,
            port,
            database: required(&lookup, "DB_NAME")?,
            user: required(&lookup, "DB_USER")?,
            password: optional(&lookup, "DB_PASSWORD"),
        })
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// How the bearer token presented to the Snowflake SQL API was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    OAuth,
    KeyPairJwt,
    ProgrammaticAccessToken,
}

impl AuthMode {
    pub fn parse(authenticator: Option<&str>) -> Result<Self> {
        match authenticator.map(|a| a.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("programmatic_access_token") | Some("pat") => {
                Ok(AuthMode::ProgrammaticAccessToken)
            }
            Some("oauth") => Ok(AuthMode::OAuth),
            Some("snowflake_jwt") | Some("keypair_jwt") => Ok(AuthMode::KeyPairJwt),
            Some(other) => Err(SyncError::Config(format!(
                "SNOWFLAKE_AUTHENTICATOR={other} is not supported by the SQL API"
            ))),
        }
    }

    /// Value of the `X-Snowflake-Authorization-Token-Type` header.
    pub fn token_type(&self) -> &'static str {
        match self {
            AuthMode::OAuth => "OAUTH",
            AuthMode::KeyPairJwt => "KEYPAIR_JWT",
            AuthMode::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
        }
    }
}

/// Snowflake settings (`SNOWFLAKE_*`).
#[derive(Clone)]
pub struct WarehouseConfig {
    pub account: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub role: Option<String>,
    pub auth: AuthMode,
    pub token: String,
    pub host: Option<String>,
}

impl WarehouseConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let auth = AuthMode::parse(optional(&lookup, "SNOWFLAKE_AUTHENTICATOR").as_deref())?;
        let token = optional(&lookup, "SNOWFLAKE_TOKEN")
            .or_else(|| optional(&lookup, "SNOWFLAKE_PASSWORD"))
            .ok_or_else(|| {
                SyncError::Config(
                    "SNOWFLAKE_TOKEN (or SNOWFLAKE_PASSWORD holding a token) not set".into(),
                )
            })?;
        Ok(Self {
            account: required(&lookup, "SNOWFLAKE_ACCOUNT")?,
            warehouse: required(&lookup, "SNOWFLAKE_WAREHOUSE")?,
            database: required(&lookup, "SNOWFLAKE_DATABASE")?,
            schema: required(&lookup, "SNOWFLAKE_SCHEMA")?,
            role: optional(&lookup, "SNOWFLAKE_ROLE"),
            auth,
            token,
            host: optional(&lookup, "SNOWFLAKE_HOST"),
        })
    }

    /// `https://<account>.snowflakecomputing.com` unless `SNOWFLAKE_HOST` overrides it.
    pub fn base_url(&self) -> String {
        match &self.host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.trim_end_matches('/').to_string()
            }
            Some(host) => format!("https://{}", host.trim_end_matches('/')),
            None => format!("https://{}.snowflakecomputing.com", self.account.to_lowercase()),
        }
    }
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("account", &self.account)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("auth", &self.auth)
            .field("token", &"***")
            .field("host", &self.host)
            .finish()
    }
}
