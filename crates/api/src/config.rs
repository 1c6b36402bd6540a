use std::path::PathBuf;
use std::str::FromStr;

use autotune_core::results::BasalRounding;
use autotune_pipeline::DispatcherConfig;
use axum::http::HeaderValue;

/// Path of the completion endpoint under the public base URL.
pub const COMPLETION_PATH: &str = "/api/v1/completion";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Where staged profiles and tool outputs are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    S3 { bucket: String },
    Local { root: PathBuf },
}

/// Server configuration loaded from environment variables.
///
/// Everything except `CALLBACK_KEY` has a default suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// PostgreSQL URL. Without one the ledger lives in memory.
    pub database_url: Option<String>,
    /// Externally reachable origin of this server, used in the callback URL.
    pub public_base_url: String,
    /// Shared secret the execution backend presents on completion.
    pub callback_key: String,
    pub storage: StorageConfig,
    /// Scratch directory for the local execution backend.
    pub local_work_root: PathBuf,
    pub autotune_command: String,
    pub autotune_tool_dir: String,
    /// How suggested basal rates snap to the pump increment.
    pub basal_rounding: BasalRounding,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `DATABASE_URL`         | unset (in-memory ledger)   |
    /// | `PUBLIC_BASE_URL`      | `http://localhost:3000`    |
    /// | `CALLBACK_KEY`         | required                   |
    /// | `STORAGE_BACKEND`      | `local` (or `s3`)          |
    /// | `S3_BUCKET`            | required when `s3`         |
    /// | `LOCAL_STORAGE_ROOT`   | `./data/storage`           |
    /// | `LOCAL_WORK_ROOT`      | `./data/work`              |
    /// | `AUTOTUNE_COMMAND`     | `oref0-autotune`           |
    /// | `AUTOTUNE_TOOL_DIR`    | `/usr/src/oref0`           |
    /// | `BASAL_ROUNDING`       | `away_from_zero`           |
    pub fn from_env() -> Result<Self, ConfigError> {
        let cors_origins: Vec<String> = var_or("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(bad) = cors_origins.iter().find(|o| HeaderValue::from_str(o).is_err()) {
            return Err(ConfigError::Invalid {
                name: "CORS_ORIGINS",
                value: bad.clone(),
            });
        }

        let storage = match var_or("STORAGE_BACKEND", "local").to_ascii_lowercase().as_str() {
            "s3" => StorageConfig::S3 {
                bucket: required("S3_BUCKET")?,
            },
            "local" => StorageConfig::Local {
                root: var_or("LOCAL_STORAGE_ROOT", "./data/storage").into(),
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            host: var_or("HOST", "0.0.0.0"),
            port: parsed("PORT", "3000")?,
            cors_origins,
            request_timeout_secs: parsed("REQUEST_TIMEOUT_SECS", "30")?,
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            callback_key: required("CALLBACK_KEY")?,
            storage,
            local_work_root: var_or("LOCAL_WORK_ROOT", "./data/work").into(),
            autotune_command: var_or("AUTOTUNE_COMMAND", "oref0-autotune"),
            autotune_tool_dir: var_or("AUTOTUNE_TOOL_DIR", "/usr/src/oref0"),
            basal_rounding: parsed("BASAL_ROUNDING", "away_from_zero")?,
        })
    }

    /// Absolute URL the notify step calls.
    pub fn callback_url(&self) -> String {
        format!("{}{COMPLETION_PATH}", self.public_base_url)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let mut config = DispatcherConfig::new(self.callback_url(), self.callback_key.clone());
        config.autotune_command = self.autotune_command.clone();
        config.tool_dir = self.autotune_tool_dir.clone();
        config
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { name })
}

fn parsed<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = var_or(name, default);
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}
