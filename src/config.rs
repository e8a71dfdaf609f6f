//! Service configuration.
//!
//! Layered: built-in defaults, then `config/default.toml` if present, then
//! `INGEST__*` environment variables, then a few flat overrides.

use anyhow::{Context, Result};
use api::RateLimitConfig;
use postgres_client::PostgresConfig;
use redis_client::RedisConfig;
use serde::{Deserialize, Serialize};
use worker::WorkerConfig;

/// Which long-running parts this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// HTTP server and workers
    #[default]
    All,
    /// HTTP server only
    Serve,
    /// Workers only
    Worker,
}

impl Mode {
    pub fn runs_server(&self) -> bool {
        matches!(self, Mode::All | Mode::Serve)
    }

    pub fn runs_workers(&self) -> bool {
        matches!(self, Mode::All | Mode::Worker)
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Mode::All),
            "serve" => Ok(Mode::Serve),
            "worker" => Ok(Mode::Worker),
            other => anyhow::bail!("Unknown mode: {}", other),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub postgres: PostgresConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: Mode::default(),
            postgres: PostgresConfig::default(),
            redis: RedisConfig::default(),
            rate_limit: RateLimitConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Load configuration from files and environment.
pub fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("INGEST")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Flat overrides for the settings most often set per deployment.
/// Nested parsing in the config crate does not handle underscored field
/// names reliably.
pub fn apply_env_overrides<F>(config: &mut Config, var: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = var("INGEST_DATABASE_URL") {
        config.postgres.url = url;
    }
    if let Some(url) = var("INGEST_REDIS_URL") {
        config.redis.url = url;
    }
    if let Some(host) = var("INGEST_HOST") {
        config.host = host;
    }
    if let Some(port) = var("INGEST_PORT") {
        config.port = port
            .parse()
            .with_context(|| format!("Invalid INGEST_PORT: {}", port))?;
    }
    if let Some(mode) = var("INGEST_MODE") {
        config.mode = mode.parse()?;
    }
    if let Some(name) = var("INGEST_CONSUMER_NAME") {
        config.redis.consumer_name = name;
    }
    Ok(())
}
