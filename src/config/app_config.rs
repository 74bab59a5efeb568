// src/config/app_config.rs
//! Configuración de la aplicación.
//!
//! Fuentes, en orden (la última gana):
//! 1. `config/default.toml` (opcional)
//! 2. `config/<perfil>.toml` (opcional; perfil desde `APP_PROFILE`)
//! 3. variables de entorno `APP__SECCION__CLAVE`

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::llm_config::LlmConfig;

pub const DEV_JWT_SECRET: &str = "dev-only-secret";
const VALID_PROFILES: [&str; 3] = ["development", "staging", "production"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    pub profile: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            profile: "development".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
        }
    }
}

/// Without a URL the service runs on the in-memory stores.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}
fn default_acquire_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportsConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_listed")]
    pub max_listed: usize,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}
fn default_worker_concurrency() -> usize {
    4
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_listed() -> usize {
    50
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            worker_concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            max_listed: default_max_listed(),
        }
    }
}

impl ReportsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    /// 0 disables the KPI cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

fn default_currency() -> String {
    "USD".into()
}
fn default_cache_ttl_secs() -> u64 {
    60
}
fn default_cache_max_entries() -> usize {
    1024
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Carga desde `./config` con el perfil de `APP_PROFILE`.
    pub fn load() -> Result<Self> {
        let profile = std::env::var("APP_PROFILE").unwrap_or_else(|_| "development".into());
        Self::load_from(Path::new("config"), &profile)
    }

    pub fn load_from(dir: &Path, profile: &str) -> Result<Self> {
        let built = Config::builder()
            .set_default("environment.profile", profile)?
            .add_source(File::from(dir.join("default.toml")).required(false))
            .add_source(File::from(dir.join(format!("{profile}.toml"))).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()
            .context("Failed to build configuration")?;
        let cfg: AppConfig = built.try_deserialize().context("Failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !VALID_PROFILES.contains(&self.environment.profile.as_str()) {
            anyhow::bail!(
                "Invalid environment profile '{}', must be one of {:?}",
                self.environment.profile,
                VALID_PROFILES
            );
        }
        if self.auth.jwt_secret.trim().is_empty() {
            anyhow::bail!("auth.jwt_secret must not be empty");
        }
        if self.is_production() {
            if self.database.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                anyhow::bail!("database.url is required in production");
            }
            if self.auth.jwt_secret == DEV_JWT_SECRET {
                anyhow::bail!("auth.jwt_secret must be changed in production");
            }
        }
        if self.llm.timeout_secs == 0 {
            anyhow::bail!("llm.timeout_secs must be greater than zero");
        }
        if self.reports.worker_concurrency == 0 {
            anyhow::bail!("reports.worker_concurrency must be at least 1");
        }
        if !self.llm.enabled() {
            warn!("llm.api_key not set; report summaries use the template generator");
        }
        info!(profile = %self.environment.profile, "configuration loaded");
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.profile == "production"
    }
}
