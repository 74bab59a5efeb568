// src/telemetry/tracing.rs
//! Logging setup for the analytics service.
//!
//! - `RUST_LOG` wins when set; otherwise `logging.level` from config.
//! - `logging.json = true` switches to one JSON object per line.
//! - A second initialisation (tests, embedding) is reported, never a panic.

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use crate::config::app_config::LoggingConfig;

pub fn env_filter(cfg: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level))
}

pub fn init_tracing(cfg: &LoggingConfig) -> anyhow::Result<()> {
    let filter = env_filter(cfg);
    let registry = Registry::default().with(filter);
    let result = if cfg.json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    result.map_err(|e| anyhow::anyhow!("tracing subscriber already installed: {e}"))
}
