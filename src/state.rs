// src/state.rs
//! Composición de dependencias.
//!
//! Todo lo compartido se construye aquí una vez y se inyecta por
//! constructor; no hay estado global de módulo.

use std::sync::Arc;
use tracing::info;

use crate::adapter::http::middleware::JwtVerifier;
use crate::adapter::llm::openai_client::OpenAiSummaryGenerator;
use crate::config::app_config::AppConfig;
use crate::repository::crm_store::{CrmStore, InMemoryCrmStore};
use crate::repository::job_queue::{InMemoryJobQueue, JobQueue};
use crate::repository::prediction_store::{InMemoryPredictionStore, PredictionStore};
use crate::repository::report_store::{InMemoryReportStore, ReportStore};
use crate::scheduler::report_worker::{ReportWorker, ReportWorkerConfig};
use crate::service::aggregation_engine::AggregationEngine;
use crate::service::clock::{Clock, SystemClock};
use crate::service::filter_normalizer::FilterNormalizer;
use crate::service::result_cache::{CacheConfig, ResultCache};
use crate::service::summary_generator::{SummaryGenerator, TemplateSummaryGenerator};
use crate::usecase::export_analytics::AnalyticsExporter;
use crate::usecase::manage_report_configurations::ReportConfigurationService;
use crate::usecase::query_analytics::AnalyticsQueries;
use crate::usecase::report_pipeline::{ReportPipeline, ReportPipelineConfig};
use crate::usecase::sales_forecast::ForecastService;
use crate::telemetry::metrics::MetricsExporter;

/// Persistence handles.
#[derive(Clone)]
pub struct Stores {
    pub crm: Arc<dyn CrmStore>,
    pub reports: Arc<dyn ReportStore>,
    pub predictions: Arc<dyn PredictionStore>,
    pub jobs: Arc<dyn JobQueue>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            crm: Arc::new(InMemoryCrmStore::new()),
            reports: Arc::new(InMemoryReportStore::new()),
            predictions: Arc::new(InMemoryPredictionStore::new()),
            jobs: Arc::new(InMemoryJobQueue::new()),
        }
    }

    #[cfg(feature = "postgres")]
    pub async fn postgres(cfg: &crate::config::app_config::DatabaseConfig, url: &str) -> anyhow::Result<Self> {
        use crate::repository::crm_store::postgres::PostgresCrmStore;
        use crate::repository::job_queue::postgres::PostgresJobQueue;
        use crate::repository::prediction_store::postgres::PostgresPredictionStore;
        use crate::repository::report_store::postgres::PostgresReportStore;
        use anyhow::Context;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(cfg.acquire_timeout_secs))
            .connect(url)
            .await
            .context("connecting to postgres")?;
        Ok(Self {
            crm: Arc::new(PostgresCrmStore::new(pool.clone())),
            reports: Arc::new(PostgresReportStore::new(pool.clone())),
            predictions: Arc::new(PostgresPredictionStore::new(pool.clone())),
            jobs: Arc::new(PostgresJobQueue::new(pool)),
        })
    }

    /// Postgres when a URL is configured (and the feature is built), memory otherwise.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        match cfg.database.url.as_deref().filter(|u| !u.trim().is_empty()) {
            #[cfg(feature = "postgres")]
            Some(url) => {
                info!("using postgres stores");
                Self::postgres(&cfg.database, url).await
            }
            #[cfg(not(feature = "postgres"))]
            Some(_) => {
                tracing::warn!("database.url set but the postgres feature is not built; using in-memory stores");
                Ok(Self::in_memory())
            }
            None => {
                info!("using in-memory stores");
                Ok(Self::in_memory())
            }
        }
    }
}

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub queries: Arc<AnalyticsQueries>,
    pub exporter: Arc<AnalyticsExporter>,
    pub reports: Arc<ReportPipeline>,
    pub configurations: Arc<ReportConfigurationService>,
    pub forecasts: Arc<ForecastService>,
    pub jobs: Arc<dyn JobQueue>,
    pub jwt: Arc<JwtVerifier>,
    pub metrics: Option<MetricsExporter>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn build(cfg: Arc<AppConfig>, stores: Stores, clock: Arc<dyn Clock>, metrics: Option<MetricsExporter>) -> anyhow::Result<Self> {
        let summarizer: Arc<dyn SummaryGenerator> = if cfg.llm.enabled() {
            Arc::new(OpenAiSummaryGenerator::new(&cfg.llm)?)
        } else {
            Arc::new(TemplateSummaryGenerator)
        };
        Self::with_summarizer(cfg, stores, clock, summarizer, metrics)
    }

    pub fn with_summarizer(
        cfg: Arc<AppConfig>,
        stores: Stores,
        clock: Arc<dyn Clock>,
        summarizer: Arc<dyn SummaryGenerator>,
        metrics: Option<MetricsExporter>,
    ) -> anyhow::Result<Self> {
        let mut engine = AggregationEngine::new(stores.crm.clone(), cfg.analytics.currency.clone());
        if cfg.analytics.cache_ttl_secs > 0 {
            engine = engine.with_cache(Arc::new(ResultCache::new(
                CacheConfig {
                    ttl_seconds: cfg.analytics.cache_ttl_secs as i64,
                    max_entries: cfg.analytics.cache_max_entries,
                },
                clock.clone(),
            )));
        }
        let engine = Arc::new(engine);
        let normalizer = FilterNormalizer::new(clock.clone());
        let configurations = Arc::new(ReportConfigurationService::new(stores.reports.clone(), clock.clone()));

        let reports = Arc::new(ReportPipeline::new(
            stores.reports.clone(),
            stores.predictions.clone(),
            stores.jobs.clone(),
            engine.clone(),
            summarizer,
            configurations.clone(),
            clock.clone(),
            ReportPipelineConfig {
                output_dir: cfg.reports.output_dir.clone(),
                summary_timeout: cfg.llm.timeout(),
                max_listed: cfg.reports.max_listed,
            },
        ));
        info!(summarizer = reports.summarizer_name(), "report pipeline ready");

        Ok(Self {
            queries: Arc::new(AnalyticsQueries::new(engine.clone(), normalizer.clone())),
            exporter: Arc::new(AnalyticsExporter::new(engine.clone(), normalizer)),
            forecasts: Arc::new(ForecastService::new(engine, stores.predictions.clone(), clock)),
            reports,
            configurations,
            jobs: stores.jobs,
            jwt: Arc::new(JwtVerifier::new(&cfg.auth.jwt_secret)),
            metrics,
            config: cfg,
        })
    }

    pub fn in_memory(cfg: AppConfig) -> anyhow::Result<Self> {
        Self::build(Arc::new(cfg), Stores::in_memory(), Arc::new(SystemClock), None)
    }

    /// Worker draining this state's report queue.
    pub fn report_worker(&self) -> Arc<ReportWorker> {
        Arc::new(ReportWorker::new(
            self.jobs.clone(),
            self.reports.clone(),
            self.reports.wake_handle(),
            ReportWorkerConfig {
                poll_interval: self.config.reports.poll_interval(),
                max_concurrency: self.config.reports.worker_concurrency,
                ..Default::default()
            },
        ))
    }
}
