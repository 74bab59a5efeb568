// src/usecase/report_pipeline.rs
//! Pipeline de generación asíncrona de reportes.
//!
//! Flujo:
//! - `enqueue` valida, crea la fila en `pending`, la encola y despierta al
//!   worker. Nunca calcula nada.
//! - `execute` (llamado por el worker) reclama la fila con un
//!   compare-and-set `pending -> generating`, ejecuta los pasos en orden
//!   (agregación, modelo predictivo, resumen, artefacto) y termina en
//!   `completed` o `failed`. Cualquier error o pánico queda registrado en la
//!   fila; nada se reintenta solo.
//! - La regeneración crea siempre una fila nueva.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::error::{AnalyticsError, AnalyticsResult};
use crate::domain::model::analytics::{ChartSeries, HistoryPoint, KpiResult};
use crate::domain::model::filter::FilterSpec;
use crate::domain::model::prediction::PredictiveResult;
use crate::domain::model::principal::{Principal, PrincipalScope};
use crate::domain::model::report::{
    GeneratedReport, ReportConfiguration, ReportOutput, ReportStatus, ReportTransition, ReportType,
};
use crate::repository::job_queue::{JobQueue, ReportJob};
use crate::repository::prediction_store::PredictionStore;
use crate::repository::report_store::ReportStore;
use crate::scheduler::report_worker::ReportExecutor;
use crate::service::access_gate::{authorize, AI_INSIGHTS};
use crate::service::aggregation_engine::AggregationEngine;
use crate::service::clock::Clock;
use crate::service::data_exporter::Table;
use crate::service::filter_normalizer::normalize_with_default;
use crate::service::predictive_model::{ModelKind, ModelOutput, ModelRegistry};
use crate::service::summary_generator::{SummaryGenerator, SummaryPrompt};
use crate::usecase::manage_report_configurations::{NewReportConfiguration, ReportConfigurationService, ReportParameters};
use crate::telemetry::metrics;

#[derive(Debug, Clone)]
pub struct ReportPipelineConfig {
    pub output_dir: PathBuf,
    pub summary_timeout: Duration,
    pub max_listed: usize,
}

impl Default for ReportPipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            summary_timeout: Duration::from_secs(30),
            max_listed: 50,
        }
    }
}

/// Body of `POST /ai-insights/generate-report`: either an existing
/// configuration id or an inline template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateReportRequest {
    pub report_configuration_id: Option<Uuid>,
    pub report_type: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub status: ReportStatus,
    pub task_id: Uuid,
}

/// Result of a successful generation, not yet persisted.
struct Generated {
    output: ReportOutput,
    predictions: Vec<PredictiveResult>,
}

pub struct ReportPipeline {
    reports: Arc<dyn ReportStore>,
    predictions: Arc<dyn PredictionStore>,
    queue: Arc<dyn JobQueue>,
    engine: Arc<AggregationEngine>,
    models: ModelRegistry,
    summarizer: Arc<dyn SummaryGenerator>,
    configurations: Arc<ReportConfigurationService>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
    config: ReportPipelineConfig,
}

impl ReportPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reports: Arc<dyn ReportStore>,
        predictions: Arc<dyn PredictionStore>,
        queue: Arc<dyn JobQueue>,
        engine: Arc<AggregationEngine>,
        summarizer: Arc<dyn SummaryGenerator>,
        configurations: Arc<ReportConfigurationService>,
        clock: Arc<dyn Clock>,
        config: ReportPipelineConfig,
    ) -> Self {
        Self {
            reports,
            predictions,
            queue,
            engine,
            models: ModelRegistry::default(),
            summarizer,
            configurations,
            clock,
            wake: Arc::new(Notify::new()),
            config,
        }
    }

    /// Signalled on every enqueue; shared with the report worker.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub fn summarizer_name(&self) -> &'static str {
        self.summarizer.name()
    }

    /// Creates a pending report and queues it. Validation errors surface here;
    /// generation errors only ever land on the report row.
    pub async fn enqueue(&self, principal: Option<&Principal>, request: GenerateReportRequest) -> AnalyticsResult<JobHandle> {
        let principal = authorize(principal, &AI_INSIGHTS)?;

        let config = match request.report_configuration_id {
            Some(id) => self.configurations.get_visible(principal, id, false).await?,
            None => {
                let report_type = request
                    .report_type
                    .ok_or_else(|| AnalyticsError::invalid_request("report_configuration_id or report_type is required"))?;
                let name = request.name.unwrap_or_else(|| format!("{report_type} report"));
                let config = self.configurations.build(
                    principal.id,
                    NewReportConfiguration {
                        name,
                        description: request.description,
                        report_type,
                        parameters: request.parameters,
                        frequency: None,
                    },
                )?;
                self.reports.insert_configuration(config.clone()).await?;
                config
            }
        };
        // stored parameters are checked again at enqueue time
        ReportParameters::parse(config.report_type, &config.parameters)?;

        self.push_pending(principal, &config).await
    }

    async fn push_pending(&self, principal: &Principal, config: &ReportConfiguration) -> AnalyticsResult<JobHandle> {
        let now = self.clock.now();
        let report = GeneratedReport::pending(config.id, principal.id, principal.scope(), now);
        let report_id = report.id;
        self.reports.insert_report(report).await?;
        let pushed = self
            .queue
            .push(ReportJob {
                report_id,
                enqueued_at: now,
            })
            .await;
        if let Err(e) = pushed {
            // no worker will ever claim the row; close it so it is not left pending
            error!(report_id = %report_id, error = ?e, "report job could not be queued");
            let abandon = ReportTransition::Abandon {
                at: self.clock.now(),
                message: format!("report job could not be queued: {e}"),
            };
            if let Err(mark) = self.reports.transition(report_id, ReportStatus::Pending, abandon).await {
                error!(report_id = %report_id, error = ?mark, "queue failure not recorded on report");
            }
            return Err(AnalyticsError::Storage(e.context("enqueue report job")));
        }
        self.wake.notify_one();

        info!(report_id = %report_id, config_id = %config.id, report_type = %config.report_type, "report enqueued");
        Ok(JobHandle {
            status: ReportStatus::Pending,
            task_id: report_id,
        })
    }

    /// Report visible to the principal, `NotFound` otherwise.
    pub async fn get_report(&self, principal: Option<&Principal>, id: Uuid) -> AnalyticsResult<GeneratedReport> {
        let principal = authorize(principal, &AI_INSIGHTS)?;
        self.visible_report(principal, id).await
    }

    async fn visible_report(&self, principal: &Principal, id: Uuid) -> AnalyticsResult<GeneratedReport> {
        match self.reports.get_report(id).await? {
            Some(r) if r.requested_by == principal.id || principal.scope() == PrincipalScope::All => Ok(r),
            _ => Err(AnalyticsError::not_found(format!("report {id}"))),
        }
    }

    /// File name and bytes of a completed report's artifact.
    pub async fn artifact(&self, principal: Option<&Principal>, id: Uuid) -> AnalyticsResult<(String, Vec<u8>)> {
        let report = self.get_report(principal, id).await?;
        let path = match (&report.status, &report.download_path) {
            (ReportStatus::Completed, Some(path)) => PathBuf::from(path),
            _ => return Err(AnalyticsError::not_found(format!("download for report {id}"))),
        };
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| AnalyticsError::Storage(anyhow::anyhow!("reading {}: {e}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("report_{id}.csv"));
        Ok((name, bytes))
    }

    /// Pending reports only; anything else is a conflict.
    pub async fn cancel(&self, principal: Option<&Principal>, id: Uuid) -> AnalyticsResult<GeneratedReport> {
        let principal = authorize(principal, &AI_INSIGHTS)?;
        let current = self.visible_report(principal, id).await?;
        let at = self.clock.now();
        match self.reports.transition(id, ReportStatus::Pending, ReportTransition::Cancel { at }).await? {
            Some(report) => {
                info!(report_id = %id, "report cancelled");
                metrics::incr("report_jobs_cancelled", &[]);
                Ok(report)
            }
            None => Err(AnalyticsError::Conflict(format!(
                "report {id} is {}; only pending reports can be cancelled",
                self.reports.get_report(id).await?.map_or(current.status, |r| r.status)
            ))),
        }
    }

    /// New pending row from the same configuration.
    pub async fn regenerate(&self, principal: Option<&Principal>, id: Uuid) -> AnalyticsResult<JobHandle> {
        let principal = authorize(principal, &AI_INSIGHTS)?;
        let previous = self.visible_report(principal, id).await?;
        let config = self
            .reports
            .get_configuration(previous.configuration_id)
            .await?
            .filter(|c| c.active)
            .ok_or_else(|| AnalyticsError::not_found(format!("report configuration {}", previous.configuration_id)))?;
        self.push_pending(principal, &config).await
    }

    pub async fn recent_reports(&self, principal: Option<&Principal>, limit: Option<usize>) -> AnalyticsResult<Vec<GeneratedReport>> {
        let principal = authorize(principal, &AI_INSIGHTS)?;
        let requested_by = match principal.scope() {
            PrincipalScope::All => None,
            PrincipalScope::OwnedBy(id) => Some(id),
        };
        let limit = limit.unwrap_or(20).clamp(1, self.config.max_listed);
        Ok(self.reports.list_reports(requested_by, limit).await?)
    }

    /// Worker entry point for one job.
    pub async fn run(&self, report_id: Uuid) -> anyhow::Result<()> {
        let started = Instant::now();
        let claimed = self
            .reports
            .transition(report_id, ReportStatus::Pending, ReportTransition::Start { at: self.clock.now() })
            .await?;
        let Some(report) = claimed else {
            info!(report_id = %report_id, "report no longer pending, skipping");
            return Ok(());
        };
        info!(report_id = %report_id, "report generating");

        let outcome = AssertUnwindSafe(self.generate(&report)).catch_unwind().await;
        let at = self.clock.now();
        let transition = match outcome {
            Ok(Ok(generated)) => match self.store_predictions(generated.predictions).await {
                Ok(()) => ReportTransition::Complete {
                    at,
                    output: generated.output,
                },
                Err(e) => {
                    warn!(report_id = %report_id, error = %e, "predictive results not stored");
                    ReportTransition::Fail { at, message: e.to_string() }
                }
            },
            Ok(Err(e)) => {
                warn!(report_id = %report_id, error = %e, code = e.code(), "report generation failed");
                ReportTransition::Fail { at, message: e.to_string() }
            }
            Err(_) => {
                error!(report_id = %report_id, "report generation panicked");
                ReportTransition::Fail {
                    at,
                    message: "internal error during report generation".to_string(),
                }
            }
        };

        let status = self.finish(report_id, transition).await?;
        if status == ReportStatus::Completed {
            self.reports.touch_configuration(report.configuration_id, at).await?;
            metrics::incr("report_jobs_completed", &[]);
            info!(report_id = %report_id, elapsed_ms = started.elapsed().as_millis() as u64, "report completed");
        } else {
            metrics::incr("report_jobs_failed", &[]);
        }
        Ok(())
    }

    /// Writes the terminal state. If that write fails the row is moved to
    /// `failed` instead; the error only surfaces when both writes fail.
    async fn finish(&self, report_id: Uuid, transition: ReportTransition) -> anyhow::Result<ReportStatus> {
        let target = transition.target();
        let err = match self.reports.transition(report_id, ReportStatus::Generating, transition).await {
            Ok(_) => return Ok(target),
            Err(e) => e,
        };
        error!(report_id = %report_id, error = ?err, to = %target, "terminal report write failed");
        let fallback = ReportTransition::Fail {
            at: self.clock.now(),
            message: format!("report result could not be stored: {err}"),
        };
        self.reports
            .transition(report_id, ReportStatus::Generating, fallback)
            .await
            .map_err(|e| e.context(format!("report {report_id} left in generating")))?;
        Ok(ReportStatus::Failed)
    }

    /// Supersedes the active results of each target. Runs only once the
    /// report has everything it needs to complete.
    async fn store_predictions(&self, predictions: Vec<PredictiveResult>) -> AnalyticsResult<()> {
        for result in predictions {
            self.predictions.supersede_and_insert(result).await?;
        }
        Ok(())
    }

    /// aggregate -> predict -> summarize -> artifact, strictly in order.
    /// Predictive results are returned, not stored.
    async fn generate(&self, report: &GeneratedReport) -> AnalyticsResult<Generated> {
        let config = self
            .reports
            .get_configuration(report.configuration_id)
            .await?
            .ok_or_else(|| AnalyticsError::not_found(format!("report configuration {}", report.configuration_id)))?;
        let params = ReportParameters::parse(config.report_type, &config.parameters)?;
        let filter = normalize_with_default(
            &params.filter_params,
            self.clock.now(),
            ReportParameters::default_preset(config.report_type),
        )?;
        let scope = report.scope;

        let kpis = self.engine.compute_kpis(config.report_type.kpis(), &filter, scope).await?;
        let mut charts = Vec::with_capacity(config.report_type.charts().len());
        for chart in config.report_type.charts() {
            charts.push(self.engine.compute_chart(chart.as_str(), &filter, scope).await?);
        }

        let mut history: Vec<HistoryPoint> = Vec::new();
        let mut forecast = None;
        let mut anomalies = None;
        let mut unavailable: Option<String> = None;
        if params.include_forecast || params.include_anomalies {
            history = self.engine.metric_history(params.forecast_metric, &filter, scope).await?;
        }
        if params.include_forecast {
            match self.models.forecast(params.forecast_metric, &history, params.forecast_horizon) {
                Ok(output) => forecast = Some(output),
                Err(e @ AnalyticsError::InsufficientData { .. }) => unavailable = Some(e.to_string()),
                Err(e) => return Err(e),
            }
        }
        if params.include_anomalies {
            match self.models.run(ModelKind::ZScoreAnomaly, &history, 1) {
                Ok(output) => anomalies = Some(output),
                Err(AnalyticsError::InsufficientData { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        // kept in memory until the report is ready to complete
        let mut predictions = Vec::new();
        for output in forecast.iter().chain(anomalies.iter()) {
            let context = json!({
                "metric": params.forecast_metric.as_str(),
                "scope": scope,
                "filter": filter,
            });
            predictions.push(
                PredictiveResult::new(
                    output.model.as_str(),
                    output.result_type,
                    context,
                    serde_json::to_value(&output.points).map_err(|e| AnalyticsError::Storage(e.into()))?,
                    output.confidence,
                    self.clock.now(),
                )
                .for_report(report.id),
            );
        }

        let prompt = SummaryPrompt {
            report_type: config.report_type,
            start_date: filter.start_date(),
            end_date: filter.end_date(),
            kpis: kpis.clone(),
            charts: charts.clone(),
            forecast: forecast.clone(),
            anomalies: anomalies.clone(),
        };
        let summary_text = self.summarize(&prompt).await?;

        let download_path = self
            .write_artifact(report.id, &kpis, &charts, forecast.as_ref())
            .await
            .map_err(AnalyticsError::Storage)?;

        let output = ReportOutput {
            summary_text,
            insights: insights(&config, &kpis, forecast.as_ref(), anomalies.as_ref(), unavailable.as_deref()),
            report_content: json!({
                "report_type": config.report_type,
                "name": config.name,
                "filter": filter,
                "kpis": kpis,
                "charts": charts.iter().map(ChartSeries::to_chartjs).collect::<Vec<_>>(),
                "forecast": forecast_payload(forecast.as_ref(), params.include_forecast, unavailable.as_deref()),
                "anomalies": anomalies,
            }),
            raw_data_snapshot: snapshot(&filter, &kpis, &charts, &history),
            download_path: Some(download_path.to_string_lossy().into_owned()),
        };
        Ok(Generated { output, predictions })
    }

    async fn summarize(&self, prompt: &SummaryPrompt) -> AnalyticsResult<String> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.config.summary_timeout, self.summarizer.summarize(prompt)).await;
        metrics::record_ms(
            "llm_summary_latency_ms",
            started.elapsed().as_millis() as f64,
            &[("generator", self.summarizer.name())],
        );
        match result {
            Ok(inner) => inner,
            Err(_) => Err(AnalyticsError::ExternalService(format!(
                "summary generation timed out after {}s",
                self.config.summary_timeout.as_secs_f32()
            ))),
        }
    }

    async fn write_artifact(
        &self,
        report_id: Uuid,
        kpis: &[KpiResult],
        charts: &[ChartSeries],
        forecast: Option<&ModelOutput>,
    ) -> anyhow::Result<PathBuf> {
        use anyhow::Context;

        let mut table = Table {
            headers: ["section", "id", "label", "value", "unit"].into_iter().map(String::from).collect(),
            rows: Vec::new(),
        };
        for k in kpis {
            table.rows.push(vec!["kpi".into(), k.name.as_str().into(), k.label.into(), k.value.to_string(), k.unit.clone()]);
        }
        for c in charts {
            for p in &c.points {
                table.rows.push(vec![c.chart.as_str().into(), p.id.clone(), p.label.clone(), p.value.to_string(), c.unit.clone()]);
            }
        }
        if let Some(f) = forecast {
            for p in &f.points {
                table.rows.push(vec![
                    "forecast".into(),
                    p.date.to_string(),
                    f.model.as_str().into(),
                    format!("{:.2}", p.value),
                    format!("confidence={:.4}", p.confidence),
                ]);
            }
        }

        let dir: &Path = &self.config.output_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(format!("report_{report_id}.csv"));
        tokio::fs::write(&path, table.to_csv())
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait::async_trait]
impl ReportExecutor for ReportPipeline {
    async fn execute(&self, report_id: Uuid) -> anyhow::Result<()> {
        self.run(report_id).await
    }
}

fn forecast_payload(forecast: Option<&ModelOutput>, requested: bool, unavailable: Option<&str>) -> Value {
    match (forecast, unavailable) {
        (Some(f), _) => json!({"available": true, "model": f.model, "confidence": f.confidence, "points": f.points}),
        (None, Some(reason)) => json!({"available": false, "message": reason}),
        (None, None) if requested => json!({"available": false}),
        (None, None) => Value::Null,
    }
}

fn insights(
    config: &ReportConfiguration,
    kpis: &[KpiResult],
    forecast: Option<&ModelOutput>,
    anomalies: Option<&ModelOutput>,
    unavailable: Option<&str>,
) -> Value {
    let headline: BTreeMap<&str, Value> = kpis.iter().map(|k| (k.name.as_str(), json!(k.value))).collect();
    let flagged: Vec<Value> = anomalies
        .map(|a| {
            a.points
                .iter()
                .filter(|p| p.flagged)
                .map(|p| json!({"date": p.date, "z_score": p.value}))
                .collect()
        })
        .unwrap_or_default();
    let trend = forecast.and_then(|f| {
        let first = f.points.first()?;
        let last = f.points.last()?;
        Some(if last.value > first.value {
            "up"
        } else if last.value < first.value {
            "down"
        } else {
            "flat"
        })
    });
    json!({
        "report_type": config.report_type,
        "headline": headline,
        "forecast_trend": trend,
        "forecast_confidence": forecast.map(|f| f.confidence),
        "forecast_unavailable": unavailable,
        "anomalies": flagged,
        "includes_forecast": forecast.is_some() || config.report_type == ReportType::AiForecast,
    })
}

fn snapshot(filter: &FilterSpec, kpis: &[KpiResult], charts: &[ChartSeries], history: &[HistoryPoint]) -> Value {
    let charts: BTreeMap<&str, Value> = charts
        .iter()
        .map(|c| {
            let points: Vec<Value> = c.points.iter().map(|p| json!([p.id, p.value])).collect();
            (c.chart.as_str(), Value::Array(points))
        })
        .collect();
    json!({
        "filter": filter,
        "kpis": kpis.iter().map(|k| (k.name.as_str(), k.value)).collect::<BTreeMap<_, _>>(),
        "charts": charts,
        "history": history,
    })
}
