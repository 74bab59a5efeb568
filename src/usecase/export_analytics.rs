// src/usecase/export_analytics.rs
//! Exportación de datos analíticos a fichero (CSV o JSON).
//!
//! Orden de validación: autorización, formato, contexto y filtros. Los
//! formatos reconocidos pero no implementados (pdf, png) fallan con 400
//! antes de calcular nada.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::domain::error::{AnalyticsError, AnalyticsResult};
use crate::domain::model::analytics::KpiName;
use crate::domain::model::principal::Principal;
use crate::service::access_gate::{authorize, ANALYTICS_EXPORT};
use crate::service::aggregation_engine::AggregationEngine;
use crate::service::data_exporter::{DataContext, ExportFormat, Table};
use crate::service::filter_normalizer::FilterNormalizer;
use crate::telemetry::metrics;

pub const PARAM_DATA_CONTEXT: &str = "data_context";

#[derive(Debug, Clone)]
pub struct ExportFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

pub struct AnalyticsExporter {
    engine: Arc<AggregationEngine>,
    normalizer: FilterNormalizer,
}

impl AnalyticsExporter {
    pub fn new(engine: Arc<AggregationEngine>, normalizer: FilterNormalizer) -> Self {
        Self { engine, normalizer }
    }

    pub async fn export(&self, principal: Option<&Principal>, export_type: &str, params: &HashMap<String, String>) -> AnalyticsResult<ExportFile> {
        let principal = authorize(principal, &ANALYTICS_EXPORT)?;
        let format = ExportFormat::parse(export_type)?;
        let context = match params.get(PARAM_DATA_CONTEXT) {
            Some(raw) => DataContext::parse(raw)?,
            None => return Err(AnalyticsError::invalid_request("data_context is required")),
        };
        let filter = self.normalizer.normalize(params)?;
        let scope = principal.scope();

        let table = match &context {
            DataContext::Kpis => Table::from_kpis(&self.engine.compute_kpis(&KpiName::ALL, &filter, scope).await?),
            DataContext::Chart(chart) => Table::from_chart(&self.engine.compute_chart(chart.as_str(), &filter, scope).await?),
            DataContext::Drilldown { chart, data_point_id } => Table::from_drilldown(
                &self
                    .engine
                    .compute_drilldown(chart.as_str(), data_point_id, &filter, scope)
                    .await?,
            ),
        };
        let bytes = table.render(format)?;

        metrics::incr("analytics_exports", &[("format", format.extension())]);
        info!(user = %principal.username, context = %context.file_stem(), rows = table.rows.len(), "analytics export");
        Ok(ExportFile {
            filename: format!(
                "{}_{}_{}.{}",
                context.file_stem(),
                filter.start_date().format("%Y%m%d"),
                filter.end_date().format("%Y%m%d"),
                format.extension()
            ),
            content_type: format.content_type(),
            bytes,
        })
    }
}
