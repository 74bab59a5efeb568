// src/usecase/query_analytics.rs
//! Consultas síncronas de analítica: KPIs, series para gráficos, drilldown y
//! opciones de filtro.
//!
//! Cada entrada autoriza primero, normaliza los parámetros crudos a un
//! `FilterSpec` y delega en el `AggregationEngine` con el alcance del
//! principal. El alcance nunca sale de los parámetros de la petición.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::error::{AnalyticsError, AnalyticsResult};
use crate::domain::model::analytics::{ChartSeries, Drilldown, FilterOptions, KpiName, KpiResult};
use crate::domain::model::principal::Principal;
use crate::service::access_gate::{authorize, ANALYTICS_READ};
use crate::service::aggregation_engine::AggregationEngine;
use crate::service::filter_normalizer::FilterNormalizer;

/// Comma separated KPI names; absent means every KPI.
pub const PARAM_METRICS: &str = "metrics";

pub struct AnalyticsQueries {
    engine: Arc<AggregationEngine>,
    normalizer: FilterNormalizer,
}

impl AnalyticsQueries {
    pub fn new(engine: Arc<AggregationEngine>, normalizer: FilterNormalizer) -> Self {
        Self { engine, normalizer }
    }

    pub fn engine(&self) -> &Arc<AggregationEngine> {
        &self.engine
    }

    pub fn normalizer(&self) -> &FilterNormalizer {
        &self.normalizer
    }

    pub async fn kpis(&self, principal: Option<&Principal>, params: &HashMap<String, String>) -> AnalyticsResult<Vec<KpiResult>> {
        let principal = authorize(principal, &ANALYTICS_READ)?;
        let filter = self.normalizer.normalize(params)?;
        let names = requested_kpis(params.get(PARAM_METRICS).map(String::as_str))?;
        debug!(user = %principal.username, kpis = names.len(), "kpi query");
        self.engine.compute_kpis(&names, &filter, principal.scope()).await
    }

    pub async fn chart(&self, principal: Option<&Principal>, chart_name: &str, params: &HashMap<String, String>) -> AnalyticsResult<ChartSeries> {
        let principal = authorize(principal, &ANALYTICS_READ)?;
        let filter = self.normalizer.normalize(params)?;
        self.engine.compute_chart(chart_name, &filter, principal.scope()).await
    }

    pub async fn drilldown(
        &self,
        principal: Option<&Principal>,
        chart_name: &str,
        data_point_id: &str,
        params: &HashMap<String, String>,
    ) -> AnalyticsResult<Drilldown> {
        let principal = authorize(principal, &ANALYTICS_READ)?;
        let filter = self.normalizer.normalize(params)?;
        self.engine
            .compute_drilldown(chart_name, data_point_id, &filter, principal.scope())
            .await
    }

    pub async fn filter_options(&self, principal: Option<&Principal>) -> AnalyticsResult<FilterOptions> {
        authorize(principal, &ANALYTICS_READ)?;
        self.engine.filter_options().await
    }
}

/// Parses the `metrics` list, keeping request order and dropping repeats.
pub fn requested_kpis(raw: Option<&str>) -> AnalyticsResult<Vec<KpiName>> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(KpiName::ALL.to_vec());
    };
    let mut out: Vec<KpiName> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let kpi = KpiName::parse(name).ok_or_else(|| AnalyticsError::UnknownMetric(name.to_string()))?;
        if !out.contains(&kpi) {
            out.push(kpi);
        }
    }
    Ok(out)
}
