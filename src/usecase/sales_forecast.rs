// src/usecase/sales_forecast.rs
//! Pronóstico bajo demanda (`GET /ai-insights/forecast`).
//!
//! Construye la serie mensual de la métrica, ejecuta el modelo pedido y
//! guarda el resultado como `PredictiveResult` activo, sustituyendo al
//! anterior del mismo objetivo. Con historia insuficiente devuelve
//! `InsufficientData` y no guarda nada.

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::error::{AnalyticsError, AnalyticsResult};
use crate::domain::model::analytics::{HistoryPoint, KpiName};
use crate::domain::model::filter::{DatePreset, FilterSpec};
use crate::domain::model::prediction::PredictiveResult;
use crate::domain::model::principal::Principal;
use crate::repository::prediction_store::PredictionStore;
use crate::service::access_gate::{authorize, AI_INSIGHTS};
use crate::service::aggregation_engine::AggregationEngine;
use crate::service::clock::Clock;
use crate::service::filter_normalizer::normalize_with_default;
use crate::service::predictive_model::{ModelKind, ModelRegistry, ScoredPoint};
use crate::usecase::manage_report_configurations::DEFAULT_FORECAST_HORIZON;

pub const PARAM_METRIC: &str = "metric";
pub const PARAM_HORIZON: &str = "horizon";
pub const PARAM_MODEL: &str = "model";

#[derive(Debug, Clone, Serialize)]
pub struct ForecastView {
    pub metric: KpiName,
    pub model: ModelKind,
    pub available: bool,
    pub filter: FilterSpec,
    pub history: Vec<HistoryPoint>,
    pub points: Vec<ScoredPoint>,
    pub confidence: f64,
    pub prediction_id: Uuid,
}

pub struct ForecastService {
    engine: Arc<AggregationEngine>,
    predictions: Arc<dyn PredictionStore>,
    models: ModelRegistry,
    clock: Arc<dyn Clock>,
}

impl ForecastService {
    pub fn new(engine: Arc<AggregationEngine>, predictions: Arc<dyn PredictionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            predictions,
            models: ModelRegistry::default(),
            clock,
        }
    }

    pub async fn forecast(&self, principal: Option<&Principal>, params: &HashMap<String, String>) -> AnalyticsResult<ForecastView> {
        let principal = authorize(principal, &AI_INSIGHTS)?;
        let get = |key: &str| params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let metric = match get(PARAM_METRIC) {
            None => KpiName::TotalRevenue,
            Some(name) => KpiName::parse(name)
                .filter(KpiName::is_forecastable)
                .ok_or_else(|| AnalyticsError::UnknownMetric(name.to_string()))?,
        };
        let horizon = match get(PARAM_HORIZON) {
            None => DEFAULT_FORECAST_HORIZON,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| AnalyticsError::invalid_request(format!("horizon '{raw}' is not a positive integer")))?,
        };
        let model = match get(PARAM_MODEL) {
            None => ModelKind::LinearTrend,
            Some(name) => ModelKind::parse(name).ok_or_else(|| AnalyticsError::UnknownMetric(format!("model '{name}'")))?,
        };

        let filter = normalize_with_default(params, self.clock.now(), DatePreset::Last12Months)?;
        let scope = principal.scope();
        let history = self.engine.metric_history(metric, &filter, scope).await?;
        let output = self.models.run(model, &history, horizon)?;

        let result = PredictiveResult::new(
            model.as_str(),
            output.result_type,
            json!({
                "metric": metric.as_str(),
                "scope": scope,
                "filter": filter,
            }),
            serde_json::to_value(&output.points).map_err(|e| AnalyticsError::Storage(e.into()))?,
            output.confidence,
            self.clock.now(),
        );
        let prediction_id = result.id;
        let superseded = self.predictions.supersede_and_insert(result).await?;
        info!(
            metric = metric.as_str(),
            model = model.as_str(),
            horizon,
            superseded,
            "forecast stored"
        );

        Ok(ForecastView {
            metric,
            model,
            available: true,
            filter,
            history,
            points: output.points,
            confidence: output.confidence,
            prediction_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::crm::Sale;
    use crate::domain::model::prediction::PredictionStatus;
    use crate::domain::model::principal::Role;
    use crate::repository::crm_store::{CrmStore, InMemoryCrmStore};
    use crate::repository::prediction_store::InMemoryPredictionStore;
    use crate::service::clock::FixedClock;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    async fn service(months_with_sales: &[u32]) -> (ForecastService, Arc<InMemoryPredictionStore>) {
        let crm = Arc::new(InMemoryCrmStore::new());
        let rep = Uuid::new_v4();
        for (i, m) in months_with_sales.iter().enumerate() {
            crm.insert_sale(Sale {
                id: Uuid::new_v4(),
                amount: dec!(100) * rust_decimal::Decimal::from(i + 1),
                closed_on: NaiveDate::from_ymd_opt(2024, *m, 10).unwrap(),
                product_category: "Software".into(),
                region: "North".into(),
                sales_rep_id: rep,
                lead_id: None,
            })
            .await
            .unwrap();
        }
        let predictions = Arc::new(InMemoryPredictionStore::new());
        let svc = ForecastService::new(
            Arc::new(AggregationEngine::new(crm, "USD")),
            predictions.clone(),
            Arc::new(FixedClock::on(2024, 4, 20)),
        );
        (svc, predictions)
    }

    fn manager() -> Principal {
        Principal::new(Uuid::new_v4(), "mgr", "mgr@example.com", [Role::SalesManager])
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn repeated_forecast_supersedes_previous() {
        let (svc, store) = service(&[1, 2, 3, 4]).await;
        let user = manager();
        let p = params(&[("start_date", "2024-01-01"), ("end_date", "2024-04-20")]);

        let first = svc.forecast(Some(&user), &p).await.unwrap();
        assert_eq!(first.points.len(), DEFAULT_FORECAST_HORIZON);
        assert_eq!(first.points[0].date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        let second = svc.forecast(Some(&user), &p).await.unwrap();

        let ctx = json!({"metric": "total_revenue", "scope": user.scope(), "filter": second.filter});
        let history = store.history("linear_trend", &ctx).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.prediction_id);
        assert_eq!(history[0].status, PredictionStatus::Active);
        assert_eq!(history[1].status, PredictionStatus::Superseded);
    }

    #[tokio::test]
    async fn short_history_is_insufficient() {
        let (svc, store) = service(&[4]).await;
        let p = params(&[("start_date", "2024-03-01"), ("end_date", "2024-04-20")]);
        let res = svc.forecast(Some(&manager()), &p).await;
        assert!(matches!(res, Err(AnalyticsError::InsufficientData { required: 3, available: 2 })));
        let ctx = json!({"metric": "total_revenue"});
        assert!(store.active_for("linear_trend", &ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_unforecastable_metric() {
        let (svc, _) = service(&[]).await;
        let res = svc.forecast(Some(&manager()), &params(&[("metric", "conversion_rate")])).await;
        assert!(matches!(res, Err(AnalyticsError::UnknownMetric(_))));
    }
}
