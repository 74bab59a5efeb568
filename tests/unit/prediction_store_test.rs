// tests/unit/prediction_store_test.rs

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use sales_analytics_service::domain::model::prediction::{PredictionStatus, PredictiveResult, ResultType};
use sales_analytics_service::repository::prediction_store::{InMemoryPredictionStore, PredictionStore};

fn forecast(context: serde_json::Value, value: f64) -> PredictiveResult {
    PredictiveResult::new(
        "linear_trend",
        ResultType::Forecast,
        context,
        json!({ "points": [{ "date": "2024-06-01", "value": value }] }),
        0.9,
        Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn key_order_does_not_split_targets() {
    let store = InMemoryPredictionStore::new();
    store
        .supersede_and_insert(forecast(json!({"metric": "total_revenue", "scope": "all"}), 1.0))
        .await
        .unwrap();
    let superseded = store
        .supersede_and_insert(forecast(json!({"scope": "all", "metric": "total_revenue"}), 2.0))
        .await
        .unwrap();
    assert_eq!(superseded, 1);

    let history = store.history("linear_trend", &json!({"metric": "total_revenue", "scope": "all"})).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, PredictionStatus::Active);
    assert_eq!(history[0].prediction["points"][0]["value"], 2.0);
    assert_eq!(history[1].status, PredictionStatus::Superseded);
}

#[tokio::test]
async fn different_targets_and_models_are_independent() {
    let store = InMemoryPredictionStore::new();
    let revenue = json!({"metric": "total_revenue"});
    let leads = json!({"metric": "new_leads"});
    store.supersede_and_insert(forecast(revenue.clone(), 1.0)).await.unwrap();
    assert_eq!(store.supersede_and_insert(forecast(leads.clone(), 1.0)).await.unwrap(), 0);

    let mut anomaly = forecast(revenue.clone(), 0.0);
    anomaly.model_id = "zscore_anomaly".into();
    anomaly.result_type = ResultType::AnomalyScore;
    assert_eq!(store.supersede_and_insert(anomaly).await.unwrap(), 0);

    assert!(store.active_for("linear_trend", &revenue).await.unwrap().is_some());
    assert!(store.active_for("linear_trend", &leads).await.unwrap().is_some());
    assert!(store.active_for("zscore_anomaly", &revenue).await.unwrap().is_some());
    assert!(store.active_for("zscore_anomaly", &leads).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_supersession_leaves_one_active() {
    let store = Arc::new(InMemoryPredictionStore::new());
    let context = json!({"metric": "total_revenue", "scope": "all"});

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let context = context.clone();
        handles.push(tokio::spawn(async move {
            store.supersede_and_insert(forecast(context, i as f64)).await
        }));
    }
    let mut superseded_total = 0;
    for handle in handles {
        superseded_total += handle.await.unwrap().unwrap();
    }

    let history = store.history("linear_trend", &context).await.unwrap();
    assert_eq!(history.len(), 16);
    let active = history.iter().filter(|r| r.status == PredictionStatus::Active).count();
    assert_eq!(active, 1);
    assert_eq!(superseded_total, 15);
}

#[tokio::test]
async fn report_results_are_listed_and_validated() {
    let store = InMemoryPredictionStore::new();
    let report_id = Uuid::new_v4();
    let first = forecast(json!({"metric": "total_revenue"}), 1.0).for_report(report_id);
    let first_id = first.id;
    store.supersede_and_insert(first).await.unwrap();
    store
        .supersede_and_insert(forecast(json!({"metric": "new_leads"}), 3.0).for_report(report_id))
        .await
        .unwrap();
    store.supersede_and_insert(forecast(json!({"metric": "other"}), 3.0)).await.unwrap();

    assert_eq!(store.list_for_report(report_id).await.unwrap().len(), 2);

    assert!(store.mark_validated(first_id).await.unwrap());
    assert!(!store.mark_validated(first_id).await.unwrap());
    assert!(store.active_for("linear_trend", &json!({"metric": "total_revenue"})).await.unwrap().is_none());
}

#[tokio::test]
async fn superseded_rows_cannot_be_validated() {
    let store = InMemoryPredictionStore::new();
    let context = json!({"metric": "total_revenue"});
    let old = forecast(context.clone(), 1.0);
    let old_id = old.id;
    store.supersede_and_insert(old).await.unwrap();
    store.supersede_and_insert(forecast(context, 2.0)).await.unwrap();
    assert!(!store.mark_validated(old_id).await.unwrap());
}

#[test]
fn confidence_is_clamped_on_construction() {
    let mut result = forecast(json!({}), 1.0);
    assert_eq!(result.confidence, 0.9);
    result = PredictiveResult::new("linear_trend", ResultType::Forecast, json!({}), json!(null), 1.7, Utc::now());
    assert_eq!(result.confidence, 1.0);
}
