// src/domain/model/prediction.rs
//! Persisted outputs of the predictive models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Forecast,
    Probability,
    AnomalyScore,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Forecast => "forecast",
            ResultType::Probability => "probability",
            ResultType::AnomalyScore => "anomaly_score",
        }
    }

    pub fn parse(raw: &str) -> Option<ResultType> {
        [ResultType::Forecast, ResultType::Probability, ResultType::AnomalyScore]
            .into_iter()
            .find(|t| t.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Active,
    Superseded,
    Validated,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Active => "active",
            PredictionStatus::Superseded => "superseded",
            PredictionStatus::Validated => "validated",
        }
    }

    pub fn parse(raw: &str) -> Option<PredictionStatus> {
        [PredictionStatus::Active, PredictionStatus::Superseded, PredictionStatus::Validated]
            .into_iter()
            .find(|s| s.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveResult {
    pub id: Uuid,
    pub model_id: String,
    pub result_type: ResultType,
    /// Structured description of what is predicted (metric, scope, ...).
    pub target_context: Value,
    pub prediction: Value,
    pub confidence: f64,
    pub status: PredictionStatus,
    pub report_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl PredictiveResult {
    pub fn new(
        model_id: impl Into<String>,
        result_type: ResultType,
        target_context: Value,
        prediction: Value,
        confidence: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id: model_id.into(),
            result_type,
            target_context,
            prediction,
            confidence: confidence.clamp(0.0, 1.0),
            status: PredictionStatus::Active,
            report_id: None,
            created_at,
        }
    }

    pub fn for_report(mut self, report_id: Uuid) -> Self {
        self.report_id = Some(report_id);
        self
    }

    pub fn target_key(&self) -> String {
        target_key(&self.target_context)
    }
}

/// Canonical string for a target context: object keys sorted at every depth,
/// so equal contexts always produce the same key.
pub fn target_key(context: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String(key.clone()).to_string());
                    out.push(':');
                    write(&map[key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(context, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn target_key_ignores_key_order() {
        let a = json!({"metric": "total_revenue", "scope": {"kind": "all"}, "horizon": 3});
        let b = json!({"horizon": 3, "scope": {"kind": "all"}, "metric": "total_revenue"});
        assert_eq!(target_key(&a), target_key(&b));
        assert_ne!(target_key(&a), target_key(&json!({"metric": "new_leads"})));
    }

    #[test]
    fn confidence_is_clamped() {
        let r = PredictiveResult::new("linear_trend", ResultType::Forecast, json!({}), json!([]), 1.7, Utc::now());
        assert_eq!(r.confidence, 1.0);
        assert_eq!(r.status, PredictionStatus::Active);
    }
}
