// src/service/predictive_model.rs
//! Predictive model adapter.
//!
//! Every model takes an ordered history of `(date, value)` points and returns
//! a scored series, so the report pipeline can run any of them the same way:
//! - `linear_trend`: OLS forecast of the next `horizon` points; confidence
//!   from the in-sample residual variance.
//! - `zscore_anomaly`: z-score of each historical point against the series.
//! - `logistic_trend`: probability that a point sits in the upper half of the
//!   series, fitted on time alone and extended `horizon` points ahead.
//!
//! Fewer than [`MIN_HISTORY`] points is `InsufficientData`, never a result.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::domain::error::{AnalyticsError, AnalyticsResult};
use crate::domain::model::analytics::{HistoryPoint, KpiName};
use crate::domain::model::filter::shift_months;
use crate::domain::model::prediction::ResultType;
use crate::telemetry::metrics;

pub const MIN_HISTORY: usize = 3;
pub const MAX_HORIZON: usize = 24;

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    LinearTrend,
    ZScoreAnomaly,
    LogisticTrend,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::LinearTrend, ModelKind::ZScoreAnomaly, ModelKind::LogisticTrend];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::LinearTrend => "linear_trend",
            ModelKind::ZScoreAnomaly => "zscore_anomaly",
            ModelKind::LogisticTrend => "logistic_trend",
        }
    }

    pub fn parse(raw: &str) -> Option<ModelKind> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }

    pub fn result_type(&self) -> ResultType {
        match self {
            ModelKind::LinearTrend => ResultType::Forecast,
            ModelKind::ZScoreAnomaly => ResultType::AnomalyScore,
            ModelKind::LogisticTrend => ResultType::Probability,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredPoint {
    pub date: NaiveDate,
    /// Forecast value, z-score or probability depending on the model.
    pub value: f64,
    pub confidence: f64,
    /// Anomalous point, or probability at or above one half.
    pub flagged: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelOutput {
    pub model: ModelKind,
    pub result_type: ResultType,
    pub points: Vec<ScoredPoint>,
    /// Overall confidence in [0, 1].
    pub confidence: f64,
}

pub trait PredictiveModel: Send + Sync + 'static {
    fn kind(&self) -> ModelKind;

    fn score(&self, history: &[HistoryPoint], horizon: usize) -> AnalyticsResult<ModelOutput>;
}

fn require_history(history: &[HistoryPoint]) -> AnalyticsResult<()> {
    if history.len() < MIN_HISTORY {
        return Err(AnalyticsError::InsufficientData {
            required: MIN_HISTORY,
            available: history.len(),
        });
    }
    Ok(())
}

/// Dates following the last history point. Monthly histories (every date on
/// the 1st) step by calendar month; others by their mean spacing in days.
pub fn future_dates(history: &[HistoryPoint], horizon: usize) -> Vec<NaiveDate> {
    let (Some(first), Some(last)) = (history.first(), history.last()) else {
        return Vec::new();
    };
    let monthly = history.iter().all(|p| p.date.day() == 1);
    let step_days = if history.len() > 1 {
        ((last.date - first.date).num_days() / (history.len() as i64 - 1)).max(1)
    } else {
        1
    };
    (1..=horizon)
        .map(|k| {
            if monthly {
                shift_months(last.date, k as i32)
            } else {
                last.date + Duration::days(step_days * k as i64)
            }
        })
        .collect()
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// --------------------
/// Linear trend (OLS)
/// --------------------
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearTrendModel;

/// Slope, intercept and residual variance `SSE / (n - 2)` over x = 0..n.
fn ols(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;
    let (mut sxx, mut sxy) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxx += dx * dx;
        sxy += dx * (y - y_mean);
    }
    let slope = if sxx > EPS { sxy / sxx } else { 0.0 };
    let intercept = y_mean - slope * x_mean;
    let sse: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| {
            let r = y - (intercept + slope * i as f64);
            r * r
        })
        .sum();
    let variance = if values.len() > 2 { sse / (n - 2.0) } else { 0.0 };
    (slope, intercept, variance)
}

impl PredictiveModel for LinearTrendModel {
    fn kind(&self) -> ModelKind {
        ModelKind::LinearTrend
    }

    fn score(&self, history: &[HistoryPoint], horizon: usize) -> AnalyticsResult<ModelOutput> {
        require_history(history)?;
        let values: Vec<f64> = history.iter().map(|p| p.value).collect();
        let (slope, intercept, variance) = ols(&values);
        let mean = values.iter().sum::<f64>() / values.len() as f64;

        let confidence = if mean.abs() < EPS {
            if variance < EPS {
                1.0
            } else {
                0.0
            }
        } else {
            (1.0 - variance.sqrt() / mean.abs()).clamp(0.0, 1.0)
        };

        let last_x = (values.len() - 1) as f64;
        let points = future_dates(history, horizon)
            .into_iter()
            .enumerate()
            .map(|(k, date)| ScoredPoint {
                date,
                value: round_to((intercept + slope * (last_x + 1.0 + k as f64)).max(0.0), 2),
                confidence: round_to(confidence, 4),
                flagged: false,
            })
            .collect();
        debug!(slope, intercept, variance, "linear trend fitted");

        Ok(ModelOutput {
            model: ModelKind::LinearTrend,
            result_type: ResultType::Forecast,
            points,
            confidence: round_to(confidence, 4),
        })
    }
}

/// --------------------
/// Z-score anomaly scorer
/// --------------------
#[derive(Debug, Clone, Copy)]
pub struct ZScoreAnomalyModel {
    pub threshold_z: f64,
}

impl Default for ZScoreAnomalyModel {
    fn default() -> Self {
        Self { threshold_z: 2.0 }
    }
}

impl ZScoreAnomalyModel {
    /// Mean and sample standard deviation; `None` below two values.
    pub fn calc_mean_std(values: &[f64]) -> Option<(f64, f64)> {
        if values.len() < 2 {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1.0);
        Some((mean, var.sqrt()))
    }
}

impl PredictiveModel for ZScoreAnomalyModel {
    fn kind(&self) -> ModelKind {
        ModelKind::ZScoreAnomaly
    }

    fn score(&self, history: &[HistoryPoint], _horizon: usize) -> AnalyticsResult<ModelOutput> {
        require_history(history)?;
        let values: Vec<f64> = history.iter().map(|p| p.value).collect();
        let (mean, std) = Self::calc_mean_std(&values).unwrap_or((0.0, 0.0));

        let points: Vec<ScoredPoint> = history
            .iter()
            .map(|p| {
                let z = if std > EPS { (p.value - mean) / std } else { 0.0 };
                ScoredPoint {
                    date: p.date,
                    value: round_to(z, 4),
                    confidence: round_to((z.abs() / self.threshold_z).min(1.0), 4),
                    flagged: z.abs() >= self.threshold_z,
                }
            })
            .collect();
        let confidence = points.iter().map(|p| p.confidence).fold(0.0, f64::max);

        Ok(ModelOutput {
            model: ModelKind::ZScoreAnomaly,
            result_type: ResultType::AnomalyScore,
            points,
            confidence,
        })
    }
}

/// --------------------
/// Logistic trend classifier
/// --------------------
#[derive(Debug, Clone, Copy)]
pub struct LogisticTrendModel {
    pub iterations: usize,
    pub learning_rate: f64,
}

impl Default for LogisticTrendModel {
    fn default() -> Self {
        Self {
            iterations: 500,
            learning_rate: 0.5,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

impl PredictiveModel for LogisticTrendModel {
    fn kind(&self) -> ModelKind {
        ModelKind::LogisticTrend
    }

    fn score(&self, history: &[HistoryPoint], horizon: usize) -> AnalyticsResult<ModelOutput> {
        require_history(history)?;
        let values: Vec<f64> = history.iter().map(|p| p.value).collect();
        let cut = median(&values);
        let labels: Vec<f64> = values.iter().map(|v| if *v > cut { 1.0 } else { 0.0 }).collect();
        let span = (values.len() - 1) as f64;
        let xs: Vec<f64> = (0..values.len()).map(|i| i as f64 / span).collect();

        let (mut w, mut b) = (0.0, 0.0);
        let n = values.len() as f64;
        for _ in 0..self.iterations {
            let (mut gw, mut gb) = (0.0, 0.0);
            for (x, y) in xs.iter().zip(&labels) {
                let err = sigmoid(w * x + b) - y;
                gw += err * x;
                gb += err;
            }
            w -= self.learning_rate * gw / n;
            b -= self.learning_rate * gb / n;
        }

        let correct = xs
            .iter()
            .zip(&labels)
            .filter(|(x, y)| (sigmoid(w * **x + b) >= 0.5) == (**y > 0.5))
            .count();
        let accuracy = correct as f64 / n;

        let dates = history.iter().map(|p| p.date).chain(future_dates(history, horizon));
        let points = dates
            .enumerate()
            .map(|(i, date)| {
                let p = sigmoid(w * (i as f64 / span) + b);
                ScoredPoint {
                    date,
                    value: round_to(p, 4),
                    confidence: round_to((p - 0.5).abs() * 2.0, 4),
                    flagged: p >= 0.5,
                }
            })
            .collect();

        Ok(ModelOutput {
            model: ModelKind::LogisticTrend,
            result_type: ResultType::Probability,
            points,
            confidence: round_to(accuracy, 4),
        })
    }
}

/// Closed registry of the available models.
#[derive(Clone)]
pub struct ModelRegistry {
    models: Vec<Arc<dyn PredictiveModel>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            models: vec![
                Arc::new(LinearTrendModel),
                Arc::new(ZScoreAnomalyModel::default()),
                Arc::new(LogisticTrendModel::default()),
            ],
        }
    }
}

impl ModelRegistry {
    pub fn get(&self, kind: ModelKind) -> Option<Arc<dyn PredictiveModel>> {
        self.models.iter().find(|m| m.kind() == kind).cloned()
    }

    /// Runs a model after validating the horizon (1..=24).
    pub fn run(&self, kind: ModelKind, history: &[HistoryPoint], horizon: usize) -> AnalyticsResult<ModelOutput> {
        if horizon == 0 || horizon > MAX_HORIZON {
            return Err(AnalyticsError::invalid_request(format!("horizon must be between 1 and {MAX_HORIZON}")));
        }
        let model = self
            .get(kind)
            .ok_or_else(|| AnalyticsError::Unsupported(format!("model '{}' is not registered", kind.as_str())))?;
        metrics::incr("predictive_model_runs", &[("model", kind.as_str())]);
        let output = model.score(history, horizon);
        if let Err(AnalyticsError::InsufficientData { .. }) = &output {
            metrics::incr("predictive_insufficient_data", &[("model", kind.as_str())]);
        }
        output
    }

    /// Forecast of a metric's monthly history with the linear trend model.
    pub fn forecast(&self, metric: KpiName, history: &[HistoryPoint], horizon: usize) -> AnalyticsResult<ModelOutput> {
        debug!(metric = metric.as_str(), points = history.len(), horizon, "forecast requested");
        self.run(ModelKind::LinearTrend, history, horizon)
    }
}
