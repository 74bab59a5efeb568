// tests/unit/predictive_model_test.rs

use chrono::NaiveDate;

use sales_analytics_service::domain::error::AnalyticsError;
use sales_analytics_service::domain::model::analytics::HistoryPoint;
use sales_analytics_service::domain::model::filter::shift_months;
use sales_analytics_service::domain::model::prediction::ResultType;
use sales_analytics_service::service::predictive_model::{
    LinearTrendModel, LogisticTrendModel, ModelKind, ModelRegistry, PredictiveModel, ZScoreAnomalyModel, MAX_HORIZON,
};

fn monthly(values: &[f64]) -> Vec<HistoryPoint> {
    let start = NaiveDate::from_ymd_opt(2023, 11, 1).unwrap();
    values
        .iter()
        .enumerate()
        .map(|(i, v)| HistoryPoint {
            date: shift_months(start, i as i32),
            value: *v,
        })
        .collect()
}

#[test]
fn flat_series_forecasts_the_same_value() {
    let out = LinearTrendModel.score(&monthly(&[5.0, 5.0, 5.0]), 3).unwrap();
    assert_eq!(out.result_type, ResultType::Forecast);
    assert!(out.points.iter().all(|p| p.value == 5.0));
    assert_eq!(out.confidence, 1.0);
    // monthly history crosses the year boundary
    assert_eq!(out.points[0].date, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
}

#[test]
fn noisy_series_lowers_confidence() {
    let out = LinearTrendModel.score(&monthly(&[10.0, 14.0, 9.0, 15.0]), 1).unwrap();
    assert_eq!(out.points[0].value, 14.5);
    assert!(out.confidence > 0.0 && out.confidence < 1.0, "{}", out.confidence);
}

#[test]
fn all_zero_history_is_certain_zero() {
    let out = LinearTrendModel.score(&monthly(&[0.0, 0.0, 0.0, 0.0]), 2).unwrap();
    assert_eq!(out.confidence, 1.0);
    assert!(out.points.iter().all(|p| p.value == 0.0));
}

#[test]
fn zscore_threshold_is_configurable() {
    let history = monthly(&[1.0, 2.0, 3.0]);
    let strict = ZScoreAnomalyModel::default().score(&history, 1).unwrap();
    assert!(strict.points.iter().all(|p| !p.flagged));
    assert_eq!(strict.confidence, 0.5);

    let loose = ZScoreAnomalyModel { threshold_z: 1.0 }.score(&history, 1).unwrap();
    let flags: Vec<bool> = loose.points.iter().map(|p| p.flagged).collect();
    assert_eq!(flags, vec![true, false, true]);
    assert_eq!(loose.points[0].value, -1.0);
}

#[test]
fn zscore_on_constant_series_flags_nothing() {
    let out = ZScoreAnomalyModel::default().score(&monthly(&[7.0, 7.0, 7.0, 7.0]), 1).unwrap();
    assert!(out.points.iter().all(|p| p.value == 0.0 && !p.flagged));
    assert_eq!(out.confidence, 0.0);
}

#[test]
fn logistic_on_flat_series_stays_below_half() {
    let out = LogisticTrendModel::default().score(&monthly(&[3.0, 3.0, 3.0, 3.0]), 1).unwrap();
    assert_eq!(out.result_type, ResultType::Probability);
    assert_eq!(out.points.len(), 5);
    assert!(out.points.iter().all(|p| !p.flagged && p.value < 0.5));
    assert_eq!(out.confidence, 1.0);
}

#[test]
fn every_model_requires_three_points() {
    let short = monthly(&[1.0, 2.0]);
    let registry = ModelRegistry::default();
    for kind in ModelKind::ALL {
        let err = registry.run(kind, &short, 1).unwrap_err();
        assert!(
            matches!(err, AnalyticsError::InsufficientData { required: 3, available: 2 }),
            "{kind:?}: {err:?}"
        );
    }
}

#[test]
fn horizon_is_bounded() {
    let registry = ModelRegistry::default();
    let history = monthly(&[1.0, 2.0, 3.0]);
    assert!(registry.run(ModelKind::LinearTrend, &history, MAX_HORIZON).is_ok());
    assert!(matches!(
        registry.run(ModelKind::LinearTrend, &history, MAX_HORIZON + 1),
        Err(AnalyticsError::InvalidRequest(_))
    ));
}

#[test]
fn model_names_round_trip() {
    for kind in ModelKind::ALL {
        assert_eq!(ModelKind::parse(kind.as_str()), Some(kind));
        assert_eq!(kind.result_type(), ModelRegistry::default().get(kind).unwrap().kind().result_type());
    }
    assert_eq!(ModelKind::parse("arima"), None);
}
