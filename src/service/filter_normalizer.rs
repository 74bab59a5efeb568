// src/service/filter_normalizer.rs
//! Turns raw query parameters into a validated [`FilterSpec`].
//!
//! Preset resolution is pure given `now`. Categorical values are only
//! syntactically cleaned here; whether they are among the active dimension
//! values is checked by the aggregation engine.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

use crate::domain::error::AnalyticsError;
use crate::domain::model::filter::{first_of_month, quarter_start, shift_months, DatePreset, FilterSpec};
use crate::service::clock::Clock;

pub const PARAM_DATE_RANGE: &str = "date_range";
pub const PARAM_START_DATE: &str = "start_date";
pub const PARAM_END_DATE: &str = "end_date";
pub const PARAM_PRODUCT_CATEGORY: &str = "product_category";
pub const PARAM_REGION: &str = "region";
pub const PARAM_SALES_REP_ID: &str = "sales_rep_id";
pub const PARAM_LEAD_SOURCE: &str = "lead_source";

/// Filter keys understood by [`normalize`]; anything else in a request is
/// left to the caller.
pub const FILTER_PARAMS: [&str; 7] = [
    PARAM_DATE_RANGE,
    PARAM_START_DATE,
    PARAM_END_DATE,
    PARAM_PRODUCT_CATEGORY,
    PARAM_REGION,
    PARAM_SALES_REP_ID,
    PARAM_LEAD_SOURCE,
];

pub const DEFAULT_PRESET: DatePreset = DatePreset::Last30Days;

/// Clock-bound wrapper used by request handlers and the report worker.
#[derive(Clone)]
pub struct FilterNormalizer {
    clock: Arc<dyn Clock>,
}

impl FilterNormalizer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn normalize(&self, raw: &HashMap<String, String>) -> Result<FilterSpec, AnalyticsError> {
        normalize(raw, self.clock.now())
    }

    pub fn normalize_with_default(&self, raw: &HashMap<String, String>, default: DatePreset) -> Result<FilterSpec, AnalyticsError> {
        normalize_with_default(raw, self.clock.now(), default)
    }
}

pub fn normalize(raw: &HashMap<String, String>, now: DateTime<Utc>) -> Result<FilterSpec, AnalyticsError> {
    normalize_with_default(raw, now, DEFAULT_PRESET)
}

/// Like [`normalize`], with the preset used when no date parameter is given.
pub fn normalize_with_default(
    raw: &HashMap<String, String>,
    now: DateTime<Utc>,
    default: DatePreset,
) -> Result<FilterSpec, AnalyticsError> {
    let get = |key: &str| raw.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    let preset = match get(PARAM_DATE_RANGE) {
        Some(name) => Some(
            DatePreset::parse(name).ok_or_else(|| AnalyticsError::invalid_filter(format!("unknown date_range preset '{name}'")))?,
        ),
        None => None,
    };
    let start = get(PARAM_START_DATE).map(|v| parse_date(PARAM_START_DATE, v)).transpose()?;
    let end = get(PARAM_END_DATE).map(|v| parse_date(PARAM_END_DATE, v)).transpose()?;

    let today = now.date_naive();
    let mut spec = match (preset, start, end) {
        (Some(DatePreset::Custom), Some(s), Some(e)) | (None, Some(s), Some(e)) => FilterSpec::new(s, e, DatePreset::Custom)?,
        (Some(DatePreset::Custom), _, _) => {
            return Err(AnalyticsError::invalid_filter("custom date_range requires both start_date and end_date"))
        }
        (Some(p), None, None) => preset_spec(p, today)?,
        (Some(p), _, _) => {
            return Err(AnalyticsError::invalid_filter(format!(
                "date_range '{}' cannot be combined with explicit start_date/end_date",
                p.as_str()
            )))
        }
        (None, Some(_), None) | (None, None, Some(_)) => {
            return Err(AnalyticsError::invalid_filter("start_date and end_date must be supplied together"))
        }
        (None, None, None) => preset_spec(default, today)?,
    };

    if let Some(v) = get(PARAM_PRODUCT_CATEGORY) {
        spec = spec.with_product_category(v);
    }
    if let Some(v) = get(PARAM_REGION) {
        spec = spec.with_region(v);
    }
    if let Some(v) = get(PARAM_SALES_REP_ID) {
        let id = Uuid::parse_str(v).map_err(|_| AnalyticsError::invalid_filter(format!("sales_rep_id '{v}' is not a valid id")))?;
        spec = spec.with_sales_rep(id);
    }
    if let Some(v) = get(PARAM_LEAD_SOURCE) {
        spec = spec.with_lead_source(v);
    }
    Ok(spec)
}

fn preset_spec(preset: DatePreset, today: NaiveDate) -> Result<FilterSpec, AnalyticsError> {
    let (start, end) = resolve_preset(preset, today)
        .ok_or_else(|| AnalyticsError::invalid_filter(format!("preset '{}' needs explicit dates", preset.as_str())))?;
    FilterSpec::new(start, end, preset)
}

/// Concrete inclusive range for a preset; `None` for `custom`.
pub fn resolve_preset(preset: DatePreset, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let range = match preset {
        DatePreset::Last7Days => (today - Duration::days(7), today),
        DatePreset::Last30Days => (today - Duration::days(30), today),
        DatePreset::ThisQuarter => (quarter_start(today), today),
        DatePreset::LastQuarter => {
            let this_q = quarter_start(today);
            let prev_q = shift_months(this_q, -3);
            (prev_q, this_q.pred_opt().unwrap_or(this_q))
        }
        DatePreset::ThisYear => (NaiveDate::from_ymd_opt(today.year(), 1, 1)?, today),
        DatePreset::LastYear => (
            NaiveDate::from_ymd_opt(today.year() - 1, 1, 1)?,
            NaiveDate::from_ymd_opt(today.year() - 1, 12, 31)?,
        ),
        DatePreset::Last12Months => (shift_months(first_of_month(today), -11), today),
        DatePreset::Custom => return None,
    };
    Some(range)
}

/// `YYYY-MM-DD`; full RFC 3339 timestamps are accepted and truncated to the date.
fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, AnalyticsError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .ok_or_else(|| AnalyticsError::invalid_filter(format!("{field} '{raw}' is not a valid date (expected YYYY-MM-DD)")))
}

/// Extracts the filter keys of a report parameter object into the raw map
/// [`normalize`] expects. Non-string scalars are stringified; nested values
/// are rejected.
pub fn params_from_json(parameters: &Value) -> Result<HashMap<String, String>, AnalyticsError> {
    let mut out = HashMap::new();
    let obj = match parameters {
        Value::Null => return Ok(out),
        Value::Object(obj) => obj,
        _ => return Err(AnalyticsError::invalid_request("parameters must be a JSON object")),
    };
    for key in FILTER_PARAMS {
        match obj.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => {
                out.insert(key.to_string(), s.clone());
            }
            Some(v @ (Value::Number(_) | Value::Bool(_))) => {
                out.insert(key.to_string(), v.to_string());
            }
            Some(_) => return Err(AnalyticsError::invalid_request(format!("parameter '{key}' must be a scalar"))),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 9, 30, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn presets_resolve_against_injected_now() {
        let today = d(2024, 5, 20);
        assert_eq!(resolve_preset(DatePreset::Last7Days, today), Some((d(2024, 5, 13), today)));
        assert_eq!(resolve_preset(DatePreset::ThisQuarter, today), Some((d(2024, 4, 1), today)));
        assert_eq!(resolve_preset(DatePreset::LastQuarter, today), Some((d(2024, 1, 1), d(2024, 3, 31))));
        assert_eq!(resolve_preset(DatePreset::LastYear, today), Some((d(2023, 1, 1), d(2023, 12, 31))));
        assert_eq!(resolve_preset(DatePreset::Last12Months, today), Some((d(2023, 6, 1), today)));
        assert_eq!(resolve_preset(DatePreset::Custom, today), None);
    }

    #[test]
    fn defaults_to_last_30_days() {
        let spec = normalize(&HashMap::new(), now()).unwrap();
        assert_eq!(spec.preset(), DatePreset::Last30Days);
        assert_eq!(spec.start_date(), d(2024, 4, 20));
        assert_eq!(spec.end_date(), d(2024, 5, 20));
    }

    #[test]
    fn explicit_dates_become_custom() {
        let spec = normalize(&params(&[("start_date", "2024-01-01"), ("end_date", "2024-01-31"), ("region", " EMEA ")]), now()).unwrap();
        assert_eq!(spec.preset(), DatePreset::Custom);
        assert_eq!(spec.region(), Some("EMEA"));
    }

    #[test]
    fn rejects_bad_input() {
        let cases: Vec<HashMap<String, String>> = vec![
            params(&[("date_range", "last_decade")]),
            params(&[("start_date", "2024-02-01"), ("end_date", "2024-01-01")]),
            params(&[("start_date", "02/01/2024"), ("end_date", "2024-03-01")]),
            params(&[("date_range", "custom"), ("start_date", "2024-01-01")]),
            params(&[("date_range", "last_7_days"), ("start_date", "2024-01-01"), ("end_date", "2024-01-31")]),
            params(&[("end_date", "2024-01-31")]),
            params(&[("sales_rep_id", "bob")]),
        ];
        for raw in cases {
            let err = normalize(&raw, now()).unwrap_err();
            assert!(matches!(err, AnalyticsError::InvalidFilter(_)), "{raw:?} -> {err:?}");
        }
    }

    #[test]
    fn blank_values_are_absent() {
        let spec = normalize(&params(&[("date_range", ""), ("lead_source", "  ")]), now()).unwrap();
        assert_eq!(spec.preset(), DatePreset::Last30Days);
        assert_eq!(spec.lead_source(), None);
    }

    #[test]
    fn json_parameters_are_flattened() {
        let raw = params_from_json(&serde_json::json!({
            "date_range": "this_year",
            "region": "APAC",
            "include_forecast": true
        }))
        .unwrap();
        assert_eq!(raw.get("date_range").map(String::as_str), Some("this_year"));
        assert!(!raw.contains_key("include_forecast"));
        assert!(params_from_json(&serde_json::json!(["x"])).is_err());
        assert!(params_from_json(&serde_json::json!({"region": {"nested": 1}})).is_err());
    }
}
