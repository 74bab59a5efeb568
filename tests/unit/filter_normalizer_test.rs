// tests/unit/filter_normalizer_test.rs

use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use sales_analytics_service::domain::error::AnalyticsError;
use sales_analytics_service::domain::model::filter::DatePreset;
use sales_analytics_service::service::clock::FixedClock;
use sales_analytics_service::service::filter_normalizer::FilterNormalizer;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn normalizer_on(y: i32, m: u32, day: u32) -> FilterNormalizer {
    FilterNormalizer::new(Arc::new(FixedClock::on(y, m, day)))
}

#[test]
fn every_catalogue_preset_except_custom_resolves() {
    let normalizer = normalizer_on(2024, 11, 5);
    for preset in DatePreset::CATALOGUE {
        let result = normalizer.normalize(&params(&[("date_range", preset.as_str())]));
        match preset {
            DatePreset::Custom => assert!(matches!(result, Err(AnalyticsError::InvalidFilter(_)))),
            _ => {
                let spec = result.unwrap();
                assert_eq!(spec.preset(), preset);
                assert!(spec.start_date() <= spec.end_date(), "{preset:?}");
            }
        }
    }
}

#[test]
fn this_quarter_on_first_day_of_quarter_is_a_single_day() {
    let spec = normalizer_on(2024, 7, 1).normalize(&params(&[("date_range", "this_quarter")])).unwrap();
    assert_eq!(spec.start_date(), d(2024, 7, 1));
    assert_eq!(spec.end_date(), d(2024, 7, 1));
}

#[test]
fn last_quarter_wraps_the_year() {
    let spec = normalizer_on(2024, 2, 10).normalize(&params(&[("date_range", "last_quarter")])).unwrap();
    assert_eq!(spec.start_date(), d(2023, 10, 1));
    assert_eq!(spec.end_date(), d(2023, 12, 31));
}

#[test]
fn moving_the_clock_moves_the_default_window() {
    let clock = Arc::new(FixedClock::on(2024, 1, 31));
    let normalizer = FilterNormalizer::new(clock.clone());
    let first = normalizer.normalize(&HashMap::new()).unwrap();
    assert_eq!(first.start_date(), d(2024, 1, 1));

    clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    let second = normalizer.normalize(&HashMap::new()).unwrap();
    assert_eq!(second.start_date(), d(2024, 1, 31));
    assert_eq!(second.end_date(), d(2024, 3, 1));
}

#[test]
fn explicit_default_is_used_without_date_params() {
    let spec = normalizer_on(2024, 5, 20)
        .normalize_with_default(&params(&[("region", "LATAM")]), DatePreset::Last12Months)
        .unwrap();
    assert_eq!(spec.preset(), DatePreset::Last12Months);
    assert_eq!(spec.start_date(), d(2023, 6, 1));
    assert_eq!(spec.region(), Some("LATAM"));
}

#[test]
fn same_day_custom_range_is_valid() {
    let spec = normalizer_on(2024, 5, 20)
        .normalize(&params(&[("start_date", "2024-02-29"), ("end_date", "2024-02-29")]))
        .unwrap();
    assert_eq!(spec.preset(), DatePreset::Custom);
    assert!(spec.contains(d(2024, 2, 29)));
    assert!(!spec.contains(d(2024, 3, 1)));
}

#[test]
fn rfc3339_timestamps_are_truncated_to_dates() {
    let spec = normalizer_on(2024, 5, 20)
        .normalize(&params(&[("start_date", "2024-01-01T23:10:00Z"), ("end_date", "2024-01-15T00:00:00+00:00")]))
        .unwrap();
    assert_eq!(spec.start_date(), d(2024, 1, 1));
    assert_eq!(spec.end_date(), d(2024, 1, 15));
}

#[test]
fn end_before_start_is_rejected_with_a_message() {
    let err = normalizer_on(2024, 5, 20)
        .normalize(&params(&[("start_date", "2024-03-10"), ("end_date", "2024-03-01")]))
        .unwrap_err();
    match err {
        AnalyticsError::InvalidFilter(msg) => assert!(msg.contains("after"), "{msg}"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn rep_filter_must_be_an_id() {
    let rep = uuid::Uuid::new_v4();
    let normalizer = normalizer_on(2024, 5, 20);
    let raw = rep.to_string();
    let spec = normalizer.normalize(&params(&[("sales_rep_id", raw.as_str())])).unwrap();
    assert_eq!(spec.sales_rep_id(), Some(rep));
    assert!(normalizer.normalize(&params(&[("sales_rep_id", "42")])).is_err());
}
