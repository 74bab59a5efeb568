// src/domain/model/filter.rs
//! Normalized query constraints and the calendar helpers they rely on.

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::error::AnalyticsError;

/// Named date ranges accepted in `date_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePreset {
    Last7Days,
    Last30Days,
    ThisQuarter,
    LastQuarter,
    ThisYear,
    LastYear,
    Last12Months,
    Custom,
}

impl DatePreset {
    pub const CATALOGUE: [DatePreset; 8] = [
        DatePreset::Last7Days,
        DatePreset::Last30Days,
        DatePreset::ThisQuarter,
        DatePreset::LastQuarter,
        DatePreset::ThisYear,
        DatePreset::LastYear,
        DatePreset::Last12Months,
        DatePreset::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatePreset::Last7Days => "last_7_days",
            DatePreset::Last30Days => "last_30_days",
            DatePreset::ThisQuarter => "this_quarter",
            DatePreset::LastQuarter => "last_quarter",
            DatePreset::ThisYear => "this_year",
            DatePreset::LastYear => "last_year",
            DatePreset::Last12Months => "last_12_months",
            DatePreset::Custom => "custom",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DatePreset::Last7Days => "Last 7 days",
            DatePreset::Last30Days => "Last 30 days",
            DatePreset::ThisQuarter => "This quarter",
            DatePreset::LastQuarter => "Last quarter",
            DatePreset::ThisYear => "This year",
            DatePreset::LastYear => "Last year",
            DatePreset::Last12Months => "Last 12 months",
            DatePreset::Custom => "Custom range",
        }
    }

    pub fn parse(raw: &str) -> Option<DatePreset> {
        Self::CATALOGUE.into_iter().find(|p| p.as_str() == raw)
    }
}

/// Validated filter. Construction goes through [`FilterSpec::new`], which
/// enforces `start_date <= end_date`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FilterSpec {
    start_date: NaiveDate,
    end_date: NaiveDate,
    preset: DatePreset,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sales_rep_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lead_source: Option<String>,
}

impl FilterSpec {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, preset: DatePreset) -> Result<Self, AnalyticsError> {
        if start_date > end_date {
            return Err(AnalyticsError::invalid_filter(format!(
                "start_date {start_date} is after end_date {end_date}"
            )));
        }
        Ok(Self {
            start_date,
            end_date,
            preset,
            product_category: None,
            region: None,
            sales_rep_id: None,
            lead_source: None,
        })
    }

    pub fn with_product_category(mut self, value: impl Into<String>) -> Self {
        self.product_category = Some(value.into());
        self
    }

    pub fn with_region(mut self, value: impl Into<String>) -> Self {
        self.region = Some(value.into());
        self
    }

    pub fn with_sales_rep(mut self, id: Uuid) -> Self {
        self.sales_rep_id = Some(id);
        self
    }

    pub fn with_lead_source(mut self, value: impl Into<String>) -> Self {
        self.lead_source = Some(value.into());
        self
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn preset(&self) -> DatePreset {
        self.preset
    }

    pub fn product_category(&self) -> Option<&str> {
        self.product_category.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn sales_rep_id(&self) -> Option<Uuid> {
        self.sales_rep_id
    }

    pub fn lead_source(&self) -> Option<&str> {
        self.lead_source.as_deref()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// Month buckets (first day of each month) touched by the range, in order.
    pub fn months(&self) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut cursor = first_of_month(self.start_date);
        let last = first_of_month(self.end_date);
        while cursor <= last {
            out.push(cursor);
            match cursor.checked_add_months(Months::new(1)) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        out
    }

    /// Same constraints restricted to `[start, end]`; `None` when the
    /// intersection is empty.
    pub fn narrowed_to(&self, start: NaiveDate, end: NaiveDate) -> Option<FilterSpec> {
        let start = start.max(self.start_date);
        let end = end.min(self.end_date);
        if start > end {
            return None;
        }
        let mut narrowed = self.clone();
        narrowed.start_date = start;
        narrowed.end_date = end;
        narrowed.preset = DatePreset::Custom;
        Some(narrowed)
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn last_of_month(date: NaiveDate) -> NaiveDate {
    first_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

/// Shifts a date by whole months, clamping the day to the target month.
pub fn shift_months(date: NaiveDate, months: i32) -> NaiveDate {
    let shifted = if months >= 0 {
        date.checked_add_months(Months::new(months as u32))
    } else {
        date.checked_sub_months(Months::new(months.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

pub fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = (date.month0() / 3) * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
}

/// `YYYY-MM` bucket key.
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Parses a `YYYY-MM` bucket key into the first day of that month.
pub fn parse_month_key(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").ok()
}
