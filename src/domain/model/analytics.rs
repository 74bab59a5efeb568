// src/domain/model/analytics.rs
//! KPI and chart registries plus the ephemeral results computed from them.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::crm::{Lead, Sale};
use super::filter::FilterSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiName {
    TotalRevenue,
    AverageDealSize,
    DealsClosed,
    NewLeads,
    ConversionRate,
    TasksCompleted,
    ActivitiesLogged,
}

/// How a KPI value should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Currency,
    Count,
    Ratio,
}

impl KpiName {
    pub const ALL: [KpiName; 7] = [
        KpiName::TotalRevenue,
        KpiName::AverageDealSize,
        KpiName::DealsClosed,
        KpiName::NewLeads,
        KpiName::ConversionRate,
        KpiName::TasksCompleted,
        KpiName::ActivitiesLogged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KpiName::TotalRevenue => "total_revenue",
            KpiName::AverageDealSize => "average_deal_size",
            KpiName::DealsClosed => "deals_closed",
            KpiName::NewLeads => "new_leads",
            KpiName::ConversionRate => "conversion_rate",
            KpiName::TasksCompleted => "tasks_completed",
            KpiName::ActivitiesLogged => "activities_logged",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            KpiName::TotalRevenue => "Total revenue",
            KpiName::AverageDealSize => "Average deal size",
            KpiName::DealsClosed => "Deals closed",
            KpiName::NewLeads => "New leads",
            KpiName::ConversionRate => "Lead conversion rate",
            KpiName::TasksCompleted => "Tasks completed",
            KpiName::ActivitiesLogged => "Activities logged",
        }
    }

    pub fn unit_kind(&self) -> UnitKind {
        match self {
            KpiName::TotalRevenue | KpiName::AverageDealSize => UnitKind::Currency,
            KpiName::ConversionRate => UnitKind::Ratio,
            _ => UnitKind::Count,
        }
    }

    pub fn parse(raw: &str) -> Option<KpiName> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }

    /// Metrics with a monthly history usable for forecasting.
    pub fn is_forecastable(&self) -> bool {
        matches!(self, KpiName::TotalRevenue | KpiName::DealsClosed | KpiName::NewLeads)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KpiResult {
    pub name: KpiName,
    pub label: &'static str,
    pub value: Decimal,
    pub unit: String,
    #[serde(skip)]
    pub filter: FilterSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartName {
    SalesOverTime,
    SalesByProduct,
    SalesByRegion,
    SalesByRep,
    LeadsBySource,
    ConversionRates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
}

impl ChartName {
    pub const ALL: [ChartName; 6] = [
        ChartName::SalesOverTime,
        ChartName::SalesByProduct,
        ChartName::SalesByRegion,
        ChartName::SalesByRep,
        ChartName::LeadsBySource,
        ChartName::ConversionRates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartName::SalesOverTime => "sales_over_time",
            ChartName::SalesByProduct => "sales_by_product",
            ChartName::SalesByRegion => "sales_by_region",
            ChartName::SalesByRep => "sales_by_rep",
            ChartName::LeadsBySource => "leads_by_source",
            ChartName::ConversionRates => "conversion_rates",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ChartName::SalesOverTime => "Sales over time",
            ChartName::SalesByProduct => "Sales by product category",
            ChartName::SalesByRegion => "Sales by region",
            ChartName::SalesByRep => "Sales by representative",
            ChartName::LeadsBySource => "Leads by source",
            ChartName::ConversionRates => "Conversion rate by lead source",
        }
    }

    pub fn kind(&self) -> ChartKind {
        match self {
            ChartName::SalesOverTime => ChartKind::Line,
            ChartName::LeadsBySource => ChartKind::Pie,
            _ => ChartKind::Bar,
        }
    }

    pub fn unit_kind(&self) -> UnitKind {
        match self {
            ChartName::LeadsBySource => UnitKind::Count,
            ChartName::ConversionRates => UnitKind::Ratio,
            _ => UnitKind::Currency,
        }
    }

    /// Accepts the bare name or the `<name>_chart` form used by export contexts.
    pub fn parse(raw: &str) -> Option<ChartName> {
        let raw = raw.strip_suffix("_chart").unwrap_or(raw);
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    /// Drilldown key for this bucket.
    pub id: String,
    pub label: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub chart: ChartName,
    pub title: &'static str,
    pub kind: ChartKind,
    pub unit: String,
    pub points: Vec<ChartPoint>,
    #[serde(skip)]
    pub filter: FilterSpec,
}

impl ChartSeries {
    pub fn point(&self, id: &str) -> Option<&ChartPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    /// Chart.js-shaped payload (`type`, `data.labels`, `data.datasets`).
    pub fn to_chartjs(&self) -> Value {
        let labels: Vec<&str> = self.points.iter().map(|p| p.label.as_str()).collect();
        let ids: Vec<&str> = self.points.iter().map(|p| p.id.as_str()).collect();
        let data: Vec<f64> = self.points.iter().map(|p| p.value.to_f64().unwrap_or(0.0)).collect();
        json!({
            "chart": self.chart,
            "type": self.kind,
            "unit": self.unit,
            "data": {
                "labels": labels,
                "datasets": [{
                    "label": self.title,
                    "data": data,
                    "ids": ids,
                }],
            },
            "filter": self.filter,
        })
    }
}

/// Detail rows returned by a drilldown.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetailRow {
    Sale(Sale),
    Lead(Lead),
}

#[derive(Debug, Clone, Serialize)]
pub struct Drilldown {
    pub chart: ChartName,
    pub data_point_id: String,
    pub label: String,
    pub rows: Vec<DetailRow>,
}

/// One point of a monthly metric history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresetOption {
    pub value: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub product_categories: Vec<String>,
    pub regions: Vec<String>,
    pub lead_sources: Vec<String>,
    pub date_ranges: Vec<PresetOption>,
    pub kpis: Vec<&'static str>,
    pub charts: Vec<&'static str>,
}
