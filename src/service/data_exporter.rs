// src/service/data_exporter.rs
//! Export registry: which formats exist, which data contexts can be exported,
//! and the CSV/JSON renderers.

use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::domain::error::AnalyticsError;
use crate::domain::model::analytics::{ChartName, ChartSeries, DetailRow, Drilldown, KpiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Pdf,
    Png,
}

impl ExportFormat {
    /// Unknown tags and recognised-but-unimplemented formats are both errors.
    pub fn parse(raw: &str) -> Result<ExportFormat, AnalyticsError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "pdf" | "png" => Err(AnalyticsError::Unsupported(format!("export type '{raw}' is not implemented"))),
            _ => Err(AnalyticsError::invalid_request(format!("unknown export type '{raw}'"))),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Png => "png",
        }
    }
}

/// What is being exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataContext {
    Kpis,
    Chart(ChartName),
    Drilldown { chart: ChartName, data_point_id: String },
}

impl DataContext {
    /// `kpis`, `<chart>[_chart]` or `drilldown:<chart>:<data_point_id>`.
    pub fn parse(raw: &str) -> Result<DataContext, AnalyticsError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AnalyticsError::invalid_request("data_context is required"));
        }
        if raw == "kpis" {
            return Ok(DataContext::Kpis);
        }
        if let Some(rest) = raw.strip_prefix("drilldown:") {
            let (chart, id) = rest
                .split_once(':')
                .filter(|(_, id)| !id.is_empty())
                .ok_or_else(|| AnalyticsError::invalid_request("drilldown context must be drilldown:<chart>:<data_point_id>"))?;
            let chart = ChartName::parse(chart).ok_or_else(|| AnalyticsError::UnknownMetric(chart.to_string()))?;
            return Ok(DataContext::Drilldown {
                chart,
                data_point_id: id.to_string(),
            });
        }
        ChartName::parse(raw)
            .map(DataContext::Chart)
            .ok_or_else(|| AnalyticsError::UnknownMetric(raw.to_string()))
    }

    pub fn file_stem(&self) -> String {
        match self {
            DataContext::Kpis => "kpis".to_string(),
            DataContext::Chart(chart) => chart.as_str().to_string(),
            DataContext::Drilldown { chart, .. } => format!("{}_drilldown", chart.as_str()),
        }
    }
}

/// Tabular form shared by the renderers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn from_kpis(kpis: &[KpiResult]) -> Self {
        Self {
            headers: vec!["name".into(), "label".into(), "value".into(), "unit".into()],
            rows: kpis
                .iter()
                .map(|k| vec![k.name.as_str().into(), k.label.into(), k.value.to_string(), k.unit.clone()])
                .collect(),
        }
    }

    pub fn from_chart(series: &ChartSeries) -> Self {
        Self {
            headers: vec!["id".into(), "label".into(), "value".into()],
            rows: series
                .points
                .iter()
                .map(|p| vec![p.id.clone(), p.label.clone(), p.value.to_string()])
                .collect(),
        }
    }

    pub fn from_drilldown(drilldown: &Drilldown) -> Self {
        let mut table = Table {
            headers: ["kind", "id", "date", "amount", "product_category", "region", "lead_source", "owner_id", "converted"]
                .into_iter()
                .map(String::from)
                .collect(),
            rows: Vec::new(),
        };
        for row in &drilldown.rows {
            table.rows.push(match row {
                DetailRow::Sale(s) => vec![
                    "sale".into(),
                    s.id.to_string(),
                    s.closed_on.to_string(),
                    s.amount.to_string(),
                    s.product_category.clone(),
                    s.region.clone(),
                    String::new(),
                    s.sales_rep_id.to_string(),
                    String::new(),
                ],
                DetailRow::Lead(l) => vec![
                    "lead".into(),
                    l.id.to_string(),
                    l.created_on.to_string(),
                    l.budget.map(|b: Decimal| b.to_string()).unwrap_or_default(),
                    String::new(),
                    l.region.clone(),
                    l.lead_source.clone(),
                    l.owner_id.to_string(),
                    l.converted.to_string(),
                ],
            });
        }
        table
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_csv_line(&mut out, &self.headers);
        for row in &self.rows {
            push_csv_line(&mut out, row);
        }
        out
    }

    /// Array of objects keyed by header.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let obj: serde_json::Map<String, Value> = self
                        .headers
                        .iter()
                        .cloned()
                        .zip(row.iter().map(|c| json!(c)))
                        .collect();
                    Value::Object(obj)
                })
                .collect(),
        )
    }

    pub fn render(&self, format: ExportFormat) -> Result<Vec<u8>, AnalyticsError> {
        match format {
            ExportFormat::Csv => Ok(self.to_csv().into_bytes()),
            ExportFormat::Json => serde_json::to_vec_pretty(&self.to_json()).map_err(|e| AnalyticsError::Storage(e.into())),
            other => Err(AnalyticsError::Unsupported(format!("export type '{}' is not implemented", other.extension()))),
        }
    }
}

fn push_csv_line(out: &mut String, cells: &[String]) {
    let line: Vec<String> = cells.iter().map(|c| csv_escape(c)).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

/// RFC 4180 quoting.
pub fn csv_escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_registry() {
        assert_eq!(ExportFormat::parse("CSV").unwrap(), ExportFormat::Csv);
        assert!(matches!(ExportFormat::parse("pdf"), Err(AnalyticsError::Unsupported(_))));
        assert!(matches!(ExportFormat::parse("xlsx"), Err(AnalyticsError::InvalidRequest(_))));
    }

    #[test]
    fn data_contexts() {
        assert_eq!(DataContext::parse("kpis").unwrap(), DataContext::Kpis);
        assert_eq!(DataContext::parse("sales_by_region_chart").unwrap(), DataContext::Chart(ChartName::SalesByRegion));
        assert_eq!(
            DataContext::parse("drilldown:sales_over_time:2024-01").unwrap(),
            DataContext::Drilldown { chart: ChartName::SalesOverTime, data_point_id: "2024-01".into() }
        );
        assert!(matches!(DataContext::parse(""), Err(AnalyticsError::InvalidRequest(_))));
        assert!(matches!(DataContext::parse("drilldown:sales_over_time:"), Err(AnalyticsError::InvalidRequest(_))));
        assert!(matches!(DataContext::parse("funnel"), Err(AnalyticsError::UnknownMetric(_))));
    }

    #[test]
    fn csv_quotes_special_cells() {
        let table = Table {
            headers: vec!["label".into(), "value".into()],
            rows: vec![vec!["Hardware, Networking".into(), "10".into()], vec!["6\" screens".into(), "2".into()]],
        };
        assert_eq!(table.to_csv(), "label,value\r\n\"Hardware, Networking\",10\r\n\"6\"\" screens\",2\r\n");
        assert_eq!(table.to_json()[0]["label"], "Hardware, Networking");
    }
}
