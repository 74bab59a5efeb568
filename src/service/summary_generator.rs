// src/service/summary_generator.rs
//! Narrative summaries for generated reports.
//!
//! The prompt is rendered only from aggregated numbers and registry labels.
//! Report names, descriptions and any other free text supplied by users
//! never reach it.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt::Write as _;

use crate::domain::error::AnalyticsError;
use crate::domain::model::analytics::{ChartSeries, KpiResult};
use crate::domain::model::report::ReportType;
use crate::service::predictive_model::ModelOutput;

/// Structured input of a summary.
#[derive(Debug, Clone)]
pub struct SummaryPrompt {
    pub report_type: ReportType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub kpis: Vec<KpiResult>,
    pub charts: Vec<ChartSeries>,
    pub forecast: Option<ModelOutput>,
    pub anomalies: Option<ModelOutput>,
}

impl SummaryPrompt {
    pub fn period(&self) -> String {
        format!("{} to {}", self.start_date, self.end_date)
    }

    /// Deterministic plain-text rendering used as the LLM user message.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Report type: {}", self.report_type.display_name());
        let _ = writeln!(out, "Period: {}", self.period());
        let _ = writeln!(out, "KPIs:");
        for kpi in &self.kpis {
            let _ = writeln!(out, "- {}: {} {}", kpi.label, kpi.value, kpi.unit);
        }
        for chart in &self.charts {
            let _ = writeln!(out, "{} ({}):", chart.title, chart.unit);
            for point in chart.points.iter().take(12) {
                let _ = writeln!(out, "- {}: {}", point.label, point.value);
            }
        }
        if let Some(forecast) = &self.forecast {
            let _ = writeln!(out, "Forecast ({}, confidence {:.2}):", forecast.model.as_str(), forecast.confidence);
            for p in &forecast.points {
                let _ = writeln!(out, "- {}: {:.2}", p.date, p.value);
            }
        }
        if let Some(anomalies) = &self.anomalies {
            let flagged: Vec<String> = anomalies
                .points
                .iter()
                .filter(|p| p.flagged)
                .map(|p| format!("{} (z={:.2})", p.date, p.value))
                .collect();
            let _ = writeln!(
                out,
                "Anomalies: {}",
                if flagged.is_empty() { "none".to_string() } else { flagged.join(", ") }
            );
        }
        out
    }
}

#[async_trait]
pub trait SummaryGenerator: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn summarize(&self, prompt: &SummaryPrompt) -> Result<String, AnalyticsError>;
}

/// Offline summariser used when no LLM is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateSummaryGenerator;

#[async_trait]
impl SummaryGenerator for TemplateSummaryGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn summarize(&self, prompt: &SummaryPrompt) -> Result<String, AnalyticsError> {
        let mut sentences = vec![format!("{} for {}.", prompt.report_type.display_name(), prompt.period())];

        if !prompt.kpis.is_empty() {
            let figures: Vec<String> = prompt
                .kpis
                .iter()
                .map(|k| format!("{} {} {}", k.label.to_lowercase(), k.value.normalize(), k.unit))
                .collect();
            sentences.push(format!("Key figures: {}.", figures.join("; ")));
        }

        for chart in &prompt.charts {
            let top = chart
                .points
                .iter()
                .filter(|p| p.value > Decimal::ZERO)
                .max_by(|a, b| a.value.cmp(&b.value));
            if let Some(top) = top {
                sentences.push(format!("{}: highest is {} at {}.", chart.title, top.label, top.value.normalize()));
            }
        }

        if let Some(forecast) = &prompt.forecast {
            if let (Some(first), Some(last)) = (forecast.points.first(), forecast.points.last()) {
                sentences.push(format!(
                    "Forecast for {} through {}: {:.2} to {:.2} (confidence {:.0}%).",
                    first.date,
                    last.date,
                    first.value,
                    last.value,
                    forecast.confidence * 100.0
                ));
            }
        }

        if let Some(anomalies) = &prompt.anomalies {
            let flagged = anomalies.points.iter().filter(|p| p.flagged).count();
            sentences.push(match flagged {
                0 => "No anomalous periods detected.".to_string(),
                1 => "1 anomalous period detected.".to_string(),
                n => format!("{n} anomalous periods detected."),
            });
        }

        Ok(sentences.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::analytics::KpiName;
    use crate::domain::model::filter::{DatePreset, FilterSpec};
    use rust_decimal_macros::dec;

    fn prompt() -> SummaryPrompt {
        let start = NaiveDate::from_ymd_opt(2024, 4, 20).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 5, 20).unwrap();
        let filter = FilterSpec::new(start, end, DatePreset::Last30Days).unwrap();
        SummaryPrompt {
            report_type: ReportType::SalesSummary,
            start_date: start,
            end_date: end,
            kpis: vec![KpiResult {
                name: KpiName::TotalRevenue,
                label: KpiName::TotalRevenue.label(),
                value: dec!(1250.50),
                unit: "USD".into(),
                filter,
            }],
            charts: vec![],
            forecast: None,
            anomalies: None,
        }
    }

    #[tokio::test]
    async fn template_summary_mentions_figures() {
        let text = TemplateSummaryGenerator.summarize(&prompt()).await.unwrap();
        assert!(text.starts_with("Sales Summary for 2024-04-20 to 2024-05-20."));
        assert!(text.contains("total revenue 1250.5 USD"));
    }

    #[test]
    fn rendered_prompt_is_deterministic() {
        let p = prompt();
        assert_eq!(p.render(), p.render());
        assert!(p.render().contains("- Total revenue: 1250.50 USD"));
    }
}
