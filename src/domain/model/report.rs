// src/domain/model/report.rs
//! Report templates, generated report instances and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::analytics::{ChartName, KpiName};
use super::principal::PrincipalScope;

/// Closed registry of report types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportType {
    #[serde(rename = "Sales Summary")]
    SalesSummary,
    #[serde(rename = "Sales Performance")]
    SalesPerformance,
    #[serde(rename = "Lead Conversion")]
    LeadConversion,
    #[serde(rename = "AI Forecast")]
    AiForecast,
}

impl ReportType {
    pub const ALL: [ReportType; 4] = [
        ReportType::SalesSummary,
        ReportType::SalesPerformance,
        ReportType::LeadConversion,
        ReportType::AiForecast,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ReportType::SalesSummary => "Sales Summary",
            ReportType::SalesPerformance => "Sales Performance",
            ReportType::LeadConversion => "Lead Conversion",
            ReportType::AiForecast => "AI Forecast",
        }
    }

    /// Accepts the display name or its snake_case form.
    pub fn parse(raw: &str) -> Option<ReportType> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|t| {
            t.display_name().eq_ignore_ascii_case(raw)
                || t.display_name().to_lowercase().replace(' ', "_") == raw.to_lowercase()
        })
    }

    pub fn kpis(&self) -> &'static [KpiName] {
        match self {
            ReportType::SalesSummary => &[
                KpiName::TotalRevenue,
                KpiName::DealsClosed,
                KpiName::AverageDealSize,
                KpiName::NewLeads,
                KpiName::ConversionRate,
            ],
            ReportType::SalesPerformance => &[
                KpiName::TotalRevenue,
                KpiName::DealsClosed,
                KpiName::AverageDealSize,
                KpiName::TasksCompleted,
                KpiName::ActivitiesLogged,
            ],
            ReportType::LeadConversion => &[KpiName::NewLeads, KpiName::ConversionRate, KpiName::ActivitiesLogged],
            ReportType::AiForecast => &[KpiName::TotalRevenue, KpiName::DealsClosed],
        }
    }

    pub fn charts(&self) -> &'static [ChartName] {
        match self {
            ReportType::SalesSummary => &[ChartName::SalesOverTime, ChartName::SalesByProduct, ChartName::SalesByRegion],
            ReportType::SalesPerformance => &[ChartName::SalesByRep, ChartName::SalesByRegion],
            ReportType::LeadConversion => &[ChartName::LeadsBySource, ChartName::ConversionRates],
            ReportType::AiForecast => &[ChartName::SalesOverTime],
        }
    }

    pub fn always_forecasts(&self) -> bool {
        matches!(self, ReportType::AiForecast)
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFrequency {
    #[default]
    OnDemand,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl ReportFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFrequency::OnDemand => "on-demand",
            ReportFrequency::Daily => "daily",
            ReportFrequency::Weekly => "weekly",
            ReportFrequency::Monthly => "monthly",
            ReportFrequency::Quarterly => "quarterly",
        }
    }

    pub fn parse(raw: &str) -> Option<ReportFrequency> {
        [
            ReportFrequency::OnDemand,
            ReportFrequency::Daily,
            ReportFrequency::Weekly,
            ReportFrequency::Monthly,
            ReportFrequency::Quarterly,
        ]
        .into_iter()
        .find(|f| f.as_str() == raw.trim())
    }
}

/// Persisted report template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfiguration {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub report_type: ReportType,
    pub parameters: Value,
    pub owner_id: Uuid,
    pub frequency: ReportFrequency,
    pub active: bool,
    pub last_generated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Generating => "generating",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<ReportStatus> {
        [ReportStatus::Pending, ReportStatus::Generating, ReportStatus::Completed, ReportStatus::Failed]
            .into_iter()
            .find(|s| s.as_str() == raw)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Completed | ReportStatus::Failed)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: ReportStatus,
    pub at: DateTime<Utc>,
}

/// Everything a successful generation writes back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportOutput {
    pub summary_text: String,
    pub insights: Value,
    pub report_content: Value,
    pub raw_data_snapshot: Value,
    pub download_path: Option<String>,
}

/// The only ways a generated report may change.
#[derive(Debug, Clone)]
pub enum ReportTransition {
    Start { at: DateTime<Utc> },
    Complete { at: DateTime<Utc>, output: ReportOutput },
    Fail { at: DateTime<Utc>, message: String },
    Cancel { at: DateTime<Utc> },
    /// Pending row whose job never reached the queue.
    Abandon { at: DateTime<Utc>, message: String },
}

impl ReportTransition {
    pub fn target(&self) -> ReportStatus {
        match self {
            ReportTransition::Start { .. } => ReportStatus::Generating,
            ReportTransition::Complete { .. } => ReportStatus::Completed,
            ReportTransition::Fail { .. } | ReportTransition::Cancel { .. } | ReportTransition::Abandon { .. } => {
                ReportStatus::Failed
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("report {report_id}: transition {from} -> {to} is not allowed")]
pub struct InvalidTransition {
    pub report_id: Uuid,
    pub from: ReportStatus,
    pub to: ReportStatus,
}

pub const CANCELLED_REASON: &str = "cancelled";

/// One execution of a report template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedReport {
    pub id: Uuid,
    pub configuration_id: Uuid,
    pub requested_by: Uuid,
    pub scope: PrincipalScope,
    pub status: ReportStatus,
    pub status_history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub generated_at: Option<DateTime<Utc>>,
    pub summary_text: Option<String>,
    pub insights: Option<Value>,
    pub report_content: Option<Value>,
    pub raw_data_snapshot: Option<Value>,
    pub download_path: Option<String>,
    pub error_message: Option<String>,
}

impl GeneratedReport {
    pub fn pending(configuration_id: Uuid, requested_by: Uuid, scope: PrincipalScope, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            configuration_id,
            requested_by,
            scope,
            status: ReportStatus::Pending,
            status_history: vec![StatusChange { status: ReportStatus::Pending, at: now }],
            created_at: now,
            started_at: None,
            finished_at: None,
            generated_at: None,
            summary_text: None,
            insights: None,
            report_content: None,
            raw_data_snapshot: None,
            download_path: None,
            error_message: None,
        }
    }

    /// Applies a transition in place. Allowed moves are
    /// `pending -> generating`, `generating -> completed|failed` and the
    /// cancellation or abandonment `pending -> failed`.
    pub fn apply(&mut self, transition: ReportTransition) -> Result<(), InvalidTransition> {
        let to = transition.target();
        let allowed = matches!(
            (&self.status, &transition),
            (ReportStatus::Pending, ReportTransition::Start { .. })
                | (ReportStatus::Pending, ReportTransition::Cancel { .. })
                | (ReportStatus::Pending, ReportTransition::Abandon { .. })
                | (ReportStatus::Generating, ReportTransition::Complete { .. })
                | (ReportStatus::Generating, ReportTransition::Fail { .. })
        );
        if !allowed {
            return Err(InvalidTransition { report_id: self.id, from: self.status, to });
        }

        let at = match transition {
            ReportTransition::Start { at } => {
                self.started_at = Some(at);
                at
            }
            ReportTransition::Complete { at, output } => {
                self.finished_at = Some(at);
                self.generated_at = Some(at);
                self.summary_text = Some(output.summary_text);
                self.insights = Some(output.insights);
                self.report_content = Some(output.report_content);
                self.raw_data_snapshot = Some(output.raw_data_snapshot);
                self.download_path = output.download_path;
                self.error_message = None;
                at
            }
            ReportTransition::Fail { at, message } | ReportTransition::Abandon { at, message } => {
                self.finished_at = Some(at);
                self.error_message = Some(message);
                at
            }
            ReportTransition::Cancel { at } => {
                self.finished_at = Some(at);
                self.error_message = Some(CANCELLED_REASON.to_string());
                at
            }
        };
        self.status = to;
        self.status_history.push(StatusChange { status: to, at });
        Ok(())
    }

    pub fn visited(&self) -> Vec<ReportStatus> {
        self.status_history.iter().map(|c| c.status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> GeneratedReport {
        GeneratedReport::pending(Uuid::new_v4(), Uuid::new_v4(), PrincipalScope::All, Utc::now())
    }

    #[test]
    fn lifecycle_visits_each_state_once() {
        let mut r = report();
        r.apply(ReportTransition::Start { at: Utc::now() }).unwrap();
        r.apply(ReportTransition::Complete { at: Utc::now(), output: ReportOutput::default() }).unwrap();
        assert_eq!(r.visited(), vec![ReportStatus::Pending, ReportStatus::Generating, ReportStatus::Completed]);
        assert!(r.error_message.is_none());

        let err = r.apply(ReportTransition::Fail { at: Utc::now(), message: "late".into() }).unwrap_err();
        assert_eq!(err.from, ReportStatus::Completed);
        assert_eq!(r.status, ReportStatus::Completed);
    }

    #[test]
    fn cannot_skip_generating() {
        let mut r = report();
        assert!(r.apply(ReportTransition::Complete { at: Utc::now(), output: ReportOutput::default() }).is_err());
        assert!(r.apply(ReportTransition::Fail { at: Utc::now(), message: "x".into() }).is_err());
        assert_eq!(r.status, ReportStatus::Pending);
    }

    #[test]
    fn cancel_only_from_pending() {
        let mut r = report();
        r.apply(ReportTransition::Cancel { at: Utc::now() }).unwrap();
        assert_eq!(r.status, ReportStatus::Failed);
        assert_eq!(r.error_message.as_deref(), Some(CANCELLED_REASON));

        let mut running = report();
        running.apply(ReportTransition::Start { at: Utc::now() }).unwrap();
        assert!(running.apply(ReportTransition::Cancel { at: Utc::now() }).is_err());
    }

    #[test]
    fn abandon_closes_a_pending_row_with_its_reason() {
        let mut r = report();
        r.apply(ReportTransition::Abandon { at: Utc::now(), message: "queue down".into() }).unwrap();
        assert_eq!(r.visited(), vec![ReportStatus::Pending, ReportStatus::Failed]);
        assert_eq!(r.error_message.as_deref(), Some("queue down"));

        let mut running = report();
        running.apply(ReportTransition::Start { at: Utc::now() }).unwrap();
        assert!(running.apply(ReportTransition::Abandon { at: Utc::now(), message: "x".into() }).is_err());
    }

    #[test]
    fn report_type_parsing() {
        assert_eq!(ReportType::parse("Sales Summary"), Some(ReportType::SalesSummary));
        assert_eq!(ReportType::parse("ai_forecast"), Some(ReportType::AiForecast));
        assert_eq!(ReportType::parse("Quarterly Review"), None);
    }
}
