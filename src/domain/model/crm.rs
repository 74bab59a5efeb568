// src/domain/model/crm.rs
//! CRM rows read by the aggregation layer.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A closed deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: Uuid,
    pub amount: Decimal,
    pub closed_on: NaiveDate,
    pub product_category: String,
    pub region: String,
    pub sales_rep_id: Uuid,
    pub lead_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Proposal => "proposal",
            LeadStatus::Negotiation => "negotiation",
            LeadStatus::Won => "won",
            LeadStatus::Lost => "lost",
        }
    }

    pub fn parse(raw: &str) -> Option<LeadStatus> {
        [
            LeadStatus::New,
            LeadStatus::Contacted,
            LeadStatus::Qualified,
            LeadStatus::Proposal,
            LeadStatus::Negotiation,
            LeadStatus::Won,
            LeadStatus::Lost,
        ]
        .into_iter()
        .find(|s| s.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub company: Option<String>,
    pub owner_id: Uuid,
    pub lead_source: String,
    pub region: String,
    pub status: LeadStatus,
    pub converted: bool,
    pub converted_on: Option<NaiveDate>,
    pub budget: Option<Decimal>,
    pub created_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<TaskStatus> {
        [TaskStatus::Open, TaskStatus::InProgress, TaskStatus::Completed, TaskStatus::Cancelled]
            .into_iter()
            .find(|s| s.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub lead_id: Option<Uuid>,
    pub assigned_to: Uuid,
    pub title: String,
    pub due_on: NaiveDate,
    pub status: TaskStatus,
    pub completed_on: Option<NaiveDate>,
}

impl Task {
    /// Date the task is bucketed under: completion when known, due date otherwise.
    pub fn reporting_date(&self) -> NaiveDate {
        self.completed_on.unwrap_or(self.due_on)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Call,
    Email,
    Meeting,
    Note,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Call => "call",
            ActivityKind::Email => "email",
            ActivityKind::Meeting => "meeting",
            ActivityKind::Note => "note",
        }
    }

    pub fn parse(raw: &str) -> Option<ActivityKind> {
        [ActivityKind::Call, ActivityKind::Email, ActivityKind::Meeting, ActivityKind::Note]
            .into_iter()
            .find(|k| k.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub lead_id: Option<Uuid>,
    pub user_id: Uuid,
    pub kind: ActivityKind,
    pub description: String,
    pub occurred_on: NaiveDate,
}

/// Categorical dimensions with a lookup table of permitted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    ProductCategory,
    Region,
    LeadSource,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::ProductCategory, Dimension::Region, Dimension::LeadSource];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::ProductCategory => "product_category",
            Dimension::Region => "region",
            Dimension::LeadSource => "lead_source",
        }
    }

    pub fn parse(raw: &str) -> Option<Dimension> {
        Self::ALL.into_iter().find(|d| d.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValue {
    pub dimension: Dimension,
    pub value: String,
    pub active: bool,
}
