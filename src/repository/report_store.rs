// src/repository/report_store.rs
//! Report configuration and generated report persistence.
//!
//! This module provides:
//! - `ReportStore` trait: configuration CRUD, report rows and the
//!   compare-and-set `transition` used by the worker.
//! - `InMemoryReportStore` for tests and local dev.
//! - `PostgresReportStore` (feature `postgres`).
//!
//! A report row only changes through `transition`, which checks the expected
//! current status and applies the move atomically (one lock in memory, one
//! `SELECT ... FOR UPDATE` transaction in Postgres).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::model::report::{GeneratedReport, ReportConfiguration, ReportStatus, ReportTransition};
use crate::telemetry::metrics;

#[async_trait]
pub trait ReportStore: Send + Sync + 'static {
    async fn insert_configuration(&self, config: ReportConfiguration) -> anyhow::Result<()>;

    async fn get_configuration(&self, id: Uuid) -> anyhow::Result<Option<ReportConfiguration>>;

    /// Newest first. `owner = None` lists every owner.
    async fn list_configurations(&self, owner: Option<Uuid>, include_inactive: bool) -> anyhow::Result<Vec<ReportConfiguration>>;

    /// Replaces a configuration; false when it does not exist.
    async fn update_configuration(&self, config: ReportConfiguration) -> anyhow::Result<bool>;

    async fn touch_configuration(&self, id: Uuid, generated_at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Hard delete; removes the configuration's generated reports too.
    async fn delete_configuration(&self, id: Uuid) -> anyhow::Result<bool>;

    async fn insert_report(&self, report: GeneratedReport) -> anyhow::Result<()>;

    async fn get_report(&self, id: Uuid) -> anyhow::Result<Option<GeneratedReport>>;

    /// Newest first, at most `limit` rows.
    async fn list_reports(&self, requested_by: Option<Uuid>, limit: usize) -> anyhow::Result<Vec<GeneratedReport>>;

    /// Applies `transition` only if the report is currently `expected`.
    /// `Ok(None)` when the report is missing or in another state.
    async fn transition(&self, id: Uuid, expected: ReportStatus, transition: ReportTransition) -> anyhow::Result<Option<GeneratedReport>>;
}

/// --------------------
/// In-memory implementation
/// --------------------
#[derive(Default)]
struct ReportTables {
    configurations: HashMap<Uuid, ReportConfiguration>,
    reports: HashMap<Uuid, GeneratedReport>,
}

pub struct InMemoryReportStore {
    tables: Arc<RwLock<ReportTables>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(ReportTables::default())),
        }
    }
}

impl Default for InMemoryReportStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn insert_configuration(&self, config: ReportConfiguration) -> anyhow::Result<()> {
        let mut t = self.tables.write().await;
        if t.configurations.contains_key(&config.id) {
            anyhow::bail!("report configuration {} already exists", config.id);
        }
        t.configurations.insert(config.id, config);
        metrics::incr("report_store_inserts", &[("table", "report_configurations")]);
        Ok(())
    }

    async fn get_configuration(&self, id: Uuid) -> anyhow::Result<Option<ReportConfiguration>> {
        Ok(self.tables.read().await.configurations.get(&id).cloned())
    }

    async fn list_configurations(&self, owner: Option<Uuid>, include_inactive: bool) -> anyhow::Result<Vec<ReportConfiguration>> {
        let t = self.tables.read().await;
        let mut out: Vec<ReportConfiguration> = t
            .configurations
            .values()
            .filter(|c| owner.map_or(true, |o| c.owner_id == o))
            .filter(|c| include_inactive || c.active)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn update_configuration(&self, config: ReportConfiguration) -> anyhow::Result<bool> {
        let mut t = self.tables.write().await;
        match t.configurations.get_mut(&config.id) {
            Some(existing) => {
                *existing = config;
                metrics::incr("report_store_updates", &[("table", "report_configurations")]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_configuration(&self, id: Uuid, generated_at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut t = self.tables.write().await;
        if let Some(config) = t.configurations.get_mut(&id) {
            config.last_generated_at = Some(generated_at);
        }
        Ok(())
    }

    async fn delete_configuration(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut t = self.tables.write().await;
        if t.configurations.remove(&id).is_none() {
            return Ok(false);
        }
        t.reports.retain(|_, r| r.configuration_id != id);
        metrics::incr("report_store_deletes", &[("table", "report_configurations")]);
        Ok(true)
    }

    async fn insert_report(&self, report: GeneratedReport) -> anyhow::Result<()> {
        let mut t = self.tables.write().await;
        if !t.configurations.contains_key(&report.configuration_id) {
            anyhow::bail!("report {} references unknown configuration {}", report.id, report.configuration_id);
        }
        t.reports.insert(report.id, report);
        metrics::incr("report_store_inserts", &[("table", "generated_reports")]);
        Ok(())
    }

    async fn get_report(&self, id: Uuid) -> anyhow::Result<Option<GeneratedReport>> {
        Ok(self.tables.read().await.reports.get(&id).cloned())
    }

    async fn list_reports(&self, requested_by: Option<Uuid>, limit: usize) -> anyhow::Result<Vec<GeneratedReport>> {
        let t = self.tables.read().await;
        let mut out: Vec<GeneratedReport> = t
            .reports
            .values()
            .filter(|r| requested_by.map_or(true, |u| r.requested_by == u))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        out.truncate(limit);
        Ok(out)
    }

    async fn transition(&self, id: Uuid, expected: ReportStatus, transition: ReportTransition) -> anyhow::Result<Option<GeneratedReport>> {
        let mut t = self.tables.write().await;
        let Some(report) = t.reports.get_mut(&id) else {
            return Ok(None);
        };
        if report.status != expected {
            return Ok(None);
        }
        let to = transition.target();
        report.apply(transition)?;
        metrics::incr("report_transitions", &[("to", to.as_str())]);
        Ok(Some(report.clone()))
    }
}

/// --------------------
/// Postgres implementation using sqlx
/// --------------------
#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use crate::domain::model::principal::PrincipalScope;
    use crate::domain::model::report::{ReportFrequency, ReportType, StatusChange};
    use anyhow::Context;
    use serde_json::Value;
    use sqlx::{postgres::PgRow, PgPool, Row};

    pub struct PostgresReportStore {
        pool: PgPool,
    }

    const REPORT_COLUMNS: &str = "id, configuration_id, requested_by, scope, status, status_history, created_at, started_at, \
        finished_at, generated_at, summary_text, insights, report_content, raw_data_snapshot, download_path, error_message";

    impl PostgresReportStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        fn row_to_config(row: &PgRow) -> anyhow::Result<ReportConfiguration> {
            let report_type: String = row.try_get("report_type")?;
            let frequency: String = row.try_get("frequency")?;
            Ok(ReportConfiguration {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                report_type: ReportType::parse(&report_type).with_context(|| format!("unknown report type '{report_type}'"))?,
                parameters: row.try_get("parameters")?,
                owner_id: row.try_get("owner_id")?,
                frequency: ReportFrequency::parse(&frequency).with_context(|| format!("unknown frequency '{frequency}'"))?,
                active: row.try_get("active")?,
                last_generated_at: row.try_get("last_generated_at")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        }

        fn row_to_report(row: &PgRow) -> anyhow::Result<GeneratedReport> {
            let status: String = row.try_get("status")?;
            let scope: Value = row.try_get("scope")?;
            let history: Value = row.try_get("status_history")?;
            Ok(GeneratedReport {
                id: row.try_get("id")?,
                configuration_id: row.try_get("configuration_id")?,
                requested_by: row.try_get("requested_by")?,
                scope: serde_json::from_value::<PrincipalScope>(scope).context("invalid scope column")?,
                status: ReportStatus::parse(&status).with_context(|| format!("unknown report status '{status}'"))?,
                status_history: serde_json::from_value::<Vec<StatusChange>>(history).context("invalid status_history column")?,
                created_at: row.try_get("created_at")?,
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
                generated_at: row.try_get("generated_at")?,
                summary_text: row.try_get("summary_text")?,
                insights: row.try_get("insights")?,
                report_content: row.try_get("report_content")?,
                raw_data_snapshot: row.try_get("raw_data_snapshot")?,
                download_path: row.try_get("download_path")?,
                error_message: row.try_get("error_message")?,
            })
        }
    }

    #[async_trait]
    impl ReportStore for PostgresReportStore {
        async fn insert_configuration(&self, c: ReportConfiguration) -> anyhow::Result<()> {
            sqlx::query(
                "INSERT INTO report_configurations (id, name, description, report_type, parameters, owner_id, frequency, active, \
                 last_generated_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(c.id)
            .bind(&c.name)
            .bind(&c.description)
            .bind(c.report_type.display_name())
            .bind(&c.parameters)
            .bind(c.owner_id)
            .bind(c.frequency.as_str())
            .bind(c.active)
            .bind(c.last_generated_at)
            .bind(c.created_at)
            .bind(c.updated_at)
            .execute(&self.pool)
            .await
            .context("insert report configuration failed")?;
            metrics::incr("report_store_inserts", &[("table", "report_configurations")]);
            Ok(())
        }

        async fn get_configuration(&self, id: Uuid) -> anyhow::Result<Option<ReportConfiguration>> {
            let row = sqlx::query("SELECT * FROM report_configurations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("get report configuration failed")?;
            row.as_ref().map(Self::row_to_config).transpose()
        }

        async fn list_configurations(&self, owner: Option<Uuid>, include_inactive: bool) -> anyhow::Result<Vec<ReportConfiguration>> {
            let rows = sqlx::query(
                "SELECT * FROM report_configurations WHERE ($1::uuid IS NULL OR owner_id = $1) AND ($2 OR active) \
                 ORDER BY created_at DESC, id",
            )
            .bind(owner)
            .bind(include_inactive)
            .fetch_all(&self.pool)
            .await
            .context("list report configurations failed")?;
            rows.iter().map(Self::row_to_config).collect()
        }

        async fn update_configuration(&self, c: ReportConfiguration) -> anyhow::Result<bool> {
            let res = sqlx::query(
                "UPDATE report_configurations SET name = $2, description = $3, report_type = $4, parameters = $5, \
                 frequency = $6, active = $7, updated_at = $8 WHERE id = $1",
            )
            .bind(c.id)
            .bind(&c.name)
            .bind(&c.description)
            .bind(c.report_type.display_name())
            .bind(&c.parameters)
            .bind(c.frequency.as_str())
            .bind(c.active)
            .bind(c.updated_at)
            .execute(&self.pool)
            .await
            .context("update report configuration failed")?;
            metrics::incr("report_store_updates", &[("table", "report_configurations")]);
            Ok(res.rows_affected() > 0)
        }

        async fn touch_configuration(&self, id: Uuid, generated_at: DateTime<Utc>) -> anyhow::Result<()> {
            sqlx::query("UPDATE report_configurations SET last_generated_at = $2 WHERE id = $1")
                .bind(id)
                .bind(generated_at)
                .execute(&self.pool)
                .await
                .context("touch report configuration failed")?;
            Ok(())
        }

        async fn delete_configuration(&self, id: Uuid) -> anyhow::Result<bool> {
            // generated_reports rows go with it (ON DELETE CASCADE)
            let res = sqlx::query("DELETE FROM report_configurations WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .context("delete report configuration failed")?;
            metrics::incr("report_store_deletes", &[("table", "report_configurations")]);
            Ok(res.rows_affected() > 0)
        }

        async fn insert_report(&self, r: GeneratedReport) -> anyhow::Result<()> {
            sqlx::query(&format!(
                "INSERT INTO generated_reports ({REPORT_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
            ))
            .bind(r.id)
            .bind(r.configuration_id)
            .bind(r.requested_by)
            .bind(serde_json::to_value(r.scope)?)
            .bind(r.status.as_str())
            .bind(serde_json::to_value(&r.status_history)?)
            .bind(r.created_at)
            .bind(r.started_at)
            .bind(r.finished_at)
            .bind(r.generated_at)
            .bind(&r.summary_text)
            .bind(&r.insights)
            .bind(&r.report_content)
            .bind(&r.raw_data_snapshot)
            .bind(&r.download_path)
            .bind(&r.error_message)
            .execute(&self.pool)
            .await
            .context("insert generated report failed")?;
            metrics::incr("report_store_inserts", &[("table", "generated_reports")]);
            Ok(())
        }

        async fn get_report(&self, id: Uuid) -> anyhow::Result<Option<GeneratedReport>> {
            let row = sqlx::query(&format!("SELECT {REPORT_COLUMNS} FROM generated_reports WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("get generated report failed")?;
            row.as_ref().map(Self::row_to_report).transpose()
        }

        async fn list_reports(&self, requested_by: Option<Uuid>, limit: usize) -> anyhow::Result<Vec<GeneratedReport>> {
            let rows = sqlx::query(&format!(
                "SELECT {REPORT_COLUMNS} FROM generated_reports WHERE ($1::uuid IS NULL OR requested_by = $1) \
                 ORDER BY created_at DESC, id LIMIT $2"
            ))
            .bind(requested_by)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("list generated reports failed")?;
            rows.iter().map(Self::row_to_report).collect()
        }

        async fn transition(&self, id: Uuid, expected: ReportStatus, transition: ReportTransition) -> anyhow::Result<Option<GeneratedReport>> {
            let mut tx = self.pool.begin().await.context("begin tx failed")?;
            let row = sqlx::query(&format!("SELECT {REPORT_COLUMNS} FROM generated_reports WHERE id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .context("lock generated report failed")?;
            let Some(row) = row else {
                return Ok(None);
            };
            let mut report = Self::row_to_report(&row)?;
            if report.status != expected {
                return Ok(None);
            }
            let to = transition.target();
            report.apply(transition)?;

            sqlx::query(
                "UPDATE generated_reports SET status = $2, status_history = $3, started_at = $4, finished_at = $5, \
                 generated_at = $6, summary_text = $7, insights = $8, report_content = $9, raw_data_snapshot = $10, \
                 download_path = $11, error_message = $12 WHERE id = $1",
            )
            .bind(report.id)
            .bind(report.status.as_str())
            .bind(serde_json::to_value(&report.status_history)?)
            .bind(report.started_at)
            .bind(report.finished_at)
            .bind(report.generated_at)
            .bind(&report.summary_text)
            .bind(&report.insights)
            .bind(&report.report_content)
            .bind(&report.raw_data_snapshot)
            .bind(&report.download_path)
            .bind(&report.error_message)
            .execute(&mut *tx)
            .await
            .context("update generated report failed")?;
            tx.commit().await.context("commit failed")?;
            metrics::incr("report_transitions", &[("to", to.as_str())]);
            Ok(Some(report))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::principal::PrincipalScope;
    use crate::domain::model::report::{ReportFrequency, ReportType};
    use serde_json::json;

    fn config(owner: Uuid) -> ReportConfiguration {
        let now = Utc::now();
        ReportConfiguration {
            id: Uuid::new_v4(),
            name: "Monthly summary".into(),
            description: None,
            report_type: ReportType::SalesSummary,
            parameters: json!({"date_range": "last_30_days"}),
            owner_id: owner,
            frequency: ReportFrequency::OnDemand,
            active: true,
            last_generated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryReportStore::new();
        let owner = Uuid::new_v4();
        let cfg = config(owner);
        store.insert_configuration(cfg.clone()).await.unwrap();
        let report = GeneratedReport::pending(cfg.id, owner, PrincipalScope::All, Utc::now());
        let id = report.id;
        store.insert_report(report).await.unwrap();

        let started = store
            .transition(id, ReportStatus::Pending, ReportTransition::Start { at: Utc::now() })
            .await
            .unwrap();
        assert_eq!(started.map(|r| r.status), Some(ReportStatus::Generating));

        // a second claim of the same pending row loses
        let again = store
            .transition(id, ReportStatus::Pending, ReportTransition::Start { at: Utc::now() })
            .await
            .unwrap();
        assert!(again.is_none());

        // expected status matches but the move itself is illegal
        let illegal = store
            .transition(id, ReportStatus::Generating, ReportTransition::Cancel { at: Utc::now() })
            .await;
        assert!(illegal.is_err());
    }

    #[tokio::test]
    async fn deleting_configuration_cascades() {
        let store = InMemoryReportStore::new();
        let owner = Uuid::new_v4();
        let cfg = config(owner);
        store.insert_configuration(cfg.clone()).await.unwrap();
        store
            .insert_report(GeneratedReport::pending(cfg.id, owner, PrincipalScope::All, Utc::now()))
            .await
            .unwrap();
        assert_eq!(store.list_reports(None, 10).await.unwrap().len(), 1);

        assert!(store.delete_configuration(cfg.id).await.unwrap());
        assert!(store.list_reports(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn orphan_report_is_rejected() {
        let store = InMemoryReportStore::new();
        let orphan = GeneratedReport::pending(Uuid::new_v4(), Uuid::new_v4(), PrincipalScope::All, Utc::now());
        assert!(store.insert_report(orphan).await.is_err());
    }
}
