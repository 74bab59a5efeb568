// src/repository/prediction_store.rs
//! Predictive result persistence.
//!
//! At most one `active` result exists per (model_id, target context).
//! `supersede_and_insert` marks the current active row superseded and inserts
//! the new one as a single atomic step:
//! - in memory, under one mutex;
//! - in Postgres, in one transaction serialised per target by
//!   `pg_advisory_xact_lock`, backed by a partial unique index.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::model::prediction::{target_key, PredictionStatus, PredictiveResult};
use crate::telemetry::metrics;

#[async_trait]
pub trait PredictionStore: Send + Sync + 'static {
    /// Returns how many rows were superseded (0 or 1).
    async fn supersede_and_insert(&self, result: PredictiveResult) -> anyhow::Result<usize>;

    async fn active_for(&self, model_id: &str, target_context: &serde_json::Value) -> anyhow::Result<Option<PredictiveResult>>;

    async fn list_for_report(&self, report_id: Uuid) -> anyhow::Result<Vec<PredictiveResult>>;

    /// Active -> validated; false when the row is not active.
    async fn mark_validated(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Every row for a (model, target), newest first.
    async fn history(&self, model_id: &str, target_context: &serde_json::Value) -> anyhow::Result<Vec<PredictiveResult>>;
}

/// --------------------
/// In-memory implementation
/// --------------------
pub struct InMemoryPredictionStore {
    rows: Arc<Mutex<Vec<PredictiveResult>>>,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for InMemoryPredictionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn same_target(row: &PredictiveResult, model_id: &str, key: &str) -> bool {
    row.model_id == model_id && row.target_key() == key
}

#[async_trait]
impl PredictionStore for InMemoryPredictionStore {
    async fn supersede_and_insert(&self, result: PredictiveResult) -> anyhow::Result<usize> {
        let key = result.target_key();
        let mut rows = self.rows.lock().await;
        let mut superseded = 0;
        for row in rows
            .iter_mut()
            .filter(|r| r.status == PredictionStatus::Active && same_target(r, &result.model_id, &key))
        {
            row.status = PredictionStatus::Superseded;
            superseded += 1;
        }
        let mut result = result;
        result.status = PredictionStatus::Active;
        rows.push(result);
        metrics::incr("predictive_results_inserted", &[]);
        if superseded > 0 {
            metrics::add("predictive_results_superseded", superseded as u64, &[]);
        }
        Ok(superseded)
    }

    async fn active_for(&self, model_id: &str, target_context: &serde_json::Value) -> anyhow::Result<Option<PredictiveResult>> {
        let key = target_key(target_context);
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .find(|r| r.status == PredictionStatus::Active && same_target(r, model_id, &key))
            .cloned())
    }

    async fn list_for_report(&self, report_id: Uuid) -> anyhow::Result<Vec<PredictiveResult>> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().filter(|r| r.report_id == Some(report_id)).cloned().collect())
    }

    async fn mark_validated(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().await;
        match rows.iter_mut().find(|r| r.id == id && r.status == PredictionStatus::Active) {
            Some(row) => {
                row.status = PredictionStatus::Validated;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn history(&self, model_id: &str, target_context: &serde_json::Value) -> anyhow::Result<Vec<PredictiveResult>> {
        let key = target_key(target_context);
        let rows = self.rows.lock().await;
        let mut out: Vec<PredictiveResult> = rows.iter().filter(|r| same_target(r, model_id, &key)).cloned().collect();
        out.reverse();
        Ok(out)
    }
}

/// --------------------
/// Postgres implementation using sqlx
/// --------------------
#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use crate::domain::model::prediction::ResultType;
    use anyhow::Context;
    use sqlx::{postgres::PgRow, PgPool, Row};

    pub struct PostgresPredictionStore {
        pool: PgPool,
    }

    impl PostgresPredictionStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        fn row_to_result(row: &PgRow) -> anyhow::Result<PredictiveResult> {
            let result_type: String = row.try_get("result_type")?;
            let status: String = row.try_get("status")?;
            Ok(PredictiveResult {
                id: row.try_get("id")?,
                model_id: row.try_get("model_id")?,
                result_type: ResultType::parse(&result_type).with_context(|| format!("unknown result type '{result_type}'"))?,
                target_context: row.try_get("target_context")?,
                prediction: row.try_get("prediction")?,
                confidence: row.try_get("confidence")?,
                status: PredictionStatus::parse(&status).with_context(|| format!("unknown prediction status '{status}'"))?,
                report_id: row.try_get("report_id")?,
                created_at: row.try_get("created_at")?,
            })
        }
    }

    #[async_trait]
    impl PredictionStore for PostgresPredictionStore {
        async fn supersede_and_insert(&self, result: PredictiveResult) -> anyhow::Result<usize> {
            let key = result.target_key();
            let mut tx = self.pool.begin().await.context("begin tx failed")?;
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || ':' || $2))")
                .bind(&result.model_id)
                .bind(&key)
                .execute(&mut *tx)
                .await
                .context("advisory lock failed")?;
            let superseded = sqlx::query(
                "UPDATE predictive_results SET status = 'superseded' \
                 WHERE model_id = $1 AND target_key = $2 AND status = 'active'",
            )
            .bind(&result.model_id)
            .bind(&key)
            .execute(&mut *tx)
            .await
            .context("supersede failed")?
            .rows_affected() as usize;
            sqlx::query(
                "INSERT INTO predictive_results (id, model_id, result_type, target_context, target_key, prediction, \
                 confidence, status, report_id, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8, $9)",
            )
            .bind(result.id)
            .bind(&result.model_id)
            .bind(result.result_type.as_str())
            .bind(&result.target_context)
            .bind(&key)
            .bind(&result.prediction)
            .bind(result.confidence)
            .bind(result.report_id)
            .bind(result.created_at)
            .execute(&mut *tx)
            .await
            .context("insert predictive result failed")?;
            tx.commit().await.context("commit failed")?;
            metrics::incr("predictive_results_inserted", &[]);
            Ok(superseded)
        }

        async fn active_for(&self, model_id: &str, target_context: &serde_json::Value) -> anyhow::Result<Option<PredictiveResult>> {
            let row = sqlx::query("SELECT * FROM predictive_results WHERE model_id = $1 AND target_key = $2 AND status = 'active'")
                .bind(model_id)
                .bind(target_key(target_context))
                .fetch_optional(&self.pool)
                .await
                .context("active_for query failed")?;
            row.as_ref().map(Self::row_to_result).transpose()
        }

        async fn list_for_report(&self, report_id: Uuid) -> anyhow::Result<Vec<PredictiveResult>> {
            let rows = sqlx::query("SELECT * FROM predictive_results WHERE report_id = $1 ORDER BY created_at")
                .bind(report_id)
                .fetch_all(&self.pool)
                .await
                .context("list_for_report query failed")?;
            rows.iter().map(Self::row_to_result).collect()
        }

        async fn mark_validated(&self, id: Uuid) -> anyhow::Result<bool> {
            let res = sqlx::query("UPDATE predictive_results SET status = 'validated' WHERE id = $1 AND status = 'active'")
                .bind(id)
                .execute(&self.pool)
                .await
                .context("mark_validated failed")?;
            Ok(res.rows_affected() > 0)
        }

        async fn history(&self, model_id: &str, target_context: &serde_json::Value) -> anyhow::Result<Vec<PredictiveResult>> {
            let rows = sqlx::query("SELECT * FROM predictive_results WHERE model_id = $1 AND target_key = $2 ORDER BY created_at DESC")
                .bind(model_id)
                .bind(target_key(target_context))
                .fetch_all(&self.pool)
                .await
                .context("history query failed")?;
            rows.iter().map(Self::row_to_result).collect()
        }
    }
}
