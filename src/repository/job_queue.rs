// src/repository/job_queue.rs
//! Report job queue.
//!
//! Jobs only carry the report id; everything else is read from the report
//! row when the worker claims it. Claimed jobs are removed from the queue, so
//! a job is handed to at most one worker. The report's own
//! `pending -> generating` compare-and-set is the second guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::telemetry::metrics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportJob {
    pub report_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn push(&self, job: ReportJob) -> anyhow::Result<()>;

    /// Removes and returns up to `limit` jobs, oldest first.
    async fn claim(&self, limit: usize) -> anyhow::Result<Vec<ReportJob>>;

    async fn len(&self) -> anyhow::Result<usize>;
}

/// --------------------
/// In-memory FIFO
/// --------------------
pub struct InMemoryJobQueue {
    jobs: Arc<Mutex<VecDeque<ReportJob>>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn push(&self, job: ReportJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().await;
        jobs.push_back(job);
        metrics::incr("report_jobs_enqueued", &[]);
        metrics::queue_depth(1);
        Ok(())
    }

    async fn claim(&self, limit: usize) -> anyhow::Result<Vec<ReportJob>> {
        let mut jobs = self.jobs.lock().await;
        let n = limit.min(jobs.len());
        let claimed: Vec<ReportJob> = jobs.drain(..n).collect();
        metrics::queue_depth(-(claimed.len() as i64));
        Ok(claimed)
    }

    async fn len(&self) -> anyhow::Result<usize> {
        Ok(self.jobs.lock().await.len())
    }
}

/// --------------------
/// Postgres-backed queue (`report_jobs` table)
/// --------------------
#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use anyhow::Context;
    use sqlx::{PgPool, Row};

    pub struct PostgresJobQueue {
        pool: PgPool,
    }

    impl PostgresJobQueue {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl JobQueue for PostgresJobQueue {
        async fn push(&self, job: ReportJob) -> anyhow::Result<()> {
            sqlx::query("INSERT INTO report_jobs (report_id, enqueued_at) VALUES ($1, $2)")
                .bind(job.report_id)
                .bind(job.enqueued_at)
                .execute(&self.pool)
                .await
                .context("enqueue report job failed")?;
            metrics::incr("report_jobs_enqueued", &[]);
            Ok(())
        }

        async fn claim(&self, limit: usize) -> anyhow::Result<Vec<ReportJob>> {
            let rows = sqlx::query(
                "DELETE FROM report_jobs WHERE report_id IN ( \
                   SELECT report_id FROM report_jobs ORDER BY enqueued_at LIMIT $1 FOR UPDATE SKIP LOCKED \
                 ) RETURNING report_id, enqueued_at",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("claim report jobs failed")?;
            let mut jobs = rows
                .iter()
                .map(|r| {
                    Ok(ReportJob {
                        report_id: r.try_get("report_id")?,
                        enqueued_at: r.try_get("enqueued_at")?,
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            jobs.sort_by_key(|j| j.enqueued_at);
            Ok(jobs)
        }

        async fn len(&self) -> anyhow::Result<usize> {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM report_jobs")
                .fetch_one(&self.pool)
                .await
                .context("count report jobs failed")?;
            let n: i64 = row.try_get("n")?;
            Ok(n as usize)
        }
    }
}
