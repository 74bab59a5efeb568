// src/scheduler/report_worker.rs
//! Report worker
//!
//! Responsibilities:
//! - Poll the job queue and hand each claimed job to a `ReportExecutor`.
//! - Bound the number of reports generated at once with a semaphore; only
//!   as many jobs as there are free permits are claimed per cycle.
//! - Wake up immediately when a job is enqueued (shared `Notify`).
//! - On shutdown, stop claiming and wait for in-flight reports to finish.
//!
//! Failures inside a report are recorded on the report row by the executor;
//! the worker only logs what escapes it, and never retries.

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use anyhow::Context;

use crate::repository::job_queue::{JobQueue, ReportJob};
use crate::telemetry::metrics;

/// Runs one report job to completion.
#[async_trait::async_trait]
pub trait ReportExecutor: Send + Sync + 'static {
    async fn execute(&self, report_id: Uuid) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ReportWorkerConfig {
    pub poll_interval: Duration,
    pub max_concurrency: usize,
    /// Upper bound on jobs claimed per cycle.
    pub claim_batch: usize,
}

impl Default for ReportWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_concurrency: 4,
            claim_batch: 16,
        }
    }
}

pub struct ReportWorkerHandle {
    wake: Arc<Notify>,
    shutdown_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ReportWorkerHandle {
    /// Requests an immediate polling cycle.
    pub fn trigger_manual(&self) {
        self.wake.notify_one();
    }

    /// Stops claiming jobs and waits for the running ones.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.join_handle.await.context("report worker join failed")?;
        Ok(())
    }
}

pub struct ReportWorker {
    queue: Arc<dyn JobQueue>,
    executor: Arc<dyn ReportExecutor>,
    wake: Arc<Notify>,
    config: ReportWorkerConfig,
}

impl ReportWorker {
    /// `wake` is the same `Notify` the enqueue side signals.
    pub fn new(queue: Arc<dyn JobQueue>, executor: Arc<dyn ReportExecutor>, wake: Arc<Notify>, config: ReportWorkerConfig) -> Self {
        Self {
            queue,
            executor,
            wake,
            config,
        }
    }

    pub fn start(self: Arc<Self>) -> ReportWorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let max = self.config.max_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(max));

        let worker = self.clone();
        let join_handle = tokio::spawn(async move {
            info!(
                poll_interval = ?worker.config.poll_interval,
                max_concurrency = max,
                "report worker started"
            );
            let mut ticker = time::interval(worker.config.poll_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = worker.run_once(Arc::clone(&semaphore)).await {
                            warn!(error = ?e, "report worker cycle failed");
                        }
                    },
                    _ = worker.wake.notified() => {
                        if let Err(e) = worker.run_once(Arc::clone(&semaphore)).await {
                            warn!(error = ?e, "report worker cycle failed");
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        info!("report worker shutdown requested");
                        break;
                    }
                }
            }

            // drain: every permit back means no report is still running
            match semaphore.acquire_many(max as u32).await {
                Ok(_) => info!("report worker stopped"),
                Err(e) => error!(error = ?e, "report worker semaphore closed during drain"),
            }
        });

        ReportWorkerHandle {
            wake: Arc::clone(&self.wake),
            shutdown_tx,
            join_handle,
        }
    }

    /// Claims as many jobs as there are free permits and spawns them.
    pub async fn run_once(self: &Arc<Self>, semaphore: Arc<Semaphore>) -> anyhow::Result<usize> {
        let free = semaphore.available_permits().min(self.config.claim_batch);
        if free == 0 {
            return Ok(0);
        }
        let jobs = self.queue.claim(free).await?;
        let claimed = jobs.len();
        for job in jobs {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    warn!(report_id = %job.report_id, "semaphore closed, dropping job");
                    continue;
                }
            };
            let worker = self.clone();
            tokio::spawn(async move {
                worker.process(job, permit).await;
            });
        }
        if claimed > 0 {
            // more may be waiting than this cycle could take
            self.wake.notify_one();
        }
        Ok(claimed)
    }

    async fn process(&self, job: ReportJob, _permit: OwnedSemaphorePermit) {
        let started = std::time::Instant::now();
        info!(report_id = %job.report_id, "report job picked up");
        if let Err(e) = self.executor.execute(job.report_id).await {
            error!(report_id = %job.report_id, error = ?e, "report job failed outside the pipeline");
        }
        metrics::record_ms("report_job_duration_ms", started.elapsed().as_millis() as f64, &[]);
    }
}
