//! Job store interface: lists due jobs, rewrites `next_run_at`, and resolves
//! a master's chain.

use crate::common::entity_ids::JobId;
use crate::common::errors::SchedulerError;
use crate::domains::jobs::models::job::Job;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enabled jobs (on an enabled OLT) whose `next_run_at <= now`. Chain
    /// nodes (`parent_job_id.is_some()`) are excluded — they are driven by
    /// the Chain Coordinator, not picked up directly by the tick.
    async fn list_enabled_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, SchedulerError>;

    async fn update_next_run_at(
        &self,
        job_id: JobId,
        ts: DateTime<Utc>,
    ) -> Result<(), SchedulerError>;

    /// Chain jobs attached to a master, ordered by `chain_position`.
    async fn get_chain(&self, parent_job_id: JobId) -> Result<Vec<Job>, SchedulerError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, SchedulerError>;

    /// Whether the job's OLT is currently enabled. The pool re-checks this
    /// between selection and the `RUNNING` transition.
    async fn is_olt_enabled(&self, job_id: JobId) -> Result<bool, SchedulerError>;

    /// Jobs whose `next_run_at` falls within `[now, now + horizon]`, for
    /// burst-smoothing to scan.
    async fn list_upcoming(
        &self,
        now: DateTime<Utc>,
        horizon: chrono::Duration,
    ) -> Result<Vec<Job>, SchedulerError>;
}

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn list_enabled_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, SchedulerError> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT j.* FROM jobs j
            JOIN olts o ON o.id = j.olt_id
            WHERE j.enabled = true AND o.enabled = true AND j.next_run_at <= $1
              AND j.parent_job_id IS NULL
            ORDER BY j.next_run_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn update_next_run_at(
        &self,
        job_id: JobId,
        ts: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        sqlx::query("UPDATE jobs SET next_run_at = $1, updated_at = now() WHERE id = $2")
            .bind(ts)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_chain(&self, parent_job_id: JobId) -> Result<Vec<Job>, SchedulerError> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE parent_job_id = $1 ORDER BY chain_position ASC",
        )
        .bind(parent_job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, SchedulerError> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn is_olt_enabled(&self, job_id: JobId) -> Result<bool, SchedulerError> {
        let enabled: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT o.enabled FROM olts o
            JOIN jobs j ON j.olt_id = o.id
            WHERE j.id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(enabled.unwrap_or(false))
    }

    async fn list_upcoming(
        &self,
        now: DateTime<Utc>,
        horizon: chrono::Duration,
    ) -> Result<Vec<Job>, SchedulerError> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE enabled = true AND next_run_at BETWEEN $1 AND $2",
        )
        .bind(now)
        .bind(now + horizon)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }
}

/// In-memory fake mirroring `PostgresJobStore`'s contract, used by the test
/// harness and scripted end-to-end scenarios.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    olt_enabled: RwLock<HashMap<crate::common::entity_ids::OltId, bool>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        self.olt_enabled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(job.olt_id)
            .or_insert(true);
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id, job);
    }

    pub fn set_olt_enabled(&self, olt_id: crate::common::entity_ids::OltId, enabled: bool) {
        self.olt_enabled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(olt_id, enabled);
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn list_enabled_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, SchedulerError> {
        let olt_enabled = self.olt_enabled.read().unwrap_or_else(|e| e.into_inner());
        let mut due: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|j| {
                j.enabled
                    && j.next_run_at <= now
                    && j.parent_job_id.is_none()
                    && olt_enabled.get(&j.olt_id).copied().unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at));
        Ok(due)
    }

    async fn update_next_run_at(
        &self,
        job_id: JobId,
        ts: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if let Some(job) = self
            .jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&job_id)
        {
            job.next_run_at = ts;
        }
        Ok(())
    }

    async fn get_chain(&self, parent_job_id: JobId) -> Result<Vec<Job>, SchedulerError> {
        let mut chain: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|j| j.parent_job_id == Some(parent_job_id))
            .cloned()
            .collect();
        chain.sort_by_key(|j| j.chain_position);
        Ok(chain)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned())
    }

    async fn is_olt_enabled(&self, job_id: JobId) -> Result<bool, SchedulerError> {
        let Some(job) = self.get(job_id).await? else {
            return Ok(false);
        };
        Ok(self
            .olt_enabled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job.olt_id)
            .copied()
            .unwrap_or(false))
    }

    async fn list_upcoming(
        &self,
        now: DateTime<Utc>,
        horizon: chrono::Duration,
    ) -> Result<Vec<Job>, SchedulerError> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|j| j.enabled && j.next_run_at >= now && j.next_run_at <= now + horizon)
            .cloned()
            .collect())
    }
}
