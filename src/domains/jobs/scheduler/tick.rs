//! Dynamic Scheduler: every tick, selects ready jobs, applies the quota /
//! collision / running-state gates, submits survivors to the pool, and
//! smooths upcoming bursts.

use crate::config::SharedConfig;
use crate::domains::jobs::models::composite_node::CompositeNode;
use crate::domains::jobs::models::job::Job;
use crate::domains::jobs::pool::poller_pool::PollerPool;
use crate::domains::jobs::scheduler::burst_smoothing::compute_burst_smoothing;
use crate::domains::jobs::store::execution_store::ExecutionStore;
use crate::domains::jobs::store::job_store::JobStore;
use crate::kernel::clock::Clock;
use crate::kernel::service::Service;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Snapshot of the scheduler's health, surfaced by `GET /scheduler/health`.
#[derive(Debug, Clone, Default)]
pub struct SchedulerHealthSnapshot {
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_tick_duration_ms: i64,
    pub jobs_ready_count: u64,
    pub quota_blocked_count: u64,
}

#[derive(Default)]
pub struct SchedulerHealth {
    last_tick_at: Mutex<Option<DateTime<Utc>>>,
    last_tick_duration_ms: AtomicI64,
    jobs_ready_count: AtomicU64,
    quota_blocked_count: AtomicU64,
}

impl SchedulerHealth {
    pub fn snapshot(&self) -> SchedulerHealthSnapshot {
        SchedulerHealthSnapshot {
            last_tick_at: *self.last_tick_at.lock().unwrap_or_else(|e| e.into_inner()),
            last_tick_duration_ms: self.last_tick_duration_ms.load(Ordering::SeqCst),
            jobs_ready_count: self.jobs_ready_count.load(Ordering::SeqCst),
            quota_blocked_count: self.quota_blocked_count.load(Ordering::SeqCst),
        }
    }
}

pub struct DynamicScheduler {
    job_store: Arc<dyn JobStore>,
    execution_store: Arc<dyn ExecutionStore>,
    pool: Arc<PollerPool>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    tick_counter: AtomicU64,
    health: Arc<SchedulerHealth>,
}

impl DynamicScheduler {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        execution_store: Arc<dyn ExecutionStore>,
        pool: Arc<PollerPool>,
        config: SharedConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, Arc<SchedulerHealth>) {
        let health = Arc::new(SchedulerHealth::default());
        (
            Self {
                job_store,
                execution_store,
                pool,
                config,
                clock,
                tick_counter: AtomicU64::new(0),
                health: health.clone(),
            },
            health,
        )
    }

    /// Runs one scheduler tick. Never propagates errors to the caller — all
    /// failures are logged and the scheduler continues on the next tick.
    pub async fn tick(&self) {
        let tick_id = self.tick_counter.fetch_add(1, Ordering::SeqCst);
        let span = tracing::info_span!("scheduler_tick", tick_id);
        let _enter = span.enter();

        let start = self.clock.now();
        if let Err(err) = self.run_tick(start).await {
            tracing::error!(error = %err, "tick failed; continuing on next tick");
        }
        let elapsed = (self.clock.now() - start).num_milliseconds();

        *self.health.last_tick_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(start);
        self.health
            .last_tick_duration_ms
            .store(elapsed, Ordering::SeqCst);
    }

    async fn run_tick(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();

        let due = self.job_store.list_enabled_due(now).await?;
        self.health
            .jobs_ready_count
            .store(due.len() as u64, Ordering::SeqCst);

        let mut quota_blocked = 0u64;
        let mut submittable: Vec<Job> = Vec::new();

        for job in due {
            if self.quota_gate(&job, now).await? {
                quota_blocked += 1;
                continue;
            }

            if self.collision_gate(&job, now).await? {
                continue;
            }

            submittable.push(job);
        }
        self.health
            .quota_blocked_count
            .store(quota_blocked, Ordering::SeqCst);

        submittable.sort_by(|a, b| {
            a.next_run_at
                .cmp(&b.next_run_at)
                .then_with(|| a.operation_type.as_str().cmp(b.operation_type.as_str()))
                .then_with(|| a.id.cmp(&b.id))
        });

        let capacity = config.pool_size + config.pool_size * config.pool_queue_capacity_factor;
        for job in submittable.into_iter().take(capacity) {
            self.submit_job(&job, now).await?;
        }

        self.smooth_bursts(now, config.max_executions_per_minute)
            .await?;

        Ok(())
    }

    /// Returns `true` if `job` should be deferred by the quota gate.
    async fn quota_gate(&self, job: &Job, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let quota = job.quota_per_hour();
        let since = now - ChronoDuration::seconds(3600);
        let count = self.execution_store.count_terminal_since(job.id, since).await?;

        if count >= quota {
            tracing::debug!(job_id = %job.id, quota, count, "alcanzó cuota máxima");
            let next_hour = start_of_next_hour_utc(now);
            self.job_store.update_next_run_at(job.id, next_hour).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Returns `true` if `job` should be deferred because an execution of
    /// the same (olt, operation_type) is already non-terminal.
    async fn collision_gate(&self, job: &Job, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let running = self
            .execution_store
            .exists_non_terminal(job.olt_id, job.operation_type)
            .await?;

        if running {
            let defer = std::cmp::min(
                ChronoDuration::seconds(60),
                ChronoDuration::seconds(job.interval_seconds) / 2,
            );
            tracing::debug!(job_id = %job.id, "deferred: execution already running for olt/type");
            self.job_store.update_next_run_at(job.id, now + defer).await?;
            return Ok(true);
        }

        Ok(false)
    }

    async fn submit_job(&self, job: &Job, now: DateTime<Utc>) -> anyhow::Result<()> {
        let chain = if job.is_master() {
            self.job_store.get_chain(job.id).await?
        } else {
            Vec::new()
        };

        let execution_id = self
            .execution_store
            .insert_execution(job.id, job.olt_id, job.operation_type, now, 1, None)
            .await?;

        let next_run_at = now + ChronoDuration::seconds(job.interval_seconds);
        self.job_store.update_next_run_at(job.id, next_run_at).await?;

        let node = CompositeNode::with_chain(execution_id, job.clone(), chain, now);
        self.pool.submit(node);

        Ok(())
    }

    async fn smooth_bursts(&self, now: DateTime<Utc>, max_per_minute: u32) -> anyhow::Result<()> {
        let upcoming = self
            .job_store
            .list_upcoming(now, ChronoDuration::hours(1))
            .await?;

        let moves = compute_burst_smoothing(&upcoming, now, max_per_minute);
        for mv in &moves {
            tracing::debug!(job_id = %mv.job_id, new_next_run_at = %mv.new_next_run_at, "burst smoothing move");
            self.job_store
                .update_next_run_at(mv.job_id, mv.new_next_run_at)
                .await?;
        }

        Ok(())
    }
}

fn start_of_next_hour_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    truncated + ChronoDuration::hours(1)
}

/// Runs [`DynamicScheduler::tick`] on `config.tick_interval`, as a
/// [`Service`] so it participates in graceful shutdown.
pub struct SchedulerService {
    scheduler: Arc<DynamicScheduler>,
    config: SharedConfig,
}

impl SchedulerService {
    pub fn new(scheduler: Arc<DynamicScheduler>, config: SharedConfig) -> Self {
        Self { scheduler, config }
    }
}

#[async_trait]
impl Service for SchedulerService {
    fn name(&self) -> &'static str {
        "dynamic-scheduler"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        loop {
            self.scheduler.tick().await;

            let interval = self.config.read().unwrap_or_else(|e| e.into_inner()).tick_interval;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        Ok(())
    }
}
