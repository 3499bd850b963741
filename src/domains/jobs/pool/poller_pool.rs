//! Poller Pool: a fixed-size set of concurrent execution slots.

use crate::common::entity_ids::ExecutionId;
use crate::config::SharedConfig;
use crate::domains::jobs::models::composite_node::CompositeNode;
use crate::domains::jobs::models::execution::ExecutionState;
use crate::domains::jobs::pool::olt_lock::OltLockRegistry;
use crate::domains::jobs::store::execution_store::{ExecutionStore, TransitionUpdate};
use crate::domains::jobs::store::job_store::JobStore;
use crate::domains::olt::OltStore;
use crate::kernel::clock::Clock;
use crate::kernel::service::Service;
use crate::worker::snmp::SnmpWorker;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Queued,
    Rejected,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub slot_count: usize,
    pub busy_count: usize,
    pub queue_depth: usize,
    pub busy_percentage: f64,
    pub tasks_delayed_count: usize,
}

/// Invoked by a slot once a CompositeNode's master has reached a terminal
/// state. The lifecycle manager is the production implementation; it has no
/// thread of its own and must not block on SNMP work here.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_complete(&self, execution_id: ExecutionId, state: ExecutionState, node: CompositeNode);
}

pub struct PollerPool {
    slot_count: usize,
    queue_capacity: usize,
    queue: Mutex<VecDeque<CompositeNode>>,
    in_flight: AtomicUsize,
    accepting: AtomicBool,
    notify: tokio::sync::Notify,
    olt_locks: OltLockRegistry,
    config: SharedConfig,
    job_store: Arc<dyn JobStore>,
    execution_store: Arc<dyn ExecutionStore>,
    olt_store: Arc<dyn OltStore>,
    snmp_worker: Arc<dyn SnmpWorker>,
    completion_handler: Arc<dyn CompletionHandler>,
    clock: Arc<dyn Clock>,
    /// Delayed (queued-but-not-yet-slotted) retry count for stats; tracked
    /// separately from `queue_depth` so observability can distinguish
    /// "waiting for a slot" from "waiting out a retry backoff" (the latter
    /// lives in the delay queue, not here, but the pool surfaces the total).
    delayed_count: AtomicUsize,
    next_worker_seq: AtomicUsize,
}

impl PollerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slot_count: usize,
        queue_capacity: usize,
        config: SharedConfig,
        job_store: Arc<dyn JobStore>,
        execution_store: Arc<dyn ExecutionStore>,
        olt_store: Arc<dyn OltStore>,
        snmp_worker: Arc<dyn SnmpWorker>,
        completion_handler: Arc<dyn CompletionHandler>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            slot_count,
            queue_capacity,
            queue: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            notify: tokio::sync::Notify::new(),
            olt_locks: OltLockRegistry::new(),
            config,
            job_store,
            execution_store,
            olt_store,
            snmp_worker,
            completion_handler,
            clock,
            delayed_count: AtomicUsize::new(0),
            next_worker_seq: AtomicUsize::new(0),
        })
    }

    pub fn note_delayed(&self, count: usize) {
        self.delayed_count.store(count, Ordering::SeqCst);
    }

    pub fn submit(self: &Arc<Self>, node: CompositeNode) -> SubmitOutcome {
        if !self.accepting.load(Ordering::SeqCst) {
            return SubmitOutcome::Rejected;
        }

        if self.try_acquire_slot() {
            self.spawn_run(node);
            return SubmitOutcome::Accepted;
        }

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() < self.queue_capacity {
            queue.push_back(node);
            SubmitOutcome::Queued
        } else {
            SubmitOutcome::Rejected
        }
    }

    fn try_acquire_slot(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < self.slot_count {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Attempts to pull one item off the FIFO into a free slot. Returns
    /// whether it dispatched anything, so the dispatcher loop can drain the
    /// queue eagerly as slots free up.
    fn try_dispatch_from_queue(self: &Arc<Self>) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.is_empty() {
            return false;
        }
        if !self.try_acquire_slot() {
            return false;
        }
        let node = queue.pop_front().expect("checked non-empty above");
        drop(queue);
        self.spawn_run(node);
        true
    }

    fn spawn_run(self: &Arc<Self>, node: CompositeNode) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.run_node(node).await;
            pool.release_slot();
        });
    }

    pub fn stats(&self) -> PoolStats {
        let busy = self.in_flight.load(Ordering::SeqCst);
        let queue_depth = self.queue.lock().unwrap_or_else(|e| e.into_inner()).len();
        let busy_percentage = if self.slot_count == 0 {
            0.0
        } else {
            (busy as f64 / self.slot_count as f64) * 100.0
        };
        PoolStats {
            slot_count: self.slot_count,
            busy_count: busy,
            queue_depth,
            busy_percentage,
            tasks_delayed_count: self.delayed_count.load(Ordering::SeqCst),
        }
    }

    async fn run_node(&self, node: CompositeNode) {
        let execution_id = node.execution_id;
        let job = &node.master;

        let enabled = match self.job_store.get(job.id).await {
            Ok(Some(j)) => j.enabled,
            Ok(None) => false,
            Err(err) => {
                tracing::error!(error = %err, job_id = %job.id, "job lookup failed before run");
                false
            }
        };
        let olt_enabled = self
            .olt_store
            .is_enabled(job.olt_id)
            .await
            .unwrap_or(false);

        if !enabled || !olt_enabled {
            tracing::debug!(job_id = %job.id, "job or olt disabled before start, interrupting");
            let now = self.clock.now();
            let _ = self
                .execution_store
                .transition(
                    execution_id,
                    ExecutionState::Pending,
                    ExecutionState::Interrupted,
                    TransitionUpdate {
                        finished_at: Some(now),
                        error_kind: Some(crate::common::errors::ExecutionErrorKind::Disabled),
                        ..Default::default()
                    },
                )
                .await;
            self.completion_handler
                .on_complete(execution_id, ExecutionState::Interrupted, node)
                .await;
            return;
        }

        let lock_timeout = self
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .olt_lock_timeout;
        let Some(_guard) = self.olt_locks.try_acquire(job.olt_id, lock_timeout).await else {
            tracing::warn!(olt_id = %job.olt_id, "olt lock timed out, requeuing node");
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.push_back(node);
            return;
        };

        let started_at = self.clock.now();
        let worker_id = format!("slot-{}", self.next_worker_seq.fetch_add(1, Ordering::SeqCst));
        let _ = self
            .execution_store
            .transition(
                execution_id,
                ExecutionState::Pending,
                ExecutionState::Running,
                TransitionUpdate {
                    started_at: Some(started_at),
                    worker_id: Some(worker_id.clone()),
                    ..Default::default()
                },
            )
            .await;

        let (timeout, wall_clock_ceiling) = {
            let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
            (
                cfg.operation_configs.get(job.operation_type).timeout,
                cfg.execution_wall_clock_ceiling,
            )
        };

        let worker = self.snmp_worker.clone();
        let endpoint = job
            .queue_hint
            .clone()
            .unwrap_or_else(|| job.olt_id.to_string());
        let operation_type = job.operation_type;
        let oid = job.oid.clone();

        let outcome = tokio::time::timeout(
            wall_clock_ceiling,
            worker.execute(&endpoint, operation_type, &oid, timeout),
        )
        .await;

        let finished_at = self.clock.now();
        let duration_ms = (finished_at - started_at).num_milliseconds();

        let (final_state, error_kind, error_detail) = match outcome {
            Err(_elapsed) => (
                ExecutionState::Interrupted,
                Some(crate::common::errors::ExecutionErrorKind::Timeout),
                Some("wall-clock ceiling exceeded".to_string()),
            ),
            Ok(Ok(_value)) => (ExecutionState::Success, None, None),
            Ok(Err(kind)) => (ExecutionState::Failed, Some(kind), None),
        };

        let _ = self
            .execution_store
            .transition(
                execution_id,
                ExecutionState::Running,
                final_state,
                TransitionUpdate {
                    finished_at: Some(finished_at),
                    duration_ms: Some(duration_ms),
                    error_kind,
                    error_detail,
                    ..Default::default()
                },
            )
            .await;

        drop(_guard);

        self.completion_handler
            .on_complete(execution_id, final_state, node)
            .await;
    }

    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}

/// Background task that drains the pool's FIFO into free slots as they
/// appear. Runs as a [`Service`] so it participates in graceful shutdown.
pub struct PoolDispatcher {
    pool: Arc<PollerPool>,
}

impl PoolDispatcher {
    pub fn new(pool: Arc<PollerPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Service for PoolDispatcher {
    fn name(&self) -> &'static str {
        "poller-pool-dispatcher"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.pool.notify.notified() => {},
                _ = tokio::time::sleep(StdDuration::from_millis(200)) => {},
            }
            while self.pool.try_dispatch_from_queue() {}
        }
        Ok(())
    }
}
