//! Chain Coordinator: after a master execution completes, materializes and
//! submits its dependent chain jobs, one CompositeNode at a time.

use crate::common::entity_ids::{ExecutionId, JobId};
use crate::common::errors::SchedulerError;
use crate::domains::jobs::models::composite_node::CompositeNode;
use crate::domains::jobs::models::execution::ExecutionState;
use crate::domains::jobs::models::job::Job;
use crate::domains::jobs::pool::poller_pool::PollerPool;
use crate::domains::jobs::store::execution_store::ExecutionStore;
use crate::kernel::clock::Clock;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Tracks one in-flight "batch" of chain nodes submitted together (a node
/// and any immediately-following nodes marked `parallel_ok`). The next batch
/// is only submitted once every node in this one has reached a terminal
/// state.
struct ChainBatch {
    remaining: VecDeque<Job>,
    master_execution_id: ExecutionId,
    outstanding: usize,
    halted: bool,
}

/// Submits chain jobs after their master completes, honoring sequential
/// ordering (unless `parallel_ok`), the stop-on-failure default (overridable
/// via `continue_chain_on_failure`), and the `run_chain_on_failure` gate for
/// the very first node after a FAILED master.
pub struct ChainCoordinator {
    execution_store: Arc<dyn ExecutionStore>,
    pool: Arc<PollerPool>,
    clock: Arc<dyn Clock>,
    /// Maps a chain job's id to the batch it belongs to, for the duration of
    /// that job's execution.
    running: Mutex<HashMap<JobId, Arc<Mutex<ChainBatch>>>>,
}

impl ChainCoordinator {
    pub fn new(execution_store: Arc<dyn ExecutionStore>, pool: Arc<PollerPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            execution_store,
            pool,
            clock,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Invoked by the lifecycle manager when a master execution reaches a
    /// terminal state.
    pub async fn handle_master_complete(
        &self,
        master_execution_id: ExecutionId,
        chain: Vec<Job>,
        master_state: ExecutionState,
    ) -> Result<(), SchedulerError> {
        if chain.is_empty() {
            return Ok(());
        }

        let should_start = match master_state {
            ExecutionState::Success => true,
            ExecutionState::Failed => chain[0].run_chain_on_failure,
            ExecutionState::Interrupted | ExecutionState::Pending | ExecutionState::Running => false,
        };

        if !should_start {
            tracing::debug!(
                execution_id = %master_execution_id,
                "master did not succeed and run_chain_on_failure is unset; no chain executions"
            );
            return Ok(());
        }

        self.submit_next_batch(VecDeque::from(chain), master_execution_id).await
    }

    /// Invoked by the lifecycle manager when a chain node (previously
    /// submitted by this coordinator) reaches a terminal state.
    pub async fn on_chain_node_complete(
        &self,
        job_id: JobId,
        state: ExecutionState,
        continue_on_failure: bool,
    ) -> Result<(), SchedulerError> {
        let batch = {
            let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.get(&job_id).cloned()
        };
        let Some(batch) = batch else {
            return Ok(());
        };

        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);

        let (remaining, master_execution_id, ready_for_next) = {
            let mut batch = batch.lock().unwrap_or_else(|e| e.into_inner());
            if state == ExecutionState::Failed && !continue_on_failure {
                batch.halted = true;
            }
            batch.outstanding = batch.outstanding.saturating_sub(1);
            (
                std::mem::take(&mut batch.remaining),
                batch.master_execution_id,
                batch.outstanding == 0,
            )
        };

        if !ready_for_next {
            // Other nodes in this parallel batch are still running; put the
            // remaining queue back once they all finish. We re-stash it on
            // the shared batch so the last-to-complete node drives the
            // continuation.
            let mut batch_guard = batch.lock().unwrap_or_else(|e| e.into_inner());
            batch_guard.remaining = remaining;
            return Ok(());
        }

        let halted = batch.lock().unwrap_or_else(|e| e.into_inner()).halted;
        if halted {
            tracing::debug!(job_id = %job_id, "chain node failed without continue_chain_on_failure; stopping chain");
            return Ok(());
        }

        self.submit_next_batch(remaining, master_execution_id).await
    }

    async fn submit_next_batch(
        &self,
        mut remaining: VecDeque<Job>,
        master_execution_id: ExecutionId,
    ) -> Result<(), SchedulerError> {
        let Some(first) = remaining.pop_front() else {
            return Ok(());
        };

        let mut batch_jobs = vec![first];
        while remaining
            .front()
            .map(|j| j.parallel_ok)
            .unwrap_or(false)
        {
            batch_jobs.push(remaining.pop_front().expect("checked front above"));
        }

        let batch = Arc::new(Mutex::new(ChainBatch {
            remaining,
            master_execution_id,
            outstanding: batch_jobs.len(),
            halted: false,
        }));

        for job in batch_jobs {
            let now = self.clock.now();
            let execution_id = self
                .execution_store
                .insert_execution(
                    job.id,
                    job.olt_id,
                    job.operation_type,
                    now,
                    1,
                    Some(master_execution_id),
                )
                .await?;

            self.running
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(job.id, batch.clone());

            let node = CompositeNode::singleton(execution_id, job, now);
            self.pool.submit(node);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::entity_ids::OltId;
    use crate::config::{shared, AppConfig, LogFormat, OperationConfigMap};
    use crate::domains::jobs::models::job::OperationType;
    use crate::domains::jobs::pool::poller_pool::PollerPool;
    use crate::domains::jobs::store::execution_store::InMemoryExecutionStore;
    use crate::domains::jobs::store::job_store::InMemoryJobStore;
    use crate::domains::jobs::lifecycle::manager::NoopCompletionHandler;
    use crate::domains::olt::InMemoryOltStore;
    use crate::kernel::clock::TestClock;
    use crate::worker::snmp::ScriptedSnmpWorker;
    use chrono::Utc;
    use std::time::Duration;

    fn chain_job(parent: JobId, position: i32, parallel_ok: bool) -> Job {
        Job::builder()
            .olt_id(OltId::new())
            .operation_type(OperationType::Walk)
            .interval_seconds(300)
            .next_run_at(Utc::now())
            .oid("1.3.6.1")
            .parent_job_id(parent)
            .chain_position(position)
            .parallel_ok(parallel_ok)
            .build()
    }

    fn test_pool(execution_store: Arc<dyn ExecutionStore>) -> Arc<PollerPool> {
        let config = shared(AppConfig {
            database_url: "postgres://localhost/test".into(),
            bind_addr: "0.0.0.0:0".into(),
            max_executions_per_minute: 6,
            pool_size: 4,
            pool_queue_capacity_factor: 4,
            tick_interval: Duration::from_secs(30),
            operation_configs: OperationConfigMap::default(),
            execution_wall_clock_ceiling: Duration::from_secs(180),
            olt_lock_timeout: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(5),
            log_format: LogFormat::Human,
        });

        PollerPool::new(
            4,
            16,
            config,
            Arc::new(InMemoryJobStore::new()),
            execution_store,
            Arc::new(InMemoryOltStore::new()),
            Arc::new(ScriptedSnmpWorker::new()),
            Arc::new(NoopCompletionHandler),
            Arc::new(TestClock::new(Utc::now())),
        )
    }

    #[tokio::test]
    async fn master_success_submits_first_chain_node() {
        let execution_store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let pool = test_pool(execution_store.clone());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let coordinator = ChainCoordinator::new(execution_store.clone(), pool, clock);

        let master_job_id = JobId::new();
        let c1 = chain_job(master_job_id, 1, false);
        let c2 = chain_job(master_job_id, 2, false);

        coordinator
            .handle_master_complete(ExecutionId::new(), vec![c1.clone(), c2], ExecutionState::Success)
            .await
            .unwrap();

        // c1 should now have exactly one execution row recorded.
        let running = coordinator.running.lock().unwrap();
        assert!(running.contains_key(&c1.id));
    }

    #[tokio::test]
    async fn failed_master_without_run_chain_on_failure_submits_nothing() {
        let execution_store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let pool = test_pool(execution_store.clone());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let coordinator = ChainCoordinator::new(execution_store, pool, clock);

        let master_job_id = JobId::new();
        let c1 = chain_job(master_job_id, 1, false);

        coordinator
            .handle_master_complete(ExecutionId::new(), vec![c1.clone()], ExecutionState::Failed)
            .await
            .unwrap();

        let running = coordinator.running.lock().unwrap();
        assert!(!running.contains_key(&c1.id));
    }
}
