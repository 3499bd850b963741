//! Execution Lifecycle Manager: state transitions, retry decisions, startup
//! recovery, and OLT failure-counter maintenance. Reactive — invoked by the
//! pool's completion callback — with no thread of its own.

use crate::common::entity_ids::ExecutionId;
use crate::common::errors::ExecutionErrorKind;
use crate::domains::jobs::chain::coordinator::ChainCoordinator;
use crate::domains::jobs::models::composite_node::CompositeNode;
use crate::domains::jobs::models::execution::ExecutionState;
use crate::domains::jobs::pool::delay_queue::DelayQueue;
use crate::domains::jobs::pool::poller_pool::CompletionHandler;
use crate::domains::jobs::store::execution_store::{ExecutionStore, TransitionUpdate};
use crate::domains::olt::OltStore;
use crate::kernel::clock::Clock;
use async_trait::async_trait;
use std::sync::Arc;

pub struct ExecutionLifecycleManager {
    execution_store: Arc<dyn ExecutionStore>,
    olt_store: Arc<dyn OltStore>,
    chain_coordinator: Arc<ChainCoordinator>,
    delay_queue: DelayQueue,
    clock: Arc<dyn Clock>,
}

impl ExecutionLifecycleManager {
    pub fn new(
        execution_store: Arc<dyn ExecutionStore>,
        olt_store: Arc<dyn OltStore>,
        chain_coordinator: Arc<ChainCoordinator>,
        delay_queue: DelayQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            execution_store,
            olt_store,
            chain_coordinator,
            delay_queue,
            clock,
        }
    }

    /// Scans the store for non-terminal rows left over from a previous
    /// process and closes them out as `INTERRUPTED(process_restart)`. Must
    /// run once, before the scheduler's first tick.
    pub async fn recover_on_startup(&self) -> anyhow::Result<usize> {
        let stale = self.execution_store.list_non_terminal().await?;
        let now = self.clock.now();
        let mut recovered = 0;

        for execution in stale {
            let outcome = self
                .execution_store
                .transition(
                    execution.id,
                    execution.state,
                    ExecutionState::Interrupted,
                    TransitionUpdate {
                        finished_at: Some(now),
                        error_kind: Some(ExecutionErrorKind::ProcessRestart),
                        ..Default::default()
                    },
                )
                .await?;

            if outcome == crate::domains::jobs::store::execution_store::TransitionOutcome::Ok {
                recovered += 1;
            }
        }

        tracing::info!(recovered, "startup recovery closed out non-terminal executions");
        Ok(recovered)
    }

    /// Returns `true` if the failure is terminal for this job (no retry was
    /// queued) — the only case in which the chain coordinator should be
    /// told about it. A queued retry is not yet a terminal outcome for the
    /// chain node/master it belongs to.
    async fn handle_retry_or_exhaustion(&self, execution_id: ExecutionId, node: &CompositeNode) -> bool {
        let job = &node.master;

        let Ok(Some(execution)) = self.execution_store.get(execution_id).await else {
            tracing::error!(execution_id = %execution_id, "completed execution vanished from store");
            return true;
        };

        let error_kind = execution.error_kind.unwrap_or(ExecutionErrorKind::Internal);
        if !error_kind.is_retriable() {
            self.olt_store
                .increment_failure_count(job.olt_id)
                .await
                .ok();
            return true;
        }

        let effective_max_retries = error_kind
            .max_retry_cap()
            .map(|cap| cap.min(job.max_retries))
            .unwrap_or(job.max_retries);

        if execution.attempt_number < effective_max_retries {
            let now = self.clock.now();
            let due_at = now + chrono::Duration::seconds(job.retry_delay_seconds);

            let Ok(new_execution_id) = self
                .execution_store
                .insert_execution(
                    job.id,
                    job.olt_id,
                    job.operation_type,
                    due_at,
                    execution.attempt_number + 1,
                    execution.parent_execution_id,
                )
                .await
            else {
                tracing::error!(job_id = %job.id, "failed to create retry execution row");
                return true;
            };

            let retry_node = CompositeNode::singleton(new_execution_id, job.clone(), due_at);
            self.delay_queue.schedule(retry_node, due_at);
            false
        } else {
            let count = self
                .olt_store
                .increment_failure_count(job.olt_id)
                .await
                .unwrap_or(0);
            tracing::warn!(
                job_id = %job.id,
                olt_id = %job.olt_id,
                consecutive_failure_count = count,
                "retries exhausted; never auto-disabling, counter exposed to operators"
            );
            true
        }
    }
}

#[async_trait]
impl CompletionHandler for ExecutionLifecycleManager {
    async fn on_complete(&self, execution_id: ExecutionId, state: ExecutionState, node: CompositeNode) {
        let job = node.master.clone();

        match state {
            ExecutionState::Success => {
                self.olt_store.reset_failure_count(job.olt_id).await.ok();

                if job.is_chain_node() {
                    let _ = self
                        .chain_coordinator
                        .on_chain_node_complete(job.id, state, job.continue_chain_on_failure)
                        .await;
                } else {
                    let _ = self
                        .chain_coordinator
                        .handle_master_complete(execution_id, node.chain.clone(), state)
                        .await;
                }
            }
            ExecutionState::Failed => {
                let exhausted = self.handle_retry_or_exhaustion(execution_id, &node).await;

                // A queued retry is not a terminal outcome for this job yet;
                // the chain coordinator only hears about it once retries are
                // exhausted, otherwise a retried-then-succeeded chain node
                // would find its batch already torn down.
                if exhausted {
                    if job.is_chain_node() {
                        let _ = self
                            .chain_coordinator
                            .on_chain_node_complete(job.id, state, job.continue_chain_on_failure)
                            .await;
                    } else {
                        let _ = self
                            .chain_coordinator
                            .handle_master_complete(execution_id, node.chain.clone(), state)
                            .await;
                    }
                }
            }
            ExecutionState::Interrupted => {
                // No retry, no counter change, no chain progression; the
                // job's next_run_at is left exactly as the scheduler set it.
            }
            ExecutionState::Pending | ExecutionState::Running => {
                tracing::error!(
                    execution_id = %execution_id,
                    ?state,
                    "completion callback invoked with a non-terminal state"
                );
            }
        }
    }
}

/// A no-op completion handler for tests that exercise the pool in isolation
/// and don't care about lifecycle/chain behavior.
pub struct NoopCompletionHandler;

#[async_trait]
impl CompletionHandler for NoopCompletionHandler {
    async fn on_complete(&self, _execution_id: ExecutionId, _state: ExecutionState, _node: CompositeNode) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::entity_ids::{JobId, OltId};
    use crate::config::{shared, AppConfig, LogFormat, OperationConfigMap};
    use crate::domains::jobs::models::job::{Job, OperationType};
    use crate::domains::jobs::pool::poller_pool::PollerPool;
    use crate::domains::jobs::store::execution_store::InMemoryExecutionStore;
    use crate::domains::jobs::store::job_store::InMemoryJobStore;
    use crate::domains::olt::{InMemoryOltStore, Olt};
    use crate::worker::snmp::ScriptedSnmpWorker;
    use crate::kernel::clock::TestClock;
    use chrono::Utc;
    use std::time::Duration;

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
    async fn startup_recovery_interrupts_non_terminal_rows() {
        let execution_store = Arc::new(InMemoryExecutionStore::new());
        let olt_store = Arc::new(InMemoryOltStore::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let pool = test_pool(execution_store.clone());
        let chain_coordinator = Arc::new(ChainCoordinator::new(
            execution_store.clone(),
            pool,
            clock.clone(),
        ));
        let delay_queue = DelayQueue::new(clock.clone());
        let manager = ExecutionLifecycleManager::new(
            execution_store.clone(),
            olt_store,
            chain_coordinator,
            delay_queue,
            clock,
        );

        let job_id = JobId::new();
        let olt_id = OltId::new();
        let pending_id = execution_store
            .insert_execution(job_id, olt_id, OperationType::Discovery, Utc::now(), 1, None)
            .await
            .unwrap();

        let recovered = manager.recover_on_startup().await.unwrap();
        assert_eq!(recovered, 1);

        let execution = execution_store.get(pending_id).await.unwrap().unwrap();
        assert_eq!(execution.state, ExecutionState::Interrupted);
        assert_eq!(execution.error_kind, Some(ExecutionErrorKind::ProcessRestart));
    }

    #[tokio::test]
    async fn success_resets_olt_failure_counter() {
        let execution_store = Arc::new(InMemoryExecutionStore::new());
        let olt_store = Arc::new(InMemoryOltStore::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let olt_id = OltId::new();
        olt_store.insert(Olt {
            id: olt_id,
            enabled: true,
            endpoint: "10.0.0.1".into(),
            consecutive_failure_count: 3,
        });

        let pool = test_pool(execution_store.clone());
        let chain_coordinator = Arc::new(ChainCoordinator::new(
            execution_store.clone(),
            pool,
            clock.clone(),
        ));
        let delay_queue = DelayQueue::new(clock.clone());
        let manager = ExecutionLifecycleManager::new(
            execution_store.clone(),
            olt_store.clone(),
            chain_coordinator,
            delay_queue,
            clock,
        );

        let job = Job::builder()
            .olt_id(olt_id)
            .operation_type(OperationType::Discovery)
            .interval_seconds(600)
            .next_run_at(Utc::now())
            .oid("1.3.6.1")
            .build();

        let execution_id = execution_store
            .insert_execution(job.id, olt_id, job.operation_type, Utc::now(), 1, None)
            .await
            .unwrap();

        let node = CompositeNode::singleton(execution_id, job, Utc::now());
        manager.on_complete(execution_id, ExecutionState::Success, node).await;

        let olt = olt_store.get(olt_id).await.unwrap().unwrap();
        assert_eq!(olt.consecutive_failure_count, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_increment_failure_counter_without_disabling() {
        let execution_store = Arc::new(InMemoryExecutionStore::new());
        let olt_store = Arc::new(InMemoryOltStore::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let olt_id = OltId::new();
        olt_store.insert(Olt {
            id: olt_id,
            enabled: true,
            endpoint: "10.0.0.1".into(),
            consecutive_failure_count: 0,
        });

        let pool = test_pool(execution_store.clone());
        let chain_coordinator = Arc::new(ChainCoordinator::new(
            execution_store.clone(),
            pool,
            clock.clone(),
        ));
        let delay_queue = DelayQueue::new(clock.clone());
        let manager = ExecutionLifecycleManager::new(
            execution_store.clone(),
            olt_store.clone(),
            chain_coordinator,
            delay_queue,
            clock,
        );

        let mut job = Job::builder()
            .olt_id(olt_id)
            .operation_type(OperationType::Get)
            .interval_seconds(300)
            .next_run_at(Utc::now())
            .oid("1.3.6.1")
            .build();
        job.max_retries = 1;

        let execution_id = execution_store
            .insert_execution(job.id, olt_id, job.operation_type, Utc::now(), 1, None)
            .await
            .unwrap();
        execution_store
            .transition(
                execution_id,
                ExecutionState::Pending,
                ExecutionState::Failed,
                TransitionUpdate {
                    error_kind: Some(ExecutionErrorKind::Transport),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let node = CompositeNode::singleton(execution_id, job, Utc::now());
        manager.on_complete(execution_id, ExecutionState::Failed, node).await;

        assert_eq!(
            olt_store.get(olt_id).await.unwrap().unwrap().consecutive_failure_count,
            1
        );
        assert!(manager.delay_queue.is_empty());
    }
}
