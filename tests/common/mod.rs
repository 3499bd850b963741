//! Shared harness for end-to-end tests: wires the full in-memory stack the
//! same way the composition root wires the Postgres one, minus the HTTP
//! surface and signal handling.

use oltsched::common::entity_ids::OltId;
use oltsched::config::{shared, AppConfig, LogFormat, OperationConfigMap, SharedConfig};
use oltsched::domains::jobs::chain::ChainCoordinator;
use oltsched::domains::jobs::lifecycle::ExecutionLifecycleManager;
use oltsched::domains::jobs::pool::{
    CompletionHandler, DelayQueue, PollerPool,
};
use oltsched::domains::jobs::scheduler::{DynamicScheduler, SchedulerHealth};
use oltsched::domains::jobs::store::{InMemoryExecutionStore, InMemoryJobStore};
use oltsched::domains::olt::{InMemoryOltStore, Olt};
use oltsched::kernel::clock::TestClock;
use oltsched::worker::ScriptedSnmpWorker;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Forwards completion callbacks to an `ExecutionLifecycleManager` that
/// cannot exist until after the pool it's set into does.
pub struct LifecycleHandle(OnceLock<Arc<ExecutionLifecycleManager>>);

impl LifecycleHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(OnceLock::new()))
    }

    pub fn set(&self, manager: Arc<ExecutionLifecycleManager>) {
        self.0
            .set(manager)
            .unwrap_or_else(|_| panic!("lifecycle handle set twice"));
    }
}

#[async_trait::async_trait]
impl CompletionHandler for LifecycleHandle {
    async fn on_complete(
        &self,
        execution_id: oltsched::common::entity_ids::ExecutionId,
        state: oltsched::domains::jobs::models::ExecutionState,
        node: oltsched::domains::jobs::models::CompositeNode,
    ) {
        self.0
            .get()
            .expect("lifecycle manager set before first completion")
            .on_complete(execution_id, state, node)
            .await;
    }
}

pub fn test_config() -> SharedConfig {
    shared(AppConfig {
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
    })
}

/// The full assembled stack, built the way `bin/server.rs` builds it but
/// against in-memory stores and a controllable clock.
pub struct Harness {
    pub job_store: Arc<InMemoryJobStore>,
    pub execution_store: Arc<InMemoryExecutionStore>,
    pub olt_store: Arc<InMemoryOltStore>,
    pub worker: Arc<ScriptedSnmpWorker>,
    pub clock: Arc<TestClock>,
    pub pool: Arc<PollerPool>,
    pub lifecycle: Arc<ExecutionLifecycleManager>,
    pub scheduler: Arc<DynamicScheduler>,
    pub health: Arc<SchedulerHealth>,
    /// Clone of the queue handed to the lifecycle manager; `DelayQueue`
    /// wraps an `Arc`, so this observes the same retries it schedules.
    pub delay_queue: DelayQueue,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SharedConfig) -> Self {
        let job_store = Arc::new(InMemoryJobStore::new());
        let execution_store = Arc::new(InMemoryExecutionStore::new());
        let olt_store = Arc::new(InMemoryOltStore::new());
        let worker = Arc::new(ScriptedSnmpWorker::new());
        let clock = Arc::new(TestClock::new(chrono::Utc::now()));

        let lifecycle_handle = LifecycleHandle::new();

        let pool = PollerPool::new(
            4,
            16,
            config.clone(),
            job_store.clone() as Arc<dyn oltsched::domains::jobs::store::JobStore>,
            execution_store.clone() as Arc<dyn oltsched::domains::jobs::store::ExecutionStore>,
            olt_store.clone() as Arc<dyn oltsched::domains::olt::OltStore>,
            worker.clone() as Arc<dyn oltsched::worker::SnmpWorker>,
            lifecycle_handle.clone(),
            clock.clone() as Arc<dyn oltsched::kernel::clock::Clock>,
        );

        let chain_coordinator = Arc::new(ChainCoordinator::new(
            execution_store.clone() as Arc<dyn oltsched::domains::jobs::store::ExecutionStore>,
            pool.clone(),
            clock.clone() as Arc<dyn oltsched::kernel::clock::Clock>,
        ));

        let delay_queue = DelayQueue::new(clock.clone() as Arc<dyn oltsched::kernel::clock::Clock>);
        let delay_queue_handle = delay_queue.clone();

        let lifecycle = Arc::new(ExecutionLifecycleManager::new(
            execution_store.clone() as Arc<dyn oltsched::domains::jobs::store::ExecutionStore>,
            olt_store.clone() as Arc<dyn oltsched::domains::olt::OltStore>,
            chain_coordinator,
            delay_queue,
            clock.clone() as Arc<dyn oltsched::kernel::clock::Clock>,
        ));
        lifecycle_handle.set(lifecycle.clone());

        let (scheduler, health) = DynamicScheduler::new(
            job_store.clone() as Arc<dyn oltsched::domains::jobs::store::JobStore>,
            execution_store.clone() as Arc<dyn oltsched::domains::jobs::store::ExecutionStore>,
            pool.clone(),
            config,
            clock.clone() as Arc<dyn oltsched::kernel::clock::Clock>,
        );

        Self {
            job_store,
            execution_store,
            olt_store,
            worker,
            clock,
            pool,
            lifecycle,
            scheduler: Arc::new(scheduler),
            health,
            delay_queue: delay_queue_handle,
        }
    }

    pub fn insert_enabled_olt(&self, endpoint: &str) -> OltId {
        let olt_id = OltId::new();
        self.olt_store.insert(Olt {
            id: olt_id,
            enabled: true,
            endpoint: endpoint.into(),
            consecutive_failure_count: 0,
        });
        olt_id
    }
}
