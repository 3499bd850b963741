//! Composition root: wires stores, pool, lifecycle manager, chain
//! coordinator, and scheduler together, then runs them alongside the
//! read-only observability HTTP surface until a shutdown signal arrives.

use anyhow::{Context, Result};
use async_trait::async_trait;
use oltsched::common::entity_ids::ExecutionId;
use oltsched::common::errors::ExecutionErrorKind;
use oltsched::config::{shared, AppConfig};
use oltsched::domains::jobs::chain::ChainCoordinator;
use oltsched::domains::jobs::lifecycle::ExecutionLifecycleManager;
use oltsched::domains::jobs::models::{CompositeNode, ExecutionState};
use oltsched::domains::jobs::pool::{CompletionHandler, DelayQueue, DelayQueueDispatcher, PollerPool, PoolDispatcher};
use oltsched::domains::jobs::scheduler::{DynamicScheduler, SchedulerService};
use oltsched::domains::jobs::store::{
    ExecutionStore, PostgresExecutionStore, PostgresJobStore, TransitionOutcome, TransitionUpdate,
};
use oltsched::domains::olt::PostgresOltStore;
use oltsched::kernel::clock::{Clock, SystemClock};
use oltsched::kernel::service::spawn;
use oltsched::observability::{router, ObservabilityState};
use oltsched::worker::SnmpClientWorker;
use sqlx::postgres::PgPoolOptions;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Forwards completion callbacks to the lifecycle manager once it exists.
///
/// The pool needs a `CompletionHandler` at construction, but the lifecycle
/// manager needs the chain coordinator, which needs the pool. This handle
/// breaks that cycle: the pool gets a stable `Arc<LifecycleHandle>` up
/// front, and `set` wires in the real manager once the rest is built.
struct LifecycleHandle(OnceLock<Arc<ExecutionLifecycleManager>>);

impl LifecycleHandle {
    fn new() -> Self {
        Self(OnceLock::new())
    }

    fn set(&self, manager: Arc<ExecutionLifecycleManager>) {
        self.0
            .set(manager)
            .unwrap_or_else(|_| panic!("lifecycle handle set twice"));
    }
}

#[async_trait]
impl CompletionHandler for LifecycleHandle {
    async fn on_complete(&self, execution_id: ExecutionId, state: ExecutionState, node: CompositeNode) {
        match self.0.get() {
            Some(manager) => manager.on_complete(execution_id, state, node).await,
            None => tracing::error!(
                execution_id = %execution_id,
                "execution completed before lifecycle manager was wired up"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,oltsched=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting OLT polling scheduler");

    let config = AppConfig::from_env().context("failed to load configuration")?;
    let bind_addr = config.bind_addr.clone();
    let pool_size = config.pool_size;
    let pool_queue_capacity = config.pool_size * config.pool_queue_capacity_factor;
    let tick_interval = config.tick_interval;
    let shutdown_grace = config.shutdown_grace;
    let database_url = config.database_url.clone();
    let config = shared(config);

    tracing::info!("connecting to database");
    let pg_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("migrations complete");

    let clock = Arc::new(SystemClock);
    let job_store = Arc::new(PostgresJobStore::new(pg_pool.clone()));
    let execution_store = Arc::new(PostgresExecutionStore::new(pg_pool.clone()));
    let olt_store = Arc::new(PostgresOltStore::new(pg_pool.clone()));
    let snmp_worker = Arc::new(SnmpClientWorker::new());

    let lifecycle_handle = Arc::new(LifecycleHandle::new());

    let pool = PollerPool::new(
        pool_size,
        pool_queue_capacity,
        config.clone(),
        job_store.clone(),
        execution_store.clone(),
        olt_store.clone(),
        snmp_worker,
        lifecycle_handle.clone(),
        clock.clone(),
    );

    let chain_coordinator = Arc::new(ChainCoordinator::new(
        execution_store.clone(),
        pool.clone(),
        clock.clone(),
    ));

    let delay_queue = DelayQueue::new(clock.clone());

    let lifecycle_manager = Arc::new(ExecutionLifecycleManager::new(
        execution_store.clone(),
        olt_store.clone(),
        chain_coordinator,
        delay_queue.clone(),
        clock.clone(),
    ));
    lifecycle_handle.set(lifecycle_manager.clone());

    let recovered = lifecycle_manager
        .recover_on_startup()
        .await
        .context("startup recovery failed")?;
    tracing::info!(recovered, "startup recovery complete");

    let (scheduler, scheduler_health) = DynamicScheduler::new(
        job_store,
        execution_store.clone(),
        pool.clone(),
        config.clone(),
        clock.clone(),
    );
    let scheduler = Arc::new(scheduler);

    let shutdown = CancellationToken::new();

    let mut handles = vec![
        spawn(Box::new(SchedulerService::new(scheduler, config)), shutdown.clone()),
        spawn(Box::new(PoolDispatcher::new(pool.clone())), shutdown.clone()),
        spawn(
            Box::new(DelayQueueDispatcher::new(delay_queue, pool.clone(), tick_interval)),
            shutdown.clone(),
        ),
    ];

    let shutdown_pool = pool.clone();
    let shutdown_execution_store = execution_store.clone();

    let observability_state = ObservabilityState {
        pool,
        scheduler_health,
        execution_store,
    };
    let app = router(observability_state).layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("failed to bind observability listener")?;
    tracing::info!(addr = %bind_addr, "observability surface listening");

    let http_shutdown = shutdown.clone();
    let http_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "observability server exited with error");
        }
    });
    handles.push(http_handle);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }

    tracing::info!(grace_secs = shutdown_grace.as_secs(), "starting graceful shutdown");
    shutdown.cancel();
    shutdown_pool.stop_accepting();

    if tokio::time::timeout(shutdown_grace, futures::future::join_all(handles))
        .await
        .is_err()
    {
        tracing::warn!("shutdown grace window elapsed before all services stopped, interrupting stragglers");

        let stragglers = shutdown_execution_store
            .list_non_terminal()
            .await
            .context("failed to list non-terminal executions during shutdown")?;
        let now = clock.now();
        let mut interrupted = 0;

        for execution in stragglers {
            let outcome = shutdown_execution_store
                .transition(
                    execution.id,
                    execution.state,
                    ExecutionState::Interrupted,
                    TransitionUpdate {
                        finished_at: Some(now),
                        error_kind: Some(ExecutionErrorKind::Shutdown),
                        ..Default::default()
                    },
                )
                .await
                .context("failed to force-interrupt execution during shutdown")?;

            if outcome == TransitionOutcome::Ok {
                interrupted += 1;
            }
        }

        tracing::warn!(interrupted, "force-interrupted executions still running past the grace window");
    }

    tracing::info!("shutdown complete");
    Ok(())
}
