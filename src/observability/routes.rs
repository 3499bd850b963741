//! Read-only HTTP surface: pool stats, scheduler health, liveness, and
//! recent executions for a job. No mutation endpoints live on this router.

use crate::common::entity_ids::JobId;
use crate::common::errors::SchedulerError;
use crate::domains::jobs::pool::poller_pool::PollerPool;
use crate::domains::jobs::scheduler::SchedulerHealth;
use crate::domains::jobs::store::execution_store::ExecutionStore;
use crate::observability::types::{
    ExecutionSummary, HealthzResponse, PollerStatsResponse, SchedulerHealthResponse,
};
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

#[derive(Clone)]
pub struct ObservabilityState {
    pub pool: Arc<PollerPool>,
    pub scheduler_health: Arc<SchedulerHealth>,
    pub execution_store: Arc<dyn ExecutionStore>,
}

pub fn router(state: ObservabilityState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/pollers/stats", get(pollers_stats))
        .route("/scheduler/health", get(scheduler_health))
        .route("/executions/:job_id", get(recent_executions))
        .with_state(state)
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

async fn pollers_stats(State(state): State<ObservabilityState>) -> Json<PollerStatsResponse> {
    let stats = state.pool.stats();
    Json(PollerStatsResponse {
        slot_count: stats.slot_count,
        busy_count: stats.busy_count,
        queue_depth: stats.queue_depth,
        busy_percentage: stats.busy_percentage,
        tasks_delayed_count: stats.tasks_delayed_count,
    })
}

async fn scheduler_health(
    State(state): State<ObservabilityState>,
) -> Json<SchedulerHealthResponse> {
    let snapshot = state.scheduler_health.snapshot();
    Json(SchedulerHealthResponse {
        last_tick_at: snapshot.last_tick_at,
        last_tick_duration_ms: snapshot.last_tick_duration_ms,
        jobs_ready_count: snapshot.jobs_ready_count,
        quota_blocked_count: snapshot.quota_blocked_count,
    })
}

async fn recent_executions(
    State(state): State<ObservabilityState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<Vec<ExecutionSummary>>, SchedulerError> {
    let executions = state.execution_store.list_recent_for_job(job_id, 50).await?;

    Ok(Json(
        executions
            .into_iter()
            .map(|e| ExecutionSummary {
                id: e.id,
                job_id: e.job_id,
                olt_id: e.olt_id,
                operation_type: e.operation_type,
                state: e.state,
                attempt_number: e.attempt_number,
                scheduled_at: e.scheduled_at,
                started_at: e.started_at,
                finished_at: e.finished_at,
                duration_ms: e.duration_ms,
                error_kind: e.error_kind,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{shared, AppConfig, LogFormat, OperationConfigMap};
    use crate::domains::jobs::lifecycle::manager::NoopCompletionHandler;
    use crate::domains::jobs::scheduler::tick::DynamicScheduler;
    use crate::domains::jobs::store::execution_store::InMemoryExecutionStore;
    use crate::domains::jobs::store::job_store::InMemoryJobStore;
    use crate::domains::olt::InMemoryOltStore;
    use crate::kernel::clock::TestClock;
    use crate::worker::snmp::ScriptedSnmpWorker;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_config() -> crate::config::SharedConfig {
        shared(AppConfig {
            database_url: "postgres://localhost/test".into(),
            bind_addr: "0.0.0.0:0".into(),
            max_executions_per_minute: 6,
            pool_size: 2,
            pool_queue_capacity_factor: 4,
            tick_interval: Duration::from_secs(30),
            operation_configs: OperationConfigMap::default(),
            execution_wall_clock_ceiling: Duration::from_secs(180),
            olt_lock_timeout: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(5),
            log_format: LogFormat::Human,
        })
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let job_store = Arc::new(InMemoryJobStore::new());
        let execution_store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let olt_store = Arc::new(InMemoryOltStore::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let config = test_config();

        let pool = PollerPool::new(
            2,
            8,
            config.clone(),
            job_store.clone(),
            execution_store.clone(),
            olt_store,
            Arc::new(ScriptedSnmpWorker::new()),
            Arc::new(NoopCompletionHandler),
            clock.clone(),
        );

        let (_scheduler, health) =
            DynamicScheduler::new(job_store, execution_store.clone(), pool.clone(), config, clock);

        let app = router(ObservabilityState {
            pool,
            scheduler_health: health,
            execution_store,
        });

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn executions_for_unknown_job_returns_empty_array() {
        let job_store = Arc::new(InMemoryJobStore::new());
        let execution_store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let olt_store = Arc::new(InMemoryOltStore::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let config = test_config();

        let pool = PollerPool::new(
            2,
            8,
            config.clone(),
            job_store.clone(),
            execution_store.clone(),
            olt_store,
            Arc::new(ScriptedSnmpWorker::new()),
            Arc::new(NoopCompletionHandler),
            clock.clone(),
        );

        let (_scheduler, health) =
            DynamicScheduler::new(job_store, execution_store.clone(), pool.clone(), config, clock);

        let app = router(ObservabilityState {
            pool,
            scheduler_health: health,
            execution_store,
        });

        let uri = format!("/executions/{}", JobId::new());
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let executions: Vec<ExecutionSummary> = serde_json::from_slice(&body).unwrap();
        assert!(executions.is_empty());
    }
}
