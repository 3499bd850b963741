//! Execution Record Store: durable log of every attempt, and the source of
//! truth for quota and "is-already-running" queries.

use crate::common::entity_ids::{ExecutionId, JobId, OltId};
use crate::common::errors::{ExecutionErrorKind, SchedulerError};
use crate::domains::jobs::models::execution::{Execution, ExecutionState};
use crate::domains::jobs::models::job::OperationType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;

/// Fields carried on a state transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub worker_id: Option<String>,
    pub error_kind: Option<ExecutionErrorKind>,
    pub error_detail: Option<String>,
}

/// Result of a compare-and-swap `transition` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Ok,
    Conflict,
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert_execution(
        &self,
        job_id: JobId,
        olt_id: OltId,
        operation_type: OperationType,
        scheduled_at: DateTime<Utc>,
        attempt_number: i32,
        parent_execution_id: Option<ExecutionId>,
    ) -> Result<ExecutionId, SchedulerError>;

    /// Compare-and-swap transition; `from_state` is the required guard.
    async fn transition(
        &self,
        execution_id: ExecutionId,
        from_state: ExecutionState,
        to_state: ExecutionState,
        update: TransitionUpdate,
    ) -> Result<TransitionOutcome, SchedulerError>;

    async fn count_terminal_since(
        &self,
        job_id: JobId,
        since: DateTime<Utc>,
    ) -> Result<u32, SchedulerError>;

    async fn exists_non_terminal(
        &self,
        olt_id: OltId,
        operation_type: OperationType,
    ) -> Result<bool, SchedulerError>;

    async fn list_non_terminal(&self) -> Result<Vec<Execution>, SchedulerError>;

    async fn get(&self, execution_id: ExecutionId) -> Result<Option<Execution>, SchedulerError>;

    async fn list_recent_for_job(
        &self,
        job_id: JobId,
        limit: i64,
    ) -> Result<Vec<Execution>, SchedulerError>;
}

/// Postgres-backed implementation.
pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    async fn insert_execution(
        &self,
        job_id: JobId,
        olt_id: OltId,
        operation_type: OperationType,
        scheduled_at: DateTime<Utc>,
        attempt_number: i32,
        parent_execution_id: Option<ExecutionId>,
    ) -> Result<ExecutionId, SchedulerError> {
        let execution = Execution::builder()
            .job_id(job_id)
            .olt_id(olt_id)
            .operation_type(operation_type)
            .scheduled_at(scheduled_at)
            .attempt_number(attempt_number)
            .maybe_parent_execution_id(parent_execution_id)
            .build();

        sqlx::query(
            r#"
            INSERT INTO executions
                (id, job_id, olt_id, operation_type, state, attempt_number,
                 scheduled_at, parent_execution_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(execution.id)
        .bind(execution.job_id)
        .bind(execution.olt_id)
        .bind(execution.operation_type)
        .bind(execution.state)
        .bind(execution.attempt_number)
        .bind(execution.scheduled_at)
        .bind(execution.parent_execution_id)
        .execute(&self.pool)
        .await?;

        Ok(execution.id)
    }

    async fn transition(
        &self,
        execution_id: ExecutionId,
        from_state: ExecutionState,
        to_state: ExecutionState,
        update: TransitionUpdate,
    ) -> Result<TransitionOutcome, SchedulerError> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET state = $1,
                started_at = COALESCE($2, started_at),
                finished_at = COALESCE($3, finished_at),
                duration_ms = COALESCE($4, duration_ms),
                worker_id = COALESCE($5, worker_id),
                error_kind = COALESCE($6, error_kind),
                error_detail = COALESCE($7, error_detail)
            WHERE id = $8 AND state = $9
            "#,
        )
        .bind(to_state)
        .bind(update.started_at)
        .bind(update.finished_at)
        .bind(update.duration_ms)
        .bind(update.worker_id)
        .bind(update.error_kind)
        .bind(update.error_detail)
        .bind(execution_id)
        .bind(from_state)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(TransitionOutcome::Ok)
        } else {
            Ok(TransitionOutcome::Conflict)
        }
    }

    async fn count_terminal_since(
        &self,
        job_id: JobId,
        since: DateTime<Utc>,
    ) -> Result<u32, SchedulerError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM executions
            WHERE job_id = $1
              AND finished_at >= $2
              AND state IN ('success', 'failed', 'interrupted')
            "#,
        )
        .bind(job_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u32)
    }

    async fn exists_non_terminal(
        &self,
        olt_id: OltId,
        operation_type: OperationType,
    ) -> Result<bool, SchedulerError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM executions
                WHERE olt_id = $1 AND operation_type = $2
                  AND state IN ('pending', 'running')
            )
            "#,
        )
        .bind(olt_id)
        .bind(operation_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn list_non_terminal(&self) -> Result<Vec<Execution>, SchedulerError> {
        let rows = sqlx::query_as::<_, Execution>(
            r#"
            SELECT * FROM executions WHERE state IN ('pending', 'running')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn get(&self, execution_id: ExecutionId) -> Result<Option<Execution>, SchedulerError> {
        let row = sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn list_recent_for_job(
        &self,
        job_id: JobId,
        limit: i64,
    ) -> Result<Vec<Execution>, SchedulerError> {
        let rows = sqlx::query_as::<_, Execution>(
            r#"
            SELECT * FROM executions
            WHERE job_id = $1
            ORDER BY scheduled_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// In-memory fake, following the reference stack's `TestJobManager` pattern:
/// plumbs the exact same trait the Postgres implementation uses, so
/// scheduler/pool/lifecycle tests run without a live database.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    rows: RwLock<HashMap<ExecutionId, Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ExecutionId, Execution>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ExecutionId, Execution>> {
        self.rows.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert_execution(
        &self,
        job_id: JobId,
        olt_id: OltId,
        operation_type: OperationType,
        scheduled_at: DateTime<Utc>,
        attempt_number: i32,
        parent_execution_id: Option<ExecutionId>,
    ) -> Result<ExecutionId, SchedulerError> {
        let execution = Execution::builder()
            .job_id(job_id)
            .olt_id(olt_id)
            .operation_type(operation_type)
            .scheduled_at(scheduled_at)
            .attempt_number(attempt_number)
            .maybe_parent_execution_id(parent_execution_id)
            .build();

        let id = execution.id;
        self.write().insert(id, execution);
        Ok(id)
    }

    async fn transition(
        &self,
        execution_id: ExecutionId,
        from_state: ExecutionState,
        to_state: ExecutionState,
        update: TransitionUpdate,
    ) -> Result<TransitionOutcome, SchedulerError> {
        let mut rows = self.write();
        let Some(execution) = rows.get_mut(&execution_id) else {
            return Ok(TransitionOutcome::Conflict);
        };

        if execution.state != from_state {
            return Ok(TransitionOutcome::Conflict);
        }

        execution.state = to_state;
        if let Some(v) = update.started_at {
            execution.started_at = Some(v);
        }
        if let Some(v) = update.finished_at {
            execution.finished_at = Some(v);
        }
        if let Some(v) = update.duration_ms {
            execution.duration_ms = Some(v);
        }
        if let Some(v) = update.worker_id {
            execution.worker_id = Some(v);
        }
        if let Some(v) = update.error_kind {
            execution.error_kind = Some(v);
        }
        if let Some(v) = update.error_detail {
            execution.error_detail = Some(v);
        }

        Ok(TransitionOutcome::Ok)
    }

    async fn count_terminal_since(
        &self,
        job_id: JobId,
        since: DateTime<Utc>,
    ) -> Result<u32, SchedulerError> {
        let count = self
            .read()
            .values()
            .filter(|e| {
                e.job_id == job_id
                    && e.is_terminal()
                    && e.finished_at.map(|f| f >= since).unwrap_or(false)
            })
            .count();

        Ok(count as u32)
    }

    async fn exists_non_terminal(
        &self,
        olt_id: OltId,
        operation_type: OperationType,
    ) -> Result<bool, SchedulerError> {
        Ok(self.read().values().any(|e| {
            e.olt_id == olt_id && e.operation_type == operation_type && !e.is_terminal()
        }))
    }

    async fn list_non_terminal(&self) -> Result<Vec<Execution>, SchedulerError> {
        Ok(self
            .read()
            .values()
            .filter(|e| !e.is_terminal())
            .cloned()
            .collect())
    }

    async fn get(&self, execution_id: ExecutionId) -> Result<Option<Execution>, SchedulerError> {
        Ok(self.read().get(&execution_id).cloned())
    }

    async fn list_recent_for_job(
        &self,
        job_id: JobId,
        limit: i64,
    ) -> Result<Vec<Execution>, SchedulerError> {
        let mut matches: Vec<Execution> = self
            .read()
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_transition_succeeds_with_matching_from_state() {
        let store = InMemoryExecutionStore::new();
        let job_id = JobId::new();
        let olt_id = OltId::new();
        let id = store
            .insert_execution(job_id, olt_id, OperationType::Discovery, Utc::now(), 1, None)
            .await
            .unwrap();

        let outcome = store
            .transition(
                id,
                ExecutionState::Pending,
                ExecutionState::Running,
                TransitionUpdate {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Ok);
        assert_eq!(store.get(id).await.unwrap().unwrap().state, ExecutionState::Running);
    }

    #[tokio::test]
    async fn transition_with_wrong_from_state_conflicts() {
        let store = InMemoryExecutionStore::new();
        let job_id = JobId::new();
        let olt_id = OltId::new();
        let id = store
            .insert_execution(job_id, olt_id, OperationType::Discovery, Utc::now(), 1, None)
            .await
            .unwrap();

        let outcome = store
            .transition(
                id,
                ExecutionState::Running,
                ExecutionState::Success,
                TransitionUpdate::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Conflict);
    }

    #[tokio::test]
    async fn exists_non_terminal_reflects_state() {
        let store = InMemoryExecutionStore::new();
        let job_id = JobId::new();
        let olt_id = OltId::new();
        assert!(!store
            .exists_non_terminal(olt_id, OperationType::Discovery)
            .await
            .unwrap());

        store
            .insert_execution(job_id, olt_id, OperationType::Discovery, Utc::now(), 1, None)
            .await
            .unwrap();

        assert!(store
            .exists_non_terminal(olt_id, OperationType::Discovery)
            .await
            .unwrap());
    }
}
