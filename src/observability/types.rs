//! JSON response shapes for the read-only observability surface.

use crate::common::entity_ids::{ExecutionId, JobId, OltId};
use crate::domains::jobs::models::execution::ExecutionState;
use crate::domains::jobs::models::job::OperationType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct HealthzResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PollerStatsResponse {
    pub slot_count: usize,
    pub busy_count: usize,
    pub queue_depth: usize,
    pub busy_percentage: f64,
    pub tasks_delayed_count: usize,
}

#[derive(Debug, Serialize)]
pub struct SchedulerHealthResponse {
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_tick_duration_ms: i64,
    pub jobs_ready_count: u64,
    pub quota_blocked_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: ExecutionId,
    pub job_id: JobId,
    pub olt_id: OltId,
    pub operation_type: OperationType,
    pub state: ExecutionState,
    pub attempt_number: i32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_kind: Option<crate::common::errors::ExecutionErrorKind>,
}
