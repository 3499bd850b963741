//! `Execution` — one record per attempt at running a job.

use crate::common::entity_ids::{ExecutionId, JobId, OltId};
use crate::common::errors::ExecutionErrorKind;
use crate::domains::jobs::models::job::OperationType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Execution state. Terminal states (`Success`, `Failed`, `Interrupted`) are
/// absorbing; only terminal executions count toward quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "execution_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Success,
    Failed,
    Interrupted,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Success | ExecutionState::Failed | ExecutionState::Interrupted
        )
    }

    pub fn is_non_terminal(self) -> bool {
        !self.is_terminal()
    }
}

/// One concrete attempt of a job.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Execution {
    #[builder(default = ExecutionId::new())]
    pub id: ExecutionId,

    pub job_id: JobId,

    pub olt_id: OltId,

    /// Denormalized from the job, so quota queries need no join.
    pub operation_type: OperationType,

    #[builder(default = ExecutionState::Pending)]
    pub state: ExecutionState,

    /// 1-based; resets per scheduler-initiated run, increments on retry.
    #[builder(default = 1)]
    pub attempt_number: i32,

    pub scheduled_at: DateTime<Utc>,

    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub duration_ms: Option<i64>,

    /// Pool slot identifier, set when the execution starts running.
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    #[builder(default, setter(strip_option))]
    pub error_kind: Option<ExecutionErrorKind>,

    #[builder(default, setter(strip_option))]
    pub error_detail: Option<String>,

    /// Set for chain executions: the master execution that triggered this
    /// one.
    #[builder(default, setter(strip_option))]
    pub parent_execution_id: Option<ExecutionId>,
}

impl Execution {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
