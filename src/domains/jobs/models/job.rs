//! The `Job` scheduling template and its operation-type taxonomy.

use crate::common::entity_ids::{JobId, OltId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// The kind of SNMP operation a job performs.
///
/// `Discovery` and `Get` are master-eligible: they may own a chain of
/// follow-up jobs. `Walk`, `Table`, and `Bulk` are chain-only — they can be
/// a chain node but can never themselves carry a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Discovery,
    Get,
    Walk,
    Table,
    Bulk,
}

impl OperationType {
    /// Whether jobs of this type may own a chain of follow-up jobs.
    pub fn is_master_eligible(self) -> bool {
        matches!(self, OperationType::Discovery | OperationType::Get)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Discovery => "discovery",
            OperationType::Get => "get",
            OperationType::Walk => "walk",
            OperationType::Table => "table",
            OperationType::Bulk => "bulk",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled work template bound to one OLT and one operation type.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = JobId::new())]
    pub id: JobId,

    pub olt_id: OltId,

    pub operation_type: OperationType,

    #[builder(default = true)]
    pub enabled: bool,

    /// Cadence in seconds; also defines the per-hour quota
    /// `floor(3600 / interval_seconds)` (minimum 1).
    pub interval_seconds: i64,

    pub next_run_at: DateTime<Utc>,

    #[builder(default = 3)]
    pub max_retries: i32,

    #[builder(default = 120)]
    pub retry_delay_seconds: i64,

    /// Opaque payload handed to the worker.
    pub oid: String,

    /// Advisory routing tag; not interpreted by the scheduler itself.
    #[builder(default, setter(strip_option))]
    pub queue_hint: Option<String>,

    /// For chain nodes, the master job whose success (or, per policy,
    /// failure) triggers them.
    #[builder(default, setter(strip_option))]
    pub parent_job_id: Option<JobId>,

    /// Ordered position within the chain; meaningless for master jobs.
    #[builder(default = 0)]
    pub chain_position: i32,

    /// Chain-node annotation: run without waiting for the predecessor chain
    /// node to terminate.
    #[builder(default = false)]
    pub parallel_ok: bool,

    /// Chain-node annotation: override the default "skip chain on master
    /// failure" policy.
    #[builder(default = false)]
    pub run_chain_on_failure: bool,

    /// Chain-node annotation: if this node itself fails, let the coordinator
    /// proceed to the next node anyway instead of stopping the chain.
    #[builder(default = false)]
    pub continue_chain_on_failure: bool,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Per-hour quota for this job: `floor(3600 / interval_seconds)`,
    /// minimum 1.
    pub fn quota_per_hour(&self) -> u32 {
        let interval = self.interval_seconds.max(1);
        ((3600 / interval) as u32).max(1)
    }

    /// Whether this job may own a chain of follow-up jobs.
    pub fn is_master(&self) -> bool {
        self.parent_job_id.is_none() && self.operation_type.is_master_eligible()
    }

    /// Whether this job is itself a chain node.
    pub fn is_chain_node(&self) -> bool {
        self.parent_job_id.is_some()
    }
}
