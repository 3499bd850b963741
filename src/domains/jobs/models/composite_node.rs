//! `CompositeNode` — the scheduler→pool handoff unit.

use crate::common::entity_ids::ExecutionId;
use crate::domains::jobs::models::job::Job;
use chrono::{DateTime, Utc};

/// A master job plus its ordered chain, as handed from the scheduler (or
/// chain coordinator) to the poller pool. Only the master is executed by the
/// receiving slot; the chain list is carried for the coordinator's use once
/// the master completes.
///
/// The Execution row for `master` is always created by the caller (scheduler
/// tick, chain coordinator, or retry dispatch) *before* the node is handed
/// to the pool, so `execution_id` is always already-persisted.
#[derive(Debug, Clone)]
pub struct CompositeNode {
    pub execution_id: ExecutionId,
    pub master: Job,
    pub chain: Vec<Job>,
    pub originating_scheduled_at: DateTime<Utc>,
}

impl CompositeNode {
    /// A singleton node with no chain — used for chain nodes submitted one
    /// at a time by the coordinator, and for retries.
    pub fn singleton(execution_id: ExecutionId, job: Job, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            execution_id,
            master: job,
            chain: Vec::new(),
            originating_scheduled_at: scheduled_at,
        }
    }

    pub fn with_chain(
        execution_id: ExecutionId,
        master: Job,
        chain: Vec<Job>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            master,
            chain,
            originating_scheduled_at: scheduled_at,
        }
    }
}
