//! End-to-end master + chain sequencing: a master job's chain nodes run in
//! order through the real chain coordinator and pool, not a mocked
//! coordinator.

mod common;

use common::Harness;
use oltsched::domains::jobs::models::{ExecutionState, Job, OperationType};
use std::time::Duration;

#[tokio::test]
async fn successful_master_runs_its_chain_in_order() {
    let harness = Harness::new();
    let olt_id = harness.insert_enabled_olt("10.0.3.1");

    harness.worker.push_success(serde_json::json!({"step": "master"}));
    harness.worker.push_success(serde_json::json!({"step": "c1"}));
    harness.worker.push_success(serde_json::json!({"step": "c2"}));

    let master = Job::builder()
        .olt_id(olt_id)
        .operation_type(OperationType::Discovery)
        .interval_seconds(600)
        .next_run_at(harness.clock.now())
        .oid("1.3.6.1")
        .build();
    let master_id = master.id;
    harness.job_store.insert(master);

    let c1 = Job::builder()
        .olt_id(olt_id)
        .operation_type(OperationType::Walk)
        .interval_seconds(600)
        .next_run_at(harness.clock.now())
        .oid("1.3.6.1.2")
        .parent_job_id(master_id)
        .chain_position(1)
        .build();
    let c1_id = c1.id;
    harness.job_store.insert(c1);

    let c2 = Job::builder()
        .olt_id(olt_id)
        .operation_type(OperationType::Walk)
        .interval_seconds(600)
        .next_run_at(harness.clock.now())
        .oid("1.3.6.1.3")
        .parent_job_id(master_id)
        .chain_position(2)
        .build();
    let c2_id = c2.id;
    harness.job_store.insert(c2);

    harness.scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let master_executions = harness
        .execution_store
        .list_recent_for_job(master_id, 10)
        .await
        .unwrap();
    assert_eq!(master_executions.len(), 1);
    assert_eq!(master_executions[0].state, ExecutionState::Success);

    let c1_executions = harness.execution_store.list_recent_for_job(c1_id, 10).await.unwrap();
    assert_eq!(c1_executions.len(), 1);
    assert_eq!(c1_executions[0].state, ExecutionState::Success);
    assert_eq!(c1_executions[0].parent_execution_id, Some(master_executions[0].id));

    let c2_executions = harness.execution_store.list_recent_for_job(c2_id, 10).await.unwrap();
    assert_eq!(c2_executions.len(), 1);
    assert_eq!(c2_executions[0].state, ExecutionState::Success);
}

#[tokio::test]
async fn failed_master_without_run_chain_on_failure_skips_chain() {
    let harness = Harness::new();
    let olt_id = harness.insert_enabled_olt("10.0.3.2");
    harness
        .worker
        .push_failure(oltsched::common::errors::ExecutionErrorKind::Protocol);

    let master = Job::builder()
        .olt_id(olt_id)
        .operation_type(OperationType::Discovery)
        .max_retries(0)
        .interval_seconds(600)
        .next_run_at(harness.clock.now())
        .oid("1.3.6.1")
        .build();
    let master_id = master.id;
    harness.job_store.insert(master);

    let c1 = Job::builder()
        .olt_id(olt_id)
        .operation_type(OperationType::Walk)
        .interval_seconds(600)
        .next_run_at(harness.clock.now())
        .oid("1.3.6.1.2")
        .parent_job_id(master_id)
        .chain_position(1)
        .build();
    let c1_id = c1.id;
    harness.job_store.insert(c1);

    harness.scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let c1_executions = harness.execution_store.list_recent_for_job(c1_id, 10).await.unwrap();
    assert!(c1_executions.is_empty(), "chain must not start on a failed master by default");
}
