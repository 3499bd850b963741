//! SNMP worker interface: the external collaborator invoked by a pool slot.
//! The core sees only "execute query, return result or error" — the
//! transport itself is out of scope.

use crate::common::errors::ExecutionErrorKind;
use crate::domains::jobs::models::job::OperationType;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[async_trait]
pub trait SnmpWorker: Send + Sync {
    async fn execute(
        &self,
        olt_endpoint: &str,
        operation_type: OperationType,
        oid: &str,
        timeout: Duration,
    ) -> Result<Value, ExecutionErrorKind>;
}

/// Scripted fake used by the test harness: returns the next queued outcome,
/// or a success with `Value::Null` if the queue is empty.
#[derive(Default)]
pub struct ScriptedSnmpWorker {
    outcomes: Mutex<VecDeque<Result<Value, ExecutionErrorKind>>>,
}

impl ScriptedSnmpWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_success(&self, value: Value) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(value));
    }

    pub fn push_failure(&self, kind: ExecutionErrorKind) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(kind));
    }
}

#[async_trait]
impl SnmpWorker for ScriptedSnmpWorker {
    async fn execute(
        &self,
        _olt_endpoint: &str,
        _operation_type: OperationType,
        _oid: &str,
        _timeout: Duration,
    ) -> Result<Value, ExecutionErrorKind> {
        let next = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or(Ok(Value::Null))
    }
}
