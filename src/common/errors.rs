//! Crate-wide error types.
//!
//! `SchedulerError` is the boundary error type surfaced by the observability
//! HTTP layer and by fallible infrastructure calls (store access, config
//! loading). `ExecutionErrorKind` is the narrower taxonomy recorded on
//! FAILED/INTERRUPTED execution rows; it never escapes as a Rust `Error`
//! because execution failures are data, not control flow (see module docs
//! on the lifecycle manager).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Failure classification carried on a terminal (FAILED or INTERRUPTED)
/// execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "execution_error_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// Worker did not respond within the configured timeout. Retriable.
    Timeout,
    /// Connectivity failure (ICMP unreachable, TCP reset). Retriable.
    Transport,
    /// SNMP-level error reply (noSuchName, genErr, ...). Retriable only if
    /// the subcode is transient; see [`ExecutionErrorKind::is_retriable`].
    Protocol,
    /// Credential or community string rejected. Not retriable.
    Auth,
    /// No formula/OID resolved for this OLT model. Not retriable.
    Config,
    /// Job or OLT was disabled after scheduling. Not an error.
    Disabled,
    /// Non-terminal execution found and closed out by startup recovery.
    ProcessRestart,
    /// Graceful shutdown terminated an in-flight run.
    Shutdown,
    /// Unclassified worker exception. Retriable with caution — callers cap
    /// retries on this kind to a single attempt.
    Internal,
}

impl ExecutionErrorKind {
    /// Whether the lifecycle manager should schedule a retry for this kind.
    ///
    /// `Protocol` is handled by the caller inspecting the underlying SNMP
    /// subcode before recording the execution; by the time a row is
    /// persisted with kind `Protocol` it has already been determined
    /// retriable, so it reads as retriable here too.
    pub fn is_retriable(self) -> bool {
        !matches!(
            self,
            ExecutionErrorKind::Auth
                | ExecutionErrorKind::Config
                | ExecutionErrorKind::Disabled
                | ExecutionErrorKind::ProcessRestart
                | ExecutionErrorKind::Shutdown
        )
    }

    /// Retry attempts are capped at 1 for internal (unclassified) failures
    /// regardless of the job's configured `max_retries`.
    pub fn max_retry_cap(self) -> Option<i32> {
        match self {
            ExecutionErrorKind::Internal => Some(1),
            _ => None,
        }
    }
}

/// Top-level error type for the scheduler crate.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("olt not found: {0}")]
    OltNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("pool rejected submission: {0}")]
    PoolRejected(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = match &self {
            SchedulerError::JobNotFound(_)
            | SchedulerError::ExecutionNotFound(_)
            | SchedulerError::OltNotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::Config(_) | SchedulerError::PoolRejected(_) => {
                StatusCode::BAD_REQUEST
            }
            SchedulerError::Database(_) | SchedulerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
