//! Read-only HTTP observability surface: pool stats, scheduler health,
//! liveness, and recent executions for a job. No mutation endpoints.

pub mod routes;
pub mod types;

pub use routes::{router, ObservabilityState};
