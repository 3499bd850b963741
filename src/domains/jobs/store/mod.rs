pub mod execution_store;
pub mod job_store;

pub use execution_store::{
    ExecutionStore, InMemoryExecutionStore, PostgresExecutionStore, TransitionOutcome,
    TransitionUpdate,
};
pub use job_store::{InMemoryJobStore, JobStore, PostgresJobStore};
