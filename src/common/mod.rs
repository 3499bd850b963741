pub mod entity_ids;
pub mod errors;
pub mod id;

pub use entity_ids::{ChainId, ExecutionId, JobId, OltId};
pub use errors::{ExecutionErrorKind, SchedulerError};
pub use id::Id;
