//! Marker types for [`Id`](super::id::Id), and the concrete id aliases used
//! throughout the scheduler domain.

use super::id::Id;

/// Marker for an OLT (Optical Line Terminal) in the managed fleet.
pub struct Olt;
pub type OltId = Id<Olt>;

/// Marker for a schedulable unit of polling work.
pub struct Job;
pub type JobId = Id<Job>;

/// Marker for a single attempt at running a job against an OLT.
pub struct Execution;
pub type ExecutionId = Id<Execution>;

/// Marker for a chain of dependent executions run after a master job.
pub struct Chain;
pub type ChainId = Id<Chain>;
