pub mod delay_queue;
pub mod olt_lock;
pub mod poller_pool;

pub use delay_queue::{DelayQueue, DelayQueueDispatcher};
pub use olt_lock::OltLockRegistry;
pub use poller_pool::{CompletionHandler, PollerPool, PoolDispatcher, PoolStats, SubmitOutcome};
