pub mod manager;

pub use manager::{ExecutionLifecycleManager, NoopCompletionHandler};
