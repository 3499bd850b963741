pub mod burst_smoothing;
pub mod tick;

pub use burst_smoothing::{compute_burst_smoothing, SmoothingMove};
pub use tick::{DynamicScheduler, SchedulerHealth, SchedulerHealthSnapshot, SchedulerService};
