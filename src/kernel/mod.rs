//! Infrastructure shared across domains: time and the service-host run-loop
//! abstraction. Kernel is for infrastructure only — business logic lives in
//! `domains`.

pub mod clock;
pub mod service;

pub use clock::{Clock, SystemClock, TestClock};
pub use service::{spawn, Service};
