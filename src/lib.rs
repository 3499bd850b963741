//! Polling scheduler and execution coordinator for a fleet of SNMP-managed
//! optical line terminals (OLTs).
//!
//! `domains::jobs::scheduler` decides what runs and when; `domains::jobs::pool`
//! bounds how much runs concurrently; `domains::jobs::lifecycle` and
//! `domains::jobs::chain` decide what happens after a run finishes.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod observability;
pub mod worker;
