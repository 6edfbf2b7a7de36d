//! Per-application disk quotas for the persistent data partition.
pub mod errors;
pub mod monitor;
mod table;
mod usage;

pub use monitor::{MonitorHandle, QuotaMonitor};
pub use table::{QuotaTable, key};
pub use usage::{AppUsage, Classification, dir_usage, scan};
